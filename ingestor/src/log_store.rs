use crate::errors::Result;
use crate::metrics::{CORRUPT_RECORDS_TOTAL, PERSISTED_READINGS_TOTAL};
use crate::model::Reading;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const HEADER: &str = "timestamp,temperature,humidity,status,device_id";
const COLUMNS: usize = 5;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct TelemetryLog {
    path: PathBuf,
    state: Mutex<AppendState>,
}

struct AppendState {
    last_timestamp: Option<DateTime<Utc>>,
    // File length right after our last append; always a record boundary.
    committed_len: Option<u64>,
}

impl TelemetryLog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_readings(&path).await?;
        info!(
            "Telemetry log {} opened with {} readings",
            path.display(),
            records.len()
        );

        Ok(Self {
            state: Mutex::new(AppendState {
                last_timestamp: records.last().map(|r| r.timestamp),
                committed_len: None,
            }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the reading as stored: timestamp truncated to seconds and never
    /// earlier than the previous record.
    pub async fn append(&self, mut reading: Reading) -> Result<Reading> {
        let mut state = self.state.lock().await;

        reading.timestamp = reading.timestamp.trunc_subsecs(0);
        if let Some(prev) = state.last_timestamp {
            if reading.timestamp < prev {
                reading.timestamp = prev;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut len = file.metadata().await?.len();

        if len > 0 && state.committed_len != Some(len) {
            let complete = complete_prefix_len(&fs::read(&self.path).await?) as u64;
            if complete < len {
                CORRUPT_RECORDS_TOTAL.inc();
                warn!(
                    "Telemetry log {} ends with an incomplete record, dropping {} bytes",
                    self.path.display(),
                    len - complete
                );
                file.set_len(complete).await?;
                len = complete;
            }
        }

        let mut buf = String::with_capacity(128);
        if len == 0 {
            buf.push_str(HEADER);
            buf.push('\n');
        }
        buf.push_str(&encode_record(&reading));
        buf.push('\n');

        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        state.last_timestamp = Some(reading.timestamp);
        state.committed_len = Some(len + buf.len() as u64);
        PERSISTED_READINGS_TOTAL.inc();
        debug!(device_id = %reading.device_id, "Reading appended");
        Ok(reading)
    }

    pub async fn tail(&self, n: usize) -> Result<Vec<Reading>> {
        let mut readings = read_readings(&self.path).await?;
        let skip = readings.len().saturating_sub(n);
        Ok(readings.split_off(skip))
    }

    pub async fn latest(&self) -> Result<Option<Reading>> {
        Ok(read_readings(&self.path).await?.pop())
    }

    pub async fn latest_for(&self, device_id: &str) -> Result<Option<Reading>> {
        let readings = read_readings(&self.path).await?;
        Ok(readings.into_iter().rev().find(|r| r.device_id == device_id))
    }

    pub async fn all_for(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        let mut readings: Vec<Reading> = read_readings(&self.path)
            .await?
            .into_iter()
            .filter(|r| r.device_id == device_id)
            .collect();
        let skip = readings.len().saturating_sub(limit);
        Ok(readings.split_off(skip))
    }

    pub async fn recent(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<Reading>> {
        match device_id {
            Some(device_id) => self.all_for(device_id, limit).await,
            None => self.tail(limit).await,
        }
    }
}

async fn read_readings(path: &Path) -> Result<Vec<Reading>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut readings = Vec::new();
    for record in parse_csv(&bytes) {
        if record.is_blank() || record.is_header() {
            continue;
        }
        match decode_record(&record) {
            Some(reading) => readings.push(reading),
            None => {
                CORRUPT_RECORDS_TOTAL.inc();
                warn!(
                    "Skipping malformed record at {}:{}",
                    path.display(),
                    record.line
                );
            }
        }
    }
    Ok(readings)
}

fn encode_record(reading: &Reading) -> String {
    format!(
        "{},{},{},{},{}",
        reading.timestamp.format(TIMESTAMP_FORMAT),
        reading.temperature,
        reading.humidity,
        encode_field(&reading.status),
        encode_field(&reading.device_id)
    )
}

fn encode_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn decode_record(record: &RawRecord) -> Option<Reading> {
    if !record.terminated || !record.well_formed || record.fields.len() != COLUMNS {
        return None;
    }
    let f = &record.fields;
    let timestamp = NaiveDateTime::parse_from_str(&f[0], TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    let temperature = f[1].parse::<f64>().ok().filter(|v| v.is_finite())?;
    let humidity = f[2].parse::<f64>().ok().filter(|v| v.is_finite())?;
    if f[4].is_empty() {
        return None;
    }

    Some(Reading {
        device_id: f[4].clone(),
        timestamp,
        temperature,
        humidity,
        status: f[3].clone(),
    })
}

#[derive(Debug)]
struct RawRecord {
    fields: Vec<String>,
    line: usize,
    end: usize,
    well_formed: bool,
    terminated: bool,
}

impl RawRecord {
    fn is_blank(&self) -> bool {
        self.terminated && self.fields.len() == 1 && self.fields[0].is_empty()
    }

    fn is_header(&self) -> bool {
        self.fields.iter().map(String::as_str).eq(HEADER.split(','))
    }
}

fn complete_prefix_len(data: &[u8]) -> usize {
    parse_csv(data)
        .iter()
        .rev()
        .find(|r| r.terminated)
        .map_or(0, |r| r.end)
}

// Minimal RFC 4180 reader over raw bytes, so `end` offsets match the file.
// Structural characters are ASCII and never occur inside multi-byte UTF-8.
fn parse_csv(data: &[u8]) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field: Vec<u8> = Vec::new();
    let mut in_quotes = false;
    let mut after_quote = false;
    let mut well_formed = true;
    let mut line = 1;
    let mut start_line = 1;

    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        i += 1;

        if in_quotes {
            match b {
                b'"' if data.get(i) == Some(&b'"') => {
                    i += 1;
                    field.push(b'"');
                }
                b'"' => {
                    in_quotes = false;
                    after_quote = true;
                }
                _ => {
                    if b == b'\n' {
                        line += 1;
                    }
                    field.push(b);
                }
            }
            continue;
        }

        match b {
            b',' => {
                fields.push(take_field(&mut field));
                after_quote = false;
            }
            b'\r' if data.get(i) == Some(&b'\n') => {}
            b'\n' => {
                fields.push(take_field(&mut field));
                records.push(RawRecord {
                    fields: std::mem::take(&mut fields),
                    line: start_line,
                    end: i,
                    well_formed,
                    terminated: true,
                });
                well_formed = true;
                after_quote = false;
                line += 1;
                start_line = line;
            }
            b'"' if field.is_empty() && !after_quote => in_quotes = true,
            _ => {
                if after_quote {
                    well_formed = false;
                }
                field.push(b);
            }
        }
    }

    if in_quotes || after_quote || !field.is_empty() || !fields.is_empty() {
        fields.push(take_field(&mut field));
        records.push(RawRecord {
            fields,
            line: start_line,
            end: data.len(),
            well_formed,
            terminated: false,
        });
    }

    records
}

fn take_field(field: &mut Vec<u8>) -> String {
    String::from_utf8_lossy(&std::mem::take(field)).into_owned()
}
