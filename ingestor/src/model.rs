use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One telemetry sample reported by a room-control device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    /// Actuator state as reported (`heating`, `cooling`, `off`, ...), kept verbatim.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub device_id: String,
    pub temp_min: f64,
    pub temp_max: f64,
}

impl ThresholdConfig {
    pub fn is_inverted(&self) -> bool {
        self.temp_min > self.temp_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    None,
    High,
    Low,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::None => "none",
            AlertKind::High => "high",
            AlertKind::Low => "low",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDecision {
    pub kind: AlertKind,
    pub device_id: String,
    pub temperature: f64,
    /// The bound that was crossed; `None` when the reading is in range.
    pub threshold_breached: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub device_id: String,
    pub generated_at: DateTime<Utc>,
    pub body: String,
    pub source_reading: Reading,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub report: String,
}

/// REST API response wrapper for raw readings.
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryResponse {
    pub data: Vec<Reading>,
    pub total: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub temperatures: Vec<f64>,
    pub humidities: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl SeriesStats {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for v in values {
            count += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            min,
            max,
            mean: sum / count as f64,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub device_id: Option<String>,
    pub count: usize,
    pub temperature: SeriesStats,
    pub humidity: SeriesStats,
    pub latest_status: String,
    pub latest_timestamp: DateTime<Utc>,
}
