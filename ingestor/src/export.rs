use crate::errors::{Error, Result};
use crate::metrics::EXPORT_FAILURES_TOTAL;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, temperature: f64, humidity: f64, status: &str) -> Result<()>;
}

pub struct ExportSink {
    exporter: Option<Arc<dyn Exporter>>,
    timeout: Duration,
}

impl ExportSink {
    pub fn new(exporter: Arc<dyn Exporter>, timeout: Duration) -> Self {
        Self {
            exporter: Some(exporter),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            exporter: None,
            timeout: Duration::ZERO,
        }
    }

    pub async fn export(&self, temperature: f64, humidity: f64, status: &str) {
        let Some(exporter) = &self.exporter else {
            return;
        };

        match tokio::time::timeout(self.timeout, exporter.export(temperature, humidity, status))
            .await
        {
            Ok(Ok(())) => debug!("Reading exported"),
            Ok(Err(e)) => {
                EXPORT_FAILURES_TOTAL.inc();
                warn!("Error sending to sheet: {}", e);
            }
            Err(_) => {
                EXPORT_FAILURES_TOTAL.inc();
                warn!("Sheet export timed out after {:?}", self.timeout);
            }
        }
    }
}

/// Posts `{temperature, humidity, status}` to a spreadsheet web-app endpoint.
pub struct SheetExporter {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct SheetRow<'a> {
    temperature: f64,
    humidity: f64,
    status: &'a str,
}

impl SheetExporter {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Exporter for SheetExporter {
    async fn export(&self, temperature: f64, humidity: f64, status: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&SheetRow {
                temperature,
                humidity,
                status,
            })
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("sheet export failed: {}", e)))?;

        debug!("Google Sheet response: {}", response.status());
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "sheet endpoint answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
