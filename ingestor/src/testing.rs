//! In-process fakes for the external services, shared by the unit tests.

use crate::config_store::{ConfigStore, LoadPolicy};
use crate::errors::{Error, Result};
use crate::export::{ExportSink, Exporter};
use crate::log_store::TelemetryLog;
use crate::notify::{NotificationSink, Notifier};
use crate::pipeline::IngestionPipeline;
use crate::report::{ReportGenerator, TextGenerator};
use crate::report_cache::{CachePolicy, ReportCache};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub struct FixedBackend(String);

impl FixedBackend {
    pub fn new(text: &str) -> Self {
        Self(text.to_string())
    }
}

#[async_trait]
impl TextGenerator for FixedBackend {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate_text(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub struct FailingBackend;

#[async_trait]
impl TextGenerator for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate_text(&self, _prompt: &str) -> Result<String> {
        Err(Error::Upstream("connection refused".to_string()))
    }
}

pub struct SlowBackend(pub Duration);

#[async_trait]
impl TextGenerator for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate_text(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("late".to_string())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _message: &str) -> Result<()> {
        Err(Error::Upstream("chat webhook unreachable".to_string()))
    }
}

pub struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn notify(&self, _message: &str) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingExporter {
    rows: Mutex<Vec<(f64, f64, String)>>,
}

impl RecordingExporter {
    pub fn rows(&self) -> Vec<(f64, f64, String)> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    async fn export(&self, temperature: f64, humidity: f64, status: &str) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .push((temperature, humidity, status.to_string()));
        Ok(())
    }
}

/// Stores in a temp directory plus recording sinks.
pub struct TestEnv {
    pub dir: TempDir,
    pub log: Arc<TelemetryLog>,
    pub configs: Arc<ConfigStore>,
    pub cache: Arc<ReportCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub exporter: Arc<RecordingExporter>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(TelemetryLog::open(dir.path().join("log.csv")).await.unwrap());
        let configs = Arc::new(
            ConfigStore::open(dir.path().join("settings.json"), LoadPolicy::Strict)
                .await
                .unwrap(),
        );
        let cache = Arc::new(ReportCache::new(
            dir.path().join("last_reports.json"),
            CachePolicy::PerDevice,
        ));

        Self {
            dir,
            log,
            configs,
            cache,
            notifier: Arc::new(RecordingNotifier::default()),
            exporter: Arc::new(RecordingExporter::default()),
        }
    }

    pub fn pipeline(&self, backend: impl TextGenerator + 'static) -> IngestionPipeline {
        self.pipeline_with(ReportGenerator::new(
            Arc::new(backend),
            Duration::from_secs(2),
        ))
    }

    pub fn pipeline_with(&self, reports: ReportGenerator) -> IngestionPipeline {
        IngestionPipeline::new(
            self.log.clone(),
            self.configs.clone(),
            reports,
            self.cache.clone(),
        )
        .with_notifications(NotificationSink::new(
            self.notifier.clone(),
            Duration::from_secs(1),
        ))
        .with_exports(ExportSink::new(self.exporter.clone(), Duration::from_secs(1)))
    }
}
