use crate::config_store::ConfigStore;
use crate::errors::{Error, Result};
use crate::evaluator::{alert_message, evaluate};
use crate::export::ExportSink;
use crate::log_store::TelemetryLog;
use crate::metrics::{
    ALERTS_TOTAL, PIPELINE_LATENCY_SECONDS, REJECTED_REPORTS_TOTAL, REPORTS_TOTAL,
    UPSTREAM_FAILURES_TOTAL,
};
use crate::model::{AlertDecision, Reading, Report, ThresholdConfig};
use crate::notify::NotificationSink;
use crate::report::ReportGenerator;
use crate::report_cache::ReportCache;
use crate::validate::{parse_report, ReportInput};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

const DEFAULT_HISTORY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Persisting,
    Evaluating,
    Notifying,
    ReportGenerating,
    Caching,
    Responding,
}

#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub reading: Reading,
    pub decision: AlertDecision,
    pub report: Report,
}

pub struct IngestionPipeline {
    log: Arc<TelemetryLog>,
    configs: Arc<ConfigStore>,
    reports: ReportGenerator,
    notifications: NotificationSink,
    exports: ExportSink,
    cache: Arc<ReportCache>,
    history_limit: usize,
}

impl IngestionPipeline {
    pub fn new(
        log: Arc<TelemetryLog>,
        configs: Arc<ConfigStore>,
        reports: ReportGenerator,
        cache: Arc<ReportCache>,
    ) -> Self {
        Self {
            log,
            configs,
            reports,
            notifications: NotificationSink::disabled(),
            exports: ExportSink::disabled(),
            cache,
            history_limit: DEFAULT_HISTORY,
        }
    }

    pub fn with_notifications(mut self, notifications: NotificationSink) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_exports(mut self, exports: ExportSink) -> Self {
        self.exports = exports;
        self
    }

    /// How many earlier readings of the same device go into the prompt.
    pub fn with_history(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub async fn process(&self, body: &Value) -> Result<IngestionOutcome> {
        let started = Instant::now();
        REPORTS_TOTAL.inc();
        let result = self.run(body).await;
        PIPELINE_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, body: &Value) -> Result<IngestionOutcome> {
        let (input, config) = match self.validate(body).await {
            Ok(validated) => validated,
            Err(e) => {
                REJECTED_REPORTS_TOTAL.inc();
                warn!(stage = ?Stage::Validating, "Rejected report: {}", e);
                return Err(e);
            }
        };

        let reading = self
            .log
            .append(Reading {
                device_id: input.device_id,
                timestamp: Utc::now(),
                temperature: input.temperature,
                humidity: input.humidity,
                status: input.status,
            })
            .await
            .map_err(|e| {
                error!(stage = ?Stage::Persisting, "Failed to persist reading: {}", e);
                e
            })?;
        self.exports
            .export(reading.temperature, reading.humidity, &reading.status)
            .await;

        let decision = evaluate(&reading, &config);
        debug!(
            stage = ?Stage::Evaluating,
            device_id = %reading.device_id,
            kind = %decision.kind,
            "Reading evaluated"
        );
        if let Some(message) = alert_message(&decision) {
            ALERTS_TOTAL.with_label_values(&[decision.kind.as_str()]).inc();
            warn!(
                stage = ?Stage::Notifying,
                device_id = %reading.device_id,
                kind = %decision.kind,
                "Threshold breached: {}°C (bound {:?})",
                reading.temperature,
                decision.threshold_breached
            );
            self.notifications.send(&message).await;
        }

        let history = self.history_for(&reading).await;
        let report = self
            .reports
            .generate(&reading, &config, &history)
            .await
            .map_err(|e| {
                UPSTREAM_FAILURES_TOTAL.inc();
                error!(
                    stage = ?Stage::ReportGenerating,
                    device_id = %reading.device_id,
                    "Report generation failed, reading kept: {}",
                    e
                );
                e
            })?;

        // The cache only feeds the status page; losing one update is not worth failing the request.
        if let Err(e) = self.cache.store(&report).await {
            error!(stage = ?Stage::Caching, "Failed to cache report: {}", e);
        }

        debug!(stage = ?Stage::Responding, report_id = %report.id, "Report ready");
        Ok(IngestionOutcome {
            reading,
            decision,
            report,
        })
    }

    async fn validate(&self, body: &Value) -> Result<(ReportInput, ThresholdConfig)> {
        let input = parse_report(body)?;
        let config = self.resolve_thresholds(&input).await?;
        Ok((input, config))
    }

    /// Bounds sent with the report win; each missing one comes from the store.
    async fn resolve_thresholds(&self, input: &ReportInput) -> Result<ThresholdConfig> {
        let stored = match (input.temp_min, input.temp_max) {
            (Some(_), Some(_)) => None,
            _ => match self.configs.get(&input.device_id).await {
                Ok(config) => Some(config),
                Err(Error::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
        };

        let temp_min = input.temp_min.or(stored.as_ref().map(|c| c.temp_min));
        let temp_max = input.temp_max.or(stored.as_ref().map(|c| c.temp_max));
        match (temp_min, temp_max) {
            (Some(temp_min), Some(temp_max)) => Ok(ThresholdConfig {
                device_id: input.device_id.clone(),
                temp_min,
                temp_max,
            }),
            _ => {
                let mut missing = Vec::new();
                if temp_min.is_none() {
                    missing.push("temp_min".to_string());
                }
                if temp_max.is_none() {
                    missing.push("temp_max".to_string());
                }
                Err(Error::MissingFields(missing))
            }
        }
    }

    async fn history_for(&self, reading: &Reading) -> Vec<Reading> {
        if self.history_limit == 0 {
            return Vec::new();
        }
        match self
            .log
            .all_for(&reading.device_id, self.history_limit + 1)
            .await
        {
            Ok(mut history) => {
                // Only the record just appended is dropped; equal earlier readings stay.
                if history.last() == Some(reading) {
                    history.pop();
                }
                let skip = history.len().saturating_sub(self.history_limit);
                history.split_off(skip)
            }
            Err(e) => {
                warn!("Could not load history for {}: {}", reading.device_id, e);
                Vec::new()
            }
        }
    }
}
