mod config;
mod config_store;
mod errors;
mod evaluator;
mod export;
mod log_store;
mod metrics;
mod model;
mod notify;
mod pipeline;
mod report;
mod report_cache;
mod rest;
#[cfg(test)]
mod testing;
mod validate;

use anyhow::Context;
use axum::{routing::get, Router};
use config::Settings;
use config_store::ConfigStore;
use export::{ExportSink, SheetExporter};
use log_store::TelemetryLog;
use notify::{NotificationSink, WebhookNotifier};
use pipeline::IngestionPipeline;
use report::{ChatCompletionsBackend, ReportGenerator, TemplateBackend, TextGenerator};
use report_cache::ReportCache;
use rest::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    info!("Starting room climate ingestor");
    info!("HTTP server: {}", settings.http_addr);
    info!("Data directory: {}", settings.data_dir.display());
    info!("Text generation: {:?}", settings.textgen);

    // Initialize metrics
    metrics::init_metrics();

    tokio::fs::create_dir_all(&settings.data_dir)
        .await
        .with_context(|| format!("creating {}", settings.data_dir.display()))?;

    let log = Arc::new(
        TelemetryLog::open(&settings.log_file)
            .await
            .context("opening telemetry log")?,
    );
    info!("Telemetry log: {}", log.path().display());
    let configs = Arc::new(
        ConfigStore::open(&settings.settings_file, settings.config_load_policy)
            .await
            .context("opening settings store")?,
    );
    let cache = Arc::new(ReportCache::new(
        &settings.last_report_file,
        settings.report_cache,
    ));
    info!("Report cache policy: {:?}", cache.policy());

    let pipeline = build_pipeline(&settings, log.clone(), configs.clone(), cache.clone())?;
    let state = AppState {
        pipeline: Arc::new(pipeline),
        log,
        configs,
        cache,
    };

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&settings.http_addr)
        .await
        .with_context(|| format!("binding {}", settings.http_addr))?;

    info!("HTTP server listening on {}", settings.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

fn build_pipeline(
    settings: &Settings,
    log: Arc<TelemetryLog>,
    configs: Arc<ConfigStore>,
    cache: Arc<ReportCache>,
) -> anyhow::Result<IngestionPipeline> {
    let textgen = &settings.textgen;
    let backend: Arc<dyn TextGenerator> = match &textgen.api_key {
        Some(api_key) => Arc::new(ChatCompletionsBackend::new(
            textgen.url.clone(),
            api_key.clone(),
            textgen.model.clone(),
            textgen.timeout,
        )?),
        None => {
            warn!("No TEXTGEN_API_KEY/OPENAI_API_KEY set, using the offline template generator");
            Arc::new(TemplateBackend)
        }
    };

    let mut reports = ReportGenerator::new(backend, textgen.timeout);
    if let Some(marker) = &settings.report_marker {
        reports = reports.with_marker(marker.clone());
    }

    let notifications = match &settings.notify_url {
        Some(url) => NotificationSink::new(
            Arc::new(WebhookNotifier::new(
                url.clone(),
                settings.notify_chat_id.clone(),
                settings.notify_timeout,
            )?),
            settings.notify_timeout,
        ),
        None => {
            warn!("No NOTIFY_URL set, alerts will only be logged");
            NotificationSink::disabled()
        }
    };

    let exports = match &settings.export_url {
        Some(url) => ExportSink::new(
            Arc::new(SheetExporter::new(url.clone(), settings.export_timeout)?),
            settings.export_timeout,
        ),
        None => ExportSink::disabled(),
    };

    Ok(IngestionPipeline::new(log, configs, reports, cache)
        .with_notifications(notifications)
        .with_exports(exports)
        .with_history(settings.report_history))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
