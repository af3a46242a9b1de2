use crate::config_store::ConfigStore;
use crate::errors::Error;
use crate::log_store::TelemetryLog;
use crate::model::{
    ChartData, Reading, ReportResponse, SeriesStats, StatsResponse, TelemetryResponse,
    ThresholdConfig,
};
use crate::pipeline::IngestionPipeline;
use crate::report_cache::{ReportCache, NO_REPORT};
use crate::validate::parse_settings;
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;
const UPSTREAM_DETAILS: &str = "text generation service unavailable";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub log: Arc<TelemetryLog>,
    pub configs: Arc<ConfigStore>,
    pub cache: Arc<ReportCache>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceQuery {
    device_id: Option<String>,
    /// Legacy spelling used by older dashboard forms.
    device: Option<String>,
    limit: Option<String>,
}

impl DeviceQuery {
    fn device(&self) -> Option<&str> {
        self.device_id
            .as_deref()
            .or(self.device.as_deref())
            .filter(|d| !d.is_empty())
    }

    fn limit(&self) -> Result<usize, AppError> {
        match self.limit.as_deref().map(str::trim) {
            None | Some("") => Ok(DEFAULT_LIMIT),
            Some(raw) => raw
                .parse::<usize>()
                .map(|limit| limit.min(MAX_LIMIT))
                .map_err(|_| AppError(Error::MissingFields(vec!["limit".to_string()]))),
        }
    }

    fn require_device(&self) -> Result<&str, AppError> {
        self.device()
            .ok_or_else(|| AppError(Error::MissingFields(vec!["device_id".to_string()])))
    }
}

/// `Query<DeviceQuery>` that rejects with the JSON error body.
pub struct DeviceParams(DeviceQuery);

#[async_trait]
impl<S> FromRequestParts<S> for DeviceParams
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<DeviceQuery>::from_request_parts(parts, state).await {
            Ok(Query(query)) => Ok(Self(query)),
            Err(rejection) => {
                debug!("Rejected query string: {}", rejection.body_text());
                Err(AppError(Error::MissingFields(vec!["query".to_string()])))
            }
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/report", post(submit_report))
        .route("/settings", get(get_settings).post(save_settings))
        .route("/status", get(get_status))
        .route("/chart", get(get_chart))
        .route("/stats", get(get_stats))
        .route("/last_report", get(get_last_report))
        .route("/api/v1/telemetry", get(get_telemetry))
        .with_state(state)
}

// Bodies are parsed by hand so that malformed JSON gets the same 400 as a
// body with missing fields.
fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

async fn submit_report(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReportResponse>, AppError> {
    let outcome = state.pipeline.process(&json_body(&body)).await?;
    debug!(
        device_id = %outcome.reading.device_id,
        alert = %outcome.decision.kind,
        "Report served"
    );
    Ok(Json(ReportResponse {
        report: outcome.report.body,
    }))
}

async fn save_settings(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ThresholdConfig>, AppError> {
    let config = parse_settings(&json_body(&body))?;
    state.configs.set(&config).await?;
    Ok(Json(config))
}

async fn get_settings(
    State(state): State<AppState>,
    DeviceParams(params): DeviceParams,
) -> Result<Json<ThresholdConfig>, AppError> {
    let device_id = params.require_device()?;
    Ok(Json(state.configs.get(device_id).await?))
}

async fn get_status(
    State(state): State<AppState>,
    DeviceParams(params): DeviceParams,
) -> Result<Json<Reading>, AppError> {
    let latest = match params.device() {
        Some(device_id) => state.log.latest_for(device_id).await?,
        None => state.log.latest().await?,
    };
    let reading = latest.ok_or_else(|| Error::NotFound("No data for device".to_string()))?;
    Ok(Json(reading))
}

async fn get_telemetry(
    State(state): State<AppState>,
    DeviceParams(params): DeviceParams,
) -> Result<Json<TelemetryResponse>, AppError> {
    let limit = params.limit()?;
    let data = state.log.recent(params.device(), limit).await?;
    Ok(Json(TelemetryResponse {
        total: data.len(),
        data,
        limit,
    }))
}

async fn get_chart(
    State(state): State<AppState>,
    DeviceParams(params): DeviceParams,
) -> Result<Json<ChartData>, AppError> {
    let readings = state.log.recent(params.device(), params.limit()?).await?;
    Ok(Json(ChartData {
        labels: readings
            .iter()
            .map(|r| r.timestamp.format("%H:%M:%S").to_string())
            .collect(),
        temperatures: readings.iter().map(|r| r.temperature).collect(),
        humidities: readings.iter().map(|r| r.humidity).collect(),
    }))
}

async fn get_stats(
    State(state): State<AppState>,
    DeviceParams(params): DeviceParams,
) -> Result<Json<StatsResponse>, AppError> {
    let readings = state.log.recent(params.device(), params.limit()?).await?;
    let no_data = || Error::NotFound("No data for device".to_string());
    let latest = readings.last().ok_or_else(no_data)?;

    Ok(Json(StatsResponse {
        device_id: params.device().map(str::to_string),
        count: readings.len(),
        temperature: SeriesStats::from_values(readings.iter().map(|r| r.temperature))
            .ok_or_else(no_data)?,
        humidity: SeriesStats::from_values(readings.iter().map(|r| r.humidity))
            .ok_or_else(no_data)?,
        latest_status: latest.status.clone(),
        latest_timestamp: latest.timestamp,
    }))
}

async fn get_last_report(
    State(state): State<AppState>,
    DeviceParams(params): DeviceParams,
) -> Result<Json<ReportResponse>, AppError> {
    let report = state
        .cache
        .load(params.device())
        .await?
        .unwrap_or_else(|| NO_REPORT.to_string());
    Ok(Json(ReportResponse { report }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self.0 {
            Error::MissingFields(fields) => (
                StatusCode::BAD_REQUEST,
                "Missing fields".to_string(),
                Some(fields.join(", ")),
            ),
            Error::NotFound(what) => (StatusCode::NOT_FOUND, what.clone(), None),
            // Provider errors can carry URLs; the full text only goes to the log.
            Error::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Report generation failed".to_string(),
                Some(UPSTREAM_DETAILS.to_string()),
            ),
            Error::Validation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid report".to_string(),
                Some(msg.clone()),
            ),
            Error::StoreCorruption { .. } | Error::Json(_) | Error::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server error".to_string(),
                None,
            ),
        };

        if status.is_server_error() {
            error!(kind = self.0.kind(), "API error: {}", self.0);
        } else {
            debug!(kind = self.0.kind(), "API client error: {}", self.0);
        }

        (status, Json(ErrorBody { error, details })).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}
