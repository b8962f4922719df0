use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::error::PredictionError;
use crate::ml::{ClockTime, MLEngine, ModelState, PredictionResult, RawObservation, REQUIRED_FIELDS};

#[derive(Clone)]
pub struct PredictionServer {
    ml_engine: Arc<MLEngine>,
    metrics_handle: Option<PrometheusHandle>,
    plots_dir: PathBuf,
}

/// Wire shape of a successful `/api/ml_predict` call. Existing clients read
/// `prediction` and `prediction_formatted_offset`.
#[derive(Debug, Serialize)]
struct PredictionResponse {
    prediction: f64,
    prediction_formatted_offset: String,
    predicted_peak_time: String,
    input_data: Value,
    timestamp: String,
    request_id: String,
}

impl PredictionResponse {
    fn new(result: PredictionResult, input_data: Value, request_id: String) -> Self {
        Self {
            prediction: result.predicted_offset_seconds,
            prediction_formatted_offset: result.predicted_offset_formatted,
            predicted_peak_time: result.predicted_peak_time,
            input_data,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            request_id,
        }
    }
}

#[derive(Debug)]
struct ValidationFailure {
    message: String,
    received: Vec<String>,
}

impl PredictionServer {
    pub fn new(ml_engine: Arc<MLEngine>, plots_dir: impl Into<PathBuf>) -> Self {
        Self {
            ml_engine,
            metrics_handle: None,
            plots_dir: plots_dir.into(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/ml_predict", post(ml_predict))
            .route("/api/health", get(health))
            .route("/metrics", get(render_metrics))
            .nest_service("/plots", ServeDir::new(&self.plots_dir))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start<F>(&self, host: &str, port: u16, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind((host, port)).await?;
        info!("Prediction server listening on http://{}:{}", host, port);
        if !self.ml_engine.is_ready() {
            warn!("Serving without loaded artifacts; predictions will report unavailable");
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// API Handlers
async fn ml_predict(
    State(server): State<PredictionServer>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    // Readiness is reported ahead of request validation.
    if let Err(e) = server.ml_engine.context() {
        return error_response(&e);
    }

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!("Invalid JSON body: {}", rejection.body_text()),
                    "required": REQUIRED_FIELDS,
                })),
            )
                .into_response();
        }
    };

    let observation = match parse_observation(&payload) {
        Ok(observation) => observation,
        Err(failure) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": failure.message,
                    "required": REQUIRED_FIELDS,
                    "received": failure.received,
                })),
            )
                .into_response();
        }
    };

    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("prediction", request_id = %request_id);
    match span.in_scope(|| server.ml_engine.predict(&observation)) {
        Ok(result) => {
            info!(
                request_id = %request_id,
                offset_seconds = result.predicted_offset_seconds,
                peak = %result.predicted_peak_time,
                "Prediction served"
            );
            Json(PredictionResponse::new(result, payload, request_id)).into_response()
        }
        Err(e) => {
            warn!(request_id = %request_id, "Error during ML prediction: {}", e);
            error_response(&e)
        }
    }
}

async fn health(State(server): State<PredictionServer>) -> Response {
    match server.ml_engine.state() {
        ModelState::Ready(context) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "model_version": context.model_version() })),
        )
            .into_response(),
        ModelState::Unavailable { reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "reason": reason })),
        )
            .into_response(),
    }
}

async fn render_metrics(State(server): State<PredictionServer>) -> Response {
    match &server.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn error_response(error: &PredictionError) -> Response {
    let (status, message) = match error {
        PredictionError::Unavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{}. Server is not ready for predictions.", error),
        ),
        PredictionError::Validation(_) => (StatusCode::BAD_REQUEST, error.to_string()),
        PredictionError::Inference(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to perform ML prediction: {}", error),
        ),
    };
    (status, Json(json!({ "error": message }))).into_response()
}

fn parse_observation(payload: &Value) -> Result<RawObservation, ValidationFailure> {
    let Some(fields) = payload.as_object() else {
        return Err(ValidationFailure {
            message: "Request body must be a JSON object.".to_string(),
            received: Vec::new(),
        });
    };
    let received: Vec<String> = fields.keys().cloned().collect();

    if REQUIRED_FIELDS.iter().any(|field| !fields.contains_key(*field)) {
        return Err(ValidationFailure {
            message: "Missing required input features.".to_string(),
            received,
        });
    }

    let parse = || -> Result<RawObservation, String> {
        Ok(RawObservation {
            start: ClockTime::new(
                clock_field(fields, "start_hour", 23)?,
                clock_field(fields, "start_minute", 59)?,
                clock_field(fields, "start_second", 59)?,
            ),
            end: ClockTime::new(
                clock_field(fields, "end_hour", 23)?,
                clock_field(fields, "end_minute", 59)?,
                clock_field(fields, "end_second", 59)?,
            ),
            total_counts: measurement_field(fields, "total_counts")?,
            x_pos_asec: measurement_field(fields, "x_pos_asec")?,
            y_pos_asec: measurement_field(fields, "y_pos_asec")?,
        })
    };

    parse().map_err(|message| ValidationFailure { message, received })
}

fn clock_field(fields: &Map<String, Value>, name: &str, max: u32) -> Result<u32, String> {
    let value = &fields[name];
    let whole = value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as u64)
    });
    match whole {
        Some(v) if v <= u64::from(max) => Ok(v as u32),
        _ => Err(format!("Field '{}' must be an integer in [0, {}], got {}", name, max, value)),
    }
}

fn measurement_field(fields: &Map<String, Value>, name: &str) -> Result<f64, String> {
    let value = &fields[name];
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Field '{}' must be a number, got {}", name, value))
}
