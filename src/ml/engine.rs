use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::ArtifactsConfig;
use crate::error::PredictionError;
use super::features::RawObservation;
use super::format::PredictionResult;
use super::predictor::PredictionContext;

pub enum ModelState {
    Ready(PredictionContext),
    Unavailable { reason: String },
}

/// Process-wide owner of the fitted artifacts. Built once at start and shared
/// behind an `Arc`; never mutated afterwards.
pub struct MLEngine {
    state: ModelState,
}

impl MLEngine {
    /// Never fails: a load error leaves the engine in the unavailable state.
    pub fn from_config(config: &ArtifactsConfig) -> Self {
        match PredictionContext::load(config) {
            Ok(context) => {
                info!(
                    model_version = context.model_version(),
                    "ML Engine initialized successfully"
                );
                Self::ready(context)
            }
            Err(e) => {
                error!("Error loading ML components: {}", e);
                warn!("Predictions will fail until valid artifacts are deployed and the service restarted");
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn ready(context: PredictionContext) -> Self {
        Self {
            state: ModelState::Ready(context),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: ModelState::Unavailable {
                reason: reason.into(),
            },
        }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn context(&self) -> Result<&PredictionContext, PredictionError> {
        match &self.state {
            ModelState::Ready(context) => Ok(context),
            ModelState::Unavailable { reason } => Err(PredictionError::Unavailable(format!(
                "ML model or scalers not loaded: {}",
                reason
            ))),
        }
    }

    pub fn predict(&self, observation: &RawObservation) -> Result<PredictionResult, PredictionError> {
        let context = match self.context() {
            Ok(context) => context,
            Err(e) => {
                metrics::counter!("flare_peak_predictions_total", "outcome" => "unavailable").increment(1);
                return Err(e);
            }
        };

        let started = Instant::now();
        let outcome = context.predict_with_raw_offset(observation);
        metrics::histogram!("flare_peak_inference_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok((result, raw_offset)) => {
                if raw_offset < 0.0 {
                    metrics::counter!("flare_peak_negative_offsets_floored_total").increment(1);
                }
                metrics::counter!("flare_peak_predictions_total", "outcome" => "ok").increment(1);
                Ok(result)
            }
            Err(e) => {
                metrics::counter!("flare_peak_predictions_total", "outcome" => "error").increment(1);
                Err(e)
            }
        }
    }
}
