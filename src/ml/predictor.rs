use nalgebra::DMatrix;
use tracing::debug;

use crate::config::ArtifactsConfig;
use crate::error::{ArtifactError, PredictionError};
use super::features::{FeatureVector, RawObservation, FEATURE_COUNT, FEATURE_NAMES, TARGET_NAME};
use super::format::{format_prediction, PredictionResult};
use super::models::{LSTMModel, SequenceRegressor};
use super::scaling::{MinMaxScaler, ScalingStatistics};

/// Everything a prediction needs, loaded once and shared read-only.
pub struct PredictionContext {
    input_scaler: MinMaxScaler,
    output_scaler: MinMaxScaler,
    regressor: Box<dyn SequenceRegressor>,
}

impl PredictionContext {
    pub fn new(
        input_scaler: MinMaxScaler,
        output_scaler: MinMaxScaler,
        regressor: Box<dyn SequenceRegressor>,
    ) -> Self {
        Self {
            input_scaler,
            output_scaler,
            regressor,
        }
    }

    pub fn load(config: &ArtifactsConfig) -> Result<Self, ArtifactError> {
        let input_statistics = ScalingStatistics::load(&config.scaler_x_path, &FEATURE_NAMES)?;
        let output_statistics = ScalingStatistics::load(&config.scaler_y_path, &[TARGET_NAME])?;
        let model = LSTMModel::load_from_file(&config.model_path)?;

        if model.input_shape() != (1, FEATURE_COUNT) {
            return Err(ArtifactError::Invalid {
                path: config.model_path.clone(),
                message: format!(
                    "model input shape {:?} does not match (1, {})",
                    model.input_shape(),
                    FEATURE_COUNT
                ),
            });
        }

        Ok(Self::new(
            MinMaxScaler::from_statistics(input_statistics),
            MinMaxScaler::from_statistics(output_statistics),
            Box::new(model),
        ))
    }

    pub fn model_version(&self) -> &str {
        self.regressor.version()
    }

    /// Predicted offset in seconds before clamping.
    fn predict_offset(&self, observation: &RawObservation) -> Result<f64, PredictionError> {
        let features = FeatureVector::from_observation(observation);
        debug!(features = ?features.as_slice(), "built feature vector");

        let scaled = self.input_scaler.transform(features.as_slice())?;
        let sequence = to_sequence(&scaled)?;
        let scaled_offset = self.regressor.predict(&sequence)?;
        debug!(scaled_offset, "regressor output");

        self.output_scaler.inverse_scalar(scaled_offset)
    }

    pub fn predict(&self, observation: &RawObservation) -> Result<PredictionResult, PredictionError> {
        self.predict_with_raw_offset(observation).map(|(result, _)| result)
    }

    /// Like [`predict`](Self::predict), also returning the offset before it was
    /// floored at zero.
    pub fn predict_with_raw_offset(
        &self,
        observation: &RawObservation,
    ) -> Result<(PredictionResult, f64), PredictionError> {
        let raw_offset = self.predict_offset(observation)?;
        let result = format_prediction(&observation.start, raw_offset)?;
        Ok((result, raw_offset))
    }
}

/// One timestep holding every normalized feature.
fn to_sequence(scaled: &[f64]) -> Result<DMatrix<f64>, PredictionError> {
    if scaled.len() != FEATURE_COUNT {
        return Err(PredictionError::Inference(format!(
            "expected {} scaled features, got {}",
            FEATURE_COUNT,
            scaled.len()
        )));
    }
    Ok(DMatrix::from_row_slice(1, FEATURE_COUNT, scaled))
}
