pub mod engine;
pub mod features;
pub mod format;
pub mod models;
pub mod predictor;
pub mod scaling;

pub use engine::{MLEngine, ModelState};
pub use features::{ClockTime, FeatureVector, RawObservation, FEATURE_NAMES, REQUIRED_FIELDS, TARGET_NAME};
pub use format::PredictionResult;
pub use predictor::PredictionContext;
pub use scaling::{MinMaxScaler, ScalingStatistics};
