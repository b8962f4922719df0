use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{info, warn};

use crate::error::{DatasetError, PredictionError};
use crate::ml::{FeatureVector, MinMaxScaler, PredictionContext, ScalingStatistics, FEATURE_NAMES, TARGET_NAME};
use super::dataset::TrainingSample;

pub struct FittedScalers {
    pub input: ScalingStatistics,
    pub output: ScalingStatistics,
}

/// Fits both scalers over every sample using the serving feature builder.
pub fn fit_scalers(samples: &[TrainingSample]) -> Result<FittedScalers, PredictionError> {
    let features: Vec<Vec<f64>> = samples
        .iter()
        .map(|sample| FeatureVector::from_observation(&sample.observation).as_slice().to_vec())
        .collect();
    let targets: Vec<Vec<f64>> = samples
        .iter()
        .map(|sample| vec![sample.peak_offset_seconds])
        .collect();

    let input = ScalingStatistics::fit(&FEATURE_NAMES, &features)?;
    let output = ScalingStatistics::fit(&[TARGET_NAME], &targets)?;
    info!(
        samples = samples.len(),
        offset_min = output.data_min[0],
        offset_max = output.data_max[0],
        "Fitted scaling statistics"
    );
    Ok(FittedScalers { input, output })
}

/// Writes the scaled design matrix consumed by an external training run.
pub fn export_scaled_matrix(
    path: &str,
    samples: &[TrainingSample],
    scalers: &FittedScalers,
) -> Result<usize, DatasetError> {
    let write_error = |message: String| DatasetError::Write {
        path: path.to_string(),
        message,
    };
    let input = MinMaxScaler::from_statistics(scalers.input.clone());
    let output = MinMaxScaler::from_statistics(scalers.output.clone());

    let mut writer = csv::Writer::from_path(path)?;
    let scaled_target = format!("{}_scaled", TARGET_NAME);
    let mut header: Vec<&str> = FEATURE_NAMES.to_vec();
    header.push(&scaled_target);
    writer.write_record(&header)?;

    for sample in samples {
        let features = FeatureVector::from_observation(&sample.observation);
        let mut row = input
            .transform(features.as_slice())
            .map_err(|e| write_error(e.to_string()))?;
        row.extend(
            output
                .transform(&[sample.peak_offset_seconds])
                .map_err(|e| write_error(e.to_string()))?,
        );
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    writer.flush().map_err(|e| write_error(e.to_string()))?;
    Ok(samples.len())
}

/// Deterministic shuffle then split; returns `(train, holdout)`.
pub fn split_holdout(
    samples: &[TrainingSample],
    test_fraction: f64,
    seed: u64,
) -> (Vec<TrainingSample>, Vec<TrainingSample>) {
    let mut shuffled = samples.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let holdout_len = ((shuffled.len() as f64) * test_fraction).ceil() as usize;
    let holdout_len = holdout_len.min(shuffled.len());
    let holdout = shuffled.split_off(shuffled.len() - holdout_len);
    (shuffled, holdout)
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub samples: usize,
    pub failures: usize,
    pub mae_seconds: f64,
    pub rmse_seconds: f64,
    pub error_std_dev_seconds: f64,
}

/// Runs the serving pipeline over `samples` and compares against the recorded
/// peak offsets.
pub fn evaluate(context: &PredictionContext, samples: &[TrainingSample]) -> EvaluationReport {
    let mut errors = Vec::with_capacity(samples.len());
    let mut failures = 0;
    for sample in samples {
        match context.predict(&sample.observation) {
            Ok(result) => errors.push(result.predicted_offset_seconds - sample.peak_offset_seconds),
            Err(e) => {
                warn!("Prediction failed during evaluation: {}", e);
                failures += 1;
            }
        }
    }

    if errors.is_empty() {
        return EvaluationReport {
            samples: 0,
            failures,
            mae_seconds: f64::NAN,
            rmse_seconds: f64::NAN,
            error_std_dev_seconds: f64::NAN,
        };
    }

    let absolute: Vec<f64> = errors.iter().map(|e| e.abs()).collect();
    let squared: Vec<f64> = errors.iter().map(|e| e * e).collect();
    let error_std_dev_seconds = if errors.len() > 1 {
        Statistics::std_dev(&errors)
    } else {
        0.0
    };

    EvaluationReport {
        samples: errors.len(),
        failures,
        mae_seconds: Statistics::mean(&absolute),
        rmse_seconds: Statistics::mean(&squared).sqrt(),
        error_std_dev_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::predictor::tests::{context_with, FixedRegressor};
    use crate::ml::{ClockTime, RawObservation};
    use approx::assert_abs_diff_eq;

    fn sample(start: (u32, u32, u32), end: (u32, u32, u32), counts: f64, offset: f64) -> TrainingSample {
        TrainingSample {
            observation: RawObservation {
                start: ClockTime::new(start.0, start.1, start.2),
                end: ClockTime::new(end.0, end.1, end.2),
                total_counts: counts,
                x_pos_asec: counts / 10.0,
                y_pos_asec: -counts / 10.0,
            },
            peak_offset_seconds: offset,
        }
    }

    fn corpus() -> Vec<TrainingSample> {
        vec![
            sample((1, 0, 0), (1, 10, 0), 100.0, 60.0),
            sample((5, 30, 0), (6, 0, 0), 500.0, 300.0),
            sample((23, 55, 0), (0, 5, 0), 900.0, 120.0),
            sample((12, 0, 0), (12, 1, 40), 300.0, 30.0),
            sample((18, 15, 0), (19, 15, 0), 700.0, 1200.0),
        ]
    }

    #[test]
    fn scalers_cover_feature_builder_output() {
        let scalers = fit_scalers(&corpus()).unwrap();
        assert_eq!(scalers.input.feature_names, FEATURE_NAMES.to_vec());
        // Durations: 600, 1800, 600 (across midnight), 100, 3600.
        assert_eq!(scalers.input.data_min[0], 100.0);
        assert_eq!(scalers.input.data_max[0], 3600.0);
        assert_eq!(scalers.input.data_min[1], 100.0);
        assert_eq!(scalers.input.data_max[1], 900.0);
        assert_eq!(scalers.output.data_min, vec![30.0]);
        assert_eq!(scalers.output.data_max, vec![1200.0]);
    }

    #[test]
    fn fitting_nothing_fails() {
        assert!(fit_scalers(&[]).is_err());
    }

    #[test]
    fn exported_matrix_is_scaled_in_feature_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.csv");
        let path = path.to_str().unwrap();
        let samples = corpus();
        let scalers = fit_scalers(&samples).unwrap();

        assert_eq!(export_scaled_matrix(path, &samples, &scalers).unwrap(), 5);

        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), FEATURE_NAMES.len() + 1);
        assert_eq!(&headers[0], "duration_seconds");
        assert_eq!(&headers[12], "peak_offset_seconds_scaled");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        let first: Vec<f64> = rows[0].iter().map(|v| v.parse().unwrap()).collect();
        assert_abs_diff_eq!(first[0], (600.0 - 100.0) / 3500.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first[12], (60.0 - 30.0) / 1170.0, epsilon = 1e-12);
    }

    #[test]
    fn holdout_split_is_seeded() {
        let samples = corpus();
        let (train_a, test_a) = split_holdout(&samples, 0.2, 42);
        let (train_b, test_b) = split_holdout(&samples, 0.2, 42);
        assert_eq!(test_a.len(), 1);
        assert_eq!(train_a.len(), 4);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a, train_b);
    }

    #[test]
    fn evaluation_reports_errors_in_seconds() {
        // Fixed output inverts to 120 s with the shared test statistics.
        let context = context_with(FixedRegressor::new(120.0 / 1024.0));
        let report = evaluate(&context, &corpus());
        assert_eq!(report.samples, 5);
        assert_eq!(report.failures, 0);
        // |120-60| + |120-300| + 0 + |120-30| + |120-1200| = 1410
        assert_abs_diff_eq!(report.mae_seconds, 282.0, epsilon = 1e-9);
        assert!(report.rmse_seconds >= report.mae_seconds);
    }
}
