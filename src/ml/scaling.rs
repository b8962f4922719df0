//! Min/max feature scaling with persisted statistics.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fs;
use std::path::Path;

use crate::error::{ArtifactError, PredictionError};

/// Fitted statistics as persisted on disk. Produced once by `fit-scalers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingStatistics {
    pub feature_names: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
    #[serde(default = "default_feature_range")]
    pub feature_range: (f64, f64),
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl ScalingStatistics {
    /// Column-wise min/max over `rows`. Every row must have one value per name.
    pub fn fit(feature_names: &[&str], rows: &[Vec<f64>]) -> Result<Self, PredictionError> {
        if rows.is_empty() {
            return Err(PredictionError::Validation(
                "cannot fit scaling statistics on an empty corpus".to_string(),
            ));
        }
        let width = feature_names.len();
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(PredictionError::Validation(format!(
                "row has {} values, expected {}",
                row.len(),
                width
            )));
        }

        let mut data_min = Vec::with_capacity(width);
        let mut data_max = Vec::with_capacity(width);
        for column in 0..width {
            let values: Vec<f64> = rows.iter().map(|row| row[column]).collect();
            data_min.push(Statistics::min(&values));
            data_max.push(Statistics::max(&values));
        }

        Ok(Self {
            feature_names: feature_names.iter().map(|name| name.to_string()).collect(),
            data_min,
            data_max,
            feature_range: default_feature_range(),
        })
    }

    pub fn load(path: &str, expected_names: &[&str]) -> Result<Self, ArtifactError> {
        let content = fs::read_to_string(Path::new(path)).map_err(|source| ArtifactError::Io {
            path: path.to_string(),
            source,
        })?;
        let statistics: ScalingStatistics =
            serde_json::from_str(&content).map_err(|source| ArtifactError::Parse {
                path: path.to_string(),
                source,
            })?;
        statistics
            .check(expected_names)
            .map_err(|message| ArtifactError::Invalid {
                path: path.to_string(),
                message,
            })?;
        Ok(statistics)
    }

    pub fn save(&self, path: &str) -> Result<(), ArtifactError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ArtifactError::Parse {
            path: path.to_string(),
            source,
        })?;
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: path.to_string(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| ArtifactError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn check(&self, expected_names: &[&str]) -> Result<(), String> {
        if self.feature_names.len() != expected_names.len()
            || self.feature_names.iter().zip(expected_names).any(|(a, b)| a != b)
        {
            return Err(format!(
                "feature names {:?} do not match expected {:?}",
                self.feature_names, expected_names
            ));
        }
        let width = expected_names.len();
        if self.data_min.len() != width || self.data_max.len() != width {
            return Err(format!(
                "expected {} min/max values, found {}/{}",
                width,
                self.data_min.len(),
                self.data_max.len()
            ));
        }
        if self.data_min.iter().chain(&self.data_max).any(|v| !v.is_finite()) {
            return Err("statistics contain non-finite values".to_string());
        }
        let (low, high) = self.feature_range;
        if !(low < high) {
            return Err(format!("invalid feature range ({}, {})", low, high));
        }
        Ok(())
    }
}

/// Affine scaler derived from [`ScalingStatistics`]:
/// `scaled = value * scale + offset`.
#[derive(Debug, Clone, Default)]
pub struct MinMaxScaler {
    fitted: Option<Fitted>,
}

#[derive(Debug, Clone)]
struct Fitted {
    scale: Vec<f64>,
    offset: Vec<f64>,
}

impl MinMaxScaler {
    /// An unfitted scaler; every transform fails as not ready.
    pub fn unfitted() -> Self {
        Self::default()
    }

    pub fn from_statistics(statistics: ScalingStatistics) -> Self {
        let (low, high) = statistics.feature_range;
        let scale: Vec<f64> = statistics
            .data_min
            .iter()
            .zip(&statistics.data_max)
            .map(|(min, max)| {
                let range = max - min;
                // A constant column maps onto the lower bound.
                let range = if range == 0.0 { 1.0 } else { range };
                (high - low) / range
            })
            .collect();
        let offset = statistics
            .data_min
            .iter()
            .zip(&scale)
            .map(|(min, scale)| low - min * scale)
            .collect();

        Self {
            fitted: Some(Fitted {
                scale,
                offset,
            }),
        }
    }

    /// Values outside the fitted corpus range map outside the feature range.
    pub fn transform(&self, values: &[f64]) -> Result<Vec<f64>, PredictionError> {
        let fitted = self.fitted()?;
        fitted.check_width(values.len())?;
        Ok(values
            .iter()
            .zip(fitted.scale.iter().zip(&fitted.offset))
            .map(|(value, (scale, offset))| value * scale + offset)
            .collect())
    }

    pub fn inverse_transform(&self, values: &[f64]) -> Result<Vec<f64>, PredictionError> {
        let fitted = self.fitted()?;
        fitted.check_width(values.len())?;
        Ok(values
            .iter()
            .zip(fitted.scale.iter().zip(&fitted.offset))
            .map(|(value, (scale, offset))| (value - offset) / scale)
            .collect())
    }

    pub fn inverse_scalar(&self, value: f64) -> Result<f64, PredictionError> {
        let restored = self.inverse_transform(&[value])?;
        Ok(restored[0])
    }

    fn fitted(&self) -> Result<&Fitted, PredictionError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| PredictionError::Unavailable("scaling statistics are not fitted".to_string()))
    }
}

impl Fitted {
    fn check_width(&self, width: usize) -> Result<(), PredictionError> {
        if width != self.scale.len() {
            return Err(PredictionError::Inference(format!(
                "scaler expects {} features, got {}",
                self.scale.len(),
                width
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_column() -> ScalingStatistics {
        ScalingStatistics::fit(
            &["a", "b"],
            &[vec![0.0, -10.0], vec![50.0, 10.0], vec![100.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn fit_records_column_extremes() {
        let stats = two_column();
        assert_eq!(stats.data_min, vec![0.0, -10.0]);
        assert_eq!(stats.data_max, vec![100.0, 10.0]);
        assert_eq!(stats.feature_names, vec!["a", "b"]);
    }

    #[test]
    fn corpus_extremes_map_to_feature_range() {
        let scaler = MinMaxScaler::from_statistics(two_column());
        assert_eq!(scaler.transform(&[0.0, -10.0]).unwrap(), vec![0.0, 0.0]);
        assert_eq!(scaler.transform(&[100.0, 10.0]).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn out_of_range_values_are_not_clamped() {
        let scaler = MinMaxScaler::from_statistics(two_column());
        let scaled = scaler.transform(&[200.0, -30.0]).unwrap();
        assert_relative_eq!(scaled[0], 2.0);
        assert_relative_eq!(scaled[1], -1.0);
    }

    #[test]
    fn inverse_round_trips() {
        let stats = ScalingStatistics::fit(&["y"], &[vec![3.5], vec![5400.0], vec![17.0]]).unwrap();
        let scaler = MinMaxScaler::from_statistics(stats);
        for value in [3.5, 120.0, 999.25, 5400.0, 7000.0, -12.0] {
            let scaled = scaler.transform(&[value]).unwrap();
            let restored = scaler.inverse_scalar(scaled[0]).unwrap();
            assert_relative_eq!(restored, value, max_relative = 1e-12, epsilon = 1e-9);
        }
    }

    #[test]
    fn constant_column_maps_to_lower_bound() {
        let stats = ScalingStatistics::fit(&["c"], &[vec![7.0], vec![7.0]]).unwrap();
        let scaler = MinMaxScaler::from_statistics(stats);
        assert_eq!(scaler.transform(&[7.0]).unwrap(), vec![0.0]);
        assert_eq!(scaler.inverse_scalar(0.0).unwrap(), 7.0);
    }

    #[test]
    fn unfitted_scaler_is_not_ready() {
        let scaler = MinMaxScaler::unfitted();
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(PredictionError::Unavailable(_))
        ));
        assert!(matches!(
            scaler.inverse_scalar(1.0),
            Err(PredictionError::Unavailable(_))
        ));
    }

    #[test]
    fn width_mismatch_is_an_inference_error() {
        let scaler = MinMaxScaler::from_statistics(two_column());
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(PredictionError::Inference(_))
        ));
    }

    #[test]
    fn empty_corpus_cannot_be_fitted() {
        assert!(ScalingStatistics::fit(&["a"], &[]).is_err());
        assert!(ScalingStatistics::fit(&["a", "b"], &[vec![1.0]]).is_err());
    }

    #[test]
    fn save_and_load_checks_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scaler.json");
        let path = path.to_str().unwrap();
        two_column().save(path).unwrap();

        let loaded = ScalingStatistics::load(path, &["a", "b"]).unwrap();
        assert_eq!(loaded, two_column());

        let err = ScalingStatistics::load(path, &["b", "a"]).unwrap_err();
        assert!(matches!(err, ArtifactError::Invalid { .. }));
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            ScalingStatistics::load(missing.to_str().unwrap(), &["a"]),
            Err(ArtifactError::Io { .. })
        ));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "{not json").unwrap();
        assert!(matches!(
            ScalingStatistics::load(garbage.to_str().unwrap(), &["a"]),
            Err(ArtifactError::Parse { .. })
        ));
    }
}
