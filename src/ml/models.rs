use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ArtifactError, PredictionError};

/// A fitted model that maps a `(timesteps × features)` sequence to one scalar.
///
/// Implementations must be pure: the same input always yields the same output,
/// and `predict` takes `&self` so a single instance can serve concurrent
/// requests without locking.
pub trait SequenceRegressor: Send + Sync {
    /// `(timesteps, features)` accepted by [`SequenceRegressor::predict`].
    fn input_shape(&self) -> (usize, usize);

    /// Rows are timesteps, columns are features.
    fn predict(&self, sequence: &DMatrix<f64>) -> Result<f64, PredictionError>;

    fn version(&self) -> &str {
        "unversioned"
    }
}

/// On-disk weight layout. Kernels are stored `[input][4 * units]` with gates in
/// input, forget, cell, output order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmArtifact {
    pub model_version: String,
    pub input_size: usize,
    #[serde(default = "default_timesteps")]
    pub timesteps: usize,
    pub lstm_layers: Vec<LstmLayerWeights>,
    pub dense: DenseWeights,
}

fn default_timesteps() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub units: usize,
    pub kernel: Vec<Vec<f64>>,
    pub recurrent_kernel: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseWeights {
    pub kernel: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone)]
struct LstmLayer {
    units: usize,
    // Stored transposed: (4 * units) x input, so gates = W * x + U * h + b.
    input_weights: DMatrix<f64>,
    recurrent_weights: DMatrix<f64>,
    bias: DVector<f64>,
}

/// Stacked LSTM followed by a single-output dense head. Dropout layers used
/// during fitting are identities here and carry no weights.
#[derive(Debug, Clone)]
pub struct LSTMModel {
    pub model_version: String,
    pub input_size: usize,
    pub sequence_length: usize,
    layers: Vec<LstmLayer>,
    output_weights: DVector<f64>,
    output_bias: f64,
}

impl LSTMModel {
    pub fn load_from_file(path: &str) -> Result<Self, ArtifactError> {
        info!("Loading LSTM model from {}", path);

        let content = fs::read_to_string(Path::new(path)).map_err(|source| ArtifactError::Io {
            path: path.to_string(),
            source,
        })?;
        let artifact: LstmArtifact =
            serde_json::from_str(&content).map_err(|source| ArtifactError::Parse {
                path: path.to_string(),
                source,
            })?;

        Self::from_artifact(artifact).map_err(|message| ArtifactError::Invalid {
            path: path.to_string(),
            message,
        })
    }

    pub fn from_artifact(artifact: LstmArtifact) -> Result<Self, String> {
        if artifact.lstm_layers.is_empty() {
            return Err("model has no LSTM layers".to_string());
        }
        if artifact.input_size == 0 || artifact.timesteps == 0 {
            return Err("input_size and timesteps must be positive".to_string());
        }

        let mut layers = Vec::with_capacity(artifact.lstm_layers.len());
        let mut input_width = artifact.input_size;
        for (index, weights) in artifact.lstm_layers.iter().enumerate() {
            let units = weights.units;
            let gates = 4 * units;
            let input_weights = matrix_from_rows(&weights.kernel, input_width, gates)
                .map_err(|e| format!("layer {} kernel: {}", index, e))?
                .transpose();
            let recurrent_weights = matrix_from_rows(&weights.recurrent_kernel, units, gates)
                .map_err(|e| format!("layer {} recurrent_kernel: {}", index, e))?
                .transpose();
            if weights.bias.len() != gates {
                return Err(format!(
                    "layer {} bias: expected {} values, found {}",
                    index,
                    gates,
                    weights.bias.len()
                ));
            }

            layers.push(LstmLayer {
                units,
                input_weights,
                recurrent_weights,
                bias: DVector::from_column_slice(&weights.bias),
            });
            input_width = units;
        }

        let head = matrix_from_rows(&artifact.dense.kernel, input_width, 1)
            .map_err(|e| format!("dense kernel: {}", e))?;
        if artifact.dense.bias.len() != 1 {
            return Err(format!(
                "dense bias: expected 1 value, found {}",
                artifact.dense.bias.len()
            ));
        }
        if !all_finite(&artifact) {
            return Err("weights contain non-finite values".to_string());
        }

        Ok(Self {
            model_version: artifact.model_version,
            input_size: artifact.input_size,
            sequence_length: artifact.timesteps,
            layers,
            output_weights: head.column(0).into_owned(),
            output_bias: artifact.dense.bias[0],
        })
    }

    fn forward(&self, sequence: &DMatrix<f64>) -> f64 {
        // Each row of `steps` is one timestep fed to the next layer.
        let mut steps: Vec<DVector<f64>> = sequence
            .row_iter()
            .map(|row| row.transpose().into_owned())
            .collect();

        for layer in &self.layers {
            let mut hidden = DVector::zeros(layer.units);
            let mut cell = DVector::zeros(layer.units);
            let mut outputs = Vec::with_capacity(steps.len());

            for input in &steps {
                let gates = &layer.input_weights * input + &layer.recurrent_weights * &hidden + &layer.bias;
                let u = layer.units;
                let input_gate = gates.rows(0, u).map(sigmoid);
                let forget_gate = gates.rows(u, u).map(sigmoid);
                let candidate = gates.rows(2 * u, u).map(f64::tanh);
                let output_gate = gates.rows(3 * u, u).map(sigmoid);

                cell = forget_gate.component_mul(&cell) + input_gate.component_mul(&candidate);
                hidden = output_gate.component_mul(&cell.map(f64::tanh));
                outputs.push(hidden.clone());
            }
            steps = outputs;
        }

        let last = steps.last().cloned().unwrap_or_else(|| DVector::zeros(self.output_weights.len()));
        self.output_weights.dot(&last) + self.output_bias
    }
}

impl SequenceRegressor for LSTMModel {
    fn input_shape(&self) -> (usize, usize) {
        (self.sequence_length, self.input_size)
    }

    fn predict(&self, sequence: &DMatrix<f64>) -> Result<f64, PredictionError> {
        debug!("Running LSTM inference");

        let shape = (sequence.nrows(), sequence.ncols());
        if shape != self.input_shape() {
            return Err(PredictionError::Inference(format!(
                "model expects input shape {:?}, got {:?}",
                self.input_shape(),
                shape
            )));
        }

        let output = self.forward(sequence);
        if !output.is_finite() {
            return Err(PredictionError::Inference(
                "model produced a non-finite output".to_string(),
            ));
        }
        Ok(output)
    }

    fn version(&self) -> &str {
        &self.model_version
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn matrix_from_rows(rows: &[Vec<f64>], nrows: usize, ncols: usize) -> Result<DMatrix<f64>, String> {
    if rows.len() != nrows {
        return Err(format!("expected {} rows, found {}", nrows, rows.len()));
    }
    if let Some(row) = rows.iter().find(|row| row.len() != ncols) {
        return Err(format!("expected {} columns, found {}", ncols, row.len()));
    }
    Ok(DMatrix::from_fn(nrows, ncols, |r, c| rows[r][c]))
}

fn all_finite(artifact: &LstmArtifact) -> bool {
    let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
    artifact.lstm_layers.iter().all(|layer| {
        layer.kernel.iter().all(|row| finite(row))
            && layer.recurrent_kernel.iter().all(|row| finite(row))
            && finite(&layer.bias)
    }) && artifact.dense.kernel.iter().all(|row| finite(row))
        && finite(&artifact.dense.bias)
}
