use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Service not ready: {0}")]
    Unavailable(String),

    #[error("Invalid observation: {0}")]
    Validation(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid artifact {path}: {message}")]
    Invalid {
        path: String,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Dataset is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Dataset is empty: {0}")]
    Empty(String),

    #[error("Failed to write {path}: {message}")]
    Write {
        path: String,
        message: String,
    },
}
