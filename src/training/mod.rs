//! Offline procedures that produce and check the artifacts served by `serve`.

pub mod dataset;
pub mod fit;

pub use dataset::Dataset;
pub use fit::{evaluate, export_scaled_matrix, fit_scalers, split_holdout};
