use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "flare-peak.toml";
const ENV_PREFIX: &str = "FLARE_PEAK";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub artifacts: ArtifactsConfig,
    pub fitting: FittingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub plots_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            plots_dir: "public/plots".to_string(),
        }
    }
}

/// Locations of the fitted artifacts shared by `fit-scalers` and `serve`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub model_path: String,
    pub scaler_x_path: String,
    pub scaler_y_path: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            model_path: "artifacts/peak_offset_lstm.json".to_string(),
            scaler_x_path: "artifacts/scaler_x.json".to_string(),
            scaler_y_path: "artifacts/scaler_y.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FittingConfig {
    pub dataset_path: String,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for FittingConfig {
    fn default() -> Self {
        Self {
            dataset_path: "solar_flare_dataset.csv".to_string(),
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Layers the TOML file (if any) under `FLARE_PEAK__SECTION__KEY` environment
    /// overrides. The file is mandatory only when `required` is set.
    pub fn load(path: &str, required: bool) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from(Path::new(path)).required(required))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        let artifacts = &self.artifacts;
        for (key, value) in [
            ("artifacts.model_path", &artifacts.model_path),
            ("artifacts.scaler_x_path", &artifacts.scaler_x_path),
            ("artifacts.scaler_y_path", &artifacts.scaler_y_path),
        ] {
            if value.trim().is_empty() {
                bail!("{} must not be empty", key);
            }
        }
        let fraction = self.fitting.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            bail!("fitting.test_fraction must be in (0, 1), got {}", fraction);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.fitting.seed, 42);
    }

    #[test]
    fn missing_optional_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str().unwrap(), false).unwrap();
        assert_eq!(config.artifacts.scaler_x_path, "artifacts/scaler_x.json");
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(Config::load(path.to_str().unwrap(), true).is_err());
    }

    #[test]
    fn partial_file_keeps_defaults_for_other_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 9000\n\n[artifacts]\nmodel_path = \"m.json\"").unwrap();

        let config = Config::load(file.path().to_str().unwrap(), true).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.artifacts.model_path, "m.json");
        assert_eq!(config.artifacts.scaler_y_path, "artifacts/scaler_y.json");
    }

    #[test]
    fn rejects_bad_test_fraction() {
        let mut config = Config::default();
        config.fitting.test_fraction = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_artifact_path() {
        let mut config = Config::default();
        config.artifacts.scaler_y_path = " ".to_string();
        assert!(config.validate().is_err());
    }
}
