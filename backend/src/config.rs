use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SONOSCAN_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub image: ImageConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            workers: None,
            static_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/static")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    /// Refuse to start when the model cannot be loaded.
    pub required: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/ultrasound_classifier.onnx"),
            required: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub preprocessing: PreprocessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub resize_method: String,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            resize_method: "catmullrom".to_string(),
        }
    }
}

impl PreprocessingConfig {
    pub fn filter(&self) -> Result<FilterType, ConfigError> {
        match self.resize_method.to_ascii_lowercase().as_str() {
            "nearest" => Ok(FilterType::Nearest),
            "triangle" | "bilinear" => Ok(FilterType::Triangle),
            "catmullrom" | "bicubic" => Ok(FilterType::CatmullRom),
            "gaussian" => Ok(FilterType::Gaussian),
            "lanczos3" => Ok(FilterType::Lanczos3),
            other => Err(ConfigError::Invalid(format!(
                "unknown resize_method '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            allowed_extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
        }
    }
}

impl AppConfig {
    /// Loads the config file named by `SONOSCAN_CONFIG`, or the workspace default.
    ///
    /// An explicitly named file must exist. A missing default file yields the
    /// built-in defaults.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let source = match std::env::var(CONFIG_ENV) {
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => {
                let path = default_config_path();
                if path.is_file() {
                    Some(path)
                } else {
                    log::warn!(
                        "No config file at {}, using built-in defaults",
                        path.display()
                    );
                    None
                }
            }
        };

        let mut config = match &source {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, source))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => log::warn!("Ignoring invalid PORT value '{}'", port),
            }
        }
        if let Some(model_path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(model_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_bytes must be non-zero".into(),
            ));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "upload.allowed_extensions must not be empty".into(),
            ));
        }
        self.image.preprocessing.filter()?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        PathBuf::from(format!("{}/../config/sonoscan.yaml", manifest_dir))
    } else {
        PathBuf::from("/usr/src/app/config/sonoscan.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
server:
  host: 127.0.0.1
  port: 9000
  workers: 2
model:
  path: /models/scan.onnx
  required: true
image:
  preprocessing:
    resize_method: lanczos3
upload:
  max_bytes: 2048
  allowed_extensions: [png]
"#;

    #[test]
    fn parses_full_config() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.server.workers, Some(2));
        assert_eq!(config.model.path, PathBuf::from("/models/scan.onnx"));
        assert!(config.model.required);
        assert_eq!(
            config.image.preprocessing.filter().unwrap(),
            FilterType::Lanczos3
        );
        assert_eq!(config.upload.max_bytes, 2048);
        assert_eq!(config.upload.allowed_extensions, vec!["png".to_string()]);
        config.validate().unwrap();
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = AppConfig::from_yaml_str("server:\n  port: 8443\n").unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(!config.model.required);
        assert_eq!(
            config.image.preprocessing.filter().unwrap(),
            FilterType::CatmullRom
        );
        assert_eq!(config.upload.allowed_extensions.len(), 3);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [("PORT", "7000"), ("MODEL_PATH", "/tmp/other.onnx")]
            .into_iter()
            .collect();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.model.path, PathBuf::from("/tmp/other.onnx"));
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 8081);
    }

    #[test]
    fn rejects_unknown_resize_method() {
        let config = AppConfig::from_yaml_str(
            "image:\n  preprocessing:\n    resize_method: sharpest\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_extension_list() {
        let mut config = AppConfig::default();
        config.upload.allowed_extensions.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_from(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let err = AppConfig::from_yaml_str("server: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
