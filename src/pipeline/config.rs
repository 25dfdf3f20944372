//! Pipeline configuration.
//!
//! Covers the remote service endpoint and credentials, input/output roots,
//! the admission limit, timeouts and artifact naming.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::generation::{
    DEFAULT_ARK_BASE_URL, DEFAULT_ARK_MODEL, DEFAULT_IMAGE_SIZE,
    DEFAULT_MAX_CONCURRENT_GENERATIONS, REQUEST_TIMEOUT_SECS,
};
use crate::storage::{NamingScheme, DOWNLOAD_TIMEOUT_SECS};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // Remote service
    /// API key for the image service.
    pub api_key: Option<String>,
    /// Base URL of the image service.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Resolution class sent with every request.
    pub image_size: String,
    /// Whether generated images carry the service watermark.
    pub watermark: bool,

    // Filesystem
    /// Root directory holding reference images.
    pub input_dir: PathBuf,
    /// Root directory for batch output directories.
    pub output_dir: PathBuf,
    /// Artifact naming scheme.
    pub naming: NamingScheme,

    // Execution
    /// Maximum generation calls in flight at once.
    pub max_concurrent_generations: usize,
    /// Timeout for one generation call.
    pub request_timeout: Duration,
    /// Timeout for one artifact download.
    pub download_timeout: Duration,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_ARK_BASE_URL.to_string(),
            model: DEFAULT_ARK_MODEL.to_string(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            watermark: true,

            input_dir: PathBuf::from("./input"),
            output_dir: PathBuf::from("./output"),
            naming: NamingScheme::default(),

            max_concurrent_generations: DEFAULT_MAX_CONCURRENT_GENERATIONS,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        }
    }
}

impl ForgeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ARK_API_KEY`: API key for the image service
    /// - `ARK_BASE_URL`: Service base URL (default: Ark cn-beijing endpoint)
    /// - `ARK_MODEL`: Model identifier (default: doubao-seedream-4-5-251128)
    /// - `IMAGE_FORGE_SIZE`: Resolution class (default: 2K)
    /// - `IMAGE_FORGE_WATERMARK`: Watermark generated images (default: true)
    /// - `IMAGE_FORGE_INPUT_DIR`: Reference image root (default: ./input)
    /// - `IMAGE_FORGE_OUTPUT_DIR`: Output root (default: ./output)
    /// - `IMAGE_FORGE_NAMING`: `sequenced` or `timestamp` (default: sequenced)
    /// - `IMAGE_FORGE_MAX_CONCURRENT`: Admission limit (default: 5)
    /// - `IMAGE_FORGE_REQUEST_TIMEOUT_SECS`: Generation timeout (default: 120)
    /// - `IMAGE_FORGE_DOWNLOAD_TIMEOUT_SECS`: Download timeout (default: 60)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Remote service
        config.api_key = lookup("ARK_API_KEY").filter(|key| !key.trim().is_empty());

        if let Some(val) = lookup("ARK_BASE_URL") {
            config.base_url = val;
        }

        if let Some(val) = lookup("ARK_MODEL") {
            config.model = val;
        }

        if let Some(val) = lookup("IMAGE_FORGE_SIZE") {
            config.image_size = val;
        }

        if let Some(val) = lookup("IMAGE_FORGE_WATERMARK") {
            config.watermark = parse_env_bool(&val, "IMAGE_FORGE_WATERMARK")?;
        }

        // Filesystem
        if let Some(val) = lookup("IMAGE_FORGE_INPUT_DIR") {
            config.input_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("IMAGE_FORGE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("IMAGE_FORGE_NAMING") {
            config.naming = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "IMAGE_FORGE_NAMING".to_string(),
                message,
            })?;
        }

        // Execution
        if let Some(val) = lookup("IMAGE_FORGE_MAX_CONCURRENT") {
            config.max_concurrent_generations =
                parse_env_value(&val, "IMAGE_FORGE_MAX_CONCURRENT")?;
        }

        if let Some(val) = lookup("IMAGE_FORGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "IMAGE_FORGE_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("IMAGE_FORGE_DOWNLOAD_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "IMAGE_FORGE_DOWNLOAD_TIMEOUT_SECS")?;
            config.download_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "base_url cannot be empty".to_string(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if self.image_size.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "image_size cannot be empty".to_string(),
            ));
        }

        if self.max_concurrent_generations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_generations must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.download_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "download_timeout must be greater than 0".to_string(),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the API key or the error naming the variable that should hold it.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("ARK_API_KEY".to_string()))
    }

    /// Builder method to set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set the input directory.
    pub fn with_input_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_dir = path.into();
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to set the naming scheme.
    pub fn with_naming(mut self, naming: NamingScheme) -> Self {
        self.naming = naming;
        self
    }

    /// Builder method to set the admission limit.
    pub fn with_max_concurrent_generations(mut self, max: usize) -> Self {
        self.max_concurrent_generations = max;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ForgeConfig::default();
        assert_eq!(config.max_concurrent_generations, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.download_timeout, Duration::from_secs(60));
        assert_eq!(config.model, "doubao-seedream-4-5-251128");
        assert_eq!(config.image_size, "2K");
        assert!(config.watermark);
        assert_eq!(config.naming, NamingScheme::Sequenced);
        assert!(config.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = ForgeConfig::from_lookup(lookup_from(&[])).expect("config");
        assert_eq!(config.base_url, DEFAULT_ARK_BASE_URL);
        assert_eq!(config.output_dir, PathBuf::from("./output"));
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ForgeConfig::from_lookup(lookup_from(&[
            ("ARK_API_KEY", "secret"),
            ("ARK_MODEL", "seedream-lite"),
            ("IMAGE_FORGE_MAX_CONCURRENT", " 8 "),
            ("IMAGE_FORGE_NAMING", "timestamp"),
            ("IMAGE_FORGE_WATERMARK", "off"),
            ("IMAGE_FORGE_DOWNLOAD_TIMEOUT_SECS", "30"),
            ("IMAGE_FORGE_INPUT_DIR", "/data/refs"),
        ]))
        .expect("config");

        assert_eq!(config.require_api_key().expect("key"), "secret");
        assert_eq!(config.model, "seedream-lite");
        assert_eq!(config.max_concurrent_generations, 8);
        assert_eq!(config.naming, NamingScheme::Timestamp);
        assert!(!config.watermark);
        assert_eq!(config.download_timeout, Duration::from_secs(30));
        assert_eq!(config.input_dir, PathBuf::from("/data/refs"));
    }

    #[test]
    fn test_from_lookup_blank_api_key_is_missing() {
        let config =
            ForgeConfig::from_lookup(lookup_from(&[("ARK_API_KEY", "  ")])).expect("config");
        assert!(matches!(
            config.require_api_key(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let err = ForgeConfig::from_lookup(lookup_from(&[("IMAGE_FORGE_MAX_CONCURRENT", "many")]))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = ForgeConfig::from_lookup(lookup_from(&[("IMAGE_FORGE_NAMING", "random")]))
            .expect_err("should fail");
        assert!(err.to_string().contains("IMAGE_FORGE_NAMING"));

        let err = ForgeConfig::from_lookup(lookup_from(&[("IMAGE_FORGE_WATERMARK", "maybe")]))
            .expect_err("should fail");
        assert!(err.to_string().contains("expected boolean"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ForgeConfig::new().with_max_concurrent_generations(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));

        let err = ForgeConfig::from_lookup(lookup_from(&[("IMAGE_FORGE_MAX_CONCURRENT", "0")]))
            .expect_err("should fail");
        assert!(err.to_string().contains("max_concurrent_generations"));
    }

    #[test]
    fn test_config_builder() {
        let config = ForgeConfig::new()
            .with_api_key("k")
            .with_model("m")
            .with_input_dir("in")
            .with_output_dir("out")
            .with_naming(NamingScheme::Timestamp)
            .with_max_concurrent_generations(2);

        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.model, "m");
        assert_eq!(config.input_dir, PathBuf::from("in"));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.naming, NamingScheme::Timestamp);
        assert_eq!(config.max_concurrent_generations, 2);
    }
}
