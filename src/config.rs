//! Configuration System
//!
//! Layered configuration for the generator: built-in defaults, an optional TOML file,
//! then `ACTIVITYGEN__*` environment overrides. The generation section supplies the
//! request-level defaults used when a request leaves a policy unset.

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::provider::ProviderConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityGenConfig {
    /// Model provider used by the default structured generator
    #[serde(default)]
    pub provider: Option<ProviderConfig>,

    #[serde(default)]
    pub generation: GenerationDefaults,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Request-level defaults applied when a request omits the corresponding policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default)]
    pub evaluator_enabled: bool,

    #[serde(default = "default_max_eval_loops")]
    pub max_eval_loops: u32,

    #[serde(default = "default_true")]
    pub postprocessing_enabled: bool,

    /// Sampling temperature for generation calls; provider default when unset
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Cap on how many retrieved resources join the citable set; caller documents are never dropped
    #[serde(default)]
    pub max_citation_resources: Option<usize>,
}

fn default_max_eval_loops() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            evaluator_enabled: false,
            max_eval_loops: default_max_eval_loops(),
            postprocessing_enabled: default_true(),
            temperature: None,
            max_citation_resources: None,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Provider(String),
    Generation(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Generation(msg) => write!(f, "Generation: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl GenerationDefaults {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    temperature
                ));
            }
        }
        if self.max_citation_resources == Some(0) {
            return Err("max_citation_resources must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

impl ActivityGenConfig {
    /// Validate the entire configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(provider) = &self.provider {
            if let Err(e) = provider.validate() {
                errors.push(ValidationError::Provider(e));
            }
        }

        if let Err(e) = self.generation.validate() {
            errors.push(ValidationError::Generation(e));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(ValidationError::Logging(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads [`ActivityGenConfig`] from layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then `path` if it exists, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<ActivityGenConfig, ApiError> {
        let mut builder = builder_with_defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        let config = builder.add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load a single required TOML file without environment overrides.
    pub fn load_from_file(path: &Path) -> Result<ActivityGenConfig, ApiError> {
        let config = builder_with_defaults()?
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load and validate, folding validation failures into one error.
    pub fn load_validated(path: Option<&Path>) -> Result<ActivityGenConfig, ApiError> {
        let config = Self::load(path)?;
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }
}

fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ApiError> {
    Ok(Config::builder()
        .set_default("generation.evaluator_enabled", false)?
        .set_default("generation.max_eval_loops", 1)?
        .set_default("generation.postprocessing_enabled", true)?)
}

fn env_source() -> Environment {
    Environment::with_prefix("ACTIVITYGEN")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
