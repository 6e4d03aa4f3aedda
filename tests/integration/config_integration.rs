//! Integration tests for Configuration System

use crate::integration::test_utils::FixedExplainer;
use activitygen::config::ConfigLoader;
use activitygen::error::ApiError;
use activitygen::generation::ActivityGenerator;
use activitygen::hydrate::HydrationSources;
use activitygen::plugin::PluginRegistry;
use tempfile::TempDir;

#[test]
fn test_generator_builds_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("activitygen.toml");

    std::fs::write(
        &config_file,
        r#"
[provider]
provider_type = "local"
model = "llama3"
endpoint = "http://localhost:11434/v1"

[generation]
evaluator_enabled = true
max_eval_loops = 2
max_citation_resources = 5
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.generation.max_citation_resources, Some(5));

    let generator = ActivityGenerator::from_config(
        &config,
        PluginRegistry::with_builtin(),
        HydrationSources::new(FixedExplainer::new("Photosynthesis")),
    );
    assert!(generator.is_ok());
    assert_eq!(generator.unwrap().registry().len(), 3);
}

#[test]
fn test_invalid_provider_section_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("activitygen.toml");

    std::fs::write(
        &config_file,
        r#"
[provider]
provider_type = "local"
model = "llama3"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_err());

    let result = ActivityGenerator::from_config(
        &config,
        PluginRegistry::with_builtin(),
        HydrationSources::new(FixedExplainer::new("Photosynthesis")),
    );
    assert!(matches!(result, Err(ApiError::ConfigError(_))));
}

#[test]
fn test_missing_required_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let result = ConfigLoader::load_from_file(&temp_dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ApiError::ConfigError(_))));
}
