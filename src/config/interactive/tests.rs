use super::load_existing_config as load_existing_config_impl;
use super::non_empty_model;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.ollama.embedding_model.is_empty());
    assert!(config.ollama.batch_size > 0);
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn unreadable_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "[ollama\nbroken")
        .expect("should write config");

    let config = load_existing_config_impl(temp_dir.path()).expect("fallback should succeed");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn model_name_validator() {
    assert!(non_empty_model(&"llama3.2".to_string()).is_ok());
    assert!(non_empty_model(&"   ".to_string()).is_err());
}
