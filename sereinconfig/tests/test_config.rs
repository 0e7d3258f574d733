use sereinconfig::Config;
use std::path::Path;

fn load_in(dir: &Path) -> Config {
    Config::load_config(dir.to_str().unwrap()).unwrap()
}

#[test]
fn test_load_writes_merged_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = load_in(temp_dir.path());

    assert!(temp_dir.path().join("config.yaml").exists());
    assert_eq!(config.get_cache_max_bytes().unwrap(), 64 * 1024 * 1024);
    assert_eq!(config.get_cache_max_entries().unwrap(), 256);
    assert!((config.get_cache_free_target().unwrap() - 0.2).abs() < f64::EPSILON);
    assert_eq!(config.get_sync_max_attempts().unwrap(), 6);
    assert_eq!(config.get_log_min_level().unwrap(), "INFO");
}

#[test]
fn test_user_file_overrides_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        temp_dir.path().join("config.yaml"),
        "engine:\n  Cache:\n    MAX_BYTES: 1024\n  quota:\n    audio_max_bytes: 2048\n",
    )
    .unwrap();

    let config = load_in(temp_dir.path());

    // Les clés sont normalisées en minuscules
    assert_eq!(config.get_cache_max_bytes().unwrap(), 1024);
    assert_eq!(config.get_audio_max_bytes().unwrap(), 2048);
    // Les autres valeurs restent celles par défaut
    assert_eq!(config.get_cache_max_entries().unwrap(), 256);
}

#[test]
fn test_setters_are_persisted() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let config = load_in(temp_dir.path());
        config.set_sync_max_attempts(9).unwrap();
        config.set_log_enable_console(false).unwrap();
    }

    let reloaded = load_in(temp_dir.path());
    assert_eq!(reloaded.get_sync_max_attempts().unwrap(), 9);
    assert!(!reloaded.get_log_enable_console().unwrap());
}

#[test]
fn test_managed_dir_is_relative_to_config_dir() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = load_in(temp_dir.path());

    let store_dir = config.get_store_dir().unwrap();
    assert_eq!(Path::new(&store_dir), temp_dir.path().join("store"));
    assert!(Path::new(&store_dir).is_dir());
}

#[test]
fn test_from_yaml_str_stays_in_memory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::from_yaml_str(
        temp_dir.path().to_str().unwrap(),
        "engine:\n  sync:\n    backoff_base_ms: 10\n",
    )
    .unwrap();

    assert_eq!(config.get_sync_backoff_base_ms().unwrap(), 10);
    config.set_tick_interval_ms(5).unwrap();
    assert_eq!(config.get_tick_interval_ms().unwrap(), 5);
    assert!(!temp_dir.path().join("config.yaml").exists());
}

#[test]
fn test_missing_path_is_an_error() {
    let config = Config::from_yaml_str(".", "").unwrap();
    assert!(config.get_value(&["engine", "nope"]).is_err());
}

#[test]
fn test_config_dir_is_created_and_must_be_a_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let nested = temp_dir.path().join("a").join("b");
    let dir = Config::config_dir(nested.to_str().unwrap()).unwrap();
    assert!(Path::new(&dir).is_dir());
    assert!(!nested.join(".write_test").exists());

    let file = temp_dir.path().join("plain.txt");
    std::fs::write(&file, "x").unwrap();
    assert!(Config::config_dir(file.to_str().unwrap()).is_err());
}
