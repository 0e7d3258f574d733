//! # Serein Configuration Module
//!
//! This module provides configuration management for the Serein engine:
//! - Loading configuration from YAML files
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for every engine knob
//!
//! There is no global instance: the host loads one [`Config`] and hands it to
//! the components it constructs.
//!
//! ## Usage
//!
//! ```no_run
//! use sereinconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let budget = config.get_cache_max_bytes()?;
//! config.set_sync_max_attempts(8)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, bail, Context, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("serein.yaml");

const ENV_CONFIG_DIR: &str = "SEREIN_CONFIG";
const ENV_PREFIX: &str = "SEREIN_CONFIG__";
const DEFAULT_DIR_NAME: &str = ".serein";

// Default values for configuration
const DEFAULT_STORE_FILE_NAME: &str = "serein.db";
const DEFAULT_STORE_MAX_BYTES: u64 = 0;
const DEFAULT_CACHE_MAX_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 256;
const DEFAULT_CACHE_FREE_TARGET: f64 = 0.2;
const DEFAULT_AUDIO_MAX_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_ATTEMPTS: usize = 6;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.5;
const DEFAULT_TICK_INTERVAL_MS: u64 = 30_000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value as u64)))
        }
    };
}

/// Macro to generate getter/setter for f64 values with default
macro_rules! impl_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<f64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_f64().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for Serein
///
/// This structure manages the engine configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// A configuration built with [`Config::from_yaml_str`] has no backing file:
/// setters only update the in-memory tree.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: Option<String>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data().clone()),
        }
    }
}

impl Config {
    /// First existing candidate among the provided directory, `SEREIN_CONFIG`,
    /// `./.serein` and `~/.serein`
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }
        if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory taken from env");
            return PathBuf::from(from_env);
        }

        let in_home = home_dir().map(|home| home.join(DEFAULT_DIR_NAME));
        [Some(PathBuf::from(DEFAULT_DIR_NAME)), in_home]
            .into_iter()
            .flatten()
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR_NAME))
    }

    /// Creates the directory if needed and checks it is writable
    fn validate_config_dir(path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("creating config directory {}", path.display()))?;
        if !path.is_dir() {
            bail!("{} is not a directory", path.display());
        }

        let marker = path.join(".write_test");
        fs::write(&marker, b"serein")
            .with_context(|| format!("config directory {} is not writable", path.display()))?;
        fs::remove_file(&marker)?;
        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `SEREIN_CONFIG` environment variable
    /// 3. `.serein` in the current directory
    /// 4. `.serein` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(&dir_path)?;
        Ok(dir_path.to_string_lossy().into_owned())
    }

    /// Embedded defaults with `external` merged over them, keys lowercased
    fn over_defaults(external: Option<Value>) -> Result<Value> {
        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if let Some(external) = external {
            merge_yaml(&mut merged, &Self::lower_keys_value(external));
        }
        Ok(Self::lower_keys_value(merged))
    }

    /// Loads the configuration from the specified directory
    ///
    /// `config.yaml` (if present) is merged over the embedded defaults, then
    /// `SEREIN_CONFIG__*` environment overrides apply, and the result is
    /// written back so the file always lists every knob.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir)
            .join("config.yaml")
            .to_string_lossy()
            .into_owned();
        let external: Option<Value> = match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path, "Loaded config file");
                Some(serde_yaml::from_slice(&data).with_context(|| format!("parsing {}", path))?)
            }
            Err(_) => {
                info!(config_file = %path, "No config file, using embedded defaults");
                None
            }
        };

        let mut data = Self::over_defaults(external)?;
        Self::apply_env_overrides(&mut data);

        let config = Config {
            config_dir,
            path: Some(path),
            data: Mutex::new(data),
        };
        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML document merged over the defaults.
    ///
    /// Environment overrides are not applied and nothing is written to disk.
    /// Relative managed directories resolve against `config_dir`.
    pub fn from_yaml_str(config_dir: &str, yaml: &str) -> Result<Self> {
        let external: Option<Value> = if yaml.trim().is_empty() {
            None
        } else {
            Some(serde_yaml::from_str(yaml)?)
        };

        Ok(Config {
            config_dir: config_dir.to_string(),
            path: None,
            data: Mutex::new(Self::over_defaults(external)?),
        })
    }

    /// Directory holding `config.yaml`; relative managed paths resolve against it.
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["engine", "cache", "max_bytes"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    tracing::warn!(env_var = %key, "Ignoring environment override: {}", err);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration. Il est créé s'il n'existe pas ; la valeur par défaut est
    /// enregistrée si la clé est absente.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Répertoire de la base locale (créé si besoin)
    pub fn get_store_dir(&self) -> Result<String> {
        self.get_managed_dir(&["engine", "store", "directory"], "store")
    }

    /// Nom du fichier SQLite dans le répertoire de la base
    pub fn get_store_file_name(&self) -> Result<String> {
        match self.get_value(&["engine", "store", "file_name"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Ok(DEFAULT_STORE_FILE_NAME.to_string()),
        }
    }

    impl_u64_config!(
        get_store_max_bytes,
        set_store_max_bytes,
        &["engine", "store", "max_bytes"],
        DEFAULT_STORE_MAX_BYTES
    );

    impl_u64_config!(
        get_cache_max_bytes,
        set_cache_max_bytes,
        &["engine", "cache", "max_bytes"],
        DEFAULT_CACHE_MAX_BYTES
    );

    impl_usize_config!(
        get_cache_max_entries,
        set_cache_max_entries,
        &["engine", "cache", "max_entries"],
        DEFAULT_CACHE_MAX_ENTRIES
    );

    impl_f64_config!(
        get_cache_free_target,
        set_cache_free_target,
        &["engine", "cache", "free_target"],
        DEFAULT_CACHE_FREE_TARGET
    );

    impl_u64_config!(
        get_audio_max_bytes,
        set_audio_max_bytes,
        &["engine", "quota", "audio_max_bytes"],
        DEFAULT_AUDIO_MAX_BYTES
    );

    impl_u64_config!(
        get_sync_remote_timeout_ms,
        set_sync_remote_timeout_ms,
        &["engine", "sync", "remote_timeout_ms"],
        DEFAULT_REMOTE_TIMEOUT_MS
    );

    impl_usize_config!(
        get_sync_max_attempts,
        set_sync_max_attempts,
        &["engine", "sync", "max_attempts"],
        DEFAULT_MAX_ATTEMPTS
    );

    impl_u64_config!(
        get_sync_backoff_base_ms,
        set_sync_backoff_base_ms,
        &["engine", "sync", "backoff_base_ms"],
        DEFAULT_BACKOFF_BASE_MS
    );

    impl_u64_config!(
        get_sync_backoff_max_ms,
        set_sync_backoff_max_ms,
        &["engine", "sync", "backoff_max_ms"],
        DEFAULT_BACKOFF_MAX_MS
    );

    impl_f64_config!(
        get_sync_backoff_multiplier,
        set_sync_backoff_multiplier,
        &["engine", "sync", "backoff_multiplier"],
        DEFAULT_BACKOFF_MULTIPLIER
    );

    impl_f64_config!(
        get_sync_jitter,
        set_sync_jitter,
        &["engine", "sync", "jitter"],
        DEFAULT_JITTER
    );

    impl_u64_config!(
        get_tick_interval_ms,
        set_tick_interval_ms,
        &["engine", "sync", "tick_interval_ms"],
        DEFAULT_TICK_INTERVAL_MS
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from `external` are merged recursively into `default`
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
