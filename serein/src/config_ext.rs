//! Extension de `sereinconfig::Config` vers les réglages typés des composants
//!
//! Le trait [`EngineConfigExt`] traduit les clés `engine.*` de la
//! configuration en structures prêtes à passer aux constructeurs.

use anyhow::{Context, Result};
use sereincache::CacheLimits;
use sereinconfig::Config;
use sereinstore::StoreOptions;
use sereinsync::{QuotaPolicy, RetryPolicy, SyncSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Trait d'extension pour lire les réglages du moteur
///
/// # Exemple
///
/// ```rust
/// use serein::EngineConfigExt;
/// use sereinconfig::Config;
///
/// let config = Config::from_yaml_str("/tmp", "engine:\n  cache:\n    max_bytes: 1024\n")?;
/// assert_eq!(config.cache_limits()?.max_bytes, 1024);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub trait EngineConfigExt {
    /// Chemin du fichier SQLite (le répertoire est créé si besoin)
    fn store_path(&self) -> Result<PathBuf>;

    fn store_options(&self) -> Result<StoreOptions>;

    fn cache_limits(&self) -> Result<CacheLimits>;

    fn quota_policy(&self) -> Result<QuotaPolicy>;

    fn sync_settings(&self) -> Result<SyncSettings>;

    /// Période du tick de maintenance
    fn tick_interval(&self) -> Result<Duration>;
}

impl EngineConfigExt for Config {
    fn store_path(&self) -> Result<PathBuf> {
        let dir = self.get_store_dir().context("store directory")?;
        Ok(PathBuf::from(dir).join(self.get_store_file_name()?))
    }

    fn store_options(&self) -> Result<StoreOptions> {
        Ok(StoreOptions {
            max_bytes: self.get_store_max_bytes()?,
        })
    }

    fn cache_limits(&self) -> Result<CacheLimits> {
        Ok(CacheLimits::new(
            self.get_cache_max_bytes()?,
            self.get_cache_max_entries()?,
            self.get_cache_free_target()?,
        ))
    }

    fn quota_policy(&self) -> Result<QuotaPolicy> {
        Ok(QuotaPolicy {
            audio_max_bytes: self.get_audio_max_bytes()?,
        })
    }

    fn sync_settings(&self) -> Result<SyncSettings> {
        let max_attempts = u32::try_from(self.get_sync_max_attempts()?)
            .context("engine.sync.max_attempts out of range")?;

        Ok(SyncSettings {
            remote_timeout: Duration::from_millis(self.get_sync_remote_timeout_ms()?),
            retry: RetryPolicy {
                max_attempts: max_attempts.max(1),
                initial_delay: Duration::from_millis(self.get_sync_backoff_base_ms()?),
                max_delay: Duration::from_millis(self.get_sync_backoff_max_ms()?),
                multiplier: self.get_sync_backoff_multiplier()?,
                jitter: self.get_sync_jitter()?,
            },
        })
    }

    fn tick_interval(&self) -> Result<Duration> {
        let ms = self.get_tick_interval_ms()?;
        Ok(Duration::from_millis(ms.max(1)))
    }
}
