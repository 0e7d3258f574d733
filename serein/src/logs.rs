//! Initialisation du logging de l'hôte

use anyhow::{anyhow, Result};
use sereinconfig::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installe le subscriber `tracing` global
///
/// Le filtre vient de `RUST_LOG` s'il est défini, sinon de
/// `host.logger.min_level`. La sortie console suit
/// `host.logger.enable_console`.
///
/// Retourne une erreur (sans paniquer) si un subscriber est déjà installé.
///
/// # Exemple
///
/// ```rust,no_run
/// use serein::logs::init_logging;
/// use sereinconfig::Config;
///
/// let config = Config::load_config("")?;
/// init_logging(&config)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logging(config: &Config) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = config.get_log_min_level()?.to_lowercase();
            EnvFilter::try_new(&level)
                .map_err(|e| anyhow!("invalid host.logger.min_level '{}': {}", level, e))?
        }
    };

    let console = if config.get_log_enable_console()? {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console)
        .try_init()
        .map_err(|e| anyhow!("logging already initialized: {}", e))
}
