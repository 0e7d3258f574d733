//! # serein - Moteur local-first de l'application Serein
//!
//! Cette crate est la façade de l'hôte : elle construit et relie explicitement
//! les composants des crates `serein*` à partir d'une configuration.
//!
//! ## Vue d'ensemble
//!
//! - Les données utilisateur (séances, humeurs, journal, audio hors ligne) sont
//!   écrites d'abord dans le store local, puis synchronisées
//! - Un cache mémoire borné sert les ressources décodées
//! - Un tick de maintenance applique le quota audio, synchronise et précharge
//!
//! ## Architecture
//!
//! ```text
//! serein
//!     ├── engine.rs      - Engine : construction, données, synchronisation
//!     ├── config_ext.rs  - Config -> réglages typés des composants
//!     ├── stats.rs       - OwnerStats
//!     └── logs.rs        - init_logging
//!
//! sereinutils ← sereincache, sereinstore ← sereinsync ← serein
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use serein::{Engine, logs::init_logging};
//! use sereinconfig::Config;
//! use sereinstore::MoodEntry;
//! use sereinsync::MemoryRemote;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load_config("")?;
//! init_logging(&config)?;
//!
//! let engine = Engine::open(&config, Arc::new(MemoryRemote::new()), None)?;
//! engine.create("alice", MoodEntry::new(4, 3, 2)).await?;
//!
//! let cancel = CancellationToken::new();
//! let scheduler = engine.spawn_scheduler(cancel.clone());
//! println!("{}", engine.owner_stats("alice").await?);
//!
//! cancel.cancel();
//! scheduler.await?;
//! # Ok(())
//! # }
//! ```

pub mod config_ext;
pub mod engine;
pub mod logs;
pub mod stats;

pub use config_ext::EngineConfigExt;
pub use engine::{resource_key, Engine, ResourceStore, SharedFetcher};
pub use stats::OwnerStats;
