//! # sereinsync - Synchronisation et quota pour Serein
//!
//! Cette crate fait converger le store local (`sereinstore`) avec une
//! autorité distante, et garde la partition audio sous son budget.
//!
//! ## Vue d'ensemble
//!
//! - [`SyncReconciler`] : vide la file des enregistrements non synchronisés,
//!   résout les conflits (dernier écrivain gagnant sur `last_modified`),
//!   replanifie les échecs temporaires avec un backoff exponentiel et gigue
//! - [`QuotaEnforcer`] : évince les blobs audio déjà synchronisés, le moins
//!   récemment modifié d'abord, sans jamais toucher aux données non envoyées
//! - [`SyncScheduler`] : un tick de maintenance que l'hôte appelle (ou fait
//!   tourner sur un intervalle)
//! - [`RemoteSync`] : le port vers le serveur, et [`MemoryRemote`], une
//!   implémentation en mémoire avec injection de pannes
//!
//! ## Architecture
//!
//! ```text
//! sereinsync
//!     ├── remote.rs      - Port RemoteSync, réponses et erreurs distantes
//!     ├── memory.rs      - MemoryRemote
//!     ├── backoff.rs     - RetryPolicy + Backoff (gigue)
//!     ├── reconciler.rs  - SyncReconciler (push, conflits, pull)
//!     ├── quota.rs       - QuotaEnforcer
//!     └── scheduler.rs   - SyncScheduler
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use sereinstore::{DurableStore, MoodEntry, Record, StoreOptions};
//! use sereinsync::{MemoryRemote, SyncReconciler, SyncSettings};
//! use sereinutils::{Clock, SystemClock};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let clock = SystemClock::shared();
//! let store = Arc::new(DurableStore::open("serein.db", StoreOptions::default(), clock.clone())?);
//! let remote = Arc::new(MemoryRemote::new());
//!
//! store.put(Record::new("alice", MoodEntry::new(4, 3, 2), clock.now())).await?;
//!
//! let reconciler = SyncReconciler::new(store, remote, SyncSettings::default(), clock);
//! let report = reconciler.sync_pass(&CancellationToken::new()).await?;
//! println!("{} records synced", report.synced());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod error;
pub mod memory;
pub mod quota;
pub mod reconciler;
pub mod remote;
pub mod scheduler;

pub use backoff::{Backoff, RetryPolicy};
pub use error::{Result, SyncError};
pub use memory::MemoryRemote;
pub use quota::{QuotaEnforcer, QuotaOutcome, QuotaPolicy, QuotaReport};
pub use reconciler::{PullReport, RecordOutcome, SyncReconciler, SyncReport, SyncSettings};
pub use remote::{PullPage, PushOutcome, RemoteError, RemoteSync};
pub use scheduler::{SyncScheduler, TickReport};
