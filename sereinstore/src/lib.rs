//! # sereinstore - Store durable des enregistrements Serein
//!
//! Cette crate persiste dans SQLite tous les enregistrements de l'utilisateur
//! (séances, humeurs, notes de journal, audio téléchargé) avec leur état de
//! synchronisation.
//!
//! ## Vue d'ensemble
//!
//! - Versions monotones : chaque écriture locale persiste `stockée + 1` et
//!   une écriture basée sur une version périmée est refusée (`StaleWrite`)
//! - Écritures tout-ou-rien ; un stockage plein donne `QuotaExceeded`
//! - Index secondaires par propriétaire, statut, date de modification et nature
//! - Opérations dédiées au moteur de synchronisation, conditionnées à la
//!   version observée, qui ne réinitialisent jamais le statut à `pending`
//!
//! ## Architecture
//!
//! ```text
//! sereinstore
//!     ├── record.rs   - Record<T>, RecordKind, SyncStatus, SyncMeta
//!     ├── payload.rs  - Payloads typés et leur encodage
//!     ├── db.rs       - Couche SQLite synchrone
//!     └── store.rs    - DurableStore (API async)
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use sereinstore::{DurableStore, MoodEntry, Record, StoreOptions};
//! use sereinutils::{Clock, SystemClock};
//!
//! # async fn demo() -> sereinstore::Result<()> {
//! let clock = SystemClock::shared();
//! let store = DurableStore::open("serein.db", StoreOptions::default(), clock.clone())?;
//!
//! let mood = store
//!     .put(Record::new("alice", MoodEntry::new(4, 3, 2), clock.now()))
//!     .await?;
//! assert_eq!(mood.version, 1);
//!
//! let calmer = store.put(mood.revise(MoodEntry::new(5, 3, 1))).await?;
//! assert_eq!(calmer.version, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Schéma de base de données
//!
//! ```sql
//! CREATE TABLE records (
//!     id TEXT PRIMARY KEY,            -- UUID
//!     owner_id TEXT NOT NULL,
//!     kind TEXT NOT NULL,             -- session | mood | journal | audio-blob
//!     payload BLOB NOT NULL,
//!     size_bytes INTEGER NOT NULL,
//!     version INTEGER NOT NULL,
//!     sync_status TEXT NOT NULL,      -- pending | synced | failed
//!     created_at_us INTEGER NOT NULL, -- microsecondes depuis l'epoch
//!     last_modified_us INTEGER NOT NULL,
//!     remote_version INTEGER,         -- dernière version acquittée
//!     attempts INTEGER NOT NULL,      -- échecs temporaires consécutifs
//!     next_attempt_at_us INTEGER,
//!     last_error TEXT
//! );
//! ```

mod db;
pub mod error;
pub mod payload;
pub mod record;
mod store;

pub use db::{ApplyOutcome, EvictionCandidate};
pub use error::{Result, StoreError};
pub use payload::{AudioBlob, JournalEntry, MoodEntry, RecordPayload, SessionLog};
pub use record::{RawRecord, Record, RecordKind, SyncMeta, SyncStatus};
pub use store::{DurableStore, StoreOptions};
