//! # sereincache - Cache mémoire des ressources décodées pour Serein
//!
//! Cette crate fournit un cache mémoire générique, borné en octets et en
//! nombre d'entrées, pour les ressources coûteuses à produire : pistes audio
//! décodées, illustrations, contenus de séances téléchargés.
//!
//! ## Vue d'ensemble
//!
//! - Éviction LRU synchrone à l'admission, jusqu'à libérer une fraction
//!   configurable des budgets (`free_target`)
//! - Payloads partagés par `Arc` : évincer n'invalide jamais une copie déjà
//!   remise à un appelant
//! - Récupération sur défaut via un [`ContentFetcher`], avec regroupement des
//!   défauts concurrents sur une même clé
//! - Préchargement sur indication de la couche de présentation
//!
//! ## Architecture
//!
//! ```text
//! sereincache
//!     ├── entry.rs     - Identifiants, entrées, budgets, statistiques
//!     ├── cache.rs     - ResourceCache (LRU + récupération)
//!     ├── fetch.rs     - Port ContentFetcher
//!     └── prefetch.rs  - File des indications de préchargement
//! ```
//!
//! ## Utilisation
//!
//! ```rust
//! use sereincache::{CacheLimits, ResourceCache, ResourceId};
//! use sereinutils::SystemClock;
//!
//! let cache = ResourceCache::<Vec<u8>>::new(
//!     CacheLimits::new(1024, 16, 0.2),
//!     SystemClock::shared(),
//! );
//!
//! cache.put(ResourceId::from("piste-1"), vec![0u8; 512], 512).unwrap();
//! assert!(cache.get(&ResourceId::from("piste-1")).is_some());
//! assert_eq!(cache.total_bytes(), 512);
//! ```
//!
//! Le cache n'est pas persistant : les données utilisateur vivent dans
//! `sereinstore`, le cache n'en garde que des copies décodées jetables.

pub mod cache;
pub mod entry;
pub mod error;
pub mod fetch;
mod prefetch;

pub use cache::{ResourceCache, Resolved};
pub use entry::{CacheEntry, CacheLimits, CacheStats, ResourceId};
pub use error::{CacheError, Result};
pub use fetch::{ContentFetcher, FetchError, FetchPriority, Fetched};
pub use prefetch::PrefetchReport;
