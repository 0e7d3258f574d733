//! Types de base du cache : identifiants, entrées, budgets et statistiques.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Identifiant d'une ressource (piste audio décodée, illustration, …).
///
/// Pour un blob audio, c'est l'identifiant (UUID textuel) de l'enregistrement
/// durable correspondant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Entrée du cache.
///
/// Une entrée n'est jamais modifiée sur place : un `put` sur une clé existante
/// crée une nouvelle entrée. Seul `last_accessed` évolue, à chaque lecture.
#[derive(Debug)]
pub struct CacheEntry<P> {
    pub key: ResourceId,
    pub payload: Arc<P>,
    /// Coût réel du payload en mémoire, fourni par l'appelant
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
    /// Ordre d'insertion, départage final des candidats à l'éviction
    pub(crate) seq: u64,
}

impl<P> CacheEntry<P> {
    /// Clé de tri LRU : dernier accès, puis date d'insertion, puis ordre d'insertion.
    pub(crate) fn lru_rank(&self) -> (DateTime<Utc>, DateTime<Utc>, u64) {
        (self.last_accessed, self.inserted_at, self.seq)
    }
}

/// Budgets du cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheLimits {
    /// Somme maximale des `size_bytes`
    pub max_bytes: u64,
    /// Nombre maximal d'entrées
    pub max_entries: usize,
    /// Fraction de chaque budget à libérer lors d'une éviction (0.0 ≤ f < 1.0).
    ///
    /// Avec 0.2, une éviction descend à 80 % du budget, ce qui évite de
    /// repasser par l'éviction à chaque insertion proche de la limite.
    pub free_target: f64,
}

impl CacheLimits {
    pub fn new(max_bytes: u64, max_entries: usize, free_target: f64) -> Self {
        Self {
            max_bytes,
            max_entries,
            free_target: free_target.clamp(0.0, 0.95),
        }
    }

    /// Volume visé après une éviction.
    pub fn target_bytes(&self) -> u64 {
        (self.max_bytes as f64 * (1.0 - self.free_target)).floor() as u64
    }

    /// Nombre d'entrées visé après une éviction.
    pub fn target_entries(&self) -> usize {
        (self.max_entries as f64 * (1.0 - self.free_target)).floor() as usize
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024, 256, 0.2)
    }
}

/// Instantané des compteurs du cache.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Taux de succès des lectures, 0.0 tant qu'aucune lecture n'a eu lieu.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
