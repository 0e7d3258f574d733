//! Port de récupération de contenu, appelé sur défaut de cache.

use crate::entry::ResourceId;
use async_trait::async_trait;
use thiserror::Error;

/// Priorité d'une récupération.
///
/// `High` exige le contenu complet (l'appelant attend) ; `Normal` et `Low`
/// autorisent une disponibilité partielle ou progressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FetchPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl FetchPriority {
    /// Indique si un contenu partiel est acceptable pour cette priorité.
    pub fn allows_partial(self) -> bool {
        !matches!(self, FetchPriority::High)
    }
}

/// Contenu renvoyé par un [`ContentFetcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<P> {
    /// Contenu complet, admissible dans le cache
    Complete { payload: P, size_bytes: u64 },
    /// Début du contenu seulement ; jamais mis en cache
    Partial {
        payload: P,
        received_bytes: u64,
        expected_bytes: Option<u64>,
    },
}

/// Échec d'une récupération.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,
    #[error("transient error: {0}")]
    Transient(String),
}

/// Source de contenu alimentant le cache.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    type Payload: Send + Sync + 'static;

    async fn fetch(
        &self,
        id: &ResourceId,
        priority: FetchPriority,
    ) -> Result<Fetched<Self::Payload>, FetchError>;
}
