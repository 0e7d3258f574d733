//! Gestion des erreurs du cache de ressources

use crate::entry::ResourceId;
use thiserror::Error;

/// Type Result personnalisé pour sereincache
pub type Result<T> = std::result::Result<T, CacheError>;

/// Erreurs possibles lors de l'utilisation du cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// La source de contenu ne connaît pas la ressource
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// Échec temporaire (réseau, timeout) ; un nouvel essai peut réussir
    #[error("Transient failure while fetching {id}: {reason}")]
    Transient { id: ResourceId, reason: String },

    /// L'entrée dépasse à elle seule le budget du cache
    #[error("Entry {id} ({size} bytes) exceeds the cache budget of {budget} bytes")]
    TooLarge { id: ResourceId, size: u64, budget: u64 },

    /// Lecture sur défaut de cache sans source de contenu configurée
    #[error("No content fetcher configured for {0}")]
    NoFetcher(ResourceId),
}
