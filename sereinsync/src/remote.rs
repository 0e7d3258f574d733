//! Port vers l'autorité distante.
//!
//! Aucun format de transport n'est imposé : une implémentation REST, RPC ou
//! en mémoire ([`crate::MemoryRemote`]) satisfait le même contrat logique.

use async_trait::async_trait;
use sereinstore::RawRecord;
use std::time::Duration;
use thiserror::Error;

/// Réponse du serveur à un envoi
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Version acceptée et acquittée
    Accepted(u64),
    /// Le serveur a une version plus récente que la base de l'envoi
    Conflict(RawRecord),
    /// Refus définitif (validation, droits, …)
    Rejected(String),
}

/// Réponse du serveur à un `pull`
///
/// Le serveur numérote chaque version qu'il accepte ou stocke dans un ordre
/// croissant qui lui est propre. `cursor` est le numéro du dernier changement
/// couvert par la réponse : le prochain `pull` repart de là. L'horodatage
/// `last_modified`, fixé par l'appareil auteur, ne sert pas de point de
/// reprise (un envoi hors ligne arrive avec une date ancienne).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullPage {
    pub records: Vec<RawRecord>,
    pub cursor: u64,
}

/// Échec temporaire d'un appel distant ; un nouvel essai peut réussir
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote unreachable")]
    Unreachable,

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient remote error: {0}")]
    Transient(String),
}

/// Synchronisation avec l'autorité distante
///
/// Contrat de `push` : `record.version` est la version proposée,
/// `record.sync.remote_version` la version distante sur laquelle la
/// modification a été faite. Le serveur répond `Conflict` quand sa version
/// courante dépasse cette base.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn push(&self, record: &RawRecord) -> Result<PushOutcome, RemoteError>;

    /// Enregistrements d'un propriétaire changés sur le serveur après le
    /// changement numéro `since` (tous si `None`)
    async fn pull(&self, owner: &str, since: Option<u64>) -> Result<PullPage, RemoteError>;
}
