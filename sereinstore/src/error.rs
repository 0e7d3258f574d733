//! Gestion des erreurs du store durable

use crate::record::RecordKind;
use rusqlite::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

/// Type Result personnalisé pour sereinstore
pub type Result<T> = std::result::Result<T, StoreError>;

/// Erreurs possibles lors de l'utilisation du store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Aucun enregistrement avec cet identifiant
    #[error("Record not found: {0}")]
    NotFound(Uuid),

    /// Écriture basée sur une version périmée : relire, modifier, réécrire
    #[error("Stale write on {id}: stored version {stored}, proposed {proposed}")]
    StaleWrite { id: Uuid, stored: u64, proposed: u64 },

    /// Stockage plein ; l'écriture n'a pas été appliquée
    #[error("Storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    /// Le type de l'enregistrement stocké ne correspond pas au type demandé
    #[error("Record {id} is a {found} record, expected {expected}")]
    KindMismatch {
        id: Uuid,
        expected: RecordKind,
        found: RecordKind,
    },

    /// Payload illisible ou impossible à encoder
    #[error("Payload codec error: {0}")]
    Codec(String),

    /// Ligne corrompue en base (statut, type ou horodatage inconnu)
    #[error("Corrupted row: {0}")]
    Corrupted(String),

    /// Erreur SQLite
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Erreur d'entrée/sortie (création du répertoire du store)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tâche bloquante interrompue
    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Indique une erreur de concurrence optimiste
    pub fn is_stale_write(&self) -> bool {
        matches!(self, StoreError::StaleWrite { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::DiskFull => {
                StoreError::QuotaExceeded {
                    requested: 0,
                    available: 0,
                }
            }
            _ => StoreError::Database(err),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}
