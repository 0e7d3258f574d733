//! Gestion des erreurs du moteur de synchronisation

use crate::remote::RemoteError;
use sereinstore::StoreError;
use thiserror::Error;

/// Type Result personnalisé pour sereinsync
pub type Result<T> = std::result::Result<T, SyncError>;

/// Erreurs remontées par le moteur de synchronisation
///
/// Conflits et erreurs temporaires des envois sont absorbés par le
/// réconciliateur ; seules les erreurs du store local et celles d'un `pull`
/// demandé explicitement arrivent jusqu'à l'appelant.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}
