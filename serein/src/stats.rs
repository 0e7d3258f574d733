//! Compteurs dérivés, en lecture seule, pour l'interface

use sereinutils::format_bytes;
use std::fmt;

/// Vue agrégée d'un propriétaire
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OwnerStats {
    /// Enregistrements en attente d'envoi
    pub pending_sync: u64,
    /// Enregistrements en échec, en attente d'une action de l'utilisateur
    pub failed_sync: u64,
    /// Octets stockés localement pour ce propriétaire
    pub storage_bytes: u64,
    /// Taux de succès du cache de ressources (partagé entre propriétaires)
    pub cache_hit_rate: f64,
    pub cache_bytes: u64,
}

impl OwnerStats {
    /// Tout est synchronisé
    pub fn is_up_to_date(&self) -> bool {
        self.pending_sync == 0 && self.failed_sync == 0
    }
}

impl fmt::Display for OwnerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pending, {} failed, {} stored, cache {} ({:.0}% hits)",
            self.pending_sync,
            self.failed_sync,
            format_bytes(self.storage_bytes),
            format_bytes(self.cache_bytes),
            self.cache_hit_rate * 100.0
        )
    }
}
