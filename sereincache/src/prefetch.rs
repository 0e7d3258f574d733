//! File d'attente des indications de préchargement.
//!
//! La couche de présentation signale qu'une ressource sera probablement
//! demandée (`suggest_prefetch`) ; le moteur ne suppose rien sur la raison de
//! cette indication. Les indications sont ensuite consommées par le tick de
//! l'ordonnanceur, la priorité la plus haute d'abord.

use crate::entry::ResourceId;
use crate::fetch::FetchPriority;

#[derive(Debug, Clone)]
struct PrefetchHint {
    id: ResourceId,
    priority: FetchPriority,
    seq: u64,
}

/// File sans doublons : une nouvelle indication pour une ressource déjà en
/// attente ne fait que relever sa priorité.
#[derive(Debug, Default)]
pub(crate) struct PrefetchQueue {
    hints: Vec<PrefetchHint>,
    next_seq: u64,
}

impl PrefetchQueue {
    /// Ajoute une indication. Retourne `false` si elle était déjà présente
    /// avec une priorité au moins égale.
    pub(crate) fn push(&mut self, id: ResourceId, priority: FetchPriority) -> bool {
        if let Some(hint) = self.hints.iter_mut().find(|h| h.id == id) {
            if priority > hint.priority {
                hint.priority = priority;
                return true;
            }
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.hints.push(PrefetchHint { id, priority, seq });
        true
    }

    /// Retire l'indication la plus prioritaire (FIFO à priorité égale).
    pub(crate) fn pop(&mut self) -> Option<(ResourceId, FetchPriority)> {
        let index = self
            .hints
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(index, _)| index)?;
        let hint = self.hints.swap_remove(index);
        Some((hint.id, hint.priority))
    }

    pub(crate) fn remove(&mut self, id: &ResourceId) {
        self.hints.retain(|h| &h.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.hints.len()
    }
}

/// Bilan d'un passage de préchargement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Ressources récupérées en entier et admises dans le cache
    pub fetched: usize,
    /// Ressources disponibles seulement partiellement (non mises en cache)
    pub partial: usize,
    /// Échecs (introuvable, erreur temporaire, trop volumineuse)
    pub failed: usize,
    /// Ressources déjà présentes au moment du passage
    pub skipped: usize,
}
