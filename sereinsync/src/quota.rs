//! Application du quota de stockage des blobs audio
//!
//! Seuls les enregistrements `synced` sont évincés : une copie existe chez
//! l'autorité distante et peut être re-téléchargée. Un enregistrement
//! `pending` ou `failed` n'est jamais candidat.

use crate::error::Result;
use sereincache::{ResourceCache, ResourceId};
use sereinstore::{DurableStore, RecordKind};
use sereinutils::format_bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Budget de la partition audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub audio_max_bytes: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            audio_max_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Issue d'une application du quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Une autre application était déjà en cours
    Skipped,
    /// Partition déjà sous le budget
    WithinBudget,
    /// Des enregistrements synchronisés ont été évincés ; budget atteint
    Reclaimed,
    /// Plus aucun candidat évinçable et partition toujours au-dessus du budget
    BudgetUnreachable,
}

/// Bilan d'une application du quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaReport {
    pub outcome: QuotaOutcome,
    /// Entrées retirées du cache en mémoire pour respecter ses propres budgets
    pub cache_evicted: usize,
    /// Enregistrements supprimés, du plus ancien au plus récent
    pub evicted: Vec<Uuid>,
    pub freed_bytes: u64,
    /// Taille de la partition audio après l'application
    pub used_bytes: u64,
    pub budget_bytes: u64,
}

impl QuotaReport {
    fn skipped(budget_bytes: u64) -> Self {
        Self {
            outcome: QuotaOutcome::Skipped,
            cache_evicted: 0,
            evicted: Vec::new(),
            freed_bytes: 0,
            used_bytes: 0,
            budget_bytes,
        }
    }
}

/// Remet le drapeau « application en cours » à zéro, même sur erreur
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Garde la partition audio du store sous son budget
pub struct QuotaEnforcer<P> {
    store: Arc<DurableStore>,
    cache: Arc<ResourceCache<P>>,
    policy: QuotaPolicy,
    in_progress: AtomicBool,
}

impl<P: Send + Sync + 'static> QuotaEnforcer<P> {
    pub fn new(store: Arc<DurableStore>, cache: Arc<ResourceCache<P>>, policy: QuotaPolicy) -> Self {
        Self {
            store,
            cache,
            policy,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    /// Applique le quota
    ///
    /// # Workflow
    ///
    /// 1. Ramène le cache en mémoire sous ses budgets
    /// 2. Mesure la partition audio
    /// 3. Au-dessus du budget : supprime les blobs synchronisés, le moins
    ///    récemment modifié d'abord, et invalide leurs entrées de cache
    /// 4. Si les candidats sont épuisés avant le budget : `BudgetUnreachable`
    pub async fn enforce(&self) -> Result<QuotaReport> {
        let budget = self.policy.audio_max_bytes;
        if self.in_progress.swap(true, Ordering::SeqCst) {
            tracing::debug!("Quota enforcement already in progress, skipping");
            return Ok(QuotaReport::skipped(budget));
        }
        let _guard = InProgress(&self.in_progress);

        let cache_evicted = self.cache.trim().len();
        let mut used = self.store.partition_usage(RecordKind::AudioBlob).await?;
        let mut report = QuotaReport {
            outcome: QuotaOutcome::WithinBudget,
            cache_evicted,
            evicted: Vec::new(),
            freed_bytes: 0,
            used_bytes: used,
            budget_bytes: budget,
        };

        if used <= budget {
            return Ok(report);
        }

        for candidate in self.store.eviction_candidates(RecordKind::AudioBlob).await? {
            if used <= budget {
                break;
            }
            // Modifié depuis la sélection : ce n'est plus un candidat
            if !self
                .store
                .delete_if_synced(candidate.id, candidate.version)
                .await?
            {
                continue;
            }
            self.cache.invalidate(&ResourceId::new(candidate.id.to_string()));
            tracing::debug!(
                record_id = %candidate.id,
                "Evicted audio blob ({})",
                format_bytes(candidate.size_bytes)
            );
            used = used.saturating_sub(candidate.size_bytes);
            report.freed_bytes += candidate.size_bytes;
            report.evicted.push(candidate.id);
        }

        // Des écritures concurrentes ont pu changer la partition
        report.used_bytes = self.store.partition_usage(RecordKind::AudioBlob).await?;

        if report.used_bytes > budget {
            report.outcome = QuotaOutcome::BudgetUnreachable;
            tracing::warn!(
                "Audio budget unreachable: {} used for a {} budget, no synced blob left to evict",
                format_bytes(report.used_bytes),
                format_bytes(budget)
            );
        } else {
            report.outcome = QuotaOutcome::Reclaimed;
            tracing::info!(
                "Evicted {} audio blobs, freed {}",
                report.evicted.len(),
                format_bytes(report.freed_bytes)
            );
        }

        Ok(report)
    }
}
