//! Tick de maintenance piloté par l'hôte
//!
//! L'hôte décide quand travailler : [`SyncScheduler::tick`] à la demande, ou
//! [`SyncScheduler::run`] sur un intervalle jusqu'à annulation.

use crate::error::Result;
use crate::quota::{QuotaEnforcer, QuotaReport};
use crate::reconciler::{SyncReconciler, SyncReport};
use sereincache::{PrefetchReport, ResourceCache, ResourceId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Bilan d'un tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub quota: QuotaReport,
    /// `None` hors ligne
    pub sync: Option<SyncReport>,
    /// `None` hors ligne
    pub prefetch: Option<PrefetchReport>,
}

pub struct SyncScheduler<P> {
    reconciler: Arc<SyncReconciler>,
    quota: Arc<QuotaEnforcer<P>>,
    cache: Arc<ResourceCache<P>>,
    online: AtomicBool,
    prefetch_batch: usize,
}

impl<P: Send + Sync + 'static> SyncScheduler<P> {
    pub fn new(
        reconciler: Arc<SyncReconciler>,
        quota: Arc<QuotaEnforcer<P>>,
        cache: Arc<ResourceCache<P>>,
    ) -> Self {
        Self {
            reconciler,
            quota,
            cache,
            online: AtomicBool::new(true),
            prefetch_batch: 8,
        }
    }

    /// Nombre maximal d'indications de préchargement traitées par tick
    pub fn with_prefetch_batch(mut self, batch: usize) -> Self {
        self.prefetch_batch = batch;
        self
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            tracing::info!("Connectivity {}", if online { "regained" } else { "lost" });
        }
    }

    /// Repasse en ligne et déclenche un tick immédiat
    pub async fn connectivity_regained(&self, cancel: &CancellationToken) -> Result<TickReport> {
        self.set_online(true);
        self.tick(cancel).await
    }

    /// Un tour de maintenance : quota, puis (en ligne) synchronisation et
    /// préchargements
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport> {
        let quota = self.quota.enforce().await?;

        if !self.is_online() || cancel.is_cancelled() {
            return Ok(TickReport {
                quota,
                sync: None,
                prefetch: None,
            });
        }

        let sync = self.reconciler.sync_pass(cancel).await?;
        // Payload local remplacé : la copie en cache est périmée
        for id in sync.replaced_locally() {
            self.cache.invalidate(&ResourceId::new(id.to_string()));
        }

        let prefetch = if cancel.is_cancelled() {
            None
        } else {
            Some(self.cache.run_prefetches(self.prefetch_batch).await)
        };

        Ok(TickReport {
            quota,
            sync: Some(sync),
            prefetch,
        })
    }

    /// Enchaîne les ticks toutes les `period` jusqu'à annulation
    ///
    /// Une erreur de tick est journalisée ; la boucle continue.
    pub async fn run(&self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Scheduler stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&cancel).await {
                        tracing::warn!("Maintenance tick failed: {}", e);
                    }
                }
            }
        }
    }
}
