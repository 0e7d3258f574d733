//! Construction et câblage des composants du moteur
//!
//! [`Engine::open`] construit le store, le cache, le réconciliateur, le
//! quota et le scheduler à partir d'une [`Config`] ; aucun état global.

use crate::config_ext::EngineConfigExt;
use crate::stats::OwnerStats;
use anyhow::{Context, Result};
use bytes::Bytes;
use sereincache::{CacheError, ContentFetcher, FetchPriority, Resolved, ResourceCache, ResourceId};
use sereinconfig::Config;
use sereinstore::{
    AudioBlob, DurableStore, RawRecord, Record, RecordKind, RecordPayload, SyncStatus,
};
use sereinsync::{
    PullReport, QuotaEnforcer, QuotaReport, RemoteSync, SyncReconciler, SyncScheduler, TickReport,
};
use sereinutils::{format_bytes, SharedClock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Cache des ressources décodées (audio, contenus téléchargés)
pub type ResourceStore = ResourceCache<Bytes>;

/// Source de contenu distante alimentant le cache
pub type SharedFetcher = Arc<dyn ContentFetcher<Payload = Bytes>>;

/// Moteur local-first : un point d'entrée pour l'hôte
pub struct Engine {
    clock: SharedClock,
    store: Arc<DurableStore>,
    cache: Arc<ResourceStore>,
    reconciler: Arc<SyncReconciler>,
    quota: Arc<QuotaEnforcer<Bytes>>,
    scheduler: Arc<SyncScheduler<Bytes>>,
    tick_interval: Duration,
}

impl Engine {
    /// Ouvre le moteur avec l'horloge système
    pub fn open(
        config: &Config,
        remote: Arc<dyn RemoteSync>,
        fetcher: Option<SharedFetcher>,
    ) -> Result<Self> {
        Self::open_with_clock(config, remote, fetcher, SystemClock::shared())
    }

    /// Ouvre le moteur avec une horloge fournie
    ///
    /// # Workflow
    ///
    /// 1. Store SQLite au chemin configuré (`engine.store.*`)
    /// 2. Cache borné (`engine.cache.*`), alimenté par `fetcher` s'il est fourni
    /// 3. Réconciliateur (`engine.sync.*`) et quota audio (`engine.quota.*`)
    /// 4. Scheduler regroupant les trois
    pub fn open_with_clock(
        config: &Config,
        remote: Arc<dyn RemoteSync>,
        fetcher: Option<SharedFetcher>,
        clock: SharedClock,
    ) -> Result<Self> {
        let path = config.store_path()?;
        let store = Arc::new(
            DurableStore::open(&path, config.store_options()?, clock.clone())
                .with_context(|| format!("opening store at {}", path.display()))?,
        );

        let limits = config.cache_limits()?;
        let cache = Arc::new(match fetcher {
            Some(fetcher) => ResourceCache::with_fetcher(limits, clock.clone(), fetcher),
            None => ResourceCache::new(limits, clock.clone()),
        });

        let reconciler = Arc::new(SyncReconciler::new(
            store.clone(),
            remote,
            config.sync_settings()?,
            clock.clone(),
        ));
        let quota = Arc::new(QuotaEnforcer::new(
            store.clone(),
            cache.clone(),
            config.quota_policy()?,
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            reconciler.clone(),
            quota.clone(),
            cache.clone(),
        ));

        tracing::info!(
            "Engine opened: store {}, cache budget {}, audio budget {}",
            path.display(),
            format_bytes(limits.max_bytes),
            format_bytes(quota.policy().audio_max_bytes)
        );

        Ok(Self {
            clock,
            store,
            cache,
            reconciler,
            quota,
            scheduler,
            tick_interval: config.tick_interval()?,
        })
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ResourceStore> {
        &self.cache
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler> {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler<Bytes>> {
        &self.scheduler
    }

    // ---- Données utilisateur ----

    /// Crée un enregistrement local, en attente de synchronisation
    ///
    /// Un blob audio déclenche le quota de la partition audio.
    pub async fn create<T: RecordPayload>(&self, owner: &str, payload: T) -> Result<Record<T>> {
        let record = self
            .store
            .put(Record::new(owner, payload, self.clock.now()))
            .await?;
        self.after_put(T::KIND).await?;
        Ok(record)
    }

    /// Modifie un enregistrement lu précédemment
    ///
    /// Échoue avec [`sereinstore::StoreError::StaleWrite`] si l'enregistrement
    /// a changé depuis la lecture.
    pub async fn update<T: RecordPayload>(&self, record: Record<T>, payload: T) -> Result<Record<T>> {
        let id = record.id;
        let updated = self
            .store
            .put(record.revise(payload))
            .await
            .with_context(|| format!("updating record {}", id))?;
        self.cache.invalidate(&resource_key(id));
        self.after_put(T::KIND).await?;
        Ok(updated)
    }

    /// Quota audio après toute écriture dans la partition audio
    async fn after_put(&self, kind: RecordKind) -> Result<()> {
        if kind == RecordKind::AudioBlob {
            self.quota
                .enforce()
                .await
                .context("enforcing the audio quota")?;
        }
        Ok(())
    }

    pub async fn get<T: RecordPayload>(&self, id: Uuid) -> Result<Record<T>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list<T: RecordPayload>(&self, owner: &str) -> Result<Vec<Record<T>>> {
        Ok(self.store.list_by_owner(owner).await?)
    }

    /// Enregistre un blob audio puis applique le quota de la partition audio
    ///
    /// Le blob vient d'être écrit et n'est pas synchronisé : il ne peut pas
    /// être évincé par cette application du quota.
    pub async fn save_audio_blob(
        &self,
        owner: &str,
        blob: AudioBlob,
    ) -> Result<(Record<AudioBlob>, QuotaReport)> {
        let record = self
            .store
            .put(Record::new(owner, blob, self.clock.now()))
            .await?;
        let report = self.quota.enforce().await?;
        Ok((record, report))
    }

    /// Octets d'un blob audio, depuis le cache ou à défaut depuis le store
    pub async fn audio(&self, id: Uuid) -> Result<Bytes> {
        let key = resource_key(id);
        if let Some(bytes) = self.cache.get(&key) {
            return Ok(Bytes::clone(&bytes));
        }

        let record: Record<AudioBlob> = self.store.get(id).await?;
        let bytes = Bytes::from(record.payload.data);
        let size = bytes.len() as u64;
        match self.cache.put(key, bytes.clone(), size) {
            Ok(_) => {}
            Err(CacheError::TooLarge { .. }) => {
                tracing::debug!(record_id = %id, "Audio blob too large for the cache, served uncached");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(bytes)
    }

    /// Ressource distante, via le cache
    pub async fn resource(&self, id: &ResourceId, priority: FetchPriority) -> Result<Resolved<Bytes>> {
        Ok(self.cache.get_or_fetch(id, priority).await?)
    }

    /// Indication de préchargement, traitée au prochain tick en ligne
    pub fn suggest_prefetch(&self, id: ResourceId, priority: FetchPriority) -> bool {
        self.cache.suggest_prefetch(id, priority)
    }

    // ---- Synchronisation ----

    pub async fn failed_records(&self, owner: &str) -> Result<Vec<RawRecord>> {
        Ok(self.reconciler.failed_records(Some(owner)).await?)
    }

    pub async fn retry_failed(&self, id: Uuid) -> Result<bool> {
        Ok(self.reconciler.retry_failed(id).await?)
    }

    /// Amorce le store avec les changements distants du propriétaire
    ///
    /// Serveur injoignable : bilan `deferred`, à relancer plus tard.
    pub async fn pull(&self, owner: &str) -> Result<PullReport> {
        let report = self.reconciler.pull(owner).await?;
        for id in &report.updated {
            self.cache.invalidate(&resource_key(*id));
        }
        Ok(report)
    }

    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport> {
        Ok(self.scheduler.tick(cancel).await?)
    }

    pub fn set_online(&self, online: bool) {
        self.scheduler.set_online(online);
    }

    pub async fn connectivity_regained(&self, cancel: &CancellationToken) -> Result<TickReport> {
        Ok(self.scheduler.connectivity_regained(cancel).await?)
    }

    /// Lance le tick périodique (`engine.sync.tick_interval_ms`) jusqu'à annulation
    pub fn spawn_scheduler(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let period = self.tick_interval;
        tokio::spawn(async move { scheduler.run(period, cancel).await })
    }

    // ---- Statistiques ----

    pub async fn owner_stats(&self, owner: &str) -> Result<OwnerStats> {
        let cache = self.cache.stats();
        Ok(OwnerStats {
            pending_sync: self
                .store
                .count_by_status(Some(owner), SyncStatus::Pending)
                .await?,
            failed_sync: self
                .store
                .count_by_status(Some(owner), SyncStatus::Failed)
                .await?,
            storage_bytes: self.store.usage_by_owner(owner).await?,
            cache_hit_rate: cache.hit_rate(),
            cache_bytes: cache.bytes,
        })
    }
}

/// Clé de cache de la copie décodée d'un enregistrement
pub fn resource_key(id: Uuid) -> ResourceId {
    ResourceId::new(id.to_string())
}
