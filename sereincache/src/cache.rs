//! Cache de ressources borné en taille et en nombre d'entrées
//!
//! Ce module fournit un cache mémoire générique pour les ressources décodées
//! (pistes audio, illustrations), avec une politique d'éviction LRU.

use crate::entry::{CacheEntry, CacheLimits, CacheStats, ResourceId};
use crate::error::{CacheError, Result};
use crate::fetch::{ContentFetcher, FetchError, FetchPriority, Fetched};
use crate::prefetch::{PrefetchQueue, PrefetchReport};
use sereinutils::{format_bytes, SharedClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;

/// Résultat d'une lecture avec récupération sur défaut de cache.
#[derive(Debug, Clone)]
pub enum Resolved<P> {
    /// Trouvé dans le cache
    Cached(Arc<P>),
    /// Récupéré en entier puis admis dans le cache
    Fetched(Arc<P>),
    /// Disponible partiellement ; non mis en cache
    Partial {
        payload: Arc<P>,
        received_bytes: u64,
        expected_bytes: Option<u64>,
    },
}

impl<P> Resolved<P> {
    pub fn payload(&self) -> &Arc<P> {
        match self {
            Resolved::Cached(payload) | Resolved::Fetched(payload) => payload,
            Resolved::Partial { payload, .. } => payload,
        }
    }

    pub fn into_payload(self) -> Arc<P> {
        match self {
            Resolved::Cached(payload) | Resolved::Fetched(payload) => payload,
            Resolved::Partial { payload, .. } => payload,
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self, Resolved::Partial { .. })
    }
}

/// État protégé par le verrou du cache
struct CacheState<P> {
    entries: HashMap<ResourceId, CacheEntry<P>>,
    limits: CacheLimits,
    total_bytes: u64,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<P> CacheState<P> {
    fn fits(&self, incoming_bytes: u64, incoming_entries: usize, bytes: u64, entries: usize) -> bool {
        self.total_bytes + incoming_bytes <= bytes && self.entries.len() + incoming_entries <= entries
    }

    /// Évince des entrées jusqu'à pouvoir accueillir `incoming_bytes` /
    /// `incoming_entries` en laissant libre la fraction `free_target` des budgets.
    ///
    /// Ne fait rien si les budgets sont déjà respectés. Les candidats sont
    /// classés par dernier accès croissant, puis par date d'insertion.
    fn evict_for(&mut self, incoming_bytes: u64, incoming_entries: usize) -> Vec<ResourceId> {
        let limits = self.limits;
        if self.fits(incoming_bytes, incoming_entries, limits.max_bytes, limits.max_entries) {
            return Vec::new();
        }

        let target_bytes = limits.target_bytes();
        let target_entries = limits.target_entries();

        let mut candidates: Vec<_> = self
            .entries
            .values()
            .map(|entry| (entry.lru_rank(), entry.key.clone()))
            .collect();
        candidates.sort();

        let mut evicted = Vec::new();
        for (_, key) in candidates {
            if self.fits(incoming_bytes, incoming_entries, target_bytes, target_entries) {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes -= entry.size_bytes;
                self.evictions += 1;
                evicted.push(key);
            }
        }
        evicted
    }
}

/// Cache générique de ressources
///
/// - Budget en octets et en nombre d'entrées, jamais dépassés
/// - Éviction LRU synchrone lors de l'admission d'une nouvelle entrée
/// - Récupération via un [`ContentFetcher`] sur défaut de cache, avec
///   regroupement des défauts concurrents sur une même clé
///
/// Les payloads sont partagés par `Arc` : une éviction retire uniquement la
/// référence détenue par le cache, les copies déjà remises aux appelants
/// restent valides.
pub struct ResourceCache<P> {
    state: Mutex<CacheState<P>>,
    clock: SharedClock,
    fetcher: Option<Arc<dyn ContentFetcher<Payload = P>>>,
    /// Récupérations en cours (clé -> verrou de la récupération)
    inflight: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
    prefetch: Mutex<PrefetchQueue>,
}

impl<P: Send + Sync + 'static> ResourceCache<P> {
    /// Crée un cache sans source de contenu (alimenté uniquement par `put`)
    pub fn new(limits: CacheLimits, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                limits,
                total_bytes: 0,
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            clock,
            fetcher: None,
            inflight: Mutex::new(HashMap::new()),
            prefetch: Mutex::new(PrefetchQueue::default()),
        }
    }

    /// Crée un cache alimenté par `fetcher` sur défaut
    pub fn with_fetcher(
        limits: CacheLimits,
        clock: SharedClock,
        fetcher: Arc<dyn ContentFetcher<Payload = P>>,
    ) -> Self {
        let mut cache = Self::new(limits, clock);
        cache.fetcher = Some(fetcher);
        cache
    }

    fn state(&self) -> MutexGuard<'_, CacheState<P>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &ResourceId, count: bool) -> Option<Arc<P>> {
        let now = self.clock.now();
        let mut state = self.state();
        let payload = state.entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.payload.clone()
        });
        if count {
            match payload {
                Some(_) => state.hits += 1,
                None => state.misses += 1,
            }
        }
        payload
    }

    /// Lit une entrée et met à jour sa date de dernier accès
    pub fn get(&self, key: &ResourceId) -> Option<Arc<P>> {
        self.lookup(key, true)
    }

    /// Indique si la clé est présente, sans compter d'accès
    pub fn contains(&self, key: &ResourceId) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Ajoute ou remplace une entrée
    ///
    /// Si l'admission dépasse un des budgets, les entrées les moins récemment
    /// utilisées sont évincées avant l'insertion.
    ///
    /// # Returns
    ///
    /// Les clés évincées pour faire de la place
    pub fn put(&self, key: ResourceId, payload: P, size_bytes: u64) -> Result<Vec<ResourceId>> {
        self.put_shared(key, Arc::new(payload), size_bytes)
    }

    /// Comme [`ResourceCache::put`], pour un payload déjà partagé
    pub fn put_shared(
        &self,
        key: ResourceId,
        payload: Arc<P>,
        size_bytes: u64,
    ) -> Result<Vec<ResourceId>> {
        let now = self.clock.now();
        let mut state = self.state();
        let limits = state.limits;

        if size_bytes > limits.max_bytes || limits.max_entries == 0 {
            return Err(CacheError::TooLarge {
                id: key,
                size: size_bytes,
                budget: limits.max_bytes,
            });
        }

        // Remplacement : l'ancienne entrée sort de la comptabilité
        if let Some(previous) = state.entries.remove(&key) {
            state.total_bytes -= previous.size_bytes;
        }

        let evicted = state.evict_for(size_bytes, 1);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.total_bytes += size_bytes;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                payload,
                size_bytes,
                last_accessed: now,
                inserted_at: now,
                seq,
            },
        );
        let total = state.total_bytes;
        drop(state);

        if !evicted.is_empty() {
            tracing::debug!(
                "LRU eviction: {} entries removed to admit {} (cache size now {})",
                evicted.len(),
                key,
                format_bytes(total)
            );
        }
        Ok(evicted)
    }

    /// Retire une entrée. Retourne `true` si elle était présente.
    pub fn invalidate(&self, key: &ResourceId) -> bool {
        let mut state = self.state();
        match state.entries.remove(key) {
            Some(entry) => {
                state.total_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Vide le cache. Retourne le nombre d'entrées retirées.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state();
        let removed = state.entries.len();
        state.entries.clear();
        state.total_bytes = 0;
        removed
    }

    /// Ramène le cache sous ses budgets (utile après un changement de limites)
    pub fn trim(&self) -> Vec<ResourceId> {
        self.state().evict_for(0, 0)
    }

    /// Change les budgets puis applique immédiatement l'éviction nécessaire
    pub fn set_limits(&self, limits: CacheLimits) -> Vec<ResourceId> {
        let mut state = self.state();
        state.limits = limits;
        state.evict_for(0, 0)
    }

    pub fn limits(&self) -> CacheLimits {
        self.state().limits
    }

    pub fn total_bytes(&self) -> u64 {
        self.state().total_bytes
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Lit une entrée, en la récupérant via le [`ContentFetcher`] si absente
    ///
    /// # Workflow
    ///
    /// 1. Lecture dans le cache (met à jour le dernier accès)
    /// 2. Sur défaut, attente de toute récupération déjà en cours pour la clé
    /// 3. Nouvelle lecture : un autre appelant a pu remplir le cache entre-temps
    /// 4. Récupération ; un contenu complet est admis, un contenu partiel est
    ///    seulement remis à l'appelant
    pub async fn get_or_fetch(&self, key: &ResourceId, priority: FetchPriority) -> Result<Resolved<P>> {
        if let Some(payload) = self.get(key) {
            return Ok(Resolved::Cached(payload));
        }
        self.fetch_and_admit(key, priority).await
    }

    async fn fetch_and_admit(&self, key: &ResourceId, priority: FetchPriority) -> Result<Resolved<P>> {
        let fetcher = self
            .fetcher
            .clone()
            .ok_or_else(|| CacheError::NoFetcher(key.clone()))?;

        let gate = self.inflight_gate(key);
        let turn = gate.lock().await;

        let resolved = match self.lookup(key, false) {
            Some(payload) => Ok(Resolved::Cached(payload)),
            None => self.fetch_with(fetcher.as_ref(), key, priority).await,
        };

        drop(turn);
        self.release_gate(key, &gate);
        resolved
    }

    async fn fetch_with(
        &self,
        fetcher: &dyn ContentFetcher<Payload = P>,
        key: &ResourceId,
        priority: FetchPriority,
    ) -> Result<Resolved<P>> {
        tracing::debug!("Fetching {} with priority {:?}", key, priority);

        match fetcher.fetch(key, priority).await {
            Ok(Fetched::Complete {
                payload,
                size_bytes,
            }) => {
                let payload = Arc::new(payload);
                if let Err(err) = self.put_shared(key.clone(), payload.clone(), size_bytes) {
                    // Trop volumineux pour le cache : l'appelant reçoit tout de même le contenu
                    tracing::warn!("Fetched {} but not cached: {}", key, err);
                }
                Ok(Resolved::Fetched(payload))
            }
            Ok(Fetched::Partial {
                payload,
                received_bytes,
                expected_bytes,
            }) => {
                if priority.allows_partial() {
                    Ok(Resolved::Partial {
                        payload: Arc::new(payload),
                        received_bytes,
                        expected_bytes,
                    })
                } else {
                    Err(CacheError::Transient {
                        id: key.clone(),
                        reason: format!(
                            "only {} bytes available for a high priority fetch",
                            received_bytes
                        ),
                    })
                }
            }
            Err(FetchError::NotFound) => Err(CacheError::NotFound(key.clone())),
            Err(FetchError::Transient(reason)) => Err(CacheError::Transient {
                id: key.clone(),
                reason,
            }),
        }
    }

    fn inflight_gate(&self, key: &ResourceId) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_gate(&self, key: &ResourceId, gate: &Arc<AsyncMutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if inflight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, gate) && Arc::strong_count(current) <= 2)
        {
            inflight.remove(key);
        }
    }

    /// Indique qu'une ressource sera probablement demandée prochainement
    ///
    /// Retourne `false` si la ressource est déjà en cache ou déjà en attente
    /// avec une priorité au moins égale.
    pub fn suggest_prefetch(&self, key: ResourceId, priority: FetchPriority) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.prefetch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key, priority)
    }

    /// Retire une indication de préchargement en attente
    pub fn cancel_prefetch(&self, key: &ResourceId) {
        self.prefetch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn pending_prefetches(&self) -> usize {
        self.prefetch.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Traite au plus `max` indications de préchargement
    pub async fn run_prefetches(&self, max: usize) -> PrefetchReport {
        let mut report = PrefetchReport::default();

        for _ in 0..max {
            let next = self.prefetch.lock().unwrap_or_else(|e| e.into_inner()).pop();
            let Some((key, priority)) = next else {
                break;
            };

            if self.contains(&key) {
                report.skipped += 1;
                continue;
            }

            match self.fetch_and_admit(&key, priority).await {
                Ok(Resolved::Partial { .. }) => report.partial += 1,
                Ok(_) => report.fetched += 1,
                Err(err) => {
                    tracing::debug!("Prefetch of {} failed: {}", key, err);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
