//! Store durable asynchrone
//!
//! [`DurableStore`] expose la base SQLite aux composants async. Les
//! opérations d'une même instance passent par une porte FIFO puis sont
//! exécutées dans `spawn_blocking` : elles s'appliquent dans l'ordre des
//! appels sans bloquer les workers tokio.

use crate::db::{ApplyOutcome, EvictionCandidate, RecordDb};
use crate::error::{Result, StoreError};
use crate::payload::RecordPayload;
use crate::record::{RawRecord, Record, RecordKind, SyncStatus};
use chrono::{DateTime, Utc};
use sereinutils::SharedClock;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use uuid::Uuid;

/// Options d'ouverture du store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Plafond sur la somme des payloads stockés, 0 pour aucun plafond
    pub max_bytes: u64,
}

/// Store local des enregistrements, avec index secondaires par propriétaire,
/// statut de synchronisation et date de modification
pub struct DurableStore {
    db: Arc<StdMutex<RecordDb>>,
    /// Porte FIFO (le Mutex tokio sert les attentes dans l'ordre d'arrivée)
    gate: Mutex<()>,
    clock: SharedClock,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Ouvre (ou crée) le store dans le fichier `path`
    ///
    /// Plusieurs instances peuvent ouvrir le même fichier : les écritures sont
    /// alors départagées par la version (`StaleWrite` pour le perdant).
    pub fn open(path: impl AsRef<Path>, options: StoreOptions, clock: SharedClock) -> Result<Self> {
        let path = path.as_ref();
        let db = RecordDb::open(path, options.max_bytes)?;
        tracing::info!("Durable store opened at {}", path.display());
        Ok(Self::with_db(db, clock, Some(path.to_path_buf())))
    }

    /// Store en mémoire, perdu à la fermeture
    pub fn open_in_memory(options: StoreOptions, clock: SharedClock) -> Result<Self> {
        let db = RecordDb::open_in_memory(options.max_bytes)?;
        Ok(Self::with_db(db, clock, None))
    }

    fn with_db(db: RecordDb, clock: SharedClock, path: Option<PathBuf>) -> Self {
        Self {
            db: Arc::new(StdMutex::new(db)),
            gate: Mutex::new(()),
            clock,
            path,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    async fn run<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut RecordDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let _turn = self.gate.lock().await;
        let db = self.db.clone();
        spawn_blocking(move || {
            let mut db = db.lock().unwrap_or_else(|e| e.into_inner());
            op(&mut db)
        })
        .await?
    }

    // ---- Écritures locales ----

    /// Crée ou modifie un enregistrement typé
    ///
    /// La version proposée (`record.version`) doit dépasser la version stockée,
    /// sinon [`StoreError::StaleWrite`]. L'enregistrement retourné porte la
    /// version réellement persistée (`stockée + 1`, ou 1 à la création).
    pub async fn put<T: RecordPayload>(&self, record: Record<T>) -> Result<Record<T>> {
        let raw = record.encode()?;
        let persisted = self.put_raw(raw).await?;
        Ok(persisted.with_payload(record.payload))
    }

    /// Comme [`DurableStore::put`], pour un payload déjà encodé
    pub async fn put_raw(&self, record: RawRecord) -> Result<RawRecord> {
        let now = self.clock.now();
        let persisted = self.run(move |db| db.put(&record, now)).await;

        match &persisted {
            Ok(stored) => tracing::debug!(
                record_id = %stored.id,
                kind = %stored.kind,
                version = stored.version,
                "Record written"
            ),
            Err(StoreError::QuotaExceeded {
                requested,
                available,
            }) => tracing::warn!(
                "Write refused, storage full ({} bytes requested, {} available)",
                requested,
                available
            ),
            Err(_) => {}
        }
        persisted
    }

    /// Supprime un enregistrement
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.run(move |db| db.delete(&id)).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    // ---- Lectures ----

    pub async fn get<T: RecordPayload>(&self, id: Uuid) -> Result<Record<T>> {
        self.get_raw(id).await?.decode()
    }

    pub async fn get_raw(&self, id: Uuid) -> Result<RawRecord> {
        self.find_raw(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Comme [`DurableStore::get_raw`], sans erreur pour un identifiant absent
    pub async fn find_raw(&self, id: Uuid) -> Result<Option<RawRecord>> {
        self.run(move |db| db.get(&id)).await
    }

    /// Enregistrements typés d'un propriétaire, du plus ancien au plus récent
    pub async fn list_by_owner<T: RecordPayload>(&self, owner: &str) -> Result<Vec<Record<T>>> {
        self.list_by_owner_raw(owner, Some(T::KIND))
            .await?
            .into_iter()
            .map(RawRecord::decode)
            .collect()
    }

    pub async fn list_by_owner_raw(
        &self,
        owner: &str,
        kind: Option<RecordKind>,
    ) -> Result<Vec<RawRecord>> {
        let owner = owner.to_string();
        self.run(move |db| db.list_by_owner(&owner, kind)).await
    }

    pub async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<RawRecord>> {
        self.run(move |db| db.list_by_status(status)).await
    }

    /// Enregistrements d'un propriétaire modifiés strictement après `since`
    pub async fn list_modified_since(
        &self,
        owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>> {
        let owner = owner.to_string();
        self.run(move |db| db.list_modified_since(&owner, since)).await
    }

    pub async fn count_by_status(&self, owner: Option<&str>, status: SyncStatus) -> Result<u64> {
        let owner = owner.map(str::to_string);
        self.run(move |db| db.count_by_status(owner.as_deref(), status))
            .await
    }

    /// Octets occupés par les payloads d'une nature donnée
    pub async fn partition_usage(&self, kind: RecordKind) -> Result<u64> {
        self.run(move |db| db.partition_usage(kind)).await
    }

    pub async fn usage_by_owner(&self, owner: &str) -> Result<u64> {
        let owner = owner.to_string();
        self.run(move |db| db.usage_by_owner(&owner)).await
    }

    pub async fn total_bytes(&self) -> Result<u64> {
        self.run(|db| db.total_bytes()).await
    }

    // ---- Moteur de synchronisation ----

    /// Enregistrements non synchronisés, le moins récemment modifié d'abord
    pub async fn sync_queue(&self) -> Result<Vec<RawRecord>> {
        self.run(|db| db.sync_queue()).await
    }

    /// Marque `synced` à la version acquittée, si la version n'a pas bougé
    pub async fn mark_synced(&self, id: Uuid, expected_version: u64, acknowledged: u64) -> Result<bool> {
        self.run(move |db| db.mark_synced(&id, expected_version, acknowledged))
            .await
    }

    /// Compte un échec temporaire et fixe l'échéance du prochain envoi
    ///
    /// Retourne le nombre d'échecs consécutifs, ou `None` si l'enregistrement
    /// a changé entre-temps.
    pub async fn record_transient_failure(
        &self,
        id: Uuid,
        expected_version: u64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Option<u32>> {
        let error = error.to_string();
        self.run(move |db| db.record_transient_failure(&id, expected_version, next_attempt_at, &error))
            .await
    }

    pub async fn mark_failed(&self, id: Uuid, expected_version: u64, reason: &str) -> Result<bool> {
        let reason = reason.to_string();
        self.run(move |db| db.mark_failed(&id, expected_version, &reason))
            .await
    }

    /// Remet un enregistrement `failed` en attente d'envoi
    pub async fn reset_failed(&self, id: Uuid) -> Result<bool> {
        self.run(move |db| db.reset_failed(&id)).await
    }

    pub async fn reset_all_failed(&self, owner: Option<&str>) -> Result<usize> {
        let owner = owner.map(str::to_string);
        self.run(move |db| db.reset_all_failed(owner.as_deref()))
            .await
    }

    pub async fn rebase(
        &self,
        id: Uuid,
        expected_version: u64,
        new_version: u64,
        remote_version: u64,
    ) -> Result<bool> {
        self.run(move |db| db.rebase(&id, expected_version, new_version, remote_version))
            .await
    }

    pub async fn resolve_remote_win(
        &self,
        id: Uuid,
        expected_version: u64,
        remote: RawRecord,
    ) -> Result<Option<RawRecord>> {
        self.run(move |db| db.resolve_remote_win(&id, expected_version, &remote))
            .await
    }

    pub async fn apply_remote(&self, remote: RawRecord) -> Result<ApplyOutcome> {
        self.run(move |db| db.apply_remote(&remote)).await
    }

    // ---- Quota ----

    pub async fn eviction_candidates(&self, kind: RecordKind) -> Result<Vec<EvictionCandidate>> {
        self.run(move |db| db.eviction_candidates(kind)).await
    }

    /// Supprime l'enregistrement seulement s'il est `synced` à `version`
    pub async fn delete_if_synced(&self, id: Uuid, version: u64) -> Result<bool> {
        self.run(move |db| db.delete_if_synced(&id, version)).await
    }

    // ---- Points de reprise ----

    /// Numéro du dernier changement distant reçu par `pull` pour ce propriétaire
    pub async fn checkpoint(&self, owner: &str) -> Result<Option<u64>> {
        let owner = owner.to_string();
        self.run(move |db| db.checkpoint(&owner)).await
    }

    /// Avance le point de reprise d'un propriétaire (il ne recule jamais)
    pub async fn set_checkpoint(&self, owner: &str, seq: u64) -> Result<()> {
        let owner = owner.to_string();
        self.run(move |db| db.set_checkpoint(&owner, seq)).await
    }
}
