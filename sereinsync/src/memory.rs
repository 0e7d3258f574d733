//! Autorité distante en mémoire.
//!
//! Implémente le contrat [`RemoteSync`] sans réseau, avec injection de pannes
//! (erreurs temporaires, appels qui ne répondent jamais, hors ligne, refus).
//! Sert aux tests et au mode démonstration hors ligne.

use crate::remote::{PullPage, PushOutcome, RemoteError, RemoteSync};
use async_trait::async_trait;
use sereinstore::{RawRecord, SyncMeta, SyncStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

type Rejector = Box<dyn Fn(&RawRecord) -> Option<String> + Send + Sync>;

/// Versions stockées, chacune avec le numéro du changement qui l'a écrite
#[derive(Default)]
struct Changes {
    last_seq: u64,
    records: HashMap<Uuid, (u64, RawRecord)>,
}

impl Changes {
    fn store(&mut self, record: RawRecord) {
        self.last_seq += 1;
        self.records.insert(record.id, (self.last_seq, record));
    }
}

/// Serveur de synchronisation en mémoire
#[derive(Default)]
pub struct MemoryRemote {
    changes: Mutex<Changes>,
    offline: AtomicBool,
    hang: AtomicBool,
    failures_left: AtomicUsize,
    pushes: AtomicUsize,
    rejector: Mutex<Option<Rejector>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coupe (ou rétablit) la connexion : tous les appels échouent
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Les envois ne répondent plus jamais (le timeout de l'appelant tranche)
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Les `count` prochains envois échouent temporairement
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Refuse définitivement les envois pour lesquels `rule` donne une raison
    pub fn reject_when<F>(&self, rule: F)
    where
        F: Fn(&RawRecord) -> Option<String> + Send + Sync + 'static,
    {
        *self.rejector.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(rule));
    }

    pub fn clear_rejections(&self) {
        *self.rejector.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Écrit directement côté serveur (modification faite depuis un autre appareil)
    pub fn insert(&self, record: RawRecord) {
        self.changes().store(Self::as_stored(record));
    }

    pub fn get(&self, id: &Uuid) -> Option<RawRecord> {
        self.changes().records.get(id).map(|(_, r)| r.clone())
    }

    pub fn len(&self) -> usize {
        self.changes().records.len()
    }

    /// Numéro du dernier changement stocké
    pub fn last_seq(&self) -> u64 {
        self.changes().last_seq
    }

    fn changes(&self) -> std::sync::MutexGuard<'_, Changes> {
        self.changes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nombre d'appels à `push` reçus (y compris ceux en échec)
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    fn as_stored(mut record: RawRecord) -> RawRecord {
        record.sync_status = SyncStatus::Synced;
        record.sync = SyncMeta {
            remote_version: Some(record.version),
            ..SyncMeta::default()
        };
        record
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteSync for MemoryRemote {
    async fn push(&self, record: &RawRecord) -> Result<PushOutcome, RemoteError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable);
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.take_failure() {
            return Err(RemoteError::Transient("injected failure".into()));
        }

        if let Some(rule) = self
            .rejector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            if let Some(reason) = rule(record) {
                return Ok(PushOutcome::Rejected(reason));
            }
        }

        let mut changes = self.changes();
        if let Some((_, current)) = changes.records.get(&record.id) {
            let base = record.sync.remote_version.unwrap_or(0);
            if current.version > base || record.version <= current.version {
                return Ok(PushOutcome::Conflict(current.clone()));
            }
        }

        let accepted = Self::as_stored(record.clone());
        let version = accepted.version;
        changes.store(accepted);
        Ok(PushOutcome::Accepted(version))
    }

    async fn pull(&self, owner: &str, since: Option<u64>) -> Result<PullPage, RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable);
        }

        let changes = self.changes();
        let mut changed: Vec<&(u64, RawRecord)> = changes
            .records
            .values()
            .filter(|(seq, r)| r.owner_id == owner && since.is_none_or(|since| *seq > since))
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);
        Ok(PullPage {
            records: changed.into_iter().map(|(_, r)| r.clone()).collect(),
            cursor: changes.last_seq,
        })
    }
}
