//! Réconciliation des enregistrements locaux avec l'autorité distante
//!
//! Machine à états par enregistrement :
//!
//! ```text
//! pending --push--> synced
//!                 | pending (échec temporaire, nouvel essai après backoff)
//!                 | failed  (refus du serveur, ou tentatives épuisées)
//! ```
//!
//! Chaque transition est une écriture conditionnelle du store, basée sur la
//! version envoyée : une passe interrompue laisse au pire un enregistrement
//! `pending`, et une modification locale faite pendant l'envoi n'est jamais
//! écrasée.

use crate::backoff::{Backoff, RetryPolicy};
use crate::error::Result;
use crate::remote::{PushOutcome, RemoteError, RemoteSync};
use chrono::{DateTime, Utc};
use sereinstore::{ApplyOutcome, DurableStore, RawRecord, SyncStatus};
use sereinutils::SharedClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Réglages du réconciliateur
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Délai maximal d'un appel distant ; au-delà, échec temporaire
    pub remote_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Issue du traitement d'un enregistrement pendant une passe
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Accepté par le serveur
    Synced { version: u64 },
    /// Conflit gagné localement, version rebasée puis acceptée
    LocalWon { version: u64 },
    /// Conflit perdu : la copie distante remplace la copie locale
    RemoteWon { version: u64 },
    /// Échec temporaire, reste `pending` jusqu'à `next_attempt_at`
    Retrying {
        attempts: u32,
        delay: Duration,
        next_attempt_at: DateTime<Utc>,
    },
    /// Refusé, ou tentatives épuisées
    Failed { reason: String },
    /// Échéance de backoff pas encore atteinte
    Deferred { next_attempt_at: DateTime<Utc> },
    /// En échec : attend une demande explicite de nouvel essai
    AwaitingRetry,
    /// Modifié localement pendant l'envoi ; repartira à la prochaine passe
    Superseded,
    /// Passe interrompue pendant l'envoi ; reste `pending`
    Interrupted,
}

/// Bilan d'une passe de synchronisation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Une passe était déjà en cours : rien n'a été fait
    pub skipped: bool,
    /// La passe a été annulée avant la fin de la file
    pub cancelled: bool,
    pub outcomes: Vec<(Uuid, RecordOutcome)>,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn outcome(&self, id: &Uuid) -> Option<&RecordOutcome> {
        self.outcomes
            .iter()
            .find(|(record_id, _)| record_id == id)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    /// Enregistrements désormais synchronisés (conflits résolus compris)
    pub fn synced(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                RecordOutcome::Synced { .. }
                    | RecordOutcome::LocalWon { .. }
                    | RecordOutcome::RemoteWon { .. }
            )
        })
    }

    pub fn retrying(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Retrying { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Failed { .. }))
    }

    /// Identifiants dont le payload local a été remplacé par la copie distante
    pub fn replaced_locally(&self) -> Vec<Uuid> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::RemoteWon { .. }))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Bilan d'un `pull`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub inserted: usize,
    pub updated: Vec<Uuid>,
    pub kept_local: usize,
    /// Numéro du dernier changement distant appliqué
    pub checkpoint: Option<u64>,
    /// Serveur injoignable : rien n'a été appliqué, le point de reprise est
    /// inchangé et le prochain `pull` reprendra au même endroit
    pub deferred: bool,
}

/// Réconciliateur : vide la file de synchronisation du store vers le serveur
pub struct SyncReconciler {
    store: Arc<DurableStore>,
    remote: Arc<dyn RemoteSync>,
    settings: SyncSettings,
    backoff: Backoff,
    clock: SharedClock,
    /// Une seule passe à la fois
    pass: Mutex<()>,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<DurableStore>,
        remote: Arc<dyn RemoteSync>,
        settings: SyncSettings,
        clock: SharedClock,
    ) -> Self {
        let backoff = Backoff::new(settings.retry.clone());
        Self::with_backoff(store, remote, settings, backoff, clock)
    }

    /// Comme [`SyncReconciler::new`], avec un générateur de délais fourni
    /// (gigue reproductible dans les tests)
    pub fn with_backoff(
        store: Arc<DurableStore>,
        remote: Arc<dyn RemoteSync>,
        settings: SyncSettings,
        backoff: Backoff,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            remote,
            settings,
            backoff,
            clock,
            pass: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Passe de synchronisation
    ///
    /// # Workflow
    ///
    /// 1. File des enregistrements non synchronisés, le plus ancien d'abord
    /// 2. Les enregistrements `failed` et ceux en attente de backoff sont sautés
    /// 3. Envoi de chacun des autres, avec timeout, en surveillant `cancel`
    /// 4. Transition d'état selon la réponse du serveur
    pub async fn sync_pass(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let Ok(_pass) = self.pass.try_lock() else {
            tracing::debug!("Sync pass already running, skipping");
            return Ok(SyncReport::skipped());
        };

        let queue = self.store.sync_queue().await?;
        let now = self.clock.now();
        let mut report = SyncReport::default();

        for record in queue {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let id = record.id;
            let outcome = if record.sync_status == SyncStatus::Failed {
                RecordOutcome::AwaitingRetry
            } else if let Some(at) = record.sync.next_attempt_at.filter(|at| *at > now) {
                RecordOutcome::Deferred { next_attempt_at: at }
            } else {
                self.sync_record(record, cancel).await?
            };

            tracing::debug!(record_id = %id, outcome = ?outcome, "Record processed");
            let interrupted = outcome == RecordOutcome::Interrupted;
            report.outcomes.push((id, outcome));
            if interrupted {
                report.cancelled = true;
                break;
            }
        }

        tracing::info!(
            "Sync pass done: {} synced, {} retrying, {} failed, {} records seen{}",
            report.synced(),
            report.retrying(),
            report.failed(),
            report.outcomes.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    async fn push(
        &self,
        record: &RawRecord,
        cancel: &CancellationToken,
    ) -> Option<std::result::Result<PushOutcome, RemoteError>> {
        let timeout = self.settings.remote_timeout;
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, self.remote.push(record)) => {
                Some(result.unwrap_or(Err(RemoteError::Timeout(timeout))))
            }
        }
    }

    async fn sync_record(
        &self,
        record: RawRecord,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome> {
        match self.push(&record, cancel).await {
            None => Ok(RecordOutcome::Interrupted),
            Some(Ok(PushOutcome::Accepted(acknowledged))) => {
                self.accept(&record, acknowledged, |version| RecordOutcome::Synced { version })
                    .await
            }
            Some(Ok(PushOutcome::Conflict(remote))) => {
                self.resolve_conflict(record, remote, cancel).await
            }
            Some(Ok(PushOutcome::Rejected(reason))) => self.reject(&record, reason).await,
            Some(Err(err)) => self.transient_failure(&record, &err).await,
        }
    }

    async fn accept(
        &self,
        record: &RawRecord,
        acknowledged: u64,
        outcome: impl FnOnce(u64) -> RecordOutcome,
    ) -> Result<RecordOutcome> {
        if self
            .store
            .mark_synced(record.id, record.version, acknowledged)
            .await?
        {
            Ok(outcome(acknowledged))
        } else {
            Ok(RecordOutcome::Superseded)
        }
    }

    async fn reject(&self, record: &RawRecord, reason: String) -> Result<RecordOutcome> {
        if !self
            .store
            .mark_failed(record.id, record.version, &reason)
            .await?
        {
            return Ok(RecordOutcome::Superseded);
        }
        tracing::warn!(record_id = %record.id, owner = %record.owner_id, "Remote rejected record: {}", reason);
        Ok(RecordOutcome::Failed { reason })
    }

    async fn transient_failure(&self, record: &RawRecord, err: &RemoteError) -> Result<RecordOutcome> {
        let failures = record.sync.attempts + 1;

        if failures >= self.settings.retry.max_attempts {
            let reason = format!("gave up after {} attempts: {}", failures, err);
            if !self
                .store
                .mark_failed(record.id, record.version, &reason)
                .await?
            {
                return Ok(RecordOutcome::Superseded);
            }
            tracing::warn!(record_id = %record.id, owner = %record.owner_id, "Retries exhausted: {}", err);
            return Ok(RecordOutcome::Failed { reason });
        }

        let delay = self.backoff.delay(failures);
        let next_attempt_at = self.clock.now()
            + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);

        match self
            .store
            .record_transient_failure(record.id, record.version, next_attempt_at, &err.to_string())
            .await?
        {
            Some(attempts) => {
                tracing::debug!(
                    record_id = %record.id,
                    "Transient failure #{} ({}), retrying in {:?}",
                    attempts,
                    err,
                    delay
                );
                Ok(RecordOutcome::Retrying {
                    attempts,
                    delay,
                    next_attempt_at,
                })
            }
            None => Ok(RecordOutcome::Superseded),
        }
    }

    /// Dernier écrivain gagnant sur `last_modified` ; en cas d'égalité, la
    /// copie distante l'emporte
    async fn resolve_conflict(
        &self,
        local: RawRecord,
        remote: RawRecord,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome> {
        tracing::debug!(
            record_id = %local.id,
            local_version = local.version,
            remote_version = remote.version,
            "Version conflict"
        );

        // Envoi déjà appliqué dont l'acquittement s'est perdu
        if remote.version == local.version
            && remote.kind == local.kind
            && remote.payload == local.payload
        {
            return self
                .accept(&local, remote.version, |version| RecordOutcome::Synced { version })
                .await;
        }

        if local.last_modified > remote.last_modified {
            let version = local.version.max(remote.version) + 1;
            if !self
                .store
                .rebase(local.id, local.version, version, remote.version)
                .await?
            {
                return Ok(RecordOutcome::Superseded);
            }

            let mut rebased = local;
            rebased.version = version;
            rebased.sync.remote_version = Some(remote.version);
            rebased.sync.attempts = 0;
            return self
                .push_again(rebased, cancel, |version| RecordOutcome::LocalWon { version })
                .await;
        }

        let remote_version = remote.version;
        match self
            .store
            .resolve_remote_win(local.id, local.version, remote)
            .await?
        {
            None => Ok(RecordOutcome::Superseded),
            Some(adopted) if adopted.is_synced() => Ok(RecordOutcome::RemoteWon {
                version: remote_version,
            }),
            // Copie distante adoptée sous une version locale plus haute : la renvoyer
            Some(adopted) => {
                self.push_again(adopted, cancel, |version| RecordOutcome::RemoteWon { version })
                    .await
            }
        }
    }

    /// Renvoi unique après résolution d'un conflit
    async fn push_again(
        &self,
        record: RawRecord,
        cancel: &CancellationToken,
        on_accept: impl FnOnce(u64) -> RecordOutcome,
    ) -> Result<RecordOutcome> {
        match self.push(&record, cancel).await {
            None => Ok(RecordOutcome::Interrupted),
            Some(Ok(PushOutcome::Accepted(acknowledged))) => {
                self.accept(&record, acknowledged, on_accept).await
            }
            Some(Ok(PushOutcome::Conflict(_))) => {
                let err = RemoteError::Transient("conflict persisted after resolution".into());
                self.transient_failure(&record, &err).await
            }
            Some(Ok(PushOutcome::Rejected(reason))) => self.reject(&record, reason).await,
            Some(Err(err)) => self.transient_failure(&record, &err).await,
        }
    }

    /// Enregistrements en échec, à présenter à l'utilisateur
    pub async fn failed_records(&self, owner: Option<&str>) -> Result<Vec<RawRecord>> {
        let failed = self.store.list_by_status(SyncStatus::Failed).await?;
        Ok(failed
            .into_iter()
            .filter(|r| owner.is_none_or(|owner| r.owner_id == owner))
            .collect())
    }

    /// Remet un enregistrement en échec dans la file. Retourne `false` s'il
    /// n'était pas en échec.
    pub async fn retry_failed(&self, id: Uuid) -> Result<bool> {
        Ok(self.store.reset_failed(id).await?)
    }

    pub async fn retry_all_failed(&self, owner: Option<&str>) -> Result<usize> {
        Ok(self.store.reset_all_failed(owner).await?)
    }

    /// Amorce le store avec les changements distants depuis le dernier point
    /// de reprise du propriétaire
    ///
    /// Les enregistrements absents localement, ou synchronisés et plus anciens,
    /// sont appliqués ; une modification locale en attente est laissée à la
    /// résolution de conflit côté envoi.
    ///
    /// Un échec temporaire du serveur n'est pas une erreur : le bilan est
    /// marqué `deferred` et le point de reprise ne bouge pas.
    pub async fn pull(&self, owner: &str) -> Result<PullReport> {
        let since = self.store.checkpoint(owner).await?;
        let mut report = PullReport {
            checkpoint: since,
            ..PullReport::default()
        };

        let timeout = self.settings.remote_timeout;
        let page = match tokio::time::timeout(timeout, self.remote.pull(owner, since))
            .await
            .unwrap_or(Err(RemoteError::Timeout(timeout)))
        {
            Ok(page) => page,
            Err(err) => {
                tracing::debug!(owner = %owner, "Pull deferred: {}", err);
                report.deferred = true;
                return Ok(report);
            }
        };

        for record in page.records {
            let id = record.id;
            match self.store.apply_remote(record).await? {
                ApplyOutcome::Inserted => report.inserted += 1,
                ApplyOutcome::Updated => report.updated.push(id),
                ApplyOutcome::KeptLocal => report.kept_local += 1,
            }
        }

        // Appliqué jusqu'au bout : le point de reprise peut avancer
        if since.is_none_or(|since| page.cursor > since) {
            self.store.set_checkpoint(owner, page.cursor).await?;
            report.checkpoint = Some(page.cursor);
        }

        tracing::info!(
            owner = %owner,
            "Pull done: {} inserted, {} updated, {} kept local",
            report.inserted,
            report.updated.len(),
            report.kept_local
        );
        Ok(report)
    }
}
