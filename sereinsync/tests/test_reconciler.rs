use chrono::Duration as ChronoDuration;
use sereinstore::{
    DurableStore, JournalEntry, MoodEntry, Record, RecordKind, RecordPayload, StoreOptions,
    SyncStatus,
};
use sereinsync::{
    Backoff, MemoryRemote, RecordOutcome, RetryPolicy, SyncReconciler, SyncSettings,
};
use sereinutils::{Clock, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Device {
    store: Arc<DurableStore>,
    reconciler: SyncReconciler,
}

fn settings() -> SyncSettings {
    SyncSettings {
        remote_timeout: Duration::from_millis(500),
        retry: RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: 0.5,
        },
    }
}

fn create_device(
    clock: &Arc<ManualClock>,
    remote: &Arc<MemoryRemote>,
    settings: SyncSettings,
) -> Device {
    let store = Arc::new(DurableStore::open_in_memory(StoreOptions::default(), clock.clone()).unwrap());
    let backoff = Backoff::seeded(settings.retry.clone(), 7);
    let reconciler =
        SyncReconciler::with_backoff(store.clone(), remote.clone(), settings, backoff, clock.clone());
    Device { store, reconciler }
}

fn setup() -> (Arc<ManualClock>, Arc<MemoryRemote>, Device) {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let device = create_device(&clock, &remote, settings());
    (clock, remote, device)
}

#[tokio::test]
async fn test_offline_mood_entry_syncs_in_one_pass() {
    let (clock, remote, device) = setup();

    remote.set_offline(true);
    let created = device
        .store
        .put(Record::new("alice", MoodEntry::new(2, 2, 4), clock.now()))
        .await
        .unwrap();
    assert_eq!(created.sync_status, SyncStatus::Pending);

    remote.set_offline(false);
    let report = device
        .reconciler
        .sync_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcome(&created.id),
        Some(&RecordOutcome::Synced { version: 1 })
    );
    let stored = device.store.get_raw(created.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.version, 1);
    assert_eq!(stored.sync.remote_version, Some(1));
    assert_eq!(remote.get(&created.id).unwrap().version, 1);
}

#[tokio::test]
async fn test_pushed_record_pulls_back_identical() {
    let (clock, remote, device) = setup();

    let created = device
        .store
        .put(Record::new("alice", JournalEntry::new("Matin", "respiration 4-7-8"), clock.now()))
        .await
        .unwrap();
    device
        .reconciler
        .sync_pass(&CancellationToken::new())
        .await
        .unwrap();

    let other = create_device(&clock, &remote, settings());
    let pulled = other.reconciler.pull("alice").await.unwrap();
    assert_eq!(pulled.inserted, 1);

    let original = device.store.get_raw(created.id).await.unwrap();
    let copy = other.store.get_raw(created.id).await.unwrap();
    assert_eq!(copy, original);
    assert_eq!(copy.payload, created.encode().unwrap().payload);
}

/// Deux appareils partent de la version 1 synchronisée ; l'un arrive en
/// version 2, l'autre en version 3. Le dernier modifié l'emporte.
async fn diverge(
    clock: &Arc<ManualClock>,
    remote: &Arc<MemoryRemote>,
) -> (Device, Device, uuid::Uuid) {
    let phone = create_device(clock, remote, settings());
    let tablet = create_device(clock, remote, settings());

    let created = phone
        .store
        .put(Record::new("alice", JournalEntry::new("Soir", "v1"), clock.now()))
        .await
        .unwrap();
    phone
        .reconciler
        .sync_pass(&CancellationToken::new())
        .await
        .unwrap();
    tablet.reconciler.pull("alice").await.unwrap();

    (phone, tablet, created.id)
}

async fn edit(device: &Device, clock: &ManualClock, id: uuid::Uuid, body: &str) {
    clock.advance(ChronoDuration::seconds(10));
    let current: Record<JournalEntry> = device.store.get(id).await.unwrap();
    device
        .store
        .put(current.revise(JournalEntry::new("Soir", body)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_conflict_remote_newer_wins() {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let (phone, tablet, id) = diverge(&clock, &remote).await;

    // Le téléphone modifie une fois (v2), la tablette deux fois plus tard (v3)
    edit(&phone, &clock, id, "téléphone").await;
    edit(&tablet, &clock, id, "tablette brouillon").await;
    edit(&tablet, &clock, id, "tablette").await;

    let cancel = CancellationToken::new();
    let report = tablet.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.outcome(&id), Some(&RecordOutcome::Synced { version: 3 }));

    let report = phone.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.outcome(&id), Some(&RecordOutcome::RemoteWon { version: 3 }));
    assert_eq!(report.replaced_locally(), vec![id]);

    let resolved: Record<JournalEntry> = phone.store.get(id).await.unwrap();
    assert_eq!(resolved.payload.body, "tablette");
    assert_eq!(resolved.id, id);
    assert_eq!(resolved.kind, RecordKind::Journal);
    assert_eq!(resolved.version, 3);
    assert_eq!(resolved.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_conflict_local_newer_wins() {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let (phone, tablet, id) = diverge(&clock, &remote).await;

    edit(&tablet, &clock, id, "tablette brouillon").await;
    edit(&tablet, &clock, id, "tablette").await;
    let cancel = CancellationToken::new();
    tablet.reconciler.sync_pass(&cancel).await.unwrap();

    // Modifié après la tablette, mais sur une base périmée
    edit(&phone, &clock, id, "téléphone").await;
    let report = phone.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.outcome(&id), Some(&RecordOutcome::LocalWon { version: 4 }));

    let on_server = remote.get(&id).unwrap().decode::<JournalEntry>().unwrap();
    assert_eq!(on_server.payload.body, "téléphone");
    assert_eq!(on_server.version, 4);

    // La tablette converge au prochain pull
    let pulled = tablet.reconciler.pull("alice").await.unwrap();
    assert_eq!(pulled.updated, vec![id]);
    let converged: Record<JournalEntry> = tablet.store.get(id).await.unwrap();
    assert_eq!(converged.payload.body, "téléphone");
    assert_eq!(converged.version, 4);
}

#[tokio::test]
async fn test_conflict_tie_goes_to_remote() {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let (phone, tablet, id) = diverge(&clock, &remote).await;

    // Même instant des deux côtés
    clock.advance(ChronoDuration::seconds(10));
    for (device, body) in [(&tablet, "tablette"), (&phone, "téléphone")] {
        let current: Record<JournalEntry> = device.store.get(id).await.unwrap();
        device
            .store
            .put(current.revise(JournalEntry::new("Soir", body)))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    tablet.reconciler.sync_pass(&cancel).await.unwrap();
    let report = phone.reconciler.sync_pass(&cancel).await.unwrap();

    // Version distante (2) pas au-dessus de la locale (2) : adoptée en 3 puis renvoyée
    assert_eq!(report.outcome(&id), Some(&RecordOutcome::RemoteWon { version: 3 }));
    let resolved: Record<JournalEntry> = phone.store.get(id).await.unwrap();
    assert_eq!(resolved.payload.body, "tablette");
    assert_eq!(resolved.version, 3);
    assert!(resolved.is_synced());
    assert_eq!(remote.get(&id).unwrap().version, 3);
}

#[tokio::test]
async fn test_timeouts_keep_record_pending_with_growing_delays() {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let device = create_device(
        &clock,
        &remote,
        SyncSettings {
            remote_timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                max_attempts: 10,
                ..settings().retry
            },
        },
    );

    let created = device
        .store
        .put(Record::new("alice", MoodEntry::new(3, 3, 3), clock.now()))
        .await
        .unwrap();
    remote.set_hang(true);

    let cancel = CancellationToken::new();
    let mut delays = Vec::new();
    for attempt in 1..=4u32 {
        let report = device.reconciler.sync_pass(&cancel).await.unwrap();
        match report.outcome(&created.id) {
            Some(RecordOutcome::Retrying {
                attempts,
                delay,
                next_attempt_at,
            }) => {
                assert_eq!(*attempts, attempt);
                assert!(*next_attempt_at > clock.now());
                delays.push(*delay);
            }
            other => panic!("attempt {}: unexpected outcome {:?}", attempt, other),
        }

        let stored = device.store.get_raw(created.id).await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.sync.attempts, attempt);
        assert!(stored.sync.last_error.unwrap().contains("timed out"));

        clock.advance(ChronoDuration::hours(1));
    }

    assert!(delays[3] > delays[2], "{:?}", delays);
    assert!(delays.windows(2).all(|pair| pair[1] > pair[0]), "{:?}", delays);
}

#[tokio::test]
async fn test_record_waits_for_its_backoff_deadline() {
    let (clock, remote, device) = setup();

    let created = device
        .store
        .put(Record::new("alice", MoodEntry::new(3, 3, 3), clock.now()))
        .await
        .unwrap();
    remote.fail_next(1);

    let cancel = CancellationToken::new();
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.retrying(), 1);
    assert_eq!(remote.push_count(), 1);

    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert!(matches!(
        report.outcome(&created.id),
        Some(RecordOutcome::Deferred { .. })
    ));
    assert_eq!(remote.push_count(), 1);

    clock.advance(ChronoDuration::minutes(5));
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(
        report.outcome(&created.id),
        Some(&RecordOutcome::Synced { version: 1 })
    );
    assert_eq!(device.store.get_raw(created.id).await.unwrap().sync.attempts, 0);
}

#[tokio::test]
async fn test_retries_exhausted_marks_failed() {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let device = create_device(
        &clock,
        &remote,
        SyncSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                ..settings().retry
            },
            ..settings()
        },
    );

    let created = device
        .store
        .put(Record::new("alice", MoodEntry::new(1, 1, 5), clock.now()))
        .await
        .unwrap();
    remote.fail_next(100);

    let cancel = CancellationToken::new();
    for _ in 0..2 {
        let report = device.reconciler.sync_pass(&cancel).await.unwrap();
        assert_eq!(report.retrying(), 1);
        clock.advance(ChronoDuration::hours(1));
    }
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.failed(), 1);

    let stored = device.store.get_raw(created.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Failed);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_rejected_record_waits_for_explicit_retry() {
    let (clock, remote, device) = setup();

    let journal = device
        .store
        .put(Record::new("alice", JournalEntry::new("Nuit", "insomnie"), clock.now()))
        .await
        .unwrap();
    let mood = device
        .store
        .put(Record::new("alice", MoodEntry::new(2, 1, 4), clock.now()))
        .await
        .unwrap();
    remote.reject_when(|r| (r.kind == RecordKind::Journal).then(|| "body too long".to_string()));

    let cancel = CancellationToken::new();
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(
        report.outcome(&journal.id),
        Some(&RecordOutcome::Failed {
            reason: "body too long".to_string()
        })
    );
    assert_eq!(
        report.outcome(&mood.id),
        Some(&RecordOutcome::Synced { version: 1 })
    );

    let failed = device.reconciler.failed_records(Some("alice")).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].sync.last_error.as_deref(), Some("body too long"));
    assert!(device.reconciler.failed_records(Some("bob")).await.unwrap().is_empty());

    // Pas de nouvel essai automatique
    let pushes = remote.push_count();
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.outcome(&journal.id), Some(&RecordOutcome::AwaitingRetry));
    assert_eq!(remote.push_count(), pushes);

    remote.clear_rejections();
    assert!(device.reconciler.retry_failed(journal.id).await.unwrap());
    assert!(!device.reconciler.retry_failed(journal.id).await.unwrap());
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(
        report.outcome(&journal.id),
        Some(&RecordOutcome::Synced { version: 1 })
    );
}

#[tokio::test]
async fn test_retry_all_failed_requeues_owner_records() {
    let (clock, remote, device) = setup();

    for owner in ["alice", "alice", "bob"] {
        device
            .store
            .put(Record::new(owner, MoodEntry::new(3, 3, 3), clock.now()))
            .await
            .unwrap();
    }
    remote.reject_when(|_| Some("maintenance".to_string()));

    let cancel = CancellationToken::new();
    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(report.failed(), 3);

    assert_eq!(device.reconciler.retry_all_failed(Some("alice")).await.unwrap(), 2);
    assert_eq!(device.reconciler.failed_records(None).await.unwrap().len(), 1);
    assert_eq!(device.reconciler.retry_all_failed(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_pass_leaves_record_pending() {
    let (clock, remote, device) = create_slow_device();

    let created = device
        .store
        .put(Record::new("alice", MoodEntry::new(4, 4, 1), clock.now()))
        .await
        .unwrap();
    remote.set_hang(true);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = device.reconciler.sync_pass(&cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.outcome(&created.id), Some(&RecordOutcome::Interrupted));

    let stored = device.store.get_raw(created.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(stored.sync.attempts, 0);
    assert_eq!(stored.version, 1);
}

fn create_slow_device() -> (Arc<ManualClock>, Arc<MemoryRemote>, Device) {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let device = create_device(
        &clock,
        &remote,
        SyncSettings {
            remote_timeout: Duration::from_secs(30),
            ..settings()
        },
    );
    (clock, remote, device)
}

#[tokio::test]
async fn test_concurrent_pass_is_skipped() {
    let (clock, remote, device) = setup();

    device
        .store
        .put(Record::new("alice", MoodEntry::new(4, 4, 1), clock.now()))
        .await
        .unwrap();
    remote.set_hang(true);

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        device.reconciler.sync_pass(&cancel),
        device.reconciler.sync_pass(&cancel)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(!first.skipped);
    assert_eq!(first.retrying(), 1);
    assert!(second.skipped);
    assert!(second.outcomes.is_empty());
}

#[tokio::test]
async fn test_stale_acknowledgement_keeps_local_edit() {
    let (clock, remote, device) = setup();

    let created = device
        .store
        .put(Record::new("alice", MoodEntry::new(3, 3, 3), clock.now()))
        .await
        .unwrap();
    let raw = device.store.get_raw(created.id).await.unwrap();

    // Modification locale entre la lecture de la file et l'acquittement
    device
        .store
        .put(created.clone().revise(MoodEntry::new(5, 5, 1)))
        .await
        .unwrap();
    assert!(!device.store.mark_synced(raw.id, raw.version, 1).await.unwrap());

    let report = device
        .reconciler
        .sync_pass(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        report.outcome(&created.id),
        Some(&RecordOutcome::Synced { version: 2 })
    );
    let on_server = remote.get(&created.id).unwrap().decode::<MoodEntry>().unwrap();
    assert_eq!(on_server.payload, MoodEntry::new(5, 5, 1));
}

#[tokio::test]
async fn test_pull_advances_checkpoint_and_keeps_pending_edits() {
    let (clock, remote, device) = setup();

    let mut seeded = Vec::new();
    for (owner, mood) in [("alice", 1), ("alice", 2), ("bob", 3)] {
        clock.advance(ChronoDuration::minutes(1));
        let record = Record::new(owner, MoodEntry::new(mood, 3, 3), clock.now());
        remote.insert(record.encode().unwrap());
        seeded.push(record);
    }

    let report = device.reconciler.pull("alice").await.unwrap();
    assert_eq!(report.inserted, 2);
    assert!(!report.deferred);
    assert_eq!(report.checkpoint, Some(remote.last_seq()));
    assert_eq!(
        device.store.checkpoint("alice").await.unwrap(),
        Some(remote.last_seq())
    );

    // Rien de neuf depuis le point de reprise
    let report = device.reconciler.pull("alice").await.unwrap();
    assert_eq!(report.inserted, 0);
    assert!(report.updated.is_empty());

    // Modification locale en attente, puis version distante plus récente
    let local: Record<MoodEntry> = device.store.get(seeded[0].id).await.unwrap();
    device
        .store
        .put(local.revise(MoodEntry::new(5, 5, 5)))
        .await
        .unwrap();
    clock.advance(ChronoDuration::minutes(1));
    let mut newer = seeded[0].clone().revise(MoodEntry::new(1, 1, 1));
    newer.last_modified = clock.now();
    remote.insert(newer.encode().unwrap());

    let report = device.reconciler.pull("alice").await.unwrap();
    assert_eq!(report.kept_local, 1);
    let kept: Record<MoodEntry> = device.store.get(seeded[0].id).await.unwrap();
    assert_eq!(kept.payload, MoodEntry::new(5, 5, 5));
    assert_eq!(kept.sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn test_pull_offline_is_deferred() {
    let (clock, remote, device) = setup();
    let record = Record::new("alice", MoodEntry::new(4, 4, 4), clock.now());
    remote.insert(record.encode().unwrap());
    remote.set_offline(true);

    let report = device.reconciler.pull("alice").await.unwrap();
    assert!(report.deferred);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.checkpoint, None);
    assert_eq!(device.store.checkpoint("alice").await.unwrap(), None);

    // Le pull suivant reprend au même point
    remote.set_offline(false);
    let report = device.reconciler.pull("alice").await.unwrap();
    assert!(!report.deferred);
    assert_eq!(report.inserted, 1);
    assert!(device.store.find_raw(record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_pull_receives_late_push_of_an_older_edit() {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());
    let phone = create_device(&clock, &remote, settings());
    let tablet = create_device(&clock, &remote, settings());
    let cancel = CancellationToken::new();

    // Saisie hors ligne sur le téléphone, datée avant tout le reste
    let offline_edit = phone
        .store
        .put(Record::new("alice", MoodEntry::new(1, 2, 5), clock.now()))
        .await
        .unwrap();

    clock.advance(ChronoDuration::seconds(10));
    tablet
        .store
        .put(Record::new("alice", MoodEntry::new(4, 4, 1), clock.now()))
        .await
        .unwrap();
    tablet.reconciler.sync_pass(&cancel).await.unwrap();
    let first = tablet.reconciler.pull("alice").await.unwrap();
    assert_eq!(first.inserted, 0);

    // Le téléphone revient en ligne bien plus tard
    let report = phone.reconciler.sync_pass(&cancel).await.unwrap();
    assert_eq!(
        report.outcome(&offline_edit.id),
        Some(&RecordOutcome::Synced { version: 1 })
    );

    let second = tablet.reconciler.pull("alice").await.unwrap();
    assert_eq!(second.inserted, 1);
    assert!(second.checkpoint > first.checkpoint);
    let received: Record<MoodEntry> = tablet.store.get(offline_edit.id).await.unwrap();
    assert_eq!(received.payload, MoodEntry::new(1, 2, 5));
    assert_eq!(received.last_modified, offline_edit.last_modified);
}

#[tokio::test]
async fn test_lost_acknowledgement_is_not_a_conflict() {
    let (clock, remote, device) = setup();

    let created = device
        .store
        .put(Record::new("alice", JournalEntry::new("Midi", "marche"), clock.now()))
        .await
        .unwrap();
    // Le serveur a appliqué l'envoi, la réponse n'est jamais arrivée
    remote.insert(device.store.get_raw(created.id).await.unwrap());

    let report = device
        .reconciler
        .sync_pass(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcome(&created.id),
        Some(&RecordOutcome::Synced { version: 1 })
    );
    assert!(report.replaced_locally().is_empty());
    assert_eq!(remote.push_count(), 1);
    let stored = device.store.get_raw(created.id).await.unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.sync.remote_version, Some(1));
    assert_eq!(remote.get(&created.id).unwrap().version, 1);
}

#[tokio::test]
async fn test_pending_records_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("serein.db");
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new());

    let id = {
        let store = DurableStore::open(&path, StoreOptions::default(), clock.clone()).unwrap();
        store
            .put(Record::new("alice", MoodEntry::new(2, 3, 4), clock.now()))
            .await
            .unwrap()
            .id
    };

    let store = Arc::new(DurableStore::open(&path, StoreOptions::default(), clock.clone()).unwrap());
    let reconciler = SyncReconciler::new(store.clone(), remote.clone(), settings(), clock.clone());
    let report = reconciler.sync_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome(&id), Some(&RecordOutcome::Synced { version: 1 }));
    assert!(store.get_raw(id).await.unwrap().is_synced());
}
