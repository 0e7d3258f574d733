use bytes::Bytes;
use serein::{resource_key, Engine, EngineConfigExt};
use sereinconfig::Config;
use sereinstore::{AudioBlob, JournalEntry, MoodEntry, RecordKind, StoreError, SyncStatus};
use sereinsync::{MemoryRemote, QuotaOutcome};
use sereinutils::ManualClock;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TEST_CONFIG: &str = r#"
engine:
  cache:
    max_bytes: 100000
    max_entries: 16
  quota:
    audio_max_bytes: 50000
  sync:
    remote_timeout_ms: 200
    tick_interval_ms: 10
"#;

fn create_test_engine(yaml: &str) -> (TempDir, Arc<MemoryRemote>, Engine) {
    let dir = TempDir::new().unwrap();
    let config = Config::from_yaml_str(dir.path().to_str().unwrap(), yaml).unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let engine = Engine::open_with_clock(
        &config,
        remote.clone(),
        None,
        Arc::new(ManualClock::default()),
    )
    .unwrap();
    (dir, remote, engine)
}

fn blob(size: usize) -> AudioBlob {
    AudioBlob {
        title: "Scan corporel".to_string(),
        mime_type: "audio/ogg".to_string(),
        duration_ms: Some(900_000),
        data: vec![5u8; size],
    }
}

#[test]
fn test_config_maps_to_component_settings() {
    let dir = TempDir::new().unwrap();
    let config = Config::from_yaml_str(dir.path().to_str().unwrap(), TEST_CONFIG).unwrap();

    let limits = config.cache_limits().unwrap();
    assert_eq!(limits.max_bytes, 100_000);
    assert_eq!(limits.max_entries, 16);
    assert_eq!(config.quota_policy().unwrap().audio_max_bytes, 50_000);

    let sync = config.sync_settings().unwrap();
    assert_eq!(sync.remote_timeout, Duration::from_millis(200));
    assert_eq!(sync.retry.max_attempts, 6);
    assert_eq!(sync.retry.initial_delay, Duration::from_secs(1));
    assert_eq!(config.tick_interval().unwrap(), Duration::from_millis(10));

    let path = config.store_path().unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(path.ends_with("serein.db"));
}

#[tokio::test]
async fn test_create_update_and_stats() {
    let (_dir, remote, engine) = create_test_engine(TEST_CONFIG);

    let mood = engine.create("alice", MoodEntry::new(3, 2, 4)).await.unwrap();
    let journal = engine
        .create("alice", JournalEntry::new("Jour 1", "premier essai"))
        .await
        .unwrap();
    engine.create("bob", MoodEntry::new(5, 5, 1)).await.unwrap();

    let updated = engine
        .update(journal.clone(), JournalEntry::new("Jour 1", "deuxième essai"))
        .await
        .unwrap();
    assert_eq!(updated.version, 2);

    // Copie périmée : refusée, l'enregistrement reste intact
    let err = engine
        .update(journal, JournalEntry::new("Jour 1", "écrasé"))
        .await
        .unwrap_err();
    assert!(err
        .downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_stale_write));
    let current = engine.get::<JournalEntry>(updated.id).await.unwrap();
    assert_eq!(current.payload.body, "deuxième essai");

    let stats = engine.owner_stats("alice").await.unwrap();
    assert_eq!(stats.pending_sync, 2);
    assert_eq!(stats.failed_sync, 0);
    assert!(stats.storage_bytes > 0);
    assert!(!stats.is_up_to_date());

    remote.reject_when(move |r| (r.id == mood.id).then(|| "invalid scale".to_string()));
    engine.tick(&CancellationToken::new()).await.unwrap();

    let stats = engine.owner_stats("alice").await.unwrap();
    assert_eq!(stats.pending_sync, 0);
    assert_eq!(stats.failed_sync, 1);
    assert_eq!(engine.failed_records("alice").await.unwrap().len(), 1);
    assert!(engine.owner_stats("bob").await.unwrap().is_up_to_date());
}

#[tokio::test]
async fn test_audio_is_served_from_cache() {
    let (_dir, _remote, engine) = create_test_engine(TEST_CONFIG);

    let (record, report) = engine.save_audio_blob("alice", blob(1_000)).await.unwrap();
    assert_eq!(report.outcome, QuotaOutcome::WithinBudget);
    assert_eq!(record.kind, RecordKind::AudioBlob);

    let first = engine.audio(record.id).await.unwrap();
    assert_eq!(first, Bytes::from(vec![5u8; 1_000]));
    assert!(engine.cache().contains(&resource_key(record.id)));

    let second = engine.audio(record.id).await.unwrap();
    assert_eq!(second, first);
    let stats = engine.owner_stats("alice").await.unwrap();
    assert_eq!(stats.cache_bytes, 1_000);
    assert!(stats.cache_hit_rate > 0.0);
}

#[tokio::test]
async fn test_saving_audio_enforces_the_quota() {
    let (_dir, _remote, engine) = create_test_engine(TEST_CONFIG);
    let cancel = CancellationToken::new();

    let (old, _) = engine.save_audio_blob("alice", blob(30_000)).await.unwrap();
    engine.tick(&cancel).await.unwrap();
    assert!(engine.get::<AudioBlob>(old.id).await.unwrap().is_synced());

    // Le nouveau blob fait dépasser le budget : l'ancien, synchronisé, part
    let (new, report) = engine.save_audio_blob("alice", blob(30_000)).await.unwrap();
    assert_eq!(report.outcome, QuotaOutcome::Reclaimed);
    assert_eq!(report.evicted, vec![old.id]);
    assert!(engine.store().find_raw(old.id).await.unwrap().is_none());
    assert_eq!(
        engine.get::<AudioBlob>(new.id).await.unwrap().sync_status,
        SyncStatus::Pending
    );

    // Le blob non synchronisé ne peut pas être évincé
    let (_, report) = engine.save_audio_blob("alice", blob(30_000)).await.unwrap();
    assert_eq!(report.outcome, QuotaOutcome::BudgetUnreachable);
    assert!(report.evicted.is_empty());
}

#[tokio::test]
async fn test_generic_audio_writes_enforce_the_quota() {
    let (_dir, _remote, engine) = create_test_engine(TEST_CONFIG);
    let cancel = CancellationToken::new();

    let first = engine.create("alice", blob(30_000)).await.unwrap();
    engine.tick(&cancel).await.unwrap();

    // Création : l'ancien blob synchronisé laisse la place
    let second = engine.create("alice", blob(30_000)).await.unwrap();
    assert!(engine.store().find_raw(first.id).await.unwrap().is_none());
    let used = engine
        .store()
        .partition_usage(RecordKind::AudioBlob)
        .await
        .unwrap();
    assert!(used <= 50_000, "audio partition at {}", used);

    // Modification qui fait grossir un blob
    engine.tick(&cancel).await.unwrap();
    let small = engine.create("alice", blob(10_000)).await.unwrap();
    engine.tick(&cancel).await.unwrap();
    engine.update(small, blob(25_000)).await.unwrap();
    assert!(engine.store().find_raw(second.id).await.unwrap().is_none());
    let used = engine
        .store()
        .partition_usage(RecordKind::AudioBlob)
        .await
        .unwrap();
    assert!(used <= 50_000, "audio partition at {}", used);
}

#[tokio::test]
async fn test_pull_while_offline_is_deferred() {
    let (_dir, remote, engine) = create_test_engine(TEST_CONFIG);
    remote.set_offline(true);

    let report = engine.pull("alice").await.unwrap();
    assert!(report.deferred);
    assert_eq!(report.checkpoint, None);
}

#[tokio::test]
async fn test_evicted_audio_comes_back_with_pull() {
    let (_dir, _remote, engine) = create_test_engine(TEST_CONFIG);
    let cancel = CancellationToken::new();

    let (old, _) = engine.save_audio_blob("alice", blob(30_000)).await.unwrap();
    engine.tick(&cancel).await.unwrap();
    engine.save_audio_blob("alice", blob(30_000)).await.unwrap();
    assert!(engine.store().find_raw(old.id).await.unwrap().is_none());

    let report = engine.pull("alice").await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(engine.audio(old.id).await.unwrap().len(), 30_000);
}

#[tokio::test]
async fn test_offline_then_connectivity_regained() {
    let (_dir, remote, engine) = create_test_engine(TEST_CONFIG);
    let cancel = CancellationToken::new();

    engine.set_online(false);
    let mood = engine.create("alice", MoodEntry::new(2, 2, 2)).await.unwrap();
    let report = engine.tick(&cancel).await.unwrap();
    assert!(report.sync.is_none());
    assert!(remote.is_empty());

    let report = engine.connectivity_regained(&cancel).await.unwrap();
    assert_eq!(report.sync.unwrap().synced(), 1);
    assert_eq!(remote.get(&mood.id).unwrap().version, 1);
}

#[tokio::test]
async fn test_spawned_scheduler_syncs_until_cancelled() {
    let (_dir, remote, engine) = create_test_engine(TEST_CONFIG);
    let mood = engine.create("alice", MoodEntry::new(4, 4, 2)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = engine.spawn_scheduler(cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(remote.get(&mood.id).is_some());
    assert!(engine.get::<MoodEntry>(mood.id).await.unwrap().is_synced());
}
