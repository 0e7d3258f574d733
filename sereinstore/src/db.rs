//! Couche SQLite du store durable
//!
//! Toutes les opérations sont synchrones ; [`crate::DurableStore`] les exécute
//! hors des workers async. Chaque écriture tient en une instruction
//! conditionnelle ou en une transaction `IMMEDIATE`, ce qui la rend atomique
//! et la sérialise entre les processus partageant le même fichier.

use crate::error::{Result, StoreError};
use crate::record::{RawRecord, Record, RecordKind, SyncMeta, SyncStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload BLOB NOT NULL,
        size_bytes INTEGER NOT NULL,
        version INTEGER NOT NULL,
        sync_status TEXT NOT NULL,
        created_at_us INTEGER NOT NULL,
        last_modified_us INTEGER NOT NULL,
        remote_version INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0,
        next_attempt_at_us INTEGER,
        last_error TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_records_owner ON records (owner_id, kind);
    CREATE INDEX IF NOT EXISTS idx_records_status ON records (sync_status, last_modified_us);
    CREATE INDEX IF NOT EXISTS idx_records_modified ON records (last_modified_us);
    CREATE INDEX IF NOT EXISTS idx_records_kind ON records (kind, sync_status, last_modified_us);

    CREATE TABLE IF NOT EXISTS pull_checkpoints (
        owner_id TEXT PRIMARY KEY,
        change_seq INTEGER NOT NULL
    );
";

const RECORD_COLUMNS: &str = "id, owner_id, kind, payload, version, sync_status, created_at_us, \
     last_modified_us, remote_version, attempts, next_attempt_at_us, last_error";

/// Résultat de l'application d'un enregistrement distant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Absent localement : inséré comme synchronisé
    Inserted,
    /// Copie locale synchronisée et plus ancienne : remplacée
    Updated,
    /// Copie locale conservée (modifiée localement, ou déjà à jour)
    KeptLocal,
}

/// Enregistrement audio susceptible d'être évincé par le contrôle de quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: Uuid,
    pub version: u64,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Corrupted(format!("invalid timestamp {}", us)))
}

/// Ligne brute de la table `records`
struct RecordRow {
    id: String,
    owner_id: String,
    kind: String,
    payload: Vec<u8>,
    version: i64,
    sync_status: String,
    created_at_us: i64,
    last_modified_us: i64,
    remote_version: Option<i64>,
    attempts: i64,
    next_attempt_at_us: Option<i64>,
    last_error: Option<String>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            kind: row.get(2)?,
            payload: row.get(3)?,
            version: row.get(4)?,
            sync_status: row.get(5)?,
            created_at_us: row.get(6)?,
            last_modified_us: row.get(7)?,
            remote_version: row.get(8)?,
            attempts: row.get(9)?,
            next_attempt_at_us: row.get(10)?,
            last_error: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<RawRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupted(format!("invalid id '{}': {}", self.id, e)))?;

        Ok(Record {
            id,
            owner_id: self.owner_id,
            kind: self.kind.parse()?,
            payload: self.payload,
            version: self.version as u64,
            sync_status: self.sync_status.parse()?,
            created_at: from_micros(self.created_at_us)?,
            last_modified: from_micros(self.last_modified_us)?,
            sync: SyncMeta {
                remote_version: self.remote_version.map(|v| v as u64),
                attempts: self.attempts as u32,
                next_attempt_at: self.next_attempt_at_us.map(from_micros).transpose()?,
                last_error: self.last_error,
            },
        })
    }
}

fn select_records<P: Params>(conn: &Connection, clause: &str, params: P) -> Result<Vec<RawRecord>> {
    let sql = format!("SELECT {} FROM records {}", RECORD_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, RecordRow::from_row)?;
    let records = rows
        .map(|row| row.map_err(StoreError::from).and_then(RecordRow::into_record))
        .collect::<Result<Vec<_>>>()?;
    Ok(records)
}

fn load(conn: &Connection, id: &Uuid) -> Result<Option<RawRecord>> {
    let mut records = select_records(conn, "WHERE id = ?1", params![id.to_string()])?;
    Ok(records.pop())
}

/// Base SQLite des enregistrements
#[derive(Debug)]
pub(crate) struct RecordDb {
    conn: Connection,
    /// Plafond sur la somme des payloads (0 = illimité)
    max_bytes: u64,
}

impl RecordDb {
    pub(crate) fn open(path: &Path, max_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, max_bytes)
    }

    pub(crate) fn open_in_memory(max_bytes: u64) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, max_bytes)
    }

    fn init(conn: Connection, max_bytes: u64) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", &"WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, max_bytes })
    }

    // ---- Écritures locales ----

    /// Écriture locale d'un enregistrement (création ou modification)
    ///
    /// La version persistée est `stockée + 1` (1 pour un nouvel identifiant),
    /// `last_modified = now` et le statut repasse à `pending`.
    pub(crate) fn put(&mut self, record: &RawRecord, now: DateTime<Utc>) -> Result<RawRecord> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored = tx
            .query_row(
                "SELECT version, kind, created_at_us, size_bytes FROM records WHERE id = ?1",
                params![record.id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let (version, created_at_us, previous_size) = match stored {
            Some((stored_version, kind, created_at_us, size)) => {
                let stored_version = stored_version as u64;
                if stored_version >= record.version {
                    return Err(StoreError::StaleWrite {
                        id: record.id,
                        stored: stored_version,
                        proposed: record.version,
                    });
                }
                let kind: RecordKind = kind.parse()?;
                if kind != record.kind {
                    return Err(StoreError::KindMismatch {
                        id: record.id,
                        expected: kind,
                        found: record.kind,
                    });
                }
                (stored_version + 1, created_at_us, size as u64)
            }
            None => (1, to_micros(record.created_at), 0),
        };

        let size = record.size_bytes();
        if self.max_bytes > 0 {
            let used: i64 = tx.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM records",
                [],
                |row| row.get(0),
            )?;
            let used_by_others = (used as u64).saturating_sub(previous_size);
            if used_by_others + size > self.max_bytes {
                return Err(StoreError::QuotaExceeded {
                    requested: size,
                    available: self.max_bytes.saturating_sub(used_by_others),
                });
            }
        }

        tx.execute(
            "INSERT INTO records (id, owner_id, kind, payload, size_bytes, version, sync_status,
                                  created_at_us, last_modified_us, remote_version, attempts,
                                  next_attempt_at_us, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, NULL, 0, NULL, NULL)
             ON CONFLICT(id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 payload = excluded.payload,
                 size_bytes = excluded.size_bytes,
                 version = excluded.version,
                 sync_status = 'pending',
                 last_modified_us = excluded.last_modified_us,
                 attempts = 0,
                 next_attempt_at_us = NULL,
                 last_error = NULL",
            params![
                record.id.to_string(),
                record.owner_id,
                record.kind.as_str(),
                record.payload,
                size as i64,
                version as i64,
                created_at_us,
                to_micros(now),
            ],
        )?;

        let persisted = load(&tx, &record.id)?.ok_or(StoreError::NotFound(record.id))?;
        tx.commit()?;
        Ok(persisted)
    }

    pub(crate) fn delete(&mut self, id: &Uuid) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    // ---- Lectures ----

    pub(crate) fn get(&self, id: &Uuid) -> Result<Option<RawRecord>> {
        load(&self.conn, id)
    }

    pub(crate) fn list_by_owner(&self, owner: &str, kind: Option<RecordKind>) -> Result<Vec<RawRecord>> {
        select_records(
            &self.conn,
            "WHERE owner_id = ?1 AND (?2 IS NULL OR kind = ?2) ORDER BY last_modified_us, id",
            params![owner, kind.map(|k| k.as_str())],
        )
    }

    pub(crate) fn list_by_status(&self, status: SyncStatus) -> Result<Vec<RawRecord>> {
        select_records(
            &self.conn,
            "WHERE sync_status = ?1 ORDER BY last_modified_us, id",
            params![status.as_str()],
        )
    }

    pub(crate) fn list_modified_since(&self, owner: &str, since: DateTime<Utc>) -> Result<Vec<RawRecord>> {
        select_records(
            &self.conn,
            "WHERE owner_id = ?1 AND last_modified_us > ?2 ORDER BY last_modified_us, id",
            params![owner, to_micros(since)],
        )
    }

    /// File de synchronisation : tout ce qui n'est pas `synced`, le plus ancien d'abord
    pub(crate) fn sync_queue(&self) -> Result<Vec<RawRecord>> {
        select_records(
            &self.conn,
            "WHERE sync_status != 'synced' ORDER BY last_modified_us, id",
            [],
        )
    }

    pub(crate) fn count_by_status(&self, owner: Option<&str>, status: SyncStatus) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE sync_status = ?1 AND (?2 IS NULL OR owner_id = ?2)",
            params![status.as_str(), owner],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub(crate) fn partition_usage(&self, kind: RecordKind) -> Result<u64> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM records WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }

    pub(crate) fn usage_by_owner(&self, owner: &str) -> Result<u64> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM records WHERE owner_id = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }

    pub(crate) fn total_bytes(&self) -> Result<u64> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM records",
            [],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }

    // ---- Opérations du moteur de synchronisation ----
    //
    // Aucune ne change `last_modified` ni n'incrémente la version d'une écriture
    // locale. Toutes sont conditionnées à la version observée par l'appelant :
    // une modification locale intervenue entre-temps n'est jamais écrasée.

    /// Acquittement du serveur : `synced`, version acquittée
    pub(crate) fn mark_synced(&self, id: &Uuid, expected_version: u64, acknowledged: u64) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE records
             SET version = ?3, remote_version = ?3, sync_status = 'synced',
                 attempts = 0, next_attempt_at_us = NULL, last_error = NULL
             WHERE id = ?1 AND version = ?2 AND ?3 >= version",
            params![id.to_string(), expected_version as i64, acknowledged as i64],
        )?;
        Ok(updated > 0)
    }

    /// Échec temporaire : reste `pending`, retourne le nombre d'échecs consécutifs
    pub(crate) fn record_transient_failure(
        &self,
        id: &Uuid,
        expected_version: u64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Option<u32>> {
        let attempts = self
            .conn
            .query_row(
                "UPDATE records
                 SET attempts = attempts + 1, next_attempt_at_us = ?3, last_error = ?4
                 WHERE id = ?1 AND version = ?2 AND sync_status = 'pending'
                 RETURNING attempts",
                params![
                    id.to_string(),
                    expected_version as i64,
                    to_micros(next_attempt_at),
                    error
                ],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(attempts.map(|a| a as u32))
    }

    pub(crate) fn mark_failed(&self, id: &Uuid, expected_version: u64, reason: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE records
             SET sync_status = 'failed', next_attempt_at_us = NULL, last_error = ?3
             WHERE id = ?1 AND version = ?2 AND sync_status != 'synced'",
            params![id.to_string(), expected_version as i64, reason],
        )?;
        Ok(updated > 0)
    }

    pub(crate) fn reset_failed(&self, id: &Uuid) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE records
             SET sync_status = 'pending', attempts = 0, next_attempt_at_us = NULL, last_error = NULL
             WHERE id = ?1 AND sync_status = 'failed'",
            params![id.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub(crate) fn reset_all_failed(&self, owner: Option<&str>) -> Result<usize> {
        let updated = self.conn.execute(
            "UPDATE records
             SET sync_status = 'pending', attempts = 0, next_attempt_at_us = NULL, last_error = NULL
             WHERE sync_status = 'failed' AND (?1 IS NULL OR owner_id = ?1)",
            params![owner],
        )?;
        Ok(updated)
    }

    /// Conflit gagné localement : la version locale passe au-dessus de la
    /// version distante et l'enregistrement repart en attente d'envoi
    pub(crate) fn rebase(
        &self,
        id: &Uuid,
        expected_version: u64,
        new_version: u64,
        remote_version: u64,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE records
             SET version = ?3, remote_version = ?4, sync_status = 'pending',
                 attempts = 0, next_attempt_at_us = NULL, last_error = NULL
             WHERE id = ?1 AND version = ?2 AND ?3 > version",
            params![
                id.to_string(),
                expected_version as i64,
                new_version as i64,
                remote_version as i64
            ],
        )?;
        Ok(updated > 0)
    }

    /// Conflit perdu localement : le payload distant remplace le payload local
    ///
    /// L'identifiant, le propriétaire et la nature locale sont conservés. Si la
    /// version distante dépasse la version locale, l'enregistrement est
    /// `synced` à cette version ; sinon il prend `locale + 1` et reste `pending`
    /// pour être renvoyé, afin que la version ne recule jamais.
    pub(crate) fn resolve_remote_win(
        &mut self,
        id: &Uuid,
        expected_version: u64,
        remote: &RawRecord,
    ) -> Result<Option<RawRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(local) = load(&tx, id)? else {
            return Ok(None);
        };
        if local.version != expected_version {
            return Ok(None);
        }

        let (version, status) = if remote.version > local.version {
            (remote.version, SyncStatus::Synced)
        } else {
            (local.version + 1, SyncStatus::Pending)
        };

        tx.execute(
            "UPDATE records
             SET payload = ?2, size_bytes = ?3, version = ?4, remote_version = ?5,
                 sync_status = ?6, last_modified_us = ?7,
                 attempts = 0, next_attempt_at_us = NULL, last_error = NULL
             WHERE id = ?1",
            params![
                id.to_string(),
                remote.payload,
                remote.size_bytes() as i64,
                version as i64,
                remote.version as i64,
                status.as_str(),
                to_micros(remote.last_modified),
            ],
        )?;

        let resolved = load(&tx, id)?;
        tx.commit()?;
        Ok(resolved)
    }

    /// Applique un enregistrement reçu du serveur (amorçage après une longue
    /// période hors ligne)
    pub(crate) fn apply_remote(&mut self, remote: &RawRecord) -> Result<ApplyOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match load(&tx, &remote.id)? {
            None => {
                tx.execute(
                    "INSERT INTO records (id, owner_id, kind, payload, size_bytes, version,
                                          sync_status, created_at_us, last_modified_us,
                                          remote_version, attempts, next_attempt_at_us, last_error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'synced', ?7, ?8, ?6, 0, NULL, NULL)",
                    params![
                        remote.id.to_string(),
                        remote.owner_id,
                        remote.kind.as_str(),
                        remote.payload,
                        remote.size_bytes() as i64,
                        remote.version as i64,
                        to_micros(remote.created_at),
                        to_micros(remote.last_modified),
                    ],
                )?;
                ApplyOutcome::Inserted
            }
            Some(local) if local.is_synced() && remote.version > local.version => {
                tx.execute(
                    "UPDATE records
                     SET payload = ?2, size_bytes = ?3, version = ?4, remote_version = ?4,
                         last_modified_us = ?5
                     WHERE id = ?1",
                    params![
                        remote.id.to_string(),
                        remote.payload,
                        remote.size_bytes() as i64,
                        remote.version as i64,
                        to_micros(remote.last_modified),
                    ],
                )?;
                ApplyOutcome::Updated
            }
            Some(_) => ApplyOutcome::KeptLocal,
        };

        tx.commit()?;
        Ok(outcome)
    }

    // ---- Quota ----

    /// Enregistrements `synced` d'une partition, les moins récemment modifiés d'abord
    pub(crate) fn eviction_candidates(&self, kind: RecordKind) -> Result<Vec<EvictionCandidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, version, size_bytes, last_modified_us FROM records
             WHERE kind = ?1 AND sync_status = 'synced'
             ORDER BY last_modified_us, id",
        )?;
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (id, version, size_bytes, last_modified_us) = row?;
            candidates.push(EvictionCandidate {
                id: Uuid::parse_str(&id)
                    .map_err(|e| StoreError::Corrupted(format!("invalid id '{}': {}", id, e)))?,
                version: version as u64,
                size_bytes: size_bytes as u64,
                last_modified: from_micros(last_modified_us)?,
            });
        }
        Ok(candidates)
    }

    /// Supprime un enregistrement uniquement s'il est toujours `synced` à la
    /// version observée
    pub(crate) fn delete_if_synced(&self, id: &Uuid, version: u64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM records WHERE id = ?1 AND version = ?2 AND sync_status = 'synced'",
            params![id.to_string(), version as i64],
        )?;
        Ok(deleted > 0)
    }

    // ---- Points de reprise ----

    pub(crate) fn checkpoint(&self, owner: &str) -> Result<Option<u64>> {
        let seq = self
            .conn
            .query_row(
                "SELECT change_seq FROM pull_checkpoints WHERE owner_id = ?1",
                params![owner],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(seq.map(|seq| seq as u64))
    }

    pub(crate) fn set_checkpoint(&self, owner: &str, seq: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pull_checkpoints (owner_id, change_seq) VALUES (?1, ?2)
             ON CONFLICT(owner_id) DO UPDATE SET change_seq = MAX(change_seq, excluded.change_seq)",
            params![owner, seq as i64],
        )?;
        Ok(())
    }
}
