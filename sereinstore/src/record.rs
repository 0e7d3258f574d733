//! Modèle des enregistrements durables.

use crate::error::{Result, StoreError};
use crate::payload::RecordPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Nature d'un enregistrement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Session,
    Mood,
    Journal,
    AudioBlob,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Session,
        RecordKind::Mood,
        RecordKind::Journal,
        RecordKind::AudioBlob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Session => "session",
            RecordKind::Mood => "mood",
            RecordKind::Journal => "journal",
            RecordKind::AudioBlob => "audio-blob",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StoreError::Corrupted(format!("unknown record kind '{}'", s)))
    }
}

/// État de synchronisation d'un enregistrement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Modifié localement, en attente d'envoi
    Pending,
    /// Identique à la dernière version acquittée par le serveur
    Synced,
    /// Rejeté par le serveur ou tentatives épuisées
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(StoreError::Corrupted(format!("unknown sync status '{}'", other))),
        }
    }
}

/// Métadonnées de synchronisation, persistées avec l'enregistrement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Dernière version acquittée par le serveur (base des envois)
    pub remote_version: Option<u64>,
    /// Échecs temporaires consécutifs
    pub attempts: u32,
    /// Pas de nouvel envoi avant cette échéance
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Dernière erreur (raison du rejet pour un enregistrement `failed`)
    pub last_error: Option<String>,
}

/// Enregistrement durable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: RecordKind,
    pub payload: T,
    pub version: u64,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub sync: SyncMeta,
}

/// Enregistrement au payload encodé, indépendant du type
pub type RawRecord = Record<Vec<u8>>;

impl<T: RecordPayload> Record<T> {
    /// Nouvel enregistrement local, version 1, en attente de synchronisation
    pub fn new(owner_id: impl Into<String>, payload: T, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            kind: T::KIND,
            payload,
            version: 1,
            sync_status: SyncStatus::Pending,
            created_at: now,
            last_modified: now,
            sync: SyncMeta::default(),
        }
    }

    /// Encode le payload
    pub fn encode(&self) -> Result<RawRecord> {
        let payload = self.payload.encode()?;
        Ok(Record {
            id: self.id,
            owner_id: self.owner_id.clone(),
            kind: self.kind,
            payload,
            version: self.version,
            sync_status: self.sync_status,
            created_at: self.created_at,
            last_modified: self.last_modified,
            sync: self.sync.clone(),
        })
    }
}

impl<T> Record<T> {
    /// Prépare une modification locale : nouveau payload, version proposée +1
    pub fn revise(self, payload: T) -> Self {
        Self {
            payload,
            version: self.version + 1,
            ..self
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }

    /// Même enregistrement, autre représentation du payload
    pub fn with_payload<U>(self, payload: U) -> Record<U> {
        Record {
            id: self.id,
            owner_id: self.owner_id,
            kind: self.kind,
            payload,
            version: self.version,
            sync_status: self.sync_status,
            created_at: self.created_at,
            last_modified: self.last_modified,
            sync: self.sync,
        }
    }
}

impl RawRecord {
    /// Taille du payload encodé, base de la comptabilité des partitions
    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Décode le payload dans le type attendu
    pub fn decode<T: RecordPayload>(self) -> Result<Record<T>> {
        if self.kind != T::KIND {
            return Err(StoreError::KindMismatch {
                id: self.id,
                expected: T::KIND,
                found: self.kind,
            });
        }
        let payload = T::decode(&self.payload)?;
        Ok(self.with_payload(payload))
    }
}
