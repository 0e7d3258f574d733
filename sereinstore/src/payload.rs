//! Payloads typés des enregistrements
//!
//! Chaque type de payload déclare sa nature ([`RecordKind`]) et son encodage.
//! Séances, humeurs et notes de journal sont encodées en JSON ; un blob audio
//! est encadré par un en-tête JSON suivi des octets bruts, métadonnées et
//! contenu formant un seul enregistrement.

use crate::error::{Result, StoreError};
use crate::record::RecordKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload d'un enregistrement durable
pub trait RecordPayload: Sized + Send + Sync + 'static {
    /// Nature des enregistrements portant ce payload
    const KIND: RecordKind;

    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Implémente [`RecordPayload`] par sérialisation JSON
macro_rules! json_payload {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl RecordPayload for $ty {
                const KIND: RecordKind = $kind;

                fn encode(&self) -> Result<Vec<u8>> {
                    Ok(serde_json::to_vec(self)?)
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    Ok(serde_json::from_slice(bytes)?)
                }
            }
        )*
    };
}

/// Séance de méditation enregistrée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    /// Programme ou piste guidée suivie
    pub program_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u32,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Relevé d'humeur (échelles de 1 à 5)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub mood: u8,
    pub energy: u8,
    pub stress: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MoodEntry {
    pub fn new(mood: u8, energy: u8, stress: u8) -> Self {
        Self {
            mood,
            energy,
            stress,
            tags: Vec::new(),
            note: None,
        }
    }
}

/// Note de journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub title: String,
    pub body: String,
}

impl JournalEntry {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

json_payload! {
    SessionLog => RecordKind::Session,
    MoodEntry => RecordKind::Mood,
    JournalEntry => RecordKind::Journal,
}

/// Audio téléchargé pour l'écoute hors ligne
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlob {
    pub title: String,
    pub mime_type: String,
    pub duration_ms: Option<u64>,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct AudioBlobHeader {
    title: String,
    mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    data_len: u64,
}

impl RecordPayload for AudioBlob {
    const KIND: RecordKind = RecordKind::AudioBlob;

    // JSON compact (sans saut de ligne), '\n', puis les octets bruts
    fn encode(&self) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(&AudioBlobHeader {
            title: self.title.clone(),
            mime_type: self.mime_type.clone(),
            duration_ms: self.duration_ms,
            data_len: self.data.len() as u64,
        })?;

        let mut bytes = Vec::with_capacity(header.len() + 1 + self.data.len());
        bytes.extend_from_slice(&header);
        bytes.push(b'\n');
        bytes.extend_from_slice(&self.data);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StoreError::Codec("audio blob without header".into()))?;

        let header: AudioBlobHeader = serde_json::from_slice(&bytes[..split])?;
        let data = &bytes[split + 1..];
        if data.len() as u64 != header.data_len {
            return Err(StoreError::Codec(format!(
                "audio blob truncated: {} bytes, header announces {}",
                data.len(),
                header.data_len
            )));
        }

        Ok(Self {
            title: header.title,
            mime_type: header.mime_type,
            duration_ms: header.duration_ms,
            data: data.to_vec(),
        })
    }
}
