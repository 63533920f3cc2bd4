//! Ledger rows and the operations that produce them.

use rkyv::{Archive, Deserialize, Serialize};
use tracing::error;

use crate::error::Error;
use crate::model::FieldMap;

/// Lifecycle state of a ledger row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize,
)]
pub enum ChangeState {
    /// Draft edits waiting for the next publish.
    PendingPublish,
    /// Applied by a publish.
    Published,
    /// Model deleted, waiting for the next publish.
    PendingDelete,
    /// Deletion applied by a publish.
    Deleted,
}

impl ChangeState {
    /// Whether a publish still has to act on the row.
    pub fn is_pending(&self) -> bool {
        matches!(self, ChangeState::PendingPublish | ChangeState::PendingDelete)
    }

    /// State a publish moves this row to.
    pub fn published(&self) -> Self {
        match self {
            ChangeState::PendingPublish => ChangeState::Published,
            ChangeState::PendingDelete => ChangeState::Deleted,
            terminal => *terminal,
        }
    }
}

impl std::fmt::Display for ChangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeState::PendingPublish => write!(f, "pending_publish"),
            ChangeState::Published => write!(f, "published"),
            ChangeState::PendingDelete => write!(f, "pending_delete"),
            ChangeState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Field map value of a field removed since the last publish.
pub const REMOVED_FIELD_TYPE: &str = "(removed)";

/// Stored form of a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Row id; also the big-endian key in the changes tree.
    pub id: u64,
    /// Model the change applies to.
    pub model_name: String,
    /// Field map encoded as JSON.
    pub fields_json: String,
    /// Actor that made the change.
    pub modified_by: String,
    /// Microseconds since Unix epoch.
    pub modified_at: u64,
    /// Lifecycle state.
    pub state: ChangeState,
}

impl ChangeRecord {
    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| {
                error!(row = self.id, model = %self.model_name, error = %e, "failed to serialize ledger row");
                Error::Serialization(e.to_string())
            })
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        // Copy to aligned buffer for rkyv
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Decode the field map.
    pub fn fields(&self) -> Result<FieldMap, Error> {
        decode_fields(&self.fields_json)
    }
}

/// A ledger row as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContentTypeChange {
    pub id: u64,
    pub model_name: String,
    pub fields: FieldMap,
    pub modified_by: String,
    pub modified_at: u64,
    pub state: ChangeState,
}

impl TryFrom<ChangeRecord> for ContentTypeChange {
    type Error = Error;

    fn try_from(record: ChangeRecord) -> Result<Self, Error> {
        Ok(Self {
            fields: record.fields()?,
            id: record.id,
            model_name: record.model_name,
            modified_by: record.modified_by,
            modified_at: record.modified_at,
            state: record.state,
        })
    }
}

/// A ledger mutation, fully resolved so that applying it twice from the
/// journal writes the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum LedgerOp {
    /// Insert a row in the given state.
    AddChange {
        id: u64,
        model: String,
        fields_json: String,
        state: ChangeState,
        actor: String,
        at: u64,
    },
    /// Merge fields into the model's live draft, or insert one under `id`.
    MergeDraft {
        id: u64,
        model: String,
        fields_json: String,
        actor: String,
        at: u64,
    },
    /// Record fields removed from a model. Fields the live draft added are
    /// dropped from it; anything else is marked [`REMOVED_FIELD_TYPE`] in
    /// the live draft, which is inserted under `id` if missing.
    DropDraftFields {
        id: u64,
        model: String,
        fields: Vec<String>,
        actor: String,
        at: u64,
    },
}

impl LedgerOp {
    /// Model the operation applies to.
    pub fn model(&self) -> &str {
        match self {
            LedgerOp::AddChange { model, .. }
            | LedgerOp::MergeDraft { model, .. }
            | LedgerOp::DropDraftFields { model, .. } => model,
        }
    }
}

/// Encode a field map, logging and returning the failure.
pub fn encode_fields(model: &str, fields: &FieldMap) -> Result<String, Error> {
    serde_json::to_string(fields).map_err(|e| {
        error!(model = %model, error = %e, "failed to serialize ledger fields");
        Error::Json(e)
    })
}

/// Decode a field map.
pub fn decode_fields(json: &str) -> Result<FieldMap, Error> {
    serde_json::from_str(json).map_err(|e| {
        error!(error = %e, "failed to deserialize ledger fields");
        Error::Json(e)
    })
}

/// Current time in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
