//! Commit plans and the write-ahead journal that makes them recoverable.
//!
//! Commit order:
//! 1. every expected fingerprint is checked against the disk;
//! 2. the plan is written to the `journal` tree and flushed;
//! 3. artifacts are written (temp file + rename) or deleted;
//! 4. ledger operations are applied and the journal entry removed in one
//!    sled transaction.
//!
//! A crash after step 2 leaves a journal entry that [`recover`] rolls
//! forward the next time the workspace opens. Steps 3 and 4 are idempotent.

use std::path::Path;

use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::fingerprint;
use crate::error::Error;
use crate::ledger::{LedgerOp, SchemaChangeLedger};

/// One artifact write or removal.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FileOp {
    /// Replace the file with `contents`.
    Write {
        path: String,
        contents: String,
        /// Fingerprint of the file when the session loaded it.
        expected: String,
    },
    /// Remove the file.
    Delete {
        path: String,
        /// Fingerprint of the file when the session loaded it.
        expected: String,
    },
}

impl FileOp {
    /// Target path.
    pub fn path(&self) -> &str {
        match self {
            FileOp::Write { path, .. } | FileOp::Delete { path, .. } => path,
        }
    }

    fn expected(&self) -> &str {
        match self {
            FileOp::Write { expected, .. } | FileOp::Delete { expected, .. } => expected,
        }
    }
}

/// Everything one command will change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPlan {
    /// Entity artifacts first, then the registry.
    pub files: Vec<FileOp>,
    /// Applied after the files.
    pub ledger: Vec<LedgerOp>,
}

/// What a commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub files_written: usize,
    pub files_deleted: usize,
    /// Ledger rows inserted or updated.
    pub ledger_rows: Vec<u64>,
}

/// A plan persisted before it is applied.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: u64,
    pub files: Vec<FileOp>,
    pub ledger: Vec<LedgerOp>,
}

impl JournalEntry {
    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize an entry from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl CommitPlan {
    /// Whether the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.ledger.is_empty()
    }

    /// Check that no artifact changed on disk since it was loaded.
    pub fn verify(&self) -> Result<(), Error> {
        for op in &self.files {
            let path = Path::new(op.path());
            let current = match std::fs::read_to_string(path) {
                Ok(text) => Some(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(Error::io(path, e)),
            };
            if fingerprint(current.as_deref()) != op.expected() {
                return Err(Error::Conflict(format!(
                    "{} changed on disk while the command was running",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Verify, journal and apply the plan.
    pub fn commit(self, ledger: &SchemaChangeLedger) -> Result<CommitReport, Error> {
        self.verify()?;
        if self.is_empty() {
            debug!("nothing to commit");
            return Ok(CommitReport::default());
        }

        let entry = JournalEntry {
            id: ledger.generate_id()?,
            files: self.files,
            ledger: self.ledger,
        };
        ledger
            .journal_tree()
            .insert(entry.id.to_be_bytes(), entry.to_bytes()?)?;
        ledger.flush()?;

        let report = apply_entry(&entry, ledger).map_err(|e| {
            error!(entry = entry.id, error = %e, "commit interrupted; it will be replayed on next open");
            e
        })?;
        info!(
            files_written = report.files_written,
            files_deleted = report.files_deleted,
            ledger_rows = report.ledger_rows.len(),
            "committed edit session"
        );
        Ok(report)
    }
}

fn apply_entry(entry: &JournalEntry, ledger: &SchemaChangeLedger) -> Result<CommitReport, Error> {
    let mut report = CommitReport::default();
    for op in &entry.files {
        match op {
            FileOp::Write { path, contents, .. } => {
                write_atomic(Path::new(path), contents)?;
                report.files_written += 1;
            }
            FileOp::Delete { path, .. } => {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io(path, e)),
                }
                report.files_deleted += 1;
            }
        }
    }
    report.ledger_rows = ledger.apply(Some(entry.id), &entry.ledger)?;
    Ok(report)
}

/// Roll forward every journal entry left by an interrupted commit.
/// Returns the number of entries replayed.
pub fn recover(ledger: &SchemaChangeLedger) -> Result<usize, Error> {
    let mut entries = Vec::new();
    for item in ledger.journal_tree().iter() {
        let (_, bytes) = item?;
        entries.push(JournalEntry::from_bytes(&bytes)?);
    }

    for entry in &entries {
        warn!(
            entry = entry.id,
            files = entry.files.len(),
            ledger_ops = entry.ledger.len(),
            "replaying interrupted commit"
        );
        apply_entry(entry, ledger)?;
    }
    Ok(entries.len())
}

/// Write a file by renaming a fully written temporary file over it.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}
