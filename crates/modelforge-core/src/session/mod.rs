//! Edit sessions.
//!
//! A command stages every artifact edit in an [`EditSession`] value. Nothing
//! touches the disk until the session is turned into a [`CommitPlan`] and
//! committed, so a failing command leaves the workspace as it was.

mod journal;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use modelforge_lang::{Document, EditError, EntityFile, RegistryFile, SourceTree};

use crate::error::Error;
use crate::ledger::LedgerOp;

pub use journal::{recover, CommitPlan, CommitReport, FileOp, JournalEntry};
pub(crate) use journal::write_atomic;

/// Fingerprint of artifact text as observed on disk; `absent` when the
/// file does not exist.
pub fn fingerprint(text: Option<&str>) -> String {
    match text {
        Some(text) => blake3::hash(text.as_bytes()).to_hex().to_string(),
        None => "absent".to_string(),
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Unchanged,
    Entity(SourceTree<EntityFile>),
    Registry(SourceTree<RegistryFile>),
    Deleted,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Text on disk when the path was first touched.
    base: Option<String>,
    staged: Staged,
}

impl Entry {
    fn current_text(&self) -> Option<&str> {
        match &self.staged {
            Staged::Unchanged => self.base.as_deref(),
            Staged::Entity(tree) => Some(tree.as_str()),
            Staged::Registry(tree) => Some(tree.as_str()),
            Staged::Deleted => None,
        }
    }
}

/// Staged artifact edits for one command.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    entries: BTreeMap<PathBuf, Entry>,
}

impl EditSession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, path: &Path) -> Result<&mut Entry, Error> {
        if !self.entries.contains_key(path) {
            let base = read_optional(path)?;
            self.entries.insert(
                path.to_path_buf(),
                Entry {
                    base,
                    staged: Staged::Unchanged,
                },
            );
        }
        self.entries
            .get_mut(path)
            .ok_or_else(|| Error::not_found("artifact", path.display().to_string()))
    }

    /// Whether the artifact exists as of the staged edits.
    pub fn exists(&mut self, path: &Path) -> Result<bool, Error> {
        Ok(self.entry(path)?.current_text().is_some())
    }

    /// Staged or on-disk entity artifact.
    pub fn entity(&mut self, path: &Path) -> Result<Option<SourceTree<EntityFile>>, Error> {
        let entry = self.entry(path)?;
        match &entry.staged {
            Staged::Entity(tree) => Ok(Some(tree.clone())),
            Staged::Unchanged => parse_base(path, entry.base.as_deref()),
            Staged::Deleted => Ok(None),
            Staged::Registry(_) => Err(Error::Validation(format!(
                "{} is the registry, not an entity artifact",
                path.display()
            ))),
        }
    }

    /// Staged or on-disk registry artifact.
    pub fn registry(&mut self, path: &Path) -> Result<Option<SourceTree<RegistryFile>>, Error> {
        let entry = self.entry(path)?;
        match &entry.staged {
            Staged::Registry(tree) => Ok(Some(tree.clone())),
            Staged::Unchanged => parse_base(path, entry.base.as_deref()),
            Staged::Deleted => Ok(None),
            Staged::Entity(_) => Err(Error::Validation(format!(
                "{} is an entity artifact, not the registry",
                path.display()
            ))),
        }
    }

    /// Stage a new version of an entity artifact.
    pub fn stage_entity(&mut self, path: &Path, tree: SourceTree<EntityFile>) -> Result<(), Error> {
        self.entry(path)?.staged = Staged::Entity(tree);
        Ok(())
    }

    /// Stage a new version of the registry artifact.
    pub fn stage_registry(&mut self, path: &Path, tree: SourceTree<RegistryFile>) -> Result<(), Error> {
        self.entry(path)?.staged = Staged::Registry(tree);
        Ok(())
    }

    /// Stage removal of an artifact.
    pub fn stage_delete(&mut self, path: &Path) -> Result<(), Error> {
        self.entry(path)?.staged = Staged::Deleted;
        Ok(())
    }

    /// Artifacts with extension `ext` directly inside `dir`, as of the
    /// staged edits, sorted by path.
    pub fn list(&mut self, dir: &Path, ext: &str) -> Result<Vec<PathBuf>, Error> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        match std::fs::read_dir(dir) {
            Ok(read_dir) => {
                for item in read_dir {
                    let item = item.map_err(|e| Error::io(dir, e))?;
                    candidates.push(item.path());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(dir, e)),
        }
        candidates.extend(self.entries.keys().cloned());
        candidates.retain(|p| {
            p.parent() == Some(dir) && p.extension().and_then(|e| e.to_str()) == Some(ext)
        });
        candidates.sort();
        candidates.dedup();

        let mut present = Vec::with_capacity(candidates.len());
        for path in candidates {
            if self.exists(&path)? {
                present.push(path);
            }
        }
        Ok(present)
    }

    /// Whether any staged artifact differs from its base text.
    pub fn is_changed(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.current_text() != e.base.as_deref())
    }

    /// Turn the staged edits into a commit plan.
    ///
    /// Entity artifacts come before the registry; artifacts whose final text
    /// equals their base text are left out. `ledger` runs after the files.
    pub fn into_plan(self, ledger: Vec<LedgerOp>) -> CommitPlan {
        let mut entities = Vec::new();
        let mut registry = Vec::new();

        for (path, entry) in self.entries {
            let current = entry.current_text();
            if current == entry.base.as_deref() {
                continue;
            }
            let expected = fingerprint(entry.base.as_deref());
            let path = path.to_string_lossy().into_owned();
            let op = match current {
                Some(contents) => FileOp::Write {
                    path,
                    contents: contents.to_string(),
                    expected,
                },
                None => FileOp::Delete { path, expected },
            };
            match entry.staged {
                Staged::Registry(_) => registry.push(op),
                _ => entities.push(op),
            }
        }

        entities.extend(registry);
        CommitPlan {
            files: entities,
            ledger,
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, Error> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn parse_base<D: Document>(path: &Path, base: Option<&str>) -> Result<Option<SourceTree<D>>, Error> {
    let Some(text) = base else {
        return Ok(None);
    };
    match SourceTree::parse(text) {
        Ok(tree) => Ok(Some(tree)),
        Err(error) => Err(EditError::Unparsable {
            path: path.to_path_buf(),
            rendered: error.format_with_source(text),
            error,
        }
        .into()),
    }
}
