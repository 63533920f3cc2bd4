//! Sled-backed schema change ledger.

use std::collections::BTreeSet;
use std::time::Duration;

use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, Transactional,
};
use sled::{Db, Tree};
use tracing::{debug, info};

use super::change::{
    current_timestamp, decode_fields, encode_fields, ChangeRecord, ChangeState,
    ContentTypeChange, LedgerOp, REMOVED_FIELD_TYPE,
};
use crate::config::WorkspaceConfig;
use crate::error::Error;
use crate::model::FieldMap;

/// Tree holding rows keyed by big-endian id.
const CHANGES_TREE: &str = "ledger:changes";
/// Tree mapping a model name to its live PendingPublish row id.
const DRAFTS_TREE: &str = "ledger:drafts";
/// Tree holding commit plans that have not been fully applied.
const JOURNAL_TREE: &str = "journal";

/// Persisted change log with per-model draft accumulation.
///
/// At most one PendingPublish row exists per model; the drafts tree points
/// at it, and every operation that touches it runs in one sled transaction
/// across the changes and drafts trees.
pub struct SchemaChangeLedger {
    db: Db,
    changes: Tree,
    drafts: Tree,
    journal: Tree,
}

impl SchemaChangeLedger {
    /// Open the ledger configured for a workspace.
    pub fn open(config: &WorkspaceConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        Self::from_db(db)
    }

    /// Open a temporary ledger that is deleted on drop.
    pub fn temporary() -> Result<Self, Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, Error> {
        let changes = db.open_tree(CHANGES_TREE)?;
        let drafts = db.open_tree(DRAFTS_TREE)?;
        let journal = db.open_tree(JOURNAL_TREE)?;
        Ok(Self {
            db,
            changes,
            drafts,
            journal,
        })
    }

    /// Insert a row.
    ///
    /// A PendingPublish row goes through [`merge_draft_fields`] so the
    /// one-draft-per-model rule holds. A PendingDelete row retires the
    /// model's live draft along with it, so a model re-created later starts
    /// a new one.
    ///
    /// [`merge_draft_fields`]: SchemaChangeLedger::merge_draft_fields
    pub fn add_change(
        &self,
        model: &str,
        fields: &FieldMap,
        state: ChangeState,
        actor: &str,
    ) -> Result<u64, Error> {
        let op = self.add_change_op(model, fields, state, actor)?;
        let ids = self.apply(None, std::slice::from_ref(&op))?;
        Ok(ids.first().copied().unwrap_or_default())
    }

    /// Merge fields into the model's PendingPublish row, creating it if
    /// needed. Returns the row id.
    pub fn merge_draft_fields(&self, model: &str, fields: &FieldMap, actor: &str) -> Result<u64, Error> {
        let op = self.merge_draft_op(model, fields, actor)?;
        let ids = self.apply(None, std::slice::from_ref(&op))?;
        Ok(ids.first().copied().unwrap_or_default())
    }

    /// Record removed fields in the model's PendingPublish row, creating it
    /// if needed. Returns the row id.
    pub fn drop_draft_fields(&self, model: &str, fields: &[String], actor: &str) -> Result<u64, Error> {
        let op = self.drop_draft_op(model, fields, actor)?;
        let ids = self.apply(None, std::slice::from_ref(&op))?;
        Ok(ids.first().copied().unwrap_or_default())
    }

    /// Build an insert operation.
    pub fn add_change_op(
        &self,
        model: &str,
        fields: &FieldMap,
        state: ChangeState,
        actor: &str,
    ) -> Result<LedgerOp, Error> {
        if state == ChangeState::PendingPublish {
            return self.merge_draft_op(model, fields, actor);
        }
        Ok(LedgerOp::AddChange {
            id: self.generate_id()?,
            model: model.to_string(),
            fields_json: encode_fields(model, fields)?,
            state,
            actor: actor.to_string(),
            at: current_timestamp(),
        })
    }

    /// Build a draft merge operation.
    pub fn merge_draft_op(&self, model: &str, fields: &FieldMap, actor: &str) -> Result<LedgerOp, Error> {
        Ok(LedgerOp::MergeDraft {
            id: self.generate_id()?,
            model: model.to_string(),
            fields_json: encode_fields(model, fields)?,
            actor: actor.to_string(),
            at: current_timestamp(),
        })
    }

    /// Build a draft field removal operation.
    pub fn drop_draft_op(&self, model: &str, fields: &[String], actor: &str) -> Result<LedgerOp, Error> {
        Ok(LedgerOp::DropDraftFields {
            id: self.generate_id()?,
            model: model.to_string(),
            fields: fields.to_vec(),
            actor: actor.to_string(),
            at: current_timestamp(),
        })
    }

    /// Apply operations atomically, removing the journal entry `journal_id`
    /// in the same transaction. Returns the ids of the rows written.
    pub(crate) fn apply(&self, journal_id: Option<u64>, ops: &[LedgerOp]) -> Result<Vec<u64>, Error> {
        let result: Result<Vec<u64>, TransactionError<Error>> = (&self.changes, &self.drafts, &self.journal)
            .transaction(|(changes_tx, drafts_tx, journal_tx)| {
                let mut written = Vec::with_capacity(ops.len());
                for op in ops {
                    if let Some(id) = Self::apply_op(changes_tx, drafts_tx, op)? {
                        written.push(id);
                    }
                }
                if let Some(id) = journal_id {
                    journal_tx.remove(&id.to_be_bytes())?;
                }
                Ok(written)
            });

        match result {
            Ok(written) => {
                for op in ops {
                    info!(model = %op.model(), "recorded schema change");
                }
                Ok(written)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Execute one operation within a transaction.
    fn apply_op(
        changes: &TransactionalTree,
        drafts: &TransactionalTree,
        op: &LedgerOp,
    ) -> Result<Option<u64>, ConflictableTransactionError<Error>> {
        match op {
            LedgerOp::AddChange {
                id,
                model,
                fields_json,
                state,
                actor,
                at,
            } => {
                let record = ChangeRecord {
                    id: *id,
                    model_name: model.clone(),
                    fields_json: fields_json.clone(),
                    modified_by: actor.clone(),
                    modified_at: *at,
                    state: *state,
                };
                if *state == ChangeState::PendingDelete {
                    if let Some(mut draft) = Self::live_draft(changes, drafts, model)? {
                        draft.state = ChangeState::PendingDelete;
                        Self::put_record(changes, &draft)?;
                    }
                    drafts.remove(model.as_bytes())?;
                }
                Self::put_record(changes, &record)?;
                Ok(Some(*id))
            }
            LedgerOp::MergeDraft {
                id,
                model,
                fields_json,
                actor,
                at,
            } => {
                if let Some(mut record) = Self::live_draft(changes, drafts, model)? {
                    let mut fields = record.fields().map_err(ConflictableTransactionError::Abort)?;
                    fields.extend(decode_fields(fields_json).map_err(ConflictableTransactionError::Abort)?);
                    record.fields_json =
                        encode_fields(model, &fields).map_err(ConflictableTransactionError::Abort)?;
                    record.modified_by = actor.clone();
                    record.modified_at = *at;
                    Self::put_record(changes, &record)?;
                    return Ok(Some(record.id));
                }

                let record = ChangeRecord {
                    id: *id,
                    model_name: model.clone(),
                    fields_json: fields_json.clone(),
                    modified_by: actor.clone(),
                    modified_at: *at,
                    state: ChangeState::PendingPublish,
                };
                Self::put_record(changes, &record)?;
                drafts.insert(model.as_bytes(), &id.to_be_bytes())?;
                Ok(Some(*id))
            }
            LedgerOp::DropDraftFields {
                id,
                model,
                fields,
                actor,
                at,
            } => {
                let draft = Self::live_draft(changes, drafts, model)?;
                let created = draft.is_none();
                let mut record = draft.unwrap_or_else(|| ChangeRecord {
                    id: *id,
                    model_name: model.clone(),
                    fields_json: String::new(),
                    modified_by: actor.clone(),
                    modified_at: *at,
                    state: ChangeState::PendingPublish,
                });
                let mut current = if created {
                    FieldMap::new()
                } else {
                    record.fields().map_err(ConflictableTransactionError::Abort)?
                };
                for field in fields {
                    let added_by_draft = current
                        .get(field)
                        .is_some_and(|ty| ty != REMOVED_FIELD_TYPE);
                    if added_by_draft {
                        current.remove(field);
                    } else {
                        current.insert(field.clone(), REMOVED_FIELD_TYPE.to_string());
                    }
                }
                record.fields_json =
                    encode_fields(model, &current).map_err(ConflictableTransactionError::Abort)?;
                record.modified_by = actor.clone();
                record.modified_at = *at;
                Self::put_record(changes, &record)?;
                if created {
                    drafts.insert(model.as_bytes(), &id.to_be_bytes())?;
                }
                Ok(Some(record.id))
            }
        }
    }

    /// The model's PendingPublish row, read within a transaction.
    fn live_draft(
        changes: &TransactionalTree,
        drafts: &TransactionalTree,
        model: &str,
    ) -> Result<Option<ChangeRecord>, ConflictableTransactionError<Error>> {
        let Some(id_bytes) = drafts.get(model.as_bytes())? else {
            return Ok(None);
        };
        let Some(bytes) = changes.get(&id_bytes)? else {
            return Ok(None);
        };
        let record = ChangeRecord::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?;
        Ok((record.state == ChangeState::PendingPublish).then_some(record))
    }

    pub(super) fn put_record(
        changes: &TransactionalTree,
        record: &ChangeRecord,
    ) -> Result<(), ConflictableTransactionError<Error>> {
        let bytes = record.to_bytes().map_err(ConflictableTransactionError::Abort)?;
        changes.insert(&record.id.to_be_bytes(), bytes)?;
        Ok(())
    }

    /// Row by id.
    pub fn get(&self, id: u64) -> Result<Option<ContentTypeChange>, Error> {
        match self.changes.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(ChangeRecord::from_bytes(&bytes)?.try_into()?)),
            None => Ok(None),
        }
    }

    /// All rows in id order.
    pub fn rows(&self) -> Result<Vec<ContentTypeChange>, Error> {
        self.records()?
            .into_iter()
            .map(ContentTypeChange::try_from)
            .collect()
    }

    pub(super) fn records(&self) -> Result<Vec<ChangeRecord>, Error> {
        let mut records = Vec::new();
        for item in self.changes.iter() {
            let (_, bytes) = item?;
            records.push(ChangeRecord::from_bytes(&bytes)?);
        }
        Ok(records)
    }

    /// Rows modified within `window` of now, newest first.
    pub fn recent_changes(&self, window: Duration) -> Result<Vec<ContentTypeChange>, Error> {
        let cutoff = current_timestamp().saturating_sub(window.as_micros() as u64);
        let mut recent: Vec<ContentTypeChange> = self
            .rows()?
            .into_iter()
            .filter(|row| row.modified_at >= cutoff)
            .collect();
        recent.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then(b.id.cmp(&a.id)));
        debug!(count = recent.len(), "loaded recent changes");
        Ok(recent)
    }

    /// Distinct names of models with a Published row.
    pub fn published_models(&self) -> Result<Vec<String>, Error> {
        self.distinct_models(|state| state == ChangeState::Published)
    }

    /// Distinct names of models with a pending row.
    pub fn draft_models(&self) -> Result<Vec<String>, Error> {
        self.distinct_models(|state| state.is_pending())
    }

    fn distinct_models(&self, predicate: impl Fn(ChangeState) -> bool) -> Result<Vec<String>, Error> {
        let names: BTreeSet<String> = self
            .records()?
            .into_iter()
            .filter(|r| predicate(r.state))
            .map(|r| r.model_name)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Id of the model's live draft row.
    pub fn draft_id(&self, model: &str) -> Result<Option<u64>, Error> {
        match self.drafts.get(model.as_bytes())? {
            Some(bytes) => Ok(Some(decode_id(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(super) fn changes_tree(&self) -> &Tree {
        &self.changes
    }

    pub(super) fn drafts_tree(&self) -> &Tree {
        &self.drafts
    }

    pub(crate) fn journal_tree(&self) -> &Tree {
        &self.journal
    }

    /// Generate a unique, monotonically increasing id.
    pub(crate) fn generate_id(&self) -> Result<u64, Error> {
        Ok(self.db.generate_id()?)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

/// Decode a big-endian row id.
pub(crate) fn decode_id(bytes: &[u8]) -> Result<u64, Error> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("invalid row id of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_draft_fields_accumulates() {
        let ledger = SchemaChangeLedger::temporary().unwrap();

        let first = ledger
            .merge_draft_fields("Post", &fields(&[("Title", "String")]), "alice")
            .unwrap();
        let second = ledger
            .merge_draft_fields("Post", &fields(&[("Body", "String?")]), "bob")
            .unwrap();
        assert_eq!(first, second);

        let rows = ledger.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, ChangeState::PendingPublish);
        assert_eq!(rows[0].modified_by, "bob");
        assert_eq!(
            rows[0].fields,
            fields(&[("Body", "String?"), ("Title", "String")])
        );
    }

    #[test]
    fn test_drafts_are_per_model() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Title", "String")]), "a")
            .unwrap();
        ledger
            .merge_draft_fields("Tag", &fields(&[("Name", "String")]), "a")
            .unwrap();

        assert_eq!(ledger.rows().unwrap().len(), 2);
        assert_eq!(ledger.draft_models().unwrap(), vec!["Post", "Tag"]);
        assert!(ledger.published_models().unwrap().is_empty());
    }

    #[test]
    fn test_add_change_pending_publish_merges() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        let a = ledger
            .add_change("Post", &fields(&[("Id", "Guid")]), ChangeState::PendingPublish, "a")
            .unwrap();
        let b = ledger
            .add_change("Post", &fields(&[("Title", "String")]), ChangeState::PendingPublish, "a")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(ledger.rows().unwrap().len(), 1);
    }

    #[test]
    fn test_pending_delete_detaches_draft() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Id", "Guid")]), "a")
            .unwrap();
        ledger
            .add_change("Post", &FieldMap::new(), ChangeState::PendingDelete, "a")
            .unwrap();
        assert_eq!(ledger.draft_id("Post").unwrap(), None);

        ledger
            .merge_draft_fields("Post", &fields(&[("Id", "Guid")]), "a")
            .unwrap();
        let rows = ledger.rows().unwrap();
        assert_eq!(rows.len(), 3);
        let states: Vec<_> = rows.iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![
                ChangeState::PendingDelete,
                ChangeState::PendingDelete,
                ChangeState::PendingPublish
            ]
        );
    }

    #[test]
    fn test_drop_draft_fields() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Title", "String"), ("Body", "String")]), "a")
            .unwrap();
        ledger
            .drop_draft_fields("Post", &["Body".to_string()], "a")
            .unwrap();
        assert_eq!(ledger.rows().unwrap()[0].fields, fields(&[("Title", "String")]));
    }

    #[test]
    fn test_drop_fields_after_publish_opens_draft() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Title", "String"), ("Body", "String")]), "a")
            .unwrap();
        ledger.publish_all().unwrap();
        assert!(ledger.draft_models().unwrap().is_empty());

        let id = ledger
            .drop_draft_fields("Post", &["Body".to_string()], "b")
            .unwrap();
        assert_eq!(ledger.draft_id("Post").unwrap(), Some(id));
        assert_eq!(ledger.draft_models().unwrap(), vec!["Post"]);

        let draft = ledger.get(id).unwrap().unwrap();
        assert_eq!(draft.state, ChangeState::PendingPublish);
        assert_eq!(draft.modified_by, "b");
        assert_eq!(draft.fields, fields(&[("Body", REMOVED_FIELD_TYPE)]));

        // Re-adding the field replaces the marker.
        ledger
            .merge_draft_fields("Post", &fields(&[("Body", "String?")]), "b")
            .unwrap();
        assert_eq!(
            ledger.get(id).unwrap().unwrap().fields,
            fields(&[("Body", "String?")])
        );
    }

    #[test]
    fn test_drop_published_field_marks_live_draft() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Title", "String")]), "a")
            .unwrap();
        ledger.publish_all().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Slug", "String")]), "a")
            .unwrap();

        ledger
            .drop_draft_fields("Post", &["Title".to_string(), "Slug".to_string()], "a")
            .unwrap();
        let drafts: Vec<_> = ledger
            .rows()
            .unwrap()
            .into_iter()
            .filter(|r| r.state == ChangeState::PendingPublish)
            .collect();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].fields, fields(&[("Title", REMOVED_FIELD_TYPE)]));
    }

    #[test]
    fn test_recent_changes_window() {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        ledger
            .merge_draft_fields("Post", &fields(&[("Title", "String")]), "a")
            .unwrap();

        let recent = ledger.recent_changes(Duration::from_secs(3600)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].model_name, "Post");
    }

    #[test]
    fn test_decode_id_rejects_bad_length() {
        assert_eq!(decode_id(&42u64.to_be_bytes()).unwrap(), 42);
        assert!(decode_id(&[1, 2, 3]).is_err());
    }
}
