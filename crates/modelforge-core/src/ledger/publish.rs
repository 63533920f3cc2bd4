//! Publishing pending ledger rows after the schema migration runs.

use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::change::{ChangeRecord, ChangeState};
use super::store::SchemaChangeLedger;
use crate::error::Error;

/// Why a schema migration did not complete.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The model artifacts contain changes the database has not caught up
    /// with yet. Recoverable: rows stay pending until the next publish.
    #[error("model changes have not been applied: {0}")]
    UnappliedModelChanges(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// Applies the registry's migrations before rows are published.
pub trait SchemaMigrator {
    /// Run the migration.
    fn migrate(&self) -> Result<(), MigrationError>;
}

/// Migrator for deployments without a migration step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMigrator;

impl SchemaMigrator for NoopMigrator {
    fn migrate(&self) -> Result<(), MigrationError> {
        Ok(())
    }
}

/// Counts of rows flipped by a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct PublishSummary {
    /// PendingPublish rows now Published.
    pub published: usize,
    /// PendingDelete rows now Deleted.
    pub deleted: usize,
}

/// Result of [`SchemaChangeLedger::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Migration succeeded and rows were flipped.
    Published(PublishSummary),
    /// Migration reported unapplied model changes; rows stay pending.
    Deferred {
        /// The migrator's explanation.
        reason: String,
    },
}

impl SchemaChangeLedger {
    /// Flip every PendingPublish row to Published and every PendingDelete
    /// row to Deleted, in one transaction. Terminal rows are left alone.
    pub fn publish_all(&self) -> Result<PublishSummary, Error> {
        // Rows are re-read inside the transaction; only the ids are trusted.
        let pending: Vec<u64> = self
            .records()?
            .into_iter()
            .filter(|r| r.state.is_pending())
            .map(|r| r.id)
            .collect();
        if pending.is_empty() {
            return Ok(PublishSummary::default());
        }

        let result: Result<PublishSummary, TransactionError<Error>> = (self.changes_tree(), self.drafts_tree())
            .transaction(|(changes_tx, drafts_tx)| {
                let mut summary = PublishSummary::default();
                for id in &pending {
                    let Some(bytes) = changes_tx.get(id.to_be_bytes())? else {
                        continue;
                    };
                    let mut record =
                        ChangeRecord::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?;
                    match record.state {
                        ChangeState::PendingPublish => summary.published += 1,
                        ChangeState::PendingDelete => summary.deleted += 1,
                        _ => continue,
                    }
                    record.state = record.state.published();
                    Self::put_record(changes_tx, &record)?;

                    let live = drafts_tx.get(record.model_name.as_bytes())?;
                    if live.as_deref() == Some(&record.id.to_be_bytes()[..]) {
                        drafts_tx.remove(record.model_name.as_bytes())?;
                    }
                }
                Ok(summary)
            });

        match result {
            Ok(summary) => {
                info!(
                    published = summary.published,
                    deleted = summary.deleted,
                    "published pending schema changes"
                );
                Ok(summary)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Run `migrator`, then [`publish_all`](Self::publish_all).
    ///
    /// Unapplied model changes are logged and leave every row pending; any
    /// other migration failure is returned.
    #[instrument(skip(self, migrator))]
    pub fn publish(&self, migrator: &dyn SchemaMigrator) -> Result<PublishOutcome, Error> {
        match migrator.migrate() {
            Ok(()) => Ok(PublishOutcome::Published(self.publish_all()?)),
            Err(MigrationError::UnappliedModelChanges(reason)) => {
                warn!(reason = %reason, "migration reported unapplied model changes; rows stay pending");
                Ok(PublishOutcome::Deferred { reason })
            }
            Err(MigrationError::Failed(message)) => Err(Error::Migration(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldMap;

    struct Unapplied;

    impl SchemaMigrator for Unapplied {
        fn migrate(&self) -> Result<(), MigrationError> {
            Err(MigrationError::UnappliedModelChanges("pending model snapshot".into()))
        }
    }

    struct Broken;

    impl SchemaMigrator for Broken {
        fn migrate(&self) -> Result<(), MigrationError> {
            Err(MigrationError::Failed("connection refused".into()))
        }
    }

    fn seeded() -> SchemaChangeLedger {
        let ledger = SchemaChangeLedger::temporary().unwrap();
        let mut fields = FieldMap::new();
        fields.insert("Id".into(), "Guid".into());
        ledger.merge_draft_fields("Post", &fields, "a").unwrap();
        ledger.merge_draft_fields("Tag", &fields, "a").unwrap();
        ledger
            .add_change("Legacy", &FieldMap::new(), ChangeState::PendingDelete, "a")
            .unwrap();
        ledger
    }

    #[test]
    fn test_publish_all_flips_pending_rows() {
        let ledger = seeded();
        let summary = ledger.publish_all().unwrap();
        assert_eq!(summary, PublishSummary { published: 2, deleted: 1 });

        let states: Vec<_> = ledger.rows().unwrap().into_iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![ChangeState::Published, ChangeState::Published, ChangeState::Deleted]
        );
        assert_eq!(ledger.published_models().unwrap(), vec!["Post", "Tag"]);
        assert!(ledger.draft_models().unwrap().is_empty());
        assert_eq!(ledger.draft_id("Post").unwrap(), None);
    }

    #[test]
    fn test_publish_all_is_noop_on_terminal_rows() {
        let ledger = seeded();
        ledger.publish_all().unwrap();
        let before = ledger.rows().unwrap();

        assert_eq!(ledger.publish_all().unwrap(), PublishSummary::default());
        assert_eq!(ledger.rows().unwrap(), before);
    }

    #[test]
    fn test_new_draft_after_publish() {
        let ledger = seeded();
        ledger.publish_all().unwrap();

        let mut fields = FieldMap::new();
        fields.insert("Title".into(), "String".into());
        ledger.merge_draft_fields("Post", &fields, "a").unwrap();
        assert_eq!(ledger.rows().unwrap().len(), 4);
        assert_eq!(ledger.draft_models().unwrap(), vec!["Post"]);
    }

    #[test]
    fn test_publish_keeps_fields_merged_concurrently() {
        let ledger = seeded();
        let names: Vec<String> = (0..64).map(|i| format!("Field{}", i)).collect();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for name in &names {
                    let mut fields = FieldMap::new();
                    fields.insert(name.clone(), "String".into());
                    ledger.merge_draft_fields("Post", &fields, "writer").unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..64 {
                    ledger.publish_all().unwrap();
                }
            });
        });

        let recorded: std::collections::BTreeSet<String> = ledger
            .rows()
            .unwrap()
            .into_iter()
            .filter(|r| r.model_name == "Post")
            .flat_map(|r| r.fields.into_keys())
            .collect();
        for name in &names {
            assert!(recorded.contains(name), "{} was lost", name);
        }
    }

    #[test]
    fn test_unapplied_changes_keep_rows_pending() {
        let ledger = seeded();
        let outcome = ledger.publish(&Unapplied).unwrap();
        assert!(matches!(outcome, PublishOutcome::Deferred { .. }));
        assert_eq!(ledger.draft_models().unwrap().len(), 3);
    }

    #[test]
    fn test_failed_migration_propagates() {
        let ledger = seeded();
        let err = ledger.publish(&Broken).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert_eq!(ledger.draft_models().unwrap().len(), 3);
    }

    #[test]
    fn test_noop_migrator_publishes() {
        let ledger = seeded();
        let outcome = ledger.publish(&NoopMigrator).unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Published(PublishSummary { published: 2, deleted: 1 })
        );
    }
}
