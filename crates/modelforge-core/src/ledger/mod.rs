//! Schema change ledger.
//!
//! Records every schema edit as a row with a lifecycle state. Edits to a
//! model accumulate in a single PendingPublish draft until a publish flips
//! pending rows to their terminal state.

mod change;
mod publish;
mod store;

pub use change::{
    current_timestamp, ChangeRecord, ChangeState, ContentTypeChange, LedgerOp, REMOVED_FIELD_TYPE,
};
pub use publish::{MigrationError, NoopMigrator, PublishOutcome, PublishSummary, SchemaMigrator};
pub use store::SchemaChangeLedger;
