//! Modelforge Core - schema editing engine.
//!
//! This crate edits entity and registry artifacts, keeps relationships
//! consistent across both, and records every schema edit in a change
//! ledger with a draft/publish lifecycle.

pub mod config;
pub mod editor;
pub mod error;
pub mod ledger;
pub mod model;
pub mod relation;
pub mod session;
pub mod workspace;

pub use config::{WorkspaceConfig, ARTIFACT_EXTENSION};
pub use editor::{EntityEditor, RegistryEditor};
pub use error::{Error, ErrorKind};
pub use ledger::{
    ChangeState, ContentTypeChange, MigrationError, NoopMigrator, PublishOutcome, PublishSummary,
    SchemaChangeLedger, SchemaMigrator,
};
pub use model::{DeclaredType, DomainModel, FieldInfo, FieldMap, Property, ScalarType};
pub use relation::{RelationOutcome, RelationRequest, RelationshipCoordinator, Removals};
pub use session::{CommitPlan, CommitReport, EditSession};
pub use workspace::{AddFieldRequest, Workspace};

/// Re-export the artifact language.
pub use modelforge_lang as lang;
