//! The schema command surface.
//!
//! Each mutating command runs in its own [`EditSession`], turns it into a
//! [`CommitPlan`](crate::session::CommitPlan) together with its ledger
//! operations and commits that plan. Commands are serialized within the
//! process; writers in other processes are caught by the fingerprint check.

use std::collections::BTreeMap;
use std::path::PathBuf;

use modelforge_lang::{
    render_registry, validate_identifier, MemberDecl, RelationConfig, RelationKind, TypeRef,
};
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::config::WorkspaceConfig;
use crate::editor::{audit_members, identity_member, EntityEditor, RegistryEditor};
use crate::error::Error;
use crate::ledger::{
    ChangeState, ContentTypeChange, LedgerOp, PublishOutcome, SchemaChangeLedger, SchemaMigrator,
};
use crate::model::{DomainModel, FieldInfo, FieldMap, ScalarType};
use crate::relation::{RelationRequest, RelationshipCoordinator, Removals};
use crate::session::{recover, write_atomic, CommitReport, EditSession};

/// Arguments of [`Workspace::add_field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFieldRequest {
    pub model: String,
    pub field: String,
    /// A scalar or enum name, or a relation kind when `related_to` is set.
    pub field_type: String,
    pub related_to: Option<String>,
    pub related_name: Option<String>,
    pub is_required: bool,
}

impl AddFieldRequest {
    /// A scalar or enum field.
    pub fn scalar(model: impl Into<String>, field: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            field: field.into(),
            field_type: field_type.into(),
            related_to: None,
            related_name: None,
            is_required: false,
        }
    }

    /// A relation field of `kind` pointing at `related_to`.
    pub fn relation(
        model: impl Into<String>,
        field: impl Into<String>,
        kind: RelationKind,
        related_to: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            field: field.into(),
            field_type: kind.to_string(),
            related_to: Some(related_to.into()),
            related_name: None,
            is_required: false,
        }
    }

    pub fn with_related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    pub fn required(mut self, is_required: bool) -> Self {
        self.is_required = is_required;
        self
    }
}

/// A workspace: entity artifacts, the registry and the change ledger.
pub struct Workspace {
    config: WorkspaceConfig,
    ledger: SchemaChangeLedger,
    lock: Mutex<()>,
}

impl Workspace {
    /// Create the directory layout and an empty registry if they are
    /// missing, then open the workspace.
    pub fn init(config: WorkspaceConfig) -> Result<Self, Error> {
        std::fs::create_dir_all(&config.entities_dir)
            .map_err(|e| Error::io(&config.entities_dir, e))?;
        if !config.registry_path.exists() {
            let text = render_registry(Some(&config.registry_namespace), &config.registry_name);
            write_atomic(&config.registry_path, &text)?;
            info!(path = %config.registry_path.display(), "created registry");
        }
        Self::open(config)
    }

    /// Open an existing workspace, replaying any interrupted commit.
    pub fn open(config: WorkspaceConfig) -> Result<Self, Error> {
        if !config.registry_path.exists() {
            return Err(Error::not_found(
                "registry",
                config.registry_path.display().to_string(),
            ));
        }
        let ledger = SchemaChangeLedger::open(&config)?;
        let replayed = recover(&ledger)?;
        if replayed > 0 {
            warn!(replayed, "rolled forward interrupted commits");
        }
        info!(root = %config.root.display(), "opened workspace");
        Ok(Self {
            config,
            ledger,
            lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SchemaChangeLedger {
        &self.ledger
    }

    fn commit(&self, session: EditSession, ops: Vec<LedgerOp>) -> Result<CommitReport, Error> {
        session.into_plan(ops).commit(&self.ledger)
    }

    fn drop_ops(&self, removals: &Removals) -> Result<Vec<LedgerOp>, Error> {
        removals
            .iter()
            .map(|(model, fields)| self.ledger.drop_draft_op(model, fields, &self.config.actor))
            .collect()
    }

    /// Create a model artifact and register its data set.
    #[instrument(skip(self))]
    pub fn create_entity(&self, name: &str, auditable: bool) -> Result<PathBuf, Error> {
        let _guard = self.lock.lock();
        let mut session = EditSession::new();

        let path = EntityEditor::new(&self.config).create_entity(&mut session, name, auditable)?;
        RegistryEditor::new(&self.config).add_set(
            &mut session,
            name,
            Some(&self.config.entity_namespace),
        )?;

        let mut members = vec![identity_member()];
        if auditable {
            members.extend(audit_members());
        }
        let fields: FieldMap = members
            .iter()
            .map(|m| (m.name().to_string(), m.ty.to_string()))
            .collect();
        let op = self.ledger.merge_draft_op(name, &fields, &self.config.actor)?;

        let report = self.commit(session, vec![op])?;
        info!(model = %name, files = report.files_written, "created entity");
        Ok(path)
    }

    /// Add a scalar, enum or relation field. Returns the members added per
    /// model.
    #[instrument(skip(self, request), fields(model = %request.model, field = %request.field))]
    pub fn add_field(&self, request: &AddFieldRequest) -> Result<BTreeMap<String, FieldMap>, Error> {
        let _guard = self.lock.lock();
        let mut session = EditSession::new();
        let entities = EntityEditor::new(&self.config);

        let added = match RelationKind::from_name(&request.field_type) {
            Some(kind) => {
                let related_to = request.related_to.as_deref().ok_or_else(|| {
                    Error::Validation(format!(
                        "a {} field needs a related model",
                        kind
                    ))
                })?;
                let outcome = RelationshipCoordinator::new(&self.config).add_relation(
                    &mut session,
                    &RelationRequest {
                        model: &request.model,
                        field: &request.field,
                        kind,
                        related_to,
                        related_name: request.related_name.as_deref(),
                        is_required: request.is_required,
                    },
                )?;
                outcome.fields
            }
            None => {
                if request.related_to.is_some() {
                    return Err(Error::Validation(format!(
                        "'{}' is not a relation kind; expected one of OneToOne, OneToMany, ManyToOne, ManyToMany",
                        request.field_type
                    )));
                }
                validate_identifier(&request.field)?;
                validate_identifier(&request.field_type)?;
                if request.field == request.model {
                    return Err(Error::Validation(format!(
                        "field '{}' cannot share the name of its model",
                        request.field
                    )));
                }
                if ScalarType::from_name(&request.field_type).is_none()
                    && entities.exists(&mut session, &request.field_type)?
                {
                    return Err(Error::Validation(format!(
                        "'{}' is a model; pass a relation kind and related model instead",
                        request.field_type
                    )));
                }

                let member = MemberDecl::new(&request.field, TypeRef::Named(request.field_type.clone()))
                    .optional(!request.is_required);
                entities.add_property(&mut session, &request.model, member)?;

                let mut fields = FieldMap::new();
                fields.insert(request.field.clone(), request.field_type.clone());
                BTreeMap::from([(request.model.clone(), fields)])
            }
        };

        let ops = added
            .iter()
            .map(|(model, fields)| self.ledger.merge_draft_op(model, fields, &self.config.actor))
            .collect::<Result<Vec<_>, Error>>()?;
        self.commit(session, ops)?;

        info!(models = added.len(), "added field");
        Ok(added)
    }

    /// Remove a field; relation fields take their partner, shadow key and
    /// configuration statement with them.
    #[instrument(skip(self))]
    pub fn delete_field(&self, model: &str, field: &str) -> Result<Removals, Error> {
        let _guard = self.lock.lock();
        let mut session = EditSession::new();

        let removals = RelationshipCoordinator::new(&self.config).delete_field(&mut session, model, field)?;
        let ops = self.drop_ops(&removals)?;
        self.commit(session, ops)?;

        info!(models = removals.len(), "deleted field");
        Ok(removals)
    }

    /// Delete a model and every relation that points at it.
    #[instrument(skip(self))]
    pub fn delete_entity(&self, model: &str) -> Result<Removals, Error> {
        let _guard = self.lock.lock();
        let mut session = EditSession::new();

        let fields: FieldMap = EntityEditor::new(&self.config)
            .get_entity(&mut session, model)?
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.type_label()))
            .collect();
        let removals = RelationshipCoordinator::new(&self.config).delete_entity(&mut session, model)?;

        let mut ops = self.drop_ops(&removals)?;
        ops.push(self.ledger.add_change_op(
            model,
            &fields,
            ChangeState::PendingDelete,
            &self.config.actor,
        )?);
        let report = self.commit(session, ops)?;

        info!(
            affected_models = removals.len(),
            files_deleted = report.files_deleted,
            "deleted entity"
        );
        Ok(removals)
    }

    /// Fields of a model in declaration order, audit properties excluded.
    #[instrument(skip(self))]
    pub fn get_fields(&self, model: &str) -> Result<Vec<FieldInfo>, Error> {
        let model = EntityEditor::new(&self.config).get_entity(&mut EditSession::new(), model)?;
        Ok(model.fields())
    }

    /// Names of all models, sorted.
    #[instrument(skip(self))]
    pub fn list_entities(&self) -> Result<Vec<String>, Error> {
        EntityEditor::new(&self.config).model_names(&mut EditSession::new())
    }

    /// All models with their properties.
    #[instrument(skip(self))]
    pub fn entities(&self) -> Result<Vec<DomainModel>, Error> {
        EntityEditor::new(&self.config).get_entities(&mut EditSession::new())
    }

    /// Configured relationships, in registry order.
    #[instrument(skip(self))]
    pub fn relationships(&self) -> Result<Vec<RelationConfig>, Error> {
        RegistryEditor::new(&self.config).relationships(&mut EditSession::new())
    }

    /// Ledger rows modified within the configured window, newest first.
    pub fn recent_changes(&self) -> Result<Vec<ContentTypeChange>, Error> {
        self.ledger.recent_changes(self.config.recent_window)
    }

    /// Names of models with a Published row.
    pub fn published_models(&self) -> Result<Vec<String>, Error> {
        self.ledger.published_models()
    }

    /// Names of models with a pending row.
    pub fn draft_models(&self) -> Result<Vec<String>, Error> {
        self.ledger.draft_models()
    }

    /// Run the migrator and publish pending rows.
    #[instrument(skip(self, migrator))]
    pub fn publish(&self, migrator: &dyn SchemaMigrator) -> Result<PublishOutcome, Error> {
        let _guard = self.lock.lock();
        self.ledger.publish(migrator)
    }
}
