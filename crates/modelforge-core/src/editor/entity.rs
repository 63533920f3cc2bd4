//! Entity artifact editing: one file per domain model.

use std::collections::BTreeSet;
use std::path::PathBuf;

use modelforge_lang::{
    render_entity, validate_identifier, Annotation, EntityFile, MemberDecl, SourceTree, TypeRef,
};
use tracing::{debug, info};

use crate::config::{WorkspaceConfig, ARTIFACT_EXTENSION};
use crate::error::Error;
use crate::model::{DomainModel, ScalarType};
use crate::session::EditSession;

/// Name of the identity property every model starts with.
pub const IDENTITY_PROPERTY: &str = "Id";

/// The identity member: `Id: Guid @key;`.
pub fn identity_member() -> MemberDecl {
    MemberDecl::new(IDENTITY_PROPERTY, TypeRef::Named(ScalarType::Guid.to_string()))
        .annotate(Annotation::Key)
}

/// Timestamp and actor members of an auditable model, in artifact order.
pub fn audit_members() -> Vec<MemberDecl> {
    let member = |name: &str, ty: ScalarType, optional: bool| {
        MemberDecl::new(name, TypeRef::Named(ty.to_string()))
            .optional(optional)
            .annotate(Annotation::Audit)
    };
    vec![
        member("CreatedAtUtc", ScalarType::DateTime, false),
        member("UpdatedAtUtc", ScalarType::DateTime, true),
        member("CreatedBy", ScalarType::String, true),
        member("UpdatedBy", ScalarType::String, true),
    ]
}

/// Creates, edits and lists entity artifacts through an [`EditSession`].
#[derive(Debug, Clone, Copy)]
pub struct EntityEditor<'a> {
    config: &'a WorkspaceConfig,
}

impl<'a> EntityEditor<'a> {
    pub fn new(config: &'a WorkspaceConfig) -> Self {
        Self { config }
    }

    /// Stage a new entity artifact holding the identity property and, when
    /// `auditable`, the audit properties. Returns the artifact path.
    pub fn create_entity(
        &self,
        session: &mut EditSession,
        name: &str,
        auditable: bool,
    ) -> Result<PathBuf, Error> {
        validate_identifier(name)?;
        if ScalarType::from_name(name).is_some() {
            return Err(Error::Validation(format!(
                "'{}' is a built-in type name",
                name
            )));
        }

        let path = self.config.entity_path(name);
        if session.exists(&path)? {
            return Err(Error::Conflict(format!("model '{}' already exists", name)));
        }
        if let Some(existing) = self
            .model_names(session)?
            .into_iter()
            .find(|m| m.eq_ignore_ascii_case(name))
        {
            return Err(Error::Conflict(format!(
                "model '{}' already exists as '{}'",
                name, existing
            )));
        }

        let mut members = vec![identity_member()];
        if auditable {
            members.extend(audit_members());
        }
        let text = render_entity(Some(&self.config.entity_namespace), name, &members);
        let tree = SourceTree::parse(text).map_err(|e| Error::Validation(e.to_string()))?;
        session.stage_entity(&path, tree)?;

        info!(model = %name, auditable, "staged new entity");
        Ok(path)
    }

    /// The model's artifact, staged or from disk.
    pub fn load(&self, session: &mut EditSession, model: &str) -> Result<SourceTree<EntityFile>, Error> {
        session
            .entity(&self.config.entity_path(model))?
            .ok_or_else(|| Error::not_found("model", model))
    }

    /// Whether the model has an artifact.
    pub fn exists(&self, session: &mut EditSession, model: &str) -> Result<bool, Error> {
        session.exists(&self.config.entity_path(model))
    }

    /// Stage `member` appended to the model.
    ///
    /// Fails with Conflict when a member with the same name ignoring case
    /// already exists. Collections get an empty initializer.
    pub fn add_property(
        &self,
        session: &mut EditSession,
        model: &str,
        member: MemberDecl,
    ) -> Result<(), Error> {
        let tree = self.load(session, model)?;
        if let Some(existing) = tree.document().model.member_ignore_case(member.name()) {
            return Err(Error::Conflict(format!(
                "model '{}' already has a member named '{}'",
                model,
                existing.name()
            )));
        }

        let member = match member.ty {
            TypeRef::Collection(_) if !member.empty_init => member.with_empty_init(),
            _ => member,
        };
        let tree = tree.add_member(model, &member)?;
        session.stage_entity(&self.config.entity_path(model), tree)?;

        info!(model = %model, property = %member.name(), "staged property");
        Ok(())
    }

    /// Stage removal of a member. Returns false if there is no such member.
    pub fn remove_property(
        &self,
        session: &mut EditSession,
        model: &str,
        name: &str,
    ) -> Result<bool, Error> {
        let tree = self.load(session, model)?;
        if tree.document().model.member(name).is_none() {
            debug!(model = %model, property = %name, "property already absent");
            return Ok(false);
        }
        let tree = tree.remove_member_named(model, name)?;
        session.stage_entity(&self.config.entity_path(model), tree)?;

        info!(model = %model, property = %name, "staged property removal");
        Ok(true)
    }

    /// Stage removal of the model's artifact. Relations pointing at the
    /// model are not touched here.
    pub fn delete_entity(&self, session: &mut EditSession, model: &str) -> Result<(), Error> {
        let path = self.config.entity_path(model);
        if !session.exists(&path)? {
            return Err(Error::not_found("model", model));
        }
        session.stage_delete(&path)?;
        info!(model = %model, "staged entity removal");
        Ok(())
    }

    /// Names of all models, sorted.
    pub fn model_names(&self, session: &mut EditSession) -> Result<Vec<String>, Error> {
        Ok(session
            .list(&self.config.entities_dir, ARTIFACT_EXTENSION)?
            .iter()
            .filter(|p| **p != self.config.registry_path)
            .filter_map(|p| self.config.model_name_of(p))
            .collect())
    }

    /// All models, parsed from their artifacts.
    pub fn get_entities(&self, session: &mut EditSession) -> Result<Vec<DomainModel>, Error> {
        let names = self.model_names(session)?;
        let known: BTreeSet<String> = names.iter().cloned().collect();
        let mut models = Vec::with_capacity(names.len());
        for name in &names {
            let tree = self.load(session, name)?;
            models.push(DomainModel::from_file(tree.document(), &known));
        }
        Ok(models)
    }

    /// One model, parsed from its artifact.
    pub fn get_entity(&self, session: &mut EditSession, model: &str) -> Result<DomainModel, Error> {
        let tree = self.load(session, model)?;
        let known: BTreeSet<String> = self.model_names(session)?.into_iter().collect();
        Ok(DomainModel::from_file(tree.document(), &known))
    }
}
