//! Keeps both sides of a relationship and the registry in step.
//!
//! A relation between A and B is three edits: members on A, members on B
//! and one configuration statement. They are staged in that order in one
//! [`EditSession`], so the commit either lands all of them or none.
//!
//! | Kind | A gets | B gets | Key |
//! |---|---|---|---|
//! | OneToOne | `prop: B?` + `{B}Id` | `related: A?` | on A |
//! | OneToMany | `prop: Collection<B>` | `related: A?` + `{A}Id` | on B |
//! | ManyToOne | `prop: B?` + `{B}Id` | `related: Collection<A>` | on A |
//! | ManyToMany | `prop: Collection<B>` | `related: Collection<A>` | join table |

use std::collections::BTreeMap;

use modelforge_lang::{
    pluralize, validate_identifier, Annotation, MemberDecl, RelationConfig, RelationKind,
    RelationLink, TypeRef,
};
use tracing::{debug, info};

use crate::config::WorkspaceConfig;
use crate::editor::{EntityEditor, RegistryEditor};
use crate::error::Error;
use crate::model::{FieldMap, ScalarType};
use crate::session::EditSession;

/// A request to relate `model.field` to `related_to`.
#[derive(Debug, Clone, Copy)]
pub struct RelationRequest<'r> {
    pub model: &'r str,
    pub field: &'r str,
    pub kind: RelationKind,
    pub related_to: &'r str,
    /// Name of the property on the related side. Defaults to the model name,
    /// or its plural when the related side is a collection.
    pub related_name: Option<&'r str>,
    /// Drop the `?` on the key-holding reference and its key.
    pub is_required: bool,
}

/// What [`RelationshipCoordinator::add_relation`] staged.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationOutcome {
    pub statement: RelationConfig,
    /// Added members per model, name to type label.
    pub fields: BTreeMap<String, FieldMap>,
}

/// Removed member names per model.
pub type Removals = BTreeMap<String, Vec<String>>;

/// Property name the related side gets when none is given.
pub fn default_related_name(model: &str, kind: RelationKind) -> String {
    if kind.inverse().is_collection() {
        pluralize(model)
    } else {
        model.to_string()
    }
}

/// Shadow key name for a reference to `model`.
pub fn foreign_key_name(model: &str) -> String {
    format!("{}Id", model)
}

/// Join table name for a many-to-many relation from `source` to `target`.
pub fn join_table_name(source: &str, target: &str) -> String {
    format!("{}{}", source, pluralize(target))
}

fn reference(name: &str, target: &str, kind: RelationKind, required: bool) -> MemberDecl {
    MemberDecl::new(name, TypeRef::Named(target.to_string()))
        .optional(!required)
        .annotate(Annotation::Relation(kind))
}

fn collection(name: &str, target: &str, kind: RelationKind) -> MemberDecl {
    MemberDecl::new(name, TypeRef::Collection(target.to_string()))
        .with_empty_init()
        .annotate(Annotation::Relation(kind))
}

fn shadow_key(target: &str, required: bool) -> MemberDecl {
    MemberDecl::new(foreign_key_name(target), TypeRef::Named(ScalarType::Guid.to_string()))
        .optional(!required)
        .annotate(Annotation::ForeignKey(target.to_string()))
}

/// Members for side A, members for side B, and the statement.
fn plan(req: &RelationRequest<'_>, related_name: &str) -> (Vec<MemberDecl>, Vec<MemberDecl>, RelationConfig) {
    let (a, b, kind, required) = (req.model, req.related_to, req.kind, req.is_required);
    let inverse = kind.inverse();
    let (a_members, b_members, link) = match kind {
        RelationKind::OneToOne => (
            vec![reference(req.field, b, kind, required), shadow_key(b, required)],
            vec![reference(related_name, a, inverse, false)],
            RelationLink::ForeignKey {
                owner: a.to_string(),
                property: foreign_key_name(b),
            },
        ),
        RelationKind::OneToMany => (
            vec![collection(req.field, b, kind)],
            vec![reference(related_name, a, inverse, required), shadow_key(a, required)],
            RelationLink::ForeignKey {
                owner: b.to_string(),
                property: foreign_key_name(a),
            },
        ),
        RelationKind::ManyToOne => (
            vec![reference(req.field, b, kind, required), shadow_key(b, required)],
            vec![collection(related_name, a, inverse)],
            RelationLink::ForeignKey {
                owner: a.to_string(),
                property: foreign_key_name(b),
            },
        ),
        RelationKind::ManyToMany => (
            vec![collection(req.field, b, kind)],
            vec![collection(related_name, a, inverse)],
            RelationLink::JoinTable(join_table_name(a, b)),
        ),
    };
    let statement = RelationConfig::new(a, b, kind, req.field, related_name, link);
    (a_members, b_members, statement)
}

/// Drives the entity and registry editors for relation edits.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipCoordinator<'a> {
    entities: EntityEditor<'a>,
    registry: RegistryEditor<'a>,
}

impl<'a> RelationshipCoordinator<'a> {
    pub fn new(config: &'a WorkspaceConfig) -> Self {
        Self {
            entities: EntityEditor::new(config),
            registry: RegistryEditor::new(config),
        }
    }

    /// Validate and stage a relation.
    ///
    /// Every check runs before the first edit is staged.
    pub fn add_relation(
        &self,
        session: &mut EditSession,
        req: &RelationRequest<'_>,
    ) -> Result<RelationOutcome, Error> {
        validate_identifier(req.field)?;
        if !self.entities.exists(session, req.model)? {
            return Err(Error::not_found("model", req.model));
        }
        if !self.entities.exists(session, req.related_to)? {
            return Err(Error::not_found("related model", req.related_to));
        }

        let related_name = match req.related_name {
            Some(name) => name.to_string(),
            None => default_related_name(req.model, req.kind),
        };
        validate_identifier(&related_name)?;
        if req.field == req.model {
            return Err(Error::Validation(format!(
                "field '{}' cannot share the name of its model",
                req.field
            )));
        }
        if related_name == req.related_to {
            return Err(Error::Validation(format!(
                "related field '{}' cannot share the name of its model; pass a related name",
                related_name
            )));
        }

        let (a_members, b_members, statement) = plan(req, &related_name);
        let additions: Vec<(&str, &MemberDecl)> = a_members
            .iter()
            .map(|m| (req.model, m))
            .chain(b_members.iter().map(|m| (req.related_to, m)))
            .collect();
        self.check_collisions(session, &additions)?;

        let mut fields: BTreeMap<String, FieldMap> = BTreeMap::new();
        for (model, member) in additions {
            self.entities.add_property(session, model, member.clone())?;
            fields
                .entry(model.to_string())
                .or_default()
                .insert(member.name().to_string(), member.ty.to_string());
        }
        self.registry.upsert_relationship(session, &statement)?;

        info!(
            model = %req.model,
            field = %req.field,
            kind = %req.kind,
            related_to = %req.related_to,
            related_name = %related_name,
            "staged relation"
        );
        Ok(RelationOutcome { statement, fields })
    }

    fn check_collisions(
        &self,
        session: &mut EditSession,
        additions: &[(&str, &MemberDecl)],
    ) -> Result<(), Error> {
        for (i, (model, member)) in additions.iter().enumerate() {
            let tree = self.entities.load(session, model)?;
            if let Some(existing) = tree.document().model.member_ignore_case(member.name()) {
                return Err(Error::Conflict(format!(
                    "model '{}' already has a member named '{}'",
                    model,
                    existing.name()
                )));
            }
            let repeated = additions[..i]
                .iter()
                .any(|(m, other)| m == model && other.name().eq_ignore_ascii_case(member.name()));
            if repeated {
                return Err(Error::Conflict(format!(
                    "relation would add '{}' to model '{}' twice",
                    member.name(),
                    model
                )));
            }
        }
        Ok(())
    }

    /// Stage removal of a field. For a relation field the partner property,
    /// the shadow key and the configuration statement go with it.
    pub fn delete_field(
        &self,
        session: &mut EditSession,
        model: &str,
        field: &str,
    ) -> Result<Removals, Error> {
        let tree = self.entities.load(session, model)?;
        let member = tree
            .document()
            .model
            .member(field)
            .cloned()
            .ok_or_else(|| Error::not_found("field", format!("{}.{}", model, field)))?;

        if member.is_key() {
            return Err(Error::Validation(format!(
                "'{}' is the identity of '{}' and cannot be removed",
                field, model
            )));
        }
        if member.is_audit() {
            return Err(Error::Validation(format!(
                "'{}' is an audit property of '{}' and cannot be removed",
                field, model
            )));
        }
        if let Some(owner) = member.foreign_key_of() {
            return Err(Error::Validation(format!(
                "'{}' is the key of the relation to '{}'; remove the relation field instead",
                field, owner
            )));
        }

        let mut targets = vec![(model.to_string(), field.to_string())];
        if let Some(kind) = member.relation() {
            let related = member.ty.name();
            match self.registry.remove_relationship_for(session, model, field)? {
                Some(statement) => {
                    let partner = if statement.source == model && statement.navigation == field {
                        (statement.target.clone(), statement.inverse.clone())
                    } else {
                        (statement.source.clone(), statement.navigation.clone())
                    };
                    targets.push(partner);
                    if let RelationLink::ForeignKey { owner, property } = statement.link {
                        targets.push((owner, property));
                    }
                }
                None if kind.holds_foreign_key() => {
                    debug!(model = %model, field = %field, "relation has no statement");
                    let key = foreign_key_name(related);
                    let owned = tree
                        .document()
                        .model
                        .member(&key)
                        .is_some_and(|m| m.foreign_key_of() == Some(related));
                    if owned {
                        targets.push((model.to_string(), key));
                    }
                }
                None => {
                    debug!(model = %model, field = %field, "relation has no statement");
                }
            }
        }

        self.remove_members(session, targets)
    }

    /// Stage removal of a model with everything that points at it: relation
    /// properties and shadow keys on other models, configuration statements,
    /// the data set, and finally the artifact.
    pub fn delete_entity(&self, session: &mut EditSession, model: &str) -> Result<Removals, Error> {
        if !self.entities.exists(session, model)? {
            return Err(Error::not_found("model", model));
        }

        let mut targets = Vec::new();
        for other in self.entities.model_names(session)? {
            if other == model {
                continue;
            }
            let tree = self.entities.load(session, &other)?;
            for member in &tree.document().model.members {
                let navigates = member.relation().is_some() && member.ty.name() == model;
                let keyed = member.foreign_key_of() == Some(model);
                if navigates || keyed {
                    targets.push((other.clone(), member.name().to_string()));
                }
            }
        }
        let removals = self.remove_members(session, targets)?;

        let statements = self.registry.remove_relationships_for_entity(session, model)?;
        self.registry.remove_set(session, model)?;
        self.entities.delete_entity(session, model)?;

        info!(
            model = %model,
            affected_models = removals.len(),
            statements = statements.len(),
            "staged entity deletion"
        );
        Ok(removals)
    }

    fn remove_members(
        &self,
        session: &mut EditSession,
        targets: Vec<(String, String)>,
    ) -> Result<Removals, Error> {
        let mut removals = Removals::new();
        for (model, member) in targets {
            if !self.entities.exists(session, &model)? {
                debug!(model = %model, member = %member, "owner already gone");
                continue;
            }
            if self.entities.remove_property(session, &model, &member)? {
                removals.entry(model).or_default().push(member);
            }
        }
        Ok(removals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use modelforge_lang::render_registry;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: WorkspaceConfig,
        session: EditSession,
    }

    impl Fixture {
        fn new(models: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = WorkspaceConfig::new(dir.path());
            std::fs::create_dir_all(config.registry_path.parent().unwrap()).unwrap();
            std::fs::write(
                &config.registry_path,
                render_registry(Some(&config.registry_namespace), &config.registry_name),
            )
            .unwrap();
            let mut session = EditSession::new();
            let editor = EntityEditor::new(&config);
            for model in models {
                editor.create_entity(&mut session, model, false).unwrap();
            }
            Self {
                _dir: dir,
                config,
                session,
            }
        }

        fn relate(&mut self, req: RelationRequest<'_>) -> Result<RelationOutcome, Error> {
            RelationshipCoordinator::new(&self.config).add_relation(&mut self.session, &req)
        }

        fn text(&mut self, model: &str) -> String {
            EntityEditor::new(&self.config)
                .load(&mut self.session, model)
                .unwrap()
                .render()
        }

        fn statements(&mut self) -> Vec<RelationConfig> {
            RegistryEditor::new(&self.config)
                .relationships(&mut self.session)
                .unwrap()
        }
    }

    fn request<'r>(model: &'r str, field: &'r str, kind: RelationKind, related_to: &'r str) -> RelationRequest<'r> {
        RelationRequest {
            model,
            field,
            kind,
            related_to,
            related_name: None,
            is_required: false,
        }
    }

    #[test]
    fn test_default_related_names() {
        assert_eq!(default_related_name("Order", RelationKind::OneToOne), "Order");
        assert_eq!(default_related_name("User", RelationKind::OneToMany), "User");
        assert_eq!(default_related_name("Post", RelationKind::ManyToOne), "Posts");
        assert_eq!(default_related_name("Post", RelationKind::ManyToMany), "Posts");
    }

    #[test]
    fn test_one_to_one() {
        let mut fx = Fixture::new(&["Order", "Customer"]);
        let outcome = fx
            .relate(request("Order", "Customer", RelationKind::OneToOne, "Customer"))
            .unwrap();

        let order = fx.text("Order");
        assert!(order.contains("    Customer: Customer? @relation(OneToOne);\n"));
        assert!(order.contains("    CustomerId: Guid? @foreign_key(Customer);\n"));
        assert!(fx.text("Customer").contains("    Order: Order? @relation(OneToOne);\n"));

        assert_eq!(
            outcome.statement.to_string(),
            "Order.hasOne<Customer>(Customer).withOne(Order).hasForeignKey<Order>(CustomerId);"
        );
        assert_eq!(outcome.fields["Order"]["CustomerId"], "Guid");
        assert_eq!(outcome.fields["Customer"]["Order"], "Order");
        assert_eq!(fx.statements().len(), 1);
    }

    #[test]
    fn test_one_to_many_required() {
        let mut fx = Fixture::new(&["User", "Post"]);
        let mut req = request("User", "Posts", RelationKind::OneToMany, "Post");
        req.is_required = true;
        fx.relate(req).unwrap();

        assert!(fx
            .text("User")
            .contains("    Posts: Collection<Post> = [] @relation(OneToMany);\n"));
        let post = fx.text("Post");
        assert!(post.contains("    User: User @relation(ManyToOne);\n"));
        assert!(post.contains("    UserId: Guid @foreign_key(User);\n"));
    }

    #[test]
    fn test_many_to_one_and_many_to_many() {
        let mut fx = Fixture::new(&["Post", "Blog", "Tag"]);
        fx.relate(request("Post", "Blog", RelationKind::ManyToOne, "Blog"))
            .unwrap();
        fx.relate(request("Post", "Tags", RelationKind::ManyToMany, "Tag"))
            .unwrap();

        let post = fx.text("Post");
        assert!(post.contains("    Blog: Blog? @relation(ManyToOne);\n"));
        assert!(post.contains("    BlogId: Guid? @foreign_key(Blog);\n"));
        assert!(post.contains("    Tags: Collection<Tag> = [] @relation(ManyToMany);\n"));
        assert!(fx
            .text("Blog")
            .contains("    Posts: Collection<Post> = [] @relation(OneToMany);\n"));
        assert!(fx
            .text("Tag")
            .contains("    Posts: Collection<Post> = [] @relation(ManyToMany);\n"));

        let statements = fx.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[1].link,
            RelationLink::JoinTable("PostTags".into())
        );
    }

    #[test]
    fn test_validation_runs_before_any_edit() {
        let mut fx = Fixture::new(&["Order", "Customer"]);
        let before = fx.text("Order");

        let err = fx
            .relate(request("Order", "Customer", RelationKind::OneToOne, "Ghost"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = fx
            .relate(request("Order", "Order", RelationKind::OneToOne, "Customer"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = fx
            .relate(request("Order", "1st", RelationKind::OneToOne, "Customer"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(fx.text("Order"), before);
        assert!(fx.statements().is_empty());
    }

    #[test]
    fn test_collision_on_related_side_is_conflict() {
        let mut fx = Fixture::new(&["Order", "Customer"]);
        let editor = EntityEditor::new(&fx.config);
        let member = MemberDecl::new("order", TypeRef::Named("String".into()));
        editor.add_property(&mut fx.session, "Customer", member).unwrap();
        let before = fx.text("Order");

        let err = fx
            .relate(request("Order", "Customer", RelationKind::OneToOne, "Customer"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(fx.text("Order"), before);
    }

    #[test]
    fn test_self_relation_needs_distinct_names() {
        let mut fx = Fixture::new(&["Employee"]);
        let err = fx
            .relate(request("Employee", "Mentor", RelationKind::OneToOne, "Employee"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut req = request("Employee", "Manager", RelationKind::ManyToOne, "Employee");
        req.related_name = Some("Reports");
        let outcome = fx.relate(req).unwrap();
        assert_eq!(outcome.fields.len(), 1);
        assert_eq!(outcome.fields["Employee"].len(), 3);

        let removals = RelationshipCoordinator::new(&fx.config)
            .delete_field(&mut fx.session, "Employee", "Reports")
            .unwrap();
        assert_eq!(removals["Employee"], vec!["Reports", "Manager", "EmployeeId"]);
        assert!(fx.statements().is_empty());
    }

    #[test]
    fn test_delete_field_removes_both_sides() {
        let mut fx = Fixture::new(&["User", "Post"]);
        fx.relate(request("User", "Posts", RelationKind::OneToMany, "Post"))
            .unwrap();

        let coordinator = RelationshipCoordinator::new(&fx.config);
        let err = coordinator
            .delete_field(&mut fx.session, "Post", "UserId")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = coordinator
            .delete_field(&mut fx.session, "Post", "Id")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let removals = coordinator
            .delete_field(&mut fx.session, "Post", "User")
            .unwrap();
        assert_eq!(removals["Post"], vec!["User", "UserId"]);
        assert_eq!(removals["User"], vec!["Posts"]);
        assert!(!fx.text("User").contains("Posts"));
        assert!(fx.statements().is_empty());
    }

    #[test]
    fn test_delete_entity_cascades() {
        let mut fx = Fixture::new(&["User", "Post", "Customer", "Address"]);
        fx.relate(request("User", "Posts", RelationKind::OneToMany, "Post"))
            .unwrap();
        fx.relate(request("Customer", "Address", RelationKind::OneToOne, "Address"))
            .unwrap();
        let customer = fx.text("Customer");

        let removals = RelationshipCoordinator::new(&fx.config)
            .delete_entity(&mut fx.session, "User")
            .unwrap();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals["Post"], vec!["User", "UserId"]);

        let post = fx.text("Post");
        assert!(!post.contains("User"));
        assert_eq!(fx.text("Customer"), customer);

        let statements = fx.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].source, "Customer");
        assert!(!EntityEditor::new(&fx.config)
            .exists(&mut fx.session, "User")
            .unwrap());
    }
}
