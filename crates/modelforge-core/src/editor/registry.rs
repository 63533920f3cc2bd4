//! Registry artifact editing: data sets and relationship configuration.

use modelforge_lang::{
    pluralize, Anchor, ConfigStatement, RegistryFile, RelationConfig, SourceTree,
};
use tracing::{debug, info};

use crate::config::WorkspaceConfig;
use crate::error::Error;
use crate::session::EditSession;

const CONFIGURE_SKELETON: &str = "configure {\n    finalize;\n}";
const FINALIZE: &str = "finalize;";

/// Edits the single registry artifact through an [`EditSession`].
#[derive(Debug, Clone, Copy)]
pub struct RegistryEditor<'a> {
    config: &'a WorkspaceConfig,
}

impl<'a> RegistryEditor<'a> {
    pub fn new(config: &'a WorkspaceConfig) -> Self {
        Self { config }
    }

    /// The registry artifact, staged or from disk.
    pub fn load(&self, session: &mut EditSession) -> Result<SourceTree<RegistryFile>, Error> {
        let path = &self.config.registry_path;
        session
            .registry(path)?
            .ok_or_else(|| Error::not_found("registry", path.display().to_string()))
    }

    fn stage(&self, session: &mut EditSession, tree: SourceTree<RegistryFile>) -> Result<(), Error> {
        session.stage_registry(&self.config.registry_path, tree)
    }

    /// Register a data set for `model`, importing `namespace` when the
    /// registry does not see it yet. Returns false when the set exists.
    pub fn add_set(
        &self,
        session: &mut EditSession,
        model: &str,
        namespace: Option<&str>,
    ) -> Result<bool, Error> {
        let mut tree = self.load(session)?;
        let registry = &tree.document().registry;
        if registry.set_for(model).is_some() {
            debug!(model = %model, "data set already registered");
            return Ok(false);
        }

        let set_name = pluralize(model);
        if let Some(clash) = registry.sets.iter().find(|s| s.name.value == set_name) {
            return Err(Error::Conflict(format!(
                "data set '{}' already exists for model '{}'",
                set_name, clash.model.value
            )));
        }

        let anchor = match registry.sets.last() {
            Some(last) => Anchor::After(last.span),
            None => Anchor::Start,
        };
        let body = registry.body;
        tree = tree.insert_member(body, anchor, &format!("set {}: {};", set_name, model))?;

        if let Some(namespace) = namespace {
            tree = ensure_import(tree, namespace)?;
        }
        self.stage(session, tree)?;

        info!(model = %model, set = %set_name, "staged data set");
        Ok(true)
    }

    /// Remove the data set for `model`. Returns false when there is none.
    pub fn remove_set(&self, session: &mut EditSession, model: &str) -> Result<bool, Error> {
        let tree = self.load(session)?;
        let Some(span) = tree.document().registry.set_for(model).map(|s| s.span) else {
            return Ok(false);
        };
        let tree = tree.remove_member(span)?;
        self.stage(session, tree)?;

        info!(model = %model, "staged data set removal");
        Ok(true)
    }

    /// Configured relationships, in source order.
    pub fn relationships(&self, session: &mut EditSession) -> Result<Vec<RelationConfig>, Error> {
        let tree = self.load(session)?;
        Ok(tree
            .document()
            .registry
            .configure
            .iter()
            .flat_map(|c| c.relations().cloned())
            .collect())
    }

    /// Add a relationship statement unless an identical one exists.
    ///
    /// The configure block is created on first use. New statements go after
    /// the existing relations and `finalize;` is kept as the last statement.
    /// Returns false when nothing changed.
    pub fn upsert_relationship(
        &self,
        session: &mut EditSession,
        statement: &RelationConfig,
    ) -> Result<bool, Error> {
        let mut tree = self.load(session)?;
        if let Some(configure) = &tree.document().registry.configure {
            if configure.relations().any(|r| r.same_relation(statement)) {
                debug!(statement = %statement, "relationship already configured");
                return Ok(false);
            }
        }

        if tree.document().registry.configure.is_none() {
            let registry = &tree.document().registry;
            let snippet = if registry.sets.is_empty() {
                CONFIGURE_SKELETON.to_string()
            } else {
                format!("\n{}", CONFIGURE_SKELETON)
            };
            let body = registry.body;
            tree = tree.insert_member(body, Anchor::End, &snippet)?;
        }

        while let Some(span) = finalize_span(&tree) {
            tree = tree.remove_member(span)?;
        }

        let (body, anchor) = configure_anchor(&tree)?;
        tree = tree.insert_member(body, anchor, &statement.to_string())?;
        let (body, anchor) = configure_anchor(&tree)?;
        tree = tree.insert_member(body, anchor, FINALIZE)?;
        self.stage(session, tree)?;

        info!(statement = %statement, "staged relationship");
        Ok(true)
    }

    /// Remove every statement that has `model` at either end.
    pub fn remove_relationships_for_entity(
        &self,
        session: &mut EditSession,
        model: &str,
    ) -> Result<Vec<RelationConfig>, Error> {
        self.remove_where(session, |r| r.references(model))
    }

    /// Remove the statement configuring `model.property`, if any.
    pub fn remove_relationship_for(
        &self,
        session: &mut EditSession,
        model: &str,
        property: &str,
    ) -> Result<Option<RelationConfig>, Error> {
        let removed = self.remove_where(session, |r| r.configures(model, property))?;
        Ok(removed.into_iter().next())
    }

    fn remove_where(
        &self,
        session: &mut EditSession,
        predicate: impl Fn(&RelationConfig) -> bool,
    ) -> Result<Vec<RelationConfig>, Error> {
        let mut tree = self.load(session)?;
        let mut removed = Vec::new();
        loop {
            let next = tree
                .document()
                .registry
                .configure
                .as_ref()
                .and_then(|c| c.relations().find(|r| predicate(r)).cloned());
            let Some(statement) = next else { break };
            tree = tree.remove_member(statement.span)?;
            info!(statement = %statement, "staged relationship removal");
            removed.push(statement);
        }
        if !removed.is_empty() {
            self.stage(session, tree)?;
        }
        Ok(removed)
    }
}

/// Add `use namespace;` unless the registry already sees the namespace.
fn ensure_import(
    tree: SourceTree<RegistryFile>,
    namespace: &str,
) -> Result<SourceTree<RegistryFile>, Error> {
    let file = tree.document();
    let own = file.namespace.as_ref().map(|n| n.value.as_str());
    if own == Some(namespace) || file.imports_namespace(namespace) {
        return Ok(tree);
    }

    let line = format!("use {};", namespace);
    let (after, snippet) = match (file.imports.last(), &file.namespace) {
        (Some(last), _) => (Some(last.span), line),
        (None, Some(ns)) => (Some(ns.span), format!("\n{}", line)),
        (None, None) => (None, format!("{}\n", line)),
    };
    let tree = tree.insert_line_after(after, &snippet)?;
    debug!(namespace = %namespace, "added registry import");
    Ok(tree)
}

fn finalize_span(tree: &SourceTree<RegistryFile>) -> Option<modelforge_lang::Span> {
    tree.document()
        .registry
        .configure
        .as_ref()?
        .statements
        .iter()
        .find_map(|s| match s {
            ConfigStatement::Finalize(span) => Some(*span),
            ConfigStatement::Relation(_) => None,
        })
}

fn configure_anchor(
    tree: &SourceTree<RegistryFile>,
) -> Result<(modelforge_lang::Block, Anchor), Error> {
    let configure = tree
        .document()
        .registry
        .configure
        .as_ref()
        .ok_or_else(|| Error::Validation("registry has no configure block".to_string()))?;
    let anchor = match configure.statements.last() {
        Some(last) => Anchor::After(last.span()),
        None => Anchor::Start,
    };
    Ok((configure.body, anchor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use modelforge_lang::{render_registry, RelationKind, RelationLink};
    use pretty_assertions::assert_eq;

    fn setup(dir: &tempfile::TempDir) -> WorkspaceConfig {
        let config = WorkspaceConfig::new(dir.path());
        std::fs::create_dir_all(config.registry_path.parent().unwrap()).unwrap();
        std::fs::write(
            &config.registry_path,
            render_registry(Some(&config.registry_namespace), &config.registry_name),
        )
        .unwrap();
        config
    }

    fn blog_posts() -> RelationConfig {
        RelationConfig::new(
            "Blog",
            "Post",
            RelationKind::OneToMany,
            "Posts",
            "Blog",
            RelationLink::ForeignKey {
                owner: "Post".into(),
                property: "BlogId".into(),
            },
        )
    }

    #[test]
    fn test_add_set_with_import() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();

        assert!(editor.add_set(&mut session, "Product", Some("App.Models")).unwrap());
        assert!(editor.add_set(&mut session, "Category", Some("App.Models")).unwrap());
        assert!(!editor.add_set(&mut session, "Product", Some("App.Models")).unwrap());

        let tree = editor.load(&mut session).unwrap();
        assert_eq!(
            tree.as_str(),
            "namespace App.Data;\n\nuse App.Models;\n\nregistry AppRegistry {\n    set Products: Product;\n    set Categories: Category;\n}\n"
        );
    }

    #[test]
    fn test_same_namespace_needs_no_import() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();

        editor.add_set(&mut session, "Tag", Some("App.Data")).unwrap();
        let tree = editor.load(&mut session).unwrap();
        assert!(tree.document().imports.is_empty());
    }

    #[test]
    fn test_remove_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();
        editor.add_set(&mut session, "Tag", None).unwrap();

        assert!(editor.remove_set(&mut session, "Tag").unwrap());
        assert!(!editor.remove_set(&mut session, "Tag").unwrap());
        let tree = editor.load(&mut session).unwrap();
        assert!(tree.document().registry.sets.is_empty());
    }

    #[test]
    fn test_upsert_creates_configure_and_keeps_finalize_last() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();
        editor.add_set(&mut session, "Blog", None).unwrap();
        editor.add_set(&mut session, "Post", None).unwrap();

        assert!(editor.upsert_relationship(&mut session, &blog_posts()).unwrap());
        assert!(!editor.upsert_relationship(&mut session, &blog_posts()).unwrap());

        let tags = RelationConfig::new(
            "Post",
            "Tag",
            RelationKind::ManyToMany,
            "Tags",
            "Posts",
            RelationLink::JoinTable("PostTags".into()),
        );
        assert!(editor.upsert_relationship(&mut session, &tags).unwrap());

        let tree = editor.load(&mut session).unwrap();
        let configure = tree.document().registry.configure.as_ref().unwrap();
        assert_eq!(configure.relations().count(), 2);
        assert!(configure.is_finalized());
        assert_eq!(configure.statements.len(), 3);
        assert!(tree.as_str().contains(
            "    configure {\n        Blog.hasMany<Post>(Posts).withOne(Blog).hasForeignKey<Post>(BlogId);\n"
        ));
    }

    #[test]
    fn test_remove_relationships_for_entity() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();

        let unrelated = RelationConfig::new(
            "Customer",
            "Address",
            RelationKind::OneToOne,
            "Address",
            "Customer",
            RelationLink::ForeignKey {
                owner: "Customer".into(),
                property: "AddressId".into(),
            },
        );
        editor.upsert_relationship(&mut session, &blog_posts()).unwrap();
        editor.upsert_relationship(&mut session, &unrelated).unwrap();

        let removed = editor.remove_relationships_for_entity(&mut session, "Post").unwrap();
        assert_eq!(removed.len(), 1);

        let remaining = editor.relationships(&mut session).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].same_relation(&unrelated));
        let tree = editor.load(&mut session).unwrap();
        assert!(tree.document().registry.configure.as_ref().unwrap().is_finalized());
    }

    #[test]
    fn test_remove_relationship_for_either_side() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();
        editor.upsert_relationship(&mut session, &blog_posts()).unwrap();

        assert!(editor
            .remove_relationship_for(&mut session, "Post", "Posts")
            .unwrap()
            .is_none());
        let removed = editor
            .remove_relationship_for(&mut session, "Post", "Blog")
            .unwrap()
            .unwrap();
        assert_eq!(removed.source, "Blog");
        assert!(editor.relationships(&mut session).unwrap().is_empty());
    }

    #[test]
    fn test_set_name_clash_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(&dir);
        std::fs::write(
            &config.registry_path,
            "namespace App.Data;\n\nregistry AppRegistry {\n    set Statuses: StatusRow;\n}\n",
        )
        .unwrap();
        let editor = RegistryEditor::new(&config);
        let mut session = EditSession::new();

        let err = editor.add_set(&mut session, "Status", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_missing_registry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::new(dir.path());
        let err = RegistryEditor::new(&config)
            .load(&mut EditSession::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
