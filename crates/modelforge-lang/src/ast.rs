//! Syntax tree for entity and registry artifacts.
//!
//! Nodes keep the spans they were parsed from. The `Display` impls render a
//! node the way the editor writes it into a file, so a member built in code
//! and a member read back from disk have the same text.

use std::fmt;

use crate::span::{Span, Spanned};

/// Relationship cardinality as seen from the declaring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    /// Single reference on both sides; the declaring side holds the key.
    OneToOne,
    /// Collection on the declaring side, single reference on the other.
    OneToMany,
    /// Single reference on the declaring side, collection on the other.
    ManyToOne,
    /// Collections on both sides, joined through a link table.
    ManyToMany,
}

impl RelationKind {
    /// All relation kinds, in declaration order.
    pub const ALL: [RelationKind; 4] = [
        RelationKind::OneToOne,
        RelationKind::OneToMany,
        RelationKind::ManyToOne,
        RelationKind::ManyToMany,
    ];

    /// Canonical spelling used in artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "OneToOne",
            RelationKind::OneToMany => "OneToMany",
            RelationKind::ManyToOne => "ManyToOne",
            RelationKind::ManyToMany => "ManyToMany",
        }
    }

    /// Parse a kind name, accepting `OneToMany`, `onetomany` and `one_to_many`.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        RelationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_ascii_lowercase() == folded)
    }

    /// The kind the related side declares for the same relationship.
    pub fn inverse(&self) -> Self {
        match self {
            RelationKind::OneToOne => RelationKind::OneToOne,
            RelationKind::OneToMany => RelationKind::ManyToOne,
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::ManyToMany => RelationKind::ManyToMany,
        }
    }

    /// Whether the declaring side holds a collection.
    pub fn is_collection(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// Whether the declaring side carries the shadow foreign key.
    pub fn holds_foreign_key(&self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ManyToOne)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opening and closing brace of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Span of `{`.
    pub open: Span,
    /// Span of `}`.
    pub close: Span,
}

// ---------------------------------------------------------------------------
// Entity artifacts
// ---------------------------------------------------------------------------

/// A parsed entity artifact: optional namespace plus one model declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFile {
    /// `namespace` declaration, if present.
    pub namespace: Option<Spanned<String>>,
    /// The model declared by the file.
    pub model: ModelDecl,
}

/// A `model Name { ... }` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDecl {
    /// Model name.
    pub name: Spanned<String>,
    /// Members in source order.
    pub members: Vec<MemberDecl>,
    /// Body braces.
    pub body: Block,
    /// Span from `model` to the closing brace.
    pub span: Span,
}

impl ModelDecl {
    /// Whether any member satisfies `predicate`.
    pub fn has_member(&self, predicate: impl Fn(&MemberDecl) -> bool) -> bool {
        self.members.iter().any(predicate)
    }

    /// Member with exactly this name.
    pub fn member(&self, name: &str) -> Option<&MemberDecl> {
        self.members.iter().find(|m| m.name.value == name)
    }

    /// Member whose name matches ignoring ASCII case.
    pub fn member_ignore_case(&self, name: &str) -> Option<&MemberDecl> {
        self.members
            .iter()
            .find(|m| m.name.value.eq_ignore_ascii_case(name))
    }
}

/// The declared type of a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// A scalar, enum, or model name.
    Named(String),
    /// `Collection<Model>`.
    Collection(String),
}

impl TypeRef {
    /// Referenced type name, unwrapping collections.
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Named(name) | TypeRef::Collection(name) => name,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::Collection(name) => write!(f, "Collection<{}>", name),
        }
    }
}

/// Member annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// `@key`: the identity property.
    Key,
    /// `@audit`: system-maintained timestamp/actor property.
    Audit,
    /// `@relation(Kind)`: navigation to the model named by the member type.
    Relation(RelationKind),
    /// `@foreign_key(Model)`: shadow key owned by the relation to `Model`.
    ForeignKey(String),
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Key => f.write_str("@key"),
            Annotation::Audit => f.write_str("@audit"),
            Annotation::Relation(kind) => write!(f, "@relation({})", kind),
            Annotation::ForeignKey(model) => write!(f, "@foreign_key({})", model),
        }
    }
}

/// A `Name: Type? = [] @annotations;` member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDecl {
    /// Member name.
    pub name: Spanned<String>,
    /// Declared type.
    pub ty: TypeRef,
    /// `?` suffix.
    pub optional: bool,
    /// `= []` initializer.
    pub empty_init: bool,
    /// Annotations in source order.
    pub annotations: Vec<Annotation>,
    /// Span from the name to the terminating `;`.
    pub span: Span,
}

impl MemberDecl {
    /// Build a member that has not been placed in a file yet.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: Spanned::new(name.into(), Span::default()),
            ty,
            optional: false,
            empty_init: false,
            annotations: Vec::new(),
            span: Span::default(),
        }
    }

    /// Mark the member optional.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Add an `= []` initializer.
    pub fn with_empty_init(mut self) -> Self {
        self.empty_init = true;
        self
    }

    /// Append an annotation.
    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// The member name.
    pub fn name(&self) -> &str {
        &self.name.value
    }

    /// Relation kind, if the member is a navigation.
    pub fn relation(&self) -> Option<RelationKind> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Relation(kind) => Some(*kind),
            _ => None,
        })
    }

    /// Model whose relation owns this shadow key, if any.
    pub fn foreign_key_of(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::ForeignKey(model) => Some(model.as_str()),
            _ => None,
        })
    }

    /// Whether this is the identity property.
    pub fn is_key(&self) -> bool {
        self.annotations.contains(&Annotation::Key)
    }

    /// Whether this is an audit property.
    pub fn is_audit(&self) -> bool {
        self.annotations.contains(&Annotation::Audit)
    }
}

impl fmt::Display for MemberDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name.value, self.ty)?;
        if self.optional {
            f.write_str("?")?;
        }
        if self.empty_init {
            f.write_str(" = []")?;
        }
        for annotation in &self.annotations {
            write!(f, " {}", annotation)?;
        }
        f.write_str(";")
    }
}

/// Render a complete entity artifact from a namespace, name and members.
pub fn render_entity(namespace: Option<&str>, name: &str, members: &[MemberDecl]) -> String {
    let mut out = String::new();
    if let Some(ns) = namespace {
        out.push_str(&format!("namespace {};\n\n", ns));
    }
    out.push_str(&format!("model {} {{\n", name));
    for member in members {
        out.push_str(&format!("    {}\n", member));
    }
    out.push_str("}\n");
    out
}

// ---------------------------------------------------------------------------
// Registry artifacts
// ---------------------------------------------------------------------------

/// A parsed registry artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryFile {
    /// `namespace` declaration, if present.
    pub namespace: Option<Spanned<String>>,
    /// `use` imports in source order; each span covers the whole statement.
    pub imports: Vec<Spanned<String>>,
    /// The registry declaration.
    pub registry: RegistryDecl,
}

impl RegistryFile {
    /// Whether `namespace` is imported.
    pub fn imports_namespace(&self, namespace: &str) -> bool {
        self.imports.iter().any(|i| i.value == namespace)
    }
}

/// A `registry Name { ... }` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryDecl {
    /// Registry name.
    pub name: Spanned<String>,
    /// Set-references in source order.
    pub sets: Vec<SetDecl>,
    /// The shared configuration block, once created.
    pub configure: Option<ConfigureBlock>,
    /// Body braces.
    pub body: Block,
    /// Span from `registry` to the closing brace.
    pub span: Span,
}

impl RegistryDecl {
    /// Set-reference targeting `model`.
    pub fn set_for(&self, model: &str) -> Option<&SetDecl> {
        self.sets.iter().find(|s| s.model.value == model)
    }
}

/// A `set Name: Model;` set-reference.
#[derive(Debug, Clone, PartialEq)]
pub struct SetDecl {
    /// Property name of the set.
    pub name: Spanned<String>,
    /// Model the set holds.
    pub model: Spanned<String>,
    /// Span from `set` to `;`.
    pub span: Span,
}

impl fmt::Display for SetDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set {}: {};", self.name.value, self.model.value)
    }
}

/// The `configure { ... }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureBlock {
    /// Statements in source order.
    pub statements: Vec<ConfigStatement>,
    /// Body braces.
    pub body: Block,
    /// Span from `configure` to the closing brace.
    pub span: Span,
}

impl ConfigureBlock {
    /// Relation statements, skipping `finalize`.
    pub fn relations(&self) -> impl Iterator<Item = &RelationConfig> {
        self.statements.iter().filter_map(|s| match s {
            ConfigStatement::Relation(r) => Some(r),
            ConfigStatement::Finalize(_) => None,
        })
    }

    /// Whether the last statement is `finalize;`.
    pub fn is_finalized(&self) -> bool {
        matches!(self.statements.last(), Some(ConfigStatement::Finalize(_)))
    }
}

/// A statement inside `configure`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigStatement {
    /// A relationship configuration chain.
    Relation(RelationConfig),
    /// The trailing `finalize;` call.
    Finalize(Span),
}

impl ConfigStatement {
    /// Span of the statement including `;`.
    pub fn span(&self) -> Span {
        match self {
            ConfigStatement::Relation(r) => r.span,
            ConfigStatement::Finalize(span) => *span,
        }
    }
}

/// How the two sides of a relation are linked in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationLink {
    /// `hasForeignKey<Owner>(Property)`.
    ForeignKey {
        /// Model holding the key.
        owner: String,
        /// Shadow key property.
        property: String,
    },
    /// `usingTable(Name)` for many-to-many.
    JoinTable(String),
}

/// `Source.hasX<Target>(navigation).withY(inverse).link;`
#[derive(Debug, Clone, PartialEq)]
pub struct RelationConfig {
    /// Declaring model.
    pub source: String,
    /// Related model.
    pub target: String,
    /// Kind from the source's point of view.
    pub kind: RelationKind,
    /// Navigation property on the source.
    pub navigation: String,
    /// Navigation property on the target.
    pub inverse: String,
    /// Key or join table.
    pub link: RelationLink,
    /// Span including `;`.
    pub span: Span,
}

impl RelationConfig {
    /// Build an unplaced statement.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: RelationKind,
        navigation: impl Into<String>,
        inverse: impl Into<String>,
        link: RelationLink,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            navigation: navigation.into(),
            inverse: inverse.into(),
            link,
            span: Span::default(),
        }
    }

    /// Whether `model` is either end of the relation.
    pub fn references(&self, model: &str) -> bool {
        self.source == model || self.target == model
    }

    /// Whether this statement configures `model.property` from either side.
    pub fn configures(&self, model: &str, property: &str) -> bool {
        (self.source == model && self.navigation == property)
            || (self.target == model && self.inverse == property)
    }

    /// Same relation ignoring spans.
    pub fn same_relation(&self, other: &RelationConfig) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.kind == other.kind
            && self.navigation == other.navigation
            && self.inverse == other.inverse
            && self.link == other.link
    }
}

impl fmt::Display for RelationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (has, with) = match self.kind {
            RelationKind::OneToOne => ("hasOne", "withOne"),
            RelationKind::OneToMany => ("hasMany", "withOne"),
            RelationKind::ManyToOne => ("hasOne", "withMany"),
            RelationKind::ManyToMany => ("hasMany", "withMany"),
        };
        write!(
            f,
            "{}.{}<{}>({}).{}({})",
            self.source, has, self.target, self.navigation, with, self.inverse
        )?;
        match &self.link {
            RelationLink::ForeignKey { owner, property } => {
                write!(f, ".hasForeignKey<{}>({});", owner, property)
            }
            RelationLink::JoinTable(table) => write!(f, ".usingTable({});", table),
        }
    }
}

/// Render an empty registry artifact.
pub fn render_registry(namespace: Option<&str>, name: &str) -> String {
    let mut out = String::new();
    if let Some(ns) = namespace {
        out.push_str(&format!("namespace {};\n\n", ns));
    }
    out.push_str(&format!("registry {} {{\n}}\n", name));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kind_names() {
        assert_eq!(RelationKind::from_name("OneToMany"), Some(RelationKind::OneToMany));
        assert_eq!(RelationKind::from_name("many_to_many"), Some(RelationKind::ManyToMany));
        assert_eq!(RelationKind::from_name("onetoone"), Some(RelationKind::OneToOne));
        assert_eq!(RelationKind::from_name("String"), None);
    }

    #[test]
    fn test_relation_kind_inverse() {
        for kind in RelationKind::ALL {
            assert_eq!(kind.inverse().inverse(), kind);
        }
        assert!(RelationKind::ManyToOne.holds_foreign_key());
        assert!(!RelationKind::OneToMany.holds_foreign_key());
    }

    #[test]
    fn test_member_display() {
        let member = MemberDecl::new("Posts", TypeRef::Collection("Post".into()))
            .with_empty_init()
            .annotate(Annotation::Relation(RelationKind::OneToMany));
        assert_eq!(
            member.to_string(),
            "Posts: Collection<Post> = [] @relation(OneToMany);"
        );

        let fk = MemberDecl::new("UserId", TypeRef::Named("Guid".into()))
            .optional(true)
            .annotate(Annotation::ForeignKey("User".into()));
        assert_eq!(fk.to_string(), "UserId: Guid? @foreign_key(User);");
    }

    #[test]
    fn test_relation_config_display() {
        let config = RelationConfig::new(
            "Post",
            "Tag",
            RelationKind::ManyToMany,
            "Tags",
            "Posts",
            RelationLink::JoinTable("PostTags".into()),
        );
        assert_eq!(
            config.to_string(),
            "Post.hasMany<Tag>(Tags).withMany(Posts).usingTable(PostTags);"
        );
        assert!(config.references("Tag"));
        assert!(config.configures("Tag", "Posts"));
        assert!(!config.configures("Tag", "Tags"));
    }

    #[test]
    fn test_render_entity() {
        let id = MemberDecl::new("Id", TypeRef::Named("Guid".into())).annotate(Annotation::Key);
        assert_eq!(
            render_entity(Some("App.Models"), "Product", &[id]),
            "namespace App.Models;\n\nmodel Product {\n    Id: Guid @key;\n}\n"
        );
    }
}
