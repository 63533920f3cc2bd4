//! Domain models as read back from entity artifacts.

use std::collections::{BTreeMap, BTreeSet};

use modelforge_lang::{EntityFile, MemberDecl, RelationKind, TypeRef};
use serde::Serialize;

/// Field name to declared type label, as recorded in the change ledger.
pub type FieldMap = BTreeMap<String, String>;

/// Built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarType {
    String,
    Int,
    Long,
    Short,
    Byte,
    Bool,
    Decimal,
    Double,
    Float,
    DateTime,
    DateOnly,
    TimeOnly,
    Guid,
    /// Raw binary content.
    Binary,
    /// Uploaded media reference.
    Media,
}

impl ScalarType {
    /// All scalar types.
    pub const ALL: [ScalarType; 15] = [
        ScalarType::String,
        ScalarType::Int,
        ScalarType::Long,
        ScalarType::Short,
        ScalarType::Byte,
        ScalarType::Bool,
        ScalarType::Decimal,
        ScalarType::Double,
        ScalarType::Float,
        ScalarType::DateTime,
        ScalarType::DateOnly,
        ScalarType::TimeOnly,
        ScalarType::Guid,
        ScalarType::Binary,
        ScalarType::Media,
    ];

    /// Name used in artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "String",
            ScalarType::Int => "Int",
            ScalarType::Long => "Long",
            ScalarType::Short => "Short",
            ScalarType::Byte => "Byte",
            ScalarType::Bool => "Bool",
            ScalarType::Decimal => "Decimal",
            ScalarType::Double => "Double",
            ScalarType::Float => "Float",
            ScalarType::DateTime => "DateTime",
            ScalarType::DateOnly => "DateOnly",
            ScalarType::TimeOnly => "TimeOnly",
            ScalarType::Guid => "Guid",
            ScalarType::Binary => "Binary",
            ScalarType::Media => "Media",
        }
    }

    /// Look up a scalar by its artifact name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether values of this type are uploaded rather than typed in.
    pub fn is_upload(&self) -> bool {
        matches!(self, ScalarType::Binary | ScalarType::Media)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declared type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum DeclaredType {
    Scalar(ScalarType),
    Enum(String),
    Model(String),
    Collection(String),
}

impl DeclaredType {
    /// Resolve a type reference against the known model names.
    pub fn resolve(ty: &TypeRef, models: &BTreeSet<String>) -> Self {
        match ty {
            TypeRef::Collection(name) => DeclaredType::Collection(name.clone()),
            TypeRef::Named(name) => {
                if let Some(scalar) = ScalarType::from_name(name) {
                    DeclaredType::Scalar(scalar)
                } else if models.contains(name) {
                    DeclaredType::Model(name.clone())
                } else {
                    DeclaredType::Enum(name.clone())
                }
            }
        }
    }
}

impl std::fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeclaredType::Scalar(s) => write!(f, "{}", s),
            DeclaredType::Enum(name) | DeclaredType::Model(name) => f.write_str(name),
            DeclaredType::Collection(name) => write!(f, "Collection<{}>", name),
        }
    }
}

/// A property of a domain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: String,
    pub declared_type: DeclaredType,
    /// Inferred from the absence of `?`.
    pub is_required: bool,
    #[serde(serialize_with = "serialize_relation")]
    pub relation: Option<RelationKind>,
    /// Set iff `relation` is.
    pub related_model: Option<String>,
    pub is_identity: bool,
    pub is_audit: bool,
    /// Model whose relation owns this shadow foreign key.
    pub foreign_key_of: Option<String>,
}

impl Property {
    /// Build from a parsed member.
    pub fn from_member(member: &MemberDecl, models: &BTreeSet<String>) -> Self {
        let relation = member.relation();
        let declared_type = match DeclaredType::resolve(&member.ty, models) {
            DeclaredType::Enum(name) if relation.is_some() => DeclaredType::Model(name),
            other => other,
        };
        Self {
            name: member.name().to_string(),
            declared_type,
            is_required: !member.optional,
            relation,
            related_model: relation.map(|_| member.ty.name().to_string()),
            is_identity: member.is_key(),
            is_audit: member.is_audit(),
            foreign_key_of: member.foreign_key_of().map(|s| s.to_string()),
        }
    }

    /// Type label recorded in the ledger.
    pub fn type_label(&self) -> String {
        self.declared_type.to_string()
    }

    /// Whether the property navigates to `model`.
    pub fn relates_to(&self, model: &str) -> bool {
        self.related_model.as_deref() == Some(model)
    }
}

/// A domain model: one entity artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainModel {
    pub name: String,
    pub namespace: Option<String>,
    /// Properties in declaration order.
    pub properties: Vec<Property>,
}

impl DomainModel {
    /// Build from a parsed entity artifact.
    pub fn from_file(file: &EntityFile, models: &BTreeSet<String>) -> Self {
        Self {
            name: file.model.name.value.clone(),
            namespace: file.namespace.as_ref().map(|n| n.value.clone()),
            properties: file
                .model
                .members
                .iter()
                .map(|m| Property::from_member(m, models))
                .collect(),
        }
    }

    /// The identity property.
    pub fn identity(&self) -> Option<&Property> {
        self.properties.iter().find(|p| p.is_identity)
    }

    /// Property by exact name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether the model carries audit properties.
    pub fn is_auditable(&self) -> bool {
        self.properties.iter().any(|p| p.is_audit)
    }

    /// Properties in artifact order: identity, audit properties, then user
    /// properties in the order they were added.
    pub fn ordered_properties(&self) -> &[Property] {
        &self.properties
    }

    /// Whether any property holds binary or media content.
    pub fn requires_upload(&self) -> bool {
        self.properties
            .iter()
            .any(|p| matches!(p.declared_type, DeclaredType::Scalar(s) if s.is_upload()))
    }

    /// Fields an operator sees, with audit properties left out.
    pub fn fields(&self) -> Vec<FieldInfo> {
        self.properties
            .iter()
            .filter(|p| !p.is_audit)
            .map(FieldInfo::from)
            .collect()
    }
}

/// One row of the field listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_required: bool,
    #[serde(serialize_with = "serialize_relation")]
    pub relation: Option<RelationKind>,
    pub related_model: Option<String>,
}

impl From<&Property> for FieldInfo {
    fn from(p: &Property) -> Self {
        Self {
            name: p.name.clone(),
            type_name: p.type_label(),
            is_required: p.is_required,
            relation: p.relation,
            related_model: p.related_model.clone(),
        }
    }
}

fn serialize_relation<S: serde::Serializer>(
    kind: &Option<RelationKind>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match kind {
        Some(kind) => serializer.serialize_some(kind.as_str()),
        None => serializer.serialize_none(),
    }
}
