//! Modelforge artifact language
//!
//! This crate parses and edits the two kinds of text artifacts modelforge
//! maintains: one entity artifact per domain model, and a single registry
//! artifact that lists the model sets and configures their relations.
//!
//! # Entity artifacts
//!
//! ```text
//! namespace App.Models;
//!
//! model Blog {
//!     Id: Guid @key;
//!     Title: String;
//!     Posts: Collection<Post> = [] @relation(OneToMany);
//! }
//! ```
//!
//! # Registry artifacts
//!
//! ```text
//! namespace App.Data;
//!
//! use App.Models;
//!
//! registry AppRegistry {
//!     set Blogs: Blog;
//!     set Posts: Post;
//!
//!     configure {
//!         Blog.hasMany<Post>(Posts).withOne(Blog).hasForeignKey<Post>(BlogId);
//!         finalize;
//!     }
//! }
//! ```
//!
//! # Editing
//!
//! [`SourceTree`] keeps the original text alongside the parsed tree, so an
//! edit touches exactly one line and everything else round-trips unchanged.
//!
//! ```rust
//! use modelforge_lang::{EntityFile, MemberDecl, SourceTree, TypeRef};
//!
//! let tree: SourceTree<EntityFile> =
//!     SourceTree::parse("model Tag {\n    Id: Guid @key; // identity\n}\n").unwrap();
//! let name = MemberDecl::new("Name", TypeRef::Named("String".into()));
//! let tree = tree.add_member("Tag", &name).unwrap();
//! assert_eq!(
//!     tree.as_str(),
//!     "model Tag {\n    Id: Guid @key; // identity\n    Name: String;\n}\n"
//! );
//! ```

pub mod ast;
pub mod error;
pub mod inflect;
pub mod lexer;
pub mod names;
pub mod parser;
pub mod span;
pub mod tree;

// Re-export main types
pub use ast::{
    render_entity, render_registry, Annotation, Block, ConfigStatement, ConfigureBlock,
    EntityFile, MemberDecl, ModelDecl, RegistryDecl, RegistryFile, RelationConfig, RelationKind,
    RelationLink, SetDecl, TypeRef,
};
pub use error::{EditError, NameError, NameErrorKind, ParseError};
pub use inflect::pluralize;
pub use names::{is_valid_identifier, validate_identifier};
pub use span::{Span, Spanned};
pub use tree::{Anchor, Document, SourceTree};

/// Parse an entity artifact.
///
/// # Example
///
/// ```rust
/// use modelforge_lang::parse_entity;
///
/// let file = parse_entity("model Tag { Id: Guid @key; }").unwrap();
/// assert_eq!(file.model.name.value, "Tag");
/// ```
pub fn parse_entity(source: &str) -> Result<EntityFile, ParseError> {
    parser::parse_entity(source)
}

/// Parse a registry artifact.
pub fn parse_registry(source: &str) -> Result<RegistryFile, ParseError> {
    parser::parse_registry(source)
}

/// Tokenize a source string (for debugging/testing).
pub fn tokenize(source: &str) -> Vec<lexer::SpannedToken> {
    lexer::tokenize(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_source_context() {
        let source = "model Order {\n    Id Guid;\n}";
        let err = parse_entity(source).unwrap_err();
        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 2"));
        assert!(formatted.contains("error"));
    }

    #[test]
    fn test_rendered_entity_parses() {
        let members = vec![
            MemberDecl::new("Id", TypeRef::Named("Guid".into())).annotate(Annotation::Key),
            MemberDecl::new("CreatedAtUtc", TypeRef::Named("DateTime".into()))
                .annotate(Annotation::Audit),
        ];
        let text = render_entity(Some("App.Models"), "Invoice", &members);
        let file = parse_entity(&text).unwrap();
        assert_eq!(file.model.members.len(), 2);
        assert!(file.model.members[1].is_audit());
    }

    #[test]
    fn test_rendered_registry_parses() {
        let text = render_registry(Some("App.Data"), "AppRegistry");
        let file = parse_registry(&text).unwrap();
        assert_eq!(file.registry.name.value, "AppRegistry");
        assert!(file.registry.sets.is_empty());
        assert!(file.registry.configure.is_none());
    }
}
