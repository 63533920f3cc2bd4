//! Lossless source trees.
//!
//! A [`SourceTree`] owns the exact text of an artifact together with the
//! syntax tree parsed from it. Edits splice the text at span boundaries and
//! re-parse, so everything outside the edited line (comments, blank lines,
//! unusual formatting) survives byte for byte.

use std::path::Path;

use crate::ast::{Block, EntityFile, MemberDecl, ModelDecl, RegistryFile};
use crate::error::{EditError, ParseError};
use crate::parser::{parse_entity, parse_registry};
use crate::span::{indent_at, line_end, line_start, Span};

/// Indentation used when a block has no member to copy it from.
const INDENT_UNIT: &str = "    ";

/// A parsed artifact type.
pub trait Document: Sized {
    /// Parse the artifact text.
    fn parse(source: &str) -> Result<Self, ParseError>;
}

impl Document for EntityFile {
    fn parse(source: &str) -> Result<Self, ParseError> {
        parse_entity(source)
    }
}

impl Document for RegistryFile {
    fn parse(source: &str) -> Result<Self, ParseError> {
        parse_registry(source)
    }
}

/// Where a new member goes inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// First line of the block.
    Start,
    /// The line after the statement with this span.
    After(Span),
    /// Last line of the block.
    End,
}

/// Artifact text plus its syntax tree.
#[derive(Debug, Clone)]
pub struct SourceTree<D> {
    text: String,
    document: D,
}

impl<D: Document> SourceTree<D> {
    /// Parse text into a tree.
    pub fn parse(text: impl Into<String>) -> Result<Self, ParseError> {
        let text = text.into();
        let document = D::parse(&text)?;
        Ok(Self { text, document })
    }

    /// Read and parse an artifact from disk.
    pub fn load(path: &Path) -> Result<Self, EditError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EditError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(EditError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        match D::parse(&text) {
            Ok(document) => Ok(Self { text, document }),
            Err(error) => Err(EditError::Unparsable {
                path: path.to_path_buf(),
                rendered: error.format_with_source(&text),
                error,
            }),
        }
    }

    /// The syntax tree.
    pub fn document(&self) -> &D {
        &self.document
    }

    /// The current text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// An owned copy of the current text.
    pub fn render(&self) -> String {
        self.text.clone()
    }

    /// Insert `snippet` as a new line of `block`.
    ///
    /// The new line copies the indentation of the anchor statement; at the
    /// start or end of a block it is indented one unit past the brace line.
    /// Every line of a multi-line snippet gets the same prefix.
    pub fn insert_member(self, block: Block, anchor: Anchor, snippet: &str) -> Result<Self, EditError> {
        self.check_span(block.open)?;
        self.check_span(block.close)?;
        let text = &self.text;

        let (offset, insertion) = match anchor {
            Anchor::After(span) => {
                self.check_span(span)?;
                let end = line_end(text, span.end);
                if is_trivia(&text[span.end..end]) {
                    let indent = indent_at(text, span.start);
                    (end, format!("\n{}", indent_lines(snippet, indent)))
                } else {
                    (span.end, format!(" {}", snippet))
                }
            }
            Anchor::Start if is_trivia(&text[block.open.end..line_end(text, block.open.end)]) => {
                let indent = format!("{}{}", indent_at(text, block.open.start), INDENT_UNIT);
                (
                    line_end(text, block.open.end),
                    format!("\n{}", indent_lines(snippet, &indent)),
                )
            }
            Anchor::Start | Anchor::End => {
                let close_line = line_start(text, block.close.start);
                let close_indent = indent_at(text, block.close.start);
                let indent = format!("{}{}", close_indent, INDENT_UNIT);
                if text[close_line..block.close.start].trim().is_empty() {
                    (close_line, format!("{}\n", indent_lines(snippet, &indent)))
                } else {
                    (
                        block.close.start,
                        format!("\n{}\n{}", indent_lines(snippet, &indent), close_indent),
                    )
                }
            }
        };

        self.splice(Span::new(offset, offset), &insertion)
    }

    /// Remove the statement at `span`.
    ///
    /// When the statement is alone on its line (a trailing `//` comment
    /// counts as part of it) the whole line goes; otherwise only the
    /// statement and the spaces after it.
    pub fn remove_member(self, span: Span) -> Result<Self, EditError> {
        self.check_span(span)?;
        let text = &self.text;

        let start = line_start(text, span.start);
        let end = line_end(text, span.end);
        let alone = text[start..span.start].trim().is_empty() && is_trivia(&text[span.end..end]);

        let cut = if alone {
            if end < text.len() {
                Span::new(start, end + 1)
            } else if start > 0 {
                Span::new(start - 1, end)
            } else {
                Span::new(start, end)
            }
        } else {
            let trailing = text[span.end..]
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .count();
            Span::new(span.start, span.end + trailing)
        };

        self.splice(cut, "")
    }

    /// Insert `snippet` on its own line after the line holding `after`, or
    /// at the top of the file when `after` is `None`.
    ///
    /// The snippet is inserted verbatim, without indentation.
    pub fn insert_line_after(self, after: Option<Span>, snippet: &str) -> Result<Self, EditError> {
        match after {
            Some(span) => {
                self.check_span(span)?;
                let offset = line_end(&self.text, span.end);
                self.splice(Span::new(offset, offset), &format!("\n{}", snippet))
            }
            None => self.splice(Span::new(0, 0), &format!("{}\n", snippet)),
        }
    }

    fn check_span(&self, span: Span) -> Result<(), EditError> {
        let valid = span.start <= span.end
            && span.end <= self.text.len()
            && self.text.is_char_boundary(span.start)
            && self.text.is_char_boundary(span.end);
        if valid {
            Ok(())
        } else {
            Err(EditError::InvalidSpan(span))
        }
    }

    fn splice(self, range: Span, replacement: &str) -> Result<Self, EditError> {
        let mut text = String::with_capacity(self.text.len() + replacement.len());
        text.push_str(&self.text[..range.start]);
        text.push_str(replacement);
        text.push_str(&self.text[range.end..]);
        let document = D::parse(&text).map_err(EditError::Reparse)?;
        Ok(Self { text, document })
    }
}

impl SourceTree<EntityFile> {
    /// The model declaration named `name`, if this artifact declares it.
    pub fn find_type_declaration(&self, name: &str) -> Option<&ModelDecl> {
        let model = &self.document.model;
        (model.name.value == name).then_some(model)
    }

    /// Append `member` after the last member of `type_name`.
    pub fn add_member(self, type_name: &str, member: &MemberDecl) -> Result<Self, EditError> {
        let model = self
            .find_type_declaration(type_name)
            .ok_or_else(|| EditError::TypeNotFound(type_name.to_string()))?;
        let anchor = match model.members.last() {
            Some(last) => Anchor::After(last.span),
            None => Anchor::End,
        };
        let body = model.body;
        self.insert_member(body, anchor, &member.to_string())
    }

    /// Remove the member named `member` from `type_name`.
    pub fn remove_member_named(self, type_name: &str, member: &str) -> Result<Self, EditError> {
        let model = self
            .find_type_declaration(type_name)
            .ok_or_else(|| EditError::TypeNotFound(type_name.to_string()))?;
        let span = model
            .member(member)
            .map(|m| m.span)
            .ok_or_else(|| EditError::MemberNotFound {
                owner: type_name.to_string(),
                member: member.to_string(),
            })?;
        self.remove_member(span)
    }
}

/// Whitespace, optionally followed by a line comment.
fn is_trivia(rest: &str) -> bool {
    let rest = rest.trim();
    rest.is_empty() || rest.starts_with("//")
}

fn indent_lines(snippet: &str, indent: &str) -> String {
    snippet
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Annotation, RelationKind, TypeRef};
    use pretty_assertions::assert_eq;

    const BLOG: &str = "\
namespace App.Models;

// Blog aggregate root.
model Blog {
  Id: Guid @key;
  Title: String;    // shown in lists
  Rating:   Int?;
}
";

    fn entity(text: &str) -> SourceTree<EntityFile> {
        SourceTree::parse(text).unwrap()
    }

    #[test]
    fn test_render_is_lossless() {
        let tree = entity(BLOG);
        assert_eq!(tree.render(), BLOG);
    }

    #[test]
    fn test_add_member_copies_sibling_indent() {
        let member = MemberDecl::new("Posts", TypeRef::Collection("Post".into()))
            .with_empty_init()
            .annotate(Annotation::Relation(RelationKind::OneToMany));
        let tree = entity(BLOG).add_member("Blog", &member).unwrap();

        assert_eq!(
            tree.as_str(),
            "\
namespace App.Models;

// Blog aggregate root.
model Blog {
  Id: Guid @key;
  Title: String;    // shown in lists
  Rating:   Int?;
  Posts: Collection<Post> = [] @relation(OneToMany);
}
"
        );
        assert!(tree.document().model.member("Posts").is_some());
    }

    #[test]
    fn test_add_member_to_empty_body() {
        let tree = entity("model Tag {\n}\n");
        let id = MemberDecl::new("Id", TypeRef::Named("Guid".into())).annotate(Annotation::Key);
        let tree = tree.add_member("Tag", &id).unwrap();
        assert_eq!(tree.as_str(), "model Tag {\n    Id: Guid @key;\n}\n");

        let inline = entity("model Tag {}").add_member("Tag", &id).unwrap();
        assert_eq!(inline.as_str(), "model Tag {\n    Id: Guid @key;\n}");
    }

    #[test]
    fn test_remove_member_with_trailing_comment() {
        let tree = entity(BLOG).remove_member_named("Blog", "Title").unwrap();
        assert_eq!(
            tree.as_str(),
            "\
namespace App.Models;

// Blog aggregate root.
model Blog {
  Id: Guid @key;
  Rating:   Int?;
}
"
        );
    }

    #[test]
    fn test_remove_member_sharing_a_line() {
        let tree = entity("model A { Id: Guid @key; Name: String; }");
        let tree = tree.remove_member_named("A", "Id").unwrap();
        assert_eq!(tree.as_str(), "model A { Name: String; }");
    }

    #[test]
    fn test_remove_missing_member() {
        let err = entity(BLOG).remove_member_named("Blog", "Nope").unwrap_err();
        assert!(matches!(err, EditError::MemberNotFound { .. }));

        let err = entity(BLOG).remove_member_named("Post", "Title").unwrap_err();
        assert!(matches!(err, EditError::TypeNotFound(_)));
    }

    #[test]
    fn test_insert_multiline_snippet() {
        let tree: SourceTree<RegistryFile> =
            SourceTree::parse("registry R {\n    set As: A;\n}\n").unwrap();
        let registry = &tree.document().registry;
        let body = registry.body;
        let tree = tree
            .insert_member(body, Anchor::End, "\nconfigure {\n    finalize;\n}")
            .unwrap();
        assert_eq!(
            tree.as_str(),
            "registry R {\n    set As: A;\n\n    configure {\n        finalize;\n    }\n}\n"
        );
        assert!(tree.document().registry.configure.is_some());
    }

    #[test]
    fn test_insert_line_after() {
        let tree: SourceTree<RegistryFile> =
            SourceTree::parse("namespace App.Data;\n\nregistry R {\n}\n").unwrap();
        let ns = tree.document().namespace.as_ref().map(|n| n.span);
        let tree = tree.insert_line_after(ns, "\nuse App.Models;").unwrap();
        assert_eq!(
            tree.as_str(),
            "namespace App.Data;\n\nuse App.Models;\n\nregistry R {\n}\n"
        );
        assert!(tree.document().imports_namespace("App.Models"));
    }

    #[test]
    fn test_edit_that_breaks_syntax_is_rejected() {
        let tree = entity(BLOG);
        let body = tree.document().model.body;
        let err = tree.insert_member(body, Anchor::End, "Broken").unwrap_err();
        assert!(matches!(err, EditError::Reparse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = std::env::temp_dir().join("modelforge-lang-missing");
        let err = SourceTree::<EntityFile>::load(&dir.join("Nope.model")).unwrap_err();
        assert!(matches!(err, EditError::NotFound(_)));
    }
}
