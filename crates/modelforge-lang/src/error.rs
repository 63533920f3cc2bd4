//! Error types for parsing, editing and name validation.

use std::path::PathBuf;

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error while lexing or parsing an artifact.
#[derive(Debug, Clone, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with the offending source line and a caret.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));

        if let Some(source_line) = source.lines().nth(line - 1) {
            result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));
            for _ in 0..col {
                result.push(' ');
            }
            result.push('^');

            let span_len = self.span.end.saturating_sub(self.span.start);
            if span_len > 1 {
                let room = source_line.len().saturating_sub(col) + 1;
                for _ in 1..span_len.min(room) {
                    result.push('~');
                }
            }
            result.push('\n');
        }

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

/// Error while loading or editing a source tree.
#[derive(Debug, Error)]
pub enum EditError {
    /// The artifact does not exist.
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Reading the artifact failed.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The artifact on disk is not valid.
    #[error("cannot parse {}:\n{rendered}", .path.display())]
    Unparsable {
        /// Artifact path.
        path: PathBuf,
        /// The parse error.
        error: ParseError,
        /// Parse error formatted against the artifact text.
        rendered: String,
    },

    /// The named type is not declared in the artifact.
    #[error("type '{0}' is not declared")]
    TypeNotFound(String),

    /// The named member is not declared on the type.
    #[error("member '{member}' is not declared on '{owner}'")]
    MemberNotFound {
        /// Declaring type.
        owner: String,
        /// Member name.
        member: String,
    },

    /// A span does not fall inside the current text.
    #[error("edit span {0:?} is outside the artifact")]
    InvalidSpan(Span),

    /// An edit produced text that no longer parses.
    #[error("edit produced invalid text: {0}")]
    Reparse(ParseError),
}

/// Why a name is not a valid identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameErrorKind {
    /// Empty name.
    Empty,
    /// Contains whitespace.
    Whitespace,
    /// Contains punctuation or other non-identifier characters.
    Punctuation,
    /// Starts with a digit.
    LeadingDigit,
    /// Is a reserved keyword.
    Reserved,
}

/// An invalid identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{name}' is not a valid identifier: {}", describe(.kind))]
pub struct NameError {
    /// The rejected name.
    pub name: String,
    /// The reason.
    pub kind: NameErrorKind,
}

fn describe(kind: &NameErrorKind) -> &'static str {
    match kind {
        NameErrorKind::Empty => "name is empty",
        NameErrorKind::Whitespace => "name contains whitespace",
        NameErrorKind::Punctuation => "name contains punctuation",
        NameErrorKind::LeadingDigit => "name starts with a digit",
        NameErrorKind::Reserved => "name is a reserved keyword",
    }
}
