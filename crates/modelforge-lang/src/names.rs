//! Identifier validation for model, property and relation names.

use crate::error::{NameError, NameErrorKind};

/// Words that cannot be used as names: artifact keywords, scalar type
/// names and the keywords of the languages models are generated for.
pub const RESERVED: &[&str] = &[
    // artifact syntax
    "namespace", "use", "model", "registry", "set", "configure", "finalize", "Collection",
    // generated code
    "abstract", "as", "base", "bool", "break", "byte", "case", "catch", "char", "checked",
    "class", "const", "continue", "decimal", "default", "delegate", "do", "double", "else",
    "enum", "event", "explicit", "extern", "false", "finally", "fixed", "float", "for",
    "foreach", "goto", "if", "implicit", "in", "int", "interface", "internal", "is", "lock",
    "long", "new", "null", "object", "operator", "out", "override", "params", "private",
    "protected", "public", "readonly", "ref", "return", "sbyte", "sealed", "short", "sizeof",
    "stackalloc", "static", "string", "struct", "switch", "this", "throw", "true", "try",
    "typeof", "uint", "ulong", "unchecked", "unsafe", "ushort", "using", "virtual", "void",
    "volatile", "while",
];

/// Check that `name` can be used as a model, property or relation name.
///
/// Valid names are ASCII letters, digits and underscores, do not start
/// with a digit, and are not reserved.
pub fn validate_identifier(name: &str) -> Result<(), NameError> {
    let fail = |kind| {
        Err(NameError {
            name: name.to_string(),
            kind,
        })
    };

    let Some(first) = name.chars().next() else {
        return fail(NameErrorKind::Empty);
    };
    if name.chars().any(char::is_whitespace) {
        return fail(NameErrorKind::Whitespace);
    }
    if name.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
        return fail(NameErrorKind::Punctuation);
    }
    if first.is_ascii_digit() {
        return fail(NameErrorKind::LeadingDigit);
    }
    if RESERVED.contains(&name) {
        return fail(NameErrorKind::Reserved);
    }
    Ok(())
}

/// Whether `name` passes [`validate_identifier`].
pub fn is_valid_identifier(name: &str) -> bool {
    validate_identifier(name).is_ok()
}
