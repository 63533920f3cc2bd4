//! Artifact editors.
//!
//! Editors read and stage artifacts through an [`EditSession`]; they never
//! write to disk themselves.
//!
//! [`EditSession`]: crate::session::EditSession

mod entity;
mod registry;

pub use entity::{audit_members, identity_member, EntityEditor, IDENTITY_PROPERTY};
pub use registry::RegistryEditor;
