//! Subcommands and their execution against a workspace.

use clap::Subcommand;
use modelforge_core::{AddFieldRequest, Error, SchemaMigrator, Workspace};

use crate::formatter::Formatter;

/// Schema commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the workspace layout and an empty registry
    Init,

    /// Create a model with an identity property
    CreateEntity {
        /// Model name
        name: String,

        /// Add created/updated timestamp and actor properties
        #[arg(long)]
        auditable: bool,
    },

    /// Add a field; pass a relation kind as the type together with --related-to
    AddField {
        /// Model to change
        model: String,

        /// Field name
        field: String,

        /// Scalar or enum type, or OneToOne, OneToMany, ManyToOne, ManyToMany
        #[arg(long = "type", short = 't')]
        field_type: String,

        /// Related model of a relation field
        #[arg(long)]
        related_to: Option<String>,

        /// Property name on the related model
        #[arg(long)]
        related_name: Option<String>,

        /// Make the field (or the key-holding side of a relation) required
        #[arg(long)]
        required: bool,
    },

    /// Remove a field; relation fields are removed from both sides
    DeleteField {
        /// Model to change
        model: String,

        /// Field name
        field: String,
    },

    /// Delete a model and every relation that points at it
    DeleteEntity {
        /// Model name
        name: String,
    },

    /// List the fields of a model
    Fields {
        /// Model name
        model: String,
    },

    /// List all models
    Entities,

    /// List configured relationships
    Relations,

    /// Show ledger changes within the recent window
    Changes,

    /// List models with published changes
    Published,

    /// List models with pending changes
    Drafts,

    /// Run the migration command and publish pending changes
    Publish,
}

/// Execute a command and return formatted output.
pub fn execute(
    workspace: &Workspace,
    command: &Command,
    formatter: &dyn Formatter,
    migrator: &dyn SchemaMigrator,
) -> Result<String, Error> {
    match command {
        Command::Init => Ok(formatter.format_message(&format!(
            "Workspace ready at {}",
            workspace.config().root.display()
        ))),
        Command::CreateEntity { name, auditable } => {
            let path = workspace.create_entity(name, *auditable)?;
            Ok(formatter.format_message(&format!("Created {}", path.display())))
        }
        Command::AddField {
            model,
            field,
            field_type,
            related_to,
            related_name,
            required,
        } => {
            let request = AddFieldRequest {
                model: model.clone(),
                field: field.clone(),
                field_type: field_type.clone(),
                related_to: related_to.clone(),
                related_name: related_name.clone(),
                is_required: *required,
            };
            let added = workspace.add_field(&request)?;
            Ok(formatter.format_added(&added))
        }
        Command::DeleteField { model, field } => {
            let removed = workspace.delete_field(model, field)?;
            Ok(formatter.format_removed(&removed))
        }
        Command::DeleteEntity { name } => {
            let removed = workspace.delete_entity(name)?;
            Ok(formatter.format_removed(&removed))
        }
        Command::Fields { model } => Ok(formatter.format_fields(&workspace.get_fields(model)?)),
        Command::Entities => Ok(formatter.format_names("Model", &workspace.list_entities()?)),
        Command::Relations => Ok(formatter.format_relations(&workspace.relationships()?)),
        Command::Changes => Ok(formatter.format_changes(&workspace.recent_changes()?)),
        Command::Published => Ok(formatter.format_names("Model", &workspace.published_models()?)),
        Command::Drafts => Ok(formatter.format_names("Model", &workspace.draft_models()?)),
        Command::Publish => Ok(formatter.format_publish(&workspace.publish(migrator)?)),
    }
}
