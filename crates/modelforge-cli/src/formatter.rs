//! Output formatters for command results.

use std::collections::BTreeMap;

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use modelforge_core::lang::{RelationConfig, RelationLink};
use modelforge_core::{ContentTypeChange, FieldInfo, FieldMap, PublishOutcome, Removals};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a list of names under one header.
    fn format_names(&self, header: &str, names: &[String]) -> String;

    /// Format a model's field listing.
    fn format_fields(&self, fields: &[FieldInfo]) -> String;

    /// Format members added per model.
    fn format_added(&self, added: &BTreeMap<String, FieldMap>) -> String;

    /// Format members removed per model.
    fn format_removed(&self, removed: &Removals) -> String;

    /// Format relationship statements.
    fn format_relations(&self, relations: &[RelationConfig]) -> String;

    /// Format ledger rows.
    fn format_changes(&self, changes: &[ContentTypeChange]) -> String;

    /// Format a publish result.
    fn format_publish(&self, outcome: &PublishOutcome) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_names(&self, header: &str, names: &[String]) -> String {
        let mut table = Table::new();
        table.set_header(vec![header]);
        for name in names {
            table.add_row(vec![name]);
        }
        table.to_string()
    }

    fn format_fields(&self, fields: &[FieldInfo]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Name", "Type", "Required", "Relation", "Related"]);
        for field in fields {
            table.add_row(vec![
                Cell::new(&field.name),
                Cell::new(&field.type_name),
                Cell::new(if field.is_required { "yes" } else { "no" }),
                Cell::new(field.relation.map(|k| k.as_str()).unwrap_or("")),
                Cell::new(field.related_model.as_deref().unwrap_or("")),
            ]);
        }
        table.to_string()
    }

    fn format_added(&self, added: &BTreeMap<String, FieldMap>) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Model", "Added", "Type"]);
        for (model, fields) in added {
            for (name, ty) in fields {
                table.add_row(vec![model, name, ty]);
            }
        }
        table.to_string()
    }

    fn format_removed(&self, removed: &Removals) -> String {
        if removed.is_empty() {
            return "Nothing removed".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Model", "Removed"]);
        for (model, fields) in removed {
            table.add_row(vec![model.clone(), fields.join(", ")]);
        }
        table.to_string()
    }

    fn format_relations(&self, relations: &[RelationConfig]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Source", "Kind", "Target", "Navigation", "Inverse", "Link"]);
        for r in relations {
            table.add_row(vec![
                r.source.clone(),
                r.kind.to_string(),
                r.target.clone(),
                r.navigation.clone(),
                r.inverse.clone(),
                describe_link(&r.link),
            ]);
        }
        table.to_string()
    }

    fn format_changes(&self, changes: &[ContentTypeChange]) -> String {
        if changes.is_empty() {
            return "No changes".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Id", "Model", "State", "Fields", "Modified By", "Modified At"]);
        for change in changes {
            let fields: Vec<&str> = change.fields.keys().map(|k| k.as_str()).collect();
            table.add_row(vec![
                change.id.to_string(),
                change.model_name.clone(),
                change.state.to_string(),
                fields.join(", "),
                change.modified_by.clone(),
                format_timestamp(change.modified_at),
            ]);
        }
        table.to_string()
    }

    fn format_publish(&self, outcome: &PublishOutcome) -> String {
        match outcome {
            PublishOutcome::Published(summary) => format!(
                "Published {} change(s), deleted {} model(s)",
                summary.published, summary.deleted
            ),
            PublishOutcome::Deferred { reason } => {
                format!("Publish deferred, changes stay pending: {}", reason)
            }
        }
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn render(value: &serde_json::Value) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_names(&self, _header: &str, names: &[String]) -> String {
        serde_json::to_string_pretty(names).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_fields(&self, fields: &[FieldInfo]) -> String {
        serde_json::to_string_pretty(fields).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_added(&self, added: &BTreeMap<String, FieldMap>) -> String {
        serde_json::to_string_pretty(added).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_removed(&self, removed: &Removals) -> String {
        serde_json::to_string_pretty(removed).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_relations(&self, relations: &[RelationConfig]) -> String {
        let rows: Vec<serde_json::Value> = relations
            .iter()
            .map(|r| {
                serde_json::json!({
                    "source": r.source,
                    "kind": r.kind.as_str(),
                    "target": r.target,
                    "navigation": r.navigation,
                    "inverse": r.inverse,
                    "link": describe_link(&r.link),
                })
            })
            .collect();
        Self::render(&serde_json::Value::Array(rows))
    }

    fn format_changes(&self, changes: &[ContentTypeChange]) -> String {
        serde_json::to_string_pretty(changes).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_publish(&self, outcome: &PublishOutcome) -> String {
        let value = match outcome {
            PublishOutcome::Published(summary) => serde_json::json!({
                "status": "published",
                "published": summary.published,
                "deleted": summary.deleted,
            }),
            PublishOutcome::Deferred { reason } => serde_json::json!({
                "status": "deferred",
                "reason": reason,
            }),
        };
        Self::render(&value)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({
            "error": error
        })
        .to_string()
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_names(&self, header: &str, names: &[String]) -> String {
        let mut output = format!("{}\n", header.to_lowercase());
        for name in names {
            output.push_str(&format!("{}\n", name));
        }
        output
    }

    fn format_fields(&self, fields: &[FieldInfo]) -> String {
        let mut output = String::from("name,type,required,relation,related\n");
        for f in fields {
            output.push_str(&format!(
                "{},\"{}\",{},{},{}\n",
                f.name,
                escape_csv(&f.type_name),
                f.is_required,
                f.relation.map(|k| k.as_str()).unwrap_or(""),
                f.related_model.as_deref().unwrap_or("")
            ));
        }
        output
    }

    fn format_added(&self, added: &BTreeMap<String, FieldMap>) -> String {
        let mut output = String::from("model,field,type\n");
        for (model, fields) in added {
            for (name, ty) in fields {
                output.push_str(&format!("{},{},\"{}\"\n", model, name, escape_csv(ty)));
            }
        }
        output
    }

    fn format_removed(&self, removed: &Removals) -> String {
        let mut output = String::from("model,field\n");
        for (model, fields) in removed {
            for name in fields {
                output.push_str(&format!("{},{}\n", model, name));
            }
        }
        output
    }

    fn format_relations(&self, relations: &[RelationConfig]) -> String {
        let mut output = String::from("source,kind,target,navigation,inverse,link\n");
        for r in relations {
            output.push_str(&format!(
                "{},{},{},{},{},\"{}\"\n",
                r.source,
                r.kind,
                r.target,
                r.navigation,
                r.inverse,
                escape_csv(&describe_link(&r.link))
            ));
        }
        output
    }

    fn format_changes(&self, changes: &[ContentTypeChange]) -> String {
        let mut output = String::from("id,model,state,fields,modified_by,modified_at\n");
        for c in changes {
            let fields: Vec<&str> = c.fields.keys().map(|k| k.as_str()).collect();
            output.push_str(&format!(
                "{},{},{},\"{}\",\"{}\",{}\n",
                c.id,
                c.model_name,
                c.state,
                escape_csv(&fields.join(";")),
                escape_csv(&c.modified_by),
                c.modified_at
            ));
        }
        output
    }

    fn format_publish(&self, outcome: &PublishOutcome) -> String {
        match outcome {
            PublishOutcome::Published(summary) => {
                format!("status,published,deleted\npublished,{},{}", summary.published, summary.deleted)
            }
            PublishOutcome::Deferred { reason } => {
                format!("status,reason\ndeferred,\"{}\"", escape_csv(reason))
            }
        }
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("error\n\"{}\"", escape_csv(error))
    }
}

fn describe_link(link: &RelationLink) -> String {
    match link {
        RelationLink::ForeignKey { owner, property } => format!("{}.{}", owner, property),
        RelationLink::JoinTable(table) => format!("table {}", table),
    }
}

/// Format a microsecond timestamp as seconds since the epoch.
fn format_timestamp(micros: u64) -> String {
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}

/// Escape a string for CSV.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelforge_core::lang::RelationKind;
    use modelforge_core::{ChangeState, PublishSummary};

    fn fields() -> Vec<FieldInfo> {
        vec![
            FieldInfo {
                name: "Id".into(),
                type_name: "Guid".into(),
                is_required: true,
                relation: None,
                related_model: None,
            },
            FieldInfo {
                name: "Posts".into(),
                type_name: "Collection<Post>".into(),
                is_required: true,
                relation: Some(RelationKind::OneToMany),
                related_model: Some("Post".into()),
            },
        ]
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("hello"), "hello");
        assert_eq!(escape_csv("say \"hi\""), "say \"\"hi\"\"");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_700_000_000_000_042), "1700000000.000042");
    }

    #[test]
    fn test_table_fields() {
        let output = TableFormatter.format_fields(&fields());
        assert!(output.contains("Collection<Post>"));
        assert!(output.contains("OneToMany"));
    }

    #[test]
    fn test_json_fields() {
        let output = JsonFormatter.format_fields(&fields());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[1]["type"], "Collection<Post>");
        assert_eq!(value[1]["relation"], "OneToMany");
        assert_eq!(value[0]["relation"], serde_json::Value::Null);
    }

    #[test]
    fn test_csv_fields() {
        let output = CsvFormatter.format_fields(&fields());
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "name,type,required,relation,related");
        assert_eq!(lines[2], "Posts,\"Collection<Post>\",true,OneToMany,Post");
    }

    #[test]
    fn test_changes() {
        let change = ContentTypeChange {
            id: 7,
            model_name: "Order".into(),
            fields: FieldMap::from([("Id".to_string(), "Guid".to_string())]),
            modified_by: "ops".into(),
            modified_at: 1_000_000,
            state: ChangeState::PendingPublish,
        };
        let table = TableFormatter.format_changes(&[change.clone()]);
        assert!(table.contains("Order"));
        assert!(table.contains("PendingPublish"));

        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_changes(&[change])).unwrap();
        assert_eq!(json[0]["model_name"], "Order");
        assert_eq!(json[0]["fields"]["Id"], "Guid");

        assert_eq!(TableFormatter.format_changes(&[]), "No changes");
    }

    #[test]
    fn test_publish() {
        let published = PublishOutcome::Published(PublishSummary {
            published: 2,
            deleted: 1,
        });
        assert_eq!(
            TableFormatter.format_publish(&published),
            "Published 2 change(s), deleted 1 model(s)"
        );
        let deferred = PublishOutcome::Deferred {
            reason: "stale".into(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_publish(&deferred)).unwrap();
        assert_eq!(json["status"], "deferred");
    }
}
