//! Modelforge Command-Line Client
//!
//! Edits entity and registry artifacts of a workspace and drives the
//! draft/publish lifecycle of the change ledger.

mod commands;
mod formatter;
mod migrator;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use commands::Command;
use formatter::OutputFormat;
use modelforge_core::{ErrorKind, Workspace, WorkspaceConfig};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Modelforge Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "modelforge")]
#[command(version, about = "Schema editing for entity and registry artifacts")]
pub struct Args {
    /// Workspace root directory
    #[arg(short = 'C', long, default_value = ".")]
    pub root: PathBuf,

    /// Name recorded on ledger rows
    #[arg(long)]
    pub actor: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Namespace written into new entity artifacts
    #[arg(long)]
    pub entity_namespace: Option<String>,

    /// Namespace of the registry artifact
    #[arg(long)]
    pub registry_namespace: Option<String>,

    /// Name of the registry declaration
    #[arg(long)]
    pub registry_name: Option<String>,

    /// Shell command run before publishing; exit status 2 defers the publish
    #[arg(long)]
    pub migrate_cmd: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl From<&Args> for WorkspaceConfig {
    fn from(args: &Args) -> Self {
        let mut config = WorkspaceConfig::new(&args.root);
        if let Some(actor) = &args.actor {
            config = config.with_actor(actor);
        }
        if let Some(namespace) = &args.entity_namespace {
            config = config.with_entity_namespace(namespace);
        }
        if let Some(namespace) = &args.registry_namespace {
            config = config.with_registry_namespace(namespace);
        }
        if let Some(name) = &args.registry_name {
            config = config.with_registry_name(name);
        }
        config
    }
}

/// A failed invocation and the process status it maps to.
#[derive(Debug, Error)]
#[error(transparent)]
struct CliError(#[from] modelforge_core::Error);

impl CliError {
    fn exit_code(&self) -> u8 {
        match self.0.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::Conflict => 4,
            ErrorKind::Internal => 1,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelforge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    match run(&args, &*formatter) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(args: &Args, formatter: &dyn formatter::Formatter) -> Result<String, CliError> {
    let config = WorkspaceConfig::from(args);
    let workspace = match args.command {
        Command::Init => Workspace::init(config)?,
        _ => Workspace::open(config)?,
    };
    let migrator = migrator::create_migrator(args.migrate_cmd.as_deref());
    Ok(commands::execute(
        &workspace,
        &args.command,
        formatter,
        &*migrator,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_field() {
        let args = Args::try_parse_from([
            "modelforge",
            "--root",
            "/tmp/shop",
            "--format",
            "json",
            "add-field",
            "Order",
            "Customer",
            "--type",
            "ManyToOne",
            "--related-to",
            "Customer",
            "--required",
        ])
        .unwrap();
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(
            args.command,
            Command::AddField {
                model: "Order".into(),
                field: "Customer".into(),
                field_type: "ManyToOne".into(),
                related_to: Some("Customer".into()),
                related_name: None,
                required: true,
            }
        );
    }

    #[test]
    fn test_config_from_args() {
        let args = Args::try_parse_from([
            "modelforge",
            "-C",
            "/srv/app",
            "--actor",
            "deploy",
            "--registry-name",
            "ShopRegistry",
            "entities",
        ])
        .unwrap();
        let config = WorkspaceConfig::from(&args);
        assert_eq!(config.root, PathBuf::from("/srv/app"));
        assert_eq!(config.actor, "deploy");
        assert_eq!(config.registry_name, "ShopRegistry");
        assert_eq!(config.entities_dir, PathBuf::from("/srv/app").join("Models"));
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Args::try_parse_from(["modelforge"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let err = CliError::from(modelforge_core::Error::Conflict("dup".into()));
        assert_eq!(err.exit_code(), 4);
        let err = CliError::from(modelforge_core::Error::not_found("model", "Ghost"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_run_against_new_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let formatter = formatter::create_formatter(OutputFormat::Json);

        let init = Args::try_parse_from(["modelforge", "-C", root, "init"]).unwrap();
        run(&init, &*formatter).unwrap();

        let create =
            Args::try_parse_from(["modelforge", "-C", root, "create-entity", "Order"]).unwrap();
        run(&create, &*formatter).unwrap();

        let again =
            Args::try_parse_from(["modelforge", "-C", root, "create-entity", "Order"]).unwrap();
        let err = run(&again, &*formatter).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
