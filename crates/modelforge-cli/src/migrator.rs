//! Schema migration through an external command.

use std::process::Command;

use modelforge_core::{MigrationError, NoopMigrator, SchemaMigrator};
use tracing::{debug, info};

/// Exit status an external migrator uses to report unapplied model changes.
pub const UNAPPLIED_CHANGES_STATUS: i32 = 2;

/// Runs a shell command as the migration step of `publish`.
#[derive(Debug, Clone)]
pub struct ExternalMigrator {
    command: String,
}

impl ExternalMigrator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl SchemaMigrator for ExternalMigrator {
    fn migrate(&self) -> Result<(), MigrationError> {
        info!(command = %self.command, "running migration command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .map_err(|e| MigrationError::Failed(format!("cannot run '{}': {}", self.command, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(status = ?output.status.code(), "migration command finished");
        match output.status.code() {
            Some(0) => Ok(()),
            Some(UNAPPLIED_CHANGES_STATUS) => Err(MigrationError::UnappliedModelChanges(
                if stderr.is_empty() {
                    "migration command reported unapplied model changes".to_string()
                } else {
                    stderr
                },
            )),
            code => Err(MigrationError::Failed(format!(
                "'{}' exited with {}{}",
                self.command,
                code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()),
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr)
                }
            ))),
        }
    }
}

/// The migrator for an optional `--migrate-cmd`.
pub fn create_migrator(command: Option<&str>) -> Box<dyn SchemaMigrator> {
    match command {
        Some(command) => Box::new(ExternalMigrator::new(command)),
        None => Box::new(NoopMigrator),
    }
}
