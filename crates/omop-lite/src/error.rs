//! Error types for the provisioning library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for provisioning operations.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Configuration error (invalid dialect, bad flag combination, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not reach or authenticate against the target database.
    /// Always fatal; retries belong to an external supervisor.
    #[error("Connectivity error: {message}\n  Context: {context}")]
    Connectivity { message: String, context: String },

    /// Schema already exists and the settings do not tolerate that.
    #[error("Schema '{0}' already exists")]
    SchemaConflict(String),

    /// The configured data directory does not exist.
    #[error("Data directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Bulk load failed for a specific table. Non-fatal; recorded in the
    /// run summary.
    #[error("Bulk load failed for table {table}: {message}")]
    BulkLoad { table: String, message: String },

    /// A SQL script failed to execute. Non-fatal; the script's transaction
    /// is rolled back and the run continues.
    #[error("Script {script} failed: {message}")]
    ScriptExecution { script: String, message: String },

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server driver error.
    #[error("SQL Server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled (SIGINT, etc.)
    #[error("Run cancelled")]
    Cancelled,
}

impl ProvisionError {
    /// Create a Connectivity error with context about where it occurred.
    pub fn connectivity(message: impl Into<String>, context: impl Into<String>) -> Self {
        ProvisionError::Connectivity {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a BulkLoad error.
    pub fn bulk_load(table: impl Into<String>, message: impl Into<String>) -> Self {
        ProvisionError::BulkLoad {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a ScriptExecution error.
    pub fn script(script: impl Into<String>, message: impl Into<String>) -> Self {
        ProvisionError::ScriptExecution {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Whether the error aborts the whole run. Per-table and per-script
    /// failures are caught at the loop boundary instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProvisionError::BulkLoad { .. } | ProvisionError::ScriptExecution { .. }
        )
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::Config(_) => 1,
            ProvisionError::Connectivity { .. } => 2,
            ProvisionError::SchemaConflict(_) => 3,
            ProvisionError::DirectoryNotFound(_) => 4,
            ProvisionError::ScriptExecution { .. } => 5,
            ProvisionError::BulkLoad { .. } => 6,
            ProvisionError::Io(_) => 7,
            ProvisionError::Postgres(_) | ProvisionError::SqlServer(_) => 8,
            ProvisionError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_unit_errors_are_not_fatal() {
        assert!(!ProvisionError::bulk_load("person", "boom").is_fatal());
        assert!(!ProvisionError::script("ddl.sql", "boom").is_fatal());
        assert!(ProvisionError::connectivity("refused", "connect").is_fatal());
        assert!(ProvisionError::SchemaConflict("cdm".into()).is_fatal());
    }

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let errors = [
            ProvisionError::Config("x".into()),
            ProvisionError::connectivity("x", "y"),
            ProvisionError::SchemaConflict("x".into()),
            ProvisionError::DirectoryNotFound(PathBuf::from("/nope")),
            ProvisionError::script("x", "y"),
            ProvisionError::bulk_load("x", "y"),
            ProvisionError::Cancelled,
        ];
        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&c| c != 0));
    }
}
