//! Named SQL script execution with schema substitution.
//!
//! The DDL, constraint, and index SQL is opaque to the pipeline: each
//! script lives in a per-dialect directory, carries a
//! `@cdmDatabaseSchema` placeholder, and runs as one transaction. Script
//! content is a boundary contract; idempotence of re-running it is the
//! script's responsibility, not enforced here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::db::Database;
use crate::error::{ProvisionError, Result};
use crate::settings::Settings;

/// Placeholder token the scripts use for the target schema.
pub const SCHEMA_PLACEHOLDER: &str = "@cdmDatabaseSchema";

/// The named scripts a pipeline stage may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Table DDL for the whole CDM.
    Ddl,
    /// Primary key constraints.
    PrimaryKeys,
    /// Foreign key constraints (historically named `constraints.sql`).
    ForeignKeys,
    /// Indices.
    Indices,
    /// Full-text search column on `concept` (PostgreSQL only).
    FullTextSearch,
    /// GIN index over the full-text column (PostgreSQL only).
    FullTextIndex,
}

impl ScriptKind {
    /// On-disk file name within the dialect script directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ScriptKind::Ddl => "ddl.sql",
            ScriptKind::PrimaryKeys => "primary_keys.sql",
            ScriptKind::ForeignKeys => "constraints.sql",
            ScriptKind::Indices => "indices.sql",
            ScriptKind::FullTextSearch => "fts.sql",
            ScriptKind::FullTextIndex => "fts_index.sql",
        }
    }
}

/// Substitute the schema placeholder in a script body.
pub fn render_script(sql: &str, schema: &str) -> String {
    sql.replace(SCHEMA_PLACEHOLDER, schema)
}

/// Executes named, pre-rendered SQL scripts against the target database.
pub struct ScriptRunner {
    db: Arc<dyn Database>,
    script_dir: PathBuf,
    schema: String,
}

impl ScriptRunner {
    pub fn new(db: Arc<dyn Database>, settings: &Settings) -> Self {
        Self {
            db,
            script_dir: settings.dialect_script_dir(),
            schema: settings.schema_name.clone(),
        }
    }

    /// Path a script kind resolves to.
    pub fn script_path(&self, kind: ScriptKind) -> PathBuf {
        self.script_dir.join(kind.file_name())
    }

    /// Read, render, and execute one script in a single transaction.
    ///
    /// Any failure rolls the transaction back and surfaces as a
    /// `ScriptExecution` error; the caller decides whether that is fatal
    /// (it is not, on the main provisioning path).
    pub async fn run(&self, kind: ScriptKind) -> Result<()> {
        let path = self.script_path(kind);
        self.run_path(&path).await
    }

    async fn run_path(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProvisionError::script(&name, format!("read {}: {}", path.display(), e)))?;
        let sql = render_script(&raw, &self.schema);

        info!("Executing {}", name);
        self.db.execute_batch(&sql).await.map_err(|e| {
            error!("Error executing {}: {}", path.display(), e);
            ProvisionError::script(&name, e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_replaced_everywhere() {
        let sql = "CREATE TABLE @cdmDatabaseSchema.person (id int);\n\
                   ALTER TABLE @cdmDatabaseSchema.person ADD x int;";
        let rendered = render_script(sql, "cdm");
        assert!(!rendered.contains(SCHEMA_PLACEHOLDER));
        assert_eq!(rendered.matches("cdm.person").count(), 2);
    }

    #[test]
    fn script_kinds_map_to_file_names() {
        assert_eq!(ScriptKind::Ddl.file_name(), "ddl.sql");
        assert_eq!(ScriptKind::PrimaryKeys.file_name(), "primary_keys.sql");
        assert_eq!(ScriptKind::ForeignKeys.file_name(), "constraints.sql");
        assert_eq!(ScriptKind::Indices.file_name(), "indices.sql");
        assert_eq!(ScriptKind::FullTextSearch.file_name(), "fts.sql");
    }
}
