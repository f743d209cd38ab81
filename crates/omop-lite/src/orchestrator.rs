//! Provisioning orchestrator - sequences the pipeline stages.
//!
//! The stage order is linear and fixed:
//! `SchemaCheck -> (SchemaCreate)? -> TableCreate -> DataLoad ->
//! PrimaryKeys -> ForeignKeys -> Indices`. Foreign keys depend on primary
//! keys already existing, so the constraint order is a hard invariant; the
//! public API offers no way to run them out of order within one run.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::filter_tables;
use crate::db::{self, Database};
use crate::error::{ProvisionError, Result};
use crate::loader::{DataLoader, LoadOutcome, TableLoad};
use crate::scripts::{ScriptKind, ScriptRunner};
use crate::settings::{Dialect, OnExistingSchema, Settings};

/// One phase of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PipelineStage {
    SchemaCreate,
    TableCreate,
    DataLoad,
    PrimaryKeys,
    ForeignKeys,
    Indices,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::SchemaCreate => "schema-create",
            PipelineStage::TableCreate => "table-create",
            PipelineStage::DataLoad => "data-load",
            PipelineStage::PrimaryKeys => "primary-keys",
            PipelineStage::ForeignKeys => "foreign-keys",
            PipelineStage::Indices => "indices",
        };
        write!(f, "{}", name)
    }
}

/// Aggregated result of a provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionSummary {
    pub schema: String,
    pub dialect: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub stages_run: Vec<PipelineStage>,
    pub tables_loaded: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,
    pub rows_loaded: u64,
    pub skipped_tables: Vec<String>,
    pub failed_tables: Vec<String>,
    pub failed_scripts: Vec<String>,
}

impl ProvisionSummary {
    /// No per-table or per-script failures at all.
    pub fn is_clean(&self) -> bool {
        self.tables_failed == 0 && self.tables_skipped == 0 && self.failed_scripts.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.tables_failed > 0 || !self.failed_scripts.is_empty()
    }

    /// Human-readable completion summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.status == "skipped-existing-schema" {
            out.push_str(&format!(
                "Schema '{}' already exists; nothing done.\n",
                self.schema
            ));
            return out;
        }
        if self.is_clean() {
            out.push_str("Provisioning fully succeeded.\n");
        } else {
            out.push_str(&format!(
                "Provisioning succeeded with {} tables skipped, {} tables failed, {} scripts failed.\n",
                self.tables_skipped,
                self.tables_failed,
                self.failed_scripts.len()
            ));
        }
        out.push_str(&format!("  Schema: {}\n", self.schema));
        out.push_str(&format!("  Dialect: {}\n", self.dialect));
        out.push_str(&format!(
            "  Tables loaded: {} ({} rows)\n",
            self.tables_loaded, self.rows_loaded
        ));
        out.push_str(&format!("  Duration: {:.2}s\n", self.duration_seconds));
        if !self.skipped_tables.is_empty() {
            out.push_str(&format!("  Skipped: {}\n", self.skipped_tables.join(", ")));
        }
        if !self.failed_tables.is_empty() {
            out.push_str(&format!("  Failed: {}\n", self.failed_tables.join(", ")));
        }
        if !self.failed_scripts.is_empty() {
            out.push_str(&format!(
                "  Failed scripts: {}\n",
                self.failed_scripts.join(", ")
            ));
        }
        out
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ProvisionError::Config(format!("summary serialization: {}", e)))
    }
}

/// Provisioning orchestrator.
pub struct Orchestrator {
    settings: Settings,
    db: Arc<dyn Database>,
    scripts: ScriptRunner,
}

impl Orchestrator {
    /// Connect to the configured database and build an orchestrator.
    /// Connectivity failures surface here, before any stage runs.
    pub async fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let db = db::connect(&settings).await?;
        Ok(Self::with_database(settings, db))
    }

    /// Build an orchestrator over an already-open driver.
    pub fn with_database(settings: Settings, db: Arc<dyn Database>) -> Self {
        let scripts = ScriptRunner::new(db.clone(), &settings);
        Self {
            settings,
            db,
            scripts,
        }
    }

    /// Verify database connectivity.
    pub async fn test_connection(&self) -> Result<()> {
        self.db.ping().await?;
        info!("Database connection OK");
        Ok(())
    }

    /// Run the full pipeline. Per-table and per-script failures are
    /// aggregated into the summary; only connectivity-level failures (or
    /// an intolerable pre-existing schema) abort.
    pub async fn provision(&self, cancel: &CancellationToken) -> Result<ProvisionSummary> {
        let started_at = Utc::now();
        let mut stages_run = Vec::new();
        let mut failed_scripts = Vec::new();

        // SchemaCheck: the dialect's default schema always exists and is
        // never created here.
        if !self.settings.is_default_schema() {
            if self.db.schema_exists(&self.settings.schema_name).await? {
                match self.settings.on_existing_schema {
                    OnExistingSchema::Skip => {
                        info!(
                            "Schema '{}' already exists, skipping run",
                            self.settings.schema_name
                        );
                        return Ok(self.summary(
                            "skipped-existing-schema",
                            started_at,
                            stages_run,
                            &[],
                            failed_scripts,
                        ));
                    }
                    OnExistingSchema::Continue => {
                        info!(
                            "Schema '{}' already exists, continuing into table stages",
                            self.settings.schema_name
                        );
                    }
                    OnExistingSchema::Fail => {
                        return Err(ProvisionError::SchemaConflict(
                            self.settings.schema_name.clone(),
                        ));
                    }
                }
            } else {
                self.db.create_schema(&self.settings.schema_name).await?;
                stages_run.push(PipelineStage::SchemaCreate);
            }
        }

        self.run_script(ScriptKind::Ddl, &mut failed_scripts).await;
        self.refresh_metadata().await?;
        stages_run.push(PipelineStage::TableCreate);

        let loads = self.load_data(&[], cancel).await?;
        stages_run.push(PipelineStage::DataLoad);

        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        // Hard ordering: primary keys before foreign keys before indices.
        self.run_script(ScriptKind::PrimaryKeys, &mut failed_scripts)
            .await;
        stages_run.push(PipelineStage::PrimaryKeys);
        self.run_script(ScriptKind::ForeignKeys, &mut failed_scripts)
            .await;
        stages_run.push(PipelineStage::ForeignKeys);
        self.run_script(ScriptKind::Indices, &mut failed_scripts)
            .await;
        stages_run.push(PipelineStage::Indices);

        if self.settings.fts_create && self.settings.dialect == Dialect::Postgres {
            self.run_script(ScriptKind::FullTextSearch, &mut failed_scripts)
                .await;
            self.run_script(ScriptKind::FullTextIndex, &mut failed_scripts)
                .await;
        }

        let summary = self.summary("completed", started_at, stages_run, &loads, failed_scripts);
        info!(
            "Provisioning {}: {} tables loaded, {} skipped, {} failed in {:.1}s",
            summary.status,
            summary.tables_loaded,
            summary.tables_skipped,
            summary.tables_failed,
            summary.duration_seconds
        );
        Ok(summary)
    }

    /// Create the target schema if it does not exist yet. The dialect's
    /// default schema always exists, so this is a no-op for it.
    pub async fn ensure_schema(&self) -> Result<()> {
        if self.settings.is_default_schema() {
            return Ok(());
        }
        if !self.db.schema_exists(&self.settings.schema_name).await? {
            self.db.create_schema(&self.settings.schema_name).await?;
            info!("Schema '{}' created", self.settings.schema_name);
        }
        Ok(())
    }

    /// Execute the table DDL, then refresh table metadata so the data
    /// stage can resolve its targets.
    pub async fn create_tables(&self) -> Result<()> {
        self.scripts.run(ScriptKind::Ddl).await?;
        self.refresh_metadata().await
    }

    /// Load the catalog (or a case-insensitive subset of it) into existing
    /// tables.
    pub async fn load_data(
        &self,
        required_tables: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<TableLoad>> {
        let tables = filter_tables(required_tables)?;
        let loader = DataLoader::new(self.db.clone(), self.settings.clone());
        loader.load_tables(&tables, cancel).await
    }

    pub async fn add_primary_keys(&self) -> Result<()> {
        self.scripts.run(ScriptKind::PrimaryKeys).await
    }

    pub async fn add_foreign_keys(&self) -> Result<()> {
        self.scripts.run(ScriptKind::ForeignKeys).await
    }

    pub async fn add_indices(&self) -> Result<()> {
        self.scripts.run(ScriptKind::Indices).await
    }

    /// All three constraint scripts in the required order.
    pub async fn add_all_constraints(&self) -> Result<()> {
        self.add_primary_keys().await?;
        self.add_foreign_keys().await?;
        self.add_indices().await?;
        if self.settings.fts_create && self.settings.dialect == Dialect::Postgres {
            self.scripts.run(ScriptKind::FullTextSearch).await?;
            self.scripts.run(ScriptKind::FullTextIndex).await?;
        }
        Ok(())
    }

    /// Drop every table in the target schema.
    pub async fn drop_tables(&self) -> Result<()> {
        self.db.drop_all_tables(&self.settings.schema_name).await?;
        info!("All tables dropped successfully");
        Ok(())
    }

    /// Drop the target schema and its contents. The default schema is
    /// never dropped.
    pub async fn drop_schema(&self) -> Result<()> {
        if self.settings.is_default_schema() {
            warn!(
                "Refusing to drop default schema '{}'",
                self.settings.schema_name
            );
            return Ok(());
        }
        self.db.drop_schema(&self.settings.schema_name).await
    }

    /// Drop everything: tables first, then the schema itself.
    pub async fn drop_all(&self) -> Result<()> {
        self.drop_tables().await?;
        self.drop_schema().await?;
        info!("Database completely dropped");
        Ok(())
    }

    async fn run_script(&self, kind: ScriptKind, failed: &mut Vec<String>) {
        if let Err(e) = self.scripts.run(kind).await {
            warn!("{}", e);
            failed.push(kind.file_name().to_string());
        }
    }

    /// Re-introspect the schema after DDL so later stages see the current
    /// table set.
    async fn refresh_metadata(&self) -> Result<()> {
        let tables = self.db.list_tables(&self.settings.schema_name).await?;
        info!(
            "Schema '{}' now has {} tables",
            self.settings.schema_name,
            tables.len()
        );
        Ok(())
    }

    fn summary(
        &self,
        status: &str,
        started_at: DateTime<Utc>,
        stages_run: Vec<PipelineStage>,
        loads: &[TableLoad],
        failed_scripts: Vec<String>,
    ) -> ProvisionSummary {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut tables_loaded = 0;
        let mut rows_loaded = 0;
        let mut skipped_tables = Vec::new();
        let mut failed_tables = Vec::new();
        for load in loads {
            match &load.outcome {
                LoadOutcome::Loaded { rows } => {
                    tables_loaded += 1;
                    rows_loaded += rows;
                }
                LoadOutcome::SkippedMissing => skipped_tables.push(load.table.clone()),
                LoadOutcome::Failed { .. } => failed_tables.push(load.table.clone()),
            }
        }

        ProvisionSummary {
            schema: self.settings.schema_name.clone(),
            dialect: self.settings.dialect.to_string(),
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds,
            stages_run,
            tables_loaded,
            tables_skipped: skipped_tables.len(),
            tables_failed: failed_tables.len(),
            rows_loaded,
            skipped_tables,
            failed_tables,
            failed_scripts,
        }
    }
}
