//! Per-table bulk load loop with failure isolation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::TableSpec;
use crate::db::Database;
use crate::error::Result;
use crate::files::{resolve_data_dir, wait_for_file};
use crate::settings::Settings;

/// Result of loading one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum LoadOutcome {
    /// File found and loaded; `rows` excludes the header.
    Loaded { rows: u64 },
    /// File absent after waiting; not a pipeline-fatal condition.
    SkippedMissing,
    /// The driver rejected the load; the batch continued.
    Failed { reason: String },
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded { rows } => write!(f, "loaded ({} rows)", rows),
            LoadOutcome::SkippedMissing => write!(f, "skipped (file not found)"),
            LoadOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// One table's load result, for the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct TableLoad {
    pub table: String,
    #[serde(flatten)]
    pub outcome: LoadOutcome,
}

impl TableLoad {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Failed { .. })
    }
}

/// Loads the table catalog from a resolved data directory.
pub struct DataLoader {
    db: Arc<dyn Database>,
    settings: Settings,
}

impl DataLoader {
    pub fn new(db: Arc<dyn Database>, settings: Settings) -> Self {
        Self { db, settings }
    }

    /// Load every table in `tables`, in catalog order. One bad table never
    /// aborts the batch: outcomes are collected per table. Only resolving
    /// the data directory can fail.
    pub async fn load_tables(
        &self,
        tables: &[TableSpec],
        cancel: &CancellationToken,
    ) -> Result<Vec<TableLoad>> {
        let data_dir = resolve_data_dir(&self.settings)?;
        info!("Loading data from {}", data_dir.display());

        let workers = self.settings.load_workers.max(1);
        if workers == 1 {
            let mut results = Vec::with_capacity(tables.len());
            for spec in tables {
                if cancel.is_cancelled() {
                    break;
                }
                results.push(TableLoad {
                    table: spec.name().to_string(),
                    outcome: self.load_one(spec, data_dir.clone(), cancel).await,
                });
            }
            return Ok(results);
        }

        // Bounded worker pool: each task draws its own pooled connection,
        // and a failure never cancels siblings. The stage completes only
        // once all workers join.
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(tables.len());
        for spec in tables {
            if cancel.is_cancelled() {
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            let loader = Self {
                db: self.db.clone(),
                settings: self.settings.clone(),
            };
            let spec = *spec;
            let dir = data_dir.clone();
            let cancel = cancel.clone();
            handles.push((
                spec.name(),
                tokio::spawn(async move {
                    let outcome = loader.load_one(&spec, dir, &cancel).await;
                    drop(permit);
                    outcome
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (table, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => LoadOutcome::Failed {
                    reason: format!("load task panicked: {}", e),
                },
            };
            results.push(TableLoad {
                table: table.to_string(),
                outcome,
            });
        }
        Ok(results)
    }

    /// Resolve, wait for, and bulk-load one table's CSV.
    async fn load_one(
        &self,
        spec: &TableSpec,
        data_dir: PathBuf,
        cancel: &CancellationToken,
    ) -> LoadOutcome {
        let csv_file = spec.csv_path(&data_dir);

        let found = wait_for_file(
            &csv_file,
            self.settings.synthetic,
            self.settings.file_poll_interval,
            self.settings.file_wait_timeout,
            cancel,
        )
        .await;
        if !found {
            warn!("{} not found, skipping...", csv_file.display());
            return LoadOutcome::SkippedMissing;
        }

        info!("Loading: {}", spec.name());
        let result = self
            .db
            .bulk_load(
                &self.settings.schema_name,
                &spec.table_name(),
                &csv_file,
                self.settings.effective_delimiter(),
                self.settings.effective_quote(),
            )
            .await;

        match result {
            Ok(rows) => {
                info!("Successfully loaded {} ({} rows)", spec.name(), rows);
                LoadOutcome::Loaded { rows }
            }
            Err(e) => {
                error!("Error loading {}: {}", spec.name(), e);
                LoadOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
