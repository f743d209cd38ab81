//! Dialect drivers behind one capability trait.
//!
//! Each dialect implements the same small contract; shared orchestration
//! code takes `Arc<dyn Database>` and never branches on the dialect
//! itself. Only the bulk-load fast path diverges, and it lives entirely
//! inside the implementations: server-side COPY for PostgreSQL, batched
//! parameterized INSERTs for SQL Server.

mod mssql;
mod postgres;

pub use mssql::MssqlDatabase;
pub use postgres::PgDatabase;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::settings::{Dialect, Settings};

/// Dialect-specific database operations.
#[async_trait]
pub trait Database: Send + Sync {
    /// The dialect this driver speaks.
    fn dialect(&self) -> Dialect;

    /// Cheap liveness check against the pool.
    async fn ping(&self) -> Result<()>;

    /// Whether a schema exists. An unknown schema is `false`, never an
    /// error.
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    /// Create a schema. Errors with `SchemaConflict` if it already exists;
    /// callers are expected to check `schema_exists` first.
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Cascading schema drop. Teardown only; never part of the main
    /// provisioning path.
    async fn drop_schema(&self, schema: &str) -> Result<()>;

    /// Drop every table in the schema, foreign keys first where the engine
    /// cannot cascade.
    async fn drop_all_tables(&self, schema: &str) -> Result<()>;

    /// Tables currently present in the schema, lower case.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Row count for one table.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Bulk-load one CSV (header row present, empty string = NULL) into a
    /// table. Returns the number of data rows loaded. Implementations
    /// stream the file; they never buffer it whole.
    async fn bulk_load(
        &self,
        schema: &str,
        table: &str,
        path: &Path,
        delimiter: char,
        quote: char,
    ) -> Result<u64>;

    /// Run a pre-rendered SQL batch inside one transaction, rolling back
    /// on any error.
    async fn execute_batch(&self, sql: &str) -> Result<()>;
}

/// Open a pooled driver for the configured dialect. Fails fast with a
/// `Connectivity` error on an unreachable host or bad credentials.
pub async fn connect(settings: &Settings) -> Result<Arc<dyn Database>> {
    match settings.dialect {
        Dialect::Postgres => Ok(Arc::new(PgDatabase::connect(settings).await?)),
        Dialect::SqlServer => Ok(Arc::new(MssqlDatabase::connect(settings).await?)),
    }
}
