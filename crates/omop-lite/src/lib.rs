//! # omop-lite
//!
//! Provision an OMOP CDM database quickly: create the schema and tables,
//! bulk-load CSV data, then add primary keys, foreign keys, and indices.
//!
//! The same pipeline drives PostgreSQL (server-side COPY) and SQL Server
//! (batched parameterized INSERTs) behind one dialect trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use omop_lite::{Orchestrator, Settings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> omop_lite::Result<()> {
//!     let settings = Settings::default();
//!     let orchestrator = Orchestrator::new(settings).await?;
//!     let summary = orchestrator.provision(&CancellationToken::new()).await?;
//!     println!("{}", summary.render());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod db;
pub mod error;
pub mod files;
pub mod loader;
pub mod orchestrator;
pub mod scripts;
pub mod settings;

// Re-exports for convenient access
pub use catalog::{all_tables, filter_tables, TableSpec, OMOP_TABLES};
pub use db::{connect, Database};
pub use error::{ProvisionError, Result};
pub use loader::{DataLoader, LoadOutcome, TableLoad};
pub use orchestrator::{Orchestrator, PipelineStage, ProvisionSummary};
pub use scripts::{ScriptKind, ScriptRunner};
pub use settings::{Dialect, OnExistingSchema, Settings, SyntheticSize};
