//! End-to-end provisioning against a real PostgreSQL instance.
//!
//! Ignored by default; run with a reachable server, e.g.
//!
//! ```text
//! DB_HOST=localhost DB_PASSWORD=password \
//!     cargo test -p omop-lite --test live_postgres -- --ignored
//! ```

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use omop_lite::{Dialect, OnExistingSchema, Orchestrator, Settings, SyntheticSize};

fn workspace_root() -> PathBuf {
    // tests run with the crate dir as cwd; scripts/ and synthetic/ live two up
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap()
}

fn live_settings() -> Settings {
    let root = workspace_root();
    Settings {
        db_host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into()),
        db_user: std::env::var("DB_USER").unwrap_or_else(|_| "postgres".into()),
        db_password: std::env::var("DB_PASSWORD").unwrap_or_else(|_| "password".into()),
        db_name: std::env::var("DB_NAME").unwrap_or_else(|_| "omop".into()),
        schema_name: "omop_e2e".into(),
        dialect: Dialect::Postgres,
        synthetic: true,
        synthetic_size: SyntheticSize::Small,
        synthetic_dir: root.join("synthetic"),
        scripts_dir: root.join("scripts"),
        on_existing_schema: OnExistingSchema::Fail,
        ..Settings::default()
    }
}

#[tokio::test]
#[ignore = "requires a reachable PostgreSQL server"]
async fn full_provision_loads_the_synthetic_fixture() {
    let orchestrator = Orchestrator::new(live_settings())
        .await
        .unwrap();

    let summary = orchestrator
        .provision(&CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_clean(), "summary: {}", summary.render());
    assert_eq!(summary.tables_loaded, 22);
    assert!(summary.failed_scripts.is_empty());

    // the 100-person fixture carries 99 data rows
    let db = omop_lite::connect(&live_settings()).await.unwrap();
    assert_eq!(db.row_count("omop_e2e", "person").await.unwrap(), 99);

    orchestrator.drop_all().await.unwrap();
    assert!(!db.schema_exists("omop_e2e").await.unwrap());
}
