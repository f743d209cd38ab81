//! PostgreSQL driver: pooled connections and COPY-based bulk load.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::{pin_mut, SinkExt};
use tokio::io::AsyncReadExt;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::settings::{Dialect, Settings};

use super::Database;

/// Bytes read from the data file per COPY chunk.
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// PostgreSQL implementation of [`Database`].
pub struct PgDatabase {
    pool: Pool,
}

impl PgDatabase {
    /// Open a pooled connection to PostgreSQL and verify it works.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&settings.db_host);
        pg_config.port(settings.db_port);
        pg_config.dbname(&settings.db_name);
        pg_config.user(&settings.db_user);
        pg_config.password(&settings.db_password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool_size = settings.load_workers.max(1) + 2;
        let pool = Pool::builder(mgr)
            .max_size(pool_size)
            .build()
            .map_err(|e| {
                ProvisionError::connectivity(e.to_string(), "building PostgreSQL pool")
            })?;

        let db = Self { pool };
        db.ping().await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            settings.db_host, settings.db_port, settings.db_name
        );
        Ok(db)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            ProvisionError::connectivity(e.to_string(), "getting PostgreSQL connection")
        })
    }
}

/// Render a char as a PostgreSQL string literal for COPY options.
/// Control characters use escape-string syntax.
fn sql_char_literal(c: char) -> String {
    match c {
        '\t' => "E'\\t'".to_string(),
        '\u{8}' => "E'\\b'".to_string(),
        '\'' => "''''".to_string(),
        '\\' => "E'\\\\'".to_string(),
        other => format!("'{}'", other),
    }
}

/// Build the COPY statement for one table. Header row is consumed by the
/// server; empty string decodes to NULL.
fn copy_statement(schema: &str, table: &str, delimiter: char, quote: char) -> String {
    format!(
        "COPY {}.{} FROM STDIN WITH (FORMAT csv, DELIMITER {}, NULL '', QUOTE {}, HEADER, ENCODING 'UTF8')",
        Dialect::Postgres.quote_ident(schema),
        Dialect::Postgres.quote_ident(table),
        sql_char_literal(delimiter),
        sql_char_literal(quote),
    )
}

#[async_trait]
impl Database for PgDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| ProvisionError::connectivity(e.to_string(), "SELECT 1"))?;
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1",
                &[&schema],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        let client = self.client().await?;
        let sql = format!("CREATE SCHEMA {}", Dialect::Postgres.quote_ident(schema));
        match client.batch_execute(&sql).await {
            Ok(()) => {
                info!("Schema '{}' created", schema);
                Ok(())
            }
            Err(e) if e.code() == Some(&SqlState::DUPLICATE_SCHEMA) => {
                Err(ProvisionError::SchemaConflict(schema.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_schema(&self, schema: &str) -> Result<()> {
        let client = self.client().await?;
        let sql = format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            Dialect::Postgres.quote_ident(schema)
        );
        client.batch_execute(&sql).await?;
        info!("Schema '{}' dropped", schema);
        Ok(())
    }

    async fn drop_all_tables(&self, schema: &str) -> Result<()> {
        let tables = self.list_tables(schema).await?;
        let client = self.client().await?;
        for table in &tables {
            let sql = format!(
                "DROP TABLE IF EXISTS {}.{} CASCADE",
                Dialect::Postgres.quote_ident(schema),
                Dialect::Postgres.quote_ident(table)
            );
            client.batch_execute(&sql).await?;
            debug!("Dropped table {}.{}", schema, table);
        }
        info!("Dropped {} tables from schema '{}'", tables.len(), schema);
        Ok(())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[&schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            Dialect::Postgres.quote_ident(schema),
            Dialect::Postgres.quote_ident(table)
        );
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn bulk_load(
        &self,
        schema: &str,
        table: &str,
        path: &Path,
        delimiter: char,
        quote: char,
    ) -> Result<u64> {
        let client = self.client().await?;
        let stmt = copy_statement(schema, table, delimiter, quote);
        debug!("{}", stmt);

        let mut file = tokio::fs::File::open(path).await?;
        let sink = client.copy_in::<_, Bytes>(&stmt).await?;
        pin_mut!(sink);

        // Stream the file in fixed-size chunks; the whole CSV is never
        // resident in memory.
        let mut buf = vec![0u8; COPY_CHUNK_BYTES];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.send(Bytes::copy_from_slice(&buf[..n]))
                .await
                .map_err(|e| {
                    ProvisionError::bulk_load(table, format!("COPY send failed: {}", e))
                })?;
        }

        let rows = sink
            .finish()
            .await
            .map_err(|e| ProvisionError::bulk_load(table, e.to_string()))?;
        Ok(rows)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(sql).await?;
        tx.commit().await?;
        Ok(())
    }
}
