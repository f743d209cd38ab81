//! SQL Server driver: tiberius over a bb8 pool, insert-based bulk load.
//!
//! SQL Server has no COPY-style streaming path exposed through TDS that
//! reads client-side files, so the bulk load reads the CSV header to
//! discover column order and issues batched parameterized INSERTs, padding
//! short rows with NULL.

use std::path::Path;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, ToSql};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::settings::{Dialect, Settings};

use super::Database;

/// TDS caps a statement at 2100 parameters; batches are sized under it.
const MAX_PARAMS_PER_STATEMENT: usize = 2100;

/// SQL Server error number for "there is already an object named ...".
const OBJECT_EXISTS_ERROR: u32 = 2714;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: Config,
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server implementation of [`Database`].
pub struct MssqlDatabase {
    pool: Pool<TiberiusConnectionManager>,
    insert_batch_size: usize,
}

impl MssqlDatabase {
    /// Open a pooled connection to SQL Server and verify it works.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let mut config = Config::new();
        config.host(&settings.db_host);
        config.port(settings.db_port);
        config.database(&settings.db_name);
        config.authentication(AuthMethod::sql_server(
            &settings.db_user,
            &settings.db_password,
        ));
        config.encryption(EncryptionLevel::Required);
        config.trust_cert();

        let manager = TiberiusConnectionManager { config };
        let pool_size = (settings.load_workers.max(1) + 2) as u32;
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .await
            .map_err(|e| ProvisionError::connectivity(e.to_string(), "building SQL Server pool"))?;

        let db = Self {
            pool,
            insert_batch_size: settings.insert_batch_size,
        };
        db.ping().await?;

        info!(
            "Connected to SQL Server: {}:{}/{}",
            settings.db_host, settings.db_port, settings.db_name
        );
        Ok(db)
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool.get().await.map_err(|e| {
            ProvisionError::connectivity(e.to_string(), "getting SQL Server connection")
        })
    }

    async fn insert_batch(
        &self,
        conn: &mut Client<Compat<TcpStream>>,
        table: &str,
        insert_sql: &str,
        rows: &[Vec<Option<String>>],
    ) -> Result<()> {
        let params: Vec<&dyn ToSql> = rows
            .iter()
            .flat_map(|row| row.iter().map(|v| v as &dyn ToSql))
            .collect();
        conn.execute(insert_sql, &params)
            .await
            .map_err(|e| ProvisionError::bulk_load(table, format!("batched INSERT: {}", e)))?;
        Ok(())
    }
}

/// Build a multi-row INSERT statement with `@Pn` placeholders.
fn insert_statement(schema: &str, table: &str, columns: &[String], row_count: usize) -> String {
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| Dialect::SqlServer.quote_ident(c))
        .collect();

    let mut param_idx = 1;
    let mut value_groups = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let placeholders: Vec<String> = (0..columns.len())
            .map(|_| {
                let p = format!("@P{}", param_idx);
                param_idx += 1;
                p
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {}.{} ({}) VALUES {}",
        Dialect::SqlServer.quote_ident(schema),
        Dialect::SqlServer.quote_ident(table),
        quoted.join(", "),
        value_groups.join(", ")
    )
}

/// Split one physical CSV line into fields. A field wrapped in the quote
/// character is unwrapped; the empty string normalizes to NULL.
fn split_row(line: &str, delimiter: char, quote: char) -> Vec<Option<String>> {
    line.split(delimiter)
        .map(|field| {
            let field = field
                .strip_prefix(quote)
                .and_then(|f| f.strip_suffix(quote))
                .unwrap_or(field);
            if field.is_empty() {
                None
            } else {
                Some(field.to_string())
            }
        })
        .collect()
}

/// Pad a short row with trailing NULLs to the header width. A row wider
/// than the header is a hard error, never silently truncated.
fn pad_row(
    mut fields: Vec<Option<String>>,
    width: usize,
    table: &str,
    line_no: u64,
) -> Result<Vec<Option<String>>> {
    if fields.len() > width {
        return Err(ProvisionError::bulk_load(
            table,
            format!(
                "row {} has {} fields but the header has {}",
                line_no,
                fields.len(),
                width
            ),
        ));
    }
    fields.resize(width, None);
    Ok(fields)
}

#[async_trait]
impl Database for MssqlDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.client().await?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| ProvisionError::connectivity(e.to_string(), "SELECT 1"))?
            .into_row()
            .await
            .map_err(|e| ProvisionError::connectivity(e.to_string(), "SELECT 1"))?;
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let mut conn = self.client().await?;
        let mut query = Query::new("SELECT 1 FROM sys.schemas WHERE name = @P1");
        query.bind(schema);
        let row = query.query(&mut conn).await?.into_row().await?;
        Ok(row.is_some())
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        let mut conn = self.client().await?;
        // CREATE SCHEMA must be the only statement in its batch.
        let sql = format!("CREATE SCHEMA {}", Dialect::SqlServer.quote_ident(schema));
        match conn.simple_query(&sql).await {
            Ok(stream) => {
                stream.into_results().await?;
                info!("Schema '{}' created", schema);
            }
            Err(tiberius::error::Error::Server(ref token))
                if token.code() == OBJECT_EXISTS_ERROR =>
            {
                return Err(ProvisionError::SchemaConflict(schema.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn drop_schema(&self, schema: &str) -> Result<()> {
        // No CASCADE in T-SQL: the schema must already be empty, which
        // drop_all_tables takes care of.
        self.drop_all_tables(schema).await?;
        let mut conn = self.client().await?;
        let sql = format!(
            "DROP SCHEMA IF EXISTS {}",
            Dialect::SqlServer.quote_ident(schema)
        );
        conn.simple_query(&sql).await?.into_results().await?;
        info!("Schema '{}' dropped", schema);
        Ok(())
    }

    async fn drop_all_tables(&self, schema: &str) -> Result<()> {
        let mut conn = self.client().await?;

        // Foreign keys block table drops, so they go first.
        let mut query = Query::new(
            "SELECT fk.name, OBJECT_NAME(fk.parent_object_id) \
             FROM sys.foreign_keys fk \
             JOIN sys.schemas s ON s.schema_id = fk.schema_id \
             WHERE s.name = @P1",
        );
        query.bind(schema);
        let rows = query.query(&mut conn).await?.into_first_result().await?;
        let fks: Vec<(String, String)> = rows
            .iter()
            .filter_map(|row| {
                let fk: &str = row.get(0)?;
                let table: &str = row.get(1)?;
                Some((fk.to_string(), table.to_string()))
            })
            .collect();

        for (fk, table) in &fks {
            let sql = format!(
                "ALTER TABLE {}.{} DROP CONSTRAINT {}",
                Dialect::SqlServer.quote_ident(schema),
                Dialect::SqlServer.quote_ident(table),
                Dialect::SqlServer.quote_ident(fk)
            );
            conn.simple_query(&sql).await?.into_results().await?;
            debug!("Dropped foreign key {}.{}", table, fk);
        }

        let tables = self.list_tables(schema).await?;
        let mut conn = self.client().await?;
        for table in &tables {
            let sql = format!(
                "DROP TABLE IF EXISTS {}.{}",
                Dialect::SqlServer.quote_ident(schema),
                Dialect::SqlServer.quote_ident(table)
            );
            conn.simple_query(&sql).await?.into_results().await?;
            debug!("Dropped table {}.{}", schema, table);
        }
        info!("Dropped {} tables from schema '{}'", tables.len(), schema);
        Ok(())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut conn = self.client().await?;
        let mut query = Query::new(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        );
        query.bind(schema);
        let rows = query.query(&mut conn).await?.into_first_result().await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(|s| s.to_lowercase()))
            .collect())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let mut conn = self.client().await?;
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {}.{}",
            Dialect::SqlServer.quote_ident(schema),
            Dialect::SqlServer.quote_ident(table)
        );
        let row = conn.simple_query(&sql).await?.into_row().await?;
        Ok(row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0))
    }

    async fn bulk_load(
        &self,
        schema: &str,
        table: &str,
        path: &Path,
        delimiter: char,
        quote: char,
    ) -> Result<u64> {
        let file = tokio::fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next_line()
            .await?
            .ok_or_else(|| ProvisionError::bulk_load(table, "file has no header row"))?;
        let columns: Vec<String> = header_line
            .trim_end_matches(['\r', '\n'])
            .split(delimiter)
            .map(|c| {
                c.strip_prefix(quote)
                    .and_then(|c| c.strip_suffix(quote))
                    .unwrap_or(c)
                    .to_string()
            })
            .collect();

        let rows_per_batch = (MAX_PARAMS_PER_STATEMENT / columns.len().max(1))
            .clamp(1, self.insert_batch_size.max(1));

        let mut conn = self.client().await?;
        let mut batch: Vec<Vec<Option<String>>> = Vec::with_capacity(rows_per_batch);
        let mut full_batch_sql: Option<String> = None;
        let mut total = 0u64;
        let mut line_no = 1u64;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            let fields = split_row(line, delimiter, quote);
            batch.push(pad_row(fields, columns.len(), table, line_no)?);

            if batch.len() == rows_per_batch {
                let sql = full_batch_sql.get_or_insert_with(|| {
                    insert_statement(schema, table, &columns, rows_per_batch)
                });
                self.insert_batch(&mut conn, table, sql, &batch).await?;
                total += batch.len() as u64;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            let sql = insert_statement(schema, table, &columns, batch.len());
            self.insert_batch(&mut conn, table, &sql, &batch).await?;
            total += batch.len() as u64;
        }

        Ok(total)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.client().await?;
        conn.simple_query("BEGIN TRANSACTION")
            .await?
            .into_results()
            .await?;

        let run = async {
            conn.simple_query(sql).await?.into_results().await?;
            Ok::<_, tiberius::error::Error>(())
        }
        .await;

        match run {
            Ok(()) => {
                conn.simple_query("COMMIT").await?.into_results().await?;
                Ok(())
            }
            Err(e) => {
                // Best effort: the connection may be unusable after a
                // severe error, in which case the server rolls back anyway.
                if let Ok(stream) = conn.simple_query("ROLLBACK").await {
                    stream.into_results().await.ok();
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_row_normalizes_empty_to_null() {
        let fields = split_row("1\t\tM", '\t', '\u{8}');
        assert_eq!(
            fields,
            vec![Some("1".to_string()), None, Some("M".to_string())]
        );
    }

    #[test]
    fn split_row_unwraps_quotes() {
        let fields = split_row("\"8507\",\"MALE\",", ',', '"');
        assert_eq!(
            fields,
            vec![Some("8507".to_string()), Some("MALE".to_string()), None]
        );
    }

    #[test]
    fn short_rows_are_padded_with_trailing_nulls() {
        let padded = pad_row(vec![Some("1".to_string())], 3, "person", 2).unwrap();
        assert_eq!(padded, vec![Some("1".to_string()), None, None]);
    }

    #[test]
    fn wide_rows_are_a_hard_error() {
        let fields = vec![Some("a".to_string()), Some("b".to_string())];
        let err = pad_row(fields, 1, "person", 7).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("person"));
        assert!(message.contains("row 7"));
    }

    #[test]
    fn insert_statement_numbers_params_across_rows() {
        let cols = vec!["person_id".to_string(), "gender_concept_id".to_string()];
        let sql = insert_statement("cdm", "person", &cols, 2);
        assert_eq!(
            sql,
            "INSERT INTO [cdm].[person] ([person_id], [gender_concept_id]) \
             VALUES (@P1, @P2), (@P3, @P4)"
        );
    }

    #[test]
    fn batch_size_respects_param_limit() {
        // 30 columns: 2100 / 30 = 70 rows per statement at most.
        let rows = (MAX_PARAMS_PER_STATEMENT / 30).clamp(1, 1000);
        assert_eq!(rows, 70);
    }
}
