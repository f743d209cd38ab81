//! Provisioning settings and dialect selection.
//!
//! `Settings` is an immutable value passed by reference into every
//! component; there is no global mutable state. The CLI builds one from
//! flags and environment variables before anything touches the database.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProvisionError, Result};

/// Supported SQL dialects. Selected once at startup; immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    SqlServer,
}

impl Dialect {
    /// Subdirectory under the scripts directory holding this dialect's SQL.
    pub fn script_dir(&self) -> &'static str {
        match self {
            Dialect::Postgres => "pg",
            Dialect::SqlServer => "mssql",
        }
    }

    /// Quote an identifier using the dialect's convention.
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// The schema that exists out of the box and is never created or
    /// dropped by the pipeline.
    pub fn default_schema(&self) -> &'static str {
        match self {
            Dialect::Postgres => "public",
            Dialect::SqlServer => "dbo",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::Postgres => 5432,
            Dialect::SqlServer => 1433,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgresql"),
            Dialect::SqlServer => write!(f, "mssql"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgres),
            "mssql" | "sqlserver" => Ok(Dialect::SqlServer),
            other => Err(ProvisionError::Config(format!(
                "dialect must be 'postgresql' or 'mssql', got '{}'",
                other
            ))),
        }
    }
}

/// Bundled synthetic fixture variant. The two sets ship with different
/// delimiter and quoting conventions baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyntheticSize {
    /// 100-record fixture set, tab-delimited, unquoted.
    Small,
    /// 1000-record fixture set, comma-delimited, double-quoted.
    Large,
}

impl SyntheticSize {
    /// Subdirectory name under the synthetic data root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SyntheticSize::Small => "100",
            SyntheticSize::Large => "1000",
        }
    }

    /// Parse the user-facing record count (100 or 1000).
    pub fn from_number(n: u32) -> Result<Self> {
        match n {
            100 => Ok(SyntheticSize::Small),
            1000 => Ok(SyntheticSize::Large),
            other => Err(ProvisionError::Config(format!(
                "synthetic-number must be 100 or 1000, got {}",
                other
            ))),
        }
    }
}

/// What to do when the target schema already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExistingSchema {
    /// Stop cleanly without touching the schema.
    #[default]
    Skip,
    /// Proceed into the table/data stages against the existing schema.
    Continue,
    /// Abort the run with a SchemaConflict error.
    Fail,
}

impl FromStr for OnExistingSchema {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(OnExistingSchema::Skip),
            "continue" => Ok(OnExistingSchema::Continue),
            "fail" => Ok(OnExistingSchema::Fail),
            other => Err(ProvisionError::Config(format!(
                "on-existing-schema must be 'skip', 'continue' or 'fail', got '{}'",
                other
            ))),
        }
    }
}

/// Immutable provisioning configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,

    /// Target schema. The dialect's default schema is never created or
    /// dropped.
    pub schema_name: String,
    pub dialect: Dialect,

    /// Use the bundled synthetic fixture set instead of `data_dir`.
    pub synthetic: bool,
    pub synthetic_size: SyntheticSize,
    /// Root directory of the bundled fixture sets.
    pub synthetic_dir: PathBuf,

    /// User-supplied data directory (ignored when `synthetic` is set).
    pub data_dir: PathBuf,
    /// Field delimiter for user-supplied CSVs.
    pub delimiter: char,

    /// Directory containing the per-dialect DDL/constraint/index scripts.
    pub scripts_dir: PathBuf,
    /// Create the full-text search column and index on `concept`
    /// (PostgreSQL only).
    pub fts_create: bool,

    pub on_existing_schema: OnExistingSchema,

    /// Polling interval while waiting for a CSV produced by an upstream
    /// export.
    pub file_poll_interval: Duration,
    /// Give up waiting for a CSV after this long.
    pub file_wait_timeout: Duration,

    /// Rows per INSERT batch for the insert-based bulk load.
    pub insert_batch_size: usize,
    /// Concurrent table loads within the DataLoad stage.
    pub load_workers: usize,

    /// Treat per-table / per-script failures as fatal.
    pub strict: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_host: "db".into(),
            db_port: 5432,
            db_user: "postgres".into(),
            db_password: "password".into(),
            db_name: "omop".into(),
            schema_name: "public".into(),
            dialect: Dialect::Postgres,
            synthetic: false,
            synthetic_size: SyntheticSize::Small,
            synthetic_dir: PathBuf::from("synthetic"),
            data_dir: PathBuf::from("data"),
            delimiter: '\t',
            scripts_dir: PathBuf::from("scripts"),
            fts_create: false,
            on_existing_schema: OnExistingSchema::Skip,
            file_poll_interval: Duration::from_secs(5),
            file_wait_timeout: Duration::from_secs(300),
            insert_batch_size: 1000,
            load_workers: 1,
            strict: false,
        }
    }
}

// Manual Debug so passwords never leak into logs.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_password", &"[REDACTED]")
            .field("db_name", &self.db_name)
            .field("schema_name", &self.schema_name)
            .field("dialect", &self.dialect)
            .field("synthetic", &self.synthetic)
            .field("synthetic_size", &self.synthetic_size)
            .field("data_dir", &self.data_dir)
            .field("delimiter", &self.delimiter)
            .field("scripts_dir", &self.scripts_dir)
            .field("fts_create", &self.fts_create)
            .field("on_existing_schema", &self.on_existing_schema)
            .field("load_workers", &self.load_workers)
            .field("strict", &self.strict)
            .finish()
    }
}

impl Settings {
    /// Validate the settings before any component uses them.
    pub fn validate(&self) -> Result<()> {
        if self.db_host.is_empty() {
            return Err(ProvisionError::Config("db-host is required".into()));
        }
        if self.db_name.is_empty() {
            return Err(ProvisionError::Config("db-name is required".into()));
        }
        if self.schema_name.is_empty() {
            return Err(ProvisionError::Config("schema-name is required".into()));
        }
        if self.insert_batch_size == 0 {
            return Err(ProvisionError::Config(
                "insert-batch-size must be at least 1".into(),
            ));
        }
        if self.load_workers == 0 {
            return Err(ProvisionError::Config(
                "load-workers must be at least 1".into(),
            ));
        }
        if self.fts_create && self.dialect != Dialect::Postgres {
            return Err(ProvisionError::Config(
                "fts-create is only supported for the postgresql dialect".into(),
            ));
        }
        Ok(())
    }

    /// Whether the target schema is the dialect's default one, which the
    /// orchestrator never creates or drops.
    pub fn is_default_schema(&self) -> bool {
        self.schema_name == self.dialect.default_schema()
    }

    /// Field delimiter in effect. The large synthetic fixture set is
    /// comma-delimited; everything else uses the configured delimiter.
    pub fn effective_delimiter(&self) -> char {
        if self.synthetic && self.synthetic_size == SyntheticSize::Large {
            ','
        } else {
            self.delimiter
        }
    }

    /// Quote character in effect. The large synthetic fixture set uses
    /// ordinary double quotes; everything else uses a backspace, a
    /// character that cannot appear in the data, so quoting is effectively
    /// disabled.
    pub fn effective_quote(&self) -> char {
        if self.synthetic && self.synthetic_size == SyntheticSize::Large {
            '"'
        } else {
            '\u{8}'
        }
    }

    /// Directory holding the dialect's SQL scripts.
    pub fn dialect_script_dir(&self) -> PathBuf {
        self.scripts_dir.join(self.dialect.script_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_parses_common_spellings() {
        assert_eq!(Dialect::from_str("postgresql").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_str("PG").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_str("mssql").unwrap(), Dialect::SqlServer);
        assert!(Dialect::from_str("oracle").is_err());
    }

    #[test]
    fn quoting_follows_dialect_convention() {
        assert_eq!(Dialect::Postgres.quote_ident("cdm"), "\"cdm\"");
        assert_eq!(Dialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::SqlServer.quote_ident("cdm"), "[cdm]");
        assert_eq!(Dialect::SqlServer.quote_ident("a]b"), "[a]]b]");
    }

    #[test]
    fn synthetic_large_selects_comma_and_double_quote() {
        let settings = Settings {
            synthetic: true,
            synthetic_size: SyntheticSize::Large,
            ..Settings::default()
        };
        assert_eq!(settings.effective_delimiter(), ',');
        assert_eq!(settings.effective_quote(), '"');
    }

    #[test]
    fn synthetic_small_keeps_tab_and_no_quote() {
        let settings = Settings {
            synthetic: true,
            ..Settings::default()
        };
        assert_eq!(settings.effective_delimiter(), '\t');
        assert_eq!(settings.effective_quote(), '\u{8}');
    }

    #[test]
    fn real_data_uses_configured_delimiter() {
        let settings = Settings {
            delimiter: ',',
            ..Settings::default()
        };
        assert_eq!(settings.effective_delimiter(), ',');
        assert_eq!(settings.effective_quote(), '\u{8}');
    }

    #[test]
    fn default_schema_depends_on_dialect() {
        let pg = Settings::default();
        assert!(pg.is_default_schema());

        let mssql = Settings {
            dialect: Dialect::SqlServer,
            schema_name: "dbo".into(),
            ..Settings::default()
        };
        assert!(mssql.is_default_schema());

        let named = Settings {
            schema_name: "cdm".into(),
            ..Settings::default()
        };
        assert!(!named.is_default_schema());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let settings = Settings {
            load_workers: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_fts_on_sqlserver() {
        let settings = Settings {
            dialect: Dialect::SqlServer,
            fts_create: true,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let settings = Settings {
            db_password: "super_secret_123".into(),
            ..Settings::default()
        };
        let debug_output = format!("{:?}", settings);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_123"));
    }

    #[test]
    fn synthetic_size_parses_known_numbers() {
        assert_eq!(
            SyntheticSize::from_number(100).unwrap(),
            SyntheticSize::Small
        );
        assert_eq!(
            SyntheticSize::from_number(1000).unwrap(),
            SyntheticSize::Large
        );
        assert!(SyntheticSize::from_number(500).is_err());
    }
}
