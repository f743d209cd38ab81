//! omop-lite CLI - provision an OMOP CDM database in one shot.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use omop_lite::{
    Dialect, OnExistingSchema, Orchestrator, ProvisionError, ProvisionSummary, Settings,
    SyntheticSize,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "omop-lite")]
#[command(about = "Create and populate an OMOP CDM database")]
#[command(version)]
struct Cli {
    /// Database host
    #[arg(long, env = "DB_HOST", default_value = "db")]
    db_host: String,

    /// Database port [default: 5432 for postgresql, 1433 for mssql]
    #[arg(long, env = "DB_PORT")]
    db_port: Option<u16>,

    /// Database user
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    db_user: String,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", default_value = "password", hide_env_values = true)]
    db_password: String,

    /// Database name
    #[arg(long, env = "DB_NAME", default_value = "omop")]
    db_name: String,

    /// Target schema for the CDM tables
    #[arg(long, env = "SCHEMA_NAME", default_value = "public")]
    schema_name: String,

    /// Database dialect: postgresql or mssql
    #[arg(long, env = "DIALECT", default_value = "postgresql")]
    dialect: Dialect,

    /// Load the bundled synthetic fixture set instead of --data-dir
    #[arg(long, env = "SYNTHETIC")]
    synthetic: bool,

    /// Synthetic fixture size: 100 or 1000 records
    #[arg(long, env = "SYNTHETIC_NUMBER", default_value = "100")]
    synthetic_number: u32,

    /// Root directory of the bundled synthetic fixture sets
    #[arg(long, env = "SYNTHETIC_DIR", default_value = "synthetic")]
    synthetic_dir: PathBuf,

    /// Directory containing the CSV files to load
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Field delimiter for user-supplied CSVs ("\t" or a single character)
    #[arg(long, env = "DELIMITER", default_value = "\t")]
    delimiter: String,

    /// Directory containing the per-dialect SQL scripts
    #[arg(long, env = "SCRIPTS_DIR", default_value = "scripts")]
    scripts_dir: PathBuf,

    /// Create the full-text search column and index on concept
    /// (postgresql only)
    #[arg(long, env = "FTS_CREATE")]
    fts_create: bool,

    /// What to do when the target schema already exists:
    /// skip, continue or fail
    #[arg(long, env = "ON_EXISTING_SCHEMA", default_value = "skip")]
    on_existing_schema: OnExistingSchema,

    /// Concurrent table loads during the data stage
    #[arg(long, env = "LOAD_WORKERS", default_value = "1")]
    load_workers: usize,

    /// Rows per INSERT batch (mssql bulk load only)
    #[arg(long, env = "INSERT_BATCH_SIZE", default_value = "1000")]
    insert_batch_size: usize,

    /// Exit non-zero if any table or script fails
    #[arg(long, env = "STRICT")]
    strict: bool,

    /// Output the run summary as JSON to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Test database connectivity and exit
    Test,

    /// Create the schema (if needed) and the CDM tables
    CreateTables,

    /// Bulk-load CSVs into existing tables
    LoadData {
        /// Only load these tables (comma-separated, case-insensitive)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Add primary key constraints
    AddPrimaryKeys,

    /// Add foreign key constraints (requires primary keys)
    AddForeignKeys,

    /// Add indices
    AddIndices,

    /// Add primary keys, foreign keys and indices in order
    AddConstraints,

    /// Tear down tables and/or the schema
    Drop {
        /// Drop only the tables, keep the schema
        #[arg(long, conflicts_with = "schema_only")]
        tables_only: bool,

        /// Drop only the schema (cascades to its contents)
        #[arg(long)]
        schema_only: bool,

        /// Required; dropping is destructive
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ProvisionError> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, &cli.log_format)
        .map_err(ProvisionError::Config)?;

    let settings = build_settings(&cli)?;

    // Refuse a destructive drop before opening any connection.
    if let Some(Commands::Drop { confirm: false, .. }) = cli.command {
        return Err(ProvisionError::Config(
            "drop is destructive; pass --confirm to proceed".into(),
        ));
    }

    let cancel_token = setup_signal_handler();
    let orchestrator = Orchestrator::new(settings.clone()).await?;

    match cli.command {
        None => {
            let summary = orchestrator.provision(&cancel_token).await?;
            report(&cli, &summary)?;
            if settings.strict && summary.has_failures() {
                return Err(strict_failure(&summary));
            }
        }

        Some(Commands::Test) => {
            orchestrator.test_connection().await?;
            println!("Connection OK ({})", settings.dialect);
        }

        Some(Commands::CreateTables) => {
            orchestrator.ensure_schema().await?;
            orchestrator.create_tables().await?;
            println!("Tables created in schema '{}'", settings.schema_name);
        }

        Some(Commands::LoadData { tables }) => {
            let loads = orchestrator.load_data(&tables, &cancel_token).await?;
            if cancel_token.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&loads)
                        .map_err(|e| ProvisionError::Config(e.to_string()))?
                );
            } else {
                for load in &loads {
                    println!("  {}: {}", load.table, load.outcome);
                }
            }
            let failed: Vec<&str> = loads
                .iter()
                .filter(|l| l.is_failed())
                .map(|l| l.table.as_str())
                .collect();
            if settings.strict && !failed.is_empty() {
                return Err(ProvisionError::bulk_load(
                    failed.join(", "),
                    "one or more tables failed to load",
                ));
            }
        }

        Some(Commands::AddPrimaryKeys) => {
            orchestrator.add_primary_keys().await?;
            println!("Primary keys added");
        }

        Some(Commands::AddForeignKeys) => {
            orchestrator.add_foreign_keys().await?;
            println!("Foreign keys added");
        }

        Some(Commands::AddIndices) => {
            orchestrator.add_indices().await?;
            println!("Indices added");
        }

        Some(Commands::AddConstraints) => {
            orchestrator.add_all_constraints().await?;
            println!("Constraints and indices added");
        }

        Some(Commands::Drop {
            tables_only,
            schema_only,
            confirm,
        }) => {
            debug_assert!(confirm);
            if tables_only {
                orchestrator.drop_tables().await?;
                println!("Tables dropped from schema '{}'", settings.schema_name);
            } else if schema_only {
                orchestrator.drop_schema().await?;
                println!("Schema '{}' dropped", settings.schema_name);
            } else {
                orchestrator.drop_all().await?;
                println!("Schema '{}' and all tables dropped", settings.schema_name);
            }
        }
    }

    Ok(())
}

fn build_settings(cli: &Cli) -> Result<Settings, ProvisionError> {
    let settings = Settings {
        db_host: cli.db_host.clone(),
        db_port: cli.db_port.unwrap_or_else(|| cli.dialect.default_port()),
        db_user: cli.db_user.clone(),
        db_password: cli.db_password.clone(),
        db_name: cli.db_name.clone(),
        schema_name: cli.schema_name.clone(),
        dialect: cli.dialect,
        synthetic: cli.synthetic,
        synthetic_size: SyntheticSize::from_number(cli.synthetic_number)?,
        synthetic_dir: cli.synthetic_dir.clone(),
        data_dir: cli.data_dir.clone(),
        delimiter: parse_delimiter(&cli.delimiter)?,
        scripts_dir: cli.scripts_dir.clone(),
        fts_create: cli.fts_create,
        on_existing_schema: cli.on_existing_schema,
        load_workers: cli.load_workers,
        insert_batch_size: cli.insert_batch_size,
        strict: cli.strict,
        ..Settings::default()
    };
    settings.validate()?;
    Ok(settings)
}

/// Accepts a literal single character, or the two-character escape `\t`
/// since a real tab is awkward to pass through a shell.
fn parse_delimiter(raw: &str) -> Result<char, ProvisionError> {
    match raw {
        "\\t" => Ok('\t'),
        s => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(ProvisionError::Config(format!(
                    "delimiter must be a single character or '\\t', got '{}'",
                    raw
                ))),
            }
        }
    }
}

fn report(cli: &Cli, summary: &ProvisionSummary) -> Result<(), ProvisionError> {
    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary.render());
    }
    Ok(())
}

/// In strict mode a run with per-unit failures exits non-zero, with the
/// exit code of the dominant failure class.
fn strict_failure(summary: &ProvisionSummary) -> ProvisionError {
    if !summary.failed_tables.is_empty() {
        ProvisionError::bulk_load(
            summary.failed_tables.join(", "),
            "one or more tables failed to load",
        )
    } else {
        ProvisionError::script(
            summary.failed_scripts.join(", "),
            "one or more scripts failed",
        )
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown log level '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Signal handlers for graceful shutdown. SIGINT (Ctrl-C) and SIGTERM
/// (container runtimes) both cancel the returned token; in-flight table
/// loads finish, nothing new starts.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        info!("Received SIGINT, finishing in-flight work before exit");
        token_int.cancel();
    });

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        info!("Received SIGTERM, finishing in-flight work before exit");
        token_term.cancel();
    });

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        info!("Received Ctrl-C, finishing in-flight work before exit");
        token.cancel();
    });

    cancel_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_accepts_tab_escape() {
        assert_eq!(parse_delimiter("\\t").unwrap(), '\t');
        assert_eq!(parse_delimiter(",").unwrap(), ',');
        assert_eq!(parse_delimiter("|").unwrap(), '|');
    }

    #[test]
    fn delimiter_rejects_multi_char() {
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["omop-lite"]);
        assert_eq!(cli.db_host, "db");
        assert_eq!(cli.dialect, Dialect::Postgres);
        assert_eq!(cli.synthetic_number, 100);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_parses_load_data_table_filter() {
        let cli = Cli::parse_from(["omop-lite", "load-data", "--tables", "person,concept"]);
        match cli.command {
            Some(Commands::LoadData { tables }) => {
                assert_eq!(tables, vec!["person", "concept"]);
            }
            _ => panic!("expected load-data"),
        }
    }

    #[test]
    fn drop_flags_conflict() {
        let result =
            Cli::try_parse_from(["omop-lite", "drop", "--tables-only", "--schema-only"]);
        assert!(result.is_err());
    }
}
