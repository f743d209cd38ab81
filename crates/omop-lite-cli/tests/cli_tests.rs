//! CLI integration tests for omop-lite.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions. None of them need a
//! running database.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the omop-lite binary.
fn cmd() -> Command {
    Command::cargo_bin("omop-lite").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("create-tables"))
        .stdout(predicate::str::contains("load-data"))
        .stdout(predicate::str::contains("add-primary-keys"))
        .stdout(predicate::str::contains("add-foreign-keys"))
        .stdout(predicate::str::contains("add-indices"))
        .stdout(predicate::str::contains("add-constraints"))
        .stdout(predicate::str::contains("drop"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("omop-lite"));
}

#[test]
fn test_load_data_subcommand_help() {
    cmd()
        .args(["load-data", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tables"));
}

#[test]
fn test_drop_subcommand_help() {
    cmd()
        .args(["drop", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tables-only"))
        .stdout(predicate::str::contains("--schema-only"))
        .stdout(predicate::str::contains("--confirm"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_connection_flag_defaults() {
    cmd()
        .arg("--help")
        .env_remove("DB_HOST")
        .env_remove("DB_NAME")
        .env_remove("SCHEMA_NAME")
        .assert()
        .success()
        .stdout(predicate::str::contains("--db-host"))
        .stdout(predicate::str::contains("[default: db]"))
        .stdout(predicate::str::contains("[default: omop]"))
        .stdout(predicate::str::contains("[default: public]"));
}

#[test]
fn test_dialect_flag_default() {
    cmd()
        .arg("--help")
        .env_remove("DIALECT")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dialect"))
        .stdout(predicate::str::contains("[default: postgresql]"));
}

#[test]
fn test_synthetic_flags_exist() {
    cmd()
        .arg("--help")
        .env_remove("SYNTHETIC_NUMBER")
        .assert()
        .success()
        .stdout(predicate::str::contains("--synthetic"))
        .stdout(predicate::str::contains("--synthetic-number"))
        .stdout(predicate::str::contains("[default: 100]"));
}

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_flags_exist() {
    cmd()
        .arg("--help")
        .env_remove("LOG_FORMAT")
        .env_remove("LOG_LEVEL")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--log-level"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_on_existing_schema_default() {
    cmd()
        .arg("--help")
        .env_remove("ON_EXISTING_SCHEMA")
        .assert()
        .success()
        .stdout(predicate::str::contains("--on-existing-schema"))
        .stdout(predicate::str::contains("[default: skip]"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_invalid_dialect_fails() {
    cmd()
        .args(["--dialect", "oracle", "test"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_invalid_synthetic_number_exits_with_code_1() {
    cmd()
        .args(["--synthetic", "--synthetic-number", "500", "test"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("100 or 1000"));
}

#[test]
fn test_invalid_delimiter_exits_with_code_1() {
    cmd()
        .args(["--delimiter", "ab", "test"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("single character"));
}

#[test]
fn test_fts_on_mssql_exits_with_code_1() {
    cmd()
        .args(["--dialect", "mssql", "--fts-create", "test"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("postgresql"));
}

#[test]
fn test_invalid_on_existing_schema_fails() {
    cmd()
        .args(["--on-existing-schema", "overwrite", "test"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("overwrite"));
}

#[test]
fn test_drop_without_confirm_exits_with_code_1() {
    cmd()
        .arg("drop")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--confirm"));
}

#[test]
fn test_drop_conflicting_flags_fail() {
    cmd()
        .args(["drop", "--tables-only", "--schema-only", "--confirm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// =============================================================================
// Exit Code Tests - Connectivity (Exit Code 2)
// =============================================================================

#[test]
fn test_unreachable_database_exits_with_code_2() {
    // Port 1 refuses immediately; no service listens there.
    cmd()
        .args([
            "--db-host",
            "127.0.0.1",
            "--db-port",
            "1",
            "--db-name",
            "omop",
            "test",
        ])
        .assert()
        .code(2);
}
