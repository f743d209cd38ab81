//! Static catalog of OMOP CDM tables the pipeline can bulk-load.
//!
//! The CDM itself defines more objects than this; the catalog lists the
//! tables that ship with a `<TABLE_NAME>.csv` data file. The DDL scripts
//! own the full table set.

use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::settings::Dialect;

/// Tables with a bulk-loadable CSV, in catalog (load) order. Load order
/// does not respect foreign-key dependencies because constraints are added
/// after the data.
pub const OMOP_TABLES: [&str; 22] = [
    "CDM_SOURCE",
    "CONCEPT",
    "CONCEPT_ANCESTOR",
    "CONCEPT_CLASS",
    "CONCEPT_RELATIONSHIP",
    "CONCEPT_SYNONYM",
    "CONDITION_ERA",
    "CONDITION_OCCURRENCE",
    "DEATH",
    "DOMAIN",
    "DRUG_ERA",
    "DRUG_EXPOSURE",
    "DRUG_STRENGTH",
    "LOCATION",
    "MEASUREMENT",
    "OBSERVATION",
    "OBSERVATION_PERIOD",
    "PERSON",
    "PROCEDURE_OCCURRENCE",
    "RELATIONSHIP",
    "VISIT_OCCURRENCE",
    "VOCABULARY",
];

/// One target table: logical name, expected CSV filename, qualified name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    name: &'static str,
}

impl TableSpec {
    /// Catalog name, upper case as published.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lower-case name as it exists in the database.
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Expected data file within a data directory.
    pub fn csv_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.csv", self.name))
    }

    /// Schema-qualified, dialect-quoted target name.
    pub fn qualified_name(&self, schema: &str, dialect: Dialect) -> String {
        format!(
            "{}.{}",
            dialect.quote_ident(schema),
            dialect.quote_ident(&self.table_name())
        )
    }
}

/// The full catalog, in load order.
pub fn all_tables() -> Vec<TableSpec> {
    OMOP_TABLES.iter().map(|name| TableSpec { name }).collect()
}

/// Filter the catalog to a requested subset, preserving catalog order.
/// Matching is case-insensitive. An empty request means the full catalog;
/// an unknown name is a configuration error.
pub fn filter_tables(requested: &[String]) -> Result<Vec<TableSpec>> {
    if requested.is_empty() {
        return Ok(all_tables());
    }

    for name in requested {
        if !OMOP_TABLES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(name))
        {
            return Err(ProvisionError::Config(format!(
                "unknown table '{}'; available tables: {}",
                name,
                OMOP_TABLES.join(", ")
            )));
        }
    }

    Ok(all_tables()
        .into_iter()
        .filter(|spec| {
            requested
                .iter()
                .any(|name| name.eq_ignore_ascii_case(spec.name()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn catalog_has_22_tables_in_stable_order() {
        let tables = all_tables();
        assert_eq!(tables.len(), 22);
        assert_eq!(tables[0].name(), "CDM_SOURCE");
        assert_eq!(tables.last().unwrap().name(), "VOCABULARY");
    }

    #[test]
    fn filter_is_case_insensitive_and_keeps_catalog_order() {
        let requested = vec!["person".to_string(), "Concept".to_string()];
        let tables = filter_tables(&requested).unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name()).collect();
        // CONCEPT precedes PERSON in catalog order regardless of request order.
        assert_eq!(names, vec!["CONCEPT", "PERSON"]);
    }

    #[test]
    fn empty_filter_returns_full_catalog() {
        assert_eq!(filter_tables(&[]).unwrap().len(), 22);
    }

    #[test]
    fn unknown_table_is_rejected() {
        let err = filter_tables(&["not_a_table".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not_a_table"));
    }

    #[test]
    fn csv_path_uses_catalog_case() {
        let spec = filter_tables(&["person".to_string()]).unwrap()[0];
        assert_eq!(
            spec.csv_path(Path::new("/data")),
            Path::new("/data/PERSON.csv")
        );
    }

    #[test]
    fn qualified_name_is_dialect_quoted() {
        let spec = filter_tables(&["person".to_string()]).unwrap()[0];
        assert_eq!(
            spec.qualified_name("cdm", Dialect::Postgres),
            "\"cdm\".\"person\""
        );
        assert_eq!(
            spec.qualified_name("cdm", Dialect::SqlServer),
            "[cdm].[person]"
        );
    }
}
