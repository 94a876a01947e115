use serde::Serialize;

use crate::error::{Error, Result};

/// Statements that belong to one table, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatements {
    /// Fully qualified table name.
    pub table: String,
    pub statements: Vec<String>,
}

/// The statement set produced by compiling a domain.
///
/// Built append-only during a single compilation pass and read-only
/// afterwards. Tables appear in declaration order, parents before children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledDomain {
    domain: String,
    schema: Option<String>,
    /// Schema creation statements.
    common: Vec<String>,
    /// Every non-deferred statement: common first, then each table's.
    ddl: Vec<String>,
    ddl_by_table: Vec<TableStatements>,
    /// Deferred index statements, built after data loading.
    indices: Vec<String>,
    indices_by_table: Vec<TableStatements>,
}

impl CompiledDomain {
    pub(crate) fn new(domain: &str, schema: Option<&str>) -> Self {
        Self {
            domain: domain.to_string(),
            schema: schema.map(str::to_string),
            common: Vec::new(),
            ddl: Vec::new(),
            ddl_by_table: Vec::new(),
            indices: Vec::new(),
            indices_by_table: Vec::new(),
        }
    }

    pub(crate) fn push_common(&mut self, statement: String) {
        if self.common.contains(&statement) {
            return;
        }
        self.ddl.push(statement.clone());
        self.common.push(statement);
    }

    /// Opens the statement list of a table. A table may be opened only once.
    pub(crate) fn begin_table(&mut self, table: &str) -> Result<()> {
        if self.ddl_by_table.iter().any(|entry| entry.table == table) {
            return Err(Error::config(format!(
                "table {table} is defined more than once in domain {}",
                self.domain
            )));
        }
        self.ddl_by_table.push(TableStatements {
            table: table.to_string(),
            statements: Vec::new(),
        });
        Ok(())
    }

    /// Appends a statement to an opened table.
    pub(crate) fn append(&mut self, table: &str, statement: String) {
        self.ddl.push(statement.clone());
        push_statement(&mut self.ddl_by_table, table, statement);
    }

    pub(crate) fn defer_index(&mut self, table: &str, statement: String) {
        self.indices.push(statement.clone());
        push_statement(&mut self.indices_by_table, table, statement);
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// All statements in creation order, excluding deferred indices.
    pub fn statements(&self) -> &[String] {
        &self.ddl
    }

    pub fn common(&self) -> &[String] {
        &self.common
    }

    /// Compiled tables (fully qualified) in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.ddl_by_table.iter().map(|entry| entry.table.as_str())
    }

    /// Statements of a single table, given by plain or qualified name.
    pub fn table_statements(&self, table: &str) -> Option<&[String]> {
        let table = self.qualify(table);
        self.ddl_by_table
            .iter()
            .find(|entry| entry.table == table)
            .map(|entry| entry.statements.as_slice())
    }

    /// Common statements plus the statements of the requested tables.
    ///
    /// Tables keep their declaration order regardless of the order requested,
    /// so a parent is still created before its children.
    pub fn statements_for(&self, tables: &[&str]) -> Result<Vec<String>> {
        let requested: Vec<String> = tables.iter().map(|table| self.qualify(table)).collect();
        for table in &requested {
            if !self.ddl_by_table.iter().any(|entry| &entry.table == table) {
                return Err(Error::lookup(format!(
                    "table {table} does not exist in domain {}",
                    self.domain
                )));
            }
        }

        let mut statements = self.common.clone();
        for entry in &self.ddl_by_table {
            if requested.contains(&entry.table) {
                statements.extend(entry.statements.iter().cloned());
            }
        }
        Ok(statements)
    }

    /// All deferred index statements.
    pub fn indices(&self) -> &[String] {
        &self.indices
    }

    /// Deferred index statements of one table; empty when it has none.
    pub fn indices_for(&self, table: &str) -> &[String] {
        let table = self.qualify(table);
        self.indices_by_table
            .iter()
            .find(|entry| entry.table == table)
            .map(|entry| entry.statements.as_slice())
            .unwrap_or_default()
    }

    fn qualify(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) if !table.contains('.') => format!("{schema}.{table}"),
            _ => table.to_string(),
        }
    }
}

fn push_statement(entries: &mut Vec<TableStatements>, table: &str, statement: String) {
    match entries.iter_mut().find(|entry| entry.table == table) {
        Some(entry) => entry.statements.push(statement),
        None => entries.push(TableStatements {
            table: table.to_string(),
            statements: vec![statement],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled() -> CompiledDomain {
        let mut compiled = CompiledDomain::new("d", Some("s"));
        compiled.push_common("CREATE SCHEMA IF NOT EXISTS s;".to_string());
        compiled.push_common("CREATE SCHEMA IF NOT EXISTS s;".to_string());
        compiled.begin_table("s.parent").unwrap();
        compiled.append("s.parent", "CREATE TABLE s.parent ();".to_string());
        compiled.begin_table("s.child").unwrap();
        compiled.append("s.child", "CREATE TABLE s.child ();".to_string());
        compiled.defer_index("s.child", "CREATE INDEX child_x_idx ON s.child USING BTREE (x);".to_string());
        compiled
    }

    #[test]
    fn keeps_declaration_order_for_selective_emission() {
        let compiled = compiled();
        assert_eq!(compiled.common().len(), 1);
        assert_eq!(
            compiled.statements_for(&["child", "parent"]).unwrap(),
            vec![
                "CREATE SCHEMA IF NOT EXISTS s;",
                "CREATE TABLE s.parent ();",
                "CREATE TABLE s.child ();",
            ]
        );
        assert_eq!(
            compiled.statements_for(&["s.child"]).unwrap(),
            vec!["CREATE SCHEMA IF NOT EXISTS s;", "CREATE TABLE s.child ();"]
        );
    }

    #[test]
    fn unknown_table_is_a_lookup_error() {
        assert!(matches!(
            compiled().statements_for(&["nothing"]),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn deferred_indices_are_kept_apart() {
        let compiled = compiled();
        assert_eq!(compiled.statements().len(), 3);
        assert_eq!(compiled.indices().len(), 1);
        assert_eq!(compiled.indices_for("child").len(), 1);
        assert!(compiled.indices_for("parent").is_empty());
    }

    #[test]
    fn rejects_duplicate_tables() {
        let mut compiled = compiled();
        assert!(matches!(
            compiled.begin_table("s.child"),
            Err(Error::Configuration(_))
        ));
    }
}
