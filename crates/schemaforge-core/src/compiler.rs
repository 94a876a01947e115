//! Depth-first compilation of a domain's table tree into DDL.

use tracing::{debug, info};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::model::{ColumnDef, ObjectKind, TableDef, ValidationAction};
use crate::planner::{
    IndexHeuristic, IndexStyle, NamingConvention, basename, column_index, column_spec, named_index,
    need_index,
};
use crate::statements::CompiledDomain;
use crate::validation::{ParentKey, ValidatedTable, spillover_table_ddl, validation_ddl};
use crate::view::create_view;

static DEFAULT_HEURISTIC: NamingConvention = NamingConvention;

/// Options controlling the shape of the generated statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Guard every `CREATE` with `IF NOT EXISTS` (or `OR REPLACE` for views)
    /// so that provisioning can be re-run against an existing database.
    pub sloppy: bool,
    /// Build indices with `CREATE INDEX CONCURRENTLY`.
    pub concurrent_indices: bool,
}

/// Walks a [`Domain`] and produces its [`CompiledDomain`].
pub struct Compiler<'a> {
    domain: &'a Domain,
    options: CompileOptions,
    heuristic: &'a dyn IndexHeuristic,
}

impl<'a> Compiler<'a> {
    pub fn new(domain: &'a Domain, options: CompileOptions) -> Self {
        Self {
            domain,
            options,
            heuristic: &DEFAULT_HEURISTIC,
        }
    }

    /// Replaces the naming heuristic used by the `selected` index policy.
    pub fn with_heuristic(mut self, heuristic: &'a dyn IndexHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn compile(&self) -> Result<CompiledDomain> {
        let domain = self.domain;
        let mut output = CompiledDomain::new(domain.name(), domain.schema());

        let schemas = domain.schema().into_iter().chain(
            domain
                .auxiliary_schemas()
                .iter()
                .map(String::as_str),
        );
        for schema in schemas {
            output.push_common(format!("CREATE SCHEMA IF NOT EXISTS {schema};"));
        }

        for table in domain.tables() {
            self.compile_node(table, None, &mut output)?;
        }

        info!(
            domain = domain.name(),
            tables = output.tables().count(),
            statements = output.statements().len(),
            deferred_indices = output.indices().len(),
            "compiled domain"
        );
        Ok(output)
    }

    fn compile_node(
        &self,
        table: &TableDef,
        parent: Option<&TableDef>,
        output: &mut CompiledDomain,
    ) -> Result<()> {
        let fqn = self.domain.fqn(&table.name);
        output.begin_table(&fqn)?;
        let kind = table.kind();
        debug!(table = %fqn, kind = kind.keyword(), "compiling table");

        let parent_key = parent.and_then(|parent| parent.primary_key.as_deref());
        let foreign_key = match (parent, parent_key) {
            (Some(parent), Some(key)) => Some(format!(
                "CONSTRAINT {}_to_{} FOREIGN KEY ({columns}) REFERENCES {} ({columns})",
                table.name,
                parent.name,
                self.domain.fqn(&parent.name),
                columns = key.join(", ")
            )),
            _ => None,
        };

        let column_clauses: Vec<String> = table.columns.iter().map(column_spec).collect();
        let mut features = column_clauses.clone();
        if !kind.is_view() {
            if let Some(key) = &table.primary_key {
                features.push(format!("PRIMARY KEY ({})", key.join(", ")));
            }
            features.extend(foreign_key);
        }

        // Columns that end up in the created object; a table built from a
        // view has those of its source.
        let columns: &[ColumnDef] = match kind {
            ObjectKind::View | ObjectKind::MaterializedView => {
                let ddl = create_view(self.domain, table, &fqn, self.options.sloppy)?;
                self.emit(output, &fqn, ddl);
                &table.columns
            }
            ObjectKind::TableFromView => {
                let source = self.table_from_view(table, &fqn, &features, output)?;
                &source.columns
            }
            ObjectKind::Table => {
                let ddl = format!(
                    "{} (\n\t{}\n);",
                    self.create_table(&fqn),
                    features.join(",\n\t")
                );
                self.emit(output, &fqn, ddl);
                &table.columns
            }
        };

        if let Some(policy) = &table.invalid_records {
            self.validation(table, &fqn, parent, columns, &column_clauses, &policy.action, output)?;
        }

        if kind != ObjectKind::View {
            let style = self.index_style();
            for column in columns {
                if !need_index(self.domain.index_policy(), column, self.heuristic) {
                    continue;
                }
                let planned = column_index(&fqn, column, style, self.heuristic);
                if planned.onload {
                    self.emit(output, &fqn, planned.ddl);
                } else {
                    debug!(table = %fqn, statement = %planned.ddl, "deferred index");
                    output.defer_index(&fqn, planned.ddl);
                }
            }
        }

        for index in &table.indices {
            let ddl = named_index(&fqn, index, self.index_style());
            debug!(table = %fqn, statement = %ddl, "deferred index");
            output.defer_index(&fqn, ddl);
        }

        for child in &table.children {
            self.compile_node(child, Some(table), output)?;
        }
        Ok(())
    }

    /// `CREATE TABLE ... AS SELECT` followed by one `ALTER TABLE ... ADD` per
    /// feature. Returns the source definition whose columns the table copies.
    fn table_from_view(
        &self,
        table: &TableDef,
        fqn: &str,
        features: &[String],
        output: &mut CompiledDomain,
    ) -> Result<&'a TableDef> {
        let Some(from) = table.create.as_ref().and_then(|create| create.from.as_deref()) else {
            return Err(Error::config(format!("table {fqn} must declare create.from")));
        };
        let select = table
            .create
            .as_ref()
            .and_then(|create| create.select.as_deref())
            .unwrap_or("*");
        let source = match self.domain.find(from) {
            Some(source) => source,
            None => self.domain.require(basename(from))?,
        };

        let ddl = format!(
            "{} AS SELECT {select} FROM {};",
            self.create_table(fqn),
            self.domain.fqn(basename(from))
        );
        self.emit(output, fqn, ddl);
        for feature in features {
            self.emit(output, fqn, format!("ALTER TABLE {fqn} ADD {feature};"));
        }
        Ok(source)
    }

    #[allow(clippy::too_many_arguments)]
    fn validation(
        &self,
        table: &TableDef,
        fqn: &str,
        parent: Option<&TableDef>,
        columns: &[ColumnDef],
        column_clauses: &[String],
        action: &ValidationAction,
        output: &mut CompiledDomain,
    ) -> Result<()> {
        if table.kind().is_view() {
            return Err(Error::config(format!(
                "invalid records policy requires a table, {fqn} is a view"
            )));
        }
        let Some(primary_key) = table.primary_key.as_deref() else {
            return Err(Error::config(format!(
                "invalid records policy of {fqn} requires a primary key"
            )));
        };

        let spillover = self.domain.spillover_table(table)?;
        if let Some(spillover) = &spillover {
            let ddl = spillover_table_ddl(&self.create_table(spillover), column_clauses);
            self.emit(output, fqn, ddl);
        }

        let parent = match (parent, parent.and_then(|parent| parent.primary_key.as_deref())) {
            (Some(parent), Some(key)) => Some((self.domain.fqn(&parent.name), key)),
            _ => None,
        };
        let target = ValidatedTable {
            table: fqn,
            basename: &table.name,
            schema: self.domain.schema(),
            primary_key,
            columns,
            parent: parent.as_ref().map(|(table, columns)| ParentKey {
                table: table.as_str(),
                columns: *columns,
            }),
            action,
            spillover: spillover.as_deref(),
        };
        for ddl in validation_ddl(&target, self.options.sloppy)? {
            self.emit(output, fqn, ddl);
        }
        Ok(())
    }

    fn emit(&self, output: &mut CompiledDomain, table: &str, statement: String) {
        debug!(table = %table, statement = %statement, "emitted statement");
        output.append(table, statement);
    }

    fn create_table(&self, table: &str) -> String {
        if self.options.sloppy {
            format!("CREATE TABLE IF NOT EXISTS {table}")
        } else {
            format!("CREATE TABLE {table}")
        }
    }

    fn index_style(&self) -> IndexStyle {
        IndexStyle {
            concurrently: self.options.concurrent_indices,
            if_not_exists: self.options.sloppy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexMethod;

    struct Everything;

    impl IndexHeuristic for Everything {
        fn classify(&self, _column: &str) -> Option<IndexMethod> {
            Some(IndexMethod::Hash)
        }
    }

    const DOMAIN: &str = r#"
d:
  schema: s
  tables:
    parent:
      primary_key: [id]
      columns:
        - id
        - note
      children:
        child:
          columns:
            - x: {type: INT}
"#;

    #[test]
    fn child_references_parent_key() {
        let domain = Domain::from_str(DOMAIN, "d").unwrap();
        let compiled = domain.compile(CompileOptions::default()).unwrap();
        assert_eq!(
            compiled.table_statements("child").unwrap()[0],
            "CREATE TABLE s.child (\n\tx INT,\n\tid VARCHAR,\n\t\
CONSTRAINT child_to_parent FOREIGN KEY (id) REFERENCES s.parent (id)\n);"
        );
    }

    #[test]
    fn custom_heuristic_drives_selected_policy() {
        let domain = Domain::from_str(DOMAIN, "d").unwrap();
        let compiled = Compiler::new(&domain, CompileOptions::default())
            .with_heuristic(&Everything)
            .compile()
            .unwrap();
        assert_eq!(
            compiled.indices_for("parent"),
            [
                "CREATE INDEX parent_id_idx ON s.parent USING HASH (id);",
                "CREATE INDEX parent_note_idx ON s.parent USING HASH (note);",
            ]
        );
    }

    #[test]
    fn table_from_view_adds_features_separately() {
        let domain = Domain::from_str(
            r#"
d:
  schema: s
  tables:
    events:
      columns: [event_id, kind]
    snapshot:
      create: {type: table, from: events, select: "event_id, kind"}
      primary_key: [event_id]
      columns:
        - label: {type: TEXT}
"#,
            "d",
        )
        .unwrap();
        let compiled = domain.compile(CompileOptions::default()).unwrap();
        assert_eq!(
            compiled.table_statements("snapshot").unwrap(),
            [
                "CREATE TABLE s.snapshot AS SELECT event_id, kind FROM s.events;",
                "ALTER TABLE s.snapshot ADD label TEXT;",
                "ALTER TABLE s.snapshot ADD PRIMARY KEY (event_id);",
            ]
        );
        assert_eq!(
            compiled.indices_for("snapshot"),
            ["CREATE INDEX snapshot_event_id_idx ON s.snapshot USING BTREE (event_id);"]
        );
    }

    #[test]
    fn validation_on_a_view_is_rejected() {
        let domain = Domain::from_str(
            r#"
d:
  tables:
    v:
      create: {type: view, from: t, group by: [a]}
      columns: [a]
      invalid.records: {action: ignore}
"#,
            "d",
        )
        .unwrap();
        assert!(matches!(
            domain.compile(CompileOptions::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn duplicate_table_names_are_rejected() {
        let domain = Domain::from_str(
            "d: {tables: {a: {primary_key: [id], columns: [id], children: {a: {columns: [x]}}}}}",
            "d",
        )
        .unwrap();
        assert!(matches!(
            domain.compile(CompileOptions::default()),
            Err(Error::Configuration(_))
        ));
    }
}
