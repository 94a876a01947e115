use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::compiler::{CompileOptions, Compiler};
use crate::error::{Error, Result};
use crate::model::{ColumnKind, ColumnSource, IndexPolicy, ObjectKind, TableDef, ValidationAction};
use crate::parse::parse_tables;
use crate::statements::CompiledDomain;

/// A table that must be dropped together with the table it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    /// Fully qualified name.
    pub table: String,
    pub kind: ObjectKind,
}

/// A named data domain: the parsed specification of its schema and tables.
///
/// The table tree is resolved once at construction: children carry the
/// parent key columns they reference and views with a `group by` carry the
/// primary key derived from it. The domain is immutable afterwards.
#[derive(Debug, Clone)]
pub struct Domain {
    name: String,
    /// The domain's own mapping, used for path lookups.
    raw: Mapping,
    schema: Option<String>,
    auxiliary_schemas: Vec<String>,
    index_policy: IndexPolicy,
    tables: Vec<TableDef>,
}

impl Domain {
    /// Parses a YAML or JSON document and selects the domain `name`.
    pub fn from_str(document: &str, name: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(document)?;
        Self::from_value(&value, name)
    }

    /// Reads a registry file and selects the domain `name`.
    pub fn from_path(path: &Path, name: &str) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), domain = name, "loading domain registry");
        Self::from_str(&document, name)
    }

    /// Builds the domain `name` from a pre-parsed document.
    pub fn from_value(document: &Value, name: &str) -> Result<Self> {
        let Some(root) = document.as_mapping() else {
            return Err(Error::config("domain document must be a mapping"));
        };
        let Some(raw) = root.get(name).and_then(Value::as_mapping) else {
            return Err(Error::config(format!(
                "domain {name} is not defined in the registry"
            )));
        };

        let schema = raw
            .get("schema")
            .or_else(|| root.get("schema"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let auxiliary_schemas = raw
            .iter()
            .filter(|(key, _)| key.as_str().is_some_and(|key| key.starts_with("schema.")))
            .map(|(key, value)| {
                value.as_str().map(str::to_string).ok_or_else(|| {
                    Error::config(format!(
                        "{}: schema name must be a string",
                        key.as_str().unwrap_or_default()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let index_policy = match raw.get("index") {
            Some(Value::String(policy)) => IndexPolicy::parse(Some(policy))?,
            Some(other) => {
                return Err(Error::config(format!(
                    "invalid indexing policy: {other:?}"
                )));
            }
            None => IndexPolicy::parse(None)?,
        };

        let tables = match raw.get("tables") {
            Some(tables) => parse_tables(tables, &format!("domain {name}: tables"))?,
            None => Vec::new(),
        };
        let tables = resolve_tables(tables)?;
        let mut raw = raw.clone();
        if let Some(Value::Mapping(raw_tables)) = raw.get_mut("tables") {
            backfill_view_keys(raw_tables, &tables);
        }

        Ok(Self {
            name: name.to_string(),
            raw,
            schema,
            auxiliary_schemas,
            index_policy,
            tables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Additional schemas declared with `schema.<suffix>` keys, in declaration order.
    pub fn auxiliary_schemas(&self) -> &[String] {
        &self.auxiliary_schemas
    }

    pub fn index_policy(&self) -> IndexPolicy {
        self.index_policy
    }

    /// Top-level tables, in declaration order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Fully qualified table name.
    pub fn fqn(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table.to_string(),
        }
    }

    /// Whether a `/`-separated key path exists in the domain mapping.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Value at a `/`-separated key path, `None` when any segment is absent.
    ///
    /// Paths are looked up in the domain mapping as declared, except that
    /// views keyed by their `group by` also expose the derived `primary_key`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/');
        let first = segments.next()?;
        let mut node = self.raw.get(first)?;
        for segment in segments {
            node = node.as_mapping()?.get(segment)?;
        }
        Some(node)
    }

    /// Depth-first search by name: the immediate level first, then every
    /// subtree in declaration order.
    pub fn find(&self, table: &str) -> Option<&TableDef> {
        find_in(&self.tables, table)
    }

    /// Like [`Domain::find`] but fails with a lookup error.
    pub fn require(&self, table: &str) -> Result<&TableDef> {
        self.find(table).ok_or_else(|| {
            Error::lookup(format!(
                "table {table} does not exist in domain {}",
                self.name
            ))
        })
    }

    /// Declared column names of a table.
    pub fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let definition = self.require(table)?;
        Ok(definition.column_names().map(str::to_string).collect())
    }

    /// Column names as they appear in the source data.
    pub fn list_source_columns(&self, table: &str) -> Result<Vec<String>> {
        let definition = self.require(table)?;
        if let Some(source_columns) = &definition.source_columns {
            return Ok(source_columns.clone());
        }
        Ok(definition
            .columns
            .iter()
            .map(|column| column.source_name().to_string())
            .collect())
    }

    pub fn has_hard_linked_children(&self, table: &str) -> Result<bool> {
        let definition = self.require(table)?;
        Ok(definition.children.iter().any(|child| child.hard_linked))
    }

    /// The table and all its descendants, plus the spillover table of every
    /// table with an `insert` validation policy. Each entry appears once.
    pub fn find_dependent(&self, table: &str) -> Result<Vec<Dependent>> {
        let definition = self.require(table)?;
        let mut result = Vec::new();
        self.collect_dependent(definition, &mut result)?;
        Ok(result)
    }

    fn collect_dependent(&self, definition: &TableDef, result: &mut Vec<Dependent>) -> Result<()> {
        push_unique(
            result,
            Dependent {
                table: self.fqn(&definition.name),
                kind: definition.kind(),
            },
        );
        for child in &definition.children {
            self.collect_dependent(child, result)?;
        }
        if let Some(spillover) = self.spillover_table(definition)? {
            push_unique(
                result,
                Dependent {
                    table: spillover,
                    kind: ObjectKind::Table,
                },
            );
        }
        Ok(())
    }

    /// `DROP ... IF EXISTS ... CASCADE` for a table and everything depending on it.
    pub fn drop_statements(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .find_dependent(table)?
            .into_iter()
            .map(|dependent| {
                format!(
                    "DROP {} IF EXISTS {} CASCADE;",
                    dependent.kind.keyword(),
                    dependent.table
                )
            })
            .collect())
    }

    /// Fully qualified name of the table receiving rows rejected by the
    /// validation trigger, if the table diverts them.
    pub fn spillover_table(&self, definition: &TableDef) -> Result<Option<String>> {
        let Some(policy) = &definition.invalid_records else {
            return Ok(None);
        };
        let ValidationAction::Insert(target) = &policy.action else {
            return Ok(None);
        };

        let schema = match &target.schema {
            Some(schema) => Some(self.dereference(schema)?),
            None => self.schema.clone(),
        };
        let table = match &target.table {
            Some(table) => self.dereference(table)?,
            None => definition.name.clone(),
        };
        Ok(Some(match schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table,
        }))
    }

    /// Resolves `$key` references to top-level keys of the domain.
    fn dereference(&self, value: &str) -> Result<String> {
        let Some(key) = value.strip_prefix('$') else {
            return Ok(value.to_string());
        };
        self.raw
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::config(format!(
                    "domain {} has no key {key} referenced by {value}",
                    self.name
                ))
            })
    }

    /// Compiles the domain into its DDL statement set.
    pub fn compile(&self, options: CompileOptions) -> Result<CompiledDomain> {
        Compiler::new(self, options).compile()
    }
}

fn find_in<'a>(tables: &'a [TableDef], name: &str) -> Option<&'a TableDef> {
    if let Some(table) = tables.iter().find(|table| table.name == name) {
        return Some(table);
    }
    tables
        .iter()
        .find_map(|table| find_in(&table.children, name))
}

fn push_unique(result: &mut Vec<Dependent>, dependent: Dependent) {
    match result.iter_mut().find(|entry| entry.table == dependent.table) {
        Some(entry) => entry.kind = dependent.kind,
        None => result.push(dependent),
    }
}

/// Produces the resolved table tree from the parsed one.
fn resolve_tables(tables: Vec<TableDef>) -> Result<Vec<TableDef>> {
    tables
        .into_iter()
        .map(|table| resolve_node(table, None))
        .collect()
}

fn resolve_node(mut table: TableDef, parent: Option<&TableDef>) -> Result<TableDef> {
    if let Some(parent) = parent {
        inherit_parent_key(&mut table, parent);
    }
    derive_view_key(&mut table);

    if table.children.is_empty() {
        return Ok(table);
    }
    if table.primary_key.is_none() {
        return Err(Error::config(format!(
            "parent table {} must define primary key",
            table.name
        )));
    }

    let children = std::mem::take(&mut table.children);
    let children = children
        .into_iter()
        .map(|child| resolve_node(child, Some(&table)))
        .collect::<Result<Vec<_>>>()?;
    table.children = children;
    Ok(table)
}

/// Copies the parent's primary key columns the child does not declare.
fn inherit_parent_key(table: &mut TableDef, parent: &TableDef) {
    let Some(parent_key) = &parent.primary_key else {
        return;
    };
    for column in &parent.columns {
        if parent_key.contains(&column.name) && table.column(&column.name).is_none() {
            table.columns.push(column.clone());
        }
    }
}

/// Writes the primary keys derived for grouped views back into the declared
/// tables mapping.
fn backfill_view_keys(raw_tables: &mut Mapping, tables: &[TableDef]) {
    for table in tables {
        let Some(Value::Mapping(definition)) = raw_tables.get_mut(table.name.as_str()) else {
            continue;
        };
        let is_grouped_view = table
            .create
            .as_ref()
            .is_some_and(|create| create.kind.is_view() && !create.group_by.is_empty());
        if is_grouped_view {
            if let Some(key) = &table.primary_key {
                let key = key.iter().cloned().map(Value::String).collect();
                definition.insert(Value::from("primary_key"), Value::Sequence(key));
            }
        }
        if let Some(Value::Mapping(children)) = definition.get_mut("children") {
            backfill_view_keys(children, &table.children);
        }
    }
}

/// A view grouped by some columns is keyed by them, mapped back to the view's
/// own column names where a column is sourced from a grouped column.
fn derive_view_key(table: &mut TableDef) {
    let Some(create) = &table.create else {
        return;
    };
    if !create.kind.is_view() || create.group_by.is_empty() {
        return;
    }

    let key = create
        .group_by
        .iter()
        .map(|grouped| {
            table
                .columns
                .iter()
                .find(|column| {
                    matches!(&column.kind, ColumnKind::Sourced(ColumnSource::Expression(source)) if source == grouped)
                })
                .map(|column| column.name.clone())
                .unwrap_or_else(|| grouped.clone())
        })
        .collect();
    table.primary_key = Some(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDICAID: &str = r#"
medicaid:
  schema: medicaid
  schema.audit: medicaid_audit
  index: explicit
  tables:
    beneficiaries:
      primary_key: [bene_id]
      columns:
        - bene_id
        - sex
      children:
        enrollments:
          primary_key: [bene_id, year]
          columns:
            - year: {type: INT}
          invalid.records:
            action: insert
            target:
              schema: $schema.audit
          children:
            eligibility:
              primary_key: [bene_id, year, month]
              columns:
                - month: {type: INT}
    summary:
      create:
        type: view
        from: medicaid.enrollments
        group by: [bene_id]
      columns:
        - beneficiary: {source: bene_id}
        - years: {source: "count(year)"}
"#;

    fn domain() -> Domain {
        Domain::from_str(MEDICAID, "medicaid").expect("domain parses")
    }

    #[test]
    fn finds_nested_tables() {
        let domain = domain();
        assert_eq!(domain.find("eligibility").unwrap().name, "eligibility");
        assert!(domain.find("missing").is_none());
    }

    #[test]
    fn children_inherit_parent_key_columns() {
        let domain = domain();
        assert_eq!(
            domain.list_columns("enrollments").unwrap(),
            vec!["year", "bene_id"]
        );
        assert_eq!(
            domain.list_columns("eligibility").unwrap(),
            vec!["month", "year", "bene_id"]
        );
    }

    #[test]
    fn view_key_is_derived_from_group_by() {
        let domain = domain();
        assert_eq!(
            domain.find("summary").unwrap().primary_key,
            Some(vec!["beneficiary".to_string()])
        );
    }

    #[test]
    fn derived_view_key_is_visible_to_path_lookup() {
        let domain = domain();
        let key = domain
            .get("tables/summary/primary_key")
            .and_then(Value::as_sequence)
            .expect("view key is back-filled");
        assert_eq!(key, &vec![Value::from("beneficiary")]);
        assert!(!domain.has("tables/beneficiaries/children/enrollments/create"));
    }

    #[test]
    fn non_string_index_policy_is_rejected() {
        for policy in ["true", "7", "[all]"] {
            let document = format!("d: {{index: {policy}, tables: {{t: {{columns: [a]}}}}}}");
            let err = Domain::from_str(&document, "d").unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{policy}");
        }
        let domain = Domain::from_str("d: {index: all, tables: {}}", "d").unwrap();
        assert_eq!(domain.index_policy(), IndexPolicy::All);
    }

    #[test]
    fn path_lookup_does_not_fail_on_missing_segments() {
        let domain = domain();
        assert!(domain.has("tables/beneficiaries/primary_key"));
        assert!(!domain.has("tables/nothing/columns"));
        assert_eq!(
            domain.get("schema.audit").and_then(Value::as_str),
            Some("medicaid_audit")
        );
        assert!(domain.get("index/deeper").is_none());
    }

    #[test]
    fn dependents_include_children_and_spillover() {
        let domain = domain();
        let tables: Vec<String> = domain
            .find_dependent("beneficiaries")
            .unwrap()
            .into_iter()
            .map(|dependent| dependent.table)
            .collect();
        assert_eq!(
            tables,
            vec![
                "medicaid.beneficiaries",
                "medicaid.enrollments",
                "medicaid.eligibility",
                "medicaid_audit.enrollments",
            ]
        );
    }

    #[test]
    fn drop_uses_object_kind() {
        let domain = domain();
        assert_eq!(
            domain.drop_statements("summary").unwrap(),
            vec!["DROP VIEW IF EXISTS medicaid.summary CASCADE;"]
        );
        assert!(matches!(
            domain.drop_statements("nothing"),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn parent_without_primary_key_fails_fast() {
        let err = Domain::from_str(
            "d: {tables: {p: {columns: [id], children: {c: {columns: [x]}}}}}",
            "d",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn schema_falls_back_to_root_key() {
        let domain = Domain::from_str("schema: shared\nd: {tables: {t: {columns: [a]}}}", "d")
            .unwrap();
        assert_eq!(domain.fqn("t"), "shared.t");
    }

    #[test]
    fn source_columns_follow_renames() {
        let domain = Domain::from_str(
            "d: {tables: {t: {columns: [a, {b: {source: raw_b}}, {c: {source: {name: raw_c}}}]}}}",
            "d",
        )
        .unwrap();
        assert_eq!(
            domain.list_source_columns("t").unwrap(),
            vec!["a", "raw_b", "raw_c"]
        );
    }
}
