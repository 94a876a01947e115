//! Conversion of the raw domain document into the typed model.
//!
//! The document is walked once; every duck-typed shape (bare column names,
//! column objects, string or object sources, boolean/string/object index
//! declarations) is resolved here so later passes only see typed values.

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::model::{
    ColumnDef, ColumnKind, ColumnSource, CreateSpec, Generation, IndexDecl, IndexMethod,
    IndexOptions, InvalidRecords, NamedIndex, ObjectKind, SpilloverTarget, Subquery, TableDef,
    ValidationAction,
};

/// Parses the `tables` (or `children`) mapping of a domain.
pub(crate) fn parse_tables(value: &Value, context: &str) -> Result<Vec<TableDef>> {
    let Some(mapping) = value.as_mapping() else {
        return Err(Error::config(format!("{context}: expected a mapping of tables")));
    };

    mapping
        .iter()
        .map(|(name, definition)| {
            let name = key_string(name, context)?;
            parse_table(&name, definition)
        })
        .collect()
}

fn parse_table(name: &str, value: &Value) -> Result<TableDef> {
    let mut table = TableDef::new(name);
    let definition = match value {
        Value::Null => return Ok(table),
        Value::Mapping(mapping) => mapping,
        _ => {
            return Err(Error::config(format!(
                "table {name}: definition must be a mapping"
            )));
        }
    };

    if let Some(columns) = definition.get("columns") {
        let Some(columns) = columns.as_sequence() else {
            return Err(Error::config(format!("table {name}: columns must be a list")));
        };
        table.columns = columns
            .iter()
            .map(|column| parse_column(name, column))
            .collect::<Result<_>>()?;
    }

    if let Some(primary_key) = definition.get("primary_key") {
        table.primary_key = Some(string_list(primary_key, &format!("{name}.primary_key"))?);
    }

    if let Some(children) = definition.get("children") {
        table.children = parse_tables(children, &format!("table {name}: children"))?;
    }

    if let Some(create) = definition.get("create") {
        table.create = Some(parse_create(name, create)?);
    }

    let indices = definition
        .get("indices")
        .or_else(|| definition.get("indexes"));
    if let Some(indices) = indices {
        table.indices = parse_named_indices(name, indices)?;
    }

    if let Some(policy) = definition.get("invalid.records") {
        table.invalid_records = Some(parse_invalid_records(name, policy)?);
    }

    table.hard_linked = definition
        .get("hard_linked")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(source_columns) = definition.get("source_columns") {
        table.source_columns = Some(string_list(
            source_columns,
            &format!("{name}.source_columns"),
        )?);
    }

    Ok(table)
}

/// Parses a column given either as a bare name or as a single-entry mapping
/// `name: {type, source, index, identifier}`.
pub(crate) fn parse_column(table: &str, value: &Value) -> Result<ColumnDef> {
    match value {
        Value::String(name) => Ok(ColumnDef::plain(name.as_str())),
        Value::Mapping(mapping) => {
            let Some((name, definition)) = mapping.iter().next() else {
                return Err(Error::config(format!("table {table}: empty column definition")));
            };
            let name = key_string(name, table)?;
            match definition {
                Value::Null => Ok(ColumnDef::plain(name)),
                Value::Mapping(definition) => parse_column_body(table, name, definition),
                _ => Err(Error::config(format!(
                    "column {table}.{name}: definition must be a mapping"
                ))),
            }
        }
        _ => Err(Error::config(format!(
            "table {table}: column must be a name or a mapping"
        ))),
    }
}

fn parse_column_body(table: &str, name: String, definition: &Mapping) -> Result<ColumnDef> {
    let mut column = ColumnDef::plain(name);

    if let Some(data_type) = definition.get("type") {
        column.data_type = Some(scalar_string(data_type).ok_or_else(|| {
            Error::config(format!("column {table}.{}: type must be a string", column.name))
        })?);
    }

    if let Some(source) = definition.get("source") {
        column.kind = parse_source(table, &column.name, source)?;
    }

    if let Some(index) = definition.get("index") {
        column.index = parse_index_decl(index);
    }

    column.identifier = definition
        .get("identifier")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(column)
}

fn parse_source(table: &str, column: &str, source: &Value) -> Result<ColumnKind> {
    let source = match source {
        Value::String(expression) => {
            return Ok(ColumnKind::Sourced(ColumnSource::Expression(expression.clone())));
        }
        Value::Mapping(source) => source,
        _ => return Ok(ColumnKind::Sourced(ColumnSource::Malformed)),
    };

    let is_generated = source
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("generated"));
    if is_generated {
        let generation = if let Some(expression) = source.get("expression").and_then(Value::as_str)
        {
            if source.get("stored").is_some_and(|stored| stored.as_bool() != Some(true)) {
                return Err(Error::config(format!(
                    "generated column {table}.{column} must be stored"
                )));
            }
            Generation::from_expression(expression)
        } else if let Some(code) = source.get("code").and_then(Value::as_str) {
            Generation::from_code(code)
        } else {
            return Err(Error::config(format!(
                "generated column {table}.{column} must specify the compute code"
            )));
        };
        return Ok(ColumnKind::Generated(generation));
    }

    if let Some(select) = source.get("select").and_then(scalar_string) {
        let Some(from) = source.get("from").and_then(Value::as_str) else {
            return Ok(ColumnKind::Sourced(ColumnSource::Malformed));
        };
        return Ok(ColumnKind::Sourced(ColumnSource::Subquery(Subquery {
            select,
            from: from.to_string(),
            filter: source.get("where").and_then(scalar_string),
        })));
    }

    if let Some(name) = source.get("name").and_then(Value::as_str) {
        return Ok(ColumnKind::Sourced(ColumnSource::Renamed(name.to_string())));
    }

    Ok(ColumnKind::Sourced(ColumnSource::Malformed))
}

fn parse_index_decl(value: &Value) -> IndexDecl {
    match value {
        Value::Bool(false) => IndexDecl::Disabled,
        Value::String(name) => IndexDecl::Declared(IndexOptions {
            name: Some(name.clone()),
            ..IndexOptions::default()
        }),
        Value::Mapping(options) => IndexDecl::Declared(IndexOptions {
            name: options.get("name").and_then(Value::as_str).map(str::to_string),
            using: options
                .get("using")
                .and_then(Value::as_str)
                .map(IndexMethod::parse),
            required_before_loading_data: options
                .get("required_before_loading_data")
                .map(|flag| flag.as_bool().unwrap_or(true))
                .unwrap_or(false),
        }),
        _ => IndexDecl::Declared(IndexOptions::default()),
    }
}

fn parse_create(table: &str, value: &Value) -> Result<CreateSpec> {
    let Some(create) = value.as_mapping() else {
        return Err(Error::config(format!("table {table}: create must be a mapping")));
    };

    let kind = create
        .get("type")
        .and_then(Value::as_str)
        .map(ObjectKind::from_create_type)
        .unwrap_or(ObjectKind::Table);

    let group_by = match create.get("group by") {
        Some(group_by) => string_list(group_by, &format!("{table}.create.group by"))?,
        None => Vec::new(),
    };

    Ok(CreateSpec {
        kind,
        from: create.get("from").and_then(Value::as_str).map(str::to_string),
        select: create.get("select").and_then(scalar_string),
        group_by,
    })
}

fn parse_named_indices(table: &str, value: &Value) -> Result<Vec<NamedIndex>> {
    let Some(indices) = value.as_mapping() else {
        return Err(Error::config(format!("table {table}: indices must be a mapping")));
    };

    indices
        .iter()
        .map(|(name, definition)| {
            let name = key_string(name, table)?;
            let Some(definition) = definition.as_mapping() else {
                return Err(Error::config(format!(
                    "index {table}.{name}: definition must be a mapping"
                )));
            };
            let columns = definition
                .get("columns")
                .ok_or_else(|| Error::config(format!("index {table}.{name}: missing columns")))?;
            let using = definition
                .iter()
                .find(|(key, _)| key.as_str().is_some_and(|k| k.eq_ignore_ascii_case("using")))
                .and_then(|(_, method)| method.as_str())
                .map(IndexMethod::parse);
            Ok(NamedIndex {
                columns: string_list(columns, &format!("{table}.{name}.columns"))?,
                name,
                using,
            })
        })
        .collect()
}

fn parse_invalid_records(table: &str, value: &Value) -> Result<InvalidRecords> {
    let Some(policy) = value.as_mapping() else {
        return Err(Error::config(format!(
            "table {table}: invalid.records must be a mapping"
        )));
    };
    let action = policy
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::config(format!("table {table}: invalid.records requires action")))?;

    let action = match action.to_ascii_lowercase().as_str() {
        "insert" => {
            let Some(target) = policy.get("target").and_then(Value::as_mapping) else {
                return Err(Error::config(format!(
                    "table {table}: invalid.records action insert requires a target"
                )));
            };
            ValidationAction::Insert(SpilloverTarget {
                schema: target.get("schema").and_then(Value::as_str).map(str::to_string),
                table: target.get("table").and_then(Value::as_str).map(str::to_string),
            })
        }
        "ignore" => ValidationAction::Ignore,
        other => {
            return Err(Error::config(format!(
                "invalid action on validation for table {table}: {other}"
            )));
        }
    };

    Ok(InvalidRecords { action })
}

fn key_string(key: &Value, context: &str) -> Result<String> {
    scalar_string(key).ok_or_else(|| Error::config(format!("{context}: keys must be names")))
}

/// Strings, numbers and booleans rendered as text.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value, context: &str) -> Result<Vec<String>> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                scalar_string(item)
                    .ok_or_else(|| Error::config(format!("{context}: expected a list of names")))
            })
            .collect(),
        Value::String(single) => Ok(vec![single.clone()]),
        _ => Err(Error::config(format!("{context}: expected a list of names"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).expect("valid yaml")
    }

    #[test]
    fn bare_and_typed_columns() {
        let columns = parse_tables(
            &yaml(
                r#"
t:
  columns:
    - id
    - v:
        type: INT
        index: true
"#,
            ),
            "tables",
        )
        .unwrap()
        .remove(0)
        .columns;

        assert_eq!(columns[0], ColumnDef::plain("id"));
        assert_eq!(columns[1].sql_type(), "INT");
        assert_eq!(columns[1].index, IndexDecl::Declared(IndexOptions::default()));
    }

    #[test]
    fn resolves_source_shapes() {
        let column = parse_column(
            "t",
            &yaml("n: {source: {select: 'count(*)', from: visits, where: 'x > 1'}}"),
        )
        .unwrap();
        assert_eq!(
            column.kind,
            ColumnKind::Sourced(ColumnSource::Subquery(Subquery {
                select: "count(*)".to_string(),
                from: "visits".to_string(),
                filter: Some("x > 1".to_string()),
            }))
        );

        let column = parse_column("t", &yaml("n: {source: {name: raw_n}}")).unwrap();
        assert_eq!(column.source_name(), "raw_n");

        let column = parse_column("t", &yaml("n: {source: [1, 2]}")).unwrap();
        assert_eq!(column.kind, ColumnKind::Sourced(ColumnSource::Malformed));
    }

    #[test]
    fn generated_column_without_code_is_rejected() {
        let err = parse_column("t", &yaml("y: {type: INT, source: {type: generated}}")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn generated_column_must_be_stored() {
        let column = parse_column(
            "t",
            &yaml("total: {type: INT, source: {type: generated, expression: '(a) + (b)', stored: true}}"),
        )
        .unwrap();
        assert_eq!(
            column.generation().map(|generation| generation.clause.as_str()),
            Some("GENERATED ALWAYS AS ((a) + (b)) STORED")
        );

        let err = parse_column(
            "t",
            &yaml("total: {type: INT, source: {type: generated, expression: a + b, stored: false}}"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn index_declarations() {
        let column = parse_column(
            "t",
            &yaml("v: {index: {name: v_custom, using: hash, required_before_loading_data: true}}"),
        )
        .unwrap();
        assert_eq!(
            column.index,
            IndexDecl::Declared(IndexOptions {
                name: Some("v_custom".to_string()),
                using: Some(IndexMethod::Hash),
                required_before_loading_data: true,
            })
        );

        let column = parse_column("t", &yaml("v: {index: false}")).unwrap();
        assert_eq!(column.index, IndexDecl::Disabled);
    }

    #[test]
    fn unknown_validation_action_is_rejected() {
        let err = parse_tables(
            &yaml("t: {columns: [id], invalid.records: {action: quarantine}}"),
            "tables",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn indexes_alias_and_case_insensitive_using() {
        let table = parse_tables(
            &yaml("t: {columns: [a, b], indexes: {ab: {columns: [a, b], USING: gin}}}"),
            "tables",
        )
        .unwrap()
        .remove(0);
        assert_eq!(
            table.indices,
            vec![NamedIndex {
                name: "ab".to_string(),
                columns: vec!["a".to_string(), "b".to_string()],
                using: Some(IndexMethod::Gin),
            }]
        );
    }
}
