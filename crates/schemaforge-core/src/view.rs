//! `CREATE VIEW` synthesis, including correlated subqueries for columns
//! sourced from other tables of the domain.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::model::{ColumnDef, ColumnKind, ColumnSource, ObjectKind, Subquery, TableDef};

const IDENTIFIERS_PLACEHOLDER: &str = "{identifiers}";

static FIRST_ARGUMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((.*?)[),]").ok());

/// The `CREATE VIEW` (or `CREATE MATERIALIZED VIEW`) statement of a view node.
pub(crate) fn create_view(
    domain: &Domain,
    table: &TableDef,
    fqn: &str,
    sloppy: bool,
) -> Result<String> {
    let Some(create) = &table.create else {
        return Err(Error::config(format!("{fqn} is not declared as a view")));
    };
    let Some(source) = &create.from else {
        return Err(Error::config(format!("view {fqn} must declare from")));
    };

    let expressions = table
        .columns
        .iter()
        .map(|column| view_column(domain, table, fqn, column))
        .collect::<Result<Vec<_>>>()?;

    let object = match (create.kind, sloppy) {
        (ObjectKind::MaterializedView, true) => "MATERIALIZED VIEW IF NOT EXISTS",
        (ObjectKind::MaterializedView, false) => "MATERIALIZED VIEW",
        (_, true) => "OR REPLACE VIEW",
        (_, false) => "VIEW",
    };

    let mut ddl = format!(
        "CREATE {object} {fqn} AS\nSELECT\n\t{}\nFROM {source}",
        expressions.join(",\n\t")
    );
    if create.group_by.is_empty() {
        ddl.push(';');
    } else {
        let not_null = create
            .group_by
            .iter()
            .map(|column| format!("{column} IS NOT NULL"))
            .collect::<Vec<_>>()
            .join(" AND ");
        ddl.push_str(&format!(
            "\nWHERE {not_null}\nGROUP BY {};",
            create.group_by.join(", ")
        ));
    }
    Ok(ddl)
}

fn view_column(domain: &Domain, table: &TableDef, fqn: &str, column: &ColumnDef) -> Result<String> {
    let sql = match &column.kind {
        ColumnKind::Plain => return Ok(column.name.clone()),
        ColumnKind::Sourced(ColumnSource::Expression(expression)) => expression.clone(),
        ColumnKind::Sourced(ColumnSource::Subquery(subquery)) => {
            joined_subquery(domain, table, subquery)?
        }
        _ => {
            return Err(Error::Syntax(format!(
                "invalid source definition for column {fqn}.{}",
                column.name
            )));
        }
    };

    let sql = sql.trim().replace('\n', "\n\t\t");
    let sql = match sql.to_ascii_lowercase().find(IDENTIFIERS_PLACEHOLDER) {
        Some(_) => {
            let identifiers = format!("({})", list_identifiers(table).join(", "));
            replace_placeholder(&sql, &identifiers)
        }
        None => sql,
    };
    Ok(format!("{sql} AS {}", column.name))
}

/// Replaces every case-insensitive occurrence of `{identifiers}`.
fn replace_placeholder(sql: &str, replacement: &str) -> String {
    let lower = sql.to_ascii_lowercase();
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (pos, _) in lower.match_indices(IDENTIFIERS_PLACEHOLDER) {
        result.push_str(&sql[last..pos]);
        result.push_str(replacement);
        last = pos + IDENTIFIERS_PLACEHOLDER.len();
    }
    result.push_str(&sql[last..]);
    result
}

/// A parenthesized subquery against the joined table, correlated on the
/// owning view's `group by` columns.
fn joined_subquery(domain: &Domain, table: &TableDef, subquery: &Subquery) -> Result<String> {
    let joined = domain.fqn(&subquery.from);
    let create = table.create.as_ref();
    let source = create.and_then(|create| create.from.as_deref()).ok_or_else(|| {
        Error::config(format!("view {} must declare from", table.name))
    })?;

    let mut conditions = Vec::new();
    for grouped in create.map(|create| create.group_by.as_slice()).unwrap_or_default() {
        let mapped = find_mapped_column_name(domain, grouped, &subquery.from)?;
        conditions.push(format!("{source}.{grouped} = {joined}.{mapped}"));
    }
    if let Some(filter) = &subquery.filter {
        conditions.push(filter.clone());
    }

    let mut sql = format!("(\nSELECT\n\t{}\nFROM {joined}", subquery.select);
    if !conditions.is_empty() {
        sql.push_str(&format!("\nWHERE {}", conditions.join("\n\tAND ")));
    }
    sql.push_str("\n)");
    Ok(sql)
}

/// Name of the column of `table` whose source is `column`, or `column` itself.
pub fn find_mapped_column_name(domain: &Domain, column: &str, table: &str) -> Result<String> {
    let definition = domain.require(table)?;
    Ok(definition
        .columns
        .iter()
        .find(|candidate| {
            matches!(&candidate.kind, ColumnKind::Sourced(ColumnSource::Expression(source)) if source == column)
        })
        .map(|candidate| candidate.name.clone())
        .unwrap_or_else(|| column.to_string()))
}

/// The raw columns behind a view's identifier columns.
///
/// For a sourced identifier the first argument of its expression is used,
/// e.g. `bene_id` for `COUNT(DISTINCT bene_id)`.
pub fn list_identifiers(table: &TableDef) -> Vec<String> {
    table
        .columns
        .iter()
        .filter(|column| column.identifier)
        .map(|column| match &column.kind {
            ColumnKind::Sourced(ColumnSource::Expression(source)) => {
                first_argument(source).unwrap_or_else(|| source.clone())
            }
            _ => column.name.clone(),
        })
        .collect()
}

fn first_argument(expression: &str) -> Option<String> {
    let captures = FIRST_ARGUMENT.as_ref()?.captures(expression)?;
    let argument = captures.get(1)?.as_str().to_lowercase();
    let argument = argument.replace("distinct", "").trim().to_string();
    if argument.is_empty() {
        None
    } else {
        Some(argument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = r#"
cms:
  schema: cms
  tables:
    ps:
      columns:
        - bene_id
        - year: {type: INT}
        - state
    visits:
      columns:
        - beneficiary: {source: bene_id}
        - cost: {type: NUMERIC}
    beneficiaries:
      create:
        type: view
        from: cms.ps
        group by: [bene_id]
      columns:
        - bene_id: {source: "MAX(DISTINCT bene_id)", identifier: true}
        - states: {source: "ARRAY_AGG(DISTINCT state)"}
        - key: {source: "MD5({Identifiers}::text)"}
        - total_cost:
            source:
              select: SUM(cost)
              from: visits
              where: cost > 0
"#;

    fn domain() -> Domain {
        Domain::from_str(DOMAIN, "cms").expect("domain parses")
    }

    #[test]
    fn builds_grouped_view() {
        let domain = domain();
        let table = domain.find("beneficiaries").unwrap();
        let ddl = create_view(&domain, table, "cms.beneficiaries", false).unwrap();
        let expected = "CREATE VIEW cms.beneficiaries AS\n\
SELECT\n\
\tMAX(DISTINCT bene_id) AS bene_id,\n\
\tARRAY_AGG(DISTINCT state) AS states,\n\
\tMD5((bene_id)::text) AS key,\n\
\t(\n\
\t\tSELECT\n\
\t\t\tSUM(cost)\n\
\t\tFROM cms.visits\n\
\t\tWHERE cms.ps.bene_id = cms.visits.beneficiary\n\
\t\t\tAND cost > 0\n\
\t\t) AS total_cost\n\
FROM cms.ps\n\
WHERE bene_id IS NOT NULL\n\
GROUP BY bene_id;";
        assert_eq!(ddl, expected);
    }

    #[test]
    fn sloppy_view_is_replaced() {
        let domain = domain();
        let table = domain.find("beneficiaries").unwrap();
        let ddl = create_view(&domain, table, "cms.beneficiaries", true).unwrap();
        assert!(ddl.starts_with("CREATE OR REPLACE VIEW cms.beneficiaries AS"));
    }

    #[test]
    fn maps_joined_column_names_through_sources() {
        let domain = domain();
        assert_eq!(
            find_mapped_column_name(&domain, "bene_id", "visits").unwrap(),
            "beneficiary"
        );
        assert_eq!(
            find_mapped_column_name(&domain, "year", "visits").unwrap(),
            "year"
        );
        assert!(matches!(
            find_mapped_column_name(&domain, "year", "nowhere"),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn identifiers_strip_distinct() {
        let domain = domain();
        let table = domain.find("beneficiaries").unwrap();
        assert_eq!(list_identifiers(table), vec!["bene_id"]);
    }

    #[test]
    fn identifier_takes_first_call_argument() {
        let mut table = TableDef::new("v");
        for (name, source) in [("a", "max(state, zip)"), ("b", "COUNT(DISTINCT year)"), ("c", "raw")] {
            let mut column = ColumnDef::plain(name);
            column.kind = ColumnKind::Sourced(ColumnSource::Expression(source.to_string()));
            column.identifier = true;
            table.columns.push(column);
        }
        assert_eq!(list_identifiers(&table), vec!["state", "year", "raw"]);
    }

    #[test]
    fn renamed_source_in_view_is_a_syntax_error() {
        let domain = Domain::from_str(
            "d: {tables: {v: {create: {type: view, from: t}, columns: [{a: {source: {name: b}}}]}}}",
            "d",
        )
        .unwrap();
        let table = domain.find("v").unwrap();
        assert!(matches!(
            create_view(&domain, table, "v", false),
            Err(Error::Syntax(_))
        ));
    }
}
