//! Validation triggers that divert (or drop) rows violating key constraints
//! before PostgreSQL would reject them.

use crate::error::{Error, Result};
use crate::model::{ColumnDef, ValidationAction};

/// Reason codes recorded in the spillover table.
const REASON_PRIMARY_KEY: &str = "PRIMARY KEY";
const REASON_FOREIGN_KEY: &str = "FOREIGN KEY";
const REASON_DUPLICATE: &str = "DUPLICATE";

const CONDITION_INDENT: &str = "\n                ";

/// Columns appended to the owning table's columns in a spillover table.
pub const SPILLOVER_COLUMNS: [&str; 2] = [
    "REASON VARCHAR(16)",
    "recorded_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
];

/// The parent a validated table references.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentKey<'a> {
    /// Fully qualified parent table.
    pub table: &'a str,
    pub columns: &'a [String],
}

/// Everything the trigger synthesizer needs about the validated table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValidatedTable<'a> {
    /// Fully qualified table.
    pub table: &'a str,
    pub basename: &'a str,
    pub schema: Option<&'a str>,
    pub primary_key: &'a [String],
    pub columns: &'a [ColumnDef],
    pub parent: Option<ParentKey<'a>>,
    pub action: &'a ValidationAction,
    pub spillover: Option<&'a str>,
}

/// `CREATE TABLE` for the spillover table: the owning table's column clauses
/// without key constraints, plus the reason and timestamp columns.
pub(crate) fn spillover_table_ddl(header: &str, column_clauses: &[String]) -> String {
    let clauses: Vec<&str> = column_clauses
        .iter()
        .map(String::as_str)
        .chain(SPILLOVER_COLUMNS)
        .collect();
    format!("{header} (\n\t{}\n);", clauses.join(",\n\t"))
}

/// The validation function and the `BEFORE INSERT` trigger calling it.
///
/// A sloppy trigger is created with `OR REPLACE` so that re-running the DDL
/// against an existing table succeeds.
pub(crate) fn validation_ddl(target: &ValidatedTable<'_>, sloppy: bool) -> Result<[String; 2]> {
    let [action_dup, action_fk, action_pk] = audit_actions(target)?;

    let condition_pk = target
        .primary_key
        .iter()
        .map(|column| format!("NEW.{column} IS NULL"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let condition_dup = key_condition(target, target.primary_key)?;

    let schema_prefix = target
        .schema
        .map(|schema| format!("{schema}."))
        .unwrap_or_default();
    let tag_prefix = target
        .schema
        .map(|schema| format!("{schema}_"))
        .unwrap_or_default();
    let function = format!("{schema_prefix}validate_{}", target.basename);
    let tag = format!("{tag_prefix}{}_validation", target.basename);

    let mut body = String::new();
    body.push_str(&format!(
        "CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS ${tag}$\n-- Validate keys of {table}\n    BEGIN\n",
        table = target.table
    ));
    body.push_str(&branch(&format!("IF ({condition_pk}) THEN"), &action_pk));
    if let Some(parent) = target.parent {
        let condition_fk = key_condition(target, parent.columns)?;
        body.push_str(&branch(
            &format!(
                "IF NOT EXISTS (\n            SELECT FROM {} AS t\n            WHERE{CONDITION_INDENT}{condition_fk}\n        ) THEN",
                parent.table
            ),
            &action_fk,
        ));
    }
    body.push_str(&branch(
        &format!(
            "IF EXISTS (\n            SELECT FROM {} AS t\n            WHERE{CONDITION_INDENT}{condition_dup}\n        ) THEN",
            target.table
        ),
        &action_dup,
    ));
    body.push_str(&format!("        RETURN NEW;\n    END;\n${tag}$ LANGUAGE plpgsql;"));

    let create = if sloppy {
        "CREATE OR REPLACE TRIGGER"
    } else {
        "CREATE TRIGGER"
    };
    let trigger = format!(
        "{create} {tag} BEFORE INSERT ON {}\n    FOR EACH ROW EXECUTE FUNCTION {function}();",
        target.table
    );
    Ok([body, trigger])
}

fn branch(header: &str, action: &str) -> String {
    let mut branch = format!("        {header}\n");
    if !action.is_empty() {
        branch.push_str(&format!("            {action}\n"));
    }
    branch.push_str("            RETURN NULL;\n        END IF;\n");
    branch
}

/// Audit statements in the order duplicate, foreign key, primary key.
fn audit_actions(target: &ValidatedTable<'_>) -> Result<[String; 3]> {
    match target.action {
        ValidationAction::Ignore => Ok([String::new(), String::new(), String::new()]),
        ValidationAction::Insert(_) => {
            let Some(spillover) = target.spillover else {
                return Err(Error::config(format!(
                    "table {} diverts invalid records but has no spillover table",
                    target.table
                )));
            };
            let columns: Vec<&str> = target
                .columns
                .iter()
                .filter(|column| !column.is_generated())
                .map(|column| column.name.as_str())
                .collect();
            let values: Vec<String> = columns.iter().map(|column| format!("NEW.{column}")).collect();
            let insert = |reason: &str| {
                format!(
                    "INSERT INTO {spillover} ({}, REASON) VALUES ({}, '{reason}');",
                    columns.join(", "),
                    values.join(", ")
                )
            };
            Ok([
                insert(REASON_DUPLICATE),
                insert(REASON_FOREIGN_KEY),
                insert(REASON_PRIMARY_KEY),
            ])
        }
    }
}

/// `AND`-joined comparison of the new row with an existing row `t` on `key`.
///
/// Generated columns have no value on `NEW` yet, so their expression is
/// evaluated over the new row instead.
fn key_condition(target: &ValidatedTable<'_>, key: &[String]) -> Result<String> {
    let comparisons = key
        .iter()
        .map(|name| {
            let column = target
                .columns
                .iter()
                .find(|column| &column.name == name)
                .ok_or_else(|| {
                    Error::config(format!(
                        "key column {name} is not declared in table {}",
                        target.table
                    ))
                })?;
            match column.generation() {
                Some(generation) => {
                    let expression = generation.expression.as_deref().ok_or_else(|| {
                        Error::config(format!(
                            "cannot derive the expression of generated key column {}.{name}",
                            target.table
                        ))
                    })?;
                    Ok(format!(
                        "{} = t.{name}",
                        qualify(expression, target.columns, "NEW")
                    ))
                }
                None => Ok(format!("NEW.{name} = t.{name}")),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(comparisons.join(&format!("{CONDITION_INDENT}AND ")))
}

/// Prefixes every unqualified reference to one of `columns` with `qualifier.`.
/// String literals are left untouched.
pub fn qualify(expression: &str, columns: &[ColumnDef], qualifier: &str) -> String {
    let mut result = String::with_capacity(expression.len() + 16);
    let mut chars = expression.char_indices().peekable();
    let mut previous: Option<char> = None;
    let mut in_literal = false;

    while let Some((start, ch)) = chars.next() {
        if ch == '\'' {
            in_literal = !in_literal;
        }
        let starts_word = !in_literal
            && (ch.is_ascii_alphabetic() || ch == '_')
            && !previous.is_some_and(|p| p.is_ascii_alphanumeric() || p == '_');
        if !starts_word {
            result.push(ch);
            previous = Some(ch);
            continue;
        }

        let mut end = start + ch.len_utf8();
        while let Some(&(pos, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                end = pos + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let word = &expression[start..end];
        if previous != Some('.') && columns.iter().any(|column| column.name == word) {
            result.push_str(qualifier);
            result.push('.');
        }
        result.push_str(word);
        previous = word.chars().last();
    }
    result
}
