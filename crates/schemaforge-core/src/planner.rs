//! Per-column planning: SQL column clauses and index requirements.

use crate::model::{ColumnDef, IndexDecl, IndexMethod, IndexPolicy, NamedIndex};

/// Classifies column names that deserve an index under the `selected` policy.
pub trait IndexHeuristic {
    /// The suggested index method, or `None` when the name is not indexable.
    fn classify(&self, column: &str) -> Option<IndexMethod>;
}

/// Default heuristic: key-like column names get a B-tree index.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamingConvention;

const INDEXED_NAMES: &[&str] = &[
    "year", "month", "date", "zip", "zipcode", "fips", "state", "county",
];
const INDEXED_SUFFIXES: &[&str] = &["_id", "_year", "_date", "_zip", "_fips", "_code"];

impl IndexHeuristic for NamingConvention {
    fn classify(&self, column: &str) -> Option<IndexMethod> {
        let name = column.to_ascii_lowercase();
        let indexable = INDEXED_NAMES.contains(&name.as_str())
            || INDEXED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix));
        indexable.then_some(IndexMethod::BTree)
    }
}

/// An index planned for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedIndex {
    pub ddl: String,
    /// Built together with the table instead of after data loading.
    pub onload: bool,
}

/// Index statement options shared by every index of a compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStyle {
    pub concurrently: bool,
    pub if_not_exists: bool,
}

/// `<name> <type>`, with the generation clause appended for generated columns.
pub fn column_spec(column: &ColumnDef) -> String {
    match column.generation() {
        Some(generation) => format!("{} {} {}", column.name, column.sql_type(), generation.clause),
        None => format!("{} {}", column.name, column.sql_type()),
    }
}

/// Whether a column is indexed under the given policy.
pub fn need_index(policy: IndexPolicy, column: &ColumnDef, heuristic: &dyn IndexHeuristic) -> bool {
    match (policy, &column.index) {
        (IndexPolicy::All, _) => true,
        (_, IndexDecl::Declared(_)) => true,
        (_, IndexDecl::Disabled) => false,
        (IndexPolicy::Explicit, IndexDecl::Undeclared) => false,
        (IndexPolicy::Selected, IndexDecl::Undeclared) => {
            heuristic.classify(&column.name).is_some()
        }
    }
}

/// Default index name for a table (given by its base name) and a column or index label.
pub fn index_name(table: &str, label: &str) -> String {
    format!("{}_{label}_idx", basename(table))
}

/// Plans the index of a single column of `table` (fully qualified).
pub fn column_index(
    table: &str,
    column: &ColumnDef,
    style: IndexStyle,
    heuristic: &dyn IndexHeuristic,
) -> PlannedIndex {
    let options = match &column.index {
        IndexDecl::Declared(options) => Some(options),
        _ => None,
    };

    let method = match options.and_then(|options| options.using.clone()) {
        Some(method) => method,
        None if column.is_array() => IndexMethod::Gin,
        None => heuristic
            .classify(&column.name)
            .unwrap_or(IndexMethod::BTree),
    };
    let name = options
        .and_then(|options| options.name.clone())
        .unwrap_or_else(|| index_name(table, &column.name));

    PlannedIndex {
        ddl: create_index(style, &name, table, &method, &column.name),
        onload: options.is_some_and(|options| options.required_before_loading_data),
    }
}

/// Statement for an explicitly named multi-column index.
pub fn named_index(table: &str, index: &NamedIndex, style: IndexStyle) -> String {
    let method = index.using.clone().unwrap_or(IndexMethod::BTree);
    create_index(
        style,
        &index_name(table, &index.name),
        table,
        &method,
        &index.columns.join(", "),
    )
}

fn create_index(
    style: IndexStyle,
    name: &str,
    table: &str,
    method: &IndexMethod,
    columns: &str,
) -> String {
    let mut ddl = String::from("CREATE INDEX");
    if style.concurrently {
        ddl.push_str(" CONCURRENTLY");
    }
    if style.if_not_exists {
        ddl.push_str(" IF NOT EXISTS");
    }
    ddl.push_str(&format!(" {name} ON {table} USING {method} ({columns});"));
    ddl
}

/// Table name without its schema.
pub fn basename(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnKind, Generation, IndexOptions};

    struct NoHeuristic;

    impl IndexHeuristic for NoHeuristic {
        fn classify(&self, _column: &str) -> Option<IndexMethod> {
            None
        }
    }

    fn declared(mut column: ColumnDef, options: IndexOptions) -> ColumnDef {
        column.index = IndexDecl::Declared(options);
        column
    }

    #[test]
    fn column_spec_defaults_to_varchar() {
        assert_eq!(column_spec(&ColumnDef::plain("id")), "id VARCHAR");
        assert_eq!(column_spec(&ColumnDef::typed("v", "INT")), "v INT");
    }

    #[test]
    fn column_spec_appends_generation_clause() {
        let mut column = ColumnDef::typed("total", "INT");
        column.kind = ColumnKind::Generated(Generation::from_expression("a + b"));
        assert_eq!(
            column_spec(&column),
            "total INT GENERATED ALWAYS AS (a + b) STORED"
        );
    }

    #[test]
    fn policy_decides_indexing() {
        let plain = ColumnDef::plain("note");
        let keyed = ColumnDef::plain("bene_id");
        let explicit = declared(ColumnDef::plain("note"), IndexOptions::default());
        let mut disabled = ColumnDef::plain("bene_id");
        disabled.index = IndexDecl::Disabled;

        let heuristic = NamingConvention;
        assert!(need_index(IndexPolicy::All, &plain, &heuristic));
        assert!(need_index(IndexPolicy::All, &disabled, &heuristic));
        assert!(!need_index(IndexPolicy::Explicit, &keyed, &heuristic));
        assert!(need_index(IndexPolicy::Explicit, &explicit, &heuristic));
        assert!(need_index(IndexPolicy::Selected, &keyed, &heuristic));
        assert!(!need_index(IndexPolicy::Selected, &plain, &heuristic));
        assert!(!need_index(IndexPolicy::Selected, &disabled, &heuristic));
        assert!(!need_index(IndexPolicy::Selected, &keyed, &NoHeuristic));
    }

    #[test]
    fn arrays_use_gin_and_scalars_btree() {
        let style = IndexStyle::default();
        let array = column_index("s.t", &ColumnDef::typed("codes", "VARCHAR[]"), style, &NoHeuristic);
        assert_eq!(array.ddl, "CREATE INDEX t_codes_idx ON s.t USING GIN (codes);");
        let scalar = column_index("s.t", &ColumnDef::typed("v", "INT"), style, &NoHeuristic);
        assert_eq!(scalar.ddl, "CREATE INDEX t_v_idx ON s.t USING BTREE (v);");
        assert!(!scalar.onload);
    }

    #[test]
    fn explicit_options_win() {
        let column = declared(
            ColumnDef::typed("codes", "VARCHAR[]"),
            IndexOptions {
                name: Some("codes_lookup".to_string()),
                using: Some(IndexMethod::Hash),
                required_before_loading_data: true,
            },
        );
        let style = IndexStyle {
            concurrently: true,
            if_not_exists: true,
        };
        let planned = column_index("s.t", &column, style, &NamingConvention);
        assert_eq!(
            planned.ddl,
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS codes_lookup ON s.t USING HASH (codes);"
        );
        assert!(planned.onload);
    }

    #[test]
    fn named_index_joins_columns() {
        let index = NamedIndex {
            name: "geo".to_string(),
            columns: vec!["state".to_string(), "county".to_string()],
            using: None,
        };
        assert_eq!(
            named_index("s.visits", &index, IndexStyle::default()),
            "CREATE INDEX visits_geo_idx ON s.visits USING BTREE (state, county);"
        );
    }

    #[test]
    fn naming_convention_skips_bare_id() {
        assert!(NamingConvention.classify("id").is_none());
        assert_eq!(NamingConvention.classify("Bene_ID"), Some(IndexMethod::BTree));
        assert_eq!(NamingConvention.classify("year"), Some(IndexMethod::BTree));
    }
}
