use std::fmt;

use crate::error::{Error, Result};

/// SQL type assumed for columns that do not declare one.
pub const DEFAULT_COLUMN_TYPE: &str = "VARCHAR";

/// Domain-wide rule deciding which columns get an index without an explicit
/// declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPolicy {
    /// Explicitly declared columns plus columns recognised by the naming heuristic.
    Selected,
    /// Only explicitly declared columns.
    Explicit,
    /// Every column.
    All,
}

impl IndexPolicy {
    /// Parse the `index` key of a domain. An absent key means `selected`.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value {
            None | Some("selected") => Ok(IndexPolicy::Selected),
            Some("explicit") => Ok(IndexPolicy::Explicit),
            Some("all") | Some("unless excluded") => Ok(IndexPolicy::All),
            Some(other) => Err(Error::config(format!("invalid indexing policy: {other}"))),
        }
    }
}

/// Index access method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMethod {
    BTree,
    Gin,
    Hash,
    Other(String),
}

impl IndexMethod {
    /// Parse a `using` value; known methods are matched case-insensitively.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "btree" => IndexMethod::BTree,
            "gin" => IndexMethod::Gin,
            "hash" => IndexMethod::Hash,
            _ => IndexMethod::Other(value.trim().to_string()),
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexMethod::BTree => f.write_str("BTREE"),
            IndexMethod::Gin => f.write_str("GIN"),
            IndexMethod::Hash => f.write_str("HASH"),
            IndexMethod::Other(method) => f.write_str(method),
        }
    }
}

/// Kind of database object a table node is created as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    View,
    MaterializedView,
    /// A table whose initial contents are copied from another table or view.
    TableFromView,
}

impl ObjectKind {
    /// Classify the `create.type` value of a table definition.
    pub fn from_create_type(value: &str) -> Self {
        let value = value.to_ascii_lowercase();
        if value.contains("view") {
            if value.contains("materialized") {
                ObjectKind::MaterializedView
            } else {
                ObjectKind::View
            }
        } else if value.contains("table") {
            ObjectKind::TableFromView
        } else {
            ObjectKind::Table
        }
    }

    /// Keyword used in `CREATE`/`DROP` statements.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table | ObjectKind::TableFromView => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::MaterializedView => "MATERIALIZED VIEW",
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, ObjectKind::View | ObjectKind::MaterializedView)
    }
}

/// A table (or view) node of the domain tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<Vec<String>>,
    /// Child tables, in declaration order. Each child references this table's primary key.
    pub children: Vec<TableDef>,
    pub create: Option<CreateSpec>,
    /// Explicitly named multi-column indices.
    pub indices: Vec<NamedIndex>,
    pub invalid_records: Option<InvalidRecords>,
    pub hard_linked: bool,
    pub source_columns: Option<Vec<String>>,
}

impl TableDef {
    /// Creates an empty plain table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            children: Vec::new(),
            create: None,
            indices: Vec::new(),
            invalid_records: None,
            hard_linked: false,
            source_columns: None,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.create
            .as_ref()
            .map(|create| create.kind)
            .unwrap_or(ObjectKind::Table)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

/// The `create` block of a table declared as a view or as a table built from a view.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSpec {
    pub kind: ObjectKind,
    pub from: Option<String>,
    pub select: Option<String>,
    pub group_by: Vec<String>,
}

/// An entry of the `indices` (or `indexes`) mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub using: Option<IndexMethod>,
}

/// What happens to rows rejected by the validation trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationAction {
    /// Divert rejected rows into a spillover table.
    Insert(SpilloverTarget),
    /// Silently drop rejected rows.
    Ignore,
}

/// Location of a spillover table. Either part may be a `$key` reference to a
/// top-level key of the domain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpilloverTarget {
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// The `invalid.records` policy of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidRecords {
    pub action: ValidationAction,
}

/// A column of a table or view.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    /// Declared SQL type, `None` when the column relies on [`DEFAULT_COLUMN_TYPE`].
    pub data_type: Option<String>,
    pub kind: ColumnKind,
    pub index: IndexDecl,
    /// Marks columns that make up the natural key of a view (`{identifiers}`).
    pub identifier: bool,
}

impl ColumnDef {
    /// A bare column name with the default type.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            kind: ColumnKind::Plain,
            index: IndexDecl::Undeclared,
            identifier: false,
        }
    }

    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            data_type: Some(data_type.into()),
            ..Self::plain(name)
        }
    }

    pub fn sql_type(&self) -> &str {
        self.data_type.as_deref().unwrap_or(DEFAULT_COLUMN_TYPE)
    }

    /// Array types are declared with a trailing `[]`.
    pub fn is_array(&self) -> bool {
        self.data_type
            .as_deref()
            .is_some_and(|data_type| data_type.trim_end().ends_with(']'))
    }

    pub fn generation(&self) -> Option<&Generation> {
        match &self.kind {
            ColumnKind::Generated(generation) => Some(generation),
            _ => None,
        }
    }

    pub fn is_generated(&self) -> bool {
        self.generation().is_some()
    }

    /// Name of the column in the source data: a string source, the `name` of
    /// an object source, or the column's own name.
    pub fn source_name(&self) -> &str {
        match &self.kind {
            ColumnKind::Sourced(ColumnSource::Expression(source)) => source,
            ColumnKind::Sourced(ColumnSource::Renamed(source)) => source,
            _ => &self.name,
        }
    }
}

/// Shape of a column declaration, resolved once when the domain is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    /// A bare name or a typed column without a source.
    Plain,
    Sourced(ColumnSource),
    Generated(Generation),
}

/// The `source` of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// A SQL fragment used verbatim (views) or a source column name (loaders).
    Expression(String),
    /// `{name: ...}`: the column is read from a differently named source column.
    Renamed(String),
    /// `{select, from, where}`: a correlated subquery against another table.
    Subquery(Subquery),
    /// Any other shape; rejected when a view needs to expand it.
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub select: String,
    pub from: String,
    pub filter: Option<String>,
}

/// A generated (computed) column.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Clause appended after the column type, e.g. `GENERATED ALWAYS AS (a + b) STORED`.
    pub clause: String,
    /// The computed expression, when it could be determined.
    pub expression: Option<String>,
}

impl Generation {
    /// Builds a stored generation from a bare expression.
    pub fn from_expression(expression: &str) -> Self {
        let expression = parenthesize(expression.trim());
        Self {
            clause: format!("GENERATED ALWAYS AS {expression} STORED"),
            expression: Some(expression),
        }
    }

    /// Builds a generation from a raw `... AS <expr> STORED` clause.
    ///
    /// Clauses of any other shape are kept verbatim without an expression.
    pub fn from_code(code: &str) -> Self {
        Self {
            clause: code.trim().to_string(),
            expression: extract_expression(code),
        }
    }
}

fn parenthesize(expression: &str) -> String {
    if is_wrapped(expression) {
        expression.to_string()
    } else {
        format!("({expression})")
    }
}

/// Whether the opening parenthesis at the start closes at the very end.
fn is_wrapped(expression: &str) -> bool {
    if !expression.starts_with('(') {
        return false;
    }
    let mut depth = 0usize;
    for (pos, c) in expression.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return pos + 1 == expression.len();
                }
            }
            _ => {}
        }
    }
    false
}

fn extract_expression(code: &str) -> Option<String> {
    let lower = code.to_ascii_lowercase();
    let start = find_keyword(&lower, "as")? + "as".len();
    let end = lower.rfind("stored")?;
    if end <= start {
        return None;
    }
    let expression = code[start..end].trim();
    if expression.is_empty() {
        None
    } else {
        Some(expression.to_string())
    }
}

/// Position of `keyword` as a whole word.
fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    haystack.match_indices(keyword).map(|(pos, _)| pos).find(|&pos| {
        let before = pos == 0 || !is_word(bytes[pos - 1]);
        let end = pos + keyword.len();
        let after = end >= bytes.len() || !is_word(bytes[end]);
        before && after
    })
}

/// Index declaration of a single column.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum IndexDecl {
    /// No `index` key.
    #[default]
    Undeclared,
    /// `index: false`.
    Disabled,
    Declared(IndexOptions),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub using: Option<IndexMethod>,
    /// Build the index together with the table, before any data is loaded.
    pub required_before_loading_data: bool,
}
