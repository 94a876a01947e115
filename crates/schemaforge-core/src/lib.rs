//! Schema compiler for declarative data domains.
//!
//! A domain document describes schemas, nested tables, views, indexing rules
//! and validation policies. This crate loads it into a typed model and
//! compiles it into the ordered DDL statements that provision the domain in
//! PostgreSQL. Compilation is pure: no I/O happens once the domain is loaded.

mod compiler;
pub mod domain;
pub mod error;
pub mod model;
mod parse;
pub mod planner;
pub mod registry;
pub mod statements;
mod validation;
pub mod view;

pub use compiler::{CompileOptions, Compiler};
pub use domain::{Dependent, Domain};
pub use error::{Error, Result};
pub use model::{
    ColumnDef, ColumnKind, ColumnSource, CreateSpec, Generation, IndexDecl, IndexMethod,
    IndexOptions, IndexPolicy, InvalidRecords, NamedIndex, ObjectKind, SpilloverTarget, Subquery,
    TableDef, ValidationAction,
};
pub use planner::{IndexHeuristic, NamingConvention};
pub use registry::{insert_table, new_domain, resolve_registry};
pub use statements::{CompiledDomain, TableStatements};
pub use validation::{SPILLOVER_COLUMNS, qualify};
