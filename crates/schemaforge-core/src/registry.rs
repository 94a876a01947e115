//! Locating and authoring domain registry files.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const REGISTRY_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Finds the registry file describing domain `name`.
///
/// An explicit `registry` may be a YAML/JSON file or a directory holding
/// `<name>.yaml` (directly or under `yml/`). Otherwise every search path is
/// scanned recursively; several candidates are accepted only when their
/// contents are identical.
pub fn resolve_registry(
    name: &str,
    registry: Option<&Path>,
    search_paths: &[PathBuf],
) -> Result<PathBuf> {
    let file_name = format!("{name}.yaml");

    if let Some(registry) = registry {
        if is_registry_file(registry) {
            if !registry.is_file() {
                return Err(Error::config(format!(
                    "{} - is not a file",
                    registry.display()
                )));
            }
            return Ok(registry.to_path_buf());
        }
        if !registry.is_dir() {
            return Err(Error::config(format!(
                "{} - is not a valid registry path",
                registry.display()
            )));
        }
        for candidate in [registry.join(&file_name), registry.join("yml").join(&file_name)] {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        return Err(Error::config(format!(
            "file {file_name} not found in {}",
            registry.display()
        )));
    }

    let mut found = Vec::new();
    for root in search_paths {
        collect_named(root, &file_name, &mut found)?;
    }
    found.sort();
    found.dedup();
    debug!(domain = name, candidates = found.len(), "searched for domain registry");

    let Some(first) = found.first() else {
        return Err(Error::config(format!("file {file_name} not found")));
    };
    if found.len() > 1 {
        let reference = fs::read(first)?;
        for other in &found[1..] {
            if fs::read(other)? != reference {
                let listing = found
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(";");
                return Err(Error::config(format!("ambiguous files {listing}")));
            }
        }
        warn!(domain = name, path = %first.display(), "identical registry copies found, using the first");
    }
    Ok(first.clone())
}

fn is_registry_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            REGISTRY_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
}

fn collect_named(directory: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_named(&path, file_name, found)?;
        } else if entry.file_name() == file_name {
            found.push(path);
        }
    }
    Ok(())
}

/// Skeleton registry for a new project domain.
pub fn new_domain(name: &str) -> Value {
    let mut domain = Mapping::new();
    domain.insert("schema".into(), name.into());
    domain.insert("header".into(), true.into());
    domain.insert("quoting".into(), 0.into());
    domain.insert("index".into(), "unless excluded".into());
    domain.insert("tables".into(), Value::Mapping(Mapping::new()));

    let mut root = Mapping::new();
    root.insert(name.into(), Value::Mapping(domain));
    Value::Mapping(root)
}

/// Adds (or replaces) a table definition in a registry document.
///
/// `columns` use the regular column shapes: bare names or single-entry
/// mappings. Typically these come from introspecting a data file.
pub fn insert_table(
    document: &mut Value,
    domain: &str,
    table: &str,
    columns: Vec<Value>,
    primary_key: Vec<String>,
) -> Result<()> {
    let tables = document
        .get_mut(domain)
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| Error::config(format!("domain {domain} is not defined in the registry")))?
        .entry("tables".into())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Some(tables) = tables.as_mapping_mut() else {
        return Err(Error::config(format!("domain {domain}: tables must be a mapping")));
    };

    let mut definition = Mapping::new();
    definition.insert("columns".into(), Value::Sequence(columns));
    definition.insert(
        "primary_key".into(),
        Value::Sequence(primary_key.into_iter().map(Value::from).collect()),
    );
    tables.insert(table.into(), Value::Mapping(definition));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn explicit_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cms.yaml");
        fs::write(&file, "cms: {tables: {}}").unwrap();

        assert_eq!(resolve_registry("cms", Some(&file), &[]).unwrap(), file);
        assert_eq!(resolve_registry("cms", Some(dir.path()), &[]).unwrap(), file);
        assert!(matches!(
            resolve_registry("cms", Some(&dir.path().join("missing.yaml")), &[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn search_accepts_identical_copies_only() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a");
        let second = dir.path().join("b").join("nested");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("cms.yaml"), "cms: {tables: {}}").unwrap();
        fs::write(second.join("cms.yaml"), "cms: {tables: {}}").unwrap();

        let search = vec![dir.path().to_path_buf()];
        assert_eq!(
            resolve_registry("cms", None, &search).unwrap(),
            first.join("cms.yaml")
        );

        fs::write(second.join("cms.yaml"), "cms: {schema: other, tables: {}}").unwrap();
        let err = resolve_registry("cms", None, &search).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));

        assert!(matches!(
            resolve_registry("medicare", None, &search),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn introspected_table_becomes_part_of_the_domain() {
        let mut document = new_domain("project");
        insert_table(
            &mut document,
            "project",
            "survey_2020",
            vec![
                Value::from("zip"),
                serde_yaml::from_str("{FILE: {type: VARCHAR(128)}}").unwrap(),
                serde_yaml::from_str("{RECORD: {type: INT}}").unwrap(),
            ],
            vec!["FILE".to_string(), "RECORD".to_string()],
        )
        .unwrap();

        let domain = Domain::from_value(&document, "project").unwrap();
        assert_eq!(domain.schema(), Some("project"));
        assert_eq!(
            domain.list_columns("survey_2020").unwrap(),
            vec!["zip", "FILE", "RECORD"]
        );
        assert!(matches!(
            insert_table(&mut document, "nope", "t", Vec::new(), Vec::new()),
            Err(Error::Configuration(_))
        ));
    }
}
