use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Serialises `value` as YAML and writes it atomically.
pub fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let data = serde_yaml::to_string(value).map_err(io::Error::other)?;
    write_bytes_atomic(path, data.as_bytes())
}

/// Writes through a sibling temporary file renamed into place, so readers
/// never observe a partially written registry.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = parent {
        sync_dir(parent)?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "invalid path for atomic write")
    })?;
    Ok(path.with_file_name(format!("{}.tmp", file_name.to_string_lossy())))
}

fn sync_dir(path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(path)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_yaml_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry").join("cms.yaml");
        write_yaml_atomic(&path, &schemaforge_core::new_domain("cms")).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("index: unless excluded"));
        assert!(!dir.path().join("registry").join("cms.yaml.tmp").exists());
    }
}
