use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HeapStoreConfig {
    pub database: Option<String>,
    pub leak_directory: Option<String>,
}

impl HeapStoreConfig {
    /// Database and leak directory paths, relative entries joined onto `base`
    pub fn resolve(&self, base: &Path) -> (PathBuf, PathBuf) {
        let database = self
            .database
            .as_deref()
            .map(|p| base.join(p))
            .unwrap_or_else(|| default_database_path_in(base));
        let leak_directory = self
            .leak_directory
            .as_deref()
            .map(|p| base.join(p))
            .unwrap_or_else(|| default_leak_directory_in(base));
        (database, leak_directory)
    }
}

/// Reject a leak directory that contains the database: clearing it would delete the store
pub fn check_layout(database: &Path, leak_directory: &Path) -> Result<()> {
    let database_real = match (database.parent(), database.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| database.to_path_buf()),
        _ => database.to_path_buf(),
    };
    let leak_real = leak_directory
        .canonicalize()
        .unwrap_or_else(|_| leak_directory.to_path_buf());

    if database.starts_with(leak_directory) || database_real.starts_with(&leak_real) {
        return Err(Error::Config(format!(
            "leak directory {} contains the database {}",
            leak_directory.display(),
            database.display()
        )));
    }
    Ok(())
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("heapstore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".heapstore").join("heapstore.db")
}

pub fn default_leak_directory_in(base: &Path) -> PathBuf {
    base.join(".heapstore").join("leaks")
}

pub fn load_config(path: Option<&Path>) -> Result<Option<HeapStoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: HeapStoreConfig = toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &HeapStoreConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "config already exists at {} (use force to overwrite)",
            path.display()
        )));
    }

    let contents = toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
