//! Index → resource mapping.
//!
//! The dispatcher only ever calls [`IndexMapping::lookup`]. The table itself
//! is built from the `[mapping]` config section and edited through the
//! control context, never from the poll thread.

use plcshow_common::config::{BridgeConfig, ConfigError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Opaque reference to a presentable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(PathBuf);

impl Locator {
    /// Wrap a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Underlying path.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Consume into the underlying path.
    pub fn into_path(self) -> PathBuf {
        self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Read-only view used by the dispatcher.
pub trait IndexMapping {
    /// Resource for `index`, if one is mapped and usable.
    fn lookup(&self, index: u8) -> Option<Locator>;
}

/// Mapping edit failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The file to map does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Nothing is mapped at this index.
    #[error("Index {0} is not mapped")]
    NotMapped(u8),
}

/// Mapping table backed by files on disk.
///
/// `lookup` only returns locators whose file exists at the time of the call.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    /// Base for relative paths
    base_dir: Option<PathBuf>,
    /// Index to (possibly relative) path
    entries: BTreeMap<u8, PathBuf>,
}

impl MappingTable {
    /// Empty table resolving relative paths against `base_dir`.
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            entries: BTreeMap::new(),
        }
    }

    /// Build from the `[mapping]` section of a validated configuration.
    ///
    /// Entries whose file is missing are kept; `lookup` skips them until the
    /// file appears.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let mut table = Self::new(config.presentation.slides_dir.clone());
        for (index, path) in config.mapping_entries()? {
            table.entries.insert(index, path);
        }
        Ok(table)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Map `index` to `path`, replacing any previous entry.
    ///
    /// # Errors
    /// `MappingError::FileNotFound` if the resolved file does not exist.
    pub fn insert(&mut self, index: u8, path: impl Into<PathBuf>) -> Result<Option<PathBuf>, MappingError> {
        let path = path.into();
        let resolved = self.resolve(&path);
        if !resolved.is_file() {
            return Err(MappingError::FileNotFound(resolved));
        }
        Ok(self.entries.insert(index, path))
    }

    /// Remove the entry at `index`.
    pub fn remove(&mut self, index: u8) -> Result<PathBuf, MappingError> {
        self.entries
            .remove(&index)
            .ok_or(MappingError::NotMapped(index))
    }

    /// Entries in index order, with resolved paths.
    pub fn entries(&self) -> impl Iterator<Item = (u8, PathBuf)> + '_ {
        self.entries
            .iter()
            .map(|(index, path)| (*index, self.resolve(path)))
    }

    /// Write the table to the `[mapping]` section of the config file at
    /// `path`, with paths as they were entered.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let entries = self
            .entries
            .iter()
            .map(|(index, file)| (*index, file.as_path()));
        BridgeConfig::store_mapping(path, entries)
    }

    /// Number of mapped indices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IndexMapping for MappingTable {
    fn lookup(&self, index: u8) -> Option<Locator> {
        let path = self.resolve(self.entries.get(&index)?);
        path.is_file().then(|| Locator::new(path))
    }
}

impl IndexMapping for BTreeMap<u8, Locator> {
    fn lookup(&self, index: u8) -> Option<Locator> {
        self.get(&index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn slides() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.pptx"), b"a").unwrap();
        fs::write(dir.path().join("b.pptx"), b"b").unwrap();
        dir
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let dir = slides();
        let mut table = MappingTable::new(Some(dir.path().to_path_buf()));
        table.insert(5, "a.pptx").unwrap();
        assert_eq!(
            table.lookup(5),
            Some(Locator::new(dir.path().join("a.pptx")))
        );
        assert_eq!(table.lookup(6), None);
    }

    #[test]
    fn test_insert_missing_file_rejected() {
        let dir = slides();
        let mut table = MappingTable::new(Some(dir.path().to_path_buf()));
        assert!(matches!(
            table.insert(1, "missing.pptx"),
            Err(MappingError::FileNotFound(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_skips_deleted_file() {
        let dir = slides();
        let mut table = MappingTable::new(None);
        let path = dir.path().join("b.pptx");
        table.insert(9, &path).unwrap();
        assert!(table.lookup(9).is_some());
        fs::remove_file(&path).unwrap();
        assert_eq!(table.lookup(9), None);
    }

    #[test]
    fn test_remove() {
        let dir = slides();
        let mut table = MappingTable::new(Some(dir.path().to_path_buf()));
        table.insert(0, "a.pptx").unwrap();
        assert_eq!(table.remove(0), Ok(PathBuf::from("a.pptx")));
        assert_eq!(table.remove(0), Err(MappingError::NotMapped(0)));
    }

    #[test]
    fn test_from_config_keeps_missing_entries() {
        let dir = slides();
        let mut config = BridgeConfig::default();
        config.presentation.slides_dir = Some(dir.path().to_path_buf());
        config.mapping.insert("255".into(), PathBuf::from("a.pptx"));
        config.mapping.insert("7".into(), PathBuf::from("gone.pptx"));

        let table = MappingTable::from_config(&config).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.lookup(255).is_some());
        assert!(table.lookup(7).is_none());
        let indices: Vec<u8> = table.entries().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![7, 255]);
    }

    #[test]
    fn test_edits_survive_reload() {
        let dir = slides();
        let config_path = dir.path().join("plcshow.toml");
        let (mut config, _) = BridgeConfig::load_or_create(&config_path).unwrap();
        config.presentation.slides_dir = Some(dir.path().to_path_buf());
        config.mapping.insert("1".into(), PathBuf::from("a.pptx"));
        std::fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        let mut table = MappingTable::from_config(&config).unwrap();
        table.insert(4, "b.pptx").unwrap();
        table.remove(1).unwrap();
        table.save(&config_path).unwrap();

        let (reloaded, created) = BridgeConfig::load_or_create(&config_path).unwrap();
        assert!(!created);
        let table = MappingTable::from_config(&reloaded).unwrap();
        assert_eq!(
            table.entries().collect::<Vec<_>>(),
            vec![(4, dir.path().join("b.pptx"))]
        );
        assert_eq!(reloaded.presentation.slides_dir, config.presentation.slides_dir);
    }

    #[test]
    fn test_save_without_config_file_fails() {
        let dir = slides();
        let table = MappingTable::new(None);
        assert!(table.save(&dir.path().join("absent.toml")).is_err());
    }
}
