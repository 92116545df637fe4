use crate::common::slug::file_name_for;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Durable key/value store used for saved layouts.
pub trait LayoutStore: Send {
    fn save(&mut self, key: &str, contents: &str) -> anyhow::Result<()>;

    /// `Ok(None)` when nothing was saved under `key`.
    fn load(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn remove(&mut self, key: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryLayoutStore {
    entries: HashMap<String, String>,
}

impl MemoryLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn save(&mut self, key: &str, contents: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), contents.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// One JSON file per key under `dir`, named after the slugified key.
/// Distinct keys always map to distinct files.
#[derive(Debug, Clone)]
pub struct FileLayoutStore {
    dir: PathBuf,
}

impl FileLayoutStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for(key))
    }
}

impl LayoutStore for FileLayoutStore {
    fn save(&mut self, key: &str, contents: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(key), contents)?;
        Ok(())
    }

    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(content))
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<bool> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}
