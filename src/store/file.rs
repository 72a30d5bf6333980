use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::app::{Result, RiverbedError};
use crate::store::Store;

/// Stores documents as files under a data folder.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| RiverbedError::storage(&root.display().to_string(), &e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Store for FileStore {
    fn load_text(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RiverbedError::storage(key, &e)),
        }
    }

    fn save_text(&self, key: &str, text: &str) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RiverbedError::storage(key, &e))?;
        }
        fs::write(&path, text).map_err(|e| RiverbedError::storage(key, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.load_text("feeds/nothing/feedInfo.json").unwrap().is_none());
    }

    #[test]
    fn test_save_creates_folders() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("data")).unwrap();

        store.save_text("lists/a.opml/riverData.json", "{}").unwrap();

        assert_eq!(
            store.load_text("lists/a.opml/riverData.json").unwrap().as_deref(),
            Some("{}")
        );
        assert!(dir.path().join("data/lists/a.opml").is_dir());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save_text("serverStats.json", "1").unwrap();
        store.save_text("serverStats.json", "2").unwrap();
        assert_eq!(store.load_text("serverStats.json").unwrap().as_deref(), Some("2"));
    }
}
