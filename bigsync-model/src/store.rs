//! Local File Store collaborator
//!
//! The sync engine never touches the filesystem directly. Everything it needs from the
//! local side goes through [`LocalFileStore`]: file content, modification stamps,
//! folder creation and persistent project properties.
//!
//! Two implementations are provided:
//! - [`FsFileStore`] maps workspace paths below a root directory and keeps properties
//!   in SQLite
//! - [`MemoryFileStore`] keeps everything in memory with a monotonic stamp counter

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

use crate::errors::{ModelError, Result};
use crate::path::ResourcePath;
use crate::properties::{PropertyDatabase, PropertyKey};

/// Folder (relative to the store root) holding store metadata
pub const METADATA_FOLDER: &str = ".bigsync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub is_folder: bool,
}

pub trait LocalFileStore: Send + Sync {
    fn exists(&self, path: &ResourcePath) -> bool;

    fn read_all(&self, path: &ResourcePath) -> Result<Vec<u8>>;

    /// Replace the content of a file. Missing files (and their parent folders) are
    /// created only when `create_if_missing` is set.
    fn write(&self, path: &ResourcePath, contents: &[u8], create_if_missing: bool) -> Result<()>;

    fn modification_stamp(&self, path: &ResourcePath) -> Result<i64>;

    fn set_modification_stamp(&self, path: &ResourcePath, stamp: i64) -> Result<()>;

    fn create_folder_recursive(&self, path: &ResourcePath) -> Result<()>;

    /// Direct children of a folder, sorted by name
    fn list(&self, path: &ResourcePath) -> Result<Vec<StoreEntry>>;

    /// Delete a file or a folder with everything below it. Missing paths are ignored.
    fn delete(&self, path: &ResourcePath) -> Result<()>;

    fn persistent_property(&self, project: &str, key: &PropertyKey) -> Result<Option<String>>;

    /// Set a property; `None` removes it
    fn set_persistent_property(
        &self,
        project: &str,
        key: &PropertyKey,
        value: Option<&str>,
    ) -> Result<()>;

    /// Drop every property of a project
    fn clear_persistent_properties(&self, project: &str) -> Result<()>;

    /// Projects (top-level folders) present in the store
    fn projects(&self) -> Result<Vec<String>> {
        Ok(self
            .list(&ResourcePath::root())?
            .into_iter()
            .filter(|e| e.is_folder)
            .map(|e| e.name)
            .collect())
    }
}

/// Filesystem-backed store rooted at a workspace directory
pub struct FsFileStore {
    root: PathBuf,
    properties: PropertyDatabase,
}

impl FsFileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let properties =
            PropertyDatabase::open(root.join(METADATA_FOLDER).join("properties.db"))?;
        debug!("Opened file store at {}", root.display());
        Ok(Self { root, properties })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &ResourcePath) -> PathBuf {
        let mut resolved = self.root.clone();
        for segment in path.segments().filter(|s| !matches!(*s, "." | "..")) {
            resolved.push(segment);
        }
        resolved
    }

    fn not_found(path: &ResourcePath) -> ModelError {
        ModelError::NotFound(path.to_string())
    }
}

fn to_stamp(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl LocalFileStore for FsFileStore {
    fn exists(&self, path: &ResourcePath) -> bool {
        self.resolve(path).exists()
    }

    fn read_all(&self, path: &ResourcePath) -> Result<Vec<u8>> {
        let resolved = self.resolve(path);
        if !resolved.is_file() {
            return Err(Self::not_found(path));
        }
        Ok(fs::read(resolved)?)
    }

    fn write(&self, path: &ResourcePath, contents: &[u8], create_if_missing: bool) -> Result<()> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            if !create_if_missing {
                return Err(Self::not_found(path));
            }
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&resolved, contents)?;
        trace!("Wrote {} bytes to {}", contents.len(), path);
        Ok(())
    }

    fn modification_stamp(&self, path: &ResourcePath) -> Result<i64> {
        let resolved = self.resolve(path);
        let metadata = fs::metadata(&resolved).map_err(|_| Self::not_found(path))?;
        Ok(to_stamp(metadata.modified()?))
    }

    fn set_modification_stamp(&self, path: &ResourcePath, stamp: i64) -> Result<()> {
        let resolved = self.resolve(path);
        let file = fs::File::options()
            .write(resolved.is_file())
            .read(true)
            .open(&resolved)
            .map_err(|_| Self::not_found(path))?;
        let time = UNIX_EPOCH + Duration::from_millis(stamp.max(0) as u64);
        file.set_modified(time)?;
        Ok(())
    }

    fn create_folder_recursive(&self, path: &ResourcePath) -> Result<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn list(&self, path: &ResourcePath) -> Result<Vec<StoreEntry>> {
        let resolved = self.resolve(path);
        if !resolved.is_dir() {
            return Err(Self::not_found(path));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(resolved)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_root() && name == METADATA_FOLDER {
                continue;
            }
            entries.push(StoreEntry {
                name,
                is_folder: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn delete(&self, path: &ResourcePath) -> Result<()> {
        let resolved = self.resolve(path);
        if resolved.is_dir() {
            fs::remove_dir_all(resolved)?;
        } else if resolved.exists() {
            fs::remove_file(resolved)?;
        }
        Ok(())
    }

    fn persistent_property(&self, project: &str, key: &PropertyKey) -> Result<Option<String>> {
        self.properties.get(project, key)
    }

    fn set_persistent_property(
        &self,
        project: &str,
        key: &PropertyKey,
        value: Option<&str>,
    ) -> Result<()> {
        self.properties.set(project, key, value)
    }

    fn clear_persistent_properties(&self, project: &str) -> Result<()> {
        self.properties.clear_project(project).map(|_| ())
    }
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    File { contents: Vec<u8>, stamp: i64 },
    Folder { stamp: i64 },
}

impl MemoryEntry {
    fn stamp(&self) -> i64 {
        match self {
            MemoryEntry::File { stamp, .. } | MemoryEntry::Folder { stamp } => *stamp,
        }
    }
}

/// In-memory store. Every mutation takes the next value of a global counter as its
/// stamp, so stamps are strictly increasing and never collide.
#[derive(Default)]
pub struct MemoryFileStore {
    entries: Mutex<BTreeMap<ResourcePath, MemoryEntry>>,
    properties: Mutex<HashMap<(String, PropertyKey), String>>,
    clock: AtomicI64,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ResourcePath, MemoryEntry>>> {
        self.entries
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))
    }

    fn create_folders(
        &self,
        entries: &mut BTreeMap<ResourcePath, MemoryEntry>,
        path: &ResourcePath,
    ) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(path.clone());
        while let Some(folder) = current {
            if folder.is_root() {
                break;
            }
            match entries.get(&folder) {
                Some(MemoryEntry::Folder { .. }) => break,
                Some(MemoryEntry::File { .. }) => {
                    return Err(ModelError::InvalidPath(format!("{} is a file", folder)))
                }
                None => {
                    current = folder.parent();
                    missing.push(folder);
                }
            }
        }
        for folder in missing.into_iter().rev() {
            let stamp = self.tick();
            self.touch_parent(entries, &folder, stamp);
            entries.insert(folder, MemoryEntry::Folder { stamp });
        }
        Ok(())
    }

    fn touch_parent(
        &self,
        entries: &mut BTreeMap<ResourcePath, MemoryEntry>,
        path: &ResourcePath,
        stamp: i64,
    ) {
        if let Some(parent) = path.parent() {
            if let Some(MemoryEntry::Folder { stamp: folder_stamp }) = entries.get_mut(&parent) {
                *folder_stamp = stamp;
            }
        }
    }
}

impl LocalFileStore for MemoryFileStore {
    fn exists(&self, path: &ResourcePath) -> bool {
        path.is_root()
            || self
                .entries
                .lock()
                .map(|entries| entries.contains_key(path))
                .unwrap_or(false)
    }

    fn read_all(&self, path: &ResourcePath) -> Result<Vec<u8>> {
        match self.entries()?.get(path) {
            Some(MemoryEntry::File { contents, .. }) => Ok(contents.clone()),
            _ => Err(ModelError::NotFound(path.to_string())),
        }
    }

    fn write(&self, path: &ResourcePath, contents: &[u8], create_if_missing: bool) -> Result<()> {
        let mut entries = self.entries()?;
        match entries.get(path) {
            Some(MemoryEntry::Folder { .. }) => {
                return Err(ModelError::InvalidPath(format!("{} is a folder", path)))
            }
            Some(MemoryEntry::File { .. }) => {}
            None if !create_if_missing => return Err(ModelError::NotFound(path.to_string())),
            None => {
                if let Some(parent) = path.parent() {
                    self.create_folders(&mut entries, &parent)?;
                }
                let stamp = self.tick();
                self.touch_parent(&mut entries, path, stamp);
            }
        }
        let stamp = self.tick();
        entries.insert(
            path.clone(),
            MemoryEntry::File {
                contents: contents.to_vec(),
                stamp,
            },
        );
        Ok(())
    }

    fn modification_stamp(&self, path: &ResourcePath) -> Result<i64> {
        self.entries()?
            .get(path)
            .map(MemoryEntry::stamp)
            .ok_or_else(|| ModelError::NotFound(path.to_string()))
    }

    fn set_modification_stamp(&self, path: &ResourcePath, stamp: i64) -> Result<()> {
        match self.entries()?.get_mut(path) {
            Some(MemoryEntry::File { stamp: current, .. })
            | Some(MemoryEntry::Folder { stamp: current }) => {
                *current = stamp;
                Ok(())
            }
            None => Err(ModelError::NotFound(path.to_string())),
        }
    }

    fn create_folder_recursive(&self, path: &ResourcePath) -> Result<()> {
        let mut entries = self.entries()?;
        self.create_folders(&mut entries, path)
    }

    fn list(&self, path: &ResourcePath) -> Result<Vec<StoreEntry>> {
        let entries = self.entries()?;
        if !path.is_root() && !matches!(entries.get(path), Some(MemoryEntry::Folder { .. })) {
            return Err(ModelError::NotFound(path.to_string()));
        }
        let depth = path.depth() + 1;
        Ok(entries
            .iter()
            .filter(|(p, _)| p.depth() == depth && p.starts_with(path))
            .filter_map(|(p, entry)| {
                p.file_name().map(|name| StoreEntry {
                    name: name.to_string(),
                    is_folder: matches!(entry, MemoryEntry::Folder { .. }),
                })
            })
            .collect())
    }

    fn delete(&self, path: &ResourcePath) -> Result<()> {
        let mut entries = self.entries()?;
        let doomed: Vec<ResourcePath> = entries
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }
        for p in doomed {
            entries.remove(&p);
        }
        let stamp = self.tick();
        self.touch_parent(&mut entries, path, stamp);
        Ok(())
    }

    fn persistent_property(&self, project: &str, key: &PropertyKey) -> Result<Option<String>> {
        let properties = self
            .properties
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;
        Ok(properties.get(&(project.to_string(), key.clone())).cloned())
    }

    fn set_persistent_property(
        &self,
        project: &str,
        key: &PropertyKey,
        value: Option<&str>,
    ) -> Result<()> {
        let mut properties = self
            .properties
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;
        let slot = (project.to_string(), key.clone());
        match value {
            Some(value) => {
                properties.insert(slot, value.to_string());
            }
            None => {
                properties.remove(&slot);
            }
        }
        Ok(())
    }

    fn clear_persistent_properties(&self, project: &str) -> Result<()> {
        self.properties
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?
            .retain(|(p, _), _| p != project);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn p(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw).unwrap()
    }

    fn exercise_store(store: &dyn LocalFileStore) {
        let file = p("/lab/Common/iRules/LTM/a.tcl");
        assert!(!store.exists(&file));
        assert!(store.write(&file, b"when HTTP_REQUEST {}", false).is_err());

        store.write(&file, b"when HTTP_REQUEST {}", true).unwrap();
        assert!(store.exists(&file));
        assert!(store.exists(&p("/lab/Common/iRules")));
        assert_eq!(store.read_all(&file).unwrap(), b"when HTTP_REQUEST {}");

        store.set_modification_stamp(&file, 1_700_000_000_000).unwrap();
        assert_eq!(store.modification_stamp(&file).unwrap(), 1_700_000_000_000);

        store.create_folder_recursive(&p("/lab/Common/DataGroups/LTM")).unwrap();
        let listing = store.list(&p("/lab/Common")).unwrap();
        assert_eq!(
            listing,
            vec![
                StoreEntry { name: "DataGroups".into(), is_folder: true },
                StoreEntry { name: "iRules".into(), is_folder: true },
            ]
        );
        assert_eq!(store.projects().unwrap(), vec!["lab".to_string()]);

        store.delete(&p("/lab/Common/iRules")).unwrap();
        assert!(!store.exists(&file));
        store.delete(&p("/lab/missing")).unwrap();

        let key = PropertyKey::plugin("onlineMode");
        store.set_persistent_property("lab", &key, Some("true")).unwrap();
        assert_eq!(store.persistent_property("lab", &key).unwrap().as_deref(), Some("true"));
        store.set_persistent_property("lab", &key, None).unwrap();
        assert_eq!(store.persistent_property("lab", &key).unwrap(), None);

        store.set_persistent_property("lab", &key, Some("false")).unwrap();
        store.set_persistent_property("other", &key, Some("true")).unwrap();
        store.clear_persistent_properties("lab").unwrap();
        assert_eq!(store.persistent_property("lab", &key).unwrap(), None);
        assert!(store.persistent_property("other", &key).unwrap().is_some());
    }

    #[test]
    fn test_memory_store_contract() {
        exercise_store(&MemoryFileStore::new());
    }

    #[test]
    fn test_fs_store_contract() {
        let dir = tempdir().unwrap();
        let store = FsFileStore::open(dir.path()).unwrap();
        exercise_store(&store);
        assert!(dir.path().join(METADATA_FOLDER).join("properties.db").exists());
    }

    #[test]
    fn test_memory_stamps_increase_on_write() {
        let store = MemoryFileStore::new();
        let file = p("/lab/x");
        store.write(&file, b"1", true).unwrap();
        let first = store.modification_stamp(&file).unwrap();
        store.write(&file, b"2", false).unwrap();
        assert!(store.modification_stamp(&file).unwrap() > first);
    }

    #[test]
    fn test_memory_folder_stamp_moves_with_new_children() {
        let store = MemoryFileStore::new();
        store.create_folder_recursive(&p("/lab/Common")).unwrap();
        let before = store.modification_stamp(&p("/lab/Common")).unwrap();
        store.write(&p("/lab/Common/new.tcl"), b"", true).unwrap();
        assert!(store.modification_stamp(&p("/lab/Common")).unwrap() > before);
    }
}
