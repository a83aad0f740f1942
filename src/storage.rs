//! Persistent storage collaborator.
//!
//! The importer only needs four operations: load-by-path, create, mark-dirty and save-all. Objects
//! are [`Record`]s addressed by a path-like string; tables are records whose row collection is an
//! array member.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::directory::TypeDescriptor;
use crate::error::{ImportError, ImportResult};
use crate::types::Record;

/// Storage contract used by the importer.
///
/// Loaded records are returned by value; callers write changes back with [`Self::mark_dirty`].
/// Nothing reaches durable storage before [`Self::save_all`].
pub trait RecordStore {
    /// Load the object at `path`. `Ok(None)` if there is none; an error if it has another type.
    fn load_by_path(&mut self, path: &str, type_name: &str) -> ImportResult<Option<Record>>;

    /// Create and register a default-initialized instance of `descriptor` at `path`.
    fn create(&mut self, descriptor: &TypeDescriptor, path: &str) -> ImportResult<Record>;

    /// Store `record` at `path` and flag it for the next save.
    fn mark_dirty(&mut self, path: &str, record: Record) -> ImportResult<()>;

    /// Persist every dirty object. Returns how many were written.
    fn save_all(&mut self) -> ImportResult<usize>;
}

#[derive(Debug, Clone)]
struct Entry {
    record: Record,
    dirty: bool,
}

fn check_type(path: &str, record: &Record, type_name: &str) -> ImportResult<()> {
    if record.type_name != type_name {
        return Err(ImportError::StorageTypeMismatch {
            path: path.to_string(),
            expected: type_name.to_string(),
            found: record.type_name.clone(),
        });
    }
    Ok(())
}

/// In-memory [`RecordStore`] with dirty tracking.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Entry>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as already persisted (not dirty).
    pub fn insert(&mut self, path: impl Into<String>, record: Record) {
        self.entries.insert(
            path.into(),
            Entry {
                record,
                dirty: false,
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&Record> {
        self.entries.get(path).map(|e| &e.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted paths of every stored object.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn dirty_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Number of `save_all` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl RecordStore for MemoryStore {
    fn load_by_path(&mut self, path: &str, type_name: &str) -> ImportResult<Option<Record>> {
        match self.entries.get(path) {
            Some(e) => {
                check_type(path, &e.record, type_name)?;
                Ok(Some(e.record.clone()))
            }
            None => Ok(None),
        }
    }

    fn create(&mut self, descriptor: &TypeDescriptor, path: &str) -> ImportResult<Record> {
        let record = descriptor.instantiate();
        self.entries.insert(
            path.to_string(),
            Entry {
                record: record.clone(),
                dirty: true,
            },
        );
        Ok(record)
    }

    fn mark_dirty(&mut self, path: &str, record: Record) -> ImportResult<()> {
        self.entries
            .insert(path.to_string(), Entry { record, dirty: true });
        Ok(())
    }

    fn save_all(&mut self) -> ImportResult<usize> {
        let mut written = 0;
        for e in self.entries.values_mut().filter(|e| e.dirty) {
            e.dirty = false;
            written += 1;
        }
        self.saves += 1;
        Ok(written)
    }
}

fn file_path_under(root: &Path, path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    let segments: Vec<&str> = path.split(['/', '\\']).filter(|s| !s.is_empty()).collect();
    if let Some((last, dirs)) = segments.split_last() {
        for d in dirs {
            out.push(d);
        }
        out.push(format!("{last}.json"));
    }
    out
}

/// [`RecordStore`] keeping one pretty-printed JSON file per object under a root directory.
///
/// `Item/Item_sword` is stored at `<root>/Item/Item_sword.json`. Objects are cached after the
/// first load; only dirty ones are written by `save_all`.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    cache: HashMap<String, Entry>,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing the object at `path`.
    pub fn file_path(&self, path: &str) -> PathBuf {
        file_path_under(&self.root, path)
    }

    fn read_file(&self, path: &str) -> ImportResult<Option<Record>> {
        let file_path = self.file_path(path);
        if !file_path.is_file() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&file_path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }
}

impl RecordStore for JsonFileStore {
    fn load_by_path(&mut self, path: &str, type_name: &str) -> ImportResult<Option<Record>> {
        if !self.cache.contains_key(path) {
            match self.read_file(path)? {
                Some(record) => {
                    self.cache.insert(
                        path.to_string(),
                        Entry {
                            record,
                            dirty: false,
                        },
                    );
                }
                None => return Ok(None),
            }
        }
        match self.cache.get(path) {
            Some(e) => {
                check_type(path, &e.record, type_name)?;
                Ok(Some(e.record.clone()))
            }
            None => Ok(None),
        }
    }

    fn create(&mut self, descriptor: &TypeDescriptor, path: &str) -> ImportResult<Record> {
        let record = descriptor.instantiate();
        self.cache.insert(
            path.to_string(),
            Entry {
                record: record.clone(),
                dirty: true,
            },
        );
        Ok(record)
    }

    fn mark_dirty(&mut self, path: &str, record: Record) -> ImportResult<()> {
        self.cache
            .insert(path.to_string(), Entry { record, dirty: true });
        Ok(())
    }

    fn save_all(&mut self) -> ImportResult<usize> {
        let mut written = 0;
        let root = &self.root;
        for (path, entry) in self.cache.iter_mut().filter(|(_, e)| e.dirty) {
            let file_path = file_path_under(root, path);
            if let Some(parent) = file_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let writer = BufWriter::new(File::create(&file_path)?);
            serde_json::to_writer_pretty(writer, &entry.record)?;
            entry.dirty = false;
            written += 1;
        }
        debug!(root = %self.root.display(), written, "json store saved");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonFileStore, MemoryStore, RecordStore};
    use crate::directory::TypeDescriptor;
    use crate::types::{DataType, Record, Value};

    fn item() -> TypeDescriptor {
        TypeDescriptor::record("Item").member("power", DataType::Int64)
    }

    #[test]
    fn memory_store_tracks_dirty_objects() {
        let mut store = MemoryStore::new();
        store.insert("Item/a", Record::new("Item"));
        assert!(store.dirty_paths().is_empty());

        let created = store.create(&item(), "Item/b").unwrap();
        assert_eq!(created.get("power"), Some(&Value::Int64(0)));
        assert_eq!(store.dirty_paths(), vec!["Item/b".to_string()]);

        assert_eq!(store.save_all().unwrap(), 1);
        assert!(store.dirty_paths().is_empty());
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn memory_store_rejects_type_mismatch() {
        let mut store = MemoryStore::new();
        store.insert("x", Record::new("Other"));
        let err = store.load_by_path("x", "Item").unwrap_err();
        assert!(err.to_string().contains("has type 'Other'"));
        assert!(store.load_by_path("missing", "Item").unwrap().is_none());
    }

    #[test]
    fn json_store_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = JsonFileStore::new(dir.path());
            let mut record = store.create(&item(), "Item/Item_a").unwrap();
            record.members.insert("power".into(), Value::Int64(5));
            store.mark_dirty("Item/Item_a", record).unwrap();
            assert_eq!(store.save_all().unwrap(), 1);
            assert_eq!(store.save_all().unwrap(), 0);
        }
        assert!(dir.path().join("Item").join("Item_a.json").is_file());

        let mut reopened = JsonFileStore::new(dir.path());
        let loaded = reopened.load_by_path("Item/Item_a", "Item").unwrap().unwrap();
        assert_eq!(loaded.get("power"), Some(&Value::Int64(5)));
    }
}
