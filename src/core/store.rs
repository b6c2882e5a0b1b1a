//! Store abstraction for steward's persisted state.
//!
//! Every subsystem owns one or more JSON documents addressed by a
//! `/`-separated key relative to the state root (for example
//! `alpha/decisions.json` or `_gate_history.json`). Subsystems only ever load a
//! whole document and save a whole document; how the bytes reach disk is the
//! business of a [`StorageBackend`].
//!
//! Two backends exist:
//! - `Json`: one file per document, written via temp file + rename.
//! - `Sqlite`: one row per document in `<root>/steward.db` (see [`crate::core::db`]).

use crate::core::error::StewardError;
use crate::core::time;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Backend discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Plain JSON files under the state root (the stable on-disk contract).
    Json,
    /// Documents stored as rows of an embedded SQLite database.
    Sqlite,
}

/// Byte-level persistence for whole documents.
pub trait StorageBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StewardError>;
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StewardError>;
    fn remove(&self, key: &str) -> Result<(), StewardError>;
    /// Move an unreadable document out of the way. Returns where it went.
    fn quarantine(&self, key: &str) -> Result<Option<String>, StewardError>;
    /// All live document keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StewardError>;
}

/// Handle to a steward state root.
#[derive(Clone)]
pub struct Store {
    pub kind: StoreKind,
    pub root: PathBuf,
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("kind", &self.kind)
            .field("root", &self.root)
            .finish()
    }
}

impl Store {
    pub fn json(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            kind: StoreKind::Json,
            backend: Arc::new(JsonFileBackend::new(root.clone())),
            root,
        }
    }

    pub fn sqlite(root: impl Into<PathBuf>) -> Result<Self, StewardError> {
        let root = root.into();
        let backend = crate::core::db::SqliteBackend::open(&root)?;
        Ok(Self {
            kind: StoreKind::Sqlite,
            backend: Arc::new(backend),
            root,
        })
    }

    /// Load a document. A document that exists but cannot be decoded is
    /// quarantined and reported as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StewardError> {
        validate_key(key)?;
        let Some(bytes) = self.backend.read(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let moved_to = self.backend.quarantine(key)?;
                tracing::warn!(
                    key,
                    error = %e,
                    quarantined_as = moved_to.as_deref().unwrap_or("-"),
                    "unreadable state document quarantined"
                );
                Ok(None)
            }
        }
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StewardError> {
        validate_key(key)?;
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StewardError::StorageError(format!("serialize {key}: {e}")))?;
        self.backend.write(key, &bytes)
    }

    pub fn remove(&self, key: &str) -> Result<(), StewardError> {
        validate_key(key)?;
        self.backend.remove(key)
    }

    pub fn keys(&self) -> Result<Vec<String>, StewardError> {
        self.backend.keys()
    }

    /// Directory that holds a project's documents (JSON layout).
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }
}

/// Keys are relative, `/`-separated and may not climb out of the root.
pub fn validate_key(key: &str) -> Result<(), StewardError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StewardError::StorageError(format!(
            "invalid document key '{key}'"
        )));
    }
    Ok(())
}

/// Lexically normalize a path: drop `.`, resolve `..` against prior
/// components. Never touches the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let climbing = matches!(
                    out.components().next_back(),
                    None | Some(Component::ParentDir)
                );
                if climbing {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct JsonFileBackend {
    root: PathBuf,
}

impl JsonFileBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StewardError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_err("list", &dir.to_string_lossy(), e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| storage_err("list", &dir.to_string_lossy(), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let key = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry
                .file_type()
                .map_err(|e| storage_err("list", &key, e))?;
            if file_type.is_dir() {
                self.collect_keys(&entry.path(), &key, out)?;
            } else if name.ends_with(".json") {
                out.push(key);
            }
        }
        Ok(())
    }
}

fn storage_err(op: &str, key: &str, e: std::io::Error) -> StewardError {
    StewardError::StorageError(format!("{op} {key}: {e}"))
}

impl StorageBackend for JsonFileBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StewardError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err("read", key, e)),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StewardError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_err("mkdir", key, e))?;
        }
        let tmp = path.with_extension(format!("json.tmp-{}", time::new_event_id()));
        fs::write(&tmp, bytes).map_err(|e| storage_err("write", key, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            storage_err("rename", key, e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StewardError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("remove", key, e)),
        }
    }

    fn quarantine(&self, key: &str) -> Result<Option<String>, StewardError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let target_key = format!("{key}.corrupt-{}", time::new_event_id());
        fs::rename(&path, self.path_for(&target_key))
            .map_err(|e| storage_err("quarantine", key, e))?;
        Ok(Some(target_key))
    }

    fn keys(&self) -> Result<Vec<String>, StewardError> {
        let mut out = Vec::new();
        self.collect_keys(&self.root, "", &mut out)?;
        out.sort();
        Ok(out)
    }
}
