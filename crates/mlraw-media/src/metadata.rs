//! Per-clip sidecar key/value store.
//!
//! Every clip gets one JSON sidecar next to it (`M1234.MLV.mrx`, or
//! `frames.mrx` beside a `frames/` directory). The store keeps the persisted
//! frame index under reserved keys and any user state under the rest.
//! Writes that change nothing are skipped; a real change rewrites the whole
//! sidecar through a temporary file renamed into place, so a crash leaves
//! either the old or the new version on disk.

use mlraw_core::{RawError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted frame index of a block container.
pub const FRAME_INDEX_KEY: &str = "frame_index_v1";

/// Persisted camera state records of a block container.
pub const SIDE_RECORDS_KEY: &str = "side_records_v1";

/// Sidecar extension.
pub const SIDECAR_EXTENSION: &str = "mrx";

const SIDECAR_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SidecarFile {
    version: u32,
    #[serde(default)]
    values: BTreeMap<String, Value>,
}

/// Sidecar location for a clip file or frame directory.
pub fn sidecar_path(source: &Path) -> PathBuf {
    let trimmed: PathBuf = source.components().collect();
    let name = trimmed
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());
    trimmed.with_file_name(format!("{name}.{SIDECAR_EXTENSION}"))
}

/// Key/value metadata backed by a JSON sidecar.
#[derive(Debug)]
pub struct MetadataStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, Value>>,
}

impl MetadataStore {
    /// Open the sidecar for `source`. A missing or unreadable sidecar yields
    /// an empty store.
    pub fn open(source: &Path) -> Self {
        let path = sidecar_path(source);
        let values = match load(&path) {
            Ok(values) => values,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring sidecar");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), keys = values.len(), "Sidecar loaded");
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_meta(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Typed read; a value that does not decode as `T` reads as absent.
    pub fn get_meta_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_meta(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "Sidecar value has unexpected shape");
                None
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    /// Store one value. Returns whether anything changed.
    pub fn set_meta<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let value = to_value(value)?;
        let mut values = self.values.lock();
        if values.get(key) == Some(&value) {
            return Ok(false);
        }
        let mut next = values.clone();
        next.insert(key.to_string(), value);
        self.persist(&next)?;
        *values = next;
        Ok(true)
    }

    /// Merge several values in one write. Keys not mentioned are kept.
    pub fn set_meta_values<I>(&self, entries: I) -> Result<bool>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut values = self.values.lock();
        let mut next = values.clone();
        let mut changed = false;
        for (key, value) in entries {
            if next.get(&key) != Some(&value) {
                next.insert(key, value);
                changed = true;
            }
        }
        if !changed {
            return Ok(false);
        }
        self.persist(&next)?;
        *values = next;
        Ok(true)
    }

    pub fn remove_meta(&self, key: &str) -> Result<bool> {
        let mut values = self.values.lock();
        if !values.contains_key(key) {
            return Ok(false);
        }
        let mut next = values.clone();
        next.remove(key);
        self.persist(&next)?;
        *values = next;
        Ok(true)
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file = SidecarFile {
            version: SIDECAR_VERSION,
            values: values.clone(),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &file)
            .map_err(|e| RawError::Serialization(e.to_string()))?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| RawError::Io(e.error))?;
        debug!(path = %path.display(), keys = values.len(), "Sidecar written");
        Ok(())
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| RawError::Serialization(e.to_string()))
}

fn load(path: &Path) -> Result<BTreeMap<String, Value>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(RawError::SidecarUnreadable(e.to_string())),
    };
    let file: SidecarFile =
        serde_json::from_str(&text).map_err(|e| RawError::SidecarUnreadable(e.to_string()))?;
    if file.version != SIDECAR_VERSION {
        return Err(RawError::SidecarUnreadable(format!(
            "unsupported sidecar version {}",
            file.version
        )));
    }
    Ok(file.values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/clips/M1234.MLV")),
            PathBuf::from("/clips/M1234.MLV.mrx")
        );
        assert_eq!(
            sidecar_path(Path::new("/clips/shot_01/")),
            PathBuf::from("/clips/shot_01.mrx")
        );
    }

    #[test]
    fn test_set_meta_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let clip = tmp.path().join("A.MLV");
        {
            let store = MetadataStore::open(&clip);
            assert!(store.set_meta("grade", &json!({"exposure": 0.5})).unwrap());
            assert!(store.set_meta("label", "take 3").unwrap());
        }
        let store = MetadataStore::open(&clip);
        assert_eq!(store.get_meta("grade"), Some(json!({"exposure": 0.5})));
        assert_eq!(store.get_meta_as::<String>("label").as_deref(), Some("take 3"));
    }

    #[test]
    fn test_unchanged_write_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let clip = tmp.path().join("A.MLV");
        let store = MetadataStore::open(&clip);
        assert!(store.set_meta("k", &1).unwrap());
        let path = store.path().unwrap().to_path_buf();
        std::fs::remove_file(&path).unwrap();
        assert!(!store.set_meta("k", &1).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_merge_keeps_other_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let clip = tmp.path().join("A.RAW");
        let store = MetadataStore::open(&clip);
        store.set_meta("user", &"kept").unwrap();
        store
            .set_meta_values([
                (FRAME_INDEX_KEY.to_string(), json!([1, 2])),
                (SIDE_RECORDS_KEY.to_string(), json!([])),
            ])
            .unwrap();
        let reopened = MetadataStore::open(&clip);
        assert_eq!(reopened.keys().len(), 3);
        assert_eq!(reopened.get_meta("user"), Some(json!("kept")));
        assert!(reopened.remove_meta("user").unwrap());
        assert!(!reopened.remove_meta("user").unwrap());
    }

    #[test]
    fn test_corrupt_sidecar_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let clip = tmp.path().join("A.MLV");
        std::fs::write(sidecar_path(&clip), "{not json").unwrap();
        let store = MetadataStore::open(&clip);
        assert!(store.keys().is_empty());
        store.set_meta("k", &true).unwrap();
        assert_eq!(MetadataStore::open(&clip).get_meta("k"), Some(json!(true)));
    }

    #[test]
    fn test_in_memory_store() {
        let store = MetadataStore::in_memory();
        assert!(store.set_meta("k", &"v").unwrap());
        assert!(store.path().is_none());
        assert_eq!(store.get_meta("k"), Some(json!("v")));
    }
}
