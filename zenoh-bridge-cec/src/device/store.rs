//! Durable device identities.
//!
//! Records live in an arena and are addressed by [`RecordHandle`]. The
//! store is persisted as a JSON object keyed by device id:
//!
//! ```json
//! {
//!   "6f1c...": {
//!     "physical_address": "1.0.0.0",
//!     "vendor_id": 524358,
//!     "osd_name": "PlayStation 5",
//!     "topic": "playstation",
//!     "ignore": false
//!   }
//! }
//! ```
//!
//! Users may hand-edit `topic` and `ignore`, so the file is read with JSON5.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cec::{PhysicalAddress, VendorId};

/// File name of the store inside the data directory.
pub const DEVICE_STORE_FILE: &str = "devices.json";

/// Errors reading or writing the device store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed device store {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to encode device store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Stable identifier of a physical device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random (v4 UUID) id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The durable identity of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(skip)]
    pub id: DeviceId,
    pub physical_address: PhysicalAddress,
    pub vendor_id: VendorId,
    pub osd_name: String,
    /// Topic segment for this device. Defaults to the display name.
    #[serde(default)]
    pub topic: String,
    /// Ignored devices are never surfaced.
    #[serde(default)]
    pub ignore: bool,
}

impl DeviceRecord {
    /// The topic segment to publish under, falling back to the display name
    /// and then the id when the configured topic is blank.
    pub fn topic_segment(&self) -> &str {
        if !self.topic.trim().is_empty() {
            &self.topic
        } else if !self.osd_name.trim().is_empty() {
            &self.osd_name
        } else {
            self.id.as_str()
        }
    }
}

/// Index of a record in the store arena. Handles are never invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHandle(usize);

/// Arena of device records with optional file backing.
#[derive(Debug, Default)]
pub struct DeviceStore {
    records: Vec<DeviceRecord>,
    by_id: HashMap<DeviceId, RecordHandle>,
    path: Option<PathBuf>,
}

impl DeviceStore {
    /// An empty store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store that will be created on the
    /// first [`save`](Self::save). A malformed file is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut store = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No device store yet, starting empty");
                return Ok(store);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        if content.trim().is_empty() {
            return Ok(store);
        }

        let records: BTreeMap<DeviceId, DeviceRecord> =
            json5::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        for (id, mut record) in records {
            record.id = id;
            store.insert(record);
        }

        tracing::debug!(path = %path.display(), records = store.len(), "Loaded device store");
        Ok(store)
    }

    /// Write the store back to its file, atomically.
    ///
    /// In-memory stores are a no-op.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        Self::write_to(path, &self.to_json()?)
    }

    fn to_json(&self) -> Result<String, StoreError> {
        let ordered: BTreeMap<&DeviceId, &DeviceRecord> =
            self.records.iter().map(|r| (&r.id, r)).collect();
        Ok(serde_json::to_string_pretty(&ordered)?)
    }

    fn write_to(path: &Path, content: &str) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_error)?;
        std::fs::rename(&tmp, path).map_err(io_error)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add a record. Its id must not already be present.
    pub fn insert(&mut self, record: DeviceRecord) -> RecordHandle {
        let handle = RecordHandle(self.records.len());
        self.by_id.insert(record.id.clone(), handle);
        self.records.push(record);
        handle
    }

    pub fn get(&self, handle: RecordHandle) -> &DeviceRecord {
        &self.records[handle.0]
    }

    pub fn get_mut(&mut self, handle: RecordHandle) -> &mut DeviceRecord {
        &mut self.records[handle.0]
    }

    pub fn find(&self, id: &DeviceId) -> Option<RecordHandle> {
        self.by_id.get(id).copied()
    }

    pub fn contains_id(&self, id: &DeviceId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Generate an id not yet used by any record.
    pub fn allocate_id(&self) -> DeviceId {
        loop {
            let id = DeviceId::random();
            if !self.contains_id(&id) {
                return id;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordHandle, &DeviceRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (RecordHandle(i), r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cecsight-store-{}-{}",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record(id: &str, name: &str) -> DeviceRecord {
        DeviceRecord {
            id: DeviceId::new(id),
            physical_address: PhysicalAddress::new(0x1000),
            vendor_id: VendorId::new(0x080046),
            osd_name: name.to_string(),
            topic: name.to_lowercase(),
            ignore: false,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = scratch_dir("missing");
        let store = DeviceStore::load(dir.join(DEVICE_STORE_FILE)).unwrap();
        assert!(store.is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = scratch_dir("reload");
        let path = dir.join("nested").join(DEVICE_STORE_FILE);

        let mut store = DeviceStore::load(&path).unwrap();
        let handle = store.insert(record("a", "Player"));
        store.get_mut(handle).ignore = true;
        store.save().unwrap();

        let reloaded = DeviceStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let handle = reloaded.find(&DeviceId::new("a")).unwrap();
        let loaded = reloaded.get(handle);
        assert_eq!(loaded.osd_name, "Player");
        assert_eq!(loaded.physical_address.to_string(), "1.0.0.0");
        assert!(loaded.ignore);
        assert!(!path.with_extension("json.tmp").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_hand_edited_file() {
        let dir = scratch_dir("edited");
        let path = dir.join(DEVICE_STORE_FILE);
        std::fs::write(
            &path,
            r#"{
                // the living room player
                "abc": { physical_address: "2.1.0.0", vendor_id: 240, osd_name: "BD", },
            }"#,
        )
        .unwrap();

        let store = DeviceStore::load(&path).unwrap();
        let record = store.get(store.find(&DeviceId::new("abc")).unwrap());
        assert_eq!(record.physical_address.raw(), 0x2100);
        assert_eq!(record.topic, "");
        assert_eq!(record.topic_segment(), "BD");
        assert!(!record.ignore);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = scratch_dir("malformed");
        let path = dir.join(DEVICE_STORE_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let err = DeviceStore::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_allocated_ids_are_unique() {
        let mut store = DeviceStore::in_memory();
        for _ in 0..32 {
            let id = store.allocate_id();
            assert!(!store.contains_id(&id));
            let mut r = record("", "x");
            r.id = id;
            store.insert(r);
        }
        assert_eq!(store.len(), 32);
        assert!(store.save().is_ok());
    }

    #[test]
    fn test_topic_segment_fallbacks() {
        let mut r = record("id-1", "Player");
        assert_eq!(r.topic_segment(), "player");
        r.topic = " ".to_string();
        assert_eq!(r.topic_segment(), "Player");
        r.osd_name.clear();
        assert_eq!(r.topic_segment(), "id-1");
    }
}
