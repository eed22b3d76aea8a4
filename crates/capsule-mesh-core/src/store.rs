//! Capsule Store: a directory of verified capsule entries.
//!
//! Each capsule lives in one `<name>.capsule.json` file holding its manifest and
//! base64 payload. Writes go to a temp file in the same directory and are renamed
//! into place, so readers see the previous entry or the new one, never a partial
//! file. Every read re-verifies the trust invariant.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::capsule::{Capsule, CapsuleManifest, TrustError};
use crate::observability;
use crate::path_validation::{entry_path, name_from_entry, validate_capsule_name, NameError};

const ENTRY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Capsule not found: {0}")]
    NotFound(String),

    #[error("Corrupt store entry '{name}': {reason}")]
    CorruptEntry { name: String, reason: String },

    #[error("Refusing to store capsule '{name}': {source}")]
    InvalidCapsule {
        name: String,
        #[source]
        source: TrustError,
    },

    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("Store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persisted form of a capsule entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCapsule {
    version: u32,
    #[serde(flatten)]
    manifest: CapsuleManifest,
    payload: String,
}

/// Local directory of capsules. Cheap to share behind an `Arc`; mutations are serialized.
#[derive(Debug)]
pub struct CapsuleStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl CapsuleStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of all entries, lexicographic. Temp files from in-progress writes are never listed.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let file_name = e.file_name();
                file_name.to_str().and_then(name_from_entry).map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Read and verify `name`. Bytes failing verification are reported, never returned.
    pub fn read(&self, name: &str) -> Result<Capsule, StoreError> {
        validate_capsule_name(name)?;
        let stored = self.load_entry(name)?;
        self.decode_verified(name, stored)
    }

    /// Find a capsule by payload digest. Unreadable entries that do not claim the
    /// digest are skipped with a warning; a matching entry that fails verification
    /// is reported as corrupt.
    pub fn find_by_digest(&self, digest: &str) -> Result<Capsule, StoreError> {
        for name in self.list()? {
            let stored = match self.load_entry(&name) {
                Ok(s) => s,
                Err(StoreError::NotFound(_)) => continue,
                Err(StoreError::CorruptEntry { name, reason }) => {
                    tracing::warn!(
                        capsule = %name,
                        reason = %reason,
                        "Skipping unreadable store entry"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            if stored.manifest.digest.eq_ignore_ascii_case(digest) {
                return self.decode_verified(&name, stored);
            }
        }
        Err(StoreError::NotFound(digest.to_string()))
    }

    /// Verify and atomically persist `capsule`, replacing any entry with the same name.
    pub fn write(&self, capsule: &Capsule) -> Result<(), StoreError> {
        let data = encode_entry(&self.root, capsule)?;
        let target = entry_path(&self.root, &capsule.name);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tmp = self.stage(&data)?;
        tmp.persist(&target)
            .map_err(|e| StoreError::io(&target, e.error))?;
        log_stored(capsule);
        Ok(())
    }

    /// Like [`write`](Self::write), but an existing entry with the same name is left
    /// untouched. Returns false when the name was already taken.
    pub fn write_if_absent(&self, capsule: &Capsule) -> Result<bool, StoreError> {
        let data = encode_entry(&self.root, capsule)?;
        let target = entry_path(&self.root, &capsule.name);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tmp = self.stage(&data)?;
        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                log_stored(capsule);
                Ok(true)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(&target, e.error)),
        }
    }

    fn stage(&self, data: &[u8]) -> Result<tempfile::NamedTempFile, StoreError> {
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        tmp.write_all(data)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        Ok(tmp)
    }

    /// Delete `name`. Returns false when there was nothing to delete.
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        validate_capsule_name(name)?;
        let path = entry_path(&self.root, name);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn load_entry(&self, name: &str) -> Result<StoredCapsule, StoreError> {
        let path = entry_path(&self.root, name);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| corrupt(name, format!("unreadable entry: {e}")))
    }

    fn decode_verified(&self, name: &str, stored: StoredCapsule) -> Result<Capsule, StoreError> {
        if stored.manifest.name != name {
            return Err(corrupt(
                name,
                format!("entry claims name '{}'", stored.manifest.name),
            ));
        }
        let payload = BASE64
            .decode(stored.payload.as_bytes())
            .map_err(|e| corrupt(name, format!("payload encoding: {e}")))?;
        let capsule = Capsule::from_parts(stored.manifest, payload)
            .map_err(|e| corrupt(name, e.to_string()))?;
        capsule
            .verify()
            .map_err(|e| corrupt(name, e.to_string()))?;
        Ok(capsule)
    }
}

fn encode_entry(root: &Path, capsule: &Capsule) -> Result<Vec<u8>, StoreError> {
    validate_capsule_name(&capsule.name)?;
    capsule.verify().map_err(|source| StoreError::InvalidCapsule {
        name: capsule.name.clone(),
        source,
    })?;
    let stored = StoredCapsule {
        version: ENTRY_VERSION,
        manifest: capsule.manifest(),
        payload: BASE64.encode(&capsule.payload),
    };
    serde_json::to_vec_pretty(&stored)
        .map_err(|e| StoreError::io(root, io::Error::new(io::ErrorKind::InvalidData, e)))
}

fn log_stored(capsule: &Capsule) {
    tracing::debug!(
        capsule = %capsule.name,
        digest = %capsule.digest,
        bytes = capsule.payload.len(),
        "Stored capsule"
    );
}

fn corrupt(name: &str, reason: String) -> StoreError {
    observability::security_corrupt_entry(name, &reason);
    StoreError::CorruptEntry {
        name: name.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn store() -> (tempfile::TempDir, CapsuleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CapsuleStore::open(dir.path().join("capsules")).unwrap();
        (dir, store)
    }

    fn capsule(name: &str, payload: &[u8]) -> Capsule {
        Capsule::publish(name, payload.to_vec(), &Keypair::from_seed(&[4u8; 32])).unwrap()
    }

    #[test]
    fn test_write_then_read_and_list() {
        let (_dir, store) = store();
        store.write(&capsule("zeta", b"z")).unwrap();
        store.write(&capsule("alpha", b"a")).unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);
        let read = store.read("alpha").unwrap();
        assert_eq!(read.payload, b"a");
        assert!(read.is_trusted());
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.read("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_write_rejects_untrusted_capsule() {
        let (_dir, store) = store();
        let mut bad = capsule("bad", b"payload");
        bad.payload[0] ^= 0x80;
        assert!(matches!(
            store.write(&bad),
            Err(StoreError::InvalidCapsule { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_tampered_entry_on_disk_is_corrupt() {
        let (_dir, store) = store();
        store.write(&capsule("doc", b"original")).unwrap();

        let path = entry_path(store.root(), "doc");
        let mut stored: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        stored["payload"] = serde_json::Value::String(BASE64.encode(b"originaL"));
        fs::write(&path, serde_json::to_vec(&stored).unwrap()).unwrap();

        assert!(matches!(
            store.read("doc"),
            Err(StoreError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_truncated_entry_is_corrupt() {
        let (_dir, store) = store();
        store.write(&capsule("doc", b"original")).unwrap();
        let path = entry_path(store.root(), "doc");
        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() / 2]).unwrap();
        assert!(matches!(
            store.read("doc"),
            Err(StoreError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_interrupted_write_leaves_previous_capsule() {
        let (_dir, store) = store();
        let v1 = capsule("doc", b"version one");
        store.write(&v1).unwrap();

        // A crash between temp-file write and rename leaves a partial temp file behind.
        let v2 = capsule("doc", b"version two");
        let partial = serde_json::to_vec(&StoredCapsule {
            version: ENTRY_VERSION,
            manifest: v2.manifest(),
            payload: BASE64.encode(&v2.payload),
        })
        .unwrap();
        fs::write(store.root().join(".tmpCrash1"), &partial[..partial.len() / 3]).unwrap();

        assert_eq!(store.list().unwrap(), vec!["doc"]);
        assert_eq!(store.read("doc").unwrap(), v1);

        store.write(&v2).unwrap();
        assert_eq!(store.read("doc").unwrap(), v2);
    }

    #[test]
    fn test_overwrite_is_new_digest() {
        let (_dir, store) = store();
        store.write(&capsule("doc", b"one")).unwrap();
        store.write(&capsule("doc", b"two")).unwrap();
        let read = store.read("doc").unwrap();
        assert_eq!(read.digest, crate::identity::hash(b"two"));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_write_if_absent_keeps_existing_entry() {
        let (_dir, store) = store();
        let mine = capsule("doc", b"mine");
        assert!(store.write_if_absent(&mine).unwrap());
        assert!(!store.write_if_absent(&capsule("doc", b"theirs")).unwrap());
        assert!(!store.write_if_absent(&mine).unwrap());
        assert_eq!(store.read("doc").unwrap(), mine);
        assert_eq!(store.list().unwrap(), vec!["doc"]);
    }

    #[test]
    fn test_find_by_digest() {
        let (_dir, store) = store();
        let c = capsule("doc", b"find me");
        store.write(&capsule("other", b"noise")).unwrap();
        store.write(&c).unwrap();
        fs::write(entry_path(store.root(), "junk"), b"{not json").unwrap();

        assert_eq!(store.find_by_digest(&c.digest).unwrap(), c);
        assert!(matches!(
            store.find_by_digest(&crate::identity::hash(b"absent")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = store();
        store.write(&capsule("doc", b"x")).unwrap();
        assert!(store.remove("doc").unwrap());
        assert!(!store.remove("doc").unwrap());
        assert!(matches!(store.read("doc"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_invalid_name_never_touches_disk() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read("../../etc/passwd"),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_concurrent_writes_of_distinct_names() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .write(&capsule(&format!("c{i}"), format!("payload {i}").as_bytes()))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list().unwrap().len(), 8);
    }
}
