pub mod atomic;

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MigrateError, Result};
use crate::fingerprint::fingerprint;
use atomic::AtomicWriter;

/// On-disk snapshot of the store index, written with two-space indentation
/// so reruns can be diffed by hand.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    entries: BTreeMap<String, String>,
}

/// Content-addressed attachment store: maps logical keys to files named by
/// `fingerprint(key)` under a base directory. The index is claimed before any
/// I/O happens, which is what makes concurrent downloads of the same key safe.
pub struct AttachmentStore {
    base_path: Option<PathBuf>,
    overwrite: bool,
    index: Mutex<HashMap<String, PathBuf>>,
}

impl AttachmentStore {
    pub fn new(base_path: Option<PathBuf>, overwrite: bool) -> Self {
        Self {
            base_path,
            overwrite,
            index: Mutex::new(HashMap::new()),
        }
    }

    /// True iff an in-memory record exists for `key`.
    pub fn has_mapping(&self, key: &str) -> bool {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key)
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Claims `key` in the index and opens an atomic writer for its
    /// content-addressed destination. The claim happens before any filesystem
    /// check, under a single lock acquisition, so two racing callers can never
    /// both get a writer: the loser sees `AlreadyExists`.
    pub fn reserve_write(&self, key: &str, media_hint: &str) -> Result<AtomicWriter> {
        let base = self
            .base_path
            .as_ref()
            .ok_or_else(|| MigrateError::Config("cannot write files, no base path set".into()))?;

        let mut name = fingerprint(key);
        if let Some(ext) = extension_for_media_type(media_hint) {
            name.push('.');
            name.push_str(&ext);
        }
        let path = base.join(name);

        // The path is recorded even if the write below never happens, matching
        // load-or-store claim semantics.
        {
            let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            if index.contains_key(key) {
                return Err(MigrateError::AlreadyExists);
            }
            index.insert(key.to_string(), path.clone());
        }

        if !self.overwrite {
            match std::fs::metadata(&path) {
                Ok(_) => return Err(MigrateError::AlreadyExists),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        AtomicWriter::create(&path)
    }

    /// Resolves `key` to a path, recovering from disk if the index has no
    /// entry: a file named `fingerprint(key)` (with any extension) left by a
    /// prior run is adopted into the index instead of being re-fetched.
    pub fn scan_for_key(&self, key: &str) -> Result<PathBuf> {
        if let Some(path) = self.get_path(key) {
            return Ok(path);
        }

        let base = match &self.base_path {
            Some(b) => b,
            None => return Err(MigrateError::NotFound),
        };

        let digest = fingerprint(key);
        let mut found: Option<PathBuf> = None;
        match std::fs::read_dir(base) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if entry
                        .file_name()
                        .to_str()
                        .map(|n| n.starts_with(&digest))
                        .unwrap_or(false)
                    {
                        found = Some(entry.path());
                        break;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match found {
            Some(path) => {
                // Another caller may have recorded the key meanwhile; the
                // first recorded path wins either way.
                let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
                let recorded = index.entry(key.to_string()).or_insert(path);
                Ok(recorded.clone())
            }
            None => Err(MigrateError::NotFound),
        }
    }

    /// Merges entries from a persisted snapshot. Entries whose file no longer
    /// exists are dropped with a warning; any other stat failure is fatal.
    pub fn load_snapshot<R: Read>(&self, reader: R) -> Result<()> {
        let doc: SnapshotDoc = serde_json::from_reader(reader)?;
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        for (key, path) in doc.entries {
            match std::fs::metadata(&path) {
                Ok(_) => {
                    index.insert(key, PathBuf::from(path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("entry for {} does not exist; discarding: {}", key, path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn save_snapshot<W: Write>(&self, writer: W) -> Result<()> {
        let entries = {
            let index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            index
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string_lossy().into_owned()))
                .collect::<BTreeMap<_, _>>()
        };
        serde_json::to_writer_pretty(writer, &SnapshotDoc { entries })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const AUTO_PREFIXES: [&str; 2] = ["image/", "video/"];

fn extension_for_media_type(mt: &str) -> Option<String> {
    match mt {
        "image/jpeg" => Some("jpg".into()),
        "image/png" => Some("png".into()),
        "image/gif" => Some("gif".into()),
        _ => AUTO_PREFIXES
            .iter()
            .find(|p| mt.starts_with(*p))
            .map(|p| mt.trim_start_matches(p).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extension_table() {
        assert_eq!(extension_for_media_type("image/jpeg").as_deref(), Some("jpg"));
        assert_eq!(extension_for_media_type("image/png").as_deref(), Some("png"));
        assert_eq!(extension_for_media_type("image/gif").as_deref(), Some("gif"));
        assert_eq!(extension_for_media_type("image/webp").as_deref(), Some("webp"));
        assert_eq!(extension_for_media_type("video/mp4").as_deref(), Some("mp4"));
        assert_eq!(extension_for_media_type("application/pdf"), None);
    }

    #[test]
    fn reserve_write_then_get_path() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        let mut w = store.reserve_write("k1", "image/png")?;
        w.write_all(b"png bytes")?;
        w.close()?;

        let path = store.get_path("k1").unwrap();
        assert!(path.to_string_lossy().ends_with(".png"));
        assert_eq!(std::fs::read(&path)?, b"png bytes");
        assert!(store.has_mapping("k1"));
        Ok(())
    }

    #[test]
    fn second_reserve_fails_with_already_exists() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        let mut w = store.reserve_write("k1", "image/jpeg")?;
        w.write_all(b"first")?;
        w.close()?;

        match store.reserve_write("k1", "image/jpeg") {
            Err(MigrateError::AlreadyExists) => {}
            other => panic!("expected AlreadyExists, got {:?}", other.map(|w| w.path().to_path_buf())),
        }
        // The first write is untouched.
        assert_eq!(std::fs::read(store.get_path("k1").unwrap())?, b"first");
        Ok(())
    }

    #[test]
    fn reserve_without_base_path_is_config_error() {
        let store = AttachmentStore::new(None, false);
        assert!(matches!(
            store.reserve_write("k", "image/png"),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn overwrite_protection_respects_existing_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let digest = crate::fingerprint::fingerprint("k1");
        std::fs::write(dir.path().join(format!("{}.png", digest)), b"old")?;

        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        assert!(matches!(
            store.reserve_write("k1", "image/png"),
            Err(MigrateError::AlreadyExists)
        ));
        Ok(())
    }

    #[test]
    fn scan_recovers_file_from_prior_run() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let digest = crate::fingerprint::fingerprint("k1");
        let existing = dir.path().join(format!("{}.jpg", digest));
        std::fs::write(&existing, b"from before")?;

        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        assert!(!store.has_mapping("k1"));
        let path = store.scan_for_key("k1")?;
        assert_eq!(path, existing);
        // Mapping is recorded lazily.
        assert!(store.has_mapping("k1"));
        Ok(())
    }

    #[test]
    fn scan_unknown_key_is_not_found() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        assert!(matches!(store.scan_for_key("nope"), Err(MigrateError::NotFound)));
        Ok(())
    }

    #[test]
    fn snapshot_round_trip_drops_deleted_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        for (key, body) in [("k1", "one"), ("k2", "two")] {
            let mut w = store.reserve_write(key, "image/png")?;
            w.write_all(body.as_bytes())?;
            w.close()?;
        }

        let mut buf = Vec::new();
        store.save_snapshot(&mut buf)?;

        // Delete k2's file out-of-band; the reload should drop it.
        std::fs::remove_file(store.get_path("k2").unwrap())?;

        let restored = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        restored.load_snapshot(buf.as_slice())?;
        assert_eq!(restored.get_path("k1"), store.get_path("k1"));
        assert!(restored.get_path("k2").is_none());
        assert_eq!(restored.len(), 1);
        Ok(())
    }

    #[test]
    fn snapshot_is_two_space_indented_json() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = AttachmentStore::new(Some(dir.path().to_path_buf()), false);
        let w = store.reserve_write("k1", "")?;
        w.close()?;

        let mut buf = Vec::new();
        store.save_snapshot(&mut buf)?;
        let text = String::from_utf8(buf)?;
        assert!(text.contains("\n  \"entries\""));
        Ok(())
    }
}
