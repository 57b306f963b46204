// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persists the checksum of each uploaded chunk.
//!
//! When an upload resumes after a crash, the chunks below the remote resume
//! index are read again and compared against the checksums saved here. That
//! detects local data that changed between attempts. For this to work the
//! store must survive a process restart, as [FileChecksumStore] does. The
//! default [InMemoryChecksumStore] is only useful within a single process.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

/// The checksums saved for one upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    /// The chunk size used to compute the checksums.
    pub chunk_size: u64,
    /// The checksum of each uploaded chunk, by chunk index.
    pub checksums: BTreeMap<u64, String>,
}

impl ChecksumRecord {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            checksums: BTreeMap::new(),
        }
    }
}

/// Saves chunk checksums by upload id and chunk index.
///
/// Implementations must serialize writes for the same id.
#[cfg_attr(test, mockall::automock)]
pub trait ChecksumStore: std::fmt::Debug + Send + Sync {
    /// Creates the record for `id`, unless one exists with the same chunk size.
    ///
    /// A record with a different chunk size cannot be used to validate the
    /// chunks, it is replaced by an empty record.
    fn open(&self, id: &str, chunk_size: u64) -> Result<()>;

    /// Returns the record for `id`, if any.
    fn load(&self, id: &str) -> Result<Option<ChecksumRecord>>;

    /// Returns the checksum saved for chunk `index` of `id`.
    fn get(&self, id: &str, index: u64) -> Result<Option<String>> {
        Ok(self
            .load(id)?
            .and_then(|mut r| r.checksums.remove(&index)))
    }

    /// Saves the checksum of chunk `index` of `id`.
    fn put(&self, id: &str, index: u64, checksum: &str) -> Result<()>;

    /// Removes all the checksums saved for `id`.
    fn clear(&self, id: &str) -> Result<()>;
}

// Lets applications keep a handle to the store they give to a session.
impl<T> ChecksumStore for std::sync::Arc<T>
where
    T: ChecksumStore + ?Sized,
{
    fn open(&self, id: &str, chunk_size: u64) -> Result<()> {
        T::open(self, id, chunk_size)
    }
    fn load(&self, id: &str) -> Result<Option<ChecksumRecord>> {
        T::load(self, id)
    }
    fn get(&self, id: &str, index: u64) -> Result<Option<String>> {
        T::get(self, id, index)
    }
    fn put(&self, id: &str, index: u64, checksum: &str) -> Result<()> {
        T::put(self, id, index, checksum)
    }
    fn clear(&self, id: &str) -> Result<()> {
        T::clear(self, id)
    }
}

/// Keeps the checksums in memory.
#[derive(Debug, Default)]
pub struct InMemoryChecksumStore {
    records: Mutex<HashMap<String, ChecksumRecord>>,
}

impl InMemoryChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumStore for InMemoryChecksumStore {
    fn open(&self, id: &str, chunk_size: u64) -> Result<()> {
        let mut guard = self.records.lock().expect("checksum store lock is poisoned");
        match guard.get(id) {
            Some(r) if r.chunk_size == chunk_size => {}
            _ => {
                guard.insert(id.to_string(), ChecksumRecord::new(chunk_size));
            }
        }
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<ChecksumRecord>> {
        let guard = self.records.lock().expect("checksum store lock is poisoned");
        Ok(guard.get(id).cloned())
    }

    fn put(&self, id: &str, index: u64, checksum: &str) -> Result<()> {
        let mut guard = self.records.lock().expect("checksum store lock is poisoned");
        let record = guard.get_mut(id).ok_or_else(|| not_open(id))?;
        record.checksums.insert(index, checksum.to_string());
        Ok(())
    }

    fn clear(&self, id: &str) -> Result<()> {
        self.records
            .lock()
            .expect("checksum store lock is poisoned")
            .remove(id);
        Ok(())
    }
}

const DEFAULT_DIRECTORY_NAME: &str = "resumable-upload";

/// Saves the checksums as JSON files in a directory.
///
/// Each upload id maps to a file named after the hex-encoded id.
#[derive(Debug)]
pub struct FileChecksumStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    writer: Mutex<()>,
}

impl Default for FileChecksumStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_DIRECTORY_NAME))
    }
}

impl FileChecksumStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.path.join(format!("{}.json", hex::encode(id)))
    }

    fn read(&self, id: &str) -> Result<Option<ChecksumRecord>> {
        let contents = match std::fs::read(self.path_of(id)) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(e)),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(Error::storage)
    }

    fn write(&self, id: &str, record: &ChecksumRecord) -> Result<()> {
        std::fs::create_dir_all(&self.path).map_err(Error::storage)?;
        let contents = serde_json::to_vec(record).map_err(Error::storage)?;
        // Write and rename so a crash never leaves a truncated record.
        let target = self.path_of(id);
        let tmp = target.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(Error::storage)?;
        std::fs::rename(&tmp, &target).map_err(Error::storage)
    }
}

impl ChecksumStore for FileChecksumStore {
    fn open(&self, id: &str, chunk_size: u64) -> Result<()> {
        let _guard = self.writer.lock().expect("checksum store lock is poisoned");
        match self.read(id)? {
            Some(r) if r.chunk_size == chunk_size => Ok(()),
            _ => self.write(id, &ChecksumRecord::new(chunk_size)),
        }
    }

    fn load(&self, id: &str) -> Result<Option<ChecksumRecord>> {
        self.read(id)
    }

    fn put(&self, id: &str, index: u64, checksum: &str) -> Result<()> {
        let _guard = self.writer.lock().expect("checksum store lock is poisoned");
        let mut record = self.read(id)?.ok_or_else(|| not_open(id))?;
        record.checksums.insert(index, checksum.to_string());
        self.write(id, &record)
    }

    fn clear(&self, id: &str) -> Result<()> {
        let _guard = self.writer.lock().expect("checksum store lock is poisoned");
        match std::fs::remove_file(self.path_of(id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::storage(e)),
            _ => Ok(()),
        }
    }
}

fn not_open(id: &str) -> Error {
    Error::storage(format!("no checksum record for upload {id}, call open() first"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CHUNK: u64 = 262144;

    fn exercise(store: &dyn ChecksumStore) -> anyhow::Result<()> {
        assert_eq!(store.load("id")?, None);
        let err = store.put("id", 0, "AAAAAA==").expect_err("not open");
        assert!(matches!(err, Error::Storage(_)), "{err:?}");

        store.open("id", CHUNK)?;
        assert_eq!(store.load("id")?, Some(ChecksumRecord::new(CHUNK)));
        store.put("id", 0, "c0")?;
        store.put("id", 1, "c1")?;
        assert_eq!(store.get("id", 0)?.as_deref(), Some("c0"));
        assert_eq!(store.get("id", 1)?.as_deref(), Some("c1"));
        assert_eq!(store.get("id", 2)?, None);

        // Re-opening with the same chunk size keeps the record.
        store.open("id", CHUNK)?;
        assert_eq!(store.get("id", 1)?.as_deref(), Some("c1"));

        // Ids are independent.
        store.open("other", CHUNK)?;
        store.put("other", 0, "x0")?;
        store.clear("id")?;
        assert_eq!(store.load("id")?, None);
        assert_eq!(store.get("other", 0)?.as_deref(), Some("x0"));

        // Clearing a missing record is not an error.
        store.clear("id")?;

        // A different chunk size discards the saved checksums.
        store.open("other", 2 * CHUNK)?;
        assert_eq!(store.load("other")?, Some(ChecksumRecord::new(2 * CHUNK)));
        Ok(())
    }

    #[test]
    fn in_memory() -> anyhow::Result<()> {
        exercise(&InMemoryChecksumStore::new())
    }

    #[test]
    fn file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        exercise(&FileChecksumStore::new(dir.path().join("nested")))
    }

    #[test]
    fn file_survives_restart() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let store = FileChecksumStore::new(dir.path());
            store.open("gs://bucket/object", CHUNK)?;
            store.put("gs://bucket/object", 0, "c0")?;
        }
        let store = FileChecksumStore::new(dir.path());
        let record = store.load("gs://bucket/object")?.expect("record is saved");
        assert_eq!(record.chunk_size, CHUNK);
        assert_eq!(record.checksums.get(&0).map(String::as_str), Some("c0"));
        Ok(())
    }

    #[test]
    fn file_corrupted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileChecksumStore::new(dir.path());
        std::fs::write(store.path_of("id"), "not json")?;
        let err = store.load("id").expect_err("corrupted record");
        assert!(matches!(err, Error::Storage(_)), "{err:?}");
        Ok(())
    }
}
