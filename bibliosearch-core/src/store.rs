use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::warn;

use crate::model::BookId;
use crate::reader::ReaderPosition;

pub trait StateStore: Send + Sync {
    fn load(&self, book_id: BookId) -> Result<Option<ReaderPosition>>;
    fn save(&self, position: &ReaderPosition) -> Result<()>;
}

/// One JSON file per book under a state directory.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, book_id: BookId) -> PathBuf {
        self.root.join(format!("{}.json", book_id))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, book_id: BookId) -> Result<Option<ReaderPosition>> {
        let path = self.state_path(book_id);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)
            .with_context(|| format!("failed to read state file {:?}", path))?;
        match serde_json::from_str(&buf) {
            Ok(position) => Ok(Some(position)),
            Err(err) => {
                warn!(?path, %err, "ignoring unreadable reading position");
                Ok(None)
            }
        }
    }

    fn save(&self, position: &ReaderPosition) -> Result<()> {
        let path = self.state_path(position.book_id);
        let payload = serde_json::to_string_pretty(position)?;
        write_atomically(&path, payload.as_bytes())
    }
}

/// Writes through a sibling temp file so readers never see half a document.
pub(crate) fn write_atomically(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)
        .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
    file.write_all(payload)?;
    file.flush()?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {:?}", path))?;
    Ok(())
}

pub struct MemoryStateStore {
    inner: Mutex<HashMap<BookId, ReaderPosition>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, book_id: BookId) -> Result<Option<ReaderPosition>> {
        Ok(self.inner.lock().get(&book_id).cloned())
    }

    fn save(&self, position: &ReaderPosition) -> Result<()> {
        self.inner
            .lock()
            .insert(position.book_id, position.clone());
        Ok(())
    }
}
