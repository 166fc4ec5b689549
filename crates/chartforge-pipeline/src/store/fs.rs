//! Filesystem blob store: one PNG file per blob.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::BlobStore;
use crate::error::StoreError;
use crate::sample::BlobId;

const EXTENSION: &str = "png";

/// Blobs stored as `<root>/<uuid>.png`.
///
/// Writes go to a temporary file in the same directory and are renamed
/// into place, so a reader never sees a partial blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the blob directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The blob directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path at which blob `id` is stored.
    ///
    /// Identifiers containing path separators are mapped to an
    /// unreachable name instead of escaping the root.
    #[must_use]
    pub fn path_of(&self, id: &BlobId) -> PathBuf {
        let name = id.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return self.root.join(".invalid");
        }
        self.root.join(format!("{name}.{EXTENSION}"))
    }
}

/// Write `bytes` to `tmp` and rename it to `path`. The temporary file is
/// removed when any step fails.
fn write_atomically(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let written = fs::File::create(tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(tmp, path));
    if written.is_err() {
        let _ = fs::remove_file(tmp);
    }
    written
}

impl BlobStore for FsBlobStore {
    fn put(&mut self, bytes: &[u8]) -> Result<BlobId, StoreError> {
        let id = BlobId::generate();
        let path = self.path_of(&id);
        let tmp = self.root.join(format!(".{id}.tmp"));
        write_atomically(&tmp, &path, bytes)?;
        tracing::trace!(blob = %id, bytes = bytes.len(), "stored blob");
        Ok(id)
    }

    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_of(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}
