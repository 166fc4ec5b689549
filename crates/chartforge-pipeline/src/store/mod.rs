//! Record and blob store interfaces.
//!
//! The engine only needs a handful of operations from each store: select
//! pending rows in id order, write a stage's columns only where they are
//! still null, group writes into batches, and put/get immutable blobs.
//! Wire protocols of real backends stay behind these traits.

mod fs;
mod memory;
mod sqlite;

pub use fs::FsBlobStore;
pub use memory::{MemoryBlobStore, MemoryRecordStore};
pub use sqlite::{SCHEMA_VERSION, SqliteRecordStore};

use crate::error::StoreError;
use crate::sample::{BlobId, NewSample, Sample, SampleId};
use crate::stage::{Stage, StageOutput};

/// Persisted sample table.
pub trait RecordStore {
    /// Insert a freshly ingested sample and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be written.
    fn insert(&mut self, sample: &NewSample) -> Result<SampleId, StoreError>;

    /// Fetch one sample.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn get(&self, id: SampleId) -> Result<Option<Sample>, StoreError>;

    /// Samples in ascending id order, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn samples(&self, limit: Option<usize>) -> Result<Vec<Sample>, StoreError>;

    /// Samples pending for `stage` (output unset, input set) in ascending
    /// id order, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn select_pending(&self, stage: Stage, limit: Option<usize>)
    -> Result<Vec<Sample>, StoreError>;

    /// Write `output` to sample `id`, filling only columns that are null.
    ///
    /// Returns `true` if the stage's output column was null and is now
    /// set. Returns `false` if another writer got there first or the
    /// sample does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be written.
    fn apply(&mut self, id: SampleId, output: &StageOutput) -> Result<bool, StoreError>;

    /// Open a batch. Writes until [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback) become visible together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch cannot be opened.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Make the open batch durable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the commit fails.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard the open batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the rollback fails.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Delete every sample and reset id assignment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be written.
    fn wipe(&mut self) -> Result<(), StoreError>;
}

/// Immutable image blob storage.
pub trait BlobStore {
    /// Store `bytes` under a fresh, globally unique identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the blob cannot be written.
    fn put(&mut self, bytes: &[u8]) -> Result<BlobId, StoreError>;

    /// Fetch a blob. `Ok(None)` means not found.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any failure other than not found.
    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete every blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be cleared.
    fn wipe(&mut self) -> Result<(), StoreError>;
}

/// Wipe both stores. Records go first so no row is left pointing at a
/// deleted blob if the blob wipe fails.
///
/// # Errors
///
/// Returns the first [`StoreError`] encountered.
pub fn clean(records: &mut dyn RecordStore, blobs: &mut dyn BlobStore) -> Result<(), StoreError> {
    records.wipe()?;
    blobs.wipe()?;
    tracing::info!("wiped sample table and blob store");
    Ok(())
}
