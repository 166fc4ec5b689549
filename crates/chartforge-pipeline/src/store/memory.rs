//! In-process stores.

use std::collections::{BTreeMap, HashMap};

use super::{BlobStore, RecordStore};
use crate::error::StoreError;
use crate::sample::{BlobId, NewSample, Sample, SampleId};
use crate::stage::{Stage, StageOutput};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<SampleId, Sample>,
    next_id: i64,
}

/// Sample table held in a `BTreeMap`, so iteration is in id order.
///
/// A batch snapshots the table on [`begin`](RecordStore::begin) and
/// restores it on [`rollback`](RecordStore::rollback).
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    table: Table,
    snapshot: Option<Table>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert(&mut self, sample: &NewSample) -> Result<SampleId, StoreError> {
        self.table.next_id += 1;
        let id = SampleId(self.table.next_id);
        self.table
            .rows
            .insert(id, Sample::ingested(id, sample.clone()));
        Ok(id)
    }

    fn get(&self, id: SampleId) -> Result<Option<Sample>, StoreError> {
        Ok(self.table.rows.get(&id).cloned())
    }

    fn samples(&self, limit: Option<usize>) -> Result<Vec<Sample>, StoreError> {
        Ok(self
            .table
            .rows
            .values()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn select_pending(
        &self,
        stage: Stage,
        limit: Option<usize>,
    ) -> Result<Vec<Sample>, StoreError> {
        Ok(self
            .table
            .rows
            .values()
            .filter(|s| stage.is_pending(s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn apply(&mut self, id: SampleId, output: &StageOutput) -> Result<bool, StoreError> {
        Ok(self
            .table
            .rows
            .get_mut(&id)
            .is_some_and(|sample| output.apply_to(sample)))
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.snapshot = Some(self.table.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(snapshot) = self.snapshot.take() {
            self.table = snapshot;
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.table = Table::default();
        self.snapshot = None;
        Ok(())
    }
}

/// Blob map keyed by generated identifiers.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<BlobId, Vec<u8>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under a caller-chosen identifier. Test fixtures use
    /// this to give blobs readable names.
    pub fn insert(&mut self, id: BlobId, bytes: Vec<u8>) {
        self.blobs.insert(id, bytes);
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, bytes: &[u8]) -> Result<BlobId, StoreError> {
        let id = BlobId::generate();
        self.blobs.insert(id.clone(), bytes.to_vec());
        Ok(id)
    }

    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.get(id).cloned())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.blobs.clear();
        Ok(())
    }
}
