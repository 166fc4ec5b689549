//! Error types.
//!
//! Per-item failures ([`TransformError`], [`IngestError`]) are absorbed
//! by the caller and counted. Store failures ([`StoreError`]) and budget
//! overruns abort the run and surface as [`PipelineError`].

use std::path::PathBuf;

use chartforge_normalize::InvalidImage;

use crate::stage::Stage;

/// Failure of the record store or blob store.
///
/// Always fatal for the current run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The SQLite record store failed.
    #[error("record store: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The filesystem blob store failed.
    #[error("blob store: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("metadata column: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row violates the schema.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The database was written by a newer schema.
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Failure of one stage transform on one content key.
///
/// The engine marks the key skipped for the rest of the run.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The input image cannot be normalized.
    #[error(transparent)]
    InvalidImage(#[from] InvalidImage),

    /// The transform refused its input for another reason.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Failure to ingest one dataset record.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// An image file or manifest could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest line is not a valid record.
    #[error("manifest line {line}: {source}")]
    Manifest {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The record has no usable image.
    #[error("record {0} has an empty image")]
    EmptyImage(String),

    /// The record has no question or answer.
    #[error("record {0} is missing its question or answer")]
    MissingQa(String),
}

/// Run-level error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A store failed. Completed batches stay committed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// More content keys failed than the failure budget allows.
    #[error(
        "{stage}: {skipped} failures exceed the failure budget of {budget}; aborting run"
    )]
    FailureBudgetExceeded {
        stage: Stage,
        skipped: usize,
        budget: usize,
    },

    /// More dataset records failed to ingest than the budget allows.
    #[error("ingest: {failed} failures exceed the failure budget of {budget}; aborting")]
    IngestBudgetExceeded { failed: usize, budget: usize },

    /// The dataset source itself could not be read.
    #[error(transparent)]
    Source(#[from] IngestError),

    /// A configuration value is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Returns `true` for the systemic-failure class: too many per-item
    /// failures rather than one broken dependency.
    #[must_use]
    pub const fn is_budget_exceeded(&self) -> bool {
        matches!(
            self,
            Self::FailureBudgetExceeded { .. } | Self::IngestBudgetExceeded { .. }
        )
    }
}
