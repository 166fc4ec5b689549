//! chartforge-pipeline: deduplicating, idempotent stage advancement over
//! a table of chart question/answer samples.
//!
//! Every sample starts with a raw chart image and a QA pair. Stages
//! derive further columns from earlier ones:
//!
//! ```text
//! raw_image_ref ──preprocess──> good_image_ref ──perturb──> adversarial_image_ref ──evaluate──> output_answer
//!                                     │
//!                                     └──explain──> hidden_answer
//! ```
//!
//! A stage pass ([`engine::advance`]) selects the samples whose output is
//! still unset, transforms each distinct [`key::ContentKey`] once, and
//! writes the result to every sample sharing the key. Writes only fill
//! null columns, so re-running a stage over a growing table never
//! redoes or changes completed work.

pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod key;
pub mod orchestrator;
pub mod sample;
pub mod stage;
pub mod store;
pub mod transform;
pub mod verify;

pub use config::PipelineConfig;
pub use engine::{AdvanceOptions, StageFailure, StageReport, advance};
pub use error::{IngestError, PipelineError, StoreError, TransformError};
pub use ingest::{
    DatasetKind, DatasetRecord, DatasetSource, IngestOptions, IngestReport, ManifestSource, ingest,
};
pub use key::{ContentKey, key_of};
pub use orchestrator::{Pipeline, RunFailure, RunSummary, plan, run_stages};
pub use sample::{BlobId, GraphType, NewSample, Sample, SampleId};
pub use stage::{Stage, StageOutput};
pub use store::{
    BlobStore, FsBlobStore, MemoryBlobStore, MemoryRecordStore, RecordStore, SqliteRecordStore,
};
pub use transform::{Derived, StageTransform, TransformInput, Transforms};
pub use verify::{VerifyReport, verify};
