//! Pipeline orchestration: stage sequencing, the per-invocation failure
//! budget, and the store-owning [`Pipeline`] facade.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::engine::{AdvanceOptions, StageFailure, StageReport, advance};
use crate::error::{PipelineError, StoreError};
use crate::ingest::{DatasetSource, IngestOptions, IngestReport, ingest};
use crate::stage::Stage;
use crate::store::{self, BlobStore, RecordStore};
use crate::transform::Transforms;
use crate::verify::{VerifyReport, verify};

/// Order `requested` by dependency and drop duplicates. An empty request
/// means every stage.
#[must_use]
pub fn plan(requested: &[Stage]) -> Vec<Stage> {
    if requested.is_empty() {
        return Stage::ALL.to_vec();
    }
    Stage::ALL
        .into_iter()
        .filter(|stage| requested.contains(stage))
        .collect()
}

/// Per-stage counters of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub reports: Vec<StageReport>,
}

impl RunSummary {
    /// Samples written across all stages.
    #[must_use]
    pub fn written(&self) -> usize {
        self.reports.iter().map(|r| r.written).sum()
    }

    /// Content keys skipped across all stages.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.reports.iter().map(|r| r.skipped).sum()
    }

    /// The report for `stage`, if it ran.
    #[must_use]
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }
}

/// An aborted invocation. `summary` holds every stage that ran,
/// including the partial counters of the one that failed.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub summary: RunSummary,
    pub error: PipelineError,
}

impl RunFailure {
    fn before_start(error: impl Into<PipelineError>) -> Self {
        Self {
            summary: RunSummary::default(),
            error: error.into(),
        }
    }
}

/// Run `stages` in dependency order.
///
/// The failure budget covers the whole invocation: each stage gets what
/// earlier stages left of it. Nothing is retried.
///
/// # Errors
///
/// Returns [`RunFailure`] on the first stage that aborts. Later stages do
/// not run.
pub fn run_stages(
    stages: &[Stage],
    transforms: &mut Transforms,
    records: &mut dyn RecordStore,
    blobs: &mut dyn BlobStore,
    config: &PipelineConfig,
    max_items: Option<usize>,
) -> Result<RunSummary, RunFailure> {
    config.validate().map_err(RunFailure::before_start)?;
    let mut summary = RunSummary::default();

    for stage in plan(stages) {
        let skipped_so_far = summary.skipped();
        let options = AdvanceOptions {
            max_items,
            batch_size: config.batch_size,
            failure_budget: config.failure_budget.saturating_sub(skipped_so_far),
        };
        match advance(stage, transforms.get_mut(stage), records, blobs, &options) {
            Ok(report) => summary.reports.push(report),
            Err(StageFailure { report, error }) => {
                let error = match error {
                    PipelineError::FailureBudgetExceeded { stage, .. } => {
                        PipelineError::FailureBudgetExceeded {
                            stage,
                            skipped: skipped_so_far + report.skipped,
                            budget: config.failure_budget,
                        }
                    }
                    other => other,
                };
                summary.reports.push(report);
                return Err(RunFailure { summary, error });
            }
        }
    }

    tracing::info!(
        stages = summary.reports.len(),
        written = summary.written(),
        skipped = summary.skipped(),
        "run complete"
    );
    Ok(summary)
}

/// A record store, a blob store, transforms and configuration bundled
/// for the common entry points.
pub struct Pipeline<R, B> {
    records: R,
    blobs: B,
    transforms: Transforms,
    config: PipelineConfig,
}

impl<R: RecordStore, B: BlobStore> Pipeline<R, B> {
    /// Build a pipeline with the built-in transforms.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` is invalid.
    pub fn new(records: R, blobs: B, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            transforms: Transforms::builtin(config.normalize.clone()),
            records,
            blobs,
            config,
        })
    }

    /// Replace the transform set.
    #[must_use]
    pub fn with_transforms(mut self, transforms: Transforms) -> Self {
        self.transforms = transforms;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub const fn records(&self) -> &R {
        &self.records
    }

    #[must_use]
    pub const fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Give back the stores.
    pub fn into_parts(self) -> (R, B) {
        (self.records, self.blobs)
    }

    /// Ingest records from `source`.
    ///
    /// # Errors
    ///
    /// See [`ingest`].
    pub fn ingest(
        &mut self,
        source: &mut dyn DatasetSource,
        max_records: Option<usize>,
    ) -> Result<IngestReport, PipelineError> {
        let options = IngestOptions {
            max_records,
            failure_budget: self.config.failure_budget,
        };
        ingest(source, &mut self.records, &mut self.blobs, &options)
    }

    /// Run one pass of `stage`.
    ///
    /// # Errors
    ///
    /// See [`advance`].
    pub fn advance(
        &mut self,
        stage: Stage,
        max_items: Option<usize>,
    ) -> Result<StageReport, StageFailure> {
        let options = AdvanceOptions {
            max_items,
            ..AdvanceOptions::from_config(&self.config)
        };
        advance(
            stage,
            self.transforms.get_mut(stage),
            &mut self.records,
            &mut self.blobs,
            &options,
        )
    }

    /// Run `stages` (all when empty) in dependency order.
    ///
    /// # Errors
    ///
    /// See [`run_stages`].
    pub fn run(
        &mut self,
        stages: &[Stage],
        max_items: Option<usize>,
    ) -> Result<RunSummary, RunFailure> {
        run_stages(
            stages,
            &mut self.transforms,
            &mut self.records,
            &mut self.blobs,
            &self.config,
            max_items,
        )
    }

    /// Check stored samples and images.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a store cannot be read.
    pub fn verify(&self, limit: Option<usize>) -> Result<VerifyReport, StoreError> {
        verify(&self.records, &self.blobs, limit)
    }

    /// Wipe every sample and every blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either store cannot be cleared.
    pub fn clean(&mut self) -> Result<(), StoreError> {
        store::clean(&mut self.records, &mut self.blobs)
    }
}
