//! Stage advancement: one idempotent pass of one stage over the table.
//!
//! # Algorithm
//!
//! 1. Select pending samples (output unset, input set) in ascending id
//!    order, at most `max_items`.
//! 2. Walk them in batches of `batch_size`. For each sample resolve its
//!    [`ContentKey`]. The first time a key is seen in this run, fetch its
//!    input blob and run the transform; the result (or the failure) is
//!    cached for the rest of the run.
//! 3. Write the cached result to the sample, write-once-when-null.
//! 4. Commit after each batch.
//!
//! Invalid or missing content marks the key skipped and never aborts on
//! its own. A store error rolls back the open batch and aborts. So does
//! the skipped count passing the failure budget. Either way, batches
//! committed earlier stay committed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::key::{ContentKey, key_of};
use crate::sample::Sample;
use crate::stage::{Stage, StageOutput};
use crate::store::{BlobStore, RecordStore};
use crate::transform::{StageTransform, TransformInput};

/// Limits for one stage pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceOptions {
    /// Select at most this many pending samples.
    pub max_items: Option<usize>,
    /// Samples per committed batch.
    pub batch_size: usize,
    /// Largest tolerated number of skipped keys.
    pub failure_budget: usize,
}

impl AdvanceOptions {
    /// Batch size and budget from `config`, no row limit.
    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_items: None,
            batch_size: config.batch_size,
            failure_budget: config.failure_budget,
        }
    }
}

impl Default for AdvanceOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Counters for one stage pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Pending samples selected.
    pub attempted: usize,
    /// Distinct content keys transformed successfully.
    pub transformed: usize,
    /// Samples whose output column this pass filled, in committed
    /// batches only.
    pub written: usize,
    /// Distinct content keys that failed.
    pub skipped: usize,
    /// Batches committed.
    pub batches: usize,
}

impl StageReport {
    #[must_use]
    pub const fn new(stage: Stage) -> Self {
        Self {
            stage,
            attempted: 0,
            transformed: 0,
            written: 0,
            skipped: 0,
            batches: 0,
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} attempted={} transformed={} written={} skipped={} batches={}",
            self.stage.name(),
            self.attempted,
            self.transformed,
            self.written,
            self.skipped,
            self.batches
        )
    }
}

/// An aborted stage pass, with the counters reached before the abort.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct StageFailure {
    pub report: StageReport,
    pub error: PipelineError,
}

/// Run one pass of `stage`.
///
/// # Errors
///
/// Returns [`StageFailure`] carrying
/// - [`PipelineError::Store`] when a store fails,
/// - [`PipelineError::FailureBudgetExceeded`] when more keys are skipped
///   than `options.failure_budget`,
/// - [`PipelineError::InvalidConfig`] for a zero batch size or a
///   transform registered for a different stage.
pub fn advance(
    stage: Stage,
    transform: &mut dyn StageTransform,
    records: &mut dyn RecordStore,
    blobs: &mut dyn BlobStore,
    options: &AdvanceOptions,
) -> Result<StageReport, StageFailure> {
    let report = StageReport::new(stage);
    let fail = |report, error| StageFailure { report, error };
    if options.batch_size == 0 {
        return Err(fail(
            report,
            PipelineError::InvalidConfig("batch_size must be at least 1".to_string()),
        ));
    }
    if transform.stage() != stage {
        return Err(fail(
            report,
            PipelineError::InvalidConfig(format!(
                "{} transform registered for {stage}",
                transform.stage()
            )),
        ));
    }

    let mut pass = Pass {
        stage,
        transform,
        records,
        blobs,
        options,
        cache: HashMap::new(),
        report,
    };
    match pass.run() {
        Ok(()) => {
            tracing::info!(
                stage = %stage,
                attempted = pass.report.attempted,
                transformed = pass.report.transformed,
                written = pass.report.written,
                skipped = pass.report.skipped,
                batches = pass.report.batches,
                "stage complete"
            );
            Ok(pass.report)
        }
        Err(error) => {
            tracing::error!(stage = %stage, %error, written = pass.report.written, "stage aborted");
            Err(fail(pass.report, error))
        }
    }
}

/// Per-key outcome cached for the rest of a pass. `None` means skipped.
type Outcome = Option<StageOutput>;

struct Pass<'a> {
    stage: Stage,
    transform: &'a mut dyn StageTransform,
    records: &'a mut dyn RecordStore,
    blobs: &'a mut dyn BlobStore,
    options: &'a AdvanceOptions,
    cache: HashMap<ContentKey, Outcome>,
    report: StageReport,
}

impl Pass<'_> {
    fn run(&mut self) -> Result<(), PipelineError> {
        let pending = self
            .records
            .select_pending(self.stage, self.options.max_items)?;
        self.report.attempted = pending.len();
        tracing::info!(stage = %self.stage, pending = pending.len(), "stage start");

        for chunk in pending.chunks(self.options.batch_size) {
            self.records.begin()?;
            let committed = self.batch(chunk).and_then(|written| {
                self.records.commit()?;
                Ok(written)
            });
            match committed {
                Ok(written) => {
                    self.report.written += written;
                    self.report.batches += 1;
                    tracing::debug!(
                        stage = %self.stage,
                        batch = self.report.batches,
                        written,
                        "batch committed"
                    );
                }
                Err(error) => {
                    if let Err(rollback) = self.records.rollback() {
                        tracing::warn!(stage = %self.stage, %rollback, "rollback failed");
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Process one batch. Returns the number of samples written.
    fn batch(&mut self, samples: &[Sample]) -> Result<usize, PipelineError> {
        let mut written = 0;
        for sample in samples {
            let Some(key) = key_of(self.stage, sample) else {
                continue;
            };
            let outcome = match self.cache.get(&key) {
                Some(outcome) => outcome.clone(),
                None => {
                    let outcome = self.derive(&key, sample)?;
                    self.cache.insert(key, outcome.clone());
                    outcome
                }
            };
            if let Some(output) = outcome
                && self.records.apply(sample.id, &output)?
            {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Transform one content key. Store failures propagate; content
    /// failures come back as `Ok(None)` after being counted.
    fn derive(&mut self, key: &ContentKey, sample: &Sample) -> Result<Outcome, PipelineError> {
        let Some(image) = self.blobs.get(&key.image)? else {
            return self.skip(key, sample, "input blob not found");
        };
        let input = TransformInput {
            image_ref: &key.image,
            image: &image,
            question: &sample.question,
            good_answer: &sample.good_answer,
        };
        let derived = match self.transform.apply(&input) {
            Ok(derived) => derived,
            Err(e) => return self.skip(key, sample, &e.to_string()),
        };
        if derived.stage() != self.stage {
            let reason = format!("transform produced {} output", derived.stage());
            return self.skip(key, sample, &reason);
        }
        let output = derived.persist(self.blobs)?;
        self.report.transformed += 1;
        tracing::debug!(stage = %self.stage, sample = %sample.id, key = %key, "transformed");
        Ok(Some(output))
    }

    fn skip(
        &mut self,
        key: &ContentKey,
        sample: &Sample,
        reason: &str,
    ) -> Result<Outcome, PipelineError> {
        self.report.skipped += 1;
        tracing::warn!(
            stage = %self.stage,
            sample = %sample.id,
            key = %key,
            reason,
            skipped = self.report.skipped,
            "skipping content key"
        );
        if self.report.skipped > self.options.failure_budget {
            return Err(PipelineError::FailureBudgetExceeded {
                stage: self.stage,
                skipped: self.report.skipped,
                budget: self.options.failure_budget,
            });
        }
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sample::{BlobId, GraphType, NewSample};
    use crate::store::{MemoryBlobStore, MemoryRecordStore};
    use crate::error::TransformError;
    use crate::transform::{Derived, PlaceholderExplainer, Preprocessor};

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(w, h, |x, _| {
            if x % 2 == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn add(records: &mut MemoryRecordStore, raw: &BlobId, question: &str) {
        records
            .insert(&NewSample {
                source: "test".to_string(),
                graph_type: GraphType::Bar,
                question: question.to_string(),
                good_answer: "a".to_string(),
                raw_image_ref: raw.clone(),
            })
            .unwrap();
    }

    fn options(batch_size: usize, failure_budget: usize) -> AdvanceOptions {
        AdvanceOptions {
            max_items: None,
            batch_size,
            failure_budget,
        }
    }

    /// Counts calls, to check the once-per-key contract.
    struct Counting {
        inner: Preprocessor,
        calls: usize,
    }

    impl StageTransform for Counting {
        fn stage(&self) -> Stage {
            Stage::Preprocess
        }

        fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError> {
            self.calls += 1;
            self.inner.apply(input)
        }
    }

    #[test]
    fn shared_raw_image_is_transformed_once() {
        let mut records = MemoryRecordStore::new();
        let mut blobs = MemoryBlobStore::new();
        let raw = blobs.put(&png(8, 4)).unwrap();
        for q in ["q1", "q2", "q3"] {
            add(&mut records, &raw, q);
        }
        let mut transform = Counting {
            inner: Preprocessor::default(),
            calls: 0,
        };
        let report = advance(
            Stage::Preprocess,
            &mut transform,
            &mut records,
            &mut blobs,
            &options(2, 0),
        )
        .unwrap();
        assert_eq!(transform.calls, 1);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.transformed, 1);
        assert_eq!(report.written, 3);
        assert_eq!(report.batches, 2);
        // Raw image plus one normalized image.
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn max_items_limits_selection() {
        let mut records = MemoryRecordStore::new();
        let mut blobs = MemoryBlobStore::new();
        for _ in 0..4 {
            let raw = blobs.put(&png(4, 4)).unwrap();
            add(&mut records, &raw, "q");
        }
        let report = advance(
            Stage::Preprocess,
            &mut Preprocessor::default(),
            &mut records,
            &mut blobs,
            &AdvanceOptions {
                max_items: Some(3),
                ..options(10, 0)
            },
        )
        .unwrap();
        assert_eq!(report.written, 3);
        let pending = records.select_pending(Stage::Preprocess, None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.0, 4);
    }

    #[test]
    fn missing_blob_is_skipped_not_fatal() {
        let mut records = MemoryRecordStore::new();
        let mut blobs = MemoryBlobStore::new();
        add(&mut records, &BlobId::new("gone"), "q");
        add(&mut records, &BlobId::new("gone"), "q");
        let report = advance(
            Stage::Preprocess,
            &mut Preprocessor::default(),
            &mut records,
            &mut blobs,
            &options(10, 5),
        )
        .unwrap();
        assert_eq!(report.skipped, 1, "counted once per key");
        assert_eq!(report.written, 0);
        assert_eq!(report.batches, 1);
    }

    #[test]
    fn exceeding_budget_rolls_back_open_batch() {
        let mut records = MemoryRecordStore::new();
        let mut blobs = MemoryBlobStore::new();
        let good = blobs.put(&png(4, 4)).unwrap();
        add(&mut records, &good, "q");
        add(&mut records, &BlobId::new("missing-1"), "q");
        add(&mut records, &BlobId::new("missing-2"), "q");
        let failure = advance(
            Stage::Preprocess,
            &mut Preprocessor::default(),
            &mut records,
            &mut blobs,
            &options(10, 1),
        )
        .unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::FailureBudgetExceeded {
                skipped: 2,
                budget: 1,
                ..
            }
        ));
        assert_eq!(failure.report.written, 0);
        assert_eq!(
            records.select_pending(Stage::Preprocess, None).unwrap().len(),
            3
        );
    }

    #[test]
    fn mismatched_transform_is_rejected() {
        let mut records = MemoryRecordStore::new();
        let mut blobs = MemoryBlobStore::new();
        let failure = advance(
            Stage::Preprocess,
            &mut PlaceholderExplainer,
            &mut records,
            &mut blobs,
            &AdvanceOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(failure.error, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn explain_distinguishes_questions_on_one_image() {
        let mut records = MemoryRecordStore::new();
        let mut blobs = MemoryBlobStore::new();
        let raw = blobs.put(&png(4, 4)).unwrap();
        add(&mut records, &raw, "first?");
        add(&mut records, &raw, "second?");
        advance(
            Stage::Preprocess,
            &mut Preprocessor::default(),
            &mut records,
            &mut blobs,
            &AdvanceOptions::default(),
        )
        .unwrap();
        let report = advance(
            Stage::Explain,
            &mut PlaceholderExplainer,
            &mut records,
            &mut blobs,
            &AdvanceOptions::default(),
        )
        .unwrap();
        assert_eq!(report.transformed, 2);
        let samples = records.samples(None).unwrap();
        assert!(samples[0].hidden_answer.as_ref().unwrap().ends_with("first?"));
        assert!(samples[1].hidden_answer.as_ref().unwrap().ends_with("second?"));
    }

    #[test]
    fn report_display_lists_counters() {
        let report = StageReport {
            written: 3,
            ..StageReport::new(Stage::Explain)
        };
        let text = report.to_string();
        assert!(text.starts_with("explain"));
        assert!(text.contains("written=3"));
    }
}
