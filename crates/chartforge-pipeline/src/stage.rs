//! Stage identifiers, their dependency graph, and the values each one
//! writes back.
//!
//! ```text
//! ingested ──> Preprocess ──> Perturb ──> Evaluate
//!                   │
//!                   └───────> Explain
//! ```

use std::fmt;

use chartforge_normalize::PreprocessMeta;
use serde::{Deserialize, Serialize};

use crate::sample::{BlobId, Sample};

/// One idempotent derivation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Normalize the raw image.
    Preprocess,
    /// Derive the adversarial image from the normalized one.
    Perturb,
    /// Explain the normalized chart.
    Explain,
    /// Ask the target model about the adversarial image.
    Evaluate,
}

impl Stage {
    /// All stages in a valid dependency order.
    pub const ALL: [Self; 4] = [Self::Preprocess, Self::Perturb, Self::Explain, Self::Evaluate];

    /// Stable lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Perturb => "perturb",
            Self::Explain => "explain",
            Self::Evaluate => "evaluate",
        }
    }

    /// Stage whose output this stage consumes. `None` means ingestion.
    #[must_use]
    pub const fn depends_on(self) -> Option<Self> {
        match self {
            Self::Preprocess => None,
            Self::Perturb | Self::Explain => Some(Self::Preprocess),
            Self::Evaluate => Some(Self::Perturb),
        }
    }

    /// Column whose null-ness marks a sample as pending for this stage.
    #[must_use]
    pub const fn output_column(self) -> &'static str {
        match self {
            Self::Preprocess => "good_image_ref",
            Self::Perturb => "adversarial_image_ref",
            Self::Explain => "hidden_answer",
            Self::Evaluate => "output_answer",
        }
    }

    /// Image column the stage reads.
    #[must_use]
    pub const fn input_column(self) -> &'static str {
        match self {
            Self::Preprocess => "raw_image_ref",
            Self::Perturb | Self::Explain => "good_image_ref",
            Self::Evaluate => "adversarial_image_ref",
        }
    }

    /// The image this stage reads for `sample`, if it is available yet.
    #[must_use]
    pub fn input_ref(self, sample: &Sample) -> Option<&BlobId> {
        match self {
            Self::Preprocess => Some(&sample.raw_image_ref),
            Self::Perturb | Self::Explain => sample.good_image_ref.as_ref(),
            Self::Evaluate => sample.adversarial_image_ref.as_ref(),
        }
    }

    /// Returns `true` if the stage's output is unset on `sample`.
    #[must_use]
    pub const fn output_is_unset(self, sample: &Sample) -> bool {
        match self {
            Self::Preprocess => sample.good_image_ref.is_none(),
            Self::Perturb => sample.adversarial_image_ref.is_none(),
            Self::Explain => sample.hidden_answer.is_none(),
            Self::Evaluate => sample.output_answer.is_none(),
        }
    }

    /// Returns `true` if the stage would select `sample`: its output is
    /// unset and its input is present.
    #[must_use]
    pub fn is_pending(self, sample: &Sample) -> bool {
        self.output_is_unset(sample) && self.input_ref(sample).is_some()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Values a stage writes for one sample.
///
/// Applying an output is write-once-when-null per column: a column that
/// already holds a value keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutput {
    Preprocessed {
        good_image_ref: BlobId,
        original_width: u32,
        original_height: u32,
        preprocess_meta: PreprocessMeta,
    },
    Perturbed {
        adversarial_image_ref: BlobId,
    },
    Explained {
        hidden_answer: String,
    },
    Evaluated {
        output_answer: String,
        attack_succeeded: bool,
    },
}

impl StageOutput {
    /// The stage that produces this output.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Preprocessed { .. } => Stage::Preprocess,
            Self::Perturbed { .. } => Stage::Perturb,
            Self::Explained { .. } => Stage::Explain,
            Self::Evaluated { .. } => Stage::Evaluate,
        }
    }

    /// Fill the unset columns of `sample`. Returns `true` if the stage's
    /// output column was unset and is now written.
    pub fn apply_to(&self, sample: &mut Sample) -> bool {
        let was_unset = self.stage().output_is_unset(sample);
        match self {
            Self::Preprocessed {
                good_image_ref,
                original_width,
                original_height,
                preprocess_meta,
            } => {
                sample
                    .good_image_ref
                    .get_or_insert_with(|| good_image_ref.clone());
                sample.original_width.get_or_insert(*original_width);
                sample.original_height.get_or_insert(*original_height);
                sample
                    .preprocess_meta
                    .get_or_insert_with(|| preprocess_meta.clone());
            }
            Self::Perturbed {
                adversarial_image_ref,
            } => {
                sample
                    .adversarial_image_ref
                    .get_or_insert_with(|| adversarial_image_ref.clone());
            }
            Self::Explained { hidden_answer } => {
                sample
                    .hidden_answer
                    .get_or_insert_with(|| hidden_answer.clone());
            }
            Self::Evaluated {
                output_answer,
                attack_succeeded,
            } => {
                sample
                    .output_answer
                    .get_or_insert_with(|| output_answer.clone());
                sample.attack_succeeded.get_or_insert(*attack_succeeded);
            }
        }
        was_unset
    }
}
