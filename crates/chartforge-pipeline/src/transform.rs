//! Stage transforms.
//!
//! A transform turns one stage input (an image plus the sample's QA text)
//! into a [`Derived`] value. The engine stores any produced image and
//! turns the value into the [`StageOutput`] that is written back.
//!
//! Perturbation, explanation and evaluation call external models in a
//! full deployment. The built-ins here are deterministic stand-ins that
//! keep the table shape and stage dependencies intact; real clients plug
//! in through [`StageTransform`].

use chartforge_normalize::{NormalizeConfig, NormalizedImage};

use crate::error::{StoreError, TransformError};
use crate::sample::BlobId;
use crate::stage::{Stage, StageOutput};
use crate::store::BlobStore;

/// What a transform sees for one content key.
#[derive(Debug, Clone, Copy)]
pub struct TransformInput<'a> {
    /// Identifier of the input image.
    pub image_ref: &'a BlobId,
    /// Input image bytes.
    pub image: &'a [u8],
    pub question: &'a str,
    pub good_answer: &'a str,
}

/// A transform result before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    /// Normalized chart, stored as the sample's good image.
    Normalized(NormalizedImage),
    /// Perturbed image bytes, stored as the adversarial image.
    Perturbed(Vec<u8>),
    /// Explanation text.
    Explanation(String),
    /// Model answer and whether it diverged from the expected one.
    Evaluation {
        output_answer: String,
        attack_succeeded: bool,
    },
}

impl Derived {
    /// The stage whose output this value is.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Normalized(_) => Stage::Preprocess,
            Self::Perturbed(_) => Stage::Perturb,
            Self::Explanation(_) => Stage::Explain,
            Self::Evaluation { .. } => Stage::Evaluate,
        }
    }

    /// Store any produced image and build the column values to write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the blob store rejects the image.
    pub fn persist(self, blobs: &mut dyn BlobStore) -> Result<StageOutput, StoreError> {
        Ok(match self {
            Self::Normalized(normalized) => StageOutput::Preprocessed {
                good_image_ref: blobs.put(&normalized.bytes)?,
                original_width: normalized.original.width,
                original_height: normalized.original.height,
                preprocess_meta: normalized.meta,
            },
            Self::Perturbed(bytes) => StageOutput::Perturbed {
                adversarial_image_ref: blobs.put(&bytes)?,
            },
            Self::Explanation(hidden_answer) => StageOutput::Explained { hidden_answer },
            Self::Evaluation {
                output_answer,
                attack_succeeded,
            } => StageOutput::Evaluated {
                output_answer,
                attack_succeeded,
            },
        })
    }
}

/// One stage's transform.
///
/// Must be deterministic per content key: the engine calls it once per
/// key and hands the result to every sample sharing that key.
pub trait StageTransform {
    /// Which stage this transform implements.
    fn stage(&self) -> Stage;

    /// Compute the derived value for one input.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the input is unusable. The engine
    /// skips the key for the rest of the run.
    fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError>;
}

/// Preprocessing: geometry-preserving normalization.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: NormalizeConfig,
}

impl Preprocessor {
    #[must_use]
    pub const fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }
}

impl StageTransform for Preprocessor {
    fn stage(&self) -> Stage {
        Stage::Preprocess
    }

    fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError> {
        let normalized = chartforge_normalize::normalize(input.image, &self.config)?;
        Ok(Derived::Normalized(normalized))
    }
}

/// Perturbation stand-in: the adversarial image is a copy of the good
/// image under a new identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPerturber;

impl StageTransform for IdentityPerturber {
    fn stage(&self) -> Stage {
        Stage::Perturb
    }

    fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError> {
        if input.image.is_empty() {
            return Err(TransformError::Rejected("empty image".to_string()));
        }
        Ok(Derived::Perturbed(input.image.to_vec()))
    }
}

/// Explanation stand-in: a tagged placeholder naming the image and
/// question.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderExplainer;

impl StageTransform for PlaceholderExplainer {
    fn stage(&self) -> Stage {
        Stage::Explain
    }

    fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError> {
        Ok(Derived::Explanation(format!(
            "[PLACEHOLDER] Description of chart {} for: {}",
            input.image_ref, input.question
        )))
    }
}

/// Evaluation stand-in: the model "answers" with the expected answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoEvaluator;

impl StageTransform for EchoEvaluator {
    fn stage(&self) -> Stage {
        Stage::Evaluate
    }

    fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError> {
        let output_answer = input.good_answer.to_string();
        Ok(Derived::Evaluation {
            attack_succeeded: !answers_match(&output_answer, input.good_answer),
            output_answer,
        })
    }
}

/// Answer equality used to score an attack: trimmed and case-folded.
#[must_use]
pub fn answers_match(output: &str, expected: &str) -> bool {
    output.trim().to_lowercase() == expected.trim().to_lowercase()
}

/// One transform per stage.
pub struct Transforms {
    preprocess: Box<dyn StageTransform>,
    perturb: Box<dyn StageTransform>,
    explain: Box<dyn StageTransform>,
    evaluate: Box<dyn StageTransform>,
}

impl Transforms {
    /// The built-in transforms, normalizing with `config`.
    #[must_use]
    pub fn builtin(config: NormalizeConfig) -> Self {
        Self {
            preprocess: Box::new(Preprocessor::new(config)),
            perturb: Box::new(IdentityPerturber),
            explain: Box::new(PlaceholderExplainer),
            evaluate: Box::new(EchoEvaluator),
        }
    }

    /// Replace the transform for `transform.stage()`.
    #[must_use]
    pub fn with(mut self, transform: Box<dyn StageTransform>) -> Self {
        let stage = transform.stage();
        *self.slot(stage) = transform;
        self
    }

    /// The transform for `stage`.
    pub fn get_mut(&mut self, stage: Stage) -> &mut dyn StageTransform {
        self.slot(stage).as_mut()
    }

    const fn slot(&mut self, stage: Stage) -> &mut Box<dyn StageTransform> {
        match stage {
            Stage::Preprocess => &mut self.preprocess,
            Stage::Perturb => &mut self.perturb,
            Stage::Explain => &mut self.explain,
            Stage::Evaluate => &mut self.evaluate,
        }
    }
}

impl Default for Transforms {
    fn default() -> Self {
        Self::builtin(NormalizeConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    fn input<'a>(id: &'a BlobId, image: &'a [u8]) -> TransformInput<'a> {
        TransformInput {
            image_ref: id,
            image,
            question: "What is the peak value?",
            good_answer: "42",
        }
    }

    #[test]
    fn builtins_report_their_stage() {
        let mut transforms = Transforms::default();
        for stage in Stage::ALL {
            assert_eq!(transforms.get_mut(stage).stage(), stage);
        }
    }

    #[test]
    fn preprocessor_rejects_garbage() {
        let id = BlobId::new("r");
        let result = Preprocessor::default().apply(&input(&id, b"not an image"));
        assert!(matches!(result, Err(TransformError::InvalidImage(_))));
    }

    #[test]
    fn explanation_names_image_and_question() {
        let id = BlobId::new("good-1");
        let Derived::Explanation(text) = PlaceholderExplainer.apply(&input(&id, b"x")).unwrap()
        else {
            unreachable!("explainer returns an explanation");
        };
        assert_eq!(
            text,
            "[PLACEHOLDER] Description of chart good-1 for: What is the peak value?"
        );
    }

    #[test]
    fn echo_evaluation_never_succeeds() {
        let id = BlobId::new("adv");
        let derived = EchoEvaluator.apply(&input(&id, b"x")).unwrap();
        assert_eq!(
            derived,
            Derived::Evaluation {
                output_answer: "42".to_string(),
                attack_succeeded: false,
            }
        );
    }

    #[test]
    fn answer_comparison_ignores_case_and_padding() {
        assert!(answers_match(" Yes ", "yes"));
        assert!(!answers_match("no", "yes"));
    }

    #[test]
    fn perturbed_image_gets_a_new_blob() {
        let mut blobs = MemoryBlobStore::new();
        let good = blobs.put(b"png").unwrap();
        let derived = IdentityPerturber.apply(&input(&good, b"png")).unwrap();
        let StageOutput::Perturbed {
            adversarial_image_ref,
        } = derived.persist(&mut blobs).unwrap()
        else {
            unreachable!("perturber yields a perturbed output");
        };
        assert_ne!(adversarial_image_ref, good);
        assert_eq!(
            blobs.get(&adversarial_image_ref).unwrap().as_deref(),
            Some(&b"png"[..])
        );
    }

    #[test]
    fn text_outputs_store_no_blob() {
        let mut blobs = MemoryBlobStore::new();
        let output = Derived::Explanation("e".to_string())
            .persist(&mut blobs)
            .unwrap();
        assert_eq!(output.stage(), Stage::Explain);
        assert!(blobs.is_empty());
    }

    struct Shouting;

    impl StageTransform for Shouting {
        fn stage(&self) -> Stage {
            Stage::Explain
        }

        fn apply(&mut self, input: &TransformInput<'_>) -> Result<Derived, TransformError> {
            Ok(Derived::Explanation(input.question.to_uppercase()))
        }
    }

    #[test]
    fn custom_transform_replaces_builtin() {
        let mut transforms = Transforms::default().with(Box::new(Shouting));
        let id = BlobId::new("g");
        let derived = transforms
            .get_mut(Stage::Explain)
            .apply(&input(&id, b"x"))
            .unwrap();
        assert_eq!(
            derived,
            Derived::Explanation("WHAT IS THE PEAK VALUE?".to_string())
        );
    }

    #[test]
    fn pipeline_advances_with_swapped_transform() {
        use crate::config::PipelineConfig;
        use crate::orchestrator::Pipeline;
        use crate::sample::{GraphType, NewSample};
        use crate::store::{MemoryRecordStore, RecordStore};

        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            12,
            8,
            image::Rgb([10, 20, 30]),
        ))
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();
        let mut blobs = MemoryBlobStore::new();
        let raw = blobs.put(&png.into_inner()).unwrap();
        let mut records = MemoryRecordStore::new();
        records
            .insert(&NewSample {
                source: "test".to_string(),
                graph_type: GraphType::Bar,
                question: "which year?".to_string(),
                good_answer: "2020".to_string(),
                raw_image_ref: raw,
            })
            .unwrap();

        let transforms = Transforms::builtin(NormalizeConfig::default()).with(Box::new(Shouting));
        let mut pipeline = Pipeline::new(records, blobs, PipelineConfig::default())
            .unwrap()
            .with_transforms(transforms);
        pipeline.advance(Stage::Preprocess, None).unwrap();
        let report = pipeline.advance(Stage::Explain, None).unwrap();
        assert_eq!(report.written, 1);

        let sample = pipeline.records().samples(None).unwrap().remove(0);
        assert_eq!(sample.hidden_answer.as_deref(), Some("WHICH YEAR?"));
    }
}
