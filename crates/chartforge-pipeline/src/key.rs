//! Content keys: which samples may share one transform result.
//!
//! A key is a pure projection of the columns a stage's transform reads.
//! Image-only stages key on the input image alone, so every QA row that
//! points at one chart shares a single result. Stages whose output also
//! depends on the question (explanation) or on the expected answer
//! (evaluation) include those in the key, so rows only share a result
//! when the transform would have computed the same value anyway.

use std::fmt;

use crate::sample::{BlobId, Sample};
use crate::stage::Stage;

/// Equal for two samples iff a stage would compute the same result for
/// both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    /// Image the transform reads.
    pub image: BlobId,
    /// Question text, for question-dependent stages.
    pub question: Option<String>,
    /// Expected answer, for stages that compare against it.
    pub good_answer: Option<String>,
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.image.as_str())?;
        if let Some(q) = &self.question {
            write!(f, " q={q:?}")?;
        }
        if let Some(a) = &self.good_answer {
            write!(f, " a={a:?}")?;
        }
        Ok(())
    }
}

/// Resolve the content key of `sample` for `stage`.
///
/// Returns `None` if the stage's input image is not set yet.
#[must_use]
pub fn key_of(stage: Stage, sample: &Sample) -> Option<ContentKey> {
    let image = stage.input_ref(sample)?.clone();
    let (question, good_answer) = match stage {
        Stage::Preprocess | Stage::Perturb => (None, None),
        Stage::Explain => (Some(sample.question.clone()), None),
        Stage::Evaluate => (
            Some(sample.question.clone()),
            Some(sample.good_answer.clone()),
        ),
    };
    Some(ContentKey {
        image,
        question,
        good_answer,
    })
}
