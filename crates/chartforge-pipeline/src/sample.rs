//! Sample rows and the identifiers they carry.

use std::fmt;

use chartforge_normalize::PreprocessMeta;
use serde::{Deserialize, Serialize};

/// Store-assigned sample identifier. Ordering follows insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub i64);

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque blob identifier.
///
/// Identifiers are generated by the blob store and never interpreted by
/// the pipeline; two equal identifiers name the same immutable content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Wrap an identifier produced elsewhere.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, globally unique identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chart category.
///
/// Closed set with a catch-all: category is descriptive metadata, so
/// unrecognized labels map to [`GraphType::Other`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphType {
    ThreeD,
    Area,
    Bar,
    Box,
    Candle,
    Heatmap,
    Line,
    Node,
    #[default]
    Other,
    Pie,
    Radar,
    Scatter,
    Treemap,
}

impl GraphType {
    /// Every category, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::ThreeD,
        Self::Area,
        Self::Bar,
        Self::Box,
        Self::Candle,
        Self::Heatmap,
        Self::Line,
        Self::Node,
        Self::Other,
        Self::Pie,
        Self::Radar,
        Self::Scatter,
        Self::Treemap,
    ];

    /// Persisted label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThreeD => "THREE_D",
            Self::Area => "AREA",
            Self::Bar => "BAR",
            Self::Box => "BOX",
            Self::Candle => "CANDLE",
            Self::Heatmap => "HEATMAP",
            Self::Line => "LINE",
            Self::Node => "NODE",
            Self::Other => "OTHER",
            Self::Pie => "PIE",
            Self::Radar => "RADAR",
            Self::Scatter => "SCATTER",
            Self::Treemap => "TREEMAP",
        }
    }

    /// Parse a persisted label, case-insensitively. Anything unknown is
    /// [`GraphType::Other`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(label))
            .unwrap_or_default()
    }
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied at ingestion. Everything else starts unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSample {
    /// Origin dataset tag, e.g. `"ChartX"`.
    pub source: String,
    pub graph_type: GraphType,
    pub question: String,
    pub good_answer: String,
    /// The ingested source image.
    pub raw_image_ref: BlobId,
}

/// One question/answer unit and every value derived for it so far.
///
/// All `Option` fields are write-once: a stage only fills a field that is
/// currently `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub source: String,
    pub graph_type: GraphType,
    pub question: String,
    pub good_answer: String,
    pub raw_image_ref: BlobId,
    /// Normalized image, set by preprocessing.
    pub good_image_ref: Option<BlobId>,
    /// Source width before cropping, set with `good_image_ref`.
    pub original_width: Option<u32>,
    /// Source height before cropping, set with `good_image_ref`.
    pub original_height: Option<u32>,
    /// Normalization metadata, set with `good_image_ref`.
    pub preprocess_meta: Option<PreprocessMeta>,
    /// Explanation of the normalized chart.
    pub hidden_answer: Option<String>,
    /// Perturbed image derived from `good_image_ref`.
    pub adversarial_image_ref: Option<BlobId>,
    /// Model answer on the perturbed image.
    pub output_answer: Option<String>,
    /// Whether the model answer diverged from `good_answer`.
    pub attack_succeeded: Option<bool>,
}

impl Sample {
    /// A freshly ingested sample with nothing derived yet.
    #[must_use]
    pub fn ingested(id: SampleId, new: NewSample) -> Self {
        Self {
            id,
            source: new.source,
            graph_type: new.graph_type,
            question: new.question,
            good_answer: new.good_answer,
            raw_image_ref: new.raw_image_ref,
            good_image_ref: None,
            original_width: None,
            original_height: None,
            preprocess_meta: None,
            hidden_answer: None,
            adversarial_image_ref: None,
            output_answer: None,
            attack_succeeded: None,
        }
    }
}
