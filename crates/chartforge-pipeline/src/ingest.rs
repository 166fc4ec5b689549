//! Dataset ingestion.
//!
//! Each dataset record becomes one sample. Images are stored once per
//! dataset-relative path, so every QA row that names the same chart file
//! starts out with the same `raw_image_ref`. That is what lets the stage
//! engine share one transform result across them later.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, PipelineError};
use crate::sample::{BlobId, GraphType, NewSample};
use crate::store::{BlobStore, RecordStore};

/// Known dataset layouts. Each has its own chart category vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    ChartX,
    ChartBench,
    ChartQaX,
    /// Labels are already [`GraphType`] names.
    Generic,
}

impl DatasetKind {
    /// Source tag written to each sample.
    #[must_use]
    pub const fn source_name(self) -> &'static str {
        match self {
            Self::ChartX => "ChartX",
            Self::ChartBench => "ChartBench",
            Self::ChartQaX => "ChartQA-X",
            Self::Generic => "generic",
        }
    }

    /// Map a dataset chart label onto a [`GraphType`]. `None` means the
    /// label is not in this dataset's vocabulary.
    #[must_use]
    pub fn graph_type(self, label: &str) -> Option<GraphType> {
        let label = label.trim();
        match self {
            Self::ChartX => chartx_graph_type(label),
            Self::ChartBench => chartbench_graph_type(label),
            Self::ChartQaX => chartqax_graph_type(&strip_numeric_suffixes(label)),
            Self::Generic => GraphType::ALL
                .into_iter()
                .find(|t| t.as_str().eq_ignore_ascii_case(label)),
        }
    }
}

fn chartx_graph_type(label: &str) -> Option<GraphType> {
    Some(match label {
        "3D-Bar" => GraphType::ThreeD,
        "bar_chart" | "bar_chart_num" | "histogram" | "funnel" => GraphType::Bar,
        "candlestick" => GraphType::Candle,
        "multi-axes" => GraphType::Other,
        "rings" | "pie_chart" => GraphType::Pie,
        "area_chart" => GraphType::Area,
        "box" => GraphType::Box,
        "line_chart" | "line_chart_num" => GraphType::Line,
        "rose" | "radar" => GraphType::Radar,
        "bubble" => GraphType::Scatter,
        "heatmap" => GraphType::Heatmap,
        "treemap" => GraphType::Treemap,
        _ => return None,
    })
}

fn chartbench_graph_type(label: &str) -> Option<GraphType> {
    Some(match label {
        "area" => GraphType::Area,
        "bar" => GraphType::Bar,
        "box" => GraphType::Box,
        "combination" => GraphType::Other,
        "line" => GraphType::Line,
        "node_link" => GraphType::Node,
        "pie" => GraphType::Pie,
        "radar" => GraphType::Radar,
        "scatter" => GraphType::Scatter,
        _ => return None,
    })
}

fn chartqax_graph_type(label: &str) -> Option<GraphType> {
    match label {
        "two_col" | "multi_col" => Some(GraphType::Bar),
        _ => None,
    }
}

/// Drop every `_<digits>` run, e.g. `two_col_1234` -> `two_col`.
fn strip_numeric_suffixes(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut rest = label;
    while let Some(pos) = rest.find('_') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            out.push('_');
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

/// One dataset row as listed by its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Dataset-relative image path. Also the pre-ingestion dedup key.
    pub image: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    /// Dataset-specific chart category label.
    #[serde(default)]
    pub chart_type: Option<String>,
}

impl DatasetRecord {
    /// Path key with a leading `./` removed, so `./a.png` and `a.png`
    /// dedup together.
    #[must_use]
    pub fn path_key(&self) -> &str {
        let mut key = self.image.as_str();
        while let Some(rest) = key.strip_prefix("./") {
            key = rest;
        }
        key
    }
}

/// Where dataset records come from.
pub trait DatasetSource {
    /// Source tag written to each sample.
    fn name(&self) -> &str;

    /// Category vocabulary used by [`DatasetRecord::chart_type`].
    fn kind(&self) -> DatasetKind;

    /// The next record, `None` when exhausted. A malformed record is an
    /// `Err` item; iteration may continue after it.
    fn next_record(&mut self) -> Option<Result<DatasetRecord, IngestError>>;

    /// Image bytes for `record`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the image cannot be read.
    fn resolve_image(&self, record: &DatasetRecord) -> Result<Vec<u8>, IngestError>;

    /// Question and expected answer for `record`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MissingQa`] if either is absent or blank.
    fn resolve_qa(&self, record: &DatasetRecord) -> Result<(String, String), IngestError> {
        match (record.question.as_deref(), record.answer.as_deref()) {
            (Some(q), Some(a)) if !q.trim().is_empty() && !a.trim().is_empty() => {
                Ok((q.to_string(), a.to_string()))
            }
            _ => Err(IngestError::MissingQa(record.image.clone())),
        }
    }
}

/// JSON-lines manifest: one [`DatasetRecord`] object per line, image
/// paths relative to the manifest's directory.
///
/// ```text
/// {"image": "png/bar_12.png", "question": "Which year peaked?", "answer": "2019", "chart_type": "bar_chart"}
/// ```
#[derive(Debug)]
pub struct ManifestSource {
    name: String,
    kind: DatasetKind,
    base: PathBuf,
    lines: std::vec::IntoIter<(usize, String)>,
}

impl ManifestSource {
    /// Read the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Read`] if the file cannot be read.
    pub fn open(path: &Path, kind: DatasetKind) -> Result<Self, IngestError> {
        let text = fs::read_to_string(path).map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let lines: Vec<_> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| (i + 1, line.to_string()))
            .collect();
        Ok(Self {
            name: kind.source_name().to_string(),
            kind,
            base: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            lines: lines.into_iter(),
        })
    }

    /// Override the source tag.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl DatasetSource for ManifestSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DatasetKind {
        self.kind
    }

    fn next_record(&mut self) -> Option<Result<DatasetRecord, IngestError>> {
        let (line, text) = self.lines.next()?;
        Some(serde_json::from_str(&text).map_err(|source| IngestError::Manifest { line, source }))
    }

    fn resolve_image(&self, record: &DatasetRecord) -> Result<Vec<u8>, IngestError> {
        let path = self.base.join(record.path_key());
        fs::read(&path).map_err(|source| IngestError::Read { path, source })
    }
}

/// Limits for one ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Stop after inserting this many samples.
    pub max_records: Option<usize>,
    /// Largest tolerated number of failed records.
    pub failure_budget: usize,
}

/// Ingestion counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Samples inserted.
    pub inserted: usize,
    /// Records that could not be ingested.
    pub failed: usize,
    /// Distinct image paths stored.
    pub unique_images: usize,
    /// Chart labels outside the dataset's vocabulary, stored as `OTHER`.
    pub unknown_labels: Vec<String>,
}

/// Ingest records from `source` until it is exhausted or
/// `max_records` samples are inserted.
///
/// Everything is inserted in one batch: an abort leaves no samples
/// behind. Blobs already stored stay in the blob store.
///
/// # Errors
///
/// - [`PipelineError::IngestBudgetExceeded`] when more records fail than
///   the budget allows.
/// - [`PipelineError::Store`] when a store fails.
pub fn ingest(
    source: &mut dyn DatasetSource,
    records: &mut dyn RecordStore,
    blobs: &mut dyn BlobStore,
    options: &IngestOptions,
) -> Result<IngestReport, PipelineError> {
    records.begin()?;
    let result = Ingestion {
        source,
        records: &mut *records,
        blobs,
        options,
        images: HashMap::new(),
        unknown: HashSet::new(),
        report: IngestReport::default(),
    }
    .run()
    .and_then(|report| {
        records.commit()?;
        Ok(report)
    });
    match result {
        Ok(report) => {
            tracing::info!(
                inserted = report.inserted,
                failed = report.failed,
                unique_images = report.unique_images,
                "ingest complete"
            );
            Ok(report)
        }
        Err(error) => {
            if let Err(rollback) = records.rollback() {
                tracing::warn!(%rollback, "rollback failed");
            }
            tracing::error!(%error, "ingest aborted");
            Err(error)
        }
    }
}

struct Ingestion<'a> {
    source: &'a mut dyn DatasetSource,
    records: &'a mut dyn RecordStore,
    blobs: &'a mut dyn BlobStore,
    options: &'a IngestOptions,
    images: HashMap<String, BlobId>,
    unknown: HashSet<String>,
    report: IngestReport,
}

impl Ingestion<'_> {
    fn run(mut self) -> Result<IngestReport, PipelineError> {
        let name = self.source.name().to_string();
        tracing::info!(source = %name, "ingest start");
        while self
            .options
            .max_records
            .is_none_or(|max| self.report.inserted < max)
        {
            let record = match self.source.next_record() {
                None => break,
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    self.fail(&e)?;
                    continue;
                }
            };
            let (question, good_answer) = match self.source.resolve_qa(&record) {
                Ok(qa) => qa,
                Err(e) => {
                    self.fail(&e)?;
                    continue;
                }
            };
            let raw_image_ref = match self.raw_image(&record)? {
                Ok(id) => id,
                Err(e) => {
                    self.fail(&e)?;
                    continue;
                }
            };
            let graph_type = self.graph_type(&record);
            let id = self.records.insert(&NewSample {
                source: name.clone(),
                graph_type,
                question,
                good_answer,
                raw_image_ref,
            })?;
            self.report.inserted += 1;
            tracing::debug!(sample = %id, image = record.path_key(), %graph_type, "ingested");
        }
        self.report.unique_images = self.images.len();
        let mut unknown: Vec<_> = self.unknown.into_iter().collect();
        unknown.sort();
        self.report.unknown_labels = unknown;
        Ok(self.report)
    }

    /// Stored blob for the record's image, storing it on first sight.
    /// The outer `Result` is a store failure, the inner one a record
    /// failure.
    fn raw_image(
        &mut self,
        record: &DatasetRecord,
    ) -> Result<Result<BlobId, IngestError>, PipelineError> {
        if let Some(id) = self.images.get(record.path_key()) {
            return Ok(Ok(id.clone()));
        }
        let bytes = match self.source.resolve_image(record) {
            Ok(bytes) if bytes.is_empty() => {
                return Ok(Err(IngestError::EmptyImage(record.image.clone())));
            }
            Ok(bytes) => bytes,
            Err(e) => return Ok(Err(e)),
        };
        let id = self.blobs.put(&bytes)?;
        self.images
            .insert(record.path_key().to_string(), id.clone());
        Ok(Ok(id))
    }

    fn graph_type(&mut self, record: &DatasetRecord) -> GraphType {
        let Some(label) = record.chart_type.as_deref() else {
            return GraphType::Other;
        };
        if let Some(graph_type) = self.source.kind().graph_type(label) {
            return graph_type;
        }
        if self.unknown.insert(label.to_string()) {
            tracing::warn!(label, source = self.source.name(), "unknown chart type, using OTHER");
        }
        GraphType::Other
    }

    fn fail(&mut self, error: &IngestError) -> Result<(), PipelineError> {
        self.report.failed += 1;
        tracing::warn!(%error, failed = self.report.failed, "skipping record");
        if self.report.failed > self.options.failure_budget {
            return Err(PipelineError::IngestBudgetExceeded {
                failed: self.report.failed,
                budget: self.options.failure_budget,
            });
        }
        Ok(())
    }
}
