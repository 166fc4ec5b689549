//! Integration tests: the SQLite record store and filesystem blob store
//! end to end, and store failures during a stage pass.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::Cell;
use std::fs;

use chartforge_pipeline::{
    BlobId, BlobStore, DatasetKind, FsBlobStore, GraphType, ManifestSource, MemoryBlobStore,
    MemoryRecordStore, NewSample, Pipeline, PipelineConfig, PipelineError, RecordStore,
    SqliteRecordStore, Stage, StoreError,
};

fn chart_png(w: u32, h: u32, color: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, _| {
        if x % 3 == 0 {
            image::Rgb(color)
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

/// Writes a small ChartX-style dataset and returns the manifest path.
fn dataset(dir: &std::path::Path) -> std::path::PathBuf {
    fs::create_dir_all(dir.join("png")).unwrap();
    fs::write(dir.join("png/bar.png"), chart_png(60, 40, [200, 0, 0])).unwrap();
    fs::write(dir.join("png/pie.png"), chart_png(40, 40, [0, 0, 200])).unwrap();
    fs::write(dir.join("png/broken.png"), b"not a png").unwrap();
    let manifest = dir.join("manifest.jsonl");
    let lines = [
        r#"{"image": "png/bar.png", "question": "Tallest bar?", "answer": "2019", "chart_type": "bar_chart"}"#,
        r#"{"image": "./png/bar.png", "question": "Shortest bar?", "answer": "2015", "chart_type": "bar_chart"}"#,
        r#"{"image": "png/pie.png", "question": "Largest slice?", "answer": "Rent", "chart_type": "pie_chart"}"#,
        r#"{"image": "png/broken.png", "question": "Anything?", "answer": "No", "chart_type": "sunburst"}"#,
    ];
    fs::write(&manifest, lines.join("\n")).unwrap();
    manifest
}

#[test]
fn ingest_and_run_against_sqlite_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dataset(&dir.path().join("chartx"));
    let db = dir.path().join("samples.db");
    let blob_dir = dir.path().join("blobs");

    {
        let records = SqliteRecordStore::open(&db).unwrap();
        let blobs = FsBlobStore::open(&blob_dir).unwrap();
        let mut pipeline = Pipeline::new(records, blobs, PipelineConfig::default()).unwrap();
        let mut source = ManifestSource::open(&manifest, DatasetKind::ChartX).unwrap();
        let ingested = pipeline.ingest(&mut source, None).unwrap();
        assert_eq!(ingested.inserted, 4);
        assert_eq!(ingested.unique_images, 3);
        assert_eq!(ingested.unknown_labels, vec!["sunburst".to_string()]);

        let summary = pipeline.run(&[], None).unwrap();
        let pre = summary.report(Stage::Preprocess).unwrap();
        assert_eq!(pre.attempted, 4);
        assert_eq!(pre.transformed, 2);
        assert_eq!(pre.written, 3);
        assert_eq!(pre.skipped, 1);
    }

    // Reopen: state is durable and a rerun has nothing to do.
    let records = SqliteRecordStore::open(&db).unwrap();
    let blobs = FsBlobStore::open(&blob_dir).unwrap();
    let mut pipeline = Pipeline::new(records, blobs, PipelineConfig::default()).unwrap();
    let samples = pipeline.records().samples(None).unwrap();
    assert_eq!(samples[0].source, "ChartX");
    assert_eq!(samples[0].graph_type, GraphType::Bar);
    assert_eq!(samples[3].graph_type, GraphType::Other);
    assert_eq!(samples[0].raw_image_ref, samples[1].raw_image_ref);
    assert_eq!(samples[0].good_image_ref, samples[1].good_image_ref);
    assert_eq!(samples[0].original_width, Some(60));
    assert!(samples[3].good_image_ref.is_none());
    assert_eq!(samples[2].output_answer.as_deref(), Some("Rent"));

    let rerun = pipeline.run(&[], None).unwrap();
    assert_eq!(rerun.written(), 0);
    assert_eq!(rerun.report(Stage::Preprocess).unwrap().skipped, 1);

    let report = pipeline.verify(None).unwrap();
    assert_eq!(report.rows, 4);
    assert_eq!(report.distinct_good, 2);
    assert_eq!(report.good_ok, 2);
    assert_eq!(report.sharing_violations, 0);
    // The broken raw image is the only problem.
    assert_eq!(report.errors, 1, "{:?}", report.details);

    pipeline.clean().unwrap();
    assert!(pipeline.records().samples(None).unwrap().is_empty());
    assert_eq!(fs::read_dir(&blob_dir).unwrap().count(), 0);
}

/// Blob store double that fails every `get` after the first `ok_gets`.
struct Flaky {
    inner: MemoryBlobStore,
    ok_gets: Cell<usize>,
}

impl BlobStore for Flaky {
    fn put(&mut self, bytes: &[u8]) -> Result<BlobId, StoreError> {
        self.inner.put(bytes)
    }

    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>, StoreError> {
        let left = self.ok_gets.get();
        if left == 0 {
            return Err(StoreError::Io(std::io::Error::other("connection reset")));
        }
        self.ok_gets.set(left - 1);
        self.inner.get(id)
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.inner.wipe()
    }
}

#[test]
fn store_failure_aborts_after_committed_batches() {
    let mut inner = MemoryBlobStore::new();
    let mut records = MemoryRecordStore::new();
    for i in 0..5 {
        let raw = inner.put(&chart_png(10 + i, 10, [0, 0, 0])).unwrap();
        records
            .insert(&NewSample {
                source: "test".to_string(),
                graph_type: GraphType::Scatter,
                question: "q".to_string(),
                good_answer: "a".to_string(),
                raw_image_ref: raw,
            })
            .unwrap();
    }
    let blobs = Flaky {
        inner,
        ok_gets: Cell::new(3),
    };
    let config = PipelineConfig {
        batch_size: 2,
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(records, blobs, config).unwrap();
    let failure = pipeline.run(&[], None).unwrap_err();
    assert!(matches!(failure.error, PipelineError::Store(StoreError::Io(_))));
    assert!(!failure.error.is_budget_exceeded());

    let report = failure.summary.report(Stage::Preprocess).unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.batches, 1);
    assert_eq!(failure.summary.reports.len(), 1, "later stages did not run");

    let done = pipeline
        .records()
        .samples(None)
        .unwrap()
        .iter()
        .filter(|s| s.good_image_ref.is_some())
        .count();
    assert_eq!(done, 2);
}
