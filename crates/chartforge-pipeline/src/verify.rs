//! Consistency checks over stored samples and images.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::sample::BlobId;
use crate::store::{BlobStore, RecordStore};

/// Most error details kept in a report.
pub const MAX_DETAILS: usize = 20;

/// Verification counters and the first few problems found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Samples examined.
    pub rows: usize,
    /// Samples with a normalized image.
    pub preprocessed: usize,
    pub distinct_raw: usize,
    pub distinct_good: usize,
    /// Raw images that were present and decoded.
    pub raw_ok: usize,
    /// Normalized images that were present, square at the target size,
    /// and RGB.
    pub good_ok: usize,
    /// Raw images shared by samples that disagree on the normalized one.
    pub sharing_violations: usize,
    /// Problems found, including ones beyond [`MAX_DETAILS`].
    pub errors: usize,
    pub details: Vec<String>,
}

impl VerifyReport {
    /// Returns `true` if nothing was wrong.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.errors == 0
    }

    fn error(&mut self, detail: String) {
        self.errors += 1;
        if self.details.len() < MAX_DETAILS {
            self.details.push(detail);
        }
    }
}

/// Check the first `limit` samples (all when `None`): every distinct raw
/// image decodes, every distinct normalized image is an RGB square of the
/// `target_size` recorded in its sample's preprocess metadata, and equal
/// raw images map to equal normalized images.
///
/// # Errors
///
/// Returns [`StoreError`] if a store cannot be read. Bad content is
/// reported, not returned as an error.
pub fn verify(
    records: &dyn RecordStore,
    blobs: &dyn BlobStore,
    limit: Option<usize>,
) -> Result<VerifyReport, StoreError> {
    let samples = records.samples(limit)?;
    let mut report = VerifyReport {
        rows: samples.len(),
        ..VerifyReport::default()
    };

    let mut raw = BTreeSet::new();
    let mut good: BTreeMap<&BlobId, Option<u32>> = BTreeMap::new();
    let mut good_of_raw: HashMap<&BlobId, &BlobId> = HashMap::new();
    let mut violating = BTreeSet::new();
    for sample in &samples {
        raw.insert(&sample.raw_image_ref);
        let Some(good_ref) = &sample.good_image_ref else {
            continue;
        };
        report.preprocessed += 1;
        good.entry(good_ref)
            .or_insert_with(|| sample.preprocess_meta.as_ref().map(|m| m.target_size));
        let first = *good_of_raw.entry(&sample.raw_image_ref).or_insert(good_ref);
        if first != good_ref && violating.insert(&sample.raw_image_ref) {
            report.error(format!(
                "raw image {} maps to both {first} and {good_ref} (sample {})",
                sample.raw_image_ref, sample.id
            ));
        }
    }
    report.distinct_raw = raw.len();
    report.distinct_good = good.len();
    report.sharing_violations = violating.len();

    for id in raw {
        match check_raw(blobs, id)? {
            Ok(()) => report.raw_ok += 1,
            Err(detail) => report.error(detail),
        }
    }
    for (id, target_size) in good {
        let Some(target_size) = target_size else {
            report.error(format!("normalized image {id} has no preprocess metadata"));
            continue;
        };
        match check_good(blobs, id, target_size)? {
            Ok(()) => report.good_ok += 1,
            Err(detail) => report.error(detail),
        }
    }

    tracing::info!(
        rows = report.rows,
        preprocessed = report.preprocessed,
        errors = report.errors,
        "verify complete"
    );
    Ok(report)
}

fn check_raw(blobs: &dyn BlobStore, id: &BlobId) -> Result<Result<(), String>, StoreError> {
    let Some(bytes) = blobs.get(id)? else {
        return Ok(Err(format!("raw image {id} not found")));
    };
    Ok(image::load_from_memory(&bytes)
        .map(|_| ())
        .map_err(|e| format!("raw image {id} does not decode: {e}")))
}

fn check_good(
    blobs: &dyn BlobStore,
    id: &BlobId,
    target_size: u32,
) -> Result<Result<(), String>, StoreError> {
    let Some(bytes) = blobs.get(id)? else {
        return Ok(Err(format!("normalized image {id} not found")));
    };
    let image = match image::load_from_memory(&bytes) {
        Ok(image) => image,
        Err(e) => return Ok(Err(format!("normalized image {id} does not decode: {e}"))),
    };
    if (image.width(), image.height()) != (target_size, target_size) {
        return Ok(Err(format!(
            "normalized image {id} is {}x{}, expected {target_size}x{target_size}",
            image.width(),
            image.height()
        )));
    }
    if image.color() != image::ColorType::Rgb8 {
        return Ok(Err(format!(
            "normalized image {id} is {:?}, expected Rgb8",
            image.color()
        )));
    }
    Ok(Ok(()))
}
