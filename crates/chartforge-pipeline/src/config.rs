//! Run configuration.

use chartforge_normalize::NormalizeConfig;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Configuration for one pipeline invocation.
///
/// Deserializes with every field optional, so a partial JSON document
/// overrides only what it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Image normalization parameters for the preprocessing stage.
    pub normalize: NormalizeConfig,

    /// Samples written per committed batch.
    pub batch_size: usize,

    /// Largest number of failed content keys (or ingest records) a run
    /// absorbs. One more aborts it.
    pub failure_budget: usize,
}

impl PipelineConfig {
    /// Default samples per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    /// Default failure budget.
    pub const DEFAULT_FAILURE_BUDGET: usize = 50;

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero batch size or
    /// a zero target size.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.normalize.target_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "normalize.target_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize: NormalizeConfig::default(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            failure_budget: Self::DEFAULT_FAILURE_BUDGET,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_target_size_is_rejected() {
        let mut config = PipelineConfig::default();
        config.normalize.target_size = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"batch_size": 7, "normalize": {"target_size": 256}}"#)
                .unwrap();
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.failure_budget, PipelineConfig::DEFAULT_FAILURE_BUDGET);
        assert_eq!(config.normalize.target_size, 256);
        assert_eq!(
            config.normalize.crop_margin,
            NormalizeConfig::DEFAULT_CROP_MARGIN
        );
    }
}
