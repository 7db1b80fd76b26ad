use serde::Deserialize;
use std::path::Path;

use super::error::{AnalysisError, IoFailure, Result};
use super::types::Granularity;
use crate::forecast::params::ForecastParams;

/// Default number of flat clusters cut from each dendrogram.
pub const DEFAULT_CLUSTER_COUNT: usize = 2;

/// Settings for one pipeline run, shared by every region.
///
/// Loaded from TOML, for example:
///
/// ```toml
/// year_range = [1980, 2020]
/// cluster_count = 2
/// cluster_granularity = "none"
///
/// [forecast]
/// horizon = 12
/// confidence_level = 0.95
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Inclusive year range applied before any other stage.
    pub year_range: Option<(i32, i32)>,
    /// Number of flat clusters per region.
    pub cluster_count: usize,
    /// Granularity the rows are aggregated to before clustering.
    pub cluster_granularity: Granularity,
    /// Trailing window applied to AVERAGE/MAX/MIN of the forecast input. 1 disables it.
    pub smoothing_window: usize,
    /// Forecast settings. `None` skips forecasting.
    pub forecast: Option<ForecastParams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            year_range: None,
            cluster_count: DEFAULT_CLUSTER_COUNT,
            cluster_granularity: Granularity::Raw,
            smoothing_window: 1,
            forecast: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)
            .map_err(|e| AnalysisError::InvalidParameter(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AnalysisError::Io {
            path: path.display().to_string(),
            failure: match e.kind() {
                std::io::ErrorKind::NotFound => IoFailure::NotFound,
                _ => IoFailure::Read(e.to_string()),
            },
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_count < 2 {
            return Err(AnalysisError::InvalidParameter(format!(
                "cluster_count must be at least 2, got {}",
                self.cluster_count
            )));
        }
        if self.smoothing_window == 0 {
            return Err(AnalysisError::InvalidParameter(
                "smoothing_window must be at least 1".to_string(),
            ));
        }
        if let Some((lo, hi)) = self.year_range {
            if lo > hi {
                return Err(AnalysisError::InvalidParameter(format!(
                    "year_range start {} is after end {}",
                    lo, hi
                )));
            }
        }
        if let Some(forecast) = &self.forecast {
            forecast.validate()?;
        }
        Ok(())
    }
}
