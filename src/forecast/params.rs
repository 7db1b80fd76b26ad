use serde::Deserialize;

use crate::common::error::{AnalysisError, Result};
use crate::common::types::TemperatureField;

/// Parsed and validated parameters for a seasonal forecast.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastParams {
    /// Number of months to forecast.
    pub horizon: usize,
    /// Coverage of the symmetric interval around each point forecast.
    pub confidence_level: f64,
    /// Temperature column to forecast.
    pub field: TemperatureField,
}

impl Default for ForecastParams {
    fn default() -> Self {
        ForecastParams {
            horizon: 12,
            confidence_level: 0.95,
            field: TemperatureField::Average,
        }
    }
}

impl ForecastParams {
    pub fn new(horizon: usize) -> Result<Self> {
        let params = ForecastParams {
            horizon,
            ..ForecastParams::default()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(AnalysisError::InvalidParameter(
                "horizon must be a positive number of months".to_string(),
            ));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "confidence_level must be between 0.0 and 1.0 (exclusive), got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}
