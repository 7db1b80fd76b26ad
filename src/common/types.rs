use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::error::{AnalysisError, Result};

/// Number of numeric dimensions in a clustering feature vector.
pub const FEATURE_DIMS: usize = 5;

/// Feature vector fed to clustering and scoring: average, max, min, std, median.
pub type FeatureVector = [f64; FEATURE_DIMS];

/// Calendar position of an observation.
///
/// Yearly station aggregates only carry a year; daily rows carry all three parts.
/// Month-aggregated rows carry year and month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservationDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl ObservationDate {
    /// Build a date, rejecting impossible combinations.
    pub fn new(year: i32, month: Option<u32>, day: Option<u32>) -> Result<Self> {
        match (month, day) {
            (None, Some(_)) => {
                return Err(AnalysisError::Schema(format!(
                    "year {} has a DAY without a MONTH",
                    year
                )))
            }
            (Some(m), None) if !(1..=12).contains(&m) => {
                return Err(AnalysisError::Schema(format!(
                    "month {} out of range in year {}",
                    m, year
                )))
            }
            (Some(m), Some(d)) if NaiveDate::from_ymd_opt(year, m, d).is_none() => {
                return Err(AnalysisError::Schema(format!(
                    "invalid calendar date {}-{:02}-{:02}",
                    year, m, d
                )))
            }
            _ => {}
        }
        Ok(ObservationDate { year, month, day })
    }

    pub fn year(year: i32) -> Self {
        ObservationDate {
            year,
            month: None,
            day: None,
        }
    }

    /// Resolve to a calendar date, filling missing parts with 1.
    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month.unwrap_or(1), self.day.unwrap_or(1))
    }
}

/// One row of the regional temperature table.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Station identifier. `None` once rows from several stations were averaged.
    pub station_id: Option<String>,
    pub region: String,
    pub date: ObservationDate,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
    pub median: f64,
}

impl Observation {
    pub fn features(&self) -> FeatureVector {
        [self.average, self.max, self.min, self.std, self.median]
    }

    pub fn field(&self, field: TemperatureField) -> f64 {
        match field {
            TemperatureField::Average => self.average,
            TemperatureField::Max => self.max,
            TemperatureField::Min => self.min,
            TemperatureField::Std => self.std,
            TemperatureField::Median => self.median,
        }
    }

    pub(crate) fn with_field(mut self, field: TemperatureField, value: f64) -> Self {
        match field {
            TemperatureField::Average => self.average = value,
            TemperatureField::Max => self.max = value,
            TemperatureField::Min => self.min = value,
            TemperatureField::Std => self.std = value,
            TemperatureField::Median => self.median = value,
        }
        self
    }
}

/// Selects one numeric temperature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureField {
    #[default]
    Average,
    Max,
    Min,
    Std,
    Median,
}

impl TemperatureField {
    pub const ALL: [TemperatureField; 5] = [
        TemperatureField::Average,
        TemperatureField::Max,
        TemperatureField::Min,
        TemperatureField::Std,
        TemperatureField::Median,
    ];

    /// Column name in the tabular format.
    pub fn column(&self) -> &'static str {
        match self {
            TemperatureField::Average => "AVERAGE",
            TemperatureField::Max => "MAX",
            TemperatureField::Min => "MIN",
            TemperatureField::Std => "STD",
            TemperatureField::Median => "MEDIAN",
        }
    }
}

/// Temporal resolution of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Rows exactly as loaded, no aggregation applied.
    #[default]
    #[serde(alias = "none")]
    Raw,
    Month,
    Year,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Raw => write!(f, "raw"),
            Granularity::Month => write!(f, "month"),
            Granularity::Year => write!(f, "year"),
        }
    }
}

/// Ordered observations sharing one climate-region label.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDataset {
    region: String,
    granularity: Granularity,
    observations: Vec<Observation>,
}

impl RegionDataset {
    /// Build a raw dataset. Every row must carry `region` as its label.
    pub fn from_observations(region: &str, observations: Vec<Observation>) -> Result<Self> {
        if let Some(stray) = observations.iter().find(|o| o.region != region) {
            return Err(AnalysisError::Schema(format!(
                "row labelled '{}' in dataset for region '{}'",
                stray.region, region
            )));
        }
        Ok(RegionDataset {
            region: region.to_string(),
            granularity: Granularity::Raw,
            observations,
        })
    }

    /// A raw dataset whose rows are already known to carry `region`.
    pub(crate) fn labelled(region: String, observations: Vec<Observation>) -> Self {
        RegionDataset {
            region,
            granularity: Granularity::Raw,
            observations,
        }
    }

    pub(crate) fn derived(&self, granularity: Granularity, observations: Vec<Observation>) -> Self {
        RegionDataset {
            region: self.region.clone(),
            granularity,
            observations,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Feature vectors in row order.
    pub fn features(&self) -> Vec<FeatureVector> {
        self.observations.iter().map(Observation::features).collect()
    }

    /// One numeric column in row order.
    pub fn series(&self, field: TemperatureField) -> Vec<f64> {
        self.observations.iter().map(|o| o.field(field)).collect()
    }
}

/// A strictly month-end indexed series, ascending and without duplicate months.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlySeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl MonthlySeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Number of calendar months absent between the first and last date.
    pub fn missing_months(&self) -> usize {
        self.dates
            .windows(2)
            .map(|w| {
                let gap = (w[1].year() - w[0].year()) * 12 + w[1].month() as i32
                    - w[0].month() as i32;
                (gap - 1).max(0) as usize
            })
            .sum()
    }
}

/// Last calendar day of the given month.
pub fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Month-end date `steps` months after the month containing `date`.
pub fn month_end_after(date: NaiveDate, steps: u32) -> Option<NaiveDate> {
    let index = date.year() * 12 + date.month0() as i32 + steps as i32;
    month_end(index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}
