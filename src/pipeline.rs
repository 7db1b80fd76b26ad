//! Per-region orchestration of filtering, clustering, scoring and forecasting.

use std::path::Path;

use rayon::prelude::*;

use crate::aggregate::{aggregate, filter_by_year_range, smooth_dataset};
use crate::cluster::{cluster_dataset, ClusteredDataset};
use crate::common::cancel::CancellationToken;
use crate::common::error::{AnalysisError, Result};
use crate::common::params::PipelineConfig;
use crate::common::table_reader::RegionLoad;
use crate::common::table_writer::{clustered_file_name, write_clustered, write_scores};
use crate::common::types::{Granularity, RegionDataset};
use crate::forecast::params::ForecastParams;
use crate::forecast::{forecast_region, ForecastResult};
use crate::scoring::{score_dataset, ClusterScoreReport};

/// The step of a region's analysis that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Filter,
    Cluster,
    Score,
    Forecast,
    Write,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Load => write!(f, "load"),
            Stage::Filter => write!(f, "filter"),
            Stage::Cluster => write!(f, "cluster"),
            Stage::Score => write!(f, "score"),
            Stage::Forecast => write!(f, "forecast"),
            Stage::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionFailure {
    pub region: String,
    pub stage: Stage,
    pub error: AnalysisError,
}

/// Everything produced for one region. A stage that failed leaves its slot empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOutcome {
    pub region: String,
    pub clustered: Option<ClusteredDataset>,
    pub scores: Option<ClusterScoreReport>,
    pub forecast: Option<ForecastResult>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineReport {
    /// One outcome per input region, in input order.
    pub regions: Vec<RegionOutcome>,
    pub failures: Vec<RegionFailure>,
}

impl PipelineReport {
    /// Score reports of every region that got one, in region order.
    pub fn score_table(&self) -> Vec<ClusterScoreReport> {
        self.regions
            .iter()
            .filter_map(|outcome| outcome.scores.clone())
            .collect()
    }

    pub fn failures_for(&self, region: &str) -> Vec<&RegionFailure> {
        self.failures.iter().filter(|f| f.region == region).collect()
    }

    /// Write `clustered_data_<REGION>.csv` per clustered region and the score
    /// table to `scores_file`, all under `dir`.
    ///
    /// A region whose file cannot be written is returned as a `Write` failure
    /// and the others are still written. Only a failed score table is an error.
    pub fn write_outputs(&self, dir: &Path, scores_file: &str) -> Result<Vec<RegionFailure>> {
        let mut failures = Vec::new();
        for outcome in &self.regions {
            let Some(clustered) = &outcome.clustered else {
                continue;
            };
            let path = dir.join(clustered_file_name(&outcome.region));
            if let Err(error) = write_clustered(&path, clustered) {
                log::warn!(
                    "pipeline: {} not written to {}: {}",
                    outcome.region,
                    path.display(),
                    error
                );
                failures.push(RegionFailure {
                    region: outcome.region.clone(),
                    stage: Stage::Write,
                    error,
                });
            }
        }
        write_scores(&dir.join(scores_file), &self.score_table())?;
        Ok(failures)
    }
}

/// Run every region through the pipeline in parallel.
///
/// Regions never affect each other: a failure is recorded against its region
/// and stage, and the rest of the work carries on. Clustering and forecasting
/// fail independently within a region.
pub fn run(
    datasets: &[RegionDataset],
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<PipelineReport> {
    config.validate()?;
    log::info!(
        "pipeline: {} regions, k={}, clustering at {} granularity",
        datasets.len(),
        config.cluster_count,
        config.cluster_granularity
    );

    let results: Vec<(RegionOutcome, Vec<RegionFailure>)> = datasets
        .par_iter()
        .map(|dataset| run_region(dataset, config, cancel))
        .collect();
    Ok(collect_report(results))
}

/// Run the regions of a table read with `read_regions`.
///
/// A region that failed to load gets an empty outcome and a `Load` failure;
/// the others run as in `run`.
pub fn run_loaded(
    loads: &[RegionLoad],
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<PipelineReport> {
    config.validate()?;
    log::info!(
        "pipeline: {} regions loaded, k={}, clustering at {} granularity",
        loads.len(),
        config.cluster_count,
        config.cluster_granularity
    );

    let results: Vec<(RegionOutcome, Vec<RegionFailure>)> = loads
        .par_iter()
        .map(|load| match &load.dataset {
            Ok(dataset) => run_region(dataset, config, cancel),
            Err(error) => (
                RegionOutcome {
                    region: load.region.clone(),
                    clustered: None,
                    scores: None,
                    forecast: None,
                },
                vec![RegionFailure {
                    region: load.region.clone(),
                    stage: Stage::Load,
                    error: error.clone(),
                }],
            ),
        })
        .collect();
    Ok(collect_report(results))
}

fn collect_report(results: Vec<(RegionOutcome, Vec<RegionFailure>)>) -> PipelineReport {
    let mut report = PipelineReport::default();
    for (outcome, failures) in results {
        report.regions.push(outcome);
        report.failures.extend(failures);
    }
    for failure in &report.failures {
        log::warn!(
            "pipeline: {} failed at {}: {}",
            failure.region,
            failure.stage,
            failure.error
        );
    }
    report
}

fn run_region(
    dataset: &RegionDataset,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> (RegionOutcome, Vec<RegionFailure>) {
    let region = dataset.region().to_string();
    let mut outcome = RegionOutcome {
        region: region.clone(),
        clustered: None,
        scores: None,
        forecast: None,
    };
    let mut failures = Vec::new();
    let mut fail = |stage: Stage, error: AnalysisError| {
        failures.push(RegionFailure {
            region: region.clone(),
            stage,
            error,
        })
    };

    let filtered = match config.year_range {
        Some((lo, hi)) => match filter_by_year_range(dataset, lo, hi) {
            Ok(filtered) => filtered,
            Err(e) => {
                fail(Stage::Filter, e);
                return (outcome, failures);
            }
        },
        None => dataset.clone(),
    };

    match aggregate(&filtered, config.cluster_granularity)
        .and_then(|rows| cluster_dataset(&rows, config.cluster_count))
    {
        Ok(clustered) => {
            match score_dataset(&clustered) {
                Ok(scores) => outcome.scores = Some(scores),
                Err(e) => fail(Stage::Score, e),
            }
            outcome.clustered = Some(clustered);
        }
        Err(e) => fail(Stage::Cluster, e),
    }

    if let Some(params) = &config.forecast {
        match forecast_stage(&filtered, config.smoothing_window, params, cancel) {
            Ok(forecast) => outcome.forecast = Some(forecast),
            Err(e) => fail(Stage::Forecast, e),
        }
    }

    (outcome, failures)
}

fn forecast_stage(
    dataset: &RegionDataset,
    smoothing_window: usize,
    params: &ForecastParams,
    cancel: &CancellationToken,
) -> Result<ForecastResult> {
    let monthly = aggregate(dataset, Granularity::Month)?;
    let smoothed = smooth_dataset(&monthly, smoothing_window)?;
    forecast_region(&smoothed, params, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Observation, ObservationDate};

    fn make_yearly(region: &str, years: std::ops::Range<i32>) -> RegionDataset {
        let rows = years
            .map(|year| {
                let base = if year % 2 == 0 { 12.0 } else { 24.0 };
                Observation {
                    station_id: Some("607100".to_string()),
                    region: region.to_string(),
                    date: ObservationDate::year(year),
                    average: base + (year % 5) as f64 * 0.1,
                    max: base + 10.0,
                    min: base - 10.0,
                    std: 3.0,
                    median: base,
                }
            })
            .collect();
        RegionDataset::from_observations(region, rows).unwrap()
    }

    #[test]
    fn test_regions_keep_input_order() {
        let datasets = vec![
            make_yearly("HUMID", 1990..2000),
            make_yearly("ARID", 1990..2000),
        ];
        let report = run(
            &datasets,
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        let regions: Vec<&str> = report.regions.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(regions, vec!["HUMID", "ARID"]);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.score_table().len(), 2);
    }

    #[test]
    fn test_empty_filter_skips_only_that_region() {
        let datasets = vec![
            make_yearly("HUMID", 1980..1995),
            make_yearly("ARID", 2001..2010),
        ];
        let config = PipelineConfig {
            year_range: Some((1985, 1990)),
            ..PipelineConfig::default()
        };
        let report = run(&datasets, &config, &CancellationToken::new()).unwrap();

        assert!(report.regions[0].clustered.is_some());
        assert!(report.regions[1].clustered.is_none());
        let failures = report.failures_for("ARID");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Filter);
        assert!(matches!(failures[0].error, AnalysisError::EmptyResult(_)));
    }

    #[test]
    fn test_forecast_failure_does_not_block_clustering() {
        let config = PipelineConfig {
            forecast: Some(ForecastParams::default()),
            ..PipelineConfig::default()
        };
        let report = run(
            &[make_yearly("SEMI_ARID", 1990..2000)],
            &config,
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(report.regions[0].clustered.is_some());
        assert!(report.regions[0].scores.is_some());
        assert!(report.regions[0].forecast.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Forecast);
        assert!(matches!(
            report.failures[0].error,
            AnalysisError::AggregationPolicy(_)
        ));
    }

    #[test]
    fn test_single_row_region_fails_at_cluster() {
        let report = run(
            &[make_yearly("POLAR", 2000..2001)],
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Cluster);
        assert!(report.score_table().is_empty());
    }

    #[test]
    fn test_failed_load_recorded_and_others_run() {
        let loads = vec![
            RegionLoad {
                region: "ARID".to_string(),
                dataset: Ok(make_yearly("ARID", 1990..2000)),
            },
            RegionLoad {
                region: "HUMID".to_string(),
                dataset: Err(AnalysisError::Schema("row 4: AVERAGE is empty".to_string())),
            },
        ];
        let report = run_loaded(&loads, &PipelineConfig::default(), &CancellationToken::new())
            .unwrap();

        let regions: Vec<&str> = report.regions.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(regions, vec!["ARID", "HUMID"]);
        assert!(report.regions[0].scores.is_some());
        assert!(report.regions[1].clustered.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].region, "HUMID");
        assert_eq!(report.failures[0].stage, Stage::Load);
        assert!(matches!(report.failures[0].error, AnalysisError::Schema(_)));
    }

    #[test]
    fn test_unwritable_region_does_not_stop_other_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(
            &[make_yearly("ARID", 1990..2000), make_yearly("NO/SUCH", 1990..2000)],
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();

        let failures = report.write_outputs(dir.path(), "cluster_scores.csv").unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].region, "NO/SUCH");
        assert_eq!(failures[0].stage, Stage::Write);
        assert!(dir.path().join("clustered_data_ARID.csv").exists());

        let scores = std::fs::read_to_string(dir.path().join("cluster_scores.csv")).unwrap();
        assert_eq!(scores.lines().count(), 3, "header plus both regions:\n{}", scores);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let config = PipelineConfig {
            cluster_count: 1,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            run(&[], &config, &CancellationToken::new()),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }
}
