//! Climate-region temperature analytics.
//!
//! Station tables are grouped by region, aggregated, clustered with Ward
//! linkage, scored, and forecast with a seasonal ARIMA model. Every region is
//! processed independently; see [`pipeline::run`].

pub mod aggregate;
pub mod cluster;
pub mod common;
pub mod forecast;
pub mod pipeline;
pub mod scoring;

pub use aggregate::summary::{cluster_distribution, monthly_heatmap, MonthlyHeatmap};
pub use aggregate::{aggregate, filter_by_year_range, smooth, smooth_dataset};
pub use cluster::{cluster_dataset, ClusterAssignment, ClusteredDataset, Dendrogram};
pub use common::cancel::CancellationToken;
pub use common::error::{AnalysisError, FitFailure, IoFailure, Result};
pub use common::grouping::group_by_region;
pub use common::params::PipelineConfig;
pub use common::table_reader::{read_clustered, read_observations, read_regions, RegionLoad};
pub use common::table_writer::{write_clustered, write_scores};
pub use common::types::{
    Granularity, MonthlySeries, Observation, ObservationDate, RegionDataset, TemperatureField,
};
pub use forecast::params::ForecastParams;
pub use forecast::{forecast_region, ForecastPoint, ForecastResult};
pub use pipeline::{run, run_loaded, PipelineReport, RegionFailure, RegionOutcome, Stage};
pub use scoring::{score_dataset, ClusterScoreReport};
