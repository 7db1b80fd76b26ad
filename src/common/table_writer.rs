use duckdb::params;
use std::path::Path;

use super::error::Result;
use super::table_reader::{escape_literal, io_error, open_connection, quote, CLUSTER_COLUMN};
use crate::cluster::ClusteredDataset;
use crate::scoring::ClusterScoreReport;

/// Header of the cluster score table, in column order.
pub const SCORE_COLUMNS: [&str; 5] = [
    "Region Type",
    "Silhouette Score",
    "Davies-Bouldin Index",
    "Inter-cluster distance",
    "Intra-cluster distance",
];

/// File name used for a region's clustered dataset.
pub fn clustered_file_name(region: &str) -> String {
    format!("clustered_data_{}.csv", region)
}

/// Write a region's rows with their `CLUSTER` label as CSV.
pub fn write_clustered(path: &Path, clustered: &ClusteredDataset) -> Result<()> {
    let con = open_connection(path)?;
    con.execute_batch(&format!(
        "CREATE TABLE clustered (\"ID\" VARCHAR, \"YEAR\" BIGINT, \"MONTH\" BIGINT, \
         \"DAY\" BIGINT, \"REGION_TYPE\" VARCHAR, \"AVERAGE\" DOUBLE, \"MAX\" DOUBLE, \
         \"MIN\" DOUBLE, \"STD\" DOUBLE, \"MEDIAN\" DOUBLE, {} BIGINT)",
        quote(CLUSTER_COLUMN)
    ))
    .map_err(|e| io_error(path, e))?;

    // The appender flushes when it drops at the end of this block.
    {
        let mut appender = con.appender("clustered").map_err(|e| io_error(path, e))?;
        let rows = clustered.dataset().observations();
        for (obs, &label) in rows.iter().zip(clustered.assignment().labels()) {
            appender
                .append_row(params![
                    obs.station_id.as_deref(),
                    i64::from(obs.date.year),
                    obs.date.month.map(i64::from),
                    obs.date.day.map(i64::from),
                    obs.region.as_str(),
                    obs.average,
                    obs.max,
                    obs.min,
                    obs.std,
                    obs.median,
                    label as i64,
                ])
                .map_err(|e| io_error(path, e))?;
        }
    }

    copy_to_csv(&con, "clustered", path)?;
    log::info!(
        "table_writer: wrote {} clustered rows for {} to {}",
        clustered.dataset().len(),
        clustered.dataset().region(),
        path.display()
    );
    Ok(())
}

/// Write the per-region score table as CSV.
///
/// An undefined intra-cluster distance is written as an empty cell.
pub fn write_scores(path: &Path, reports: &[ClusterScoreReport]) -> Result<()> {
    let con = open_connection(path)?;
    let columns: Vec<String> = SCORE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} {}", quote(c), if i == 0 { "VARCHAR" } else { "DOUBLE" }))
        .collect();
    con.execute_batch(&format!("CREATE TABLE scores ({})", columns.join(", ")))
        .map_err(|e| io_error(path, e))?;

    {
        let mut appender = con.appender("scores").map_err(|e| io_error(path, e))?;
        for report in reports {
            appender
                .append_row(params![
                    report.region.as_str(),
                    report.silhouette,
                    report.davies_bouldin,
                    report.inter_cluster_distance,
                    report.intra_cluster_distance,
                ])
                .map_err(|e| io_error(path, e))?;
        }
    }

    copy_to_csv(&con, "scores", path)
}

fn copy_to_csv(con: &duckdb::Connection, table: &str, path: &Path) -> Result<()> {
    con.execute_batch(&format!(
        "COPY {} TO '{}' (HEADER, DELIMITER ',')",
        table,
        escape_literal(&path.display().to_string())
    ))
    .map_err(|e| io_error(path, e))
}
