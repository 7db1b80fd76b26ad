use duckdb::Connection;
use std::path::Path;

use super::error::{AnalysisError, IoFailure, Result};
use super::grouping::group_by_label;
use super::types::{Observation, ObservationDate, RegionDataset};
use crate::cluster::{ClusterAssignment, ClusteredDataset};

/// Columns every input table must provide.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "ID",
    "YEAR",
    "REGION_TYPE",
    "AVERAGE",
    "MAX",
    "MIN",
    "STD",
    "MEDIAN",
];

/// Column carrying the cluster label in clustered tables.
pub const CLUSTER_COLUMN: &str = "CLUSTER";

/// One row as it comes out of DuckDB, before validation.
struct RawRow {
    id: Option<String>,
    year: Option<i64>,
    region: Option<String>,
    month: Option<i64>,
    day: Option<i64>,
    values: [Option<f64>; 5],
    cluster: Option<i64>,
}

/// Open the in-memory DuckDB connection used for table I/O.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    Connection::open_in_memory().map_err(|e| io_error(path, e))
}

pub(crate) fn io_error(path: &Path, err: duckdb::Error) -> AnalysisError {
    AnalysisError::Io {
        path: path.display().to_string(),
        failure: IoFailure::Read(err.to_string()),
    }
}

/// Read every observation of a CSV table, in file order.
pub fn read_observations(path: &Path) -> Result<Vec<Observation>> {
    let rows = read_raw_rows(path, false)?;
    rows.into_iter()
        .enumerate()
        .map(|(line, raw)| to_observation(line, &raw))
        .collect()
}

/// One region of a table, or the first bad row that kept it from loading.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLoad {
    pub region: String,
    pub dataset: Result<RegionDataset>,
}

/// Read a CSV table and split it into one dataset per REGION_TYPE.
///
/// Problems with the table itself (missing file or column, a row without a
/// region label) fail the whole read. A malformed row only fails its own
/// region. Regions come out in label order.
pub fn read_regions(path: &Path) -> Result<Vec<RegionLoad>> {
    let rows = read_raw_rows(path, false)?;
    let mut labelled = Vec::with_capacity(rows.len());
    for (line, raw) in rows.into_iter().enumerate() {
        let region = raw
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| row_error(line, "REGION_TYPE is empty"))?;
        labelled.push((region, line, raw));
    }

    let loads = group_by_label(labelled, |(region, _, _)| region.clone())
        .into_iter()
        .map(|(region, rows)| {
            let dataset = rows
                .iter()
                .map(|(_, line, raw)| to_observation(*line, raw))
                .collect::<Result<Vec<Observation>>>()
                .map(|observations| RegionDataset::labelled(region.clone(), observations));
            if let Err(e) = &dataset {
                log::warn!("table_reader: region {} not loaded: {}", region, e);
            }
            RegionLoad { region, dataset }
        })
        .collect();
    Ok(loads)
}

/// Read a single-region table written with a `CLUSTER` column.
pub fn read_clustered(path: &Path) -> Result<ClusteredDataset> {
    let rows = read_raw_rows(path, true)?;
    let region = match rows.first().and_then(|r| r.region.clone()) {
        Some(region) => region,
        None => {
            return Err(AnalysisError::Schema(format!(
                "clustered table '{}' has no rows",
                path.display()
            )))
        }
    };

    let mut observations = Vec::with_capacity(rows.len());
    let mut labels = Vec::with_capacity(rows.len());
    for (line, raw) in rows.iter().enumerate() {
        observations.push(to_observation(line, raw)?);
        let label = raw
            .cluster
            .filter(|&c| c >= 1)
            .ok_or_else(|| row_error(line, "CLUSTER must be a positive integer"))?;
        labels.push(label as usize);
    }

    let dataset = RegionDataset::from_observations(&region, observations)?;
    let cluster_count = labels.iter().copied().max().unwrap_or(0);
    let assignment = ClusterAssignment::new(labels, cluster_count)?;
    ClusteredDataset::new(dataset, assignment)
}

/// Column names of a CSV table as DuckDB detects them.
fn describe_columns(con: &Connection, path: &Path) -> Result<Vec<String>> {
    let sql = format!("DESCRIBE SELECT * FROM {}", csv_source(path));
    let mut stmt = con.prepare(&sql).map_err(|e| io_error(path, e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| io_error(path, e))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| io_error(path, e))?;
    Ok(names)
}

fn read_raw_rows(path: &Path, with_cluster: bool) -> Result<Vec<RawRow>> {
    if !path.exists() {
        return Err(AnalysisError::Io {
            path: path.display().to_string(),
            failure: IoFailure::NotFound,
        });
    }

    let con = open_connection(path)?;
    let columns = describe_columns(&con, path)?;

    let mut required: Vec<&str> = REQUIRED_COLUMNS.to_vec();
    if with_cluster {
        required.push(CLUSTER_COLUMN);
    }
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|have| have == c))
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::Schema(format!(
            "'{}' is missing column(s): {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let has = |name: &str| columns.iter().any(|c| c == name);
    if has("DAY") && !has("MONTH") {
        return Err(AnalysisError::Schema(format!(
            "'{}' has a DAY column without MONTH",
            path.display()
        )));
    }
    let optional = |name: &str, ty: &str| {
        if has(name) {
            format!("TRY_CAST({} AS {})", quote(name), ty)
        } else {
            format!("CAST(NULL AS {})", ty)
        }
    };

    let sql = format!(
        "SELECT CAST({} AS VARCHAR), TRY_CAST({} AS BIGINT), CAST({} AS VARCHAR), {}, {}, \
         TRY_CAST({} AS DOUBLE), TRY_CAST({} AS DOUBLE), TRY_CAST({} AS DOUBLE), \
         TRY_CAST({} AS DOUBLE), TRY_CAST({} AS DOUBLE), {} FROM {}",
        quote("ID"),
        quote("YEAR"),
        quote("REGION_TYPE"),
        optional("MONTH", "BIGINT"),
        optional("DAY", "BIGINT"),
        quote("AVERAGE"),
        quote("MAX"),
        quote("MIN"),
        quote("STD"),
        quote("MEDIAN"),
        optional(CLUSTER_COLUMN, "BIGINT"),
        csv_source(path),
    );

    // Numeric cells that fail to convert come back NULL and are reported per row.
    let schema_error = |e: duckdb::Error| {
        AnalysisError::Schema(format!("'{}' could not be parsed: {}", path.display(), e))
    };
    let mut stmt = con.prepare(&sql).map_err(schema_error)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawRow {
                id: row.get(0)?,
                year: row.get(1)?,
                region: row.get(2)?,
                month: row.get(3)?,
                day: row.get(4)?,
                values: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                cluster: row.get(10)?,
            })
        })
        .map_err(schema_error)?
        .collect::<std::result::Result<Vec<RawRow>, _>>()
        .map_err(schema_error)?;

    log::debug!("table_reader: read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn to_observation(line: usize, raw: &RawRow) -> Result<Observation> {
    let year = raw.year.ok_or_else(|| row_error(line, "YEAR is empty or not an integer"))?;
    let region = raw
        .region
        .clone()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| row_error(line, "REGION_TYPE is empty"))?;

    let mut values = [0.0; 5];
    for (slot, (value, column)) in values.iter_mut().zip(raw.values.iter().zip([
        "AVERAGE", "MAX", "MIN", "STD", "MEDIAN",
    ])) {
        *slot = value
            .filter(|v| v.is_finite())
            .ok_or_else(|| row_error(line, &format!("{} is empty, not a number or not finite", column)))?;
    }

    let month = raw.month.map(|m| to_u32(line, "MONTH", m)).transpose()?;
    let day = raw.day.map(|d| to_u32(line, "DAY", d)).transpose()?;
    let date = ObservationDate::new(year as i32, month, day)?;

    Ok(Observation {
        station_id: raw.id.clone().filter(|id| !id.is_empty()),
        region,
        date,
        average: values[0],
        max: values[1],
        min: values[2],
        std: values[3],
        median: values[4],
    })
}

fn to_u32(line: usize, column: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| row_error(line, &format!("{} = {} is out of range", column, value)))
}

fn row_error(line: usize, msg: &str) -> AnalysisError {
    // +2: header line plus 1-based numbering
    AnalysisError::Schema(format!("row {}: {}", line + 2, msg))
}

fn csv_source(path: &Path) -> String {
    format!(
        "read_csv_auto('{}', header = true)",
        escape_literal(&path.display().to_string())
    )
}

/// Double-quote an identifier, doubling any internal quotes.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a SQL string literal by doubling single quotes.
pub(crate) fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_reads_yearly_table_without_month_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "yearly.csv",
            "ID,YEAR,REGION_TYPE,AVERAGE,MAX,MIN,STD,MEDIAN\n\
             601000,1990,HUMID,18.5,30.1,5.2,4.4,18.0\n\
             602300,1990,ARID,24.0,41.3,9.9,6.1,23.5\n",
        );

        let rows = read_observations(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].station_id.as_deref(), Some("601000"));
        assert_eq!(rows[0].date, ObservationDate::year(1990));
        assert_eq!(rows[1].region, "ARID");
        assert!((rows[1].max - 41.3).abs() < 1e-9);
    }

    #[test]
    fn test_daily_table_normalizes_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "daily.csv",
            "ID,YEAR,MONTH,DAY,REGION_TYPE,AVERAGE,MAX,MIN,STD,MEDIAN\n\
             601000,2001,3,14,HUMID,18.5,30.1,5.2,4.4,18.0\n",
        );
        let rows = read_observations(&path).unwrap();
        assert_eq!(rows[0].date.to_naive_date(), chrono::NaiveDate::from_ymd_opt(2001, 3, 14));
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "broken.csv",
            "ID,YEAR,REGION_TYPE,AVERAGE,MAX,MIN,STD\n601000,1990,HUMID,1,2,3,4\n",
        );
        let err = read_observations(&path).unwrap_err();
        match err {
            AnalysisError::Schema(msg) => assert!(msg.contains("MEDIAN"), "message: {}", msg),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_calendar_date_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "baddate.csv",
            "ID,YEAR,MONTH,DAY,REGION_TYPE,AVERAGE,MAX,MIN,STD,MEDIAN\n\
             601000,2001,2,30,HUMID,18.5,30.1,5.2,4.4,18.0\n",
        );
        assert!(matches!(read_observations(&path), Err(AnalysisError::Schema(_))));
    }

    #[test]
    fn test_absent_file_is_not_found() {
        let err = read_observations(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(
            matches!(
                err,
                AnalysisError::Io {
                    failure: IoFailure::NotFound,
                    ..
                }
            ),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_read_regions_splits_by_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "mixed.csv",
            "ID,YEAR,REGION_TYPE,AVERAGE,MAX,MIN,STD,MEDIAN\n\
             601000,1990,HUMID,18.5,30.1,5.2,4.4,18.0\n\
             602300,1990,ARID,24.0,41.3,9.9,6.1,23.5\n\
             601050,1991,HUMID,19.0,31.0,6.0,4.0,19.0\n",
        );
        let loads = read_regions(&path).unwrap();
        let labels: Vec<&str> = loads.iter().map(|l| l.region.as_str()).collect();
        assert_eq!(labels, vec!["ARID", "HUMID"]);
        let humid = loads[1].dataset.as_ref().unwrap();
        assert_eq!(humid.region(), "HUMID");
        assert_eq!(humid.len(), 2);
    }

    #[test]
    fn test_bad_row_fails_only_its_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "one_bad.csv",
            "ID,YEAR,REGION_TYPE,AVERAGE,MAX,MIN,STD,MEDIAN\n\
             602300,1990,ARID,24.0,41.3,9.9,6.1,23.5\n\
             601000,1990,HUMID,,30.1,5.2,4.4,18.0\n\
             602300,1991,ARID,24.5,42.0,10.1,6.0,24.0\n",
        );
        let loads = read_regions(&path).unwrap();
        assert_eq!(loads.len(), 2);

        assert_eq!(loads[0].region, "ARID");
        assert_eq!(loads[0].dataset.as_ref().map(|d| d.len()), Ok(2));

        assert_eq!(loads[1].region, "HUMID");
        match &loads[1].dataset {
            Err(AnalysisError::Schema(msg)) => {
                assert!(msg.contains("row 3") && msg.contains("AVERAGE"), "message: {}", msg)
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_unlabelled_row_fails_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "no_label.csv",
            "ID,YEAR,REGION_TYPE,AVERAGE,MAX,MIN,STD,MEDIAN\n\
             602300,1990,ARID,24.0,41.3,9.9,6.1,23.5\n\
             601000,1990,,18.5,30.1,5.2,4.4,18.0\n",
        );
        assert!(matches!(read_regions(&path), Err(AnalysisError::Schema(_))));
    }
}
