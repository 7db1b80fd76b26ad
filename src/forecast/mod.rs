pub mod models;
pub mod params;
pub mod seasonality;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::common::cancel::CancellationToken;
use crate::common::error::{AnalysisError, Result};
use crate::common::types::{month_end, Granularity, MonthlySeries, RegionDataset, TemperatureField};
use models::{fit_sarima, SarimaCoefficients, SEASONAL_PERIOD};
use params::ForecastParams;
use seasonality::{dominant_period, SeasonalPeriod};

/// One forecast month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    /// Last day of the forecast month.
    pub date: NaiveDate,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

/// How the model that produced a forecast was fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct FitDiagnostics {
    pub coefficients: SarimaCoefficients,
    pub sigma2: f64,
    /// Undefined for a series the model reproduces exactly.
    pub log_likelihood: Option<f64>,
    pub aic: Option<f64>,
    pub evaluations: usize,
    pub termination: String,
    /// Monthly observations the model was fitted on.
    pub observations: usize,
    /// Calendar months absent from the fitted series.
    pub missing_months: usize,
    /// Strongest cycle found in the series, if any.
    pub seasonal_period: Option<SeasonalPeriod>,
}

/// Forecast for one region and temperature column.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    pub region: String,
    pub field: TemperatureField,
    pub confidence_level: f64,
    /// One entry per horizon month, in date order.
    pub points: Vec<ForecastPoint>,
    pub diagnostics: FitDiagnostics,
}

/// Resample a month-aggregated dataset onto month-end dates.
///
/// Duplicate months are averaged. Months without rows are left out, never
/// filled in.
pub fn monthly_series(dataset: &RegionDataset, field: TemperatureField) -> Result<MonthlySeries> {
    if dataset.granularity() != Granularity::Month {
        return Err(AnalysisError::AggregationPolicy(format!(
            "forecasting needs month-aggregated data, region {} is at {} granularity",
            dataset.region(),
            dataset.granularity()
        )));
    }

    let mut months: BTreeMap<(i32, u32), (f64, usize)> = BTreeMap::new();
    for obs in dataset.observations() {
        let month = obs.date.month.ok_or_else(|| {
            AnalysisError::AggregationPolicy(format!(
                "row for year {} in region {} has no month",
                obs.date.year,
                dataset.region()
            ))
        })?;
        let entry = months.entry((obs.date.year, month)).or_insert((0.0, 0));
        entry.0 += obs.field(field);
        entry.1 += 1;
    }

    let mut dates = Vec::with_capacity(months.len());
    let mut values = Vec::with_capacity(months.len());
    for ((year, month), (sum, count)) in months {
        let date = month_end(year, month).ok_or_else(|| {
            AnalysisError::Schema(format!("month {}-{:02} is out of range", year, month))
        })?;
        dates.push(date);
        values.push(sum / count as f64);
    }
    Ok(MonthlySeries { dates, values })
}

/// Fit the seasonal model to a monthly series and forecast `params.horizon` months.
pub fn forecast_series(
    region: &str,
    series: &MonthlySeries,
    params: &ForecastParams,
    cancel: &CancellationToken,
) -> Result<ForecastResult> {
    params.validate()?;

    let missing_months = series.missing_months();
    if missing_months > 0 {
        log::warn!(
            "forecast: {}: {} calendar months missing, fitting on {} observed months",
            region,
            missing_months,
            series.len()
        );
    }

    let last_date = series.last_date().ok_or_else(|| {
        AnalysisError::insufficient(
            models::MIN_FORECAST_MONTHS,
            0,
            "monthly observations for a seasonal fit",
        )
    })?;

    let seasonal_period = dominant_period(&series.values);
    match seasonal_period {
        Some(found) if found.period as usize != SEASONAL_PERIOD => log::info!(
            "forecast: {}: strongest cycle is {} months (strength {:.2}), model assumes {}",
            region,
            found.period,
            found.strength,
            SEASONAL_PERIOD
        ),
        None => log::info!("forecast: {}: no clear seasonal cycle detected", region),
        _ => {}
    }

    let fit = fit_sarima(&series.values, cancel)?;
    let points = fit.forecast(last_date, params.horizon, params.confidence_level)?;

    log::info!(
        "forecast: {}: {} months of {} past {} (aic {:?})",
        region,
        points.len(),
        params.field.column(),
        last_date,
        fit.aic
    );

    Ok(ForecastResult {
        region: region.to_string(),
        field: params.field,
        confidence_level: params.confidence_level,
        points,
        diagnostics: FitDiagnostics {
            coefficients: fit.coefficients,
            sigma2: fit.sigma2,
            log_likelihood: fit.log_likelihood,
            aic: fit.aic,
            evaluations: fit.evaluations,
            termination: fit.termination,
            observations: series.len(),
            missing_months,
            seasonal_period,
        },
    })
}

/// Forecast one region from its month-aggregated dataset.
///
/// Any other granularity is rejected before anything is computed.
pub fn forecast_region(
    dataset: &RegionDataset,
    params: &ForecastParams,
    cancel: &CancellationToken,
) -> Result<ForecastResult> {
    let series = monthly_series(dataset, params.field)?;
    forecast_series(dataset.region(), &series, params, cancel)
}
