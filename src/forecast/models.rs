//! Seasonal ARIMA (1,1,1)(1,1,1,12) by conditional least squares.
//!
//! The series is differenced once at lag 1 and once at lag 12, and the ARMA
//! part is fitted on the result by minimizing the conditional sum of squared
//! innovations with Levenberg-Marquardt. The AR coefficients are
//! unconstrained, so non-stationary solutions are allowed.
//!
//! The MA coefficients are searched as `sin(u)`. A non-invertible MA factor
//! has the same Gaussian likelihood as its reflection inside the unit circle,
//! so nothing is lost, and a unit-root optimum (typical of an over-differenced
//! series) becomes an interior point instead of a valley the optimizer chases
//! forever.

use chrono::NaiveDate;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{Dyn, OMatrix, OVector, Owned, Vector4, U4};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::common::cancel::CancellationToken;
use crate::common::error::{AnalysisError, FitFailure, Result};
use crate::common::types::month_end_after;

use super::ForecastPoint;

/// Seasonal cycle length in months.
pub const SEASONAL_PERIOD: usize = 12;

/// Minimum number of monthly observations needed to fit the model.
pub const MIN_FORECAST_MONTHS: usize = 36;

/// Largest lag in the ARMA polynomials: (1 - aB)(1 - AB^12) reaches 13.
const ARMA_LAGS: usize = SEASONAL_PERIOD + 1;

/// Number of estimated coefficients.
const COEFFICIENTS: usize = 4;

/// Starting coefficients `[ar, ma, seasonal_ar, seasonal_ma]`; the best successful fit wins.
const STARTING_POINTS: [[f64; 4]; 3] = [
    [0.1, 0.1, 0.1, 0.1],
    [0.0, 0.0, 0.0, 0.0],
    [0.5, -0.5, 0.3, -0.5],
];

/// Optimizer patience, in evaluations per parameter.
const FIT_PATIENCE: usize = 200;

/// Innovations beyond this magnitude mark a divergent parameter region.
const DIVERGENCE_LIMIT: f64 = 1e6;

/// Relative step of the central-difference Jacobian.
const JACOBIAN_STEP: f64 = 1e-6;

/// Estimated ARMA coefficients of the differenced series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SarimaCoefficients {
    pub ar: f64,
    pub ma: f64,
    pub seasonal_ar: f64,
    pub seasonal_ma: f64,
}

impl SarimaCoefficients {
    /// Map search parameters to coefficients. MA entries go through `sin`.
    fn from_params(p: &Vector4<f64>) -> Self {
        SarimaCoefficients {
            ar: p[0],
            ma: p[1].sin(),
            seasonal_ar: p[2],
            seasonal_ma: p[3].sin(),
        }
    }

    /// Search parameters that map back to these coefficients. MA entries must lie in [-1, 1].
    fn to_params(&self) -> Vector4<f64> {
        Vector4::new(
            self.ar,
            self.ma.clamp(-1.0, 1.0).asin(),
            self.seasonal_ar,
            self.seasonal_ma.clamp(-1.0, 1.0).asin(),
        )
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.ar, self.ma, self.seasonal_ar, self.seasonal_ma]
    }

    fn is_finite(&self) -> bool {
        self.to_array().iter().all(|c| c.is_finite())
    }

    /// (1 - ar B)(1 - seasonal_ar B^12)
    fn ar_polynomial(&self) -> Vec<f64> {
        poly_mul(&[1.0, -self.ar], &seasonal_factor(-self.seasonal_ar))
    }

    /// (1 + ma B)(1 + seasonal_ma B^12)
    fn ma_polynomial(&self) -> Vec<f64> {
        poly_mul(&[1.0, self.ma], &seasonal_factor(self.seasonal_ma))
    }
}

/// Coefficients of 1 + c B^12.
fn seasonal_factor(c: f64) -> Vec<f64> {
    let mut factor = vec![0.0; SEASONAL_PERIOD + 1];
    factor[0] = 1.0;
    factor[SEASONAL_PERIOD] = c;
    factor
}

/// Product of two polynomials in the backshift operator.
fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut product = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            product[i + j] += x * y;
        }
    }
    product
}

fn difference(values: &[f64], lag: usize) -> Vec<f64> {
    values[lag..]
        .iter()
        .zip(values.iter())
        .map(|(current, earlier)| current - earlier)
        .collect()
}

/// Innovations of `ar(B) w = ma(B) e`, with shocks before `ARMA_LAGS` taken as zero.
///
/// The result has one entry per element of `w`; the first `ARMA_LAGS` are zero.
fn innovations(w: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let mut e = vec![0.0; w.len()];
    for t in ARMA_LAGS..w.len() {
        let mut value: f64 = ar.iter().enumerate().map(|(i, a)| a * w[t - i]).sum();
        for (j, m) in ma.iter().enumerate().skip(1) {
            value -= m * e[t - j];
        }
        e[t] = value;
    }
    e
}

/// Psi weights of `ar(B) y = ma(B) e`: the MA(infinity) expansion ma / ar.
fn psi_weights(ar: &[f64], ma: &[f64], count: usize) -> Vec<f64> {
    let mut psi: Vec<f64> = Vec::with_capacity(count);
    for j in 0..count {
        let mut value = ma.get(j).copied().unwrap_or(0.0);
        for i in 1..ar.len().min(j + 1) {
            value -= ar[i] * psi[j - i];
        }
        psi.push(value);
    }
    psi
}

/// Conditional least-squares problem over `[ar, ma, seasonal_ar, seasonal_ma]`.
struct SarimaProblem {
    params: Vector4<f64>,
    /// The series after lag-1 and lag-12 differencing.
    differenced: Vec<f64>,
    cancel: CancellationToken,
}

impl SarimaProblem {
    fn residual_count(&self) -> usize {
        self.differenced.len() - ARMA_LAGS
    }

    /// Innovations at `params`. A divergent recursion is replaced by a flat
    /// penalty so the optimizer backs away instead of seeing NaN.
    fn innovations_at(&self, params: &Vector4<f64>) -> OVector<f64, Dyn> {
        let coefficients = SarimaCoefficients::from_params(params);
        let e = innovations(
            &self.differenced,
            &coefficients.ar_polynomial(),
            &coefficients.ma_polynomial(),
        );
        let used = &e[ARMA_LAGS..];
        if used
            .iter()
            .all(|v| v.is_finite() && v.abs() <= DIVERGENCE_LIMIT)
        {
            OVector::<f64, Dyn>::from_column_slice(used)
        } else {
            OVector::<f64, Dyn>::from_element(used.len(), DIVERGENCE_LIMIT)
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, U4> for SarimaProblem {
    type ParameterStorage = Owned<f64, U4>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U4>;

    fn set_params(&mut self, p: &Vector4<f64>) {
        self.params.copy_from(p);
    }

    fn params(&self) -> Vector4<f64> {
        self.params
    }

    fn residuals(&self) -> Option<OVector<f64, Dyn>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        Some(self.innovations_at(&self.params))
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U4>> {
        let mut jac = OMatrix::<f64, Dyn, U4>::zeros(self.residual_count());
        for k in 0..COEFFICIENTS {
            let step = JACOBIAN_STEP * self.params[k].abs().max(1.0);
            let mut forward = self.params;
            forward[k] += step;
            let mut backward = self.params;
            backward[k] -= step;
            let column =
                (self.innovations_at(&forward) - self.innovations_at(&backward)) / (2.0 * step);
            jac.column_mut(k).copy_from(&column);
        }
        Some(jac)
    }
}

/// Best converged optimizer run so far.
struct Candidate {
    coefficients: SarimaCoefficients,
    objective: f64,
    termination: String,
}

/// A fitted model, ready to forecast.
#[derive(Debug, Clone)]
pub struct SarimaFit {
    pub coefficients: SarimaCoefficients,
    /// Innovation variance, sum of squares over the number of innovations.
    pub sigma2: f64,
    /// Conditional Gaussian log-likelihood. `None` when `sigma2` is zero.
    pub log_likelihood: Option<f64>,
    pub aic: Option<f64>,
    /// Residual evaluations used by the optimizer, summed over starting points.
    pub evaluations: usize,
    pub termination: String,
    history: Vec<f64>,
    /// Innovations aligned with `history`, zero where undefined.
    shocks: Vec<f64>,
}

/// Fit SARIMA(1,1,1)(1,1,1,12) to an evenly spaced monthly series.
pub fn fit_sarima(values: &[f64], cancel: &CancellationToken) -> Result<SarimaFit> {
    let n = values.len();
    if n < MIN_FORECAST_MONTHS {
        return Err(AnalysisError::insufficient(
            MIN_FORECAST_MONTHS,
            n,
            "monthly observations for a seasonal fit",
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::InvalidParameter(
            "series values must be finite".to_string(),
        ));
    }
    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }

    let differenced = difference(&difference(values, 1), SEASONAL_PERIOD);
    let mut best: Option<Candidate> = None;
    let mut failures: Vec<FitFailure> = Vec::new();
    let mut evaluations = 0;

    for start in STARTING_POINTS {
        let initial = SarimaCoefficients {
            ar: start[0],
            ma: start[1],
            seasonal_ar: start[2],
            seasonal_ma: start[3],
        };
        let problem = SarimaProblem {
            params: initial.to_params(),
            differenced: differenced.clone(),
            cancel: cancel.clone(),
        };
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(FIT_PATIENCE)
            .minimize(problem);
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        evaluations += report.number_of_evaluations;

        let coefficients = SarimaCoefficients::from_params(&problem.params);
        let termination = format!("{:?}", report.termination);
        if !report.termination.was_successful()
            || !coefficients.is_finite()
            || !report.objective_function.is_finite()
        {
            log::debug!(
                "forecast: sarima start {:?} ended with {} after {} evaluations",
                start,
                termination,
                report.number_of_evaluations
            );
            failures.push(FitFailure {
                termination,
                evaluations: report.number_of_evaluations,
                objective: report.objective_function,
                params: coefficients.to_array(),
            });
            continue;
        }
        if best
            .as_ref()
            .map_or(true, |b| report.objective_function < b.objective)
        {
            best = Some(Candidate {
                coefficients,
                objective: report.objective_function,
                termination,
            });
        }
    }

    let Some(Candidate {
        coefficients,
        termination,
        ..
    }) = best
    else {
        let closest = failures
            .into_iter()
            .min_by(|a, b| a.objective.total_cmp(&b.objective));
        return Err(AnalysisError::ModelFit(closest.unwrap_or(FitFailure {
            termination: "no starting point was tried".to_string(),
            evaluations,
            objective: f64::NAN,
            params: [f64::NAN; 4],
        })));
    };
    let failure = |reason: String| {
        AnalysisError::ModelFit(FitFailure {
            termination: reason,
            evaluations,
            objective: f64::NAN,
            params: coefficients.to_array(),
        })
    };

    let e = innovations(
        &differenced,
        &coefficients.ar_polynomial(),
        &coefficients.ma_polynomial(),
    );
    let used = &e[ARMA_LAGS..];
    if used.iter().any(|v| !v.is_finite() || v.abs() > DIVERGENCE_LIMIT) {
        return Err(failure(format!("{} with divergent innovations", termination)));
    }

    let m = used.len() as f64;
    let sigma2 = used.iter().map(|v| v * v).sum::<f64>() / m;
    // A perfect fit has no defined Gaussian likelihood.
    let log_likelihood = (sigma2 > 0.0)
        .then(|| -0.5 * m * ((2.0 * std::f64::consts::PI * sigma2).ln() + 1.0));
    let aic = log_likelihood.map(|ll| 2.0 * (COEFFICIENTS + 1) as f64 - 2.0 * ll);

    log::debug!(
        "forecast: sarima fit ar={:.4} ma={:.4} sar={:.4} sma={:.4} sigma2={:.4} after {} evaluations ({})",
        coefficients.ar,
        coefficients.ma,
        coefficients.seasonal_ar,
        coefficients.seasonal_ma,
        sigma2,
        evaluations,
        termination
    );

    // w[t] corresponds to y[t + ARMA_LAGS], so shocks shift by the same amount.
    let mut shocks = vec![0.0; ARMA_LAGS];
    shocks.extend_from_slice(&e);

    Ok(SarimaFit {
        coefficients,
        sigma2,
        log_likelihood,
        aic,
        evaluations,
        termination,
        history: values.to_vec(),
        shocks,
    })
}

impl SarimaFit {
    /// AR polynomial of the undifferenced series: ar(B)(1 - B)(1 - B^12).
    fn integrated_ar_polynomial(&self) -> Vec<f64> {
        poly_mul(
            &poly_mul(&self.coefficients.ar_polynomial(), &[1.0, -1.0]),
            &seasonal_factor(-1.0),
        )
    }

    /// Forecast `horizon` months past `last_date` with symmetric normal bounds.
    pub fn forecast(
        &self,
        last_date: NaiveDate,
        horizon: usize,
        confidence_level: f64,
    ) -> Result<Vec<ForecastPoint>> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| AnalysisError::InvalidParameter(format!("normal distribution: {}", e)))?;
        let z = normal.inverse_cdf(1.0 - (1.0 - confidence_level) / 2.0);

        let ar = self.integrated_ar_polynomial();
        let ma = self.coefficients.ma_polynomial();
        let psi = psi_weights(&ar, &ma, horizon);

        let mut y = self.history.clone();
        let mut e = self.shocks.clone();
        let mut variance_sum = 0.0;
        let mut points = Vec::with_capacity(horizon);

        for h in 1..=horizon {
            let t = y.len();
            let mut point = 0.0;
            for (i, a) in ar.iter().enumerate().skip(1) {
                point -= a * y[t - i];
            }
            for (j, m) in ma.iter().enumerate().skip(1) {
                point += m * e[t - j];
            }
            y.push(point);
            e.push(0.0);

            variance_sum += psi[h - 1] * psi[h - 1];
            let half_width = z * (self.sigma2 * variance_sum).sqrt();
            if !point.is_finite() || !half_width.is_finite() {
                return Err(AnalysisError::ModelFit(FitFailure {
                    termination: format!("non-finite forecast at step {}", h),
                    evaluations: self.evaluations,
                    objective: self.sigma2,
                    params: self.coefficients.to_array(),
                }));
            }

            let date = month_end_after(last_date, h as u32).ok_or_else(|| {
                AnalysisError::InvalidParameter(format!(
                    "forecast date {} months after {} is out of range",
                    h, last_date
                ))
            })?;
            points.push(ForecastPoint {
                date,
                point,
                lower: point - half_width,
                upper: point + half_width,
            });
        }

        Ok(points)
    }
}
