//! Valuation transform.
//!
//! Turns a three-day stock reaction into the expected value of the patent
//! signal under a truncated-normal model:
//!
//! ```text
//! R      = exp(ln(1+r0) + ln(1+r1) + ln(1+r2)) - 1
//! v      = vol * sqrt(3)
//! delta  = 1 - exp(-gamma)
//! a      = -sqrt(delta) * R / v
//! hazard = phi(a) / (1 - Phi(a))        (0 when Phi(a) is not below 1)
//! m      = delta * R + sqrt(delta) * v * hazard
//! mw     = m * mkcap
//! ```
//!
//! Every row is independent. A row whose inputs make the model undefined
//! keeps NaN in the affected fields; it never aborts the table.

use serde::Serialize;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::time::Instant;

use crate::error::{Result, ValuationError};
use crate::record::{EventRecord, EventTable, ValuedRecord, ValuedTable};

/// Trading days in the event window.
pub const WINDOW_DAYS: f64 = 3.0;

/// Per-table counts of numerically undefined or saturated rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformDiagnostics {
    /// Rows valued
    pub rows: usize,
    /// Rows whose compounded return is NaN (a daily return below -100%)
    pub undefined_return: usize,
    /// Rows whose standardized surprise is NaN (zero or missing volatility)
    pub undefined_surprise: usize,
    /// Rows where the upper tail probability underflowed and the hazard was forced to 0
    pub saturated_hazard: usize,
    /// Rows whose currency value is not finite
    pub undefined_value: usize,
}

impl TransformDiagnostics {
    fn record(&mut self, row: &ValuedRecord, saturated: bool) {
        self.rows += 1;
        if row.cum_return.is_nan() {
            self.undefined_return += 1;
        }
        if row.surprise.is_nan() {
            self.undefined_surprise += 1;
        }
        if saturated {
            self.saturated_hazard += 1;
        }
        if !row.value.is_finite() {
            self.undefined_value += 1;
        }
    }

    /// True when every row produced a finite value.
    pub fn is_clean(&self) -> bool {
        self.undefined_value == 0
    }
}

/// Informativeness of the event signal for a given signal-to-noise parameter.
pub fn informativeness(gamma: f64) -> f64 {
    -(-gamma).exp_m1()
}

/// Three-day compounded return, summed in log space.
///
/// Missing returns count as 0. A return of exactly -1 gives -1, anything
/// below gives NaN.
pub fn cumulative_return(ret_d0: Option<f64>, ret_d1: Option<f64>, ret_d2: Option<f64>) -> f64 {
    let log_sum: f64 = [ret_d0, ret_d1, ret_d2]
        .into_iter()
        .map(|r| r.unwrap_or(0.0).ln_1p())
        .sum();
    log_sum.exp_m1()
}

/// Scale a daily volatility to the event window. Missing volatility is NaN.
pub fn window_volatility(vol: Option<f64>) -> f64 {
    vol.map_or(f64::NAN, |v| v * WINDOW_DAYS.sqrt())
}

/// The truncated-normal valuation model for one `gamma`.
#[derive(Debug, Clone)]
pub struct ValuationModel {
    gamma: f64,
    delta: f64,
    sqrt_delta: f64,
    normal: Normal,
}

impl ValuationModel {
    /// Build the model, rejecting a non-finite or non-positive `gamma`.
    pub fn new(gamma: f64) -> Result<Self> {
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(ValuationError::InvalidGamma(gamma));
        }

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ValuationError::Internal(format!("standard normal: {e:?}")))?;
        let delta = informativeness(gamma);

        Ok(Self {
            gamma,
            delta,
            sqrt_delta: delta.sqrt(),
            normal,
        })
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Standardized surprise. NaN when the window volatility is zero or NaN.
    pub fn surprise(&self, cum_return: f64, window_vol: f64) -> f64 {
        if window_vol == 0.0 {
            return f64::NAN;
        }
        -self.sqrt_delta * cum_return / window_vol
    }

    /// Inverse Mills ratio at `a`, and whether the guard fired.
    ///
    /// Returns 0 whenever `Phi(a) < 1` does not hold, which covers both an
    /// upper tail that underflowed to zero and a NaN `a`.
    pub fn hazard(&self, a: f64) -> (f64, bool) {
        let cdf = self.normal.cdf(a);
        if cdf < 1.0 {
            (self.normal.pdf(a) / (1.0 - cdf), false)
        } else {
            (0.0, !a.is_nan())
        }
    }

    /// Value one event.
    pub fn value(&self, event: &EventRecord) -> ValuedRecord {
        self.value_inner(event).0
    }

    fn value_inner(&self, event: &EventRecord) -> (ValuedRecord, bool) {
        let cum_return = cumulative_return(event.ret_d0, event.ret_d1, event.ret_d2);
        let window_vol = window_volatility(event.vol);
        let surprise = self.surprise(cum_return, window_vol);
        let (hazard, saturated) = self.hazard(surprise);
        let expected_return = self.delta * cum_return + self.sqrt_delta * window_vol * hazard;
        let value = expected_return * event.mkcap.unwrap_or(f64::NAN);

        let row = ValuedRecord {
            event: event.clone(),
            cum_return,
            window_vol,
            delta: self.delta,
            surprise,
            hazard,
            expected_return,
            value,
        };
        (row, saturated)
    }

    /// Value every row of a table, preserving order.
    pub fn value_table(&self, table: &EventTable) -> ValuedTable {
        let started = Instant::now();
        let mut diagnostics = TransformDiagnostics::default();
        let rows = table
            .rows
            .iter()
            .map(|event| {
                let (row, saturated) = self.value_inner(event);
                diagnostics.record(&row, saturated);
                row
            })
            .collect();

        tracing::info!(
            rows = diagnostics.rows,
            gamma = self.gamma,
            delta = self.delta,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Valuation transform complete"
        );

        if !diagnostics.is_clean() || diagnostics.undefined_surprise > 0 {
            tracing::warn!(
                undefined_return = diagnostics.undefined_return,
                undefined_surprise = diagnostics.undefined_surprise,
                undefined_value = diagnostics.undefined_value,
                "Some rows have numerically undefined valuations"
            );
        }
        if diagnostics.saturated_hazard > 0 {
            tracing::debug!(
                saturated_hazard = diagnostics.saturated_hazard,
                "Upper tail probability underflowed, hazard forced to zero"
            );
        }

        ValuedTable {
            passthrough: table.passthrough,
            gamma: self.gamma,
            delta: self.delta,
            rows,
            diagnostics,
        }
    }
}

/// Run the valuation transform over a table.
pub fn value_events(table: &EventTable, gamma: f64) -> Result<ValuedTable> {
    Ok(ValuationModel::new(gamma)?.value_table(table))
}
