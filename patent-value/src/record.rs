//! Row and table types flowing through the pipeline.
//!
//! Each stage consumes a table by reference and returns a new one:
//! [`EventTable`] → [`ValuedTable`] → [`AllocatedTable`] → [`FirmDayTable`].

use chrono::NaiveDate;

use crate::allocation::AggregationDiagnostics;
use crate::dataset::{
    COL_DATE, COL_DUPLICATE_COUNT, COL_FIRM, COL_PATENT_COUNT, COL_VALUE_AVG, COL_YEAR,
};
use crate::transform::TransformDiagnostics;

/// Optional columns carried from input to output when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Passthrough {
    /// `year` column present
    pub year: bool,
    /// `DuplicateCount` column present
    pub duplicate_count: bool,
}

impl Passthrough {
    /// Both optional columns present.
    pub const ALL: Self = Self {
        year: true,
        duplicate_count: true,
    };
}

/// One patent-bearing observation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Stock code of the issuing company
    pub firm_id: String,
    /// Event date
    pub date: NaiveDate,
    /// Simple return on the event day
    pub ret_d0: Option<f64>,
    /// Simple return on the first day after the event
    pub ret_d1: Option<f64>,
    /// Simple return on the second day after the event
    pub ret_d2: Option<f64>,
    /// Daily volatility estimate
    pub vol: Option<f64>,
    /// Market capitalization, currency units
    pub mkcap: Option<f64>,
    pub year: Option<i32>,
    pub duplicate_count: Option<i64>,
}

impl EventRecord {
    /// Create a record with all numeric inputs present and no passthrough values.
    pub fn new(
        firm_id: impl Into<String>,
        date: NaiveDate,
        returns: [f64; 3],
        vol: f64,
        mkcap: f64,
    ) -> Self {
        Self {
            firm_id: firm_id.into(),
            date,
            ret_d0: Some(returns[0]),
            ret_d1: Some(returns[1]),
            ret_d2: Some(returns[2]),
            vol: Some(vol),
            mkcap: Some(mkcap),
            year: None,
            duplicate_count: None,
        }
    }

    /// Set the passthrough `year`.
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }
}

/// Input table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    pub passthrough: Passthrough,
    pub rows: Vec<EventRecord>,
}

impl EventTable {
    pub fn new(rows: Vec<EventRecord>, passthrough: Passthrough) -> Self {
        Self { passthrough, rows }
    }

    /// Build a table, treating an optional column as present when any row carries it.
    pub fn from_rows(rows: Vec<EventRecord>) -> Self {
        let passthrough = Passthrough {
            year: rows.iter().any(|r| r.year.is_some()),
            duplicate_count: rows.iter().any(|r| r.duplicate_count.is_some()),
        };
        Self { passthrough, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An event record with its valuation.
///
/// NaN marks a value that is numerically undefined for this row.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuedRecord {
    pub event: EventRecord,
    /// Three-day compounded return `R`
    pub cum_return: f64,
    /// Three-day window volatility `v`
    pub window_vol: f64,
    /// Informativeness, identical for every row of a table
    pub delta: f64,
    /// Standardized surprise `a`
    pub surprise: f64,
    /// Guarded inverse Mills ratio at `a`
    pub hazard: f64,
    /// Conditional expected return `m`
    pub expected_return: f64,
    /// Currency value of the signal `mw`
    pub value: f64,
}

impl ValuedRecord {
    /// True when the currency value is a finite number.
    pub fn is_defined(&self) -> bool {
        self.value.is_finite()
    }
}

/// Output of the valuation transform.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuedTable {
    pub passthrough: Passthrough,
    pub gamma: f64,
    pub delta: f64,
    pub rows: Vec<ValuedRecord>,
    pub diagnostics: TransformDiagnostics,
}

impl ValuedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A valued record joined with its firm-day patent count.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedRecord {
    pub valued: ValuedRecord,
    /// Rows sharing this record's firm-day, always at least 1
    pub patent_count: usize,
    /// This row's even share of its value
    pub value_avg: f64,
}

/// Every input row with its allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedTable {
    pub passthrough: Passthrough,
    pub rows: Vec<AllocatedRecord>,
}

/// One row per firm-day.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub firm_id: String,
    pub date: NaiveDate,
    pub patent_count: usize,
    /// Per-patent value, NaN when no row of the group had one
    pub value_avg: f64,
    pub year: Option<i32>,
    pub duplicate_count: Option<i64>,
}

/// Final output table.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmDayTable {
    pub passthrough: Passthrough,
    pub rows: Vec<AggregatedRecord>,
    pub diagnostics: AggregationDiagnostics,
}

impl FirmDayTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Output column names in write order.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec![COL_FIRM, COL_DATE, COL_PATENT_COUNT, COL_VALUE_AVG];
        if self.passthrough.year {
            columns.push(COL_YEAR);
        }
        if self.passthrough.duplicate_count {
            columns.push(COL_DUPLICATE_COUNT);
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    #[test]
    fn test_from_rows_detects_passthrough() {
        let table = EventTable::from_rows(vec![
            EventRecord::new("000001", day(), [0.01, 0.0, 0.0], 0.02, 1e6),
            EventRecord::new("000002", day(), [0.0, 0.0, 0.0], 0.02, 1e6).with_year(2020),
        ]);
        assert!(table.passthrough.year);
        assert!(!table.passthrough.duplicate_count);
        assert_eq!(table.len(), 2);
    }
}
