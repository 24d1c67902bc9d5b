//! Allocation of firm-day value across co-granted patents.
//!
//! Rows are grouped by `(firm_id, date)`. Each row's value is split evenly
//! over the patents of its group, then every group collapses to one record
//! whose fields are the first non-missing value seen in input order.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::record::{
    AggregatedRecord, AllocatedRecord, AllocatedTable, FirmDayTable, ValuedRecord, ValuedTable,
};

/// Default relative tolerance when checking within-group value agreement.
pub const DEFAULT_VALUE_TOLERANCE: f64 = 1e-9;

/// Per-table counts from the aggregation stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregationDiagnostics {
    /// Input rows
    pub rows: usize,
    /// Firm-day groups emitted
    pub groups: usize,
    /// Groups holding more than one patent
    pub multi_patent_groups: usize,
    /// Groups whose rows disagree on value; the first row still wins
    pub inconsistent_groups: usize,
    /// Groups with no defined value at all
    pub undefined_groups: usize,
}

/// Borrowed firm-day key.
pub type GroupKey<'a> = (&'a str, NaiveDate);

fn group_key(row: &ValuedRecord) -> GroupKey<'_> {
    (row.event.firm_id.as_str(), row.event.date)
}

/// Count rows per firm-day.
pub fn patent_counts(table: &ValuedTable) -> HashMap<GroupKey<'_>, usize> {
    let mut counts = HashMap::new();
    for row in &table.rows {
        *counts.entry(group_key(row)).or_insert(0) += 1;
    }
    counts
}

/// Running reduction of one group.
struct GroupAccumulator {
    patent_count: usize,
    value_avg: Option<f64>,
    year: Option<i32>,
    duplicate_count: Option<i64>,
    finite_min: f64,
    finite_max: f64,
    finite_rows: usize,
    rows: usize,
}

impl GroupAccumulator {
    fn new(patent_count: usize) -> Self {
        Self {
            patent_count,
            value_avg: None,
            year: None,
            duplicate_count: None,
            finite_min: f64::INFINITY,
            finite_max: f64::NEG_INFINITY,
            finite_rows: 0,
            rows: 0,
        }
    }

    fn push(&mut self, row: &AllocatedRecord) {
        self.rows += 1;
        if self.value_avg.is_none() && !row.value_avg.is_nan() {
            self.value_avg = Some(row.value_avg);
        }
        if self.year.is_none() {
            self.year = row.valued.event.year;
        }
        if self.duplicate_count.is_none() {
            self.duplicate_count = row.valued.event.duplicate_count;
        }

        let value = row.valued.value;
        if value.is_finite() {
            self.finite_rows += 1;
            self.finite_min = self.finite_min.min(value);
            self.finite_max = self.finite_max.max(value);
        }
    }

    /// Rows disagree when finite values spread beyond the tolerance, or when
    /// only some rows have a finite value.
    fn is_inconsistent(&self, tolerance: f64) -> bool {
        if self.finite_rows == 0 {
            return false;
        }
        if self.finite_rows != self.rows {
            return true;
        }
        let scale = self.finite_min.abs().max(self.finite_max.abs());
        self.finite_max - self.finite_min > tolerance * scale
    }
}

/// Splits firm-day value over co-granted patents and reduces to one row per firm-day.
#[derive(Debug, Clone, Copy)]
pub struct Allocator {
    tolerance: f64,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(DEFAULT_VALUE_TOLERANCE)
    }
}

impl Allocator {
    /// Create an allocator. `tolerance` only affects diagnostics.
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Join each row with its group's patent count and even share of value.
    pub fn allocate(&self, table: &ValuedTable) -> AllocatedTable {
        let counts = patent_counts(table);
        let rows = table
            .rows
            .iter()
            .map(|row| {
                // every row's own key is in the map, so the count is at least 1
                let patent_count = counts.get(&group_key(row)).copied().unwrap_or(1);
                AllocatedRecord {
                    valued: row.clone(),
                    patent_count,
                    value_avg: row.value / patent_count as f64,
                }
            })
            .collect();

        AllocatedTable {
            passthrough: table.passthrough,
            rows,
        }
    }

    /// Collapse allocated rows to one record per firm-day, ordered by key.
    pub fn aggregate(&self, table: &AllocatedTable) -> FirmDayTable {
        let mut groups: BTreeMap<GroupKey<'_>, GroupAccumulator> = BTreeMap::new();
        for row in &table.rows {
            groups
                .entry(group_key(&row.valued))
                .or_insert_with(|| GroupAccumulator::new(row.patent_count))
                .push(row);
        }

        let mut diagnostics = AggregationDiagnostics {
            rows: table.rows.len(),
            groups: groups.len(),
            ..Default::default()
        };

        let rows = groups
            .into_iter()
            .map(|((firm_id, date), group)| {
                if group.patent_count > 1 {
                    diagnostics.multi_patent_groups += 1;
                }
                if group.value_avg.is_none() {
                    diagnostics.undefined_groups += 1;
                }
                if group.is_inconsistent(self.tolerance) {
                    diagnostics.inconsistent_groups += 1;
                    tracing::debug!(
                        firm_id,
                        date = %date,
                        min = group.finite_min,
                        max = group.finite_max,
                        "Firm-day rows disagree on value, keeping the first"
                    );
                }

                AggregatedRecord {
                    firm_id: firm_id.to_string(),
                    date,
                    patent_count: group.patent_count,
                    value_avg: group.value_avg.unwrap_or(f64::NAN),
                    year: group.year,
                    duplicate_count: group.duplicate_count,
                }
            })
            .collect();

        FirmDayTable {
            passthrough: table.passthrough,
            rows,
            diagnostics,
        }
    }

    /// Allocate and aggregate in one step.
    pub fn run(&self, table: &ValuedTable) -> FirmDayTable {
        let started = Instant::now();
        let firm_days = self.aggregate(&self.allocate(table));
        let diag = firm_days.diagnostics;

        tracing::info!(
            rows = diag.rows,
            groups = diag.groups,
            multi_patent_groups = diag.multi_patent_groups,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Firm-day aggregation complete"
        );

        if diag.inconsistent_groups > 0 {
            tracing::warn!(
                inconsistent_groups = diag.inconsistent_groups,
                "Rows within some firm-days carry different values; the first row was kept"
            );
        }

        firm_days
    }
}

/// Allocate and aggregate with the default tolerance.
pub fn allocate_firm_days(table: &ValuedTable) -> FirmDayTable {
    Allocator::default().run(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventRecord, EventTable, Passthrough};
    use crate::transform::value_events;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn event(firm: &str, d: u32, mkcap: f64) -> EventRecord {
        EventRecord::new(firm, date(d), [0.01, 0.0, 0.0], 0.02, mkcap)
    }

    fn valued(rows: Vec<EventRecord>) -> ValuedTable {
        value_events(&EventTable::from_rows(rows), 0.007).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let table = valued(vec![event("A", 1, 1e6), event("A", 1, 1e6)]);
        let mw = table.rows[0].value;
        let out = allocate_firm_days(&table);

        assert_eq!(out.len(), 1);
        let row = &out.rows[0];
        assert_eq!(row.firm_id, "A");
        assert_eq!(row.date, date(1));
        assert_eq!(row.patent_count, 2);
        assert!((row.value_avg - mw / 2.0).abs() < 1e-9);
        assert_eq!(out.diagnostics.multi_patent_groups, 1);
        assert_eq!(out.diagnostics.inconsistent_groups, 0);
    }

    #[test]
    fn test_allocate_joins_counts_onto_every_row() {
        let table = valued(vec![
            event("A", 1, 1e6),
            event("B", 1, 2e6),
            event("A", 1, 1e6),
            event("A", 2, 1e6),
        ]);
        let allocated = Allocator::default().allocate(&table);
        let counts: Vec<usize> = allocated.rows.iter().map(|r| r.patent_count).collect();
        assert_eq!(counts, vec![2, 1, 2, 1]);

        for row in &allocated.rows {
            let rebuilt = row.value_avg * row.patent_count as f64;
            assert!((rebuilt - row.valued.value).abs() < 1e-9);
        }
    }

    #[test]
    fn test_groups_are_sorted_and_not_synthesized() {
        let table = valued(vec![
            event("B", 3, 1e6),
            event("A", 2, 1e6),
            event("B", 1, 1e6),
            event("A", 2, 1e6),
        ]);
        let out = allocate_firm_days(&table);
        let keys: Vec<(String, NaiveDate)> = out
            .rows
            .iter()
            .map(|r| (r.firm_id.clone(), r.date))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("A".to_string(), date(2)),
                ("B".to_string(), date(1)),
                ("B".to_string(), date(3)),
            ]
        );
        let total: usize = out.rows.iter().map(|r| r.patent_count).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_first_row_wins_and_is_flagged() {
        let table = valued(vec![event("A", 1, 1e6), event("A", 1, 3e6)]);
        let first = table.rows[0].value;
        let out = allocate_firm_days(&table);

        assert!((out.rows[0].value_avg - first / 2.0).abs() < 1e-9);
        assert_eq!(out.diagnostics.inconsistent_groups, 1);
    }

    #[test]
    fn test_first_skips_missing_values() {
        let mut first = event("A", 1, 1e6);
        first.mkcap = None;
        let mut second = event("A", 1, 1e6).with_year(2020);
        second.duplicate_count = Some(3);
        let table = valued(vec![first, second]);
        let defined = table.rows[1].value;
        let out = allocate_firm_days(&table);

        let row = &out.rows[0];
        assert!((row.value_avg - defined / 2.0).abs() < 1e-9);
        assert_eq!(row.year, Some(2020));
        assert_eq!(row.duplicate_count, Some(3));
        assert_eq!(out.diagnostics.inconsistent_groups, 1);
        assert_eq!(out.diagnostics.undefined_groups, 0);
    }

    #[test]
    fn test_all_missing_values_give_nan() {
        let mut only = event("A", 1, 1e6);
        only.vol = None;
        let out = allocate_firm_days(&valued(vec![only]));
        assert!(out.rows[0].value_avg.is_nan());
        assert_eq!(out.rows[0].patent_count, 1);
        assert_eq!(out.diagnostics.undefined_groups, 1);
        assert_eq!(out.diagnostics.inconsistent_groups, 0);
    }

    #[test]
    fn test_passthrough_flags_carry_over() {
        let table = valued(vec![event("A", 1, 1e6).with_year(2020)]);
        let out = allocate_firm_days(&table);
        assert_eq!(
            out.passthrough,
            Passthrough {
                year: true,
                duplicate_count: false
            }
        );
        assert_eq!(out.columns(), vec!["Stkcd", "date", "patent_count", "mw_graw3m0F_avg", "year"]);
    }

    #[test]
    fn test_zero_tolerance_flags_any_difference() {
        let table = valued(vec![event("A", 1, 1e6), event("A", 1, 1e6 + 1.0)]);
        assert_eq!(Allocator::new(0.0).run(&table).diagnostics.inconsistent_groups, 1);
        assert_eq!(Allocator::new(1e-3).run(&table).diagnostics.inconsistent_groups, 0);
    }

    #[test]
    fn test_empty_input() {
        let out = allocate_firm_days(&valued(vec![]));
        assert!(out.is_empty());
        assert_eq!(out.diagnostics.groups, 0);
    }
}
