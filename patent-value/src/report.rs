//! Console report of a pipeline run.
//!
//! Shows the head of each table, its size and columns, so a run can be
//! eyeballed without opening the output file.

use std::fmt::Write as _;

use crate::dataset::{COL_DUPLICATE_COUNT, COL_YEAR, REQUIRED_COLUMNS};
use crate::pipeline::PipelineRun;
use crate::record::{EventTable, FirmDayTable, ValuedTable};

const RULE_WIDTH: usize = 80;

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "NaN".to_string(), |v| format!("{v:.6}"))
}

fn num(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.abs() >= 1e6 || (value != 0.0 && value.abs() < 1e-4) {
        format!("{value:.6e}")
    } else {
        format!("{value:.6}")
    }
}

fn input_columns(table: &EventTable) -> Vec<&'static str> {
    let mut columns = REQUIRED_COLUMNS.to_vec();
    if table.passthrough.year {
        columns.push(COL_YEAR);
    }
    if table.passthrough.duplicate_count {
        columns.push(COL_DUPLICATE_COUNT);
    }
    columns
}

/// Head of the input table with its size and columns.
pub fn render_input(table: &EventTable, rows: usize) -> String {
    let mut out = String::new();
    out.push_str("Input data:\n");
    let _ = writeln!(
        out,
        "{:<10} {:<10} {:>10} {:>10} {:>10} {:>10} {:>14}",
        "Stkcd", "date", "ret_d0", "ret_d1", "ret_d2", "vol", "mkcap"
    );
    for row in table.rows.iter().take(rows) {
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:>10} {:>10} {:>10} {:>10} {:>14}",
            row.firm_id,
            row.date.to_string(),
            cell(row.ret_d0),
            cell(row.ret_d1),
            cell(row.ret_d2),
            cell(row.vol),
            row.mkcap.map_or_else(|| "NaN".to_string(), num),
        );
    }
    let _ = writeln!(out, "Total rows: {}", table.len());
    let _ = writeln!(out, "Columns: {}", input_columns(table).join(", "));
    out
}

/// Head of the valued table with its derived fields.
pub fn render_valued(table: &ValuedTable, rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Patent value results (first {rows} rows):");
    let _ = writeln!(
        out,
        "{:<10} {:<10} {:>14} {:>12} {:>12} {:>12} {:>12} {:>12} {:>14}",
        "Stkcd", "date", "mkcap", "R", "v", "delta", "a", "m_graw3m0F", "mw_graw3m0F"
    );
    for row in table.rows.iter().take(rows) {
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:>14} {:>12} {:>12} {:>12} {:>12} {:>12} {:>14}",
            row.event.firm_id,
            row.event.date.to_string(),
            row.event.mkcap.map_or_else(|| "NaN".to_string(), num),
            num(row.cum_return),
            num(row.window_vol),
            num(row.delta),
            num(row.surprise),
            num(row.expected_return),
            num(row.value),
        );
    }

    let diag = &table.diagnostics;
    if diag.undefined_surprise > 0 || diag.undefined_value > 0 {
        let _ = writeln!(
            out,
            "Undefined: {} surprise, {} value (of {} rows)",
            diag.undefined_surprise, diag.undefined_value, diag.rows
        );
    }
    out
}

/// Head of the final table with its size and columns.
pub fn render_firm_days(table: &FirmDayTable, rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Final results (first {rows} rows):");

    let mut header = format!(
        "{:<10} {:<10} {:>12} {:>16}",
        "Stkcd", "date", "patent_count", "mw_graw3m0F_avg"
    );
    if table.passthrough.year {
        let _ = write!(header, " {:>6}", "year");
    }
    if table.passthrough.duplicate_count {
        let _ = write!(header, " {:>14}", "DuplicateCount");
    }
    out.push_str(&header);
    out.push('\n');

    for row in table.rows.iter().take(rows) {
        let _ = write!(
            out,
            "{:<10} {:<10} {:>12} {:>16}",
            row.firm_id,
            row.date.to_string(),
            row.patent_count,
            num(row.value_avg)
        );
        if table.passthrough.year {
            let year = row.year.map(|y| y.to_string()).unwrap_or_default();
            let _ = write!(out, " {year:>6}");
        }
        if table.passthrough.duplicate_count {
            let count = row.duplicate_count.map(|c| c.to_string()).unwrap_or_default();
            let _ = write!(out, " {count:>14}");
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Final rows: {}", table.len());
    let _ = writeln!(out, "Final columns: {}", table.columns().join(", "));
    if table.diagnostics.inconsistent_groups > 0 {
        let _ = writeln!(
            out,
            "Warning: {} firm-day(s) had differing values across rows; the first row was kept",
            table.diagnostics.inconsistent_groups
        );
    }
    out
}

/// Full report of a run.
pub fn render_run(run: &PipelineRun, rows: usize) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = render_input(&run.events, rows);
    let _ = writeln!(out, "\n{rule}\n");
    out.push_str(&render_valued(&run.valued, rows));
    out.push('\n');
    out.push_str(&render_firm_days(&run.firm_days, rows));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::allocate_firm_days;
    use crate::record::EventRecord;
    use crate::transform::value_events;
    use chrono::NaiveDate;

    fn tables() -> (EventTable, ValuedTable, FirmDayTable) {
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let events = EventTable::from_rows(vec![
            EventRecord::new("000001", day, [0.01, 0.0, 0.0], 0.02, 1e6).with_year(2020),
            EventRecord::new("000001", day, [0.01, 0.0, 0.0], 0.02, 1e6).with_year(2020),
            EventRecord::new("000002", day, [0.02, 0.0, 0.0], 0.0, 1e6).with_year(2020),
        ]);
        let valued = value_events(&events, 0.007).unwrap();
        let firm_days = allocate_firm_days(&valued);
        (events, valued, firm_days)
    }

    #[test]
    fn test_render_input() {
        let (events, _, _) = tables();
        let text = render_input(&events, 2);
        assert!(text.contains("Total rows: 3"));
        assert!(text.contains("Columns: Stkcd, date, ret_d0, ret_d1, ret_d2, vol, mkcap, year"));
        assert_eq!(text.matches("000001").count(), 2);
        assert!(!text.contains("000002"));
    }

    #[test]
    fn test_render_valued_reports_undefined() {
        let (_, valued, _) = tables();
        let text = render_valued(&valued, 10);
        assert!(text.contains("mw_graw3m0F"));
        assert!(text.contains("NaN"));
        assert!(text.contains("Undefined: 1 surprise, 0 value (of 3 rows)"));
    }

    #[test]
    fn test_render_firm_days() {
        let (_, _, firm_days) = tables();
        let text = render_firm_days(&firm_days, 10);
        assert!(text.contains("Final rows: 2"));
        assert!(text.contains("Final columns: Stkcd, date, patent_count, mw_graw3m0F_avg, year"));
        assert!(!text.contains("Warning"));
    }
}
