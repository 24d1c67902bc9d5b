//! CSV input and output.
//!
//! The header is checked before any row is parsed, so a file missing a
//! required column fails without producing partial results.

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, ValuationError};
use crate::record::{EventRecord, EventTable, FirmDayTable, Passthrough};

pub const COL_FIRM: &str = "Stkcd";
pub const COL_DATE: &str = "date";
pub const COL_RET_D0: &str = "ret_d0";
pub const COL_RET_D1: &str = "ret_d1";
pub const COL_RET_D2: &str = "ret_d2";
pub const COL_VOL: &str = "vol";
pub const COL_MKCAP: &str = "mkcap";
pub const COL_YEAR: &str = "year";
pub const COL_DUPLICATE_COUNT: &str = "DuplicateCount";
pub const COL_PATENT_COUNT: &str = "patent_count";
pub const COL_VALUE_AVG: &str = "mw_graw3m0F_avg";

/// Columns every input file must carry.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    COL_FIRM, COL_DATE, COL_RET_D0, COL_RET_D1, COL_RET_D2, COL_VOL, COL_MKCAP,
];

/// Cell spellings read as missing.
const MISSING_MARKERS: &[&str] = &[
    "", ".", "NA", "N/A", "NaN", "nan", "-NaN", "null", "NULL", "None", "#N/A",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%d%b%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Positions of the known columns in one header.
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    firm: usize,
    date: usize,
    ret_d0: usize,
    ret_d1: usize,
    ret_d2: usize,
    vol: usize,
    mkcap: usize,
    year: Option<usize>,
    duplicate_count: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| find(**name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValuationError::MissingColumns(missing));
        }

        let required = |name: &str| {
            find(name).ok_or_else(|| ValuationError::MissingColumns(vec![name.to_string()]))
        };

        Ok(Self {
            firm: required(COL_FIRM)?,
            date: required(COL_DATE)?,
            ret_d0: required(COL_RET_D0)?,
            ret_d1: required(COL_RET_D1)?,
            ret_d2: required(COL_RET_D2)?,
            vol: required(COL_VOL)?,
            mkcap: required(COL_MKCAP)?,
            year: find(COL_YEAR),
            duplicate_count: find(COL_DUPLICATE_COUNT),
        })
    }

    fn passthrough(&self) -> Passthrough {
        Passthrough {
            year: self.year.is_some(),
            duplicate_count: self.duplicate_count.is_some(),
        }
    }
}

/// One data row being parsed, for error reporting.
struct RowParser<'a> {
    record: &'a StringRecord,
    line: u64,
}

impl RowParser<'_> {
    fn cell(&self, index: usize) -> &str {
        self.record.get(index).unwrap_or("")
    }

    fn invalid(&self, column: &str, value: &str, reason: impl Into<String>) -> ValuationError {
        ValuationError::InvalidRecord {
            line: self.line,
            column: column.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn text(&self, index: usize, column: &str) -> Result<String> {
        let value = self.cell(index);
        if is_missing(value) {
            return Err(self.invalid(column, value, "value is required"));
        }
        Ok(value.to_string())
    }

    fn float(&self, index: usize, column: &str) -> Result<Option<f64>> {
        let value = self.cell(index);
        if is_missing(value) {
            return Ok(None);
        }
        value
            .parse::<f64>()
            .map(Some)
            .map_err(|e| self.invalid(column, value, e.to_string()))
    }

    /// Passthrough cells never fail a row: a value that is not an integer
    /// is carried as missing and counted in `unparsed`.
    fn passthrough<T: TryFrom<i64>>(
        &self,
        index: Option<usize>,
        column: &str,
        unparsed: &mut usize,
    ) -> Option<T> {
        let value = self.cell(index?);
        if is_missing(value) {
            return None;
        }
        let parsed = parse_integer(value).and_then(|n| T::try_from(n).ok());
        if parsed.is_none() {
            *unparsed += 1;
            tracing::debug!(line = self.line, column, value, "Passthrough cell read as missing");
        }
        parsed
    }

    fn date(&self, index: usize) -> Result<NaiveDate> {
        let value = self.cell(index);
        parse_date(value).ok_or_else(|| {
            self.invalid(
                COL_DATE,
                value,
                "expected a date such as 2020-01-01, 2020/01/01 or 20200101",
            )
        })
    }
}

fn is_missing(value: &str) -> bool {
    MISSING_MARKERS.contains(&value)
}

/// Integers may arrive written as floats (`2020.0`) after a round trip
/// through tools that widen columns holding missing cells.
fn parse_integer(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// Parse a calendar date in one of the accepted layouts.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Read event records from CSV.
pub fn read_events<R: Read>(reader: R) -> Result<EventTable> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let columns = ColumnIndex::from_headers(rdr.headers()?)?;

    let mut rows = Vec::new();
    let mut unparsed = 0usize;
    let mut record = StringRecord::new();
    while rdr.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let row = RowParser {
            record: &record,
            line,
        };

        rows.push(EventRecord {
            firm_id: row.text(columns.firm, COL_FIRM)?,
            date: row.date(columns.date)?,
            ret_d0: row.float(columns.ret_d0, COL_RET_D0)?,
            ret_d1: row.float(columns.ret_d1, COL_RET_D1)?,
            ret_d2: row.float(columns.ret_d2, COL_RET_D2)?,
            vol: row.float(columns.vol, COL_VOL)?,
            mkcap: row.float(columns.mkcap, COL_MKCAP)?,
            year: row.passthrough(columns.year, COL_YEAR, &mut unparsed),
            duplicate_count: row.passthrough(
                columns.duplicate_count,
                COL_DUPLICATE_COUNT,
                &mut unparsed,
            ),
        });
    }

    if unparsed > 0 {
        tracing::warn!(cells = unparsed, "Non-integer passthrough cells written as missing");
    }

    tracing::debug!(rows = rows.len(), "Read event records");
    Ok(EventTable::new(rows, columns.passthrough()))
}

/// Read event records from a CSV file.
pub fn read_events_path(path: &Path) -> Result<EventTable> {
    let file = File::open(path)?;
    read_events(file)
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Write firm-day records as CSV.
pub fn write_firm_days<W: Write>(writer: W, table: &FirmDayTable) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(table.columns())?;

    for row in &table.rows {
        let mut fields = vec![
            row.firm_id.clone(),
            row.date.format("%Y-%m-%d").to_string(),
            row.patent_count.to_string(),
            format_float(row.value_avg),
        ];
        if table.passthrough.year {
            fields.push(row.year.map(|y| y.to_string()).unwrap_or_default());
        }
        if table.passthrough.duplicate_count {
            fields.push(row.duplicate_count.map(|c| c.to_string()).unwrap_or_default());
        }
        wtr.write_record(&fields)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write firm-day records to a CSV file, creating parent directories.
pub fn write_firm_days_path(path: &Path, table: &FirmDayTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    write_firm_days(file, table)?;
    tracing::debug!(path = %path.display(), rows = table.len(), "Wrote firm-day records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AggregationDiagnostics;
    use crate::record::AggregatedRecord;
    use test_case::test_case;

    const HEADER: &str = "Stkcd,date,ret_d0,ret_d1,ret_d2,vol,mkcap";

    #[test]
    fn test_read_minimal() {
        let csv = format!("{HEADER}\n000001,2020-01-01,0.01,0,0,0.02,1000000\n");
        let table = read_events(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.passthrough, Passthrough::default());
        let row = &table.rows[0];
        assert_eq!(row.firm_id, "000001");
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(row.ret_d0, Some(0.01));
        assert_eq!(row.mkcap, Some(1_000_000.0));
    }

    #[test]
    fn test_missing_columns_fail_before_rows() {
        let csv = "Stkcd,date,ret_d0,ret_d1,ret_d2\n000001,not-a-date,x,y,z\n";
        let err = read_events(csv.as_bytes()).unwrap_err();
        match err {
            ValuationError::MissingColumns(columns) => {
                assert_eq!(columns, vec!["vol".to_string(), "mkcap".to_string()])
            }
            other => panic!("expected missing columns, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_cells_and_extra_columns() {
        let csv = "id,Stkcd,date,ret_d0,ret_d1,ret_d2,vol,mkcap,year,DuplicateCount\n\
                   7,600000,20200102,,NA,0.01,,5e9,2020.0,\n";
        let table = read_events(csv.as_bytes()).unwrap();

        assert_eq!(table.passthrough, Passthrough::ALL);
        let row = &table.rows[0];
        assert_eq!(row.firm_id, "600000");
        assert_eq!(row.ret_d0, None);
        assert_eq!(row.ret_d1, None);
        assert_eq!(row.ret_d2, Some(0.01));
        assert_eq!(row.vol, None);
        assert_eq!(row.year, Some(2020));
        assert_eq!(row.duplicate_count, None);
    }

    #[test]
    fn test_unparseable_passthrough_is_missing() {
        let csv = format!(
            "{HEADER},year,DuplicateCount\n\
             000001,2020-01-01,0.01,0,0,0.02,1e6,twenty,1.5\n\
             000001,2020-01-01,0.01,0,0,0.02,1e6,99999999999,3\n"
        );
        let table = read_events(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.passthrough, Passthrough::ALL);
        assert_eq!(table.rows[0].year, None);
        assert_eq!(table.rows[0].duplicate_count, None);
        assert_eq!(table.rows[1].year, None);
        assert_eq!(table.rows[1].duplicate_count, Some(3));
    }

    #[test]
    fn test_invalid_number_reports_line() {
        let csv = format!("{HEADER}\n000001,2020-01-01,0.01,0,0,0.02,1e6\n000001,2020-01-01,abc,0,0,0.02,1e6\n");
        let err = read_events(csv.as_bytes()).unwrap_err();
        match err {
            ValuationError::InvalidRecord { line, column, value, .. } => {
                assert_eq!(line, 3);
                assert_eq!(column, "ret_d0");
                assert_eq!(value, "abc");
            }
            other => panic!("expected invalid record, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_firm_is_rejected() {
        let csv = format!("{HEADER}\n,2020-01-01,0.01,0,0,0.02,1e6\n");
        let err = read_events(csv.as_bytes()).unwrap_err();
        assert!(err.is_malformed_input());
    }

    #[test_case("2020-01-31" ; "iso")]
    #[test_case("2020/01/31" ; "slashes")]
    #[test_case("20200131" ; "compact")]
    #[test_case("31jan2020" ; "stata")]
    #[test_case("2020-01-31 00:00:00" ; "datetime")]
    fn test_parse_date_layouts(value: &str) {
        assert_eq!(parse_date(value), NaiveDate::from_ymd_opt(2020, 1, 31));
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date("2020-13-01"), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    fn firm_days(passthrough: Passthrough) -> FirmDayTable {
        FirmDayTable {
            passthrough,
            rows: vec![
                AggregatedRecord {
                    firm_id: "000001".into(),
                    date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                    patent_count: 2,
                    value_avg: 1166.5,
                    year: Some(2020),
                    duplicate_count: None,
                },
                AggregatedRecord {
                    firm_id: "000002".into(),
                    date: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
                    patent_count: 1,
                    value_avg: f64::NAN,
                    year: None,
                    duplicate_count: Some(4),
                },
            ],
            diagnostics: AggregationDiagnostics::default(),
        }
    }

    #[test]
    fn test_write_without_passthrough() {
        let mut out = Vec::new();
        write_firm_days(&mut out, &firm_days(Passthrough::default())).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Stkcd,date,patent_count,mw_graw3m0F_avg\n\
             000001,2020-01-01,2,1166.5\n\
             000002,2020-01-02,1,\n"
        );
    }

    #[test]
    fn test_write_with_passthrough() {
        let mut out = Vec::new();
        write_firm_days(&mut out, &firm_days(Passthrough::ALL)).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Stkcd,date,patent_count,mw_graw3m0F_avg,year,DuplicateCount");
        assert_eq!(lines[1], "000001,2020-01-01,2,1166.5,2020,");
        assert_eq!(lines[2], "000002,2020-01-02,1,,,4");
    }
}
