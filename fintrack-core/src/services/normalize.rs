//! Row normalizer - applies a mapping schema to raw CSV rows

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::domain::{AmountColumns, MappingSchema, NormalizedRow};

/// Why a single row was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("column '{0}' is not in the file headers")]
    MissingColumn(String),

    #[error("no {0} column is mapped")]
    Unmapped(&'static str),

    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("invalid balance '{0}'")]
    InvalidBalance(String),

    #[error("amount '{0}' is out of range")]
    OutOfRange(String),

    #[error("unreadable record: {0}")]
    Unreadable(String),
}

/// A parsed CSV file: header row plus raw records
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub records: Vec<TableRecord>,
}

#[derive(Debug, Clone)]
pub struct TableRecord {
    /// 1-based line in the source file
    pub line: usize,
    pub cells: std::result::Result<Vec<String>, String>,
}

/// Parse CSV bytes. Only an unreadable header row fails the whole file;
/// a bad record is kept as an error for the normalizer to report.
pub fn read_table(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let mut headers: Vec<String> = reader
        .byte_headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    if let Some(first) = headers.first_mut() {
        if let Some(stripped) = first.strip_prefix('\u{feff}') {
            *first = stripped.to_string();
        }
    }

    let mut records = Vec::new();
    let mut last_line = 1;
    for result in reader.byte_records() {
        let record = match result {
            Ok(record) => {
                let line = record.position().map(|p| p.line() as usize).unwrap_or(last_line + 1);
                let cells = record
                    .iter()
                    .map(|c| String::from_utf8_lossy(c).into_owned())
                    .collect();
                TableRecord { line, cells: Ok(cells) }
            }
            Err(e) => {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(last_line + 1);
                TableRecord { line, cells: Err(e.to_string()) }
            }
        };
        last_line = record.line;
        records.push(record);
    }

    Ok(Table { headers, records })
}

/// Normalize every record of `table`, lazily and in file order.
/// Each item carries the source line of the record.
pub fn normalize<'a>(
    table: &'a Table,
    schema: &'a MappingSchema,
) -> impl Iterator<Item = (usize, std::result::Result<NormalizedRow, RowError>)> + 'a {
    let normalizer = RowNormalizer::new(&table.headers, schema);
    table.records.iter().map(move |record| {
        let result = match &record.cells {
            Ok(cells) => normalizer.normalize_record(cells),
            Err(msg) => Err(RowError::Unreadable(msg.clone())),
        };
        (record.line, result)
    })
}

#[derive(Debug, Clone)]
enum Column {
    Index(usize),
    /// Not mapped, but allowed to read as an empty cell
    Blank,
    Missing(String),
    Unmapped,
}

impl Column {
    fn resolve(headers: &[String], name: Option<&str>) -> Self {
        match name {
            None => Column::Unmapped,
            Some(name) => headers
                .iter()
                .position(|h| h == name)
                .or_else(|| headers.iter().position(|h| h.trim() == name.trim()))
                .map(Column::Index)
                .unwrap_or_else(|| Column::Missing(name.to_string())),
        }
    }

    /// Index when the column exists; configured-but-absent columns are ignored
    fn optional(&self) -> Option<usize> {
        match self {
            Column::Index(i) => Some(*i),
            _ => None,
        }
    }

    fn cell<'r>(&self, cells: &'r [String], role: &'static str) -> std::result::Result<&'r str, RowError> {
        match self {
            Column::Index(i) => Ok(cell(cells, *i)),
            Column::Blank => Ok(""),
            Column::Missing(name) => Err(RowError::MissingColumn(name.clone())),
            Column::Unmapped => Err(RowError::Unmapped(role)),
        }
    }
}

#[derive(Debug, Clone)]
enum AmountPlan {
    Net { amount: Column, indicator: Option<usize> },
    Split { debit: Option<usize>, credit: Option<usize> },
}

/// Column positions resolved once per file
#[derive(Debug, Clone)]
pub struct RowNormalizer<'s> {
    date_fmt: Option<&'s str>,
    date: Column,
    description: Column,
    amount: AmountPlan,
    balance: Option<usize>,
}

impl<'s> RowNormalizer<'s> {
    pub fn new(headers: &[String], schema: &'s MappingSchema) -> Self {
        let amount = match &schema.amount {
            AmountColumns::Net { amount_col, indicator_col } => AmountPlan::Net {
                amount: Column::resolve(headers, Some(amount_col)),
                indicator: Column::resolve(headers, indicator_col.as_deref()).optional(),
            },
            AmountColumns::Split { debit_col, credit_col } => AmountPlan::Split {
                debit: Column::resolve(headers, debit_col.as_deref()).optional(),
                credit: Column::resolve(headers, credit_col.as_deref()).optional(),
            },
        };

        Self {
            date_fmt: schema.date_fmt.as_deref(),
            date: Column::resolve(headers, schema.date_col.as_deref()),
            description: match schema.desc_col.as_deref() {
                None => Column::Blank,
                name => Column::resolve(headers, name),
            },
            amount,
            balance: Column::resolve(headers, schema.balance_col.as_deref()).optional(),
        }
    }

    pub fn normalize_record(&self, cells: &[String]) -> std::result::Result<NormalizedRow, RowError> {
        let raw_date = self.date.cell(cells, "date")?;
        let description_raw = self.description.cell(cells, "description")?.to_string();

        let txn_date = match self.date_fmt {
            Some(fmt) => parse_date_with_format(raw_date, fmt),
            None => parse_date_permissive(raw_date),
        }
        .ok_or_else(|| RowError::InvalidDate(raw_date.to_string()))?;

        let amount = self.amount(cells)?;
        let amount_cents = to_cents(amount).ok_or_else(|| RowError::OutOfRange(amount.to_string()))?;

        let running_balance_cents = match self.balance {
            Some(i) => {
                let raw = cell(cells, i);
                let value = clean_decimal(raw).ok_or_else(|| RowError::InvalidBalance(raw.to_string()))?;
                Some(to_cents(value).ok_or_else(|| RowError::OutOfRange(raw.to_string()))?)
            }
            None => None,
        };

        Ok(NormalizedRow {
            txn_date,
            description_raw,
            amount_cents,
            running_balance_cents,
        })
    }

    fn amount(&self, cells: &[String]) -> std::result::Result<Decimal, RowError> {
        match &self.amount {
            AmountPlan::Net { amount, indicator } => {
                let raw = amount.cell(cells, "amount")?;
                let value = clean_decimal(raw).ok_or_else(|| RowError::InvalidAmount(raw.to_string()))?;
                Ok(match indicator.map(|i| cell(cells, i)) {
                    Some(ind) => apply_indicator(value, ind),
                    None => value,
                })
            }
            AmountPlan::Split { debit, credit } => {
                let debit = debit.map(|i| lenient_decimal(cell(cells, i))).unwrap_or_default();
                let credit = credit.map(|i| lenient_decimal(cell(cells, i))).unwrap_or_default();
                credit
                    .checked_sub(debit)
                    .ok_or_else(|| RowError::OutOfRange(format!("{} - {}", credit, debit)))
            }
        }
    }
}

fn cell(cells: &[String], index: usize) -> &str {
    cells.get(index).map(String::as_str).unwrap_or("")
}

/// Keep only digits, `.` and `-`. An empty result is zero; anything that
/// still does not parse is `None`.
fn clean_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return Some(Decimal::ZERO);
    }
    Decimal::from_str(&cleaned).ok()
}

/// Debit/credit cells: blank or unparsable counts as zero
fn lenient_decimal(raw: &str) -> Decimal {
    clean_decimal(raw).unwrap_or_else(|| {
        tracing::debug!(cell = raw, "unparsable debit/credit cell treated as zero");
        Decimal::ZERO
    })
}

/// Force the sign from a credit/debit indicator; unknown values keep it
fn apply_indicator(amount: Decimal, indicator: &str) -> Decimal {
    let ind = indicator.trim().to_lowercase();
    if ind.is_empty() {
        return amount;
    }
    if ind.starts_with("credit") || matches!(ind.as_str(), "cr" | "c" | "credit memo") {
        amount.abs()
    } else if ind.starts_with("debit") || matches!(ind.as_str(), "dr" | "d" | "debit memo") {
        -amount.abs()
    } else {
        amount
    }
}

/// Round half away from zero to whole cents
fn to_cents(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Strict parse with an explicit pattern. Date-time patterns are accepted
/// and truncated to the date.
fn parse_date_with_format(raw: &str, fmt: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    NaiveDate::parse_from_str(s, fmt)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date()))
}

const PERMISSIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%y",
    "%m-%d-%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%d-%b-%Y",
    "%d-%b-%y",
];

const PERMISSIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
];

/// Best-effort parse for schemas without a date pattern.
/// Ambiguous slash dates are read month first.
fn parse_date_permissive(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // Compact YYYYMMDD
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(&format!("{}-{}-{}", &s[..4], &s[4..6], &s[6..]), "%Y-%m-%d").ok();
    }

    PERMISSIVE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            PERMISSIVE_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn net_schema(fmt: Option<&str>) -> MappingSchema {
        MappingSchema {
            date_col: Some("Date".to_string()),
            date_fmt: fmt.map(str::to_string),
            desc_col: Some("Description".to_string()),
            amount: AmountColumns::Net {
                amount_col: "Amount".to_string(),
                indicator_col: None,
            },
            balance_col: None,
            exclude_pending: false,
        }
    }

    fn rows(csv: &str, schema: &MappingSchema) -> Vec<(usize, std::result::Result<NormalizedRow, RowError>)> {
        let table = read_table(csv.as_bytes()).unwrap();
        normalize(&table, schema).collect()
    }

    #[test]
    fn test_basic_row() {
        let out = rows("Date,Description,Amount\n01/02/2024,COFFEE SHOP,-4.50\n", &net_schema(Some("%m/%d/%Y")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 2);
        let row = out[0].1.as_ref().unwrap();
        assert_eq!(row.txn_date, d(2024, 1, 2));
        assert_eq!(row.description_raw, "COFFEE SHOP");
        assert_eq!(row.amount_cents, -450);
        assert_eq!(row.running_balance_cents, None);
    }

    #[test]
    fn test_amount_cleaning() {
        let csv = "Date,Description,Amount\n\
                   2024-01-01,A,\"$1,234.56\"\n\
                   2024-01-01,B,\n\
                   2024-01-01,C,1.2.3\n\
                   2024-01-01,D,0.005\n\
                   2024-01-01,E,-0.005\n";
        let out = rows(csv, &net_schema(Some("%Y-%m-%d")));
        assert_eq!(out[0].1.as_ref().unwrap().amount_cents, 123456);
        assert_eq!(out[1].1.as_ref().unwrap().amount_cents, 0);
        assert_eq!(out[2].1, Err(RowError::InvalidAmount("1.2.3".to_string())));
        assert_eq!(out[3].1.as_ref().unwrap().amount_cents, 1);
        assert_eq!(out[4].1.as_ref().unwrap().amount_cents, -1);
    }

    #[test]
    fn test_indicator_forces_sign() {
        let mut schema = net_schema(Some("%Y-%m-%d"));
        schema.amount = AmountColumns::Net {
            amount_col: "Amount".to_string(),
            indicator_col: Some("Type".to_string()),
        };
        let csv = "Date,Description,Amount,Type\n\
                   2024-01-01,A,12.00,Debit\n\
                   2024-01-01,B,-12.00,CR\n\
                   2024-01-01,C,-3.00,\n\
                   2024-01-01,D,5.00,pending\n\
                   2024-01-01,E,7.00, d \n";
        let cents: Vec<i64> = rows(csv, &schema).into_iter().map(|(_, r)| r.unwrap().amount_cents).collect();
        assert_eq!(cents, vec![-1200, 1200, -300, 500, -700]);
    }

    #[test]
    fn test_split_debit_credit() {
        let mut schema = net_schema(Some("%Y-%m-%d"));
        schema.amount = AmountColumns::Split {
            debit_col: Some("Debit".to_string()),
            credit_col: Some("Credit".to_string()),
        };
        let csv = "Date,Description,Debit,Credit\n\
                   2024-01-01,A,25.00,\n\
                   2024-01-01,B,,100\n\
                   2024-01-01,C,n/a,10\n";
        let cents: Vec<i64> = rows(csv, &schema).into_iter().map(|(_, r)| r.unwrap().amount_cents).collect();
        assert_eq!(cents, vec![-2500, 10000, 1000]);
    }

    #[test]
    fn test_balance_column() {
        let mut schema = net_schema(Some("%Y-%m-%d"));
        schema.balance_col = Some("Balance".to_string());
        let csv = "Date,Description,Amount,Balance\n\
                   2024-01-01,A,-1,\"1,000.10\"\n\
                   2024-01-01,B,-1,oops..\n";
        let out = rows(csv, &schema);
        assert_eq!(out[0].1.as_ref().unwrap().running_balance_cents, Some(100010));
        assert!(matches!(out[1].1, Err(RowError::InvalidBalance(_))));

        // Configured but absent from the file: no balance
        let out = rows("Date,Description,Amount\n2024-01-01,A,1\n", &schema);
        assert_eq!(out[0].1.as_ref().unwrap().running_balance_cents, None);
    }

    #[test]
    fn test_strict_date_format() {
        let out = rows(
            "Date,Description,Amount\n2024-01-02,A,1\n01/02/2024 13:45,B,1\n",
            &net_schema(Some("%m/%d/%Y %H:%M")),
        );
        assert_eq!(out[0].1, Err(RowError::InvalidDate("2024-01-02".to_string())));
        assert_eq!(out[1].1.as_ref().unwrap().txn_date, d(2024, 1, 2));
    }

    #[test]
    fn test_permissive_dates() {
        assert_eq!(parse_date_permissive("2024-01-02"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("1/2/2024"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("01/02/24"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("2024/01/02"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("02.01.2024"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("Jan 2, 2024"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("2 January 2024"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("20240102"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("2024-01-02T10:30:00Z"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("2024-01-02 10:30:00"), Some(d(2024, 1, 2)));
        assert_eq!(parse_date_permissive("yesterday"), None);
        assert_eq!(parse_date_permissive(""), None);
    }

    #[test]
    fn test_missing_columns_are_row_errors() {
        let mut schema = net_schema(None);
        schema.date_col = Some("Posted".to_string());
        let out = rows("Date,Description,Amount\n2024-01-01,A,1\n2024-01-02,B,2\n", &schema);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|(_, r)| *r == Err(RowError::MissingColumn("Posted".to_string()))));

        let mut schema = net_schema(None);
        schema.date_col = None;
        let out = rows("Date,Description,Amount\n2024-01-01,A,1\n", &schema);
        assert_eq!(out[0].1, Err(RowError::Unmapped("date")));
    }

    #[test]
    fn test_unmapped_description_is_empty() {
        let mut schema = net_schema(None);
        schema.desc_col = None;
        let out = rows("Date,Description,Amount\n2024-01-01,A,1\n", &schema);
        assert_eq!(out[0].1.as_ref().unwrap().description_raw, "");

        let headers = vec!["Date".to_string(), "Description".to_string(), "Amount".to_string()];
        assert!(matches!(RowNormalizer::new(&headers, &schema).description, Column::Blank));

        // A named description column that the file lacks is still an error
        schema.desc_col = Some("Memo".to_string());
        let out = rows("Date,Description,Amount\n2024-01-01,A,1\n", &schema);
        assert_eq!(out[0].1, Err(RowError::MissingColumn("Memo".to_string())));
    }

    #[test]
    fn test_short_rows_and_line_numbers() {
        let out = rows(
            "\u{feff}Date,Description,Amount\n2024-01-01,A\n\n2024-01-03,C,3\n",
            &net_schema(None),
        );
        // Short row: amount cell is empty and reads as zero
        assert_eq!(out[0].0, 2);
        assert_eq!(out[0].1.as_ref().unwrap().amount_cents, 0);
        assert_eq!(out.last().unwrap().1.as_ref().unwrap().amount_cents, 300);
    }

    #[test]
    fn test_description_kept_raw() {
        let out = rows("Date,Description,Amount\n2024-01-01,\"  Padded  \",1\n", &net_schema(None));
        assert_eq!(out[0].1.as_ref().unwrap().description_raw, "  Padded  ");
    }

    #[test]
    fn test_empty_file() {
        let table = read_table(b"").unwrap();
        assert!(table.headers.is_empty());
        assert!(table.records.is_empty());
    }
}
