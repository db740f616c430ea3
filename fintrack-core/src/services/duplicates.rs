//! Duplicate detector - classifies normalized rows against account history

use anyhow::Result;

use crate::domain::{DuplicatePair, NormalizedRow};
use crate::ports::TransactionLookup;

/// Days either side of a row's date searched for a same-amount match
pub const SECONDARY_DUPLICATE_WINDOW_DAYS: i64 = 10;

/// Rows split by duplicate classification, each list in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateReport {
    pub to_insert: Vec<NormalizedRow>,
    pub dup_exact: Vec<DuplicatePair>,
    pub dup_secondary: Vec<DuplicatePair>,
}

#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector {
    window_days: i64,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(SECONDARY_DUPLICATE_WINDOW_DAYS)
    }
}

impl DuplicateDetector {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    /// Classify each row independently; first match wins:
    /// exact (date, description, amount), then same amount within the window.
    /// Rows are matched against stored history only, never against each other.
    pub fn detect(
        &self,
        lookup: &dyn TransactionLookup,
        account_id: i64,
        rows: Vec<NormalizedRow>,
    ) -> Result<DuplicateReport> {
        let mut report = DuplicateReport::default();

        for row in rows {
            if let Some(existing_id) = lookup.find_exact(account_id, &row)? {
                report.dup_exact.push(DuplicatePair { new: row, existing_id });
                continue;
            }

            match lookup.find_amount_in_window(account_id, row.amount_cents, row.txn_date, self.window_days)? {
                Some(existing_id) => report.dup_secondary.push(DuplicatePair { new: row, existing_id }),
                None => report.to_insert.push(row),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// In-memory history: (id, account_id, row, is_deleted)
    #[derive(Default)]
    pub(crate) struct MemoryLookup {
        pub rows: Vec<(i64, i64, NormalizedRow, bool)>,
    }

    impl MemoryLookup {
        pub(crate) fn with(mut self, id: i64, account_id: i64, row: NormalizedRow) -> Self {
            self.rows.push((id, account_id, row, false));
            self
        }

        pub(crate) fn deleted(mut self, id: i64, account_id: i64, row: NormalizedRow) -> Self {
            self.rows.push((id, account_id, row, true));
            self
        }

        fn lowest(&self, pred: impl Fn(i64, &NormalizedRow) -> bool) -> Option<i64> {
            self.rows
                .iter()
                .filter(|(_, account, row, deleted)| !deleted && pred(*account, row))
                .map(|(id, ..)| *id)
                .min()
        }
    }

    impl TransactionLookup for MemoryLookup {
        fn find_exact(&self, account_id: i64, row: &NormalizedRow) -> Result<Option<i64>> {
            Ok(self.lowest(|account, r| {
                account == account_id
                    && r.txn_date == row.txn_date
                    && r.description_raw == row.description_raw
                    && r.amount_cents == row.amount_cents
            }))
        }

        fn find_amount_in_window(
            &self,
            account_id: i64,
            amount_cents: i64,
            date: NaiveDate,
            window_days: i64,
        ) -> Result<Option<i64>> {
            Ok(self.lowest(|account, r| {
                account == account_id
                    && r.amount_cents == amount_cents
                    && (r.txn_date - date).num_days().abs() <= window_days
            }))
        }

        fn find_in_other_accounts(
            &self,
            excluded_account_id: i64,
            amount_cents: i64,
            date: NaiveDate,
            window_days: i64,
        ) -> Result<Option<i64>> {
            Ok(self.lowest(|account, r| {
                account != excluded_account_id
                    && r.amount_cents == amount_cents
                    && (r.txn_date - date).num_days().abs() <= window_days
            }))
        }
    }

    pub(crate) fn row(month: u32, day: u32, desc: &str, cents: i64) -> NormalizedRow {
        NormalizedRow::new(NaiveDate::from_ymd_opt(2024, month, day).unwrap(), desc, cents)
    }

    #[test]
    fn test_exact_takes_priority() {
        let lookup = MemoryLookup::default()
            .with(1, 7, row(3, 10, "GROCERY", -2000))
            .with(2, 7, row(3, 12, "GROCERY", -2000));
        let report = DuplicateDetector::default()
            .detect(&lookup, 7, vec![row(3, 12, "GROCERY", -2000)])
            .unwrap();

        assert_eq!(report.dup_exact.len(), 1);
        assert_eq!(report.dup_exact[0].existing_id, 2);
        assert!(report.dup_secondary.is_empty());
        assert!(report.to_insert.is_empty());
    }

    #[test]
    fn test_secondary_window_boundary() {
        let lookup = MemoryLookup::default().with(5, 7, row(3, 1, "GYM", -4000));
        let report = DuplicateDetector::default()
            .detect(
                &lookup,
                7,
                vec![row(3, 11, "GYM MEMBERSHIP", -4000), row(3, 12, "GYM MEMBERSHIP", -4000)],
            )
            .unwrap();

        assert_eq!(report.dup_secondary.len(), 1);
        assert_eq!(report.dup_secondary[0].new.txn_date, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(report.dup_secondary[0].existing_id, 5);
        assert_eq!(report.to_insert, vec![row(3, 12, "GYM MEMBERSHIP", -4000)]);
    }

    #[test]
    fn test_window_before_row_date() {
        let lookup = MemoryLookup::default().with(5, 7, row(3, 21, "GYM", -4000));
        let report = DuplicateDetector::default()
            .detect(&lookup, 7, vec![row(3, 11, "GYM", -4000), row(3, 10, "GYM", -4000)])
            .unwrap();
        assert_eq!(report.dup_secondary.len(), 1);
        assert_eq!(report.to_insert.len(), 1);
    }

    #[test]
    fn test_other_accounts_and_deleted_rows_ignored() {
        let lookup = MemoryLookup::default()
            .with(1, 8, row(3, 1, "RENT", -150000))
            .deleted(2, 7, row(3, 1, "RENT", -150000));
        let report = DuplicateDetector::default()
            .detect(&lookup, 7, vec![row(3, 1, "RENT", -150000)])
            .unwrap();
        assert_eq!(report.to_insert.len(), 1);
    }

    #[test]
    fn test_lowest_id_wins_and_order_kept() {
        let lookup = MemoryLookup::default()
            .with(9, 7, row(3, 4, "A", -100))
            .with(3, 7, row(3, 6, "B", -100));
        let report = DuplicateDetector::default()
            .detect(&lookup, 7, vec![row(3, 20, "C", 500), row(3, 5, "D", -100), row(3, 21, "E", 600)])
            .unwrap();
        assert_eq!(report.dup_secondary[0].existing_id, 3);
        let descs: Vec<&str> = report.to_insert.iter().map(|r| r.description_raw.as_str()).collect();
        assert_eq!(descs, vec!["C", "E"]);
    }

    #[test]
    fn test_configured_window() {
        let lookup = MemoryLookup::default().with(1, 7, row(3, 1, "A", -100));
        let report = DuplicateDetector::new(0)
            .detect(&lookup, 7, vec![row(3, 2, "B", -100)])
            .unwrap();
        assert!(report.dup_secondary.is_empty());
    }
}
