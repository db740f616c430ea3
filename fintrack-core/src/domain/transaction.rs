//! Transaction domain models

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A CSV row after mapping, before it is persisted
///
/// Amounts are integer minor units: positive is inflow, negative is outflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizedRow {
    pub txn_date: NaiveDate,
    pub description_raw: String,
    pub amount_cents: i64,
    pub running_balance_cents: Option<i64>,
}

impl NormalizedRow {
    pub fn new(txn_date: NaiveDate, description_raw: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            txn_date,
            description_raw: description_raw.into(),
            amount_cents,
            running_balance_cents: None,
        }
    }
}

/// A persisted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    /// Import that created or last revived this row
    pub import_id: Option<i64>,
    pub txn_date: NaiveDate,
    pub description_raw: String,
    pub amount_cents: i64,
    pub running_balance_cents: Option<i64>,
    pub is_transfer: bool,
    pub is_refund: bool,
    pub is_joint: bool,
    /// Correlation token shared by both legs of a confirmed transfer
    pub transfer_group: Option<String>,
    pub category_id: Option<i64>,
    pub is_deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Row to insert during a commit
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub import_id: Option<i64>,
    pub row: NormalizedRow,
    pub is_transfer: bool,
    pub transfer_group: Option<String>,
}

impl NewTransaction {
    pub fn imported(account_id: i64, import_id: i64, row: NormalizedRow) -> Self {
        Self {
            account_id,
            import_id: Some(import_id),
            row,
            is_transfer: false,
            transfer_group: None,
        }
    }

    /// Mark as one leg of a confirmed transfer
    pub fn as_transfer(mut self, group: String) -> Self {
        self.is_transfer = true;
        self.transfer_group = Some(group);
        self
    }
}

/// Token linking a confirmed transfer: `imp{import_id}-{amount_cents}-{YYYY-MM-DD}`
pub fn transfer_group_token(import_id: i64, row: &NormalizedRow) -> String {
    format!(
        "imp{}-{}-{}",
        import_id,
        row.amount_cents,
        row.txn_date.format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_group_token() {
        let row = NormalizedRow::new(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(), "XFER", -2500);
        assert_eq!(transfer_group_token(12, &row), "imp12--2500-2024-03-05");
    }

    #[test]
    fn test_row_dates_serialize_as_iso() {
        let row = NormalizedRow::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), "COFFEE SHOP", -450);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["txn_date"], "2024-01-02");
        assert!(json["running_balance_cents"].is_null());
    }
}
