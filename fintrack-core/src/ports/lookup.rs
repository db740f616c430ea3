//! Transaction history lookup port

use anyhow::Result;
use chrono::NaiveDate;

use crate::domain::NormalizedRow;

/// Read access to stored transactions, as needed by the duplicate and
/// transfer detectors.
///
/// Every method considers non-deleted transactions only and returns the
/// lowest matching transaction id, so repeated runs pick the same match.
pub trait TransactionLookup {
    /// Same account, same date, description and amount
    fn find_exact(&self, account_id: i64, row: &NormalizedRow) -> Result<Option<i64>>;

    /// Same account and amount, date within `window_days` either side (inclusive)
    fn find_amount_in_window(
        &self,
        account_id: i64,
        amount_cents: i64,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Option<i64>>;

    /// Any account except `excluded_account_id`, the given amount, date within
    /// `window_days` either side (inclusive)
    fn find_in_other_accounts(
        &self,
        excluded_account_id: i64,
        amount_cents: i64,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Option<i64>>;
}
