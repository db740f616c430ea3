//! Transfer detector - finds the other leg of probable inter-account transfers

use anyhow::Result;

use crate::domain::{NormalizedRow, TransferCandidate};
use crate::ports::TransactionLookup;

/// Days either side of an outflow searched for the opposite inflow
pub const TRANSFER_WINDOW_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy)]
pub struct TransferDetector {
    window_days: i64,
}

impl Default for TransferDetector {
    fn default() -> Self {
        Self::new(TRANSFER_WINDOW_DAYS)
    }
}

impl TransferDetector {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    /// Match each outflow in `to_insert` against stored transactions of other
    /// accounts with the opposite amount. `new_index` is the row's position
    /// in `to_insert`.
    pub fn detect(
        &self,
        lookup: &dyn TransactionLookup,
        account_id: i64,
        to_insert: &[NormalizedRow],
    ) -> Result<Vec<TransferCandidate>> {
        let mut candidates = Vec::new();

        for (new_index, row) in to_insert.iter().enumerate() {
            if row.amount_cents >= 0 {
                continue;
            }
            let Some(opposite) = row.amount_cents.checked_neg() else {
                continue;
            };
            if let Some(existing_id) =
                lookup.find_in_other_accounts(account_id, opposite, row.txn_date, self.window_days)?
            {
                candidates.push(TransferCandidate {
                    new_index,
                    new: row.clone(),
                    existing_id,
                });
            }
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::duplicates::tests::{row, MemoryLookup};

    #[test]
    fn test_window_boundary() {
        let lookup = MemoryLookup::default().with(20, 2, row(4, 10, "FROM CHECKING", 50000));
        let rows = vec![row(4, 8, "TO SAVINGS", -50000), row(4, 7, "TO SAVINGS", -50000)];

        let candidates = TransferDetector::default().detect(&lookup, 1, &rows).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].new_index, 0);
        assert_eq!(candidates[0].existing_id, 20);
    }

    #[test]
    fn test_only_outflows_considered() {
        let lookup = MemoryLookup::default()
            .with(20, 2, row(4, 10, "X", 50000))
            .with(21, 2, row(4, 10, "Y", -50000));
        let rows = vec![row(4, 10, "REFUND", 50000), row(4, 10, "ZERO", 0)];
        assert!(TransferDetector::default().detect(&lookup, 1, &rows).unwrap().is_empty());
    }

    #[test]
    fn test_same_account_not_a_transfer() {
        let lookup = MemoryLookup::default().with(20, 1, row(4, 10, "DEPOSIT", 50000));
        let rows = vec![row(4, 10, "WITHDRAWAL", -50000)];
        assert!(TransferDetector::default().detect(&lookup, 1, &rows).unwrap().is_empty());
    }

    #[test]
    fn test_new_index_is_position_in_to_insert() {
        let lookup = MemoryLookup::default()
            .with(31, 3, row(5, 2, "IN", 1200))
            .with(30, 2, row(5, 1, "IN", 1200))
            .deleted(10, 2, row(5, 1, "IN", 900));
        let rows = vec![
            row(5, 1, "COFFEE", -450),
            row(5, 1, "XFER", -1200),
            row(5, 1, "XFER", -900),
        ];
        let candidates = TransferDetector::default().detect(&lookup, 1, &rows).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].new_index, 1);
        assert_eq!(candidates[0].existing_id, 30);
        assert_eq!(candidates[0].new, rows[1]);
    }
}
