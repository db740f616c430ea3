//! Mapping schemas: how to read one institution's CSV layout

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Default date pattern for guessed schemas
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";

/// How the signed amount of a row is derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountColumns {
    /// One signed column, optionally paired with a credit/debit indicator
    Net {
        amount_col: String,
        indicator_col: Option<String>,
    },
    /// Separate debit and credit columns; amount = credit - debit
    Split {
        debit_col: Option<String>,
        credit_col: Option<String>,
    },
}

impl Default for AmountColumns {
    fn default() -> Self {
        AmountColumns::Split {
            debit_col: None,
            credit_col: None,
        }
    }
}

/// Column layout of a CSV export
///
/// Stored as a flat JSON object (`date_col`, `amount_col`, `debit_col`, ...).
/// When `amount_col` is present in that form it wins over debit/credit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SchemaRecord", into = "SchemaRecord")]
pub struct MappingSchema {
    pub date_col: Option<String>,
    /// chrono strftime pattern; `None` selects the permissive parser
    pub date_fmt: Option<String>,
    pub desc_col: Option<String>,
    pub amount: AmountColumns,
    pub balance_col: Option<String>,
    /// Persisted but not applied during normalization
    pub exclude_pending: bool,
}

impl MappingSchema {
    pub fn amount_col(&self) -> Option<&str> {
        match &self.amount {
            AmountColumns::Net { amount_col, .. } => Some(amount_col),
            AmountColumns::Split { .. } => None,
        }
    }

    /// Parse a schema from its stored JSON form
    pub fn from_json(json: &str) -> crate::domain::result::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::domain::result::Error::validation(format!("invalid mapping schema: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SchemaRecord {
    date_col: Option<String>,
    date_fmt: Option<String>,
    desc_col: Option<String>,
    amount_col: Option<String>,
    indicator_col: Option<String>,
    debit_col: Option<String>,
    credit_col: Option<String>,
    balance_col: Option<String>,
    exclude_pending: bool,
}

impl From<SchemaRecord> for MappingSchema {
    fn from(r: SchemaRecord) -> Self {
        let amount = match r.amount_col {
            Some(amount_col) => AmountColumns::Net {
                amount_col,
                indicator_col: r.indicator_col,
            },
            None => AmountColumns::Split {
                debit_col: r.debit_col,
                credit_col: r.credit_col,
            },
        };
        Self {
            date_col: r.date_col,
            date_fmt: r.date_fmt,
            desc_col: r.desc_col,
            amount,
            balance_col: r.balance_col,
            exclude_pending: r.exclude_pending,
        }
    }
}

impl From<MappingSchema> for SchemaRecord {
    fn from(s: MappingSchema) -> Self {
        let (amount_col, indicator_col, debit_col, credit_col) = match s.amount {
            AmountColumns::Net {
                amount_col,
                indicator_col,
            } => (Some(amount_col), indicator_col, None, None),
            AmountColumns::Split {
                debit_col,
                credit_col,
            } => (None, None, debit_col, credit_col),
        };
        Self {
            date_col: s.date_col,
            date_fmt: s.date_fmt,
            desc_col: s.desc_col,
            amount_col,
            indicator_col,
            debit_col,
            credit_col,
            balance_col: s.balance_col,
            exclude_pending: s.exclude_pending,
        }
    }
}

/// A stored, versioned mapping schema. Never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapper {
    pub id: i64,
    pub institution_id: i64,
    pub account_id: Option<i64>,
    pub version: i32,
    pub schema: MappingSchema,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_col_takes_precedence() {
        let schema = MappingSchema::from_json(
            r#"{"date_col":"Date","amount_col":"Amount","debit_col":"Debit","credit_col":"Credit"}"#,
        )
        .unwrap();
        assert_eq!(
            schema.amount,
            AmountColumns::Net {
                amount_col: "Amount".to_string(),
                indicator_col: None
            }
        );
    }

    #[test]
    fn test_split_mode_when_no_amount_col() {
        let schema = MappingSchema::from_json(r#"{"debit_col":"Withdrawal"}"#).unwrap();
        assert_eq!(
            schema.amount,
            AmountColumns::Split {
                debit_col: Some("Withdrawal".to_string()),
                credit_col: None
            }
        );
        assert!(!schema.exclude_pending);
        assert!(schema.date_fmt.is_none());
    }

    #[test]
    fn test_stored_form_is_flat() {
        let schema = MappingSchema {
            date_col: Some("Posted Date".to_string()),
            date_fmt: Some(DEFAULT_DATE_FORMAT.to_string()),
            desc_col: Some("Payee".to_string()),
            amount: AmountColumns::Net {
                amount_col: "Amount".to_string(),
                indicator_col: Some("Type".to_string()),
            },
            balance_col: None,
            exclude_pending: true,
        };
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["amount_col"], "Amount");
        assert_eq!(value["indicator_col"], "Type");
        assert!(value["debit_col"].is_null());
        assert_eq!(value["exclude_pending"], true);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = MappingSchema::from_json(r#"{"date_col":"Date","amount_column":"Amount"}"#);
        assert!(err.is_err());
    }
}
