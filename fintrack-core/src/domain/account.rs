//! Institution and account domain models

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A bank or card issuer whose CSV exports are imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// An account held at an institution
/// Note: account_type is a freeform string. Common values include
/// "checking", "savings", "credit", but any string is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub institution_id: i64,
    pub name: String,
    pub account_type: String,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// Fields required to register a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub institution_id: i64,
    pub name: String,
    pub account_type: String,
    pub currency: String,
}

impl NewAccount {
    pub fn new(institution_id: i64, name: impl Into<String>) -> Self {
        Self {
            institution_id,
            name: name.into(),
            account_type: "checking".to_string(),
            currency: "USD".to_string(),
        }
    }

    pub fn with_type(mut self, account_type: impl Into<String>) -> Self {
        self.account_type = account_type.into();
        self
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Account::normalize_currency(currency);
        self
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty");
        }
        if self.currency.trim().is_empty() {
            return Err("currency cannot be empty");
        }
        Ok(())
    }
}

impl Account {
    /// Normalize currency code to uppercase
    pub fn normalize_currency(currency: &str) -> String {
        currency.trim().to_uppercase()
    }
}
