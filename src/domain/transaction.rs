use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents, UserId, money::decimal_string};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }

    /// Signed effect of `amount` on the account balance.
    pub fn delta(&self, amount: Cents) -> Cents {
        match self {
            TransactionType::Deposit => amount,
            TransactionType::Withdrawal => -amount,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one balance mutation on one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// Position in the account's history, starting at 1
    pub sequence: i64,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Always positive; direction comes from `transaction_type`
    #[serde(rename = "amount", with = "decimal_string")]
    pub amount_cents: Cents,
    /// Account balance right after this transaction was applied
    #[serde(with = "decimal_string")]
    pub balance_after: Cents,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Balance the account held right before this transaction.
    pub fn balance_before(&self) -> Cents {
        self.balance_after - self.transaction_type.delta(self.amount_cents)
    }
}

/// A requested deposit or withdrawal on one account.
#[derive(Debug, Clone)]
pub struct BalanceMutation {
    pub account_id: AccountId,
    pub caller_id: UserId,
    pub transaction_type: TransactionType,
    pub amount_cents: Cents,
    pub description: Option<String>,
}

impl BalanceMutation {
    pub fn new(
        account_id: AccountId,
        caller_id: UserId,
        transaction_type: TransactionType,
        amount_cents: Cents,
    ) -> Self {
        Self {
            account_id,
            caller_id,
            transaction_type,
            amount_cents,
            description: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn delta(&self) -> Cents {
        self.transaction_type.delta(self.amount_cents)
    }
}
