use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId, money::decimal_string};

pub type AccountId = Uuid;

/// Number of digits in a customer-facing account number.
pub const ACCOUNT_NUMBER_DIGITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    /// Closed accounts keep their history but reject deposits and withdrawals.
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A checking account. `balance` is only ever changed together with the
/// transaction that explains the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: UserId,
    pub account_number: String,
    #[serde(with = "decimal_string")]
    pub balance: Cents,
    pub status: AccountStatus,
    /// Number of mutations applied; equals the sequence of the latest transaction.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn open(owner_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            account_number: generate_account_number(),
            balance: 0,
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

/// Random zero-padded account number drawn from a v4 UUID's entropy.
pub fn generate_account_number() -> String {
    let modulus = 10u128.pow(ACCOUNT_NUMBER_DIGITS);
    let value = Uuid::new_v4().as_u128() % modulus;
    format!("{:0width$}", value, width = ACCOUNT_NUMBER_DIGITS as usize)
}
