use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Account, Caller, Cents, Transaction, TransactionType, decimal_string};
use crate::storage::Repository;

use super::LedgerError;

/// Number of transactions included in the analytics "recent" list.
pub const RECENT_TRANSACTIONS: usize = 10;

/// An account together with its owner's names, for admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub account: Account,
    pub username: String,
    pub full_name: String,
}

/// A transaction together with its account number and owner, for admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub account_number: String,
    pub username: String,
}

// Helper struct for repository aggregation
#[derive(Debug, Clone, Serialize)]
pub struct TypeSummary {
    pub transaction_type: TransactionType,
    pub count: i64,
    #[serde(with = "decimal_string")]
    pub volume: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatistics {
    pub generated_at: DateTime<Utc>,
    pub total_users: i64,
    pub active_accounts: i64,
    pub total_transactions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionAnalytics {
    pub generated_at: DateTime<Utc>,
    pub total_transactions: i64,
    #[serde(with = "decimal_string")]
    pub total_deposits: Cents,
    #[serde(with = "decimal_string")]
    pub total_withdrawals: Cents,
    pub by_type: Vec<TypeSummary>,
    pub recent_transactions: Vec<TransactionView>,
}

impl TransactionAnalytics {
    /// Deposits minus withdrawals: the total held across all accounts.
    pub fn net_volume(&self) -> Cents {
        self.total_deposits - self.total_withdrawals
    }
}

/// Read-only views over the whole bank. Not linearizable with concurrent
/// mutations; each figure reflects some committed state.
pub struct QueryService {
    repo: Repository,
}

impl QueryService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Headline counts, available to any authenticated user.
    pub async fn statistics(&self) -> Result<SystemStatistics, LedgerError> {
        Ok(SystemStatistics {
            generated_at: Utc::now(),
            total_users: self.repo.count_users().await?,
            active_accounts: self.repo.count_active_accounts().await?,
            total_transactions: self.repo.count_transactions().await?,
        })
    }

    /// Volumes per transaction type and the latest activity. Admin only.
    pub async fn transaction_analytics(
        &self,
        caller: &Caller,
    ) -> Result<TransactionAnalytics, LedgerError> {
        if !caller.is_admin() {
            return Err(LedgerError::Unauthorized);
        }

        let by_type = self.repo.totals_by_type().await?;
        let volume_of = |kind: TransactionType| {
            by_type
                .iter()
                .filter(|summary| summary.transaction_type == kind)
                .map(|summary| summary.volume)
                .sum::<Cents>()
        };
        let total_deposits = volume_of(TransactionType::Deposit);
        let total_withdrawals = volume_of(TransactionType::Withdrawal);
        let total_transactions = by_type.iter().map(|summary| summary.count).sum();

        let recent_transactions = self
            .repo
            .list_all_transactions(RECENT_TRANSACTIONS as i64)
            .await?;

        Ok(TransactionAnalytics {
            generated_at: Utc::now(),
            total_transactions,
            total_deposits,
            total_withdrawals,
            by_type,
            recent_transactions,
        })
    }

    /// Database clock, used by the root endpoint to prove connectivity.
    pub async fn database_time(&self) -> Result<String, LedgerError> {
        Ok(self.repo.database_time().await?)
    }

    pub async fn health(&self) -> bool {
        self.repo.ping().await.is_ok()
    }
}
