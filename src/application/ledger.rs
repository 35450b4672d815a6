use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, BalanceMutation, Caller, Cents, IntegrityReport, MAX_TRANSACTION_CENTS,
    Transaction, TransactionType, UserId, format_cents,
};
use crate::storage::{MutationOutcome, MutationRejection, Repository};

use super::{AccountLocks, AccountView, LedgerError, TransactionView};

/// How many times opening an account retries after an account-number collision.
const OPEN_ACCOUNT_ATTEMPTS: u32 = 5;

/// Default page size for the admin transaction listing.
pub const DEFAULT_ADMIN_TRANSACTION_LIMIT: i64 = 100;

/// Result of a successful deposit or withdrawal.
#[derive(Debug, Clone, Serialize)]
pub struct MutationReceipt {
    pub transaction: Transaction,
    #[serde(with = "crate::domain::decimal_string")]
    pub new_balance: Cents,
}

/// Current balance of one account.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub account_id: AccountId,
    pub account_number: String,
    #[serde(with = "crate::domain::decimal_string")]
    pub balance: Cents,
}

/// The balance-mutation protocol and the ownership-checked reads around it.
///
/// Deposits and withdrawals on one account run one at a time: an in-process
/// per-account lock is held for the whole unit of work, and the unit of work
/// itself is a single guarded update plus ledger insert in one database
/// transaction.
pub struct LedgerService {
    repo: Repository,
    locks: AccountLocks,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self {
            repo,
            locks: AccountLocks::new(),
            config,
        }
    }

    /// The shared repository. Services route through their own operations;
    /// this is for maintenance and tests.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new empty account for `owner_id`.
    pub async fn open_account(&self, owner_id: UserId) -> Result<Account, LedgerError> {
        for _ in 0..OPEN_ACCOUNT_ATTEMPTS {
            let account = Account::open(owner_id);
            if self.repo.insert_account(&account).await? {
                info!(
                    account_id = %account.id,
                    account_number = %account.account_number,
                    owner_id = %owner_id,
                    "Opened account"
                );
                return Ok(account);
            }
            debug!(account_number = %account.account_number, "Account number collision, retrying");
        }

        Err(LedgerError::StorageFailure(anyhow::anyhow!(
            "Could not allocate a unique account number after {} attempts",
            OPEN_ACCOUNT_ATTEMPTS
        )))
    }

    /// Accounts owned by the caller.
    pub async fn list_accounts(&self, caller_id: UserId) -> Result<Vec<Account>, LedgerError> {
        Ok(self.repo.list_accounts_for_owner(caller_id).await?)
    }

    /// Get an account the caller owns.
    pub async fn get_account(
        &self,
        account_id: AccountId,
        caller_id: UserId,
    ) -> Result<Account, LedgerError> {
        self.repo
            .get_account(account_id)
            .await?
            .filter(|account| account.is_owned_by(caller_id))
            .ok_or(LedgerError::Unauthorized)
    }

    // ========================
    // Balance mutations
    // ========================

    /// Add `amount_cents` to an account the caller owns.
    pub async fn deposit(
        &self,
        account_id: AccountId,
        caller_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<MutationReceipt, LedgerError> {
        let mutation =
            BalanceMutation::new(account_id, caller_id, TransactionType::Deposit, amount_cents)
                .with_description(description);
        self.mutate(mutation).await
    }

    /// Take `amount_cents` from an account the caller owns. Never overdraws.
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        caller_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<MutationReceipt, LedgerError> {
        let mutation = BalanceMutation::new(
            account_id,
            caller_id,
            TransactionType::Withdrawal,
            amount_cents,
        )
        .with_description(description);
        self.mutate(mutation).await
    }

    async fn mutate(&self, mutation: BalanceMutation) -> Result<MutationReceipt, LedgerError> {
        validate_amount(mutation.amount_cents)?;

        let _guard = self.locks.acquire(mutation.account_id).await;

        let mut attempt = 1;
        loop {
            match self.try_mutate(&mutation).await {
                Err(LedgerError::Conflict) if attempt < self.config.max_attempts => {
                    debug!(
                        account_id = %mutation.account_id,
                        attempt,
                        "Storage contention during {}, retrying",
                        mutation.transaction_type
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(LedgerError::Conflict) => {
                    error!(
                        account_id = %mutation.account_id,
                        attempts = attempt,
                        "Giving up on {} after repeated storage contention",
                        mutation.transaction_type
                    );
                    return Err(LedgerError::StorageFailure(anyhow::anyhow!(
                        "{} did not complete after {} attempts",
                        mutation.transaction_type,
                        attempt
                    )));
                }
                result => return result,
            }
        }
    }

    async fn try_mutate(&self, mutation: &BalanceMutation) -> Result<MutationReceipt, LedgerError> {
        let outcome = self
            .repo
            .apply_mutation(mutation)
            .await
            .map_err(LedgerError::from_storage)?;

        match outcome {
            MutationOutcome::Applied(transaction) => {
                info!(
                    account_id = %mutation.account_id,
                    transaction_id = %transaction.id,
                    sequence = transaction.sequence,
                    amount = %format_cents(transaction.amount_cents),
                    balance_after = %format_cents(transaction.balance_after),
                    "Recorded {}",
                    transaction.transaction_type
                );
                Ok(MutationReceipt {
                    new_balance: transaction.balance_after,
                    transaction,
                })
            }
            MutationOutcome::Rejected(MutationRejection::NotOwned) => {
                Err(LedgerError::Unauthorized)
            }
            MutationOutcome::Rejected(MutationRejection::Closed) => Err(LedgerError::AccountClosed),
            MutationOutcome::Rejected(MutationRejection::InsufficientFunds { balance }) => {
                Err(LedgerError::InsufficientFunds {
                    balance,
                    required: mutation.amount_cents,
                })
            }
        }
    }

    // ========================
    // Reads
    // ========================

    /// Current balance of an account the caller owns, including every committed mutation.
    pub async fn get_balance(
        &self,
        account_id: AccountId,
        caller_id: UserId,
    ) -> Result<BalanceEntry, LedgerError> {
        let account = self.get_account(account_id, caller_id).await?;
        Ok(BalanceEntry {
            account_id: account.id,
            account_number: account.account_number,
            balance: account.balance,
        })
    }

    /// History of an account the caller owns, most recent first.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        caller_id: UserId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let account = self.get_account(account_id, caller_id).await?;
        Ok(self.repo.list_transactions_for_account(account.id).await?)
    }

    // ========================
    // Admin operations
    // ========================

    /// Every account with its owner. Admin only.
    pub async fn list_all_accounts(&self, caller: &Caller) -> Result<Vec<AccountView>, LedgerError> {
        require_admin(caller)?;
        Ok(self.repo.list_all_accounts().await?)
    }

    /// The most recent transactions across all accounts. Admin only.
    pub async fn list_all_transactions(
        &self,
        caller: &Caller,
        limit: Option<i64>,
    ) -> Result<Vec<TransactionView>, LedgerError> {
        require_admin(caller)?;
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_ADMIN_TRANSACTION_LIMIT);
        Ok(self.repo.list_all_transactions(limit).await?)
    }

    /// Verify every account against its ledger. Admin only.
    pub async fn check_integrity(&self, caller: &Caller) -> Result<IntegrityReport, LedgerError> {
        require_admin(caller)?;

        let mut report = IntegrityReport::default();
        for view in self.repo.list_all_accounts().await? {
            // Balance and history must come from the same snapshot
            if let Some((account, history)) =
                self.repo.account_with_history(view.account.id).await?
            {
                report.record(&account, &history);
            }
        }

        if !report.is_healthy() {
            error!(
                accounts = report.problems.len(),
                "Ledger integrity check found inconsistent accounts"
            );
        }
        Ok(report)
    }
}

fn validate_amount(amount_cents: Cents) -> Result<(), LedgerError> {
    if amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    if amount_cents > MAX_TRANSACTION_CENTS {
        return Err(LedgerError::InvalidAmount(format!(
            "Amount must not exceed {}",
            format_cents(MAX_TRANSACTION_CENTS)
        )));
    }
    Ok(())
}

fn require_admin(caller: &Caller) -> Result<(), LedgerError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(1).is_ok());
        assert!(validate_amount(MAX_TRANSACTION_CENTS).is_ok());
        assert!(matches!(
            validate_amount(0),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_amount(-100),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_amount(MAX_TRANSACTION_CENTS + 1),
            Err(LedgerError::InvalidAmount(_))
        ));
    }
}
