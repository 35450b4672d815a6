use serde::Serialize;

use super::{Account, AccountId, Cents, Transaction};

/// Replay a history (oldest first) into the balance it implies.
pub fn replay_balance(transactions: &[Transaction]) -> Cents {
    transactions.iter().fold(0, |balance, tx| {
        balance + tx.transaction_type.delta(tx.amount_cents)
    })
}

/// A single way an account's stored state disagrees with its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Stored balance differs from the latest `balance_after` (or 0 with no history).
    BalanceMismatch { stored: Cents, expected: Cents },
    NegativeBalance { balance: Cents },
    /// Sequence numbers are not 1, 2, 3, ...
    SequenceGap { expected: i64, found: i64 },
    /// A `balance_after` that does not follow from the previous one.
    BrokenChain {
        sequence: i64,
        expected: Cents,
        found: Cents,
    },
    NonPositiveAmount { sequence: i64, amount: Cents },
    /// Stored version differs from the number of transactions.
    VersionMismatch { version: i64, transactions: i64 },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch { stored, expected } => write!(
                f,
                "stored balance {} cents does not match ledger balance {} cents",
                stored, expected
            ),
            IntegrityIssue::NegativeBalance { balance } => {
                write!(f, "balance is negative ({} cents)", balance)
            }
            IntegrityIssue::SequenceGap { expected, found } => {
                write!(f, "expected sequence {} but found {}", expected, found)
            }
            IntegrityIssue::BrokenChain {
                sequence,
                expected,
                found,
            } => write!(
                f,
                "transaction #{} has balance_after {} cents, expected {} cents",
                sequence, found, expected
            ),
            IntegrityIssue::NonPositiveAmount { sequence, amount } => write!(
                f,
                "transaction #{} has non-positive amount {} cents",
                sequence, amount
            ),
            IntegrityIssue::VersionMismatch {
                version,
                transactions,
            } => write!(
                f,
                "account version {} but {} transactions recorded",
                version, transactions
            ),
        }
    }
}

/// Check one account against its full history, ordered by sequence ascending.
pub fn verify_account(account: &Account, history: &[Transaction]) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    let mut running: Cents = 0;

    for (index, tx) in history.iter().enumerate() {
        let expected_sequence = index as i64 + 1;
        if tx.sequence != expected_sequence {
            issues.push(IntegrityIssue::SequenceGap {
                expected: expected_sequence,
                found: tx.sequence,
            });
        }
        if tx.amount_cents <= 0 {
            issues.push(IntegrityIssue::NonPositiveAmount {
                sequence: tx.sequence,
                amount: tx.amount_cents,
            });
        }

        running += tx.transaction_type.delta(tx.amount_cents);
        if tx.balance_after != running {
            issues.push(IntegrityIssue::BrokenChain {
                sequence: tx.sequence,
                expected: running,
                found: tx.balance_after,
            });
            // Continue from what was recorded so one bad row is reported once
            running = tx.balance_after;
        }
        if tx.balance_after < 0 {
            issues.push(IntegrityIssue::NegativeBalance {
                balance: tx.balance_after,
            });
        }
    }

    let expected = history.last().map_or(0, |tx| tx.balance_after);
    if account.balance != expected {
        issues.push(IntegrityIssue::BalanceMismatch {
            stored: account.balance,
            expected,
        });
    }
    if account.balance < 0 {
        issues.push(IntegrityIssue::NegativeBalance {
            balance: account.balance,
        });
    }
    if account.version != history.len() as i64 {
        issues.push(IntegrityIssue::VersionMismatch {
            version: account.version,
            transactions: history.len() as i64,
        });
    }

    issues
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountIntegrity {
    pub account_id: AccountId,
    pub account_number: String,
    pub issues: Vec<IntegrityIssue>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    pub problems: Vec<AccountIntegrity>,
}

impl IntegrityReport {
    pub fn record(&mut self, account: &Account, history: &[Transaction]) {
        self.accounts_checked += 1;
        self.transactions_checked += history.len();

        let issues = verify_account(account, history);
        if !issues.is_empty() {
            self.problems.push(AccountIntegrity {
                account_id: account.id,
                account_number: account.account_number.clone(),
                issues,
            });
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}
