use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::application::{AccountView, TransactionView, TypeSummary};
use crate::config::StorageConfig;
use crate::domain::{
    Account, AccountId, AccountStatus, BalanceMutation, Cents, Role, Session, Transaction,
    TransactionType, User, UserId,
};

use super::MIGRATION_001_INITIAL;

const ACCOUNT_COLUMNS: &str =
    "a.id, a.owner_id, a.account_number, a.balance_cents, a.status, a.version, a.created_at, a.updated_at";

const TRANSACTION_COLUMNS: &str = "t.id, t.account_id, t.sequence, t.transaction_type, t.amount_cents, t.balance_after_cents, t.description, t.created_at";

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, role, active, failed_logins, locked_until, created_at";

/// Why a guarded balance update did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationRejection {
    /// The account does not exist or belongs to someone else.
    NotOwned,
    Closed,
    InsufficientFunds { balance: Cents },
}

#[derive(Debug, Clone)]
pub enum MutationOutcome {
    Applied(Transaction),
    Rejected(MutationRejection),
}

/// True when the error chain contains SQLite lock contention (SQLITE_BUSY / SQLITE_LOCKED).
pub fn is_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str, what: &'static str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {} timestamp", what))?
        .with_timezone(&Utc))
}

/// Repository for persisting and querying users, accounts and transactions.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database, creating the file if it doesn't exist.
    pub async fn connect(database_url: &str, config: &StorageConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str, config: &StorageConfig) -> Result<Self> {
        let repo = Self::connect(database_url, config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// The underlying pool.
    ///
    /// Not used by the services themselves. It is a hook for maintenance
    /// scripts and for tests that need raw SQL against the schema.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap round-trip used by health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    /// Current time according to the database.
    pub async fn database_time(&self) -> Result<String> {
        let row = sqlx::query("SELECT strftime('%Y-%m-%dT%H:%M:%fZ', 'now') AS now")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read database time")?;
        Ok(row.get("now"))
    }

    // ========================
    // User operations
    // ========================

    /// Insert a new user. Returns `false` if the username or email is taken.
    pub async fn insert_user(&self, user: &User) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, full_name, password_hash, role, active, failed_logins, locked_until, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.active)
        .bind(user.failed_logins)
        .bind(user.locked_until.map(timestamp))
        .bind(timestamp(user.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err).context("Failed to save user"),
        }
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    /// Look a user up by username or email.
    pub async fn get_user_by_login(&self, identifier: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ? OR email = ?",
            USER_COLUMNS
        ))
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by login")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    /// List all users, newest first.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        rows.iter().map(Self::row_to_user).collect()
    }

    /// Count a failed login in one statement. Reaching `threshold` locks the
    /// user until `lock_until` and resets the counter.
    /// Returns the user's `locked_until` after the update.
    pub async fn record_failed_login(
        &self,
        id: UserId,
        threshold: i64,
        lock_until: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET
                failed_logins = CASE WHEN failed_logins + 1 >= ? THEN 0 ELSE failed_logins + 1 END,
                locked_until = CASE WHEN failed_logins + 1 >= ? THEN ? ELSE locked_until END
            WHERE id = ?
            RETURNING locked_until
            "#,
        )
        .bind(threshold)
        .bind(threshold)
        .bind(timestamp(lock_until))
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to record failed login")?;

        let locked_until: Option<String> = row.get("locked_until");
        locked_until
            .map(|s| parse_timestamp(&s, "locked_until"))
            .transpose()
    }

    /// Clear lockout bookkeeping after a successful login.
    pub async fn reset_failed_logins(&self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET failed_logins = 0, locked_until = NULL WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to reset login state")?;
        Ok(())
    }

    /// Change a user's role. Returns `false` if no such user exists.
    pub async fn set_role(&self, username: &str, role: Role) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE username = ?")
            .bind(role.as_str())
            .bind(username)
            .execute(&self.pool)
            .await
            .context("Failed to update role")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_users(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;
        Ok(row.get("count"))
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let id_str: String = row.get("id");
        let role_str: String = row.get("role");
        let locked_until_str: Option<String> = row.get("locked_until");
        let created_at_str: String = row.get("created_at");

        Ok(User {
            id: Uuid::parse_str(&id_str).context("Invalid user ID")?,
            username: row.get("username"),
            email: row.get("email"),
            full_name: row.get("full_name"),
            password_hash: row.get("password_hash"),
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role_str))?,
            active: row.get::<i32, _>("active") != 0,
            failed_logins: row.get("failed_logins"),
            locked_until: locked_until_str
                .map(|s| parse_timestamp(&s, "locked_until"))
                .transpose()?,
            created_at: parse_timestamp(&created_at_str, "created_at")?,
        })
    }

    // ========================
    // Session operations
    // ========================

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(session.user_id.to_string())
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.expires_at))
        .execute(&self.pool)
        .await
        .context("Failed to save session")?;
        Ok(())
    }

    pub async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT token, user_id, created_at, expires_at FROM sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch session")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_id_str: String = row.get("user_id");
        let created_at_str: String = row.get("created_at");
        let expires_at_str: String = row.get("expires_at");

        Ok(Some(Session {
            token: row.get("token"),
            user_id: Uuid::parse_str(&user_id_str).context("Invalid session user ID")?,
            created_at: parse_timestamp(&created_at_str, "created_at")?,
            expires_at: parse_timestamp(&expires_at_str, "expires_at")?,
        }))
    }

    pub async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(timestamp(now))
            .execute(&self.pool)
            .await
            .context("Failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }

    // ========================
    // Account operations
    // ========================

    /// Insert a freshly opened account. Returns `false` on an account-number collision.
    pub async fn insert_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_id, account_number, balance_cents, status, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.owner_id.to_string())
        .bind(&account.account_number)
        .bind(account.balance)
        .bind(account.status.as_str())
        .bind(account.version)
        .bind(timestamp(account.created_at))
        .bind(timestamp(account.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err).context("Failed to save account"),
        }
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts a WHERE a.id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List the accounts of one owner, oldest first.
    pub async fn list_accounts_for_owner(&self, owner_id: UserId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts a WHERE a.owner_id = ? ORDER BY a.created_at, a.account_number",
            ACCOUNT_COLUMNS
        ))
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// List every account with its owner's name.
    pub async fn list_all_accounts(&self) -> Result<Vec<AccountView>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, u.username, u.full_name
            FROM accounts a
            JOIN users u ON a.owner_id = u.id
            ORDER BY a.created_at, a.account_number
            "#,
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list all accounts")?;

        rows.iter()
            .map(|row| {
                Ok(AccountView {
                    account: Self::row_to_account(row)?,
                    username: row.get("username"),
                    full_name: row.get("full_name"),
                })
            })
            .collect()
    }

    pub async fn count_active_accounts(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM accounts WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count accounts")?;
        Ok(row.get("count"))
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let owner_str: String = row.get("owner_id");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            owner_id: Uuid::parse_str(&owner_str).context("Invalid owner ID")?,
            account_number: row.get("account_number"),
            balance: row.get("balance_cents"),
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
            version: row.get("version"),
            created_at: parse_timestamp(&created_at_str, "created_at")?,
            updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
        })
    }

    // ========================
    // Balance mutation
    // ========================

    /// Apply a deposit or withdrawal as one unit of work.
    ///
    /// The balance update is a single guarded statement (owner, status and
    /// funds are checked by the `WHERE` clause), and the transaction row is
    /// inserted in the same SQLite transaction. Either both are committed or
    /// neither is.
    pub async fn apply_mutation(&self, mutation: &BalanceMutation) -> Result<MutationOutcome> {
        let delta = mutation.delta();
        let now = Utc::now();
        let account_id = mutation.account_id.to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin balance mutation")?;

        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + ?, version = version + 1, updated_at = ?
            WHERE id = ? AND owner_id = ? AND status = 'active' AND balance_cents + ? >= 0
            RETURNING balance_cents, version
            "#,
        )
        .bind(delta)
        .bind(timestamp(now))
        .bind(&account_id)
        .bind(mutation.caller_id.to_string())
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to update account balance")?;

        let Some(row) = updated else {
            let rejection = Self::diagnose_rejection(&mut tx, mutation).await?;
            tx.rollback()
                .await
                .context("Failed to roll back rejected mutation")?;
            return Ok(MutationOutcome::Rejected(rejection));
        };

        let transaction = Transaction {
            id: Uuid::new_v4(),
            account_id: mutation.account_id,
            sequence: row.get("version"),
            transaction_type: mutation.transaction_type,
            amount_cents: mutation.amount_cents,
            balance_after: row.get("balance_cents"),
            description: mutation.description.clone(),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, sequence, transaction_type, amount_cents, balance_after_cents, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(&account_id)
        .bind(transaction.sequence)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount_cents)
        .bind(transaction.balance_after)
        .bind(&transaction.description)
        .bind(timestamp(transaction.created_at))
        .execute(&mut *tx)
        .await
        .context("Failed to record transaction")?;

        tx.commit()
            .await
            .context("Failed to commit balance mutation")?;

        Ok(MutationOutcome::Applied(transaction))
    }

    /// Work out which guard of the balance update failed.
    async fn diagnose_rejection(
        conn: &mut SqliteConnection,
        mutation: &BalanceMutation,
    ) -> Result<MutationRejection> {
        let row = sqlx::query("SELECT owner_id, status, balance_cents FROM accounts WHERE id = ?")
            .bind(mutation.account_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to inspect rejected account")?;

        let Some(row) = row else {
            return Ok(MutationRejection::NotOwned);
        };

        let owner: String = row.get("owner_id");
        if owner != mutation.caller_id.to_string() {
            return Ok(MutationRejection::NotOwned);
        }

        let status: String = row.get("status");
        if AccountStatus::from_str(&status) != Some(AccountStatus::Active) {
            return Ok(MutationRejection::Closed);
        }

        Ok(MutationRejection::InsufficientFunds {
            balance: row.get("balance_cents"),
        })
    }

    // ========================
    // Transaction queries
    // ========================

    /// Transactions of one account, most recent first.
    pub async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions t WHERE t.account_id = ? ORDER BY t.sequence DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// One account together with its full history, read from a single snapshot.
    ///
    /// Both reads share one read transaction, so a mutation committing in
    /// between cannot make the balance and the history disagree.
    pub async fn account_with_history(
        &self,
        account_id: AccountId,
    ) -> Result<Option<(Account, Vec<Transaction>)>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin ledger snapshot")?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts a WHERE a.id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch account")?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .context("Failed to end ledger snapshot")?;
            return Ok(None);
        };
        let account = Self::row_to_account(&row)?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions t WHERE t.account_id = ? ORDER BY t.sequence",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id.to_string())
        .fetch_all(&mut *tx)
        .await
        .context("Failed to load account history")?;

        tx.rollback()
            .await
            .context("Failed to end ledger snapshot")?;

        let history = rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((account, history)))
    }

    /// Most recent transactions across all accounts, with account number and owner.
    pub async fn list_all_transactions(&self, limit: i64) -> Result<Vec<TransactionView>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, a.account_number, u.username
            FROM transactions t
            JOIN accounts a ON t.account_id = a.id
            JOIN users u ON a.owner_id = u.id
            ORDER BY t.created_at DESC, t.sequence DESC
            LIMIT ?
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list all transactions")?;

        rows.iter()
            .map(|row| {
                Ok(TransactionView {
                    transaction: Self::row_to_transaction(row)?,
                    account_number: row.get("account_number"),
                    username: row.get("username"),
                })
            })
            .collect()
    }

    pub async fn count_transactions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM transactions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transactions")?;
        Ok(row.get("count"))
    }

    /// Count and volume per transaction type.
    pub async fn totals_by_type(&self) -> Result<Vec<TypeSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_type, COUNT(*) AS count, COALESCE(SUM(amount_cents), 0) AS volume
            FROM transactions
            GROUP BY transaction_type
            ORDER BY transaction_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate transactions")?;

        rows.iter()
            .map(|row| {
                let type_str: String = row.get("transaction_type");
                Ok(TypeSummary {
                    transaction_type: TransactionType::from_str(&type_str).ok_or_else(|| {
                        anyhow::anyhow!("Invalid transaction type: {}", type_str)
                    })?,
                    count: row.get("count"),
                    volume: row.get("volume"),
                })
            })
            .collect()
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let account_str: String = row.get("account_id");
        let type_str: String = row.get("transaction_type");
        let created_at_str: String = row.get("created_at");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            account_id: Uuid::parse_str(&account_str).context("Invalid account ID")?,
            sequence: row.get("sequence"),
            transaction_type: TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
            amount_cents: row.get("amount_cents"),
            balance_after: row.get("balance_after_cents"),
            description: row.get("description"),
            created_at: parse_timestamp(&created_at_str, "created_at")?,
        })
    }
}
