mod common;

use std::time::Duration;

use anyhow::Result;
use bankledger::application::LedgerError;
use sqlx::{Connection, SqliteConnection};

use common::{
    open_funded_account, register_admin, register_user, test_services, test_services_with,
    test_settings,
};

#[tokio::test]
async fn test_failed_transaction_insert_rolls_back_balance() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let account = open_funded_account(&services, &alice, 5_000).await?;
    let pool = services.repository().pool();

    sqlx::query(
        r#"
        CREATE TRIGGER fail_transaction_insert BEFORE INSERT ON transactions
        BEGIN
            SELECT RAISE(ABORT, 'ledger write rejected');
        END
        "#,
    )
    .execute(pool)
    .await?;

    let deposit = services
        .ledger
        .deposit(account.id, alice.id, 1_000, None)
        .await;
    assert!(matches!(deposit, Err(LedgerError::StorageFailure(_))));

    let withdraw = services
        .ledger
        .withdraw(account.id, alice.id, 1_000, None)
        .await;
    assert!(matches!(withdraw, Err(LedgerError::StorageFailure(_))));

    let stored = services.ledger.get_account(account.id, alice.id).await?;
    assert_eq!(stored.balance, 5_000);
    assert_eq!(stored.version, 1);

    sqlx::query("DROP TRIGGER fail_transaction_insert")
        .execute(pool)
        .await?;

    // The account is usable again and the ledger has no gap
    let receipt = services
        .ledger
        .deposit(account.id, alice.id, 1_000, None)
        .await?;
    assert_eq!(receipt.new_balance, 6_000);
    assert_eq!(receipt.transaction.sequence, 2);

    let admin = register_admin(&services, "auditor").await?;
    let report = services.ledger.check_integrity(&admin.caller()).await?;
    assert!(report.is_healthy(), "{:?}", report.problems);
    Ok(())
}

#[tokio::test]
async fn test_schema_rejects_negative_balance_written_directly() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let account = open_funded_account(&services, &alice, 100).await?;

    let result = sqlx::query("UPDATE accounts SET balance_cents = -1 WHERE id = ?")
        .bind(account.id.to_string())
        .execute(services.repository().pool())
        .await;
    assert!(result.is_err());

    let stored = services.ledger.get_account(account.id, alice.id).await?;
    assert_eq!(stored.balance, 100);
    Ok(())
}

#[tokio::test]
async fn test_storage_contention_is_retried_then_fails() -> Result<()> {
    let mut settings = test_settings();
    settings.storage.busy_timeout = Duration::from_millis(20);
    settings.ledger.max_attempts = 3;
    settings.ledger.retry_backoff = Duration::from_millis(20);
    let (services, temp) = test_services_with(settings).await?;
    let alice = register_user(&services, "alice").await?;
    let account = services.ledger.open_account(alice.id).await?;

    // A second connection holding the write lock
    let url = format!("sqlite:{}", temp.path().join("test.db").display());
    let mut writer = SqliteConnection::connect(&url).await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut writer).await?;

    let blocked = services
        .ledger
        .deposit(account.id, alice.id, 100, None)
        .await;
    assert!(matches!(blocked, Err(LedgerError::StorageFailure(_))));

    let stored = services.ledger.get_account(account.id, alice.id).await?;
    assert_eq!(stored.balance, 0);
    assert_eq!(stored.version, 0);

    // Release the lock while the deposit is still retrying
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        sqlx::query("ROLLBACK").execute(&mut writer).await?;
        writer.close().await
    });

    let receipt = services
        .ledger
        .deposit(account.id, alice.id, 100, None)
        .await?;
    release.await??;

    assert_eq!(receipt.new_balance, 100);
    assert_eq!(receipt.transaction.sequence, 1);
    Ok(())
}
