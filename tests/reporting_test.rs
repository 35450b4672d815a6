mod common;

use anyhow::Result;
use bankledger::application::LedgerError;
use bankledger::domain::{IntegrityIssue, TransactionType};
use bankledger::io::{ExportFormat, Exporter};

use common::{open_funded_account, register_admin, register_user, test_services};

#[tokio::test]
async fn test_statistics_count_users_accounts_and_transactions() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let bob = register_user(&services, "bob").await?;

    let empty = services.queries.statistics().await?;
    assert_eq!(empty.total_users, 2);
    assert_eq!(empty.active_accounts, 0);
    assert_eq!(empty.total_transactions, 0);

    let account = open_funded_account(&services, &alice, 1_000).await?;
    services
        .ledger
        .withdraw(account.id, alice.id, 250, None)
        .await?;
    let closed = open_funded_account(&services, &bob, 0).await?;
    sqlx::query("UPDATE accounts SET status = 'closed' WHERE id = ?")
        .bind(closed.id.to_string())
        .execute(services.repository().pool())
        .await?;

    let stats = services.queries.statistics().await?;
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.active_accounts, 1);
    assert_eq!(stats.total_transactions, 2);
    Ok(())
}

#[tokio::test]
async fn test_transaction_analytics_totals() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let admin = register_admin(&services, "admin").await?;

    let account = open_funded_account(&services, &alice, 10_000).await?;
    for _ in 0..12 {
        services
            .ledger
            .withdraw(account.id, alice.id, 100, None)
            .await?;
    }

    let denied = services
        .queries
        .transaction_analytics(&alice.caller())
        .await;
    assert!(matches!(denied, Err(LedgerError::Unauthorized)));

    let analytics = services
        .queries
        .transaction_analytics(&admin.caller())
        .await?;
    assert_eq!(analytics.total_transactions, 13);
    assert_eq!(analytics.total_deposits, 10_000);
    assert_eq!(analytics.total_withdrawals, 1_200);
    assert_eq!(analytics.net_volume(), 8_800);

    let withdrawals = analytics
        .by_type
        .iter()
        .find(|summary| summary.transaction_type == TransactionType::Withdrawal)
        .unwrap();
    assert_eq!(withdrawals.count, 12);

    assert_eq!(analytics.recent_transactions.len(), 10);
    assert_eq!(analytics.recent_transactions[0].username, "alice");
    assert_eq!(
        analytics.recent_transactions[0].transaction.balance_after,
        8_800
    );
    Ok(())
}

#[tokio::test]
async fn test_integrity_check_passes_on_clean_ledger() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let admin = register_admin(&services, "admin").await?;

    let account = open_funded_account(&services, &alice, 5_000).await?;
    services
        .ledger
        .withdraw(account.id, alice.id, 1_234, None)
        .await?;
    open_funded_account(&services, &alice, 0).await?;

    let report = services.ledger.check_integrity(&admin.caller()).await?;
    assert!(report.is_healthy());
    assert_eq!(report.accounts_checked, 2);
    assert_eq!(report.transactions_checked, 2);

    let denied = services.ledger.check_integrity(&alice.caller()).await;
    assert!(matches!(denied, Err(LedgerError::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn test_integrity_check_detects_tampering() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let admin = register_admin(&services, "admin").await?;

    let account = open_funded_account(&services, &alice, 5_000).await?;
    sqlx::query("UPDATE accounts SET balance_cents = 9999 WHERE id = ?")
        .bind(account.id.to_string())
        .execute(services.repository().pool())
        .await?;

    let report = services.ledger.check_integrity(&admin.caller()).await?;
    assert!(!report.is_healthy());
    assert_eq!(report.problems.len(), 1);

    let problem = &report.problems[0];
    assert_eq!(problem.account_id, account.id);
    assert!(problem.issues.contains(&IntegrityIssue::BalanceMismatch {
        stored: 9_999,
        expected: 5_000
    }));
    Ok(())
}

#[tokio::test]
async fn test_export_history_csv_and_json() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let mallory = register_user(&services, "mallory").await?;

    let account = open_funded_account(&services, &alice, 1_050).await?;
    services
        .ledger
        .withdraw(account.id, alice.id, 50, Some("Coffee".into()))
        .await?;

    let exporter = Exporter::new(&services);

    let mut csv_out = Vec::new();
    let count = exporter
        .export_history(account.id, alice.id, ExportFormat::Csv, &mut csv_out)
        .await?;
    assert_eq!(count, 2);
    let csv_text = String::from_utf8(csv_out)?;
    let lines: Vec<&str> = csv_text.lines().collect();
    assert_eq!(lines.len(), 3);
    // Oldest first
    assert!(lines[1].contains(",deposit,10.50,10.50,"));
    assert!(lines[2].contains(",withdrawal,0.50,10.00,Coffee"));

    let mut json_out = Vec::new();
    exporter
        .export_history(account.id, alice.id, ExportFormat::Json, &mut json_out)
        .await?;
    let json: serde_json::Value = serde_json::from_slice(&json_out)?;
    assert_eq!(json["account"]["balance"], "10.00");
    assert_eq!(json["transactions"].as_array().unwrap().len(), 2);
    assert_eq!(json["transactions"][0]["type"], "deposit");
    assert_eq!(json["transactions"][0]["amount"], "10.50");

    let denied = exporter
        .export_history(account.id, mallory.id, ExportFormat::Csv, Vec::new())
        .await;
    assert!(denied.is_err());
    Ok(())
}

#[tokio::test]
async fn test_export_analytics_csv() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let admin = register_admin(&services, "admin").await?;
    open_funded_account(&services, &alice, 2_000).await?;

    let exporter = Exporter::new(&services);
    let mut out = Vec::new();
    let analytics = exporter
        .export_analytics(&admin.caller(), ExportFormat::Csv, &mut out)
        .await?;
    assert_eq!(analytics.total_transactions, 1);

    let text = String::from_utf8(out)?;
    assert_eq!(text.lines().next(), Some("metric,value"));
    assert!(text.contains("total_deposits,20.00"));
    assert!(text.contains("type,count,volume"));
    assert!(text.contains("deposit,1,20.00"));

    let denied = exporter
        .export_analytics(&alice.caller(), ExportFormat::Json, Vec::new())
        .await;
    assert!(denied.is_err());
    Ok(())
}
