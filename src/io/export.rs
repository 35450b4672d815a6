use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::{Services, TransactionAnalytics};
use crate::domain::{Account, AccountId, Caller, Transaction, UserId, format_cents};

/// One account's history as written by the JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryExport {
    pub exported_at: DateTime<Utc>,
    pub account: Account,
    pub transactions: Vec<Transaction>,
}

/// Export format selectable from the CLI and the `format` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// Write transactions as CSV, in the order given. Returns the number of rows.
pub fn write_transactions_csv<W: Write>(transactions: &[Transaction], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "id",
        "sequence",
        "date",
        "type",
        "amount",
        "balance_after",
        "description",
    ])?;

    for transaction in transactions {
        csv_writer.write_record([
            transaction.id.to_string(),
            transaction.sequence.to_string(),
            transaction.created_at.to_rfc3339(),
            transaction.transaction_type.as_str().to_string(),
            format_cents(transaction.amount_cents),
            format_cents(transaction.balance_after),
            transaction.description.clone().unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(transactions.len())
}

/// Write analytics as CSV: a summary block, the per-type block and the recent
/// transactions, separated by blank lines.
pub fn write_analytics_csv<W: Write>(analytics: &TransactionAnalytics, writer: W) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(writer);

    csv_writer.write_record(["metric", "value"])?;
    csv_writer.write_record(["generated_at".to_string(), analytics.generated_at.to_rfc3339()])?;
    csv_writer.write_record([
        "total_transactions".to_string(),
        analytics.total_transactions.to_string(),
    ])?;
    csv_writer.write_record([
        "total_deposits".to_string(),
        format_cents(analytics.total_deposits),
    ])?;
    csv_writer.write_record([
        "total_withdrawals".to_string(),
        format_cents(analytics.total_withdrawals),
    ])?;
    csv_writer.write_record(["net_volume".to_string(), format_cents(analytics.net_volume())])?;

    csv_writer.write_record([""])?;
    csv_writer.write_record(["type", "count", "volume"])?;
    for summary in &analytics.by_type {
        csv_writer.write_record([
            summary.transaction_type.as_str().to_string(),
            summary.count.to_string(),
            format_cents(summary.volume),
        ])?;
    }

    csv_writer.write_record([""])?;
    csv_writer.write_record([
        "date",
        "account_number",
        "username",
        "type",
        "amount",
        "balance_after",
    ])?;
    for view in &analytics.recent_transactions {
        csv_writer.write_record([
            view.transaction.created_at.to_rfc3339(),
            view.account_number.clone(),
            view.username.clone(),
            view.transaction.transaction_type.as_str().to_string(),
            format_cents(view.transaction.amount_cents),
            format_cents(view.transaction.balance_after),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Exporter for writing ledger data to CSV or JSON
pub struct Exporter<'a> {
    services: &'a Services,
}

impl<'a> Exporter<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    /// Export one account's history, oldest first. Only the owner may export.
    pub async fn export_history<W: Write>(
        &self,
        account_id: AccountId,
        caller_id: UserId,
        format: ExportFormat,
        mut writer: W,
    ) -> Result<usize> {
        let account = self
            .services
            .ledger
            .get_account(account_id, caller_id)
            .await?;
        let mut transactions = self
            .services
            .ledger
            .list_transactions(account_id, caller_id)
            .await?;
        transactions.reverse();
        let count = transactions.len();

        match format {
            ExportFormat::Csv => {
                write_transactions_csv(&transactions, writer)?;
            }
            ExportFormat::Json => {
                let export = HistoryExport {
                    exported_at: Utc::now(),
                    account,
                    transactions,
                };
                serde_json::to_writer_pretty(&mut writer, &export)?;
                writer.flush()?;
            }
        }

        Ok(count)
    }

    /// Export bank-wide analytics. Admin only.
    pub async fn export_analytics<W: Write>(
        &self,
        caller: &Caller,
        format: ExportFormat,
        mut writer: W,
    ) -> Result<TransactionAnalytics> {
        let analytics = self.services.queries.transaction_analytics(caller).await?;

        match format {
            ExportFormat::Csv => write_analytics_csv(&analytics, writer)?,
            ExportFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, &analytics)?;
                writer.flush()?;
            }
        }

        Ok(analytics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;
    use uuid::Uuid;

    fn transaction(sequence: i64, amount: i64, balance_after: i64) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            sequence,
            transaction_type: TransactionType::Deposit,
            amount_cents: amount,
            balance_after,
            description: Some("pay, day".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_transactions_csv_renders_decimal_amounts() {
        let mut out = Vec::new();
        let count =
            write_transactions_csv(&[transaction(1, 1050, 1050), transaction(2, 5, 1055)], &mut out)
                .unwrap();
        assert_eq!(count, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "id,sequence,date,type,amount,balance_after,description"
        );
        assert!(lines[1].contains(",deposit,10.50,10.50,\"pay, day\""));
        assert!(lines[2].contains(",0.05,10.55,"));
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!(ExportFormat::from_str("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_str("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_str("xml"), None);
    }
}
