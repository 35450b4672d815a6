// Export of ledger data to CSV and JSON

pub mod export;

pub use export::{ExportFormat, Exporter, HistoryExport, write_analytics_csv, write_transactions_csv};
