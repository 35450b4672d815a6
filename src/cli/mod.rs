use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::Services;
use crate::config::SettingsArgs;
use crate::domain::{Account, Caller, Registration, User, format_cents, parse_cents};
use crate::io::{ExportFormat, Exporter};

/// bankledger - account ledger with a REST API
#[derive(Parser)]
#[command(name = "bankledger")]
#[command(about = "Per-user bank accounts with a consistent transaction ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "BANKLEDGER_DATABASE", default_value = "bankledger.db")]
    pub database: String,

    /// Act as this user (username or email)
    #[arg(short, long, env = "BANKLEDGER_USER", global = true)]
    pub user: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "BANKLEDGER_BIND", default_value = "0.0.0.0:3000")]
        bind: String,

        /// Allowed CORS origin ("*" for any); CORS is off when omitted
        #[arg(long, env = "BANKLEDGER_CORS_ORIGIN")]
        cors_origin: Option<String>,
    },

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Account commands for the current user
    #[command(subcommand)]
    Account(AccountCommands),

    /// Deposit money into an account
    Deposit {
        /// Account number or ID
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the deposit
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account number or ID
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the withdrawal
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show the balance of one account, or of all your accounts
    Balance {
        /// Account number or ID (omit for all accounts)
        account: Option<String>,
    },

    /// List transactions of an account, most recent first
    History {
        /// Account number or ID
        account: String,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show bank-wide statistics
    Stats,

    /// Show transaction analytics (admin)
    Analytics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export data to CSV or JSON
    Export {
        /// What to export: history, analytics
        export_type: String,

        /// Account number or ID (required for history)
        #[arg(short, long)]
        account: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },

    /// Verify ledger integrity (admin)
    Check,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new user
    Register {
        username: String,

        email: String,

        /// Full name
        #[arg(long)]
        full_name: String,

        /// Password (at least 8 characters)
        #[arg(long, env = "BANKLEDGER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Grant the admin role to a user
    Promote { username: String },

    /// List all users (admin)
    List,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open,

    /// List your accounts
    List,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let settings = self.settings.to_settings();
        let services = Services::init(&self.database, &settings).await?;
        let session = Session {
            services: &services,
            user: self.user.as_deref(),
        };

        match self.command {
            Commands::Init => {
                println!("Database initialized: {}", self.database);
            }

            Commands::Serve { bind, cors_origin } => {
                crate::http::serve(services, &bind, cors_origin.as_deref()).await?;
            }

            Commands::User(cmd) => run_user_command(&session, cmd).await?,

            Commands::Account(cmd) => run_account_command(&session, cmd).await?,

            Commands::Deposit {
                account,
                amount,
                description,
            } => {
                let user = session.current_user().await?;
                let account = session.resolve_account(&user, &account).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let receipt = services
                    .ledger
                    .deposit(account.id, user.id, amount_cents, description)
                    .await?;
                println!(
                    "Deposited {} into {} (balance {})",
                    format_cents(receipt.transaction.amount_cents),
                    account.account_number,
                    format_cents(receipt.new_balance)
                );
            }

            Commands::Withdraw {
                account,
                amount,
                description,
            } => {
                let user = session.current_user().await?;
                let account = session.resolve_account(&user, &account).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let receipt = services
                    .ledger
                    .withdraw(account.id, user.id, amount_cents, description)
                    .await?;
                println!(
                    "Withdrew {} from {} (balance {})",
                    format_cents(receipt.transaction.amount_cents),
                    account.account_number,
                    format_cents(receipt.new_balance)
                );
            }

            Commands::Balance { account } => {
                let user = session.current_user().await?;
                match account {
                    Some(reference) => {
                        let account = session.resolve_account(&user, &reference).await?;
                        let balance = services.ledger.get_balance(account.id, user.id).await?;
                        println!(
                            "{}: {}",
                            balance.account_number,
                            format_cents(balance.balance)
                        );
                    }
                    None => {
                        let accounts = services.ledger.list_accounts(user.id).await?;
                        print_accounts(&accounts);
                    }
                }
            }

            Commands::History { account, limit } => {
                let user = session.current_user().await?;
                let account = session.resolve_account(&user, &account).await?;
                let transactions = services
                    .ledger
                    .list_transactions(account.id, user.id)
                    .await?;

                if transactions.is_empty() {
                    println!("No transactions found.");
                    return Ok(());
                }

                println!(
                    "{:<6} {:<20} {:<11} {:>14} {:>14}  DESCRIPTION",
                    "SEQ", "DATE", "TYPE", "AMOUNT", "BALANCE"
                );
                println!("{}", "-".repeat(82));
                for transaction in transactions.iter().take(limit.unwrap_or(usize::MAX)) {
                    println!(
                        "{:<6} {:<20} {:<11} {:>14} {:>14}  {}",
                        transaction.sequence,
                        transaction.created_at.format("%Y-%m-%d %H:%M:%S"),
                        transaction.transaction_type.as_str(),
                        format_cents(transaction.amount_cents),
                        format_cents(transaction.balance_after),
                        transaction.description.as_deref().unwrap_or("")
                    );
                }
            }

            Commands::Stats => {
                let stats = services.queries.statistics().await?;
                println!("Statistics ({})", stats.generated_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Users:            {}", stats.total_users);
                println!("  Active accounts:  {}", stats.active_accounts);
                println!("  Transactions:     {}", stats.total_transactions);
            }

            Commands::Analytics { json } => {
                let caller = session.current_caller().await?;
                let analytics = services.queries.transaction_analytics(&caller).await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&analytics)?);
                    return Ok(());
                }

                println!("Transaction Analytics");
                println!("  Transactions:  {}", analytics.total_transactions);
                println!("  Deposits:      {}", format_cents(analytics.total_deposits));
                println!("  Withdrawals:   {}", format_cents(analytics.total_withdrawals));
                println!("  Net:           {}", format_cents(analytics.net_volume()));
                println!();
                println!("{:<12} {:>8} {:>16}", "TYPE", "COUNT", "VOLUME");
                println!("{}", "-".repeat(38));
                for summary in &analytics.by_type {
                    println!(
                        "{:<12} {:>8} {:>16}",
                        summary.transaction_type.as_str(),
                        summary.count,
                        format_cents(summary.volume)
                    );
                }
                if !analytics.recent_transactions.is_empty() {
                    println!();
                    println!("Recent transactions:");
                    for view in &analytics.recent_transactions {
                        println!(
                            "  {}  {:<12} {:<11} {:>14}  {}",
                            view.transaction.created_at.format("%Y-%m-%d %H:%M:%S"),
                            view.account_number,
                            view.transaction.transaction_type.as_str(),
                            format_cents(view.transaction.amount_cents),
                            view.username
                        );
                    }
                }
            }

            Commands::Export {
                export_type,
                account,
                output,
                format,
            } => {
                run_export_command(
                    &session,
                    &export_type,
                    account.as_deref(),
                    output.as_deref(),
                    &format,
                )
                .await?;
            }

            Commands::Check => {
                let caller = session.current_caller().await?;
                let report = services.ledger.check_integrity(&caller).await?;

                println!(
                    "Checked {} accounts and {} transactions",
                    report.accounts_checked, report.transactions_checked
                );
                if report.is_healthy() {
                    println!("Ledger is consistent.");
                } else {
                    for account in &report.problems {
                        println!("Account {}:", account.account_number);
                        for issue in &account.issues {
                            println!("  - {}", issue);
                        }
                    }
                    bail!("{} accounts failed the integrity check", report.problems.len());
                }
            }
        }

        Ok(())
    }
}

/// The services plus the user named with `--user`.
struct Session<'a> {
    services: &'a Services,
    user: Option<&'a str>,
}

impl Session<'_> {
    async fn current_user(&self) -> Result<User> {
        let Some(identifier) = self.user else {
            bail!("This command needs --user <username> (or BANKLEDGER_USER)");
        };
        let user = self.services.auth.find_user(identifier).await?;
        if !user.active {
            bail!("User '{}' is inactive", user.username);
        }
        Ok(user)
    }

    async fn current_caller(&self) -> Result<Caller> {
        Ok(self.current_user().await?.caller())
    }

    /// Find one of the user's accounts by ID or account number.
    async fn resolve_account(&self, user: &User, reference: &str) -> Result<Account> {
        if let Ok(id) = Uuid::parse_str(reference) {
            return Ok(self.services.ledger.get_account(id, user.id).await?);
        }

        self.services
            .ledger
            .list_accounts(user.id)
            .await?
            .into_iter()
            .find(|account| account.account_number == reference)
            .with_context(|| format!("Account not found: {}", reference))
    }
}

async fn run_user_command(session: &Session<'_>, cmd: UserCommands) -> Result<()> {
    let services = session.services;

    match cmd {
        UserCommands::Register {
            username,
            email,
            full_name,
            password,
        } => {
            let user = services
                .auth
                .register(Registration {
                    username,
                    email,
                    full_name,
                    password,
                })
                .await?;
            println!("Registered user: {} ({})", user.username, user.id);
        }

        UserCommands::Promote { username } => {
            services.auth.promote(&username).await?;
            println!("Promoted {} to admin", username);
        }

        UserCommands::List => {
            let caller = session.current_caller().await?;
            let users = services.auth.list_users(&caller).await?;

            println!(
                "{:<20} {:<30} {:<10} {:<8}",
                "USERNAME", "EMAIL", "ROLE", "ACTIVE"
            );
            println!("{}", "-".repeat(70));
            for user in &users {
                println!(
                    "{:<20} {:<30} {:<10} {:<8}",
                    user.username,
                    user.email,
                    user.role.as_str(),
                    if user.active { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}

async fn run_account_command(session: &Session<'_>, cmd: AccountCommands) -> Result<()> {
    let user = session.current_user().await?;

    match cmd {
        AccountCommands::Open => {
            let account = session.services.ledger.open_account(user.id).await?;
            println!("Opened account {} ({})", account.account_number, account.id);
        }
        AccountCommands::List => {
            let accounts = session.services.ledger.list_accounts(user.id).await?;
            print_accounts(&accounts);
        }
    }
    Ok(())
}

async fn run_export_command(
    session: &Session<'_>,
    export_type: &str,
    account: Option<&str>,
    output: Option<&str>,
    format: &str,
) -> Result<()> {
    use std::fs::File;
    use std::io::{Write, stdout};

    let format = ExportFormat::from_str(format)
        .with_context(|| format!("Invalid format '{}'. Valid formats: csv, json", format))?;
    let exporter = Exporter::new(session.services);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "history" => {
            let user = session.current_user().await?;
            let reference = account.context("Exporting history needs --account")?;
            let account = session.resolve_account(&user, reference).await?;
            let count = exporter
                .export_history(account.id, user.id, format, writer)
                .await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "analytics" => {
            let caller = session.current_caller().await?;
            let analytics = exporter.export_analytics(&caller, format, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported analytics over {} transactions",
                    analytics.total_transactions
                );
            }
        }
        _ => {
            bail!(
                "Invalid export type '{}'. Valid types: history, analytics",
                export_type
            );
        }
    }

    Ok(())
}

fn print_accounts(accounts: &[Account]) {
    if accounts.is_empty() {
        println!("No accounts found.");
        return;
    }

    println!("{:<12} {:<8} {:>16}  {}", "NUMBER", "STATUS", "BALANCE", "ID");
    println!("{}", "-".repeat(76));
    for account in accounts {
        println!(
            "{:<12} {:<8} {:>16}  {}",
            account.account_number,
            account.status.as_str(),
            format_cents(account.balance),
            account.id
        );
    }
}
