// Application layer: use cases on top of the repository.
// Ledger mutations, authentication and read-only reporting each get their own service;
// `Services` wires them to one shared connection pool.

mod auth;
mod error;
mod ledger;
mod locks;
mod reporting;

pub use auth::*;
pub use error::*;
pub use ledger::*;
pub use locks::*;
pub use reporting::*;

use anyhow::Result;

use crate::config::Settings;
use crate::storage::Repository;

/// All services of one running instance, sharing a repository.
pub struct Services {
    pub ledger: LedgerService,
    pub auth: AuthService,
    pub queries: QueryService,
}

impl Services {
    /// Build the services on top of an already migrated repository.
    pub fn new(repo: Repository, settings: &Settings) -> Self {
        Self {
            ledger: LedgerService::new(repo.clone(), settings.ledger.clone()),
            auth: AuthService::new(repo.clone(), settings.auth.clone()),
            queries: QueryService::new(repo),
        }
    }

    /// Open (creating if needed) the database file and apply the schema.
    pub async fn init(database_path: &str, settings: &Settings) -> Result<Self> {
        let url = database_url(database_path);
        let repo = Repository::init(&url, &settings.storage).await?;
        Ok(Self::new(repo, settings))
    }

    /// The shared repository, for maintenance and tests.
    pub fn repository(&self) -> &Repository {
        self.ledger.repository()
    }
}

fn database_url(database_path: &str) -> String {
    if database_path.starts_with("sqlite:") {
        database_path.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", database_path)
    }
}
