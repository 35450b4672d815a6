// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use bankledger::application::Services;
use bankledger::config::{AuthConfig, Settings};
use bankledger::domain::{Account, Cents, Registration, User};
use tempfile::TempDir;

pub const PASSWORD: &str = "password123";

/// Settings with cheap password hashing so tests stay fast.
pub fn test_settings() -> Settings {
    Settings {
        auth: AuthConfig {
            hash_memory_kib: 256,
            hash_iterations: 1,
            ..AuthConfig::default()
        },
        ..Settings::default()
    }
}

/// Helper to create services on a temporary database
pub async fn test_services() -> Result<(Services, TempDir)> {
    test_services_with(test_settings()).await
}

pub async fn test_services_with(settings: Settings) -> Result<(Services, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let services = Services::init(db_path.to_str().unwrap(), &settings).await?;
    Ok((services, temp_dir))
}

pub fn registration(username: &str) -> Registration {
    Registration {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        full_name: format!("{} Example", username),
        password: PASSWORD.to_string(),
    }
}

pub async fn register_user(services: &Services, username: &str) -> Result<User> {
    Ok(services.auth.register(registration(username)).await?)
}

pub async fn register_admin(services: &Services, username: &str) -> Result<User> {
    register_user(services, username).await?;
    services.auth.promote(username).await?;
    Ok(services.auth.find_user(username).await?)
}

/// Open an account for `owner` and deposit `cents` into it (nothing when zero).
pub async fn open_funded_account(services: &Services, owner: &User, cents: Cents) -> Result<Account> {
    let account = services.ledger.open_account(owner.id).await?;
    if cents > 0 {
        services
            .ledger
            .deposit(account.id, owner.id, cents, Some("Initial funding".into()))
            .await?;
    }
    Ok(services.ledger.get_account(account.id, owner.id).await?)
}
