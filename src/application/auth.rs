use anyhow::{Context, anyhow};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::domain::{Caller, Registration, Role, Session, User};
use crate::storage::Repository;

use super::AuthError;

/// Outcome of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Registration, login with lockout bookkeeping, and session resolution.
pub struct AuthService {
    repo: Repository,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(repo: Repository, config: AuthConfig) -> Self {
        Self { repo, config }
    }

    /// Create a standard user after validating the input and hashing the password.
    pub async fn register(&self, registration: Registration) -> Result<User, AuthError> {
        registration.validate()?;

        let Registration {
            username,
            email,
            full_name,
            password,
        } = registration;

        let password_hash = self.hash_password(password).await?;
        let user = User::new(username, email, full_name.trim().to_string(), password_hash);

        if !self.repo.insert_user(&user).await? {
            return Err(AuthError::AlreadyExists);
        }

        info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Check credentials and open a session.
    ///
    /// `identifier` may be a username or an email address. Unknown users, wrong
    /// passwords and inactive users all produce `InvalidCredentials`.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginResult, AuthError> {
        let Some(user) = self.repo.get_user_by_login(identifier.trim()).await? else {
            warn!("Login attempt for unknown user");
            return Err(AuthError::InvalidCredentials);
        };
        if !user.active {
            warn!(user_id = %user.id, "Login attempt for inactive user");
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        if let Some(until) = user.locked_until.filter(|_| user.is_locked(now)) {
            warn!(user_id = %user.id, %until, "Login attempt while locked");
            return Err(AuthError::Locked { until });
        }

        if !self
            .verify_password(password.to_string(), user.password_hash.clone())
            .await?
        {
            let policy = self.config.lockout;
            let locked_until = self
                .repo
                .record_failed_login(user.id, policy.max_failed_attempts, policy.locked_until(now))
                .await?;

            if let Some(until) = locked_until.filter(|until| *until > now) {
                warn!(user_id = %user.id, %until, "Too many failed logins, user locked");
                return Err(AuthError::Locked { until });
            }
            warn!(user_id = %user.id, "Failed login");
            return Err(AuthError::InvalidCredentials);
        }

        if user.failed_logins > 0 || user.locked_until.is_some() {
            self.repo.reset_failed_logins(user.id).await?;
        }

        let session = Session::new(user.id, now, self.config.session_ttl);
        self.repo.save_session(&session).await?;
        info!(user_id = %user.id, "User logged in");

        let user = User {
            failed_logins: 0,
            locked_until: None,
            ..user
        };
        Ok(LoginResult {
            token: session.token,
            expires_at: session.expires_at,
            user,
        })
    }

    /// Resolve a bearer token to the caller it was issued to.
    pub async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        let session = self
            .repo
            .get_session(token)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if session.is_expired(Utc::now()) {
            self.repo.delete_session(token).await?;
            return Err(AuthError::Unauthenticated);
        }

        let user = self
            .repo
            .get_user(session.user_id)
            .await?
            .filter(|user| user.active)
            .ok_or(AuthError::Unauthenticated)?;

        Ok(user.caller())
    }

    /// End a session. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        if self.repo.delete_session(token).await? {
            info!("Session closed");
        }
        Ok(())
    }

    /// Drop sessions past their expiry. Returns how many were removed.
    pub async fn purge_expired_sessions(&self) -> Result<u64, AuthError> {
        Ok(self.repo.delete_expired_sessions(Utc::now()).await?)
    }

    /// Look a user up by username or email.
    pub async fn find_user(&self, identifier: &str) -> Result<User, AuthError> {
        self.repo
            .get_user_by_login(identifier)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(identifier.to_string()))
    }

    /// All users, newest first. Admin only.
    pub async fn list_users(&self, caller: &Caller) -> Result<Vec<User>, AuthError> {
        if !caller.is_admin() {
            return Err(AuthError::Forbidden);
        }
        Ok(self.repo.list_users().await?)
    }

    /// Grant the admin role. Operator action, not exposed over HTTP.
    pub async fn promote(&self, username: &str) -> Result<(), AuthError> {
        if !self.repo.set_role(username, Role::Admin).await? {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        info!(%username, "Promoted user to admin");
        Ok(())
    }

    fn hasher(&self) -> anyhow::Result<Argon2<'static>> {
        let params = Params::new(
            self.config.hash_memory_kib,
            self.config.hash_iterations,
            1,
            None,
        )
        .map_err(|e| anyhow!("Invalid argon2 parameters: {}", e))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher()?;
        let hash = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
                .map_err(|e| anyhow!("Failed to encode salt: {}", e))?;
            let hash = hasher
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
            Ok(hash.to_string())
        })
        .await
        .context("Password hashing task failed")??;
        Ok(hash)
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, AuthError> {
        let verified = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            let parsed =
                PasswordHash::new(&hash).map_err(|e| anyhow!("Malformed password hash: {}", e))?;
            // Parameters come from the stored hash, not from the current config
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .context("Password verification task failed")??;
        Ok(verified)
    }
}
