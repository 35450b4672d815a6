use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,50}$").expect("valid username pattern"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

pub const MAX_EMAIL_LEN: usize = 100;
pub const MAX_FULL_NAME_LEN: usize = 100;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Standard,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Standard => "standard",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(Role::Standard),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered user. The password hash never leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub failed_logins: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, email: String, full_name: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            full_name,
            password_hash,
            role: Role::Standard,
            active: true,
            failed_logins: 0,
            locked_until: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.id,
            role: self.role,
        }
    }
}

/// Identity of an authenticated request, as seen by the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// How many consecutive failed logins lock a user out, and for how long.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: i64,
    pub lockout: Duration,
}

impl LockoutPolicy {
    pub fn locked_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.lockout
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::minutes(15),
        }
    }
}

/// A login session. The token is handed to the client as a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token: format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
            user_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Validated registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if !USERNAME_RE.is_match(&self.username) {
            return Err(RegistrationError::Username);
        }
        if self.email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(&self.email) {
            return Err(RegistrationError::Email);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(RegistrationError::Password);
        }
        let name = self.full_name.trim();
        if name.is_empty() || name.chars().count() > MAX_FULL_NAME_LEN {
            return Err(RegistrationError::FullName);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    Username,
    Email,
    Password,
    FullName,
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::Username => {
                write!(f, "Username must be 3-50 alphanumeric characters")
            }
            RegistrationError::Email => write!(f, "Invalid email format"),
            RegistrationError::Password => {
                write!(f, "Password must be at least {} characters", MIN_PASSWORD_LEN)
            }
            RegistrationError::FullName => {
                write!(f, "Full name required (max {} chars)", MAX_FULL_NAME_LEN)
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration {
            username: "alice_01".into(),
            email: "alice@example.com".into(),
            full_name: "Alice Example".into(),
            password: "correct horse".into(),
        }
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::Standard, Role::Admin] {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_str("root"), None);
    }

    #[test]
    fn test_valid_registration() {
        assert_eq!(registration().validate(), Ok(()));
    }

    #[test]
    fn test_username_rules() {
        for bad in ["ab", "has space", "dash-name", &"x".repeat(51)] {
            let reg = Registration {
                username: bad.to_string(),
                ..registration()
            };
            assert_eq!(reg.validate(), Err(RegistrationError::Username), "{bad}");
        }
    }

    #[test]
    fn test_email_rules() {
        for bad in ["plain", "a@b", "a b@c.d", "@example.com"] {
            let reg = Registration {
                email: bad.to_string(),
                ..registration()
            };
            assert_eq!(reg.validate(), Err(RegistrationError::Email), "{bad}");
        }

        let long = Registration {
            email: format!("{}@example.com", "a".repeat(95)),
            ..registration()
        };
        assert_eq!(long.validate(), Err(RegistrationError::Email));
    }

    #[test]
    fn test_password_and_name_rules() {
        let short = Registration {
            password: "1234567".into(),
            ..registration()
        };
        assert_eq!(short.validate(), Err(RegistrationError::Password));

        let blank = Registration {
            full_name: "   ".into(),
            ..registration()
        };
        assert_eq!(blank.validate(), Err(RegistrationError::FullName));
    }

    #[test]
    fn test_lock_state() {
        let now = Utc::now();
        let mut user = User::new("bob".into(), "b@x.io".into(), "Bob".into(), String::new());
        assert!(!user.is_locked(now));

        user.locked_until = Some(LockoutPolicy::default().locked_until(now));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(16)));
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let session = Session::new(Uuid::new_v4(), now, Duration::hours(1));
        assert_eq!(session.token.len(), 64);
        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + Duration::hours(1)));
    }
}
