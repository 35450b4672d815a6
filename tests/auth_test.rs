mod common;

use anyhow::Result;
use bankledger::application::AuthError;
use bankledger::config::{AuthConfig, Settings};
use bankledger::domain::{LockoutPolicy, Registration, RegistrationError, Role};
use chrono::{Duration, Utc};

use common::{
    PASSWORD, register_admin, register_user, registration, test_services, test_services_with,
    test_settings,
};

fn settings_with_auth(auth: impl FnOnce(&mut AuthConfig)) -> Settings {
    let mut settings = test_settings();
    auth(&mut settings.auth);
    settings
}

#[tokio::test]
async fn test_register_creates_standard_user() -> Result<()> {
    let (services, _temp) = test_services().await?;

    let user = register_user(&services, "alice").await?;
    assert_eq!(user.username, "alice");
    assert_eq!(user.role, Role::Standard);
    assert!(user.active);
    assert!(user.password_hash.starts_with("$argon2id$"));
    assert!(!user.password_hash.contains(PASSWORD));

    // The hash never reaches JSON output
    let json = serde_json::to_value(&user)?;
    assert!(json.get("password_hash").is_none());
    Ok(())
}

#[tokio::test]
async fn test_register_validates_input() -> Result<()> {
    let (services, _temp) = test_services().await?;

    let cases = [
        (
            Registration {
                username: "a!".into(),
                ..registration("alice")
            },
            RegistrationError::Username,
        ),
        (
            Registration {
                email: "not-an-email".into(),
                ..registration("alice")
            },
            RegistrationError::Email,
        ),
        (
            Registration {
                password: "short".into(),
                ..registration("alice")
            },
            RegistrationError::Password,
        ),
        (
            Registration {
                full_name: "".into(),
                ..registration("alice")
            },
            RegistrationError::FullName,
        ),
    ];

    for (input, expected) in cases {
        match services.auth.register(input).await {
            Err(AuthError::InvalidInput(err)) => assert_eq!(err, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_or_email_is_rejected() -> Result<()> {
    let (services, _temp) = test_services().await?;
    register_user(&services, "alice").await?;

    let same_name = Registration {
        email: "other@example.com".into(),
        ..registration("alice")
    };
    assert!(matches!(
        services.auth.register(same_name).await,
        Err(AuthError::AlreadyExists)
    ));

    let same_email = Registration {
        username: "alice2".into(),
        ..registration("alice")
    };
    assert!(matches!(
        services.auth.register(same_email).await,
        Err(AuthError::AlreadyExists)
    ));
    Ok(())
}

#[tokio::test]
async fn test_login_by_username_or_email_issues_session() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;

    let by_name = services.auth.login("alice", PASSWORD).await?;
    assert_eq!(by_name.user.id, alice.id);
    assert_eq!(by_name.token.len(), 64);
    assert!(by_name.expires_at > Utc::now());

    let by_email = services.auth.login("alice@example.com", PASSWORD).await?;
    assert_ne!(by_name.token, by_email.token);

    let caller = services.auth.authenticate(&by_name.token).await?;
    assert_eq!(caller.user_id, alice.id);
    assert_eq!(caller.role, Role::Standard);
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() -> Result<()> {
    let (services, _temp) = test_services().await?;
    register_user(&services, "alice").await?;

    let wrong = services.auth.login("alice", "wrong password").await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

    let unknown = services.auth.login("nobody", PASSWORD).await;
    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    Ok(())
}

#[tokio::test]
async fn test_repeated_failures_lock_the_user() -> Result<()> {
    let settings = settings_with_auth(|auth| {
        auth.lockout = LockoutPolicy {
            max_failed_attempts: 3,
            lockout: Duration::minutes(15),
        }
    });
    let (services, _temp) = test_services_with(settings).await?;
    register_user(&services, "alice").await?;

    for _ in 0..2 {
        let attempt = services.auth.login("alice", "wrong password").await;
        assert!(matches!(attempt, Err(AuthError::InvalidCredentials)));
    }

    let third = services.auth.login("alice", "wrong password").await;
    let until = match third {
        Err(AuthError::Locked { until }) => until,
        other => panic!("expected lockout, got {:?}", other),
    };
    assert!(until > Utc::now() + Duration::minutes(14));

    // Even the right password is refused while locked
    let correct = services.auth.login("alice", PASSWORD).await;
    assert!(matches!(correct, Err(AuthError::Locked { .. })));
    Ok(())
}

#[tokio::test]
async fn test_lock_expires_and_success_resets_counter() -> Result<()> {
    let settings = settings_with_auth(|auth| {
        auth.lockout = LockoutPolicy {
            max_failed_attempts: 2,
            lockout: Duration::zero(),
        }
    });
    let (services, _temp) = test_services_with(settings).await?;
    register_user(&services, "alice").await?;

    services.auth.login("alice", "wrong password").await.unwrap_err();
    // A zero-length lockout is already over when checked
    services.auth.login("alice", "wrong password").await.unwrap_err();

    let result = services.auth.login("alice", PASSWORD).await?;
    assert_eq!(result.user.failed_logins, 0);
    assert!(result.user.locked_until.is_none());

    let stored = services.auth.find_user("alice").await?;
    assert_eq!(stored.failed_logins, 0);
    assert!(stored.locked_until.is_none());
    Ok(())
}

#[tokio::test]
async fn test_expired_session_is_rejected() -> Result<()> {
    let settings = settings_with_auth(|auth| auth.session_ttl = Duration::zero());
    let (services, _temp) = test_services_with(settings).await?;
    register_user(&services, "alice").await?;

    let login = services.auth.login("alice", PASSWORD).await?;
    let result = services.auth.authenticate(&login.token).await;
    assert!(matches!(result, Err(AuthError::Unauthenticated)));
    Ok(())
}

#[tokio::test]
async fn test_logout_ends_session() -> Result<()> {
    let (services, _temp) = test_services().await?;
    register_user(&services, "alice").await?;

    let login = services.auth.login("alice", PASSWORD).await?;
    services.auth.authenticate(&login.token).await?;

    services.auth.logout(&login.token).await?;
    let result = services.auth.authenticate(&login.token).await;
    assert!(matches!(result, Err(AuthError::Unauthenticated)));

    // Unknown tokens are fine
    services.auth.logout("not-a-token").await?;
    Ok(())
}

#[tokio::test]
async fn test_inactive_user_cannot_log_in_or_authenticate() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let login = services.auth.login("alice", PASSWORD).await?;

    sqlx::query("UPDATE users SET active = 0 WHERE id = ?")
        .bind(alice.id.to_string())
        .execute(services.repository().pool())
        .await?;

    assert!(matches!(
        services.auth.authenticate(&login.token).await,
        Err(AuthError::Unauthenticated)
    ));
    assert!(matches!(
        services.auth.login("alice", PASSWORD).await,
        Err(AuthError::InvalidCredentials)
    ));
    Ok(())
}

#[tokio::test]
async fn test_promote_and_list_users() -> Result<()> {
    let (services, _temp) = test_services().await?;
    let alice = register_user(&services, "alice").await?;
    let admin = register_admin(&services, "root_user").await?;
    assert_eq!(admin.role, Role::Admin);

    let login = services.auth.login("root_user", PASSWORD).await?;
    let caller = services.auth.authenticate(&login.token).await?;
    assert!(caller.is_admin());

    let users = services.auth.list_users(&caller).await?;
    assert_eq!(users.len(), 2);

    assert!(matches!(
        services.auth.list_users(&alice.caller()).await,
        Err(AuthError::Forbidden)
    ));
    assert!(matches!(
        services.auth.promote("ghost").await,
        Err(AuthError::UserNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_purge_expired_sessions() -> Result<()> {
    let settings = settings_with_auth(|auth| auth.session_ttl = Duration::zero());
    let (services, _temp) = test_services_with(settings).await?;
    register_user(&services, "alice").await?;

    services.auth.login("alice", PASSWORD).await?;
    services.auth.login("alice", PASSWORD).await?;

    assert_eq!(services.auth.purge_expired_sessions().await?, 2);
    assert_eq!(services.auth.purge_expired_sessions().await?, 0);
    Ok(())
}
