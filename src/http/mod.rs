//! REST API over the services.
//!
//! | Method | Path | Access |
//! |--------|------|--------|
//! | GET | / | public |
//! | GET | /health | public |
//! | POST | /signup | public |
//! | POST | /login | public |
//! | POST | /logout | signed in |
//! | GET | /api/users | admin |
//! | GET, POST | /api/accounts | signed in |
//! | GET | /api/admin/accounts | admin |
//! | GET | /api/accounts/{id}/balance | owner |
//! | POST | /api/accounts/{id}/deposit | owner |
//! | POST | /api/accounts/{id}/withdraw | owner |
//! | GET | /api/accounts/{id}/transactions | owner |
//! | GET | /api/transactions | admin |
//! | GET | /api/data/sample | signed in |
//! | GET | /api/analytics/transactions | admin |
//! | GET | /api/admin/integrity | admin |

mod auth;
mod handlers;
mod response;

pub use auth::Authenticated;
pub use response::{ApiError, ApiResponse};

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::application::Services;

use handlers::*;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services: Arc::new(services),
        }
    }
}

/// Build the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/api/users", get(list_users))
        .route("/api/accounts", get(list_accounts).post(open_account))
        .route("/api/admin/accounts", get(list_all_accounts))
        .route("/api/admin/integrity", get(check_integrity))
        .route("/api/accounts/{id}/balance", get(get_balance))
        .route("/api/accounts/{id}/deposit", post(deposit))
        .route("/api/accounts/{id}/withdraw", post(withdraw))
        .route("/api/accounts/{id}/transactions", get(list_transactions))
        .route("/api/transactions", get(list_all_transactions))
        .route("/api/data/sample", get(sample_data))
        .route("/api/analytics/transactions", get(transaction_analytics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for a browser front end. `"*"` allows any origin.
pub fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("Invalid CORS origin: {}", origin))?;
    Ok(layer.allow_origin(origin))
}

/// Serve the API on `bind` until Ctrl-C.
pub async fn serve(services: Services, bind: &str, cors_origin: Option<&str>) -> Result<()> {
    let purged = services.auth.purge_expired_sessions().await?;
    if purged > 0 {
        info!(purged, "Removed expired sessions");
    }

    let mut app = router(AppState::new(services));
    if let Some(origin) = cors_origin {
        app = app.layer(cors_layer(origin)?);
    }

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %listener.local_addr()?, "Bank ledger API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Bank ledger API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
