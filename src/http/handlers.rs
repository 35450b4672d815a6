use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::LedgerError;
use crate::domain::{AccountId, Cents, Registration, parse_cents};
use crate::io::{ExportFormat, write_analytics_csv, write_transactions_csv};

use super::AppState;
use super::auth::Authenticated;
use super::response::{ApiError, ApiResponse};

// ========================
// Request bodies
// ========================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "full_name")]
    pub full_name: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    #[serde(alias = "email", alias = "username")]
    pub identifier: Option<String>,
    pub password: Option<String>,
}

/// A money amount as sent by clients: `"12.50"` or `12.5`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    /// Parse from the decimal text of the value.
    pub fn to_cents(&self) -> Result<Cents, LedgerError> {
        let text = match self {
            AmountInput::Text(text) => text.clone(),
            AmountInput::Number(number) => number.to_string(),
        };
        parse_cents(&text).map_err(|e| LedgerError::InvalidAmount(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct MutationRequest {
    pub amount: Option<AmountInput>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

impl FormatQuery {
    fn export_format(&self) -> Result<ExportFormat, ApiError> {
        match self.format.as_deref() {
            None => Ok(ExportFormat::Json),
            Some(format) => ExportFormat::from_str(format)
                .ok_or_else(|| ApiError::bad_request(format!("Unsupported format: {}", format))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

fn account_id(path: Result<Path<Uuid>, PathRejection>) -> Result<AccountId, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ApiError::bad_request("Invalid account ID"))
}

fn csv_response(filename: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

// ========================
// Public routes
// ========================

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub time: String,
    pub version: &'static str,
}

/// GET / - proves the database answers.
pub async fn root(State(state): State<AppState>) -> Result<ApiResponse<ServerStatus>, ApiError> {
    let time = state
        .services
        .queries
        .database_time()
        .await
        .map_err(|err| {
            warn!(error = %err, "Database connection check failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Database connection failed")
        })?;

    Ok(ApiResponse::with_message(
        "Server is running",
        ServerStatus {
            time,
            version: env!("CARGO_PKG_VERSION"),
        },
    ))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.services.queries.health().await {
        (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected" })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "database": "disconnected" })),
        )
    }
}

/// POST /signup
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let user = state
        .services
        .auth
        .register(Registration {
            username: request.username.trim().to_string(),
            email: request.email.trim().to_string(),
            full_name: request.full_name,
            password: request.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("User created", user),
    ))
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let (Some(identifier), Some(password)) = (request.identifier, request.password) else {
        return Err(ApiError::bad_request("Email and password required"));
    };
    if identifier.trim().is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Email and password required"));
    }

    let result = state.services.auth.login(&identifier, &password).await?;
    Ok(ApiResponse::with_message("Login successful", result))
}

// ========================
// Authenticated routes
// ========================

/// POST /logout
pub async fn logout(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<ApiResponse<()>, ApiError> {
    state.services.auth.logout(&auth.token).await?;
    Ok(ApiResponse::message("Logged out"))
}

/// GET /api/users (admin)
pub async fn list_users(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.services.auth.list_users(&auth.caller).await?;
    Ok(ApiResponse::ok(users))
}

/// GET /api/accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let accounts = state
        .services
        .ledger
        .list_accounts(auth.caller.user_id)
        .await?;
    Ok(ApiResponse::ok(accounts))
}

/// POST /api/accounts
pub async fn open_account(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .services
        .ledger
        .open_account(auth.caller.user_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("Account opened", account),
    ))
}

/// GET /api/admin/accounts (admin)
pub async fn list_all_accounts(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let accounts = state.services.ledger.list_all_accounts(&auth.caller).await?;
    Ok(ApiResponse::ok(accounts))
}

/// GET /api/accounts/{id}/balance
pub async fn get_balance(
    State(state): State<AppState>,
    auth: Authenticated,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = account_id(path)?;
    let balance = state
        .services
        .ledger
        .get_balance(account_id, auth.caller.user_id)
        .await?;
    Ok(ApiResponse::ok(balance))
}

/// POST /api/accounts/{id}/deposit
pub async fn deposit(
    State(state): State<AppState>,
    auth: Authenticated,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MutationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = account_id(path)?;
    let request = body(payload)?;
    let amount = request
        .amount
        .ok_or_else(|| ApiError::bad_request("Amount required"))?
        .to_cents()?;

    let receipt = state
        .services
        .ledger
        .deposit(account_id, auth.caller.user_id, amount, request.description)
        .await?;
    Ok(ApiResponse::with_message("Deposit successful", receipt))
}

/// POST /api/accounts/{id}/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    auth: Authenticated,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MutationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = account_id(path)?;
    let request = body(payload)?;
    let amount = request
        .amount
        .ok_or_else(|| ApiError::bad_request("Amount required"))?
        .to_cents()?;

    let receipt = state
        .services
        .ledger
        .withdraw(account_id, auth.caller.user_id, amount, request.description)
        .await?;
    Ok(ApiResponse::with_message("Withdrawal successful", receipt))
}

/// GET /api/accounts/{id}/transactions[?format=csv]
pub async fn list_transactions(
    State(state): State<AppState>,
    auth: Authenticated,
    path: Result<Path<Uuid>, PathRejection>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, ApiError> {
    let account_id = account_id(path)?;
    let format = query.export_format()?;
    let transactions = state
        .services
        .ledger
        .list_transactions(account_id, auth.caller.user_id)
        .await?;

    match format {
        ExportFormat::Json => Ok(ApiResponse::ok(transactions).into_response()),
        ExportFormat::Csv => {
            let mut bytes = Vec::new();
            let rows = write_transactions_csv(&transactions, &mut bytes)?;
            debug!(%account_id, rows, "Exported transactions as CSV");
            Ok(csv_response("transactions.csv", bytes))
        }
    }
}

/// GET /api/transactions (admin)
pub async fn list_all_transactions(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let transactions = state
        .services
        .ledger
        .list_all_transactions(&auth.caller, query.limit)
        .await?;
    Ok(ApiResponse::ok(transactions))
}

/// GET /api/data/sample - bank-wide statistics for any signed-in user.
pub async fn sample_data(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let statistics = state.services.queries.statistics().await?;
    Ok(ApiResponse::ok(statistics))
}

/// GET /api/analytics/transactions[?format=csv] (admin)
pub async fn transaction_analytics(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<FormatQuery>,
) -> Result<Response, ApiError> {
    let format = query.export_format()?;
    let analytics = state
        .services
        .queries
        .transaction_analytics(&auth.caller)
        .await?;

    match format {
        ExportFormat::Json => Ok(ApiResponse::ok(analytics).into_response()),
        ExportFormat::Csv => {
            let mut bytes = Vec::new();
            write_analytics_csv(&analytics, &mut bytes)?;
            Ok(csv_response("analytics.csv", bytes))
        }
    }
}

/// GET /api/admin/integrity (admin)
pub async fn check_integrity(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.services.ledger.check_integrity(&auth.caller).await?;
    let message = if report.is_healthy() {
        "Ledger is consistent"
    } else {
        "Ledger inconsistencies found"
    };
    Ok(ApiResponse::with_message(message, report))
}
