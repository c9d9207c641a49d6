//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! Write routes go straight to the `Ledger`; read routes to `Reports`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::engine::ledger::{Issuance, Ledger};
use crate::engine::reports::{
    DepositStatistics, DepositView, DepositorDetail, DepositorListItem, DepositorSummary,
    PoolStatus, Reports,
};
use crate::engine::scheduler::{CycleReport, Scheduler, SchedulerStatus};
use crate::types::{
    Credentials, DepositId, DepositProfit, Depositor, DepositorId, LedgerError, PoolId, Stablecoin,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub ledger: Arc<Ledger>,
    pub reports: Reports,
    pub scheduler: Arc<Scheduler>,
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `LedgerError` rendered as a JSON error body.
pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::CycleInProgress => StatusCode::CONFLICT,
            LedgerError::ProviderTransient { .. } => StatusCode::BAD_GATEWAY,
            LedgerError::DataAnomaly(_) | LedgerError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "API request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateDepositorRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub depositor_id: DepositorId,
    pub pool_id: PoolId,
    pub amount: Decimal,
    pub currency: Stablecoin,
}

/// `is_active` absent flips the current flag.
#[derive(Debug, Default, Deserialize)]
pub struct DepositorStatusRequest {
    pub is_active: Option<bool>,
}

/// Full replacement credential bundle. Blank fields count as unset.
#[derive(Default, Deserialize)]
pub struct PoolCredentialsRequest {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub passphrase: Option<String>,
    pub explorer_api_key: Option<String>,
    pub wallet_address: Option<String>,
}

impl PoolCredentialsRequest {
    fn into_credentials(self) -> Credentials {
        let keep = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Credentials {
            api_key: keep(self.api_key),
            api_secret: keep(self.api_secret).map(SecretString::new),
            passphrase: keep(self.passphrase).map(SecretString::new),
            explorer_api_key: keep(self.explorer_api_key).map(SecretString::new),
            wallet_address: keep(self.wallet_address),
        }
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/pools
pub async fn get_pools(State(state): State<AppState>) -> ApiResult<Vec<PoolStatus>> {
    let today = state.scheduler.today();
    Ok(Json(state.reports.pool_statuses(today).await?))
}

/// GET /api/statistics
pub async fn get_statistics(State(state): State<AppState>) -> ApiResult<DepositStatistics> {
    Ok(Json(state.reports.deposit_statistics().await?))
}

/// GET /api/depositors
pub async fn get_depositors(State(state): State<AppState>) -> ApiResult<Vec<DepositorListItem>> {
    Ok(Json(state.reports.list_depositors().await?))
}

/// GET /api/depositors/:id
pub async fn get_depositor(
    State(state): State<AppState>,
    Path(id): Path<DepositorId>,
) -> ApiResult<DepositorDetail> {
    Ok(Json(state.reports.depositor_detail(id, Utc::now()).await?))
}

/// GET /api/depositors/:id/summary
pub async fn get_depositor_summary(
    State(state): State<AppState>,
    Path(id): Path<DepositorId>,
) -> ApiResult<DepositorSummary> {
    Ok(Json(state.reports.depositor_summary(id, Utc::now()).await?))
}

/// GET /api/depositors/:id/deposits
pub async fn get_depositor_deposits(
    State(state): State<AppState>,
    Path(id): Path<DepositorId>,
) -> ApiResult<Vec<DepositView>> {
    Ok(Json(state.reports.deposit_views(id, Utc::now()).await?))
}

/// GET /api/depositors/:id/deposits/:deposit_id/history
pub async fn get_deposit_history(
    State(state): State<AppState>,
    Path((id, deposit_id)): Path<(DepositorId, DepositId)>,
) -> ApiResult<Vec<DepositProfit>> {
    Ok(Json(state.reports.deposit_history(deposit_id, id).await?))
}

/// GET /api/scheduler
pub async fn get_scheduler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

/// POST /api/revaluation: run a cycle now and return its report.
pub async fn trigger_revaluation(State(state): State<AppState>) -> ApiResult<CycleReport> {
    Ok(Json(state.scheduler.run_now().await?))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

/// POST /api/depositors
pub async fn create_depositor(
    State(state): State<AppState>,
    Json(req): Json<CreateDepositorRequest>,
) -> Result<(StatusCode, Json<Depositor>), ApiError> {
    let depositor = state.ledger.create_depositor(&req.name, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(depositor)))
}

/// PUT /api/depositors/:id/status
pub async fn set_depositor_status(
    State(state): State<AppState>,
    Path(id): Path<DepositorId>,
    Json(req): Json<DepositorStatusRequest>,
) -> ApiResult<serde_json::Value> {
    let is_active = match req.is_active {
        Some(active) => {
            state.ledger.set_depositor_active(id, active).await?;
            active
        }
        None => state.ledger.toggle_depositor(id).await?,
    };
    Ok(Json(json!({ "id": id, "is_active": is_active })))
}

/// POST /api/deposits: buy pool shares at the current NAV.
pub async fn create_deposit(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<Issuance>), ApiError> {
    let issuance = state
        .ledger
        .issue_shares(req.depositor_id, req.pool_id, req.amount, req.currency, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(issuance)))
}

/// PUT /api/deposits/:id/deactivate
pub async fn deactivate_deposit(
    State(state): State<AppState>,
    Path(id): Path<DepositId>,
) -> Result<StatusCode, ApiError> {
    state.ledger.deactivate_deposit(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/deposits/:id
pub async fn delete_deposit(
    State(state): State<AppState>,
    Path(id): Path<DepositId>,
) -> Result<StatusCode, ApiError> {
    state.ledger.delete_deposit(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/pools/:id/credentials
pub async fn configure_pool(
    State(state): State<AppState>,
    Path(id): Path<PoolId>,
    Json(req): Json<PoolCredentialsRequest>,
) -> ApiResult<serde_json::Value> {
    let pool = state.ledger.configure_pool(id, req.into_credentials()).await?;
    Ok(Json(json!({
        "id": pool.id,
        "name": pool.name,
        "kind": pool.kind,
        "identifier": pool.credentials.display_identifier(pool.kind),
        "is_configured": pool.is_configured(),
        "is_active": pool.is_active,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
