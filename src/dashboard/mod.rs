//! Dashboard: Axum JSON API over the ledger.
//!
//! Read projections under `/api`, admin writes (depositors, deposits,
//! pool credentials) and `POST /api/revaluation`, which runs a cycle on
//! demand. No authentication; bind to loopback. CORS enabled for local
//! development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Bind the dashboard and serve it on a background task.
pub async fn spawn_dashboard(state: AppState, bind: &str, port: u16) -> Result<JoinHandle<()>> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("Invalid dashboard address {bind}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard on {addr}"))?;
    let app = build_router(state);

    info!(%addr, "Dashboard server starting on http://{addr}");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/pools", get(routes::get_pools))
        .route("/api/statistics", get(routes::get_statistics))
        .route(
            "/api/depositors",
            get(routes::get_depositors).post(routes::create_depositor),
        )
        .route("/api/depositors/:id", get(routes::get_depositor))
        .route("/api/depositors/:id/status", put(routes::set_depositor_status))
        .route("/api/depositors/:id/summary", get(routes::get_depositor_summary))
        .route("/api/depositors/:id/deposits", get(routes::get_depositor_deposits))
        .route(
            "/api/depositors/:id/deposits/:deposit_id/history",
            get(routes::get_deposit_history),
        )
        .route("/api/deposits", post(routes::create_deposit))
        .route("/api/deposits/:id", delete(routes::delete_deposit))
        .route("/api/deposits/:id/deactivate", put(routes::deactivate_deposit))
        .route("/api/pools/:id/credentials", put(routes::configure_pool))
        .route("/api/scheduler", get(routes::get_scheduler))
        .route("/api/revaluation", post(routes::trigger_revaluation))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
