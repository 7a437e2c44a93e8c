use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts},
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    auth::{CurrentUser, SessionSigner},
    config::Config,
    db::MAX_PAGE,
    error::{ApiError, ApiResult},
    notify::NotificationHub,
    permissions::{role_table, RoleEntry},
};

mod auth;
mod complaints;
mod dashboard;
mod evaluations;
mod notifications;
mod service_requests;
mod team;
mod technicians;
mod uploads;
mod ws;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub signer: Arc<SessionSigner>,
    pub hub: NotificationHub,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            pool,
            signer: Arc::new(SessionSigner::new(
                &config.session_secret,
                config.session_ttl_hours,
            )),
            hub: NotificationHub::new(),
            config: Arc::new(config),
        }
    }
}

/// JSON body whose rejections render as `ApiError` (400 with a JSON body).
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string whose rejections render as `ApiError`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Trims a required text field, rejecting blanks.
pub(crate) fn required(field: &str, value: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > 5000 {
        return Err(ApiError::validation(format!("{field} is too long")));
    }
    Ok(trimmed.to_string())
}

/// Trims an optional text field; blanks become `None`.
pub(crate) fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// For update bodies: an absent field stays untouched and a blank one becomes
/// `Some("")`, which the update queries store as NULL.
pub(crate) fn clearable(field: &str, value: Option<&str>) -> ApiResult<Option<String>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Ok(Some(String::new())),
        Some(text) => required(field, text).map(Some),
    }
}

pub(crate) fn check_email(field: &str, value: Option<&str>) -> ApiResult<()> {
    if let Some(email) = value.map(str::trim).filter(|v| !v.is_empty()) {
        let valid = email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid {
            return Err(ApiError::validation(format!("{field} is not a valid email")));
        }
    }
    Ok(())
}

pub(crate) fn check_page(page: Option<i64>) -> ApiResult<()> {
    if page.is_some_and(|page| page > MAX_PAGE) {
        return Err(ApiError::validation(format!("page must be at most {MAX_PAGE}")));
    }
    Ok(())
}

pub(crate) fn check_rating(field: &str, value: i32) -> ApiResult<()> {
    if !(1..=5).contains(&value) {
        return Err(ApiError::validation(format!("{field} must be between 1 and 5")));
    }
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn permission_table(_user: CurrentUser) -> Json<Vec<RoleEntry>> {
    Json(role_table())
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/permissions", get(permission_table))
        .route("/complaints", get(complaints::list).post(complaints::create))
        .route(
            "/complaints/{id}",
            get(complaints::detail)
                .put(complaints::update)
                .delete(complaints::remove),
        )
        .route("/complaints/{id}/status", post(complaints::change_status))
        .route("/complaints/{id}/assign", post(complaints::assign))
        .route(
            "/complaints/{id}/notes",
            get(complaints::list_notes).post(complaints::add_note),
        )
        .route("/complaints/{id}/history", get(complaints::history))
        .route("/complaints/{id}/attachments", get(complaints::attachments))
        .route("/team", get(team::list).post(team::create))
        .route(
            "/team/{id}",
            get(team::detail).put(team::update).delete(team::remove),
        )
        .route("/technicians", get(technicians::list).post(technicians::create))
        .route(
            "/technicians/{id}",
            get(technicians::detail)
                .put(technicians::update)
                .delete(technicians::remove),
        )
        .route("/evaluations", get(evaluations::list).post(evaluations::create))
        .route("/evaluations/stats", get(evaluations::stats))
        .route(
            "/evaluations/detailed",
            get(evaluations::list_detailed).post(evaluations::create_detailed),
        )
        .route(
            "/evaluations/{id}",
            get(evaluations::detail).delete(evaluations::remove),
        )
        .route(
            "/service-requests",
            get(service_requests::list).post(service_requests::create),
        )
        .route(
            "/service-requests/{id}",
            get(service_requests::detail)
                .put(service_requests::update)
                .delete(service_requests::remove),
        )
        .route(
            "/service-requests/{id}/status",
            post(service_requests::change_status),
        )
        .route("/service-requests/{id}/assign", post(service_requests::assign))
        .route("/notifications", get(notifications::list))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/logs", get(dashboard::logs))
        .route("/dashboard/stats", get(dashboard::stats))
        .route(
            "/uploads",
            post(uploads::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/uploads/{id}", get(uploads::download));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::connect))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http());

    if let Some(origin) = state
        .config
        .cors_origin
        .as_deref()
        .and_then(|origin| HeaderValue::from_str(origin).ok())
    {
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true)
            .max_age(Duration::from_secs(60 * 60));
        app = app.layer(cors);
    }

    app.with_state(state)
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(&config.database_url, config.db_max_connections).await?;
    crate::db::init_db(&pool).await?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create {}", config.upload_dir.display()))?;

    let address = config.bind_addr.clone();
    let state = AppState::new(pool, config);
    let app = build_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
pub(crate) mod tests;
