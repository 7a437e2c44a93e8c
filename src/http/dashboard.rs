use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{optional, ApiQuery, AppState};
use crate::{
    auth::CurrentUser,
    db::{
        complaints::{self, Dimension},
        evaluations,
        logs::{self, LogFilter},
        service_requests,
    },
    error::ApiResult,
    models::{CountBucket, LogEntry, TechnicianScore},
    permissions::Permission,
    scoring,
};

const SCORE_WINDOW_DAYS: i64 = 30;
const TOP_TECHNICIANS: usize = 5;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub complaints_by_status: Vec<CountBucket>,
    pub complaints_by_severity: Vec<CountBucket>,
    pub complaints_by_source: Vec<CountBucket>,
    pub open_complaints: i64,
    pub unassigned_complaints: i64,
    pub service_requests_by_status: Vec<CountBucket>,
    pub top_technicians: Vec<TechnicianScore>,
    pub connected_clients: usize,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub limit: Option<i64>,
}

pub async fn stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<DashboardStats>> {
    user.require(Permission::ReportsView)?;
    let pool = &state.pool;

    let (by_status, by_severity, by_source, (open, unassigned), requests, ratings) = tokio::try_join!(
        complaints::count_by(pool, Dimension::Status),
        complaints::count_by(pool, Dimension::Severity),
        complaints::count_by(pool, Dimension::Source),
        complaints::open_counts(pool),
        service_requests::count_by_status(pool),
        evaluations::fetch_ratings(pool, scoring::cutoff_date(SCORE_WINDOW_DAYS), None),
    )?;

    let mut top_technicians = scoring::score_ratings(&ratings, SCORE_WINDOW_DAYS);
    top_technicians.truncate(TOP_TECHNICIANS);

    Ok(Json(DashboardStats {
        complaints_by_status: by_status,
        complaints_by_severity: by_severity,
        complaints_by_source: by_source,
        open_complaints: open,
        unassigned_complaints: unassigned,
        service_requests_by_status: requests,
        top_technicians,
        connected_clients: state.hub.connected(),
    }))
}

pub async fn logs(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<LogQuery>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    user.require(Permission::LogsView)?;

    let filter = LogFilter {
        entity_type: optional(query.entity_type.as_deref()),
        entity_id: query.entity_id,
        actor_id: query.actor_id,
        limit: query.limit,
    };
    Ok(Json(logs::list(&state.pool, &filter).await?))
}
