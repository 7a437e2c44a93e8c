use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{check_email, optional, required, ApiJson, ApiQuery, AppState};
use crate::{
    audit,
    auth::CurrentUser,
    db::{
        evaluations,
        technicians::{self, TechnicianFields},
    },
    error::{ApiError, ApiResult},
    models::{FieldTechnician, TechnicianScore},
    permissions::Permission,
    scoring,
};

/// Window used for the score summary on a technician's detail page.
const DETAIL_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
pub struct TechnicianQuery {
    pub active: Option<bool>,
    pub region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TechnicianBody {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
    pub specialty: Option<String>,
    pub active: Option<bool>,
    pub hired_on: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct TechnicianDetail {
    #[serde(flatten)]
    pub technician: FieldTechnician,
    pub score: Option<TechnicianScore>,
}

impl TechnicianBody {
    fn fields(&self) -> ApiResult<TechnicianFields> {
        check_email("email", self.email.as_deref())?;
        Ok(TechnicianFields {
            full_name: self
                .full_name
                .as_deref()
                .map(|name| required("full_name", name))
                .transpose()?,
            phone: optional(self.phone.as_deref()),
            email: optional(self.email.as_deref()),
            region: optional(self.region.as_deref()),
            specialty: optional(self.specialty.as_deref()),
            active: self.active,
            hired_on: self.hired_on,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<TechnicianQuery>,
) -> ApiResult<Json<Vec<FieldTechnician>>> {
    user.require(Permission::TechniciansView)?;
    let region = optional(query.region.as_deref());
    Ok(Json(
        technicians::list(&state.pool, query.active, region.as_deref()).await?,
    ))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<TechnicianBody>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::TechniciansManage)?;

    let fields = body.fields()?;
    let full_name = fields
        .full_name
        .clone()
        .ok_or_else(|| ApiError::validation("full_name is required"))?;

    let mut tx = state.pool.begin().await?;
    let technician = technicians::insert(&mut tx, &full_name, &fields).await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "technician.created",
        "technician",
        Some(technician.id),
        json!({ "full_name": technician.full_name, "region": technician.region }),
    )
    .await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(technician)))
}

pub async fn detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TechnicianDetail>> {
    user.require(Permission::TechniciansView)?;

    let technician = technicians::find(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("technician"))?;

    let cutoff = scoring::cutoff_date(DETAIL_WINDOW_DAYS);
    let ratings = evaluations::fetch_ratings(&state.pool, cutoff, Some(id)).await?;
    let score = scoring::score_ratings(&ratings, DETAIL_WINDOW_DAYS)
        .into_iter()
        .next();

    Ok(Json(TechnicianDetail { technician, score }))
}

pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<TechnicianBody>,
) -> ApiResult<Json<FieldTechnician>> {
    user.require(Permission::TechniciansManage)?;
    let fields = body.fields()?;

    let mut tx = state.pool.begin().await?;
    let technician = technicians::update(&mut tx, id, &fields)
        .await?
        .ok_or(ApiError::NotFound("technician"))?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "technician.updated",
        "technician",
        Some(id),
        json!({ "active": technician.active, "region": technician.region }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(technician))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require(Permission::TechniciansManage)?;

    let mut tx = state.pool.begin().await?;
    if !technicians::deactivate(&mut tx, id).await? {
        return Err(ApiError::NotFound("technician"));
    }
    audit::log_action(
        &mut tx,
        Some(user.id),
        "technician.deactivated",
        "technician",
        Some(id),
        json!({}),
    )
    .await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
