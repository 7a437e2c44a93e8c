use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{check_rating, optional, ApiJson, ApiQuery, AppState};
use crate::{
    audit::{self, Outbox},
    auth::CurrentUser,
    db::{
        evaluations::{self, NewDetailed},
        service_requests, technicians,
    },
    error::{ApiError, ApiResult},
    models::{DetailedEvaluation, Evaluation, TechnicianScore},
    permissions::Permission,
    scoring::{self, EvaluationTotals},
};

#[derive(Debug, Deserialize)]
pub struct EvaluationQuery {
    pub technician_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub since_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEvaluation {
    pub technician_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub evaluated_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDetailed {
    pub technician_id: Uuid,
    pub service_request_id: Option<Uuid>,
    pub visit_date: Option<NaiveDate>,
    pub punctuality: i32,
    pub quality: i32,
    pub behavior: i32,
    pub cleanliness: i32,
    pub communication: i32,
    pub comments: Option<String>,
}

impl CreateDetailed {
    fn scores(&self) -> ApiResult<[i32; 5]> {
        let scores = [
            ("punctuality", self.punctuality),
            ("quality", self.quality),
            ("behavior", self.behavior),
            ("cleanliness", self.cleanliness),
            ("communication", self.communication),
        ];
        for (field, value) in scores {
            check_rating(field, value)?;
        }
        Ok(scores.map(|(_, value)| value))
    }
}

#[derive(Debug, Serialize)]
pub struct EvaluationStats {
    pub since_days: i64,
    pub totals: EvaluationTotals,
    pub technicians: Vec<TechnicianScore>,
}

fn check_date(field: &str, date: Option<NaiveDate>) -> ApiResult<NaiveDate> {
    let today = Utc::now().date_naive();
    let date = date.unwrap_or(today);
    if date > today {
        return Err(ApiError::validation(format!("{field} cannot be in the future")));
    }
    Ok(date)
}

async fn ensure_technician(conn: &mut sqlx::PgConnection, id: Uuid) -> ApiResult<()> {
    if !technicians::exists(conn, id).await? {
        return Err(ApiError::validation("technician does not exist"));
    }
    Ok(())
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<EvaluationQuery>,
) -> ApiResult<Json<Vec<Evaluation>>> {
    user.require(Permission::EvaluationsView)?;
    Ok(Json(evaluations::list(&state.pool, query.technician_id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateEvaluation>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::EvaluationsCreate)?;
    check_rating("rating", body.rating)?;
    let evaluated_on = check_date("evaluated_on", body.evaluated_on)?;
    let comment = optional(body.comment.as_deref());

    let mut tx = state.pool.begin().await?;
    ensure_technician(&mut tx, body.technician_id).await?;

    let evaluation = evaluations::insert(
        &mut tx,
        body.technician_id,
        user.id,
        body.rating,
        comment.as_deref(),
        evaluated_on,
    )
    .await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "evaluation.created",
        "evaluation",
        Some(evaluation.id),
        json!({ "technician_id": evaluation.technician_id, "rating": evaluation.rating }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("evaluation_created", &evaluation);
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok((StatusCode::CREATED, Json(evaluation)))
}

pub async fn detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Evaluation>> {
    user.require(Permission::EvaluationsView)?;
    let evaluation = evaluations::find(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("evaluation"))?;
    Ok(Json(evaluation))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require(Permission::EvaluationsDelete)?;

    let mut tx = state.pool.begin().await?;
    if !evaluations::delete(&mut tx, id).await? {
        return Err(ApiError::NotFound("evaluation"));
    }
    audit::log_action(
        &mut tx,
        Some(user.id),
        "evaluation.deleted",
        "evaluation",
        Some(id),
        json!({}),
    )
    .await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_detailed(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<EvaluationQuery>,
) -> ApiResult<Json<Vec<DetailedEvaluation>>> {
    user.require(Permission::EvaluationsView)?;
    Ok(Json(
        evaluations::list_detailed(&state.pool, query.technician_id).await?,
    ))
}

pub async fn create_detailed(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateDetailed>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::EvaluationsCreate)?;
    let scores = body.scores()?;
    let visit_date = check_date("visit_date", body.visit_date)?;
    let comments = optional(body.comments.as_deref());

    let mut tx = state.pool.begin().await?;
    ensure_technician(&mut tx, body.technician_id).await?;

    if let Some(request_id) = body.service_request_id {
        let request = service_requests::find(&mut *tx, request_id)
            .await?
            .ok_or_else(|| ApiError::validation("service request does not exist"))?;
        if request.technician_id != Some(body.technician_id) {
            return Err(ApiError::validation(
                "service request was not handled by this technician",
            ));
        }
    }

    let evaluation = evaluations::insert_detailed(
        &mut tx,
        NewDetailed {
            technician_id: body.technician_id,
            evaluator_id: user.id,
            service_request_id: body.service_request_id,
            visit_date,
            scores,
            comments: comments.as_deref(),
        },
    )
    .await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "evaluation.detailed_created",
        "detailed_evaluation",
        Some(evaluation.id),
        json!({ "technician_id": evaluation.technician_id, "overall": evaluation.overall() }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("evaluation_created", &evaluation);
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok((StatusCode::CREATED, Json(evaluation)))
}

pub async fn stats(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<StatsQuery>,
) -> ApiResult<Json<EvaluationStats>> {
    user.require(Permission::EvaluationsView)?;
    let since_days = query.since_days.unwrap_or(30).clamp(1, 3650);

    let ratings =
        evaluations::fetch_ratings(&state.pool, scoring::cutoff_date(since_days), None).await?;

    Ok(Json(EvaluationStats {
        since_days,
        totals: scoring::totals(&ratings, since_days),
        technicians: scoring::score_ratings(&ratings, since_days),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detailed(punctuality: i32) -> CreateDetailed {
        CreateDetailed {
            technician_id: Uuid::new_v4(),
            service_request_id: None,
            visit_date: None,
            punctuality,
            quality: 4,
            behavior: 5,
            cleanliness: 3,
            communication: 4,
            comments: None,
        }
    }

    #[test]
    fn every_criterion_must_be_in_range() {
        assert_eq!(detailed(5).scores().unwrap(), [5, 4, 5, 3, 4]);
        assert!(matches!(detailed(0).scores(), Err(ApiError::Validation(_))));
        assert!(matches!(detailed(6).scores(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn future_dates_are_rejected() {
        let tomorrow = Utc::now().date_naive() + chrono::Duration::days(1);
        assert!(check_date("visit_date", Some(tomorrow)).is_err());
        assert_eq!(check_date("visit_date", None).unwrap(), Utc::now().date_naive());
    }
}
