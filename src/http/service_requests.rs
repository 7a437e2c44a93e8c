use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use super::{check_page, clearable, optional, required, ApiJson, ApiQuery, AppState};
use crate::{
    audit::{self, InboxItem, Outbox},
    auth::CurrentUser,
    db::{
        complaints,
        service_requests::{
            self, NewServiceRequest, ServiceRequestChanges, ServiceRequestFilter,
        },
        technicians,
    },
    error::{ApiError, ApiResult},
    models::{Page, Priority, RequestType, ServiceRequest, ServiceRequestStatus},
    notify::recipients,
    permissions::Permission,
    workflow::{plan_service_request_transition, Lifecycle},
};

#[derive(Debug, Deserialize)]
pub struct ServiceRequestQuery {
    pub status: Option<ServiceRequestStatus>,
    pub technician_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub address: String,
    pub description: String,
    pub request_type: Option<RequestType>,
    pub priority: Option<Priority>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub technician_id: Option<Uuid>,
    pub complaint_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub request_type: Option<RequestType>,
    pub priority: Option<Priority>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ServiceRequestStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub technician_id: Option<Uuid>,
}

impl UpdateServiceRequest {
    fn changes(&self) -> ApiResult<ServiceRequestChanges> {
        let non_blank = |field: &str, value: &Option<String>| {
            value.as_deref().map(|text| required(field, text)).transpose()
        };
        let changes = ServiceRequestChanges {
            customer_name: non_blank("customer_name", &self.customer_name)?,
            customer_phone: clearable("customer_phone", self.customer_phone.as_deref())?,
            address: non_blank("address", &self.address)?,
            description: non_blank("description", &self.description)?,
            request_type: self.request_type,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            notes: clearable("notes", self.notes.as_deref())?,
        };

        let empty = changes.customer_name.is_none()
            && changes.customer_phone.is_none()
            && changes.address.is_none()
            && changes.description.is_none()
            && changes.request_type.is_none()
            && changes.priority.is_none()
            && changes.scheduled_for.is_none()
            && changes.notes.is_none();
        if empty {
            return Err(ApiError::validation("no changes supplied"));
        }
        Ok(changes)
    }
}

async fn load_for_update(conn: &mut PgConnection, id: Uuid) -> ApiResult<ServiceRequest> {
    service_requests::find_for_update(conn, id)
        .await?
        .ok_or(ApiError::NotFound("service request"))
}

async fn ensure_technician(conn: &mut PgConnection, technician_id: Option<Uuid>) -> ApiResult<()> {
    if let Some(id) = technician_id {
        if !technicians::exists(conn, id).await? {
            return Err(ApiError::validation("technician does not exist"));
        }
    }
    Ok(())
}

/// Queues the broadcast and the creator's inbox entry for a changed request.
async fn announce(
    conn: &mut PgConnection,
    outbox: &mut Outbox,
    user: &CurrentUser,
    request: &ServiceRequest,
    headline: String,
) -> ApiResult<()> {
    outbox.broadcast("service_request_updated", request);
    outbox
        .notify(
            conn,
            &recipients(&[Some(request.created_by)], user.id),
            InboxItem {
                kind: "service_request_updated",
                title: headline,
                message: format!("{} at {}", request.customer_name, request.address),
                entity_type: "service_request",
                entity_id: request.id,
            },
        )
        .await?;
    Ok(())
}

fn reference(request: &ServiceRequest) -> String {
    format!("SR-{:06}", request.number)
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<ServiceRequestQuery>,
) -> ApiResult<Json<Page<ServiceRequest>>> {
    user.require(Permission::ServiceRequestsView)?;
    check_page(query.page)?;

    let filter = ServiceRequestFilter {
        status: query.status,
        technician_id: query.technician_id,
        from: query.from,
        to: query.to,
        page: query.page,
        per_page: query.per_page,
    };
    Ok(Json(service_requests::list(&state.pool, &filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateServiceRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::ServiceRequestsCreate)?;
    if body.technician_id.is_some() {
        user.require(Permission::ServiceRequestsAssign)?;
    }

    let customer_name = required("customer_name", &body.customer_name)?;
    let address = required("address", &body.address)?;
    let description = required("description", &body.description)?;
    let customer_phone = optional(body.customer_phone.as_deref());
    let notes = optional(body.notes.as_deref());
    let status = if body.scheduled_for.is_some() {
        ServiceRequestStatus::Scheduled
    } else {
        ServiceRequestStatus::Pending
    };

    let mut tx = state.pool.begin().await?;
    ensure_technician(&mut tx, body.technician_id).await?;
    if let Some(complaint_id) = body.complaint_id {
        if complaints::find(&mut *tx, complaint_id).await?.is_none() {
            return Err(ApiError::validation("complaint does not exist"));
        }
    }

    let request = service_requests::insert(
        &mut tx,
        NewServiceRequest {
            customer_name: &customer_name,
            customer_phone: customer_phone.as_deref(),
            address: &address,
            description: &description,
            request_type: body.request_type.unwrap_or(RequestType::Repair),
            priority: body.priority.unwrap_or(Priority::Normal),
            status,
            scheduled_for: body.scheduled_for,
            technician_id: body.technician_id,
            complaint_id: body.complaint_id,
            notes: notes.as_deref(),
            created_by: user.id,
        },
    )
    .await?;

    audit::log_action(
        &mut tx,
        Some(user.id),
        "service_request.created",
        "service_request",
        Some(request.id),
        json!({ "reference": reference(&request), "status": request.status }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("service_request_created", &request);
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ServiceRequest>> {
    user.require(Permission::ServiceRequestsView)?;
    let request = service_requests::find(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("service request"))?;
    Ok(Json(request))
}

pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<UpdateServiceRequest>,
) -> ApiResult<Json<ServiceRequest>> {
    user.require(Permission::ServiceRequestsEdit)?;
    let changes = body.changes()?;

    let mut tx = state.pool.begin().await?;
    let current = load_for_update(&mut tx, id).await?;
    if current.status.is_terminal() {
        return Err(ApiError::NotAllowed(format!(
            "{} is {} and can no longer be edited",
            reference(&current),
            current.status
        )));
    }

    let request = service_requests::update_fields(&mut tx, id, &changes).await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "service_request.updated",
        "service_request",
        Some(id),
        json!({ "priority": request.priority, "scheduled_for": request.scheduled_for }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("service_request_updated", &request);
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(Json(request))
}

pub async fn change_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<StatusRequest>,
) -> ApiResult<Json<ServiceRequest>> {
    user.require(Permission::ServiceRequestsEdit)?;

    let mut tx = state.pool.begin().await?;
    let current = load_for_update(&mut tx, id).await?;

    let has_schedule = body.scheduled_for.or(current.scheduled_for).is_some();
    let stamp_completed = plan_service_request_transition(current.status, body.status, has_schedule)?;

    let request =
        service_requests::set_status(&mut tx, id, body.status, body.scheduled_for, stamp_completed)
            .await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "service_request.status_changed",
        "service_request",
        Some(id),
        json!({ "from": current.status, "to": request.status }),
    )
    .await?;

    let mut outbox = Outbox::new();
    let headline = format!("{} is now {}", reference(&request), request.status);
    announce(&mut tx, &mut outbox, &user, &request, headline).await?;
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(Json(request))
}

pub async fn assign(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<AssignRequest>,
) -> ApiResult<Json<ServiceRequest>> {
    user.require(Permission::ServiceRequestsAssign)?;

    let mut tx = state.pool.begin().await?;
    let current = load_for_update(&mut tx, id).await?;
    if current.status.is_terminal() {
        return Err(ApiError::NotAllowed(format!(
            "{} is {} and cannot be reassigned",
            reference(&current),
            current.status
        )));
    }
    ensure_technician(&mut tx, body.technician_id).await?;

    let request = service_requests::set_technician(&mut tx, id, body.technician_id).await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "service_request.assigned",
        "service_request",
        Some(id),
        json!({ "from": current.technician_id, "to": request.technician_id }),
    )
    .await?;

    let mut outbox = Outbox::new();
    let headline = match request.technician_id {
        Some(_) => format!("{} has a technician assigned", reference(&request)),
        None => format!("{} no longer has a technician", reference(&request)),
    };
    announce(&mut tx, &mut outbox, &user, &request, headline).await?;
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(Json(request))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require(Permission::ServiceRequestsDelete)?;

    let mut tx = state.pool.begin().await?;
    if !service_requests::delete(&mut tx, id).await? {
        return Err(ApiError::NotFound("service request"));
    }
    audit::log_action(
        &mut tx,
        Some(user.id),
        "service_request.deleted",
        "service_request",
        Some(id),
        json!({}),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("service_request_deleted", json!({ "id": id }));
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_updates_are_rejected() {
        let body = UpdateServiceRequest::default();
        assert!(matches!(body.changes(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn blank_optional_fields_clear_the_column() {
        let body = UpdateServiceRequest {
            notes: Some("   ".to_string()),
            customer_phone: Some(String::new()),
            ..UpdateServiceRequest::default()
        };
        let changes = body.changes().unwrap();
        assert_eq!(changes.notes.as_deref(), Some(""));
        assert_eq!(changes.customer_phone.as_deref(), Some(""));
        assert!(changes.address.is_none());
    }

    #[test]
    fn blank_required_fields_are_rejected() {
        let body = UpdateServiceRequest {
            address: Some(String::new()),
            ..UpdateServiceRequest::default()
        };
        assert!(body.changes().is_err());

        let body = UpdateServiceRequest {
            priority: Some(Priority::Urgent),
            ..UpdateServiceRequest::default()
        };
        assert_eq!(body.changes().unwrap().priority, Some(Priority::Urgent));
    }
}
