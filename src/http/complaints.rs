use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use super::{
    check_email, check_page, clearable, optional, required, ApiJson, ApiQuery, AppState,
};
use crate::{
    audit::{self, InboxItem, Outbox},
    auth::CurrentUser,
    db::{
        attachments,
        complaints::{self, ComplaintChanges, ComplaintFilter, NewComplaint},
        team, technicians,
    },
    error::{ApiError, ApiResult},
    models::{
        Attachment, Complaint, ComplaintSource, ComplaintStatus, Note, Page, Severity,
        StatusChange,
    },
    notify::recipients,
    permissions::Permission,
    workflow::plan_complaint_transition,
};

#[derive(Debug, Deserialize)]
pub struct ComplaintQuery {
    pub status: Option<ComplaintStatus>,
    pub severity: Option<Severity>,
    pub source: Option<ComplaintSource>,
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateComplaint {
    pub title: String,
    pub description: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
    pub source: Option<ComplaintSource>,
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateComplaint {
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
    pub source: Option<ComplaintSource>,
    pub resolution: Option<String>,
    pub status: Option<ComplaintStatus>,
    pub reason: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ComplaintStatus,
    pub reason: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub body: String,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Serialize)]
pub struct ComplaintDetail {
    #[serde(flatten)]
    pub complaint: Complaint,
    pub notes: Vec<Note>,
    pub history: Vec<StatusChange>,
    pub attachments: Vec<Attachment>,
}

/// A present field must not be blank.
fn non_blank(field: &str, value: Option<&str>) -> ApiResult<Option<String>> {
    value.map(|text| required(field, text)).transpose()
}

impl UpdateComplaint {
    fn changes(&self) -> ApiResult<ComplaintChanges> {
        check_email("customer_email", self.customer_email.as_deref())?;
        Ok(ComplaintChanges {
            title: non_blank("title", self.title.as_deref())?,
            description: non_blank("description", self.description.as_deref())?,
            customer_name: non_blank("customer_name", self.customer_name.as_deref())?,
            customer_phone: clearable("customer_phone", self.customer_phone.as_deref())?,
            customer_email: clearable("customer_email", self.customer_email.as_deref())?,
            category: clearable("category", self.category.as_deref())?,
            severity: self.severity,
            source: self.source,
            // Resolution text travels with the status change when one is requested.
            resolution: if self.status.is_some() {
                None
            } else {
                optional(self.resolution.as_deref())
            },
        })
    }

    fn touches_assignment(&self) -> bool {
        self.assigned_to.is_some() || self.technician_id.is_some()
    }
}

async fn load_for_update(conn: &mut PgConnection, id: Uuid) -> ApiResult<Complaint> {
    complaints::find_for_update(conn, id)
        .await?
        .ok_or(ApiError::NotFound("complaint"))
}

async fn ensure_exists(state: &AppState, id: Uuid) -> ApiResult<Complaint> {
    complaints::find(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("complaint"))
}

async fn check_assignees(
    conn: &mut PgConnection,
    assigned_to: Option<Uuid>,
    technician_id: Option<Uuid>,
) -> ApiResult<()> {
    if let Some(member) = assigned_to {
        if !team::is_active(&mut *conn, member).await? {
            return Err(ApiError::validation("assignee must be an active team member"));
        }
    }
    if let Some(technician) = technician_id {
        if !technicians::exists(&mut *conn, technician).await? {
            return Err(ApiError::validation("technician does not exist"));
        }
    }
    Ok(())
}

/// Moves a locked complaint through the workflow and records the history row.
async fn apply_status(
    conn: &mut PgConnection,
    outbox: &mut Outbox,
    user: &CurrentUser,
    current: &Complaint,
    to: ComplaintStatus,
    reason: Option<&str>,
    resolution: Option<&str>,
) -> ApiResult<Complaint> {
    let effective_resolution = resolution.or(current.resolution.as_deref());
    let stamps = plan_complaint_transition(current.status, to, effective_resolution)?;

    let updated = complaints::set_status(&mut *conn, current.id, to, resolution, stamps).await?;
    audit::record_status_change(&mut *conn, current.id, Some(current.status), to, user.id, reason)
        .await?;

    outbox
        .notify(
            &mut *conn,
            &status_recipients(&updated, user.id),
            InboxItem {
                kind: "complaint_status",
                title: format!("{} is now {}", updated.reference(), to),
                message: updated.title.clone(),
                entity_type: "complaint",
                entity_id: updated.id,
            },
        )
        .await?;

    Ok(updated)
}

/// The assignee and the creator, never the actor.
fn status_recipients(complaint: &Complaint, actor: Uuid) -> Vec<Uuid> {
    recipients(&[complaint.assigned_to, Some(complaint.created_by)], actor)
}

/// Everyone touched by an assignment change: the new assignee, the member it
/// was taken from and the creator. Empty when nothing changed.
fn assignment_recipients(before: &Complaint, after: &Complaint, actor: Uuid) -> Vec<Uuid> {
    if before.assigned_to == after.assigned_to && before.technician_id == after.technician_id {
        return Vec::new();
    }
    recipients(
        &[after.assigned_to, before.assigned_to, Some(after.created_by)],
        actor,
    )
}

/// Sets assignee and technician to the given values and notifies the affected members.
async fn apply_assignment(
    conn: &mut PgConnection,
    outbox: &mut Outbox,
    user: &CurrentUser,
    current: &Complaint,
    assigned_to: Option<Uuid>,
    technician_id: Option<Uuid>,
) -> ApiResult<Complaint> {
    check_assignees(&mut *conn, assigned_to, technician_id).await?;
    let updated = complaints::set_assignment(&mut *conn, current.id, assigned_to, technician_id)
        .await?;

    let notify = assignment_recipients(current, &updated, user.id);
    if !notify.is_empty() {
        let title = if updated.assigned_to.is_some() {
            format!("{} was reassigned", updated.reference())
        } else {
            format!("{} is no longer assigned", updated.reference())
        };
        outbox
            .notify(
                &mut *conn,
                &notify,
                InboxItem {
                    kind: "complaint_assigned",
                    title,
                    message: updated.title.clone(),
                    entity_type: "complaint",
                    entity_id: updated.id,
                },
            )
            .await?;
    }

    Ok(updated)
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<ComplaintQuery>,
) -> ApiResult<Json<Page<Complaint>>> {
    user.require(Permission::ComplaintsView)?;
    check_page(query.page)?;

    let filter = ComplaintFilter {
        status: query.status,
        severity: query.severity,
        source: query.source,
        assigned_to: query.assigned_to,
        technician_id: query.technician_id,
        search: optional(query.search.as_deref()),
        page: query.page,
        per_page: query.per_page,
    };
    Ok(Json(complaints::list(&state.pool, &filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateComplaint>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::ComplaintsCreate)?;
    if body.assigned_to.is_some() || body.technician_id.is_some() {
        user.require(Permission::ComplaintsAssign)?;
    }

    let title = required("title", &body.title)?;
    let description = required("description", &body.description)?;
    let customer_name = required("customer_name", &body.customer_name)?;
    check_email("customer_email", body.customer_email.as_deref())?;
    let customer_phone = optional(body.customer_phone.as_deref());
    let customer_email = optional(body.customer_email.as_deref());
    let category = optional(body.category.as_deref());

    let mut tx = state.pool.begin().await?;
    check_assignees(&mut tx, body.assigned_to, body.technician_id).await?;

    let complaint = complaints::insert(
        &mut tx,
        NewComplaint {
            title: &title,
            description: &description,
            customer_name: &customer_name,
            customer_phone: customer_phone.as_deref(),
            customer_email: customer_email.as_deref(),
            category: category.as_deref(),
            severity: body.severity.unwrap_or(Severity::Medium),
            source: body.source.unwrap_or(ComplaintSource::Web),
            assigned_to: body.assigned_to,
            technician_id: body.technician_id,
            created_by: user.id,
        },
    )
    .await?;

    audit::record_status_change(&mut tx, complaint.id, None, ComplaintStatus::New, user.id, None)
        .await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "complaint.created",
        "complaint",
        Some(complaint.id),
        json!({ "reference": complaint.reference(), "severity": complaint.severity }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("complaint_created", &complaint);
    outbox
        .notify(
            &mut tx,
            &recipients(&[complaint.assigned_to], user.id),
            InboxItem {
                kind: "complaint_assigned",
                title: format!("{} was assigned to you", complaint.reference()),
                message: complaint.title.clone(),
                entity_type: "complaint",
                entity_id: complaint.id,
            },
        )
        .await?;

    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok((StatusCode::CREATED, Json(complaint)))
}

pub async fn detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ComplaintDetail>> {
    user.require(Permission::ComplaintsView)?;

    let complaint = ensure_exists(&state, id).await?;
    let notes = complaints::notes(&state.pool, id).await?;
    let history = complaints::history(&state.pool, id).await?;
    let attachments = attachments::for_complaint(&state.pool, id).await?;

    Ok(Json(ComplaintDetail {
        complaint,
        notes,
        history,
        attachments,
    }))
}

pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<UpdateComplaint>,
) -> ApiResult<Json<Complaint>> {
    user.require(Permission::ComplaintsEdit)?;
    if body.status.is_some() {
        user.require(Permission::ComplaintsChangeStatus)?;
    }
    if body.touches_assignment() {
        user.require(Permission::ComplaintsAssign)?;
    }

    let changes = body.changes()?;
    if changes.is_empty() && body.status.is_none() && !body.touches_assignment() {
        return Err(ApiError::validation("no changes supplied"));
    }

    let mut tx = state.pool.begin().await?;
    let mut outbox = Outbox::new();
    let mut complaint = load_for_update(&mut tx, id).await?;
    let before = complaint.clone();

    if !changes.is_empty() {
        complaint = complaints::update_fields(&mut tx, id, &changes).await?;
    }

    if body.touches_assignment() {
        let assigned_to = body.assigned_to.or(complaint.assigned_to);
        let technician_id = body.technician_id.or(complaint.technician_id);
        complaint = apply_assignment(
            &mut tx,
            &mut outbox,
            &user,
            &complaint,
            assigned_to,
            technician_id,
        )
        .await?;
    }

    if let Some(status) = body.status {
        let resolution = optional(body.resolution.as_deref());
        let reason = optional(body.reason.as_deref());
        complaint = apply_status(
            &mut tx,
            &mut outbox,
            &user,
            &complaint,
            status,
            reason.as_deref(),
            resolution.as_deref(),
        )
        .await?;
    }

    audit::log_action(
        &mut tx,
        Some(user.id),
        "complaint.updated",
        "complaint",
        Some(id),
        json!({
            "from_status": before.status,
            "to_status": complaint.status,
            "assigned_to": complaint.assigned_to,
            "technician_id": complaint.technician_id,
        }),
    )
    .await?;
    outbox.broadcast("complaint_updated", &complaint);

    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(Json(complaint))
}

pub async fn change_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<StatusRequest>,
) -> ApiResult<Json<Complaint>> {
    user.require(Permission::ComplaintsChangeStatus)?;
    let reason = optional(body.reason.as_deref());
    let resolution = optional(body.resolution.as_deref());

    let mut tx = state.pool.begin().await?;
    let mut outbox = Outbox::new();
    let current = load_for_update(&mut tx, id).await?;

    let complaint = apply_status(
        &mut tx,
        &mut outbox,
        &user,
        &current,
        body.status,
        reason.as_deref(),
        resolution.as_deref(),
    )
    .await?;

    audit::log_action(
        &mut tx,
        Some(user.id),
        "complaint.status_changed",
        "complaint",
        Some(id),
        json!({ "from": current.status, "to": complaint.status, "reason": reason }),
    )
    .await?;
    outbox.broadcast("complaint_updated", &complaint);

    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(Json(complaint))
}

pub async fn assign(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<AssignRequest>,
) -> ApiResult<Json<Complaint>> {
    user.require(Permission::ComplaintsAssign)?;

    let mut tx = state.pool.begin().await?;
    let mut outbox = Outbox::new();
    let current = load_for_update(&mut tx, id).await?;

    let complaint = apply_assignment(
        &mut tx,
        &mut outbox,
        &user,
        &current,
        body.assigned_to,
        body.technician_id,
    )
    .await?;

    audit::log_action(
        &mut tx,
        Some(user.id),
        "complaint.assigned",
        "complaint",
        Some(id),
        json!({
            "assigned_to": complaint.assigned_to,
            "technician_id": complaint.technician_id,
        }),
    )
    .await?;
    outbox.broadcast("complaint_updated", &complaint);

    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(Json(complaint))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require(Permission::ComplaintsDelete)?;

    let mut tx = state.pool.begin().await?;
    let complaint = load_for_update(&mut tx, id).await?;
    complaints::archive(&mut tx, id).await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "complaint.deleted",
        "complaint",
        Some(id),
        json!({ "reference": complaint.reference(), "title": complaint.title }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("complaint_deleted", json!({ "id": id }));
    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_notes(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Note>>> {
    user.require(Permission::ComplaintsView)?;
    ensure_exists(&state, id).await?;
    Ok(Json(complaints::notes(&state.pool, id).await?))
}

pub async fn add_note(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<NoteRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::NotesCreate)?;
    let text = required("body", &body.body)?;

    let mut tx = state.pool.begin().await?;
    let complaint = complaints::find(&mut *tx, id)
        .await?
        .ok_or(ApiError::NotFound("complaint"))?;

    if let Some(parent) = body.parent_id {
        if !complaints::note_belongs_to(&mut *tx, parent, id).await? {
            return Err(ApiError::validation("parent note belongs to another complaint"));
        }
    }

    let note = complaints::insert_note(&mut tx, id, body.parent_id, user.id, &text, body.is_internal)
        .await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "note.created",
        "complaint",
        Some(id),
        json!({ "note_id": note.id, "internal": note.is_internal }),
    )
    .await?;

    let mut outbox = Outbox::new();
    outbox.broadcast("note_added", json!({ "complaint_id": id, "note": &note }));
    outbox
        .notify(
            &mut tx,
            &recipients(&[complaint.assigned_to, Some(complaint.created_by)], user.id),
            InboxItem {
                kind: "note_added",
                title: format!("New note on {}", complaint.reference()),
                message: format!("{}: {}", note.author_name, complaint.title),
                entity_type: "complaint",
                entity_id: id,
            },
        )
        .await?;

    tx.commit().await?;
    outbox.flush(&state.hub);

    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StatusChange>>> {
    user.require(Permission::ComplaintsView)?;
    ensure_exists(&state, id).await?;
    Ok(Json(complaints::history(&state.pool, id).await?))
}

pub async fn attachments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Attachment>>> {
    user.require(Permission::ComplaintsView)?;
    ensure_exists(&state, id).await?;
    Ok(Json(attachments::for_complaint(&state.pool, id).await?))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn complaint(created_by: Uuid, assigned_to: Option<Uuid>) -> Complaint {
        Complaint {
            id: Uuid::new_v4(),
            number: 42,
            title: "Meter reads zero".to_string(),
            description: "Since the storm".to_string(),
            customer_name: "Hala".to_string(),
            customer_phone: None,
            customer_email: None,
            category: None,
            status: ComplaintStatus::InProgress,
            severity: Severity::Medium,
            source: ComplaintSource::Phone,
            assigned_to,
            technician_id: None,
            created_by,
            resolution: None,
            resolved_at: None,
            closed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_changes_notify_assignee_and_creator_but_not_the_actor() {
        let creator = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let current = complaint(creator, Some(assignee));

        assert_eq!(status_recipients(&current, actor), vec![assignee, creator]);
        assert_eq!(status_recipients(&current, assignee), vec![creator]);
        assert!(status_recipients(&complaint(actor, None), actor).is_empty());
    }

    #[test]
    fn reassignment_notifies_old_and_new_assignee_and_creator() {
        let creator = Uuid::new_v4();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let actor = Uuid::new_v4();

        let before = complaint(creator, Some(old));
        let after = complaint(creator, Some(new));
        assert_eq!(assignment_recipients(&before, &after, actor), vec![new, old, creator]);

        let unassigned = complaint(creator, None);
        assert_eq!(assignment_recipients(&before, &unassigned, actor), vec![old, creator]);
    }

    #[test]
    fn technician_only_changes_still_notify() {
        let creator = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let before = complaint(creator, Some(assignee));
        let mut after = before.clone();
        after.technician_id = Some(Uuid::new_v4());

        assert_eq!(
            assignment_recipients(&before, &after, creator),
            vec![assignee]
        );
        assert!(assignment_recipients(&before, &before.clone(), Uuid::new_v4()).is_empty());
    }

    #[test]
    fn blank_update_fields_are_rejected() {
        let body = UpdateComplaint {
            title: Some("   ".to_string()),
            ..UpdateComplaint::default()
        };
        assert!(matches!(body.changes(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn resolution_is_held_back_for_status_changes() {
        let body = UpdateComplaint {
            resolution: Some("Replaced router".to_string()),
            status: Some(ComplaintStatus::Resolved),
            ..UpdateComplaint::default()
        };
        let changes = body.changes().unwrap();
        assert!(changes.resolution.is_none());
        assert!(changes.is_empty());

        let body = UpdateComplaint {
            resolution: Some("Replaced router".to_string()),
            ..UpdateComplaint::default()
        };
        assert_eq!(body.changes().unwrap().resolution.as_deref(), Some("Replaced router"));
    }

    #[test]
    fn optional_text_is_trimmed_and_blank_clears() {
        let body = UpdateComplaint {
            customer_phone: Some("  555-0101 ".to_string()),
            category: Some("  ".to_string()),
            ..UpdateComplaint::default()
        };
        let changes = body.changes().unwrap();
        assert_eq!(changes.customer_phone.as_deref(), Some("555-0101"));
        assert_eq!(changes.category.as_deref(), Some(""));
        assert!(changes.customer_email.is_none());
        assert!(!changes.is_empty());
    }
}
