use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgArguments, PgRow},
    query::Query,
    PgConnection, PgExecutor, PgPool, Postgres, Row,
};
use uuid::Uuid;

use super::{page_bounds, parse_column};
use crate::models::{CountBucket, Page, Priority, RequestType, ServiceRequest, ServiceRequestStatus};

const COLUMNS: &str = "id, number, customer_name, customer_phone, address, description, \
                       request_type, priority, status, scheduled_for, technician_id, \
                       complaint_id, created_by, completed_at, notes, created_at, updated_at";

fn from_row(row: &PgRow) -> Result<ServiceRequest, sqlx::Error> {
    Ok(ServiceRequest {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        customer_name: row.try_get("customer_name")?,
        customer_phone: row.try_get("customer_phone")?,
        address: row.try_get("address")?,
        description: row.try_get("description")?,
        request_type: parse_column(row, "request_type")?,
        priority: parse_column(row, "priority")?,
        status: parse_column(row, "status")?,
        scheduled_for: row.try_get("scheduled_for")?,
        technician_id: row.try_get("technician_id")?,
        complaint_id: row.try_get("complaint_id")?,
        created_by: row.try_get("created_by")?,
        completed_at: row.try_get("completed_at")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Default)]
pub struct ServiceRequestFilter {
    pub status: Option<ServiceRequestStatus>,
    pub technician_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub struct NewServiceRequest<'a> {
    pub customer_name: &'a str,
    pub customer_phone: Option<&'a str>,
    pub address: &'a str,
    pub description: &'a str,
    pub request_type: RequestType,
    pub priority: Priority,
    pub status: ServiceRequestStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub technician_id: Option<Uuid>,
    pub complaint_id: Option<Uuid>,
    pub notes: Option<&'a str>,
    pub created_by: Uuid,
}

#[derive(Debug, Default)]
pub struct ServiceRequestChanges {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub request_type: Option<RequestType>,
    pub priority: Option<Priority>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Shared by the page query and its count; binds `$1` to `$4`.
const LIST_FILTER: &str = r#"
        WHERE ($1::TEXT IS NULL OR status = $1)
          AND ($2::UUID IS NULL OR technician_id = $2)
          AND ($3::TIMESTAMPTZ IS NULL OR scheduled_for >= $3)
          AND ($4::TIMESTAMPTZ IS NULL OR scheduled_for < $4)
"#;

fn bind_filter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    filter: &'q ServiceRequestFilter,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(filter.status.map(|v| v.as_str()))
        .bind(filter.technician_id)
        .bind(filter.from)
        .bind(filter.to)
}

pub async fn list(
    pool: &PgPool,
    filter: &ServiceRequestFilter,
) -> Result<Page<ServiceRequest>, sqlx::Error> {
    let (page, per_page, offset) = page_bounds(filter.page, filter.per_page);

    let count_sql = format!("SELECT COUNT(*) AS total FROM service_requests {LIST_FILTER}");
    let total: i64 = bind_filter(sqlx::query(&count_sql), filter)
        .fetch_one(pool)
        .await?
        .try_get("total")?;

    let page_sql = format!(
        "SELECT {COLUMNS} FROM service_requests {LIST_FILTER} \
         ORDER BY scheduled_for NULLS LAST, created_at DESC LIMIT $5 OFFSET $6"
    );
    let rows = bind_filter(sqlx::query(&page_sql), filter)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    let items = rows.iter().map(from_row).collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        page,
        per_page,
    })
}

pub async fn find<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<ServiceRequest>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM service_requests WHERE id = $1");
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn find_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<ServiceRequest>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM service_requests WHERE id = $1 FOR UPDATE");
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn insert(
    conn: &mut PgConnection,
    new: NewServiceRequest<'_>,
) -> Result<ServiceRequest, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO service_requests
        (id, customer_name, customer_phone, address, description, request_type, priority,
         status, scheduled_for, technician_id, complaint_id, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(new.customer_name)
        .bind(new.customer_phone)
        .bind(new.address)
        .bind(new.description)
        .bind(new.request_type.as_str())
        .bind(new.priority.as_str())
        .bind(new.status.as_str())
        .bind(new.scheduled_for)
        .bind(new.technician_id)
        .bind(new.complaint_id)
        .bind(new.notes)
        .bind(new.created_by)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn update_fields(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &ServiceRequestChanges,
) -> Result<ServiceRequest, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE service_requests SET
            customer_name = COALESCE($2, customer_name),
            customer_phone = CASE WHEN $3::TEXT IS NULL THEN customer_phone ELSE NULLIF($3, '') END,
            address = COALESCE($4, address),
            description = COALESCE($5, description),
            request_type = COALESCE($6, request_type),
            priority = COALESCE($7, priority),
            scheduled_for = COALESCE($8, scheduled_for),
            notes = CASE WHEN $9::TEXT IS NULL THEN notes ELSE NULLIF($9, '') END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(&changes.customer_name)
        .bind(&changes.customer_phone)
        .bind(&changes.address)
        .bind(&changes.description)
        .bind(changes.request_type.map(|v| v.as_str()))
        .bind(changes.priority.map(|v| v.as_str()))
        .bind(changes.scheduled_for)
        .bind(&changes.notes)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: ServiceRequestStatus,
    scheduled_for: Option<DateTime<Utc>>,
    stamp_completed: bool,
) -> Result<ServiceRequest, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE service_requests SET
            status = $2,
            scheduled_for = COALESCE($3, scheduled_for),
            completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(scheduled_for)
        .bind(stamp_completed)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn set_technician(
    conn: &mut PgConnection,
    id: Uuid,
    technician_id: Option<Uuid>,
) -> Result<ServiceRequest, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE service_requests SET technician_id = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(technician_id)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM service_requests WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_by_status(pool: &PgPool) -> Result<Vec<CountBucket>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT status AS key, COUNT(*) AS count FROM service_requests \
         GROUP BY status ORDER BY count DESC, key",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(CountBucket {
                key: row.try_get("key")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}
