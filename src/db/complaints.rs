use sqlx::{
    postgres::{PgArguments, PgRow},
    query::Query,
    PgConnection, PgExecutor, PgPool, Postgres, Row,
};
use uuid::Uuid;

use super::{page_bounds, parse_column, parse_optional_column};
use crate::{
    models::{
        Complaint, ComplaintSource, ComplaintStatus, CountBucket, Note, Page, Severity,
        StatusChange,
    },
    workflow::ComplaintStamps,
};

const COLUMNS: &str = "id, number, title, description, customer_name, customer_phone, \
                       customer_email, category, status, severity, source, assigned_to, \
                       technician_id, created_by, resolution, resolved_at, closed_at, \
                       created_at, updated_at";

fn from_row(row: &PgRow) -> Result<Complaint, sqlx::Error> {
    Ok(Complaint {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        customer_name: row.try_get("customer_name")?,
        customer_phone: row.try_get("customer_phone")?,
        customer_email: row.try_get("customer_email")?,
        category: row.try_get("category")?,
        status: parse_column(row, "status")?,
        severity: parse_column(row, "severity")?,
        source: parse_column(row, "source")?,
        assigned_to: row.try_get("assigned_to")?,
        technician_id: row.try_get("technician_id")?,
        created_by: row.try_get("created_by")?,
        resolution: row.try_get("resolution")?,
        resolved_at: row.try_get("resolved_at")?,
        closed_at: row.try_get("closed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Default)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub severity: Option<Severity>,
    pub source: Option<ComplaintSource>,
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub struct NewComplaint<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub customer_name: &'a str,
    pub customer_phone: Option<&'a str>,
    pub customer_email: Option<&'a str>,
    pub category: Option<&'a str>,
    pub severity: Severity,
    pub source: ComplaintSource,
    pub assigned_to: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub created_by: Uuid,
}

/// Optional text columns use `Some("")` to clear.
#[derive(Debug, Default)]
pub struct ComplaintChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
    pub source: Option<ComplaintSource>,
    pub resolution: Option<String>,
}

impl ComplaintChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.customer_name.is_none()
            && self.customer_phone.is_none()
            && self.customer_email.is_none()
            && self.category.is_none()
            && self.severity.is_none()
            && self.source.is_none()
            && self.resolution.is_none()
    }
}

/// Shared by the page query and its count; binds `$1` to `$6`.
const LIST_FILTER: &str = r#"
        WHERE deleted_at IS NULL
          AND ($1::TEXT IS NULL OR status = $1)
          AND ($2::TEXT IS NULL OR severity = $2)
          AND ($3::TEXT IS NULL OR source = $3)
          AND ($4::UUID IS NULL OR assigned_to = $4)
          AND ($5::UUID IS NULL OR technician_id = $5)
          AND ($6::TEXT IS NULL
               OR title ILIKE '%' || $6 || '%'
               OR customer_name ILIKE '%' || $6 || '%')
"#;

fn count_sql() -> String {
    format!("SELECT COUNT(*) AS total FROM complaints {LIST_FILTER}")
}

fn page_sql() -> String {
    format!(
        "SELECT {COLUMNS} FROM complaints {LIST_FILTER} \
         ORDER BY created_at DESC LIMIT $7 OFFSET $8"
    )
}

fn bind_filter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    filter: &'q ComplaintFilter,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(filter.status.map(|v| v.as_str()))
        .bind(filter.severity.map(|v| v.as_str()))
        .bind(filter.source.map(|v| v.as_str()))
        .bind(filter.assigned_to)
        .bind(filter.technician_id)
        .bind(filter.search.as_deref())
}

pub async fn list(pool: &PgPool, filter: &ComplaintFilter) -> Result<Page<Complaint>, sqlx::Error> {
    let (page, per_page, offset) = page_bounds(filter.page, filter.per_page);

    let count_sql = count_sql();
    let total: i64 = bind_filter(sqlx::query(&count_sql), filter)
        .fetch_one(pool)
        .await?
        .try_get("total")?;

    let page_sql = page_sql();
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
) -> Result<Option<Complaint>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM complaints WHERE id = $1 AND deleted_at IS NULL");
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

/// Locks the complaint row for the rest of the transaction.
pub async fn find_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Complaint>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM complaints WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    );
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn insert(conn: &mut PgConnection, new: NewComplaint<'_>) -> Result<Complaint, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO complaints
        (id, title, description, customer_name, customer_phone, customer_email, category,
         severity, source, assigned_to, technician_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(new.title)
        .bind(new.description)
        .bind(new.customer_name)
        .bind(new.customer_phone)
        .bind(new.customer_email)
        .bind(new.category)
        .bind(new.severity.as_str())
        .bind(new.source.as_str())
        .bind(new.assigned_to)
        .bind(new.technician_id)
        .bind(new.created_by)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn update_fields(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &ComplaintChanges,
) -> Result<Complaint, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE complaints SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            customer_name = COALESCE($4, customer_name),
            customer_phone = CASE WHEN $5::TEXT IS NULL THEN customer_phone ELSE NULLIF($5, '') END,
            customer_email = CASE WHEN $6::TEXT IS NULL THEN customer_email ELSE NULLIF($6, '') END,
            category = CASE WHEN $7::TEXT IS NULL THEN category ELSE NULLIF($7, '') END,
            severity = COALESCE($8, severity),
            source = COALESCE($9, source),
            resolution = COALESCE($10, resolution),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(&changes.customer_name)
        .bind(&changes.customer_phone)
        .bind(&changes.customer_email)
        .bind(&changes.category)
        .bind(changes.severity.map(|v| v.as_str()))
        .bind(changes.source.map(|v| v.as_str()))
        .bind(&changes.resolution)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: ComplaintStatus,
    resolution: Option<&str>,
    stamps: ComplaintStamps,
) -> Result<Complaint, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE complaints SET
            status = $2,
            resolution = COALESCE($3, resolution),
            resolved_at = CASE WHEN $4 THEN NOW() WHEN $5 THEN NULL ELSE resolved_at END,
            closed_at = CASE WHEN $6 THEN NOW() ELSE closed_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(resolution)
        .bind(stamps.set_resolved_at)
        .bind(stamps.clear_resolved_at)
        .bind(stamps.set_closed_at)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn set_assignment(
    conn: &mut PgConnection,
    id: Uuid,
    assigned_to: Option<Uuid>,
    technician_id: Option<Uuid>,
) -> Result<Complaint, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE complaints SET assigned_to = $2, technician_id = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(assigned_to)
        .bind(technician_id)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

/// Hides the complaint from every listing; notes, history and attachments stay.
pub async fn archive(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE complaints SET deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn note_from_row(row: &PgRow) -> Result<Note, sqlx::Error> {
    Ok(Note {
        id: row.try_get("id")?,
        complaint_id: row.try_get("complaint_id")?,
        parent_id: row.try_get("parent_id")?,
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        body: row.try_get("body")?,
        is_internal: row.try_get("is_internal")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn notes(pool: &PgPool, complaint_id: Uuid) -> Result<Vec<Note>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT n.id, n.complaint_id, n.parent_id, n.author_id, m.full_name AS author_name,
               n.body, n.is_internal, n.created_at
        FROM notes n
        JOIN team_members m ON m.id = n.author_id
        WHERE n.complaint_id = $1
        ORDER BY n.created_at
        "#,
    )
    .bind(complaint_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(note_from_row).collect()
}

/// Whether `note_id` is a note on `complaint_id`; replies must stay in their thread.
pub async fn note_belongs_to<'e, E: PgExecutor<'e>>(
    executor: E,
    note_id: Uuid,
    complaint_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM notes WHERE id = $1 AND complaint_id = $2) AS found",
    )
    .bind(note_id)
    .bind(complaint_id)
    .fetch_one(executor)
    .await?;
    row.try_get("found")
}

pub async fn insert_note(
    conn: &mut PgConnection,
    complaint_id: Uuid,
    parent_id: Option<Uuid>,
    author_id: Uuid,
    body: &str,
    is_internal: bool,
) -> Result<Note, sqlx::Error> {
    let row = sqlx::query(
        r#"
        WITH inserted AS (
            INSERT INTO notes (id, complaint_id, parent_id, author_id, body, is_internal)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        )
        SELECT i.id, i.complaint_id, i.parent_id, i.author_id, m.full_name AS author_name,
               i.body, i.is_internal, i.created_at
        FROM inserted i
        JOIN team_members m ON m.id = i.author_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(complaint_id)
    .bind(parent_id)
    .bind(author_id)
    .bind(body)
    .bind(is_internal)
    .fetch_one(&mut *conn)
    .await?;
    note_from_row(&row)
}

pub async fn history(pool: &PgPool, complaint_id: Uuid) -> Result<Vec<StatusChange>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.complaint_id, s.from_status, s.to_status, s.changed_by,
               m.full_name AS changed_by_name, s.reason, s.created_at
        FROM status_changes s
        JOIN team_members m ON m.id = s.changed_by
        WHERE s.complaint_id = $1
        ORDER BY s.created_at, s.id
        "#,
    )
    .bind(complaint_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(StatusChange {
                id: row.try_get("id")?,
                complaint_id: row.try_get("complaint_id")?,
                from_status: parse_optional_column(row, "from_status")?,
                to_status: parse_column(row, "to_status")?,
                changed_by: row.try_get("changed_by")?,
                changed_by_name: row.try_get("changed_by_name")?,
                reason: row.try_get("reason")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub enum Dimension {
    Status,
    Severity,
    Source,
}

impl Dimension {
    fn column(&self) -> &'static str {
        match self {
            Dimension::Status => "status",
            Dimension::Severity => "severity",
            Dimension::Source => "source",
        }
    }
}

pub async fn count_by(pool: &PgPool, dimension: Dimension) -> Result<Vec<CountBucket>, sqlx::Error> {
    let column = dimension.column();
    let sql = format!(
        "SELECT {column} AS key, COUNT(*) AS count FROM complaints WHERE deleted_at IS NULL \
         GROUP BY {column} ORDER BY count DESC, key"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(CountBucket {
                key: row.try_get("key")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

/// Open complaints and how many of them nobody is assigned to.
pub async fn open_counts(pool: &PgPool) -> Result<(i64, i64), sqlx::Error> {
    let finished: Vec<&str> = ComplaintStatus::ALL
        .iter()
        .filter(|status| !status.is_open())
        .map(|status| status.as_str())
        .collect();
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS open,
               COUNT(*) FILTER (WHERE assigned_to IS NULL) AS unassigned
        FROM complaints
        WHERE deleted_at IS NULL AND status <> ALL($1)
        "#,
    )
    .bind(&finished)
    .fetch_one(pool)
    .await?;
    Ok((row.try_get("open")?, row.try_get("unassigned")?))
}

/// Complaints created on or after `since`, newest first, for reports.
pub async fn recent(
    pool: &PgPool,
    since: chrono::NaiveDate,
    limit: i64,
) -> Result<Vec<Complaint>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM complaints WHERE deleted_at IS NULL AND created_at::DATE >= $1 \
         ORDER BY created_at DESC LIMIT $2"
    );
    let rows = sqlx::query(&sql).bind(since).bind(limit).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_counted_without_paging() {
        let count = count_sql();
        let page = page_sql();
        assert!(count.contains(LIST_FILTER));
        assert!(page.contains(LIST_FILTER));
        assert!(!count.contains("LIMIT"));
        assert!(!count.contains("OFFSET"));
        assert!(page.contains("LIMIT $7 OFFSET $8"));
        assert!(LIST_FILTER.contains("deleted_at IS NULL"));
    }
}
