use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::{
    audit,
    auth::CurrentUser,
    db::{attachments, complaints},
    error::{ApiError, ApiResult},
    permissions::Permission,
};

/// Types a browser may render in place. Everything else downloads as opaque bytes.
const INLINE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "application/pdf",
];

struct Upload {
    original_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// Keeps the last path segment of a client file name and drops control characters.
pub(crate) fn clean_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .take(200)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// On-disk name: the attachment id plus a short alphanumeric extension when there is one.
pub(crate) fn stored_name(id: Uuid, original_name: &str) -> String {
    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

pub async fn upload(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::UploadsCreate)?;

    let mut upload: Option<Upload> = None;
    let mut complaint_id: Option<Uuid> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let original_name = clean_file_name(field.file_name().unwrap_or("upload"));
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?.to_vec();
                upload = Some(Upload {
                    original_name,
                    content_type,
                    bytes,
                });
            }
            Some("complaint_id") => {
                let text = field.text().await?;
                let id = text
                    .trim()
                    .parse::<Uuid>()
                    .map_err(|_| ApiError::validation("complaint_id must be a UUID"))?;
                complaint_id = Some(id);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::validation("a file field is required"))?;
    if upload.bytes.is_empty() {
        return Err(ApiError::validation("uploaded file is empty"));
    }

    let id = Uuid::new_v4();
    let stored = stored_name(id, &upload.original_name);
    let path = state.config.upload_dir.join(&stored);

    let mut tx = state.pool.begin().await?;
    if let Some(complaint) = complaint_id {
        if complaints::find(&mut *tx, complaint).await?.is_none() {
            return Err(ApiError::validation("complaint does not exist"));
        }
    }

    tokio::fs::create_dir_all(&state.config.upload_dir).await?;
    tokio::fs::write(&path, &upload.bytes).await?;

    let size_bytes = i64::try_from(upload.bytes.len())
        .map_err(|_| ApiError::PayloadTooLarge)?;
    let recorded = async {
        let attachment = attachments::insert(
            &mut tx,
            attachments::NewAttachment {
                id,
                complaint_id,
                original_name: &upload.original_name,
                stored_name: &stored,
                content_type: &upload.content_type,
                size_bytes,
                uploaded_by: user.id,
            },
        )
        .await?;
        audit::log_action(
            &mut tx,
            Some(user.id),
            "attachment.uploaded",
            "attachment",
            Some(id),
            json!({
                "complaint_id": complaint_id,
                "name": attachment.original_name,
                "size_bytes": attachment.size_bytes,
            }),
        )
        .await?;
        tx.commit().await?;
        Ok::<_, sqlx::Error>(attachment)
    }
    .await;

    match recorded {
        Ok(attachment) => Ok((StatusCode::CREATED, Json(attachment))),
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), "failed to clean up upload: {remove_err}");
            }
            Err(e.into())
        }
    }
}

pub async fn download(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    user.require(Permission::ComplaintsView)?;

    let attachment = attachments::find(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("attachment"))?;

    let path = state.config.upload_dir.join(&attachment.stored_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "attachment file is missing");
            return Err(ApiError::NotFound("attachment file"));
        }
        Err(e) => return Err(e.into()),
    };

    let headers = delivery_headers(&attachment.content_type, &attachment.original_name);
    Ok((headers, Body::from(bytes)).into_response())
}

/// Response headers for a stored file. Only allowlisted types are served inline.
fn delivery_headers(content_type: &str, original_name: &str) -> [(HeaderName, String); 3] {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let inline = INLINE_TYPES.contains(&essence.as_str());

    let header_name: String = original_name
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"') || c == ' ' { c } else { '_' })
        .collect();
    let (served_type, disposition) = if inline {
        (essence, format!("inline; filename=\"{header_name}\""))
    } else {
        (
            "application/octet-stream".to_string(),
            format!("attachment; filename=\"{header_name}\""),
        )
    };

    [
        (header::CONTENT_TYPE, served_type),
        (header::CONTENT_DISPOSITION, disposition),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_lose_their_directories() {
        assert_eq!(clean_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(clean_file_name("../../etc/passwd"), "passwd");
        assert_eq!(clean_file_name("  "), "upload");
        assert_eq!(clean_file_name("bad\"name\n.png"), "badname.png");
    }

    #[test]
    fn stored_names_keep_safe_extensions_only() {
        let id = Uuid::new_v4();
        assert_eq!(stored_name(id, "meter.JPG"), format!("{id}.jpg"));
        assert_eq!(stored_name(id, "notes"), id.to_string());
        assert_eq!(stored_name(id, "archive.tar.g$z"), id.to_string());
    }

    #[test]
    fn html_uploads_are_never_served_inline() {
        let [(_, content_type), (_, disposition), (_, sniff)] =
            delivery_headers("text/html; charset=utf-8", "invoice.html");
        assert_eq!(content_type, "application/octet-stream");
        assert_eq!(disposition, "attachment; filename=\"invoice.html\"");
        assert_eq!(sniff, "nosniff");

        let [(_, content_type), (_, disposition), _] =
            delivery_headers("image/svg+xml", "logo.svg");
        assert_eq!(content_type, "application/octet-stream");
        assert!(disposition.starts_with("attachment;"));
    }

    #[test]
    fn images_and_pdfs_render_inline() {
        let [(_, content_type), (_, disposition), (_, sniff)] =
            delivery_headers("Image/PNG", "meter \"front\".png");
        assert_eq!(content_type, "image/png");
        assert_eq!(disposition, "inline; filename=\"meter _front_.png\"");
        assert_eq!(sniff, "nosniff");

        let [(_, content_type), _, _] = delivery_headers("application/pdf", "report.pdf");
        assert_eq!(content_type, "application/pdf");
    }

    #[tokio::test]
    async fn stored_files_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let path = dir.path().join(stored_name(id, "report.pdf"));
        tokio::fs::write(&path, b"%PDF-1.7").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"%PDF-1.7");
    }
}
