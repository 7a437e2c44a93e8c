//! History and audit rows written alongside each mutation.
//!
//! Everything here runs on the caller's transaction, so an audit row exists
//! exactly when the change it describes was committed. Push frames are
//! buffered in an [`Outbox`] and only published after commit.

use serde::Serialize;
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::notifications,
    models::{ComplaintStatus, Notification},
    notify::{Audience, NotificationHub},
};

pub async fn log_action(
    conn: &mut PgConnection,
    actor_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    details: Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO logs (id, actor_id, action, entity_type, entity_id, details)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(actor_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .execute(&mut *conn)
    .await?;

    tracing::info!(action, entity_type, entity_id = ?entity_id, actor = ?actor_id, "audit");
    Ok(())
}

pub async fn record_status_change(
    conn: &mut PgConnection,
    complaint_id: Uuid,
    from: Option<ComplaintStatus>,
    to: ComplaintStatus,
    changed_by: Uuid,
    reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO status_changes (id, complaint_id, from_status, to_status, changed_by, reason)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(complaint_id)
    .bind(from.map(|status| status.as_str()))
    .bind(to.as_str())
    .bind(changed_by)
    .bind(reason)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Inbox item to persist for one member.
pub struct InboxItem<'a> {
    pub kind: &'a str,
    pub title: String,
    pub message: String,
    pub entity_type: &'a str,
    pub entity_id: Uuid,
}

#[derive(Default)]
pub struct Outbox {
    pending: Vec<(Audience, String, Value)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast(&mut self, kind: &str, payload: impl Serialize) {
        match serde_json::to_value(payload) {
            Ok(value) => self.pending.push((Audience::Everyone, kind.to_string(), value)),
            Err(e) => tracing::warn!(kind, "dropping unencodable frame: {e}"),
        }
    }

    /// Persists an inbox notification for each recipient and queues its push frame.
    pub async fn notify(
        &mut self,
        conn: &mut PgConnection,
        recipients: &[Uuid],
        item: InboxItem<'_>,
    ) -> Result<(), sqlx::Error> {
        for user_id in recipients {
            let notification: Notification = notifications::insert(
                &mut *conn,
                *user_id,
                item.kind,
                &item.title,
                &item.message,
                Some(item.entity_type),
                Some(item.entity_id),
            )
            .await?;

            match serde_json::to_value(&notification) {
                Ok(value) => self
                    .pending
                    .push((Audience::Member(*user_id), "notification".to_string(), value)),
                Err(e) => tracing::warn!("dropping unencodable notification: {e}"),
            }
        }
        Ok(())
    }

    pub fn flush(self, hub: &NotificationHub) {
        tracing::debug!(frames = self.pending.len(), "flushing outbox");
        for (audience, kind, payload) in self.pending {
            hub.publish(audience, &kind, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn outbox_publishes_only_on_flush() {
        let hub = NotificationHub::new();
        let mut receiver = hub.subscribe();

        let mut outbox = Outbox::new();
        outbox.broadcast("complaint_created", json!({ "number": 12 }));
        outbox.broadcast("complaint_updated", json!({ "number": 12 }));
        assert_eq!(outbox.pending.len(), 2);
        assert!(receiver.try_recv().is_err());

        outbox.flush(&hub);

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.frame.kind, "complaint_created");
        assert_eq!(second.frame.kind, "complaint_updated");
        assert_eq!(first.audience, Audience::Everyone);
    }

    #[test]
    fn dropped_outbox_publishes_nothing() {
        let hub = NotificationHub::new();
        let mut receiver = hub.subscribe();
        {
            let mut outbox = Outbox::new();
            outbox.broadcast("complaint_deleted", json!({}));
        }
        assert!(receiver.try_recv().is_err());
    }
}
