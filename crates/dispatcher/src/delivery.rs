use quizhub_db::{Db, PendingNotification};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::DispatcherConfig;
use crate::webhook::{Delivery, WebhookClient};

/// JSON body sent to the webhook for one batch of notifications.
pub fn webhook_payload(batch: &[PendingNotification]) -> serde_json::Value {
    serde_json::json!({
        "notifications": batch
            .iter()
            .map(|n| serde_json::json!({
                "id": n.id,
                "receiver_id": n.receiver_id,
                "receiver_email": n.receiver_email,
                "message": n.message,
                "created_at": n.created_at,
            }))
            .collect::<Vec<_>>(),
    })
}

/// One delivery pass: drain pending notifications in batches.
///
/// With a webhook configured, a batch is only marked `sent` after the POST
/// succeeds; failed batches stay `pending` for the next tick, so delivery is
/// at-least-once. Without a webhook, notifications are in-app only and are
/// marked `sent` immediately.
pub async fn deliver_pending(db: &Db, config: &DispatcherConfig, webhook: Option<&WebhookClient>) {
    loop {
        let batch = match db.pending_notifications(config.dispatcher.batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to read pending notifications: {:#}", e);
                return;
            }
        };
        if batch.is_empty() {
            return;
        }

        if let Some(hook) = webhook {
            match hook.post_batch(&webhook_payload(&batch)).await {
                Ok(Delivery::Accepted) => {}
                Ok(Delivery::Rejected(status)) => {
                    // Batch stays pending for the next tick
                    error!("Webhook rejected batch (HTTP {status})");
                    return;
                }
                Err(e) => {
                    error!("Webhook delivery failed: {:#}", e);
                    return;
                }
            }
        }

        let mut marked = 0usize;
        for notification in &batch {
            match db.mark_notification_sent(&notification.id) {
                Ok(()) => marked += 1,
                Err(e) => {
                    error!("Failed to mark notification {} sent: {:#}", notification.id, e)
                }
            }
        }
        if marked == 0 {
            // Every mark failed; re-reading would hand back the same batch
            error!("Could not mark any of {} notifications sent", batch.len());
            return;
        }
        info!("Delivered {marked} notifications");

        if (batch.len() as i64) < config.dispatcher.batch_size {
            return;
        }
    }
}

/// Run the delivery loop until shutdown.
pub async fn run_delivery(
    db: Db,
    config: DispatcherConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let webhook = WebhookClient::from_config(&config);
    let mut tick =
        tokio::time::interval(Duration::from_secs(config.dispatcher.delivery_interval_secs));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                debug!("Delivery tick");
                deliver_pending(&db, &config, webhook.as_ref()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Delivery loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_all_fields() {
        let batch = vec![PendingNotification {
            id: "n1".into(),
            receiver_id: "u1".into(),
            receiver_email: "u1@example.com".into(),
            message: "hello".into(),
            created_at: "2024-01-01 00:00:00".into(),
        }];
        let payload = webhook_payload(&batch);
        let list = payload["notifications"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], "n1");
        assert_eq!(list[0]["receiver_email"], "u1@example.com");
    }

    fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO users (id, email, password_hash, password_salt)
                 VALUES ('u1', 'u1@example.com', 'h', 's');
                 INSERT INTO companies (id, name, owner_id) VALUES ('c1', 'Acme', 'u1');",
            )
            .unwrap();
        db
    }

    #[tokio::test]
    async fn delivery_without_webhook_marks_sent() {
        let db = seeded_db();
        db.insert_notification("c1", "u1", "hello").unwrap();

        let config = DispatcherConfig::default();
        deliver_pending(&db, &config, None).await;

        assert!(db.pending_notifications(10).unwrap().is_empty());
        let status: String = db
            .conn()
            .query_row("SELECT status FROM notifications", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "sent");
    }

    #[tokio::test]
    async fn delivery_stops_when_nothing_can_be_marked() {
        let db = seeded_db();
        db.insert_notification("c1", "u1", "hello").unwrap();
        // Make every status update fail; the pass must bail out instead of
        // re-reading the same pending batch forever.
        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_updates BEFORE UPDATE ON notifications
                 BEGIN SELECT RAISE(ABORT, 'updates disabled'); END;",
            )
            .unwrap();

        // batch_size 1 makes a full batch, the case that would loop
        let mut config = DispatcherConfig::default();
        config.dispatcher.batch_size = 1;
        deliver_pending(&db, &config, None).await;

        assert_eq!(db.pending_notifications(10).unwrap().len(), 1);
    }
}
