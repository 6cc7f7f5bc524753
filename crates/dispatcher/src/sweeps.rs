use quizhub_db::Db;
use std::time::Duration;
use tracing::{debug, error, info};

/// One expiry pass: pending invitations whose deadline has passed become
/// `expired`. The transition is monotonic, the read path never mutates.
pub fn sweep_expired_invitations(db: &Db) {
    match db.expire_stale_invitations() {
        Ok(0) => {}
        Ok(n) => info!("Expired {n} stale invitations"),
        Err(e) => error!("Invitation expiry sweep failed: {:#}", e),
    }
}

/// One reminder pass: members with no submission for a company quiz in the
/// last 24 hours get one reminder notification. An outstanding reminder for
/// the same quiz suppresses a new one.
pub fn sweep_quiz_reminders(db: &Db) {
    let candidates = match db.reminder_candidates() {
        Ok(c) => c,
        Err(e) => {
            error!("Reminder sweep failed: {:#}", e);
            return;
        }
    };

    let mut queued = 0usize;
    for candidate in candidates {
        match db.has_unread_reminder(&candidate.user_id, &candidate.quiz_id) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!("Reminder duplicate check failed: {:#}", e);
                continue;
            }
        }
        let message = format!(
            "Reminder: quiz '{}' is waiting for you [quiz:{}]",
            candidate.quiz_title, candidate.quiz_id
        );
        match db.insert_notification(&candidate.company_id, &candidate.user_id, &message) {
            Ok(_) => queued += 1,
            Err(e) => error!("Failed to queue reminder: {:#}", e),
        }
    }
    if queued > 0 {
        info!("Queued {queued} quiz reminders");
    }
}

/// Run the invitation expiry loop until shutdown.
pub async fn run_expiry(
    db: Db,
    interval_secs: u64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                debug!("Expiry tick");
                sweep_expired_invitations(&db);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Expiry loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Run the quiz reminder loop until shutdown.
pub async fn run_reminders(
    db: Db,
    interval_secs: u64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                debug!("Reminder tick");
                sweep_quiz_reminders(&db);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Reminder loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(db: &Db) {
        db.conn()
            .execute_batch(
                "INSERT INTO users (id, email, password_hash, password_salt)
                 VALUES ('u1', 'a@example.com', 'h', 's'),
                        ('u2', 'b@example.com', 'h', 's');
                 INSERT INTO companies (id, name, owner_id) VALUES ('c1', 'Acme', 'u1');
                 INSERT INTO members (company_id, user_id, role)
                 VALUES ('c1', 'u1', 'owner'), ('c1', 'u2', 'member');
                 INSERT INTO quizzes (id, company_id, title) VALUES ('q1', 'c1', 'Daily');",
            )
            .unwrap();
    }

    #[test]
    fn reminder_sweep_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        seed(&db);

        sweep_quiz_reminders(&db);
        let first: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM notifications", [], |r| r.get(0))
            .unwrap();
        // one reminder per member with no recent submission
        assert_eq!(first, 2);

        // A second pass while the reminders are still pending adds nothing
        sweep_quiz_reminders(&db);
        let count = || -> i64 {
            db.conn()
                .query_row("SELECT COUNT(*) FROM notifications", [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(count(), first);

        // Delivered but still unread reminders keep suppressing duplicates
        db.conn()
            .execute("UPDATE notifications SET status = 'sent'", [])
            .unwrap();
        sweep_quiz_reminders(&db);
        assert_eq!(count(), first);

        // Once the reminders are read, the next sweep may nag again
        db.conn()
            .execute("UPDATE notifications SET status = 'read'", [])
            .unwrap();
        sweep_quiz_reminders(&db);
        assert_eq!(count(), first * 2);
    }

    #[test]
    fn reminder_skips_recent_submitters() {
        let db = Db::open_in_memory().unwrap();
        seed(&db);
        db.conn()
            .execute(
                "INSERT INTO answered_questions
                 (id, user_id, company_id, quiz_id, question_id, answer_id, answer_text, is_correct)
                 VALUES ('a1', 'u2', 'c1', 'q1', 'qq', 'aa', 'Paris', 1)",
                [],
            )
            .unwrap();

        sweep_quiz_reminders(&db);
        let receivers: Vec<String> = {
            let conn = db.conn();
            let mut stmt = conn
                .prepare("SELECT receiver_id FROM notifications ORDER BY receiver_id")
                .unwrap();
            stmt.query_map([], |r| r.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        assert_eq!(receivers, vec!["u1".to_string()]);
    }

    #[test]
    fn expiry_sweep_only_touches_stale_pending() {
        let db = Db::open_in_memory().unwrap();
        seed(&db);
        db.conn()
            .execute_batch(
                "INSERT INTO invitations (id, company_id, kind, sender_id, receiver_id, title, status, expires_at)
                 VALUES ('i1', 'c1', 'invite', 'u1', 'u2', 'stale', 'pending', '2000-01-01 00:00:00'),
                        ('i2', 'c1', 'invite', 'u1', 'u2', 'fresh', 'pending', '2100-01-01 00:00:00'),
                        ('i3', 'c1', 'invite', 'u1', 'u2', 'done', 'accepted', '2000-01-01 00:00:00');",
            )
            .unwrap();

        sweep_expired_invitations(&db);

        let status = |id: &str| -> String {
            db.conn()
                .query_row(
                    "SELECT status FROM invitations WHERE id = ?1",
                    [id],
                    |r| r.get(0),
                )
                .unwrap()
        };
        assert_eq!(status("i1"), "expired");
        assert_eq!(status("i2"), "pending");
        assert_eq!(status("i3"), "accepted");
    }
}
