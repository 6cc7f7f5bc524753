//! SQLite database shared by the API server and the dispatcher.
//!
//! Both processes open the same file. WAL mode keeps concurrent reads cheap;
//! writes serialize through the connection mutex within each process.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared database handle.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// In-memory database for tests. Runs the same migrations as [`init_db`].
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Initialize the database: open connection, enable WAL, run migrations.
pub fn init_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("quizhub.db");
    let conn = Connection::open(&db_path).context("opening SQLite database")?;

    // WAL so the server and dispatcher can read concurrently
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    run_migrations(&conn)?;

    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let migrations = vec![("0001_init", include_str!("../../../migrations/0001_init.sql"))];

    for (name, sql) in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("Applied migration: {name}");
        }
    }

    Ok(())
}

/// Current UTC time in the datetime format used across the schema.
pub fn now_string() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Dispatcher queries ──────────────────────────────────────────────────

/// A notification waiting for delivery.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub id: String,
    pub receiver_id: String,
    pub receiver_email: String,
    pub message: String,
    pub created_at: String,
}

/// A quiz that has gone a day or more without a submission from a member.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub quiz_id: String,
    pub quiz_title: String,
    pub company_id: String,
    pub user_id: String,
}

impl Db {
    /// Fetch up to `limit` pending notifications, oldest first.
    pub fn pending_notifications(&self, limit: i64) -> Result<Vec<PendingNotification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT n.id, n.receiver_id, u.email, n.message, n.created_at
             FROM notifications n
             JOIN users u ON u.id = n.receiver_id
             WHERE n.status = 'pending'
             ORDER BY n.created_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(PendingNotification {
                    id: row.get(0)?,
                    receiver_id: row.get(1)?,
                    receiver_email: row.get(2)?,
                    message: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Mark a delivered notification as sent.
    pub fn mark_notification_sent(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE notifications SET status = 'sent' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(())
    }

    /// Queue a notification for a user. Returns the new row id.
    pub fn insert_notification(
        &self,
        company_id: &str,
        receiver_id: &str,
        message: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO notifications (id, company_id, receiver_id, message, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![id, company_id, receiver_id, message, now_string()],
        )?;
        Ok(id)
    }

    /// Expire pending invitations whose expiry has passed. Returns the count.
    pub fn expire_stale_invitations(&self) -> Result<usize> {
        let n = self.conn().execute(
            "UPDATE invitations SET status = 'expired'
             WHERE status = 'pending' AND expires_at < ?1",
            params![now_string()],
        )?;
        Ok(n)
    }

    /// Find (quiz, member) pairs where the member has not answered any
    /// question of the quiz within the last 24 hours.
    pub fn reminder_candidates(&self) -> Result<Vec<ReminderCandidate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT q.id, q.title, q.company_id, m.user_id
             FROM quizzes q
             JOIN members m ON m.company_id = q.company_id
             WHERE NOT EXISTS (
                 SELECT 1 FROM answered_questions a
                 WHERE a.quiz_id = q.id
                   AND a.user_id = m.user_id
                   AND a.created_at >= datetime('now', '-1 day')
             )",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ReminderCandidate {
                    quiz_id: row.get(0)?,
                    quiz_title: row.get(1)?,
                    company_id: row.get(2)?,
                    user_id: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// True if the user still has an unread reminder for this quiz, whether
    /// it is waiting for delivery or already delivered. Keeps the hourly
    /// sweep from stacking duplicates while one is outstanding.
    pub fn has_unread_reminder(&self, user_id: &str, quiz_id: &str) -> Result<bool> {
        let marker = format!("%quiz:{quiz_id}%");
        let exists: bool = self.conn().query_row(
            "SELECT COUNT(*) > 0 FROM notifications
             WHERE receiver_id = ?1 AND status != 'read' AND message LIKE ?2",
            params![user_id, marker],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_user(db: &Db, id: &str, email: &str) {
        db.conn()
            .execute(
                "INSERT INTO users (id, email, password_hash, password_salt)
                 VALUES (?1, ?2, 'h', 's')",
                params![id, email],
            )
            .unwrap();
    }

    fn seed_company(db: &Db, id: &str, owner_id: &str) {
        db.conn()
            .execute(
                "INSERT INTO companies (id, name, owner_id) VALUES (?1, 'Acme', ?2)",
                params![id, owner_id],
            )
            .unwrap();
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let _db = init_db(dir.path()).unwrap();
        let db = init_db(dir.path()).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn notification_queue_lifecycle() {
        let db = Db::open_in_memory().unwrap();
        seed_user(&db, "u1", "u1@example.com");
        seed_company(&db, "c1", "u1");

        let id = db.insert_notification("c1", "u1", "hello").unwrap();
        let pending = db.pending_notifications(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].receiver_email, "u1@example.com");

        db.mark_notification_sent(&id).unwrap();
        assert!(db.pending_notifications(10).unwrap().is_empty());
    }

    #[test]
    fn stale_invitations_expire() {
        let db = Db::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@example.com");
        seed_user(&db, "u2", "b@example.com");
        seed_company(&db, "c1", "u1");
        db.conn()
            .execute(
                "INSERT INTO invitations
                 (id, company_id, sender_id, receiver_id, kind, status, title, expires_at)
                 VALUES ('i1', 'c1', 'u1', 'u2', 'invite', 'pending', 'join us',
                         '2000-01-01 00:00:00')",
                [],
            )
            .unwrap();

        assert_eq!(db.expire_stale_invitations().unwrap(), 1);
        let status: String = db
            .conn()
            .query_row("SELECT status FROM invitations WHERE id = 'i1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(status, "expired");
        // already expired rows are left alone
        assert_eq!(db.expire_stale_invitations().unwrap(), 0);
    }

    #[test]
    fn reminder_candidates_skip_recent_answers() {
        let db = Db::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@example.com");
        seed_user(&db, "u2", "b@example.com");
        seed_company(&db, "c1", "u1");
        for uid in ["u1", "u2"] {
            db.conn()
                .execute(
                    "INSERT INTO members (company_id, user_id, role) VALUES ('c1', ?1, 'member')",
                    params![uid],
                )
                .unwrap();
        }
        db.conn()
            .execute(
                "INSERT INTO quizzes (id, company_id, title) VALUES ('q1', 'c1', 'Daily')",
                [],
            )
            .unwrap();
        // u1 answered within the last day, u2 did not
        db.conn()
            .execute(
                "INSERT INTO answered_questions
                 (id, user_id, company_id, quiz_id, question_id, answer_id, answer_text, is_correct)
                 VALUES ('a1', 'u1', 'c1', 'q1', 'qq', 'aa', 'Paris', 1)",
                [],
            )
            .unwrap();

        let candidates = db.reminder_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].user_id, "u2");
        assert_eq!(candidates[0].quiz_id, "q1");
    }

    #[test]
    fn unread_reminder_guard() {
        let db = Db::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@example.com");
        seed_company(&db, "c1", "u1");
        assert!(!db.has_unread_reminder("u1", "q1").unwrap());
        let id = db
            .insert_notification("c1", "u1", "Reminder: quiz 'Daily' awaits you [quiz:q1]")
            .unwrap();
        assert!(db.has_unread_reminder("u1", "q1").unwrap());
        assert!(!db.has_unread_reminder("u1", "q2").unwrap());

        // delivery alone does not clear the guard
        db.mark_notification_sent(&id).unwrap();
        assert!(db.has_unread_reminder("u1", "q1").unwrap());

        // reading does
        db.conn()
            .execute("UPDATE notifications SET status = 'read' WHERE id = ?1", [&id])
            .unwrap();
        assert!(!db.has_unread_reminder("u1", "q1").unwrap());
    }
}
