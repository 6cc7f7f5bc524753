use axum::{
    extract::{Path, Query, State},
    Json,
};

use quizhub_api::{
    service, ListNotificationsResponse, NotificationResponse, NotificationStatus, OkResponse,
    PageQuery,
};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;

const NOTIFICATION_COLUMNS: &str = "id, company_id, message, status, created_at";

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationResponse> {
    let status: String = row.get(3)?;
    Ok(NotificationResponse {
        id: row.get(0)?,
        company_id: row.get(1)?,
        message: row.get(2)?,
        status: NotificationStatus::parse(&status).unwrap_or(NotificationStatus::Pending),
        created_at: row.get(4)?,
    })
}

/// GET /api/v1/notifications — the caller's notifications, newest first.
pub async fn list_notifications(
    State(db): State<Db>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ListNotificationsResponse>, ApiErr> {
    let (limit, offset) = service::page_bounds(page.page, page.per_page);

    let conn = db.conn();
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM notifications WHERE receiver_id = ?1",
            [&user.user_id],
            |r| r.get(0),
        )
        .map_err(ApiErr::from_db("count notifications"))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE receiver_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
        ))
        .map_err(ApiErr::from_db("list notifications"))?;
    let notifications = stmt
        .query_map(
            rusqlite::params![user.user_id, limit, offset],
            notification_from_row,
        )
        .map_err(ApiErr::from_db("list notifications"))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(ListNotificationsResponse {
        notifications,
        total,
    }))
}

fn load_own(
    conn: &rusqlite::Connection,
    id: &str,
    user_id: &str,
) -> Result<NotificationResponse, ApiErr> {
    conn.query_row(
        &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1 AND receiver_id = ?2"),
        [id, user_id],
        notification_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("notification not found"),
        e => ApiErr::from_db("load notification")(e),
    })
}

/// GET /api/v1/notifications/{id}
pub async fn get_notification(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<NotificationResponse>, ApiErr> {
    let conn = db.conn();
    load_own(&conn, &id, &user.user_id).map(Json)
}

/// POST /api/v1/notifications/{id}/read — receiver only; rereading is a 409.
pub async fn mark_read(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<NotificationResponse>, ApiErr> {
    let conn = db.conn();
    let notification = load_own(&conn, &id, &user.user_id)?;
    if notification.status == NotificationStatus::Read {
        return Err(ApiErr::conflict("notification is already read"));
    }

    conn.execute(
        "UPDATE notifications SET status = 'read' WHERE id = ?1",
        [&id],
    )
    .map_err(ApiErr::from_db("mark read"))?;

    load_own(&conn, &id, &user.user_id).map(Json)
}

/// POST /api/v1/notifications/read-all
pub async fn mark_all_read(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<OkResponse>, ApiErr> {
    db.conn()
        .execute(
            "UPDATE notifications SET status = 'read'
             WHERE receiver_id = ?1 AND status != 'read'",
            [&user.user_id],
        )
        .map_err(ApiErr::from_db("mark all read"))?;
    Ok(Json(OkResponse { ok: true }))
}
