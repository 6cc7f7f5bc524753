use axum::{
    extract::{Path, Query, State},
    Json,
};

use quizhub_api::{
    service, ListUsersResponse, OkResponse, PageQuery, UpdateUserRequest, UserResponse,
};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;

const USER_COLUMNS: &str = "id, email, firstname, lastname, city, phone, is_active, created_at";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserResponse> {
    Ok(UserResponse {
        id: row.get(0)?,
        email: row.get(1)?,
        firstname: row.get(2)?,
        lastname: row.get(3)?,
        city: row.get(4)?,
        phone: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// GET /api/v1/users — paginated listing of active users.
pub async fn list_users(
    State(db): State<Db>,
    _user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ListUsersResponse>, ApiErr> {
    let (limit, offset) = service::page_bounds(page.page, page.per_page);

    let conn = db.conn();
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM users WHERE is_active = 1", [], |r| {
            r.get(0)
        })
        .map_err(ApiErr::from_db("count users"))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1
             ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        ))
        .map_err(ApiErr::from_db("list users"))?;
    let users = stmt
        .query_map(rusqlite::params![limit, offset], user_from_row)
        .map_err(ApiErr::from_db("list users"))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(ListUsersResponse {
        users,
        total,
        page: page.page.max(1),
        per_page: limit as u32,
    }))
}

/// GET /api/v1/users/{id}
pub async fn get_user(
    State(db): State<Db>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiErr> {
    db.conn()
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [&id],
            user_from_row,
        )
        .map(Json)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("user not found"),
            e => ApiErr::from_db("get user")(e),
        })
}

/// PUT /api/v1/users/{id} — self only, profile fields only.
pub async fn update_user(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiErr> {
    if id != user.user_id {
        return Err(ApiErr::forbidden("you can only update your own profile"));
    }

    let conn = db.conn();
    conn.execute(
        "UPDATE users SET
             firstname = COALESCE(?1, firstname),
             lastname = COALESCE(?2, lastname),
             city = COALESCE(?3, city),
             phone = COALESCE(?4, phone),
             updated_at = ?5
         WHERE id = ?6",
        rusqlite::params![
            req.firstname,
            req.lastname,
            req.city,
            req.phone,
            quizhub_db::now_string(),
            id
        ],
    )
    .map_err(ApiErr::from_db("update user"))?;

    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [&id],
        user_from_row,
    )
    .map(Json)
    .map_err(ApiErr::from_db("update user reload"))
}

/// DELETE /api/v1/users/{id} — self only. Deactivates instead of deleting so
/// history (memberships, submissions) stays consistent.
pub async fn delete_user(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    if id != user.user_id {
        return Err(ApiErr::forbidden("you can only delete your own account"));
    }

    let conn = db.conn();
    conn.execute(
        "UPDATE users SET is_active = 0, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![quizhub_db::now_string(), id],
    )
    .map_err(ApiErr::from_db("deactivate user"))?;
    conn.execute("DELETE FROM refresh_tokens WHERE user_id = ?1", [&id])
        .map_err(ApiErr::from_db("revoke refresh tokens"))?;

    Ok(Json(OkResponse { ok: true }))
}
