use axum::{
    extract::{Path, State},
    Json,
};

use quizhub_api::{ListMembersResponse, MemberResponse, OkResponse, Role};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::companies::load_company;

/// The caller's role in a company, if they are a member at all.
pub(crate) fn member_role(
    conn: &rusqlite::Connection,
    company_id: &str,
    user_id: &str,
) -> Option<Role> {
    conn.query_row(
        "SELECT role FROM members WHERE company_id = ?1 AND user_id = ?2",
        [company_id, user_id],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|r| Role::parse(&r))
}

/// Membership check that maps non-members to 403.
pub(crate) fn require_member(
    conn: &rusqlite::Connection,
    company_id: &str,
    user_id: &str,
) -> Result<Role, ApiErr> {
    member_role(conn, company_id, user_id)
        .ok_or_else(|| ApiErr::forbidden("you are not a member of this company"))
}

/// Management check: owner or admin.
pub(crate) fn require_manager(
    conn: &rusqlite::Connection,
    company_id: &str,
    user_id: &str,
) -> Result<Role, ApiErr> {
    let role = require_member(conn, company_id, user_id)?;
    if !role.can_manage() {
        return Err(ApiErr::forbidden("owner or admin role required"));
    }
    Ok(role)
}

fn list_by_roles(
    conn: &rusqlite::Connection,
    company_id: &str,
    roles_filter: &str,
) -> Result<ListMembersResponse, ApiErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT m.user_id, u.email, m.role, m.joined_at
             FROM members m JOIN users u ON u.id = m.user_id
             WHERE m.company_id = ?1 {roles_filter}
             ORDER BY m.joined_at ASC"
        ))
        .map_err(ApiErr::from_db("list members"))?;
    let members: Vec<MemberResponse> = stmt
        .query_map([company_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(ApiErr::from_db("list members"))?
        .filter_map(|r| r.ok())
        .filter_map(|(user_id, email, role, joined_at)| {
            Role::parse(&role).map(|role| MemberResponse {
                user_id,
                email,
                role,
                joined_at,
            })
        })
        .collect();

    let total = members.len() as i64;
    Ok(ListMembersResponse { members, total })
}

/// GET /api/v1/companies/{id}/members — members only.
pub async fn list_members(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListMembersResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &id)?;
    require_member(&conn, &id, &user.user_id)?;
    list_by_roles(&conn, &id, "").map(Json)
}

/// GET /api/v1/companies/{id}/admins — owner only.
pub async fn list_admins(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListMembersResponse>, ApiErr> {
    let conn = db.conn();
    let company = load_company(&conn, &id)?;
    if company.owner_id != user.user_id {
        return Err(ApiErr::forbidden("only the owner can list admins"));
    }
    list_by_roles(&conn, &id, "AND m.role = 'admin'").map(Json)
}

/// POST /api/v1/companies/{id}/leave — owner cannot leave their own company.
pub async fn leave_company(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &id)?;
    let role = require_member(&conn, &id, &user.user_id)?;
    if role == Role::Owner {
        return Err(ApiErr::conflict(
            "the owner cannot leave; delete the company instead",
        ));
    }

    conn.execute(
        "DELETE FROM members WHERE company_id = ?1 AND user_id = ?2",
        [&id, &user.user_id],
    )
    .map_err(ApiErr::from_db("leave company"))?;

    Ok(Json(OkResponse { ok: true }))
}

/// DELETE /api/v1/companies/{id}/members/{user_id} — owner or admin; cannot
/// remove the owner or yourself.
pub async fn remove_member(
    State(db): State<Db>,
    user: AuthUser,
    Path((id, target_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &id)?;
    require_manager(&conn, &id, &user.user_id)?;

    if target_id == user.user_id {
        return Err(ApiErr::conflict("use leave to remove yourself"));
    }
    let target_role = member_role(&conn, &id, &target_id)
        .ok_or_else(|| ApiErr::not_found("member not found"))?;
    if target_role == Role::Owner {
        return Err(ApiErr::forbidden("the owner cannot be removed"));
    }

    conn.execute(
        "DELETE FROM members WHERE company_id = ?1 AND user_id = ?2",
        [&id, &target_id],
    )
    .map_err(ApiErr::from_db("remove member"))?;

    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/v1/companies/{id}/admins/{user_id} — owner promotes a member.
pub async fn promote_admin(
    State(db): State<Db>,
    user: AuthUser,
    Path((id, target_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let company = load_company(&conn, &id)?;
    if company.owner_id != user.user_id {
        return Err(ApiErr::forbidden("only the owner can manage admins"));
    }

    match member_role(&conn, &id, &target_id) {
        Some(Role::Member) => {}
        Some(Role::Admin) => return Err(ApiErr::conflict("already an admin")),
        Some(Role::Owner) => return Err(ApiErr::conflict("the owner cannot be promoted")),
        None => return Err(ApiErr::not_found("member not found")),
    }

    conn.execute(
        "UPDATE members SET role = 'admin' WHERE company_id = ?1 AND user_id = ?2",
        [&id, &target_id],
    )
    .map_err(ApiErr::from_db("promote admin"))?;

    Ok(Json(OkResponse { ok: true }))
}

/// DELETE /api/v1/companies/{id}/admins/{user_id} — owner demotes an admin.
pub async fn demote_admin(
    State(db): State<Db>,
    user: AuthUser,
    Path((id, target_id)): Path<(String, String)>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let company = load_company(&conn, &id)?;
    if company.owner_id != user.user_id {
        return Err(ApiErr::forbidden("only the owner can manage admins"));
    }

    match member_role(&conn, &id, &target_id) {
        Some(Role::Admin) => {}
        Some(_) => return Err(ApiErr::conflict("not an admin")),
        None => return Err(ApiErr::not_found("member not found")),
    }

    conn.execute(
        "UPDATE members SET role = 'member' WHERE company_id = ?1 AND user_id = ?2",
        [&id, &target_id],
    )
    .map_err(ApiErr::from_db("demote admin"))?;

    Ok(Json(OkResponse { ok: true }))
}
