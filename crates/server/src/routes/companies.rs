use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use quizhub_api::{
    service, CompanyResponse, CreateCompanyRequest, ListCompaniesResponse, OkResponse, PageQuery,
    Role, UpdateCompanyRequest, UpdateVisibilityRequest,
};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::members::member_role;

const COMPANY_COLUMNS: &str = "id, name, description, owner_id, is_visible, created_at";

fn company_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompanyResponse> {
    Ok(CompanyResponse {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        is_visible: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn load_company(conn: &rusqlite::Connection, id: &str) -> Result<CompanyResponse, ApiErr> {
    conn.query_row(
        &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?1"),
        [id],
        company_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("company not found"),
        e => ApiErr::from_db("load company")(e),
    })
}

/// POST /api/v1/companies — the creator becomes owner and an owner-role member.
pub async fn create_company(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<CreateCompanyRequest>,
) -> Result<(StatusCode, Json<CompanyResponse>), ApiErr> {
    let name = service::validate_company_name(&req.name)?;
    let id = Uuid::new_v4().to_string();
    let is_visible = req.is_visible.unwrap_or(true);

    let conn = db.conn();
    conn.execute(
        "INSERT INTO companies (id, name, description, owner_id, is_visible)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, name, req.description, user.user_id, is_visible],
    )
    .map_err(ApiErr::from_db("create company"))?;
    conn.execute(
        "INSERT INTO members (company_id, user_id, role) VALUES (?1, ?2, 'owner')",
        rusqlite::params![id, user.user_id],
    )
    .map_err(ApiErr::from_db("create owner membership"))?;

    let company = load_company(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(company)))
}

/// GET /api/v1/companies — visible companies plus the caller's own, paginated.
pub async fn list_companies(
    State(db): State<Db>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ListCompaniesResponse>, ApiErr> {
    let (limit, offset) = service::page_bounds(page.page, page.per_page);

    let conn = db.conn();
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM companies c
             WHERE c.is_visible = 1
                OR EXISTS (SELECT 1 FROM members m
                           WHERE m.company_id = c.id AND m.user_id = ?1)",
            [&user.user_id],
            |r| r.get(0),
        )
        .map_err(ApiErr::from_db("count companies"))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies c
             WHERE c.is_visible = 1
                OR EXISTS (SELECT 1 FROM members m
                           WHERE m.company_id = c.id AND m.user_id = ?1)
             ORDER BY c.created_at DESC LIMIT ?2 OFFSET ?3"
        ))
        .map_err(ApiErr::from_db("list companies"))?;
    let companies = stmt
        .query_map(
            rusqlite::params![user.user_id, limit, offset],
            company_from_row,
        )
        .map_err(ApiErr::from_db("list companies"))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(ListCompaniesResponse {
        companies,
        total,
        page: page.page.max(1),
        per_page: limit as u32,
    }))
}

/// GET /api/v1/companies/{id} — hidden companies only visible to members.
pub async fn get_company(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CompanyResponse>, ApiErr> {
    let conn = db.conn();
    let company = load_company(&conn, &id)?;
    if !company.is_visible && member_role(&conn, &id, &user.user_id).is_none() {
        // Indistinguishable from a missing company
        return Err(ApiErr::not_found("company not found"));
    }
    Ok(Json(company))
}

fn require_owner(conn: &rusqlite::Connection, company_id: &str, user_id: &str) -> Result<(), ApiErr> {
    match member_role(conn, company_id, user_id) {
        Some(Role::Owner) => Ok(()),
        Some(_) => Err(ApiErr::forbidden("only the owner can do this")),
        None => Err(ApiErr::not_found("company not found")),
    }
}

/// PUT /api/v1/companies/{id} — owner only.
pub async fn update_company(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCompanyRequest>,
) -> Result<Json<CompanyResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &id)?;
    require_owner(&conn, &id, &user.user_id)?;

    let name = match &req.name {
        Some(n) => Some(service::validate_company_name(n)?),
        None => None,
    };

    conn.execute(
        "UPDATE companies SET
             name = COALESCE(?1, name),
             description = COALESCE(?2, description),
             updated_at = ?3
         WHERE id = ?4",
        rusqlite::params![name, req.description, quizhub_db::now_string(), id],
    )
    .map_err(ApiErr::from_db("update company"))?;

    load_company(&conn, &id).map(Json)
}

/// PUT /api/v1/companies/{id}/visibility — owner only.
pub async fn update_visibility(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateVisibilityRequest>,
) -> Result<Json<CompanyResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &id)?;
    require_owner(&conn, &id, &user.user_id)?;

    conn.execute(
        "UPDATE companies SET is_visible = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![req.is_visible, quizhub_db::now_string(), id],
    )
    .map_err(ApiErr::from_db("update visibility"))?;

    load_company(&conn, &id).map(Json)
}

/// DELETE /api/v1/companies/{id} — owner only; cascades to members, quizzes,
/// invitations, and notifications.
pub async fn delete_company(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &id)?;
    require_owner(&conn, &id, &user.user_id)?;

    conn.execute("DELETE FROM companies WHERE id = ?1", [&id])
        .map_err(ApiErr::from_db("delete company"))?;

    Ok(Json(OkResponse { ok: true }))
}
