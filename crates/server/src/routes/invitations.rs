use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use quizhub_api::{
    service, AcceptInvitationResponse, InvitationKind, InvitationResponse, InvitationStatus,
    JoinRequestBody, ListInvitationsResponse, OkResponse, Role, SendInvitationRequest,
};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::companies::load_company;
use crate::routes::members::{member_role, require_manager};

const INVITATION_COLUMNS: &str = "i.id, i.company_id, c.name, i.kind, i.sender_id, i.receiver_id, \
     i.title, i.description, i.status, i.created_at, i.expires_at";

fn invitation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InvitationResponse> {
    let kind: String = row.get(3)?;
    let status: String = row.get(8)?;
    Ok(InvitationResponse {
        id: row.get(0)?,
        company_id: row.get(1)?,
        company_name: row.get(2)?,
        kind: InvitationKind::parse(&kind).unwrap_or(InvitationKind::Invite),
        sender_id: row.get(4)?,
        receiver_id: row.get(5)?,
        title: row.get(6)?,
        description: row.get(7)?,
        status: InvitationStatus::parse(&status).unwrap_or(InvitationStatus::Pending),
        created_at: row.get(9)?,
        expires_at: row.get(10)?,
    })
}

fn load_invitation(
    conn: &rusqlite::Connection,
    id: &str,
    kind: InvitationKind,
) -> Result<InvitationResponse, ApiErr> {
    conn.query_row(
        &format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations i
             JOIN companies c ON c.id = i.company_id
             WHERE i.id = ?1 AND i.kind = ?2"
        ),
        rusqlite::params![id, kind.as_str()],
        invitation_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => match kind {
            InvitationKind::Invite => ApiErr::not_found("invitation not found"),
            InvitationKind::Request => ApiErr::not_found("join request not found"),
        },
        e => ApiErr::from_db("load invitation")(e),
    })
}

/// The single transition point. `pending` rows leave the state exactly once;
/// terminal rows are rejected with 409.
fn transition(
    conn: &rusqlite::Connection,
    invitation: &InvitationResponse,
    to: InvitationStatus,
) -> Result<(), ApiErr> {
    if invitation.status != InvitationStatus::Pending {
        return Err(ApiErr::conflict(format!(
            "invitation is already {}",
            invitation.status
        )));
    }
    let changed = conn
        .execute(
            "UPDATE invitations SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            rusqlite::params![to.as_str(), quizhub_db::now_string(), invitation.id],
        )
        .map_err(ApiErr::from_db("invitation transition"))?;
    if changed == 0 {
        // Lost the race against another transition or the expiry sweep
        return Err(ApiErr::conflict("invitation is no longer pending"));
    }
    Ok(())
}

fn has_pending(
    conn: &rusqlite::Connection,
    company_id: &str,
    receiver_id: &str,
    kind: InvitationKind,
) -> Result<bool, ApiErr> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM invitations
         WHERE company_id = ?1 AND receiver_id = ?2 AND kind = ?3 AND status = 'pending'",
        rusqlite::params![company_id, receiver_id, kind.as_str()],
        |row| row.get(0),
    )
    .map_err(ApiErr::from_db("duplicate check"))
}

fn insert_invitation(
    conn: &rusqlite::Connection,
    company_id: &str,
    sender_id: &str,
    receiver_id: &str,
    kind: InvitationKind,
    title: &str,
    description: Option<&str>,
) -> Result<String, ApiErr> {
    let id = Uuid::new_v4().to_string();
    let expires_at = service::invitation_expiry(chrono::Utc::now());
    conn.execute(
        "INSERT INTO invitations
         (id, company_id, kind, sender_id, receiver_id, title, description, status, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
        rusqlite::params![
            id,
            company_id,
            kind.as_str(),
            sender_id,
            receiver_id,
            title,
            description,
            expires_at
        ],
    )
    .map_err(ApiErr::from_db("insert invitation"))?;
    Ok(id)
}

/// Insert the membership created by an accepted invitation or join request.
/// The UNIQUE constraint catches accept-after-join races.
fn create_membership(
    conn: &rusqlite::Connection,
    company_id: &str,
    user_id: &str,
) -> Result<(), ApiErr> {
    let result = conn.execute(
        "INSERT INTO members (company_id, user_id, role) VALUES (?1, ?2, 'member')",
        [company_id, user_id],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(ApiErr::conflict("already a member of this company"))
        }
        Err(e) => Err(ApiErr::from_db("create membership")(e)),
    }
}

// ---------------------------------------------------------------------------
// Invitations (company -> user)
// ---------------------------------------------------------------------------

/// POST /api/v1/invitations — owner invites a user into their company.
pub async fn send_invitation(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<SendInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), ApiErr> {
    let title = service::validate_title(&req.title)?;

    let conn = db.conn();
    let company = load_company(&conn, &req.company_id)?;
    if company.owner_id != user.user_id {
        return Err(ApiErr::forbidden("only the owner can send invitations"));
    }
    if req.receiver_id == user.user_id {
        return Err(ApiErr::bad_request("you cannot invite yourself"));
    }

    let receiver_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE id = ?1 AND is_active = 1",
            [&req.receiver_id],
            |row| row.get(0),
        )
        .map_err(ApiErr::from_db("receiver lookup"))?;
    if !receiver_exists {
        return Err(ApiErr::not_found("receiver not found"));
    }

    if member_role(&conn, &req.company_id, &req.receiver_id).is_some() {
        return Err(ApiErr::conflict("user is already a member"));
    }
    if has_pending(&conn, &req.company_id, &req.receiver_id, InvitationKind::Invite)? {
        return Err(ApiErr::conflict("a pending invitation already exists"));
    }

    let id = insert_invitation(
        &conn,
        &req.company_id,
        &user.user_id,
        &req.receiver_id,
        InvitationKind::Invite,
        &title,
        req.description.as_deref(),
    )?;

    let invitation = load_invitation(&conn, &id, InvitationKind::Invite)?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

fn list_where(
    conn: &rusqlite::Connection,
    clause: &str,
    param: &str,
) -> Result<ListInvitationsResponse, ApiErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations i
             JOIN companies c ON c.id = i.company_id
             WHERE {clause}
             ORDER BY i.status = 'pending' DESC, i.created_at DESC"
        ))
        .map_err(ApiErr::from_db("list invitations"))?;
    let invitations: Vec<InvitationResponse> = stmt
        .query_map([param], invitation_from_row)
        .map_err(ApiErr::from_db("list invitations"))?
        .filter_map(|r| r.ok())
        .collect();
    let total = invitations.len() as i64;
    Ok(ListInvitationsResponse { invitations, total })
}

/// GET /api/v1/invitations — invitations addressed to the caller, pending first.
pub async fn list_received(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<ListInvitationsResponse>, ApiErr> {
    let conn = db.conn();
    list_where(
        &conn,
        "i.receiver_id = ?1 AND i.kind = 'invite'",
        &user.user_id,
    )
    .map(Json)
}

/// GET /api/v1/invitations/sent — invitations the caller has sent.
pub async fn list_sent(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<ListInvitationsResponse>, ApiErr> {
    let conn = db.conn();
    list_where(
        &conn,
        "i.sender_id = ?1 AND i.kind = 'invite'",
        &user.user_id,
    )
    .map(Json)
}

/// POST /api/v1/invitations/{id}/accept — receiver only; creates the membership.
pub async fn accept_invitation(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<AcceptInvitationResponse>, ApiErr> {
    let conn = db.conn();
    let invitation = load_invitation(&conn, &id, InvitationKind::Invite)?;
    if invitation.receiver_id != user.user_id {
        return Err(ApiErr::forbidden("this invitation is not addressed to you"));
    }
    if invitation.status == InvitationStatus::Pending
        && invitation.expires_at < quizhub_db::now_string()
    {
        // The sweep has not caught it yet; reject without mutating
        return Err(ApiErr::conflict("invitation has expired"));
    }

    transition(&conn, &invitation, InvitationStatus::Accepted)?;
    create_membership(&conn, &invitation.company_id, &user.user_id)?;

    Ok(Json(AcceptInvitationResponse {
        company_id: invitation.company_id,
        user_id: user.user_id,
        role: Role::Member,
    }))
}

/// POST /api/v1/invitations/{id}/decline — receiver only.
pub async fn decline_invitation(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let invitation = load_invitation(&conn, &id, InvitationKind::Invite)?;
    if invitation.receiver_id != user.user_id {
        return Err(ApiErr::forbidden("this invitation is not addressed to you"));
    }
    transition(&conn, &invitation, InvitationStatus::Declined)?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/v1/invitations/{id}/cancel — sender only. Marks cancelled;
/// nothing is ever deleted.
pub async fn cancel_invitation(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let invitation = load_invitation(&conn, &id, InvitationKind::Invite)?;
    if invitation.sender_id != user.user_id {
        return Err(ApiErr::forbidden("only the sender can cancel"));
    }
    transition(&conn, &invitation, InvitationStatus::Cancelled)?;
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Join requests (user -> company)
// ---------------------------------------------------------------------------

/// POST /api/v1/companies/{id}/join — a non-member asks to join. The row is
/// addressed to the company owner.
pub async fn send_join_request(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<JoinRequestBody>,
) -> Result<(StatusCode, Json<InvitationResponse>), ApiErr> {
    let title = service::validate_title(&req.title)?;

    let conn = db.conn();
    let company = load_company(&conn, &company_id)?;
    if member_role(&conn, &company_id, &user.user_id).is_some() {
        return Err(ApiErr::conflict("you are already a member"));
    }
    if pending_request_exists(&conn, &company_id, &user.user_id)? {
        return Err(ApiErr::conflict("a pending join request already exists"));
    }

    let id = insert_invitation(
        &conn,
        &company_id,
        &user.user_id,
        &company.owner_id,
        InvitationKind::Request,
        &title,
        req.description.as_deref(),
    )?;

    let request = load_invitation(&conn, &id, InvitationKind::Request)?;
    Ok((StatusCode::CREATED, Json(request)))
}

fn pending_request_exists(
    conn: &rusqlite::Connection,
    company_id: &str,
    sender_id: &str,
) -> Result<bool, ApiErr> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM invitations
         WHERE company_id = ?1 AND sender_id = ?2 AND kind = 'request' AND status = 'pending'",
        [company_id, sender_id],
        |row| row.get(0),
    )
    .map_err(ApiErr::from_db("duplicate request check"))
}

/// GET /api/v1/companies/{id}/requests — owner/admin.
pub async fn list_join_requests(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
) -> Result<Json<ListInvitationsResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;
    list_where(&conn, "i.company_id = ?1 AND i.kind = 'request'", &company_id).map(Json)
}

/// POST /api/v1/requests/{id}/accept — owner/admin; the requester becomes a member.
pub async fn accept_join_request(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<AcceptInvitationResponse>, ApiErr> {
    let conn = db.conn();
    let request = load_invitation(&conn, &id, InvitationKind::Request)?;
    require_manager(&conn, &request.company_id, &user.user_id)?;

    transition(&conn, &request, InvitationStatus::Accepted)?;
    create_membership(&conn, &request.company_id, &request.sender_id)?;

    Ok(Json(AcceptInvitationResponse {
        company_id: request.company_id,
        user_id: request.sender_id,
        role: Role::Member,
    }))
}

/// POST /api/v1/requests/{id}/decline — owner/admin.
pub async fn decline_join_request(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let request = load_invitation(&conn, &id, InvitationKind::Request)?;
    require_manager(&conn, &request.company_id, &user.user_id)?;
    transition(&conn, &request, InvitationStatus::Declined)?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/v1/requests/{id}/cancel — requester withdraws their own request.
pub async fn cancel_join_request(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let request = load_invitation(&conn, &id, InvitationKind::Request)?;
    if request.sender_id != user.user_id {
        return Err(ApiErr::forbidden("only the requester can cancel"));
    }
    transition(&conn, &request, InvitationStatus::Cancelled)?;
    Ok(Json(OkResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO users (id, email, password_hash, password_salt)
                 VALUES ('u1', 'a@example.com', 'h', 's'),
                        ('u2', 'b@example.com', 'h', 's');
                 INSERT INTO companies (id, name, owner_id) VALUES ('c1', 'Acme', 'u1');
                 INSERT INTO members (company_id, user_id, role) VALUES ('c1', 'u1', 'owner');",
            )
            .unwrap();
        db
    }

    fn seed_invitation(db: &Db, id: &str, status: &str) {
        db.conn()
            .execute(
                "INSERT INTO invitations
                 (id, company_id, kind, sender_id, receiver_id, title, status, expires_at)
                 VALUES (?1, 'c1', 'invite', 'u1', 'u2', 'join us', ?2, '2100-01-01 00:00:00')",
                [id, status],
            )
            .unwrap();
    }

    #[test]
    fn pending_transitions_exactly_once() {
        let db = seeded_db();
        seed_invitation(&db, "i1", "pending");
        let conn = db.conn();

        let invitation = load_invitation(&conn, "i1", InvitationKind::Invite).unwrap();
        transition(&conn, &invitation, InvitationStatus::Accepted).unwrap();

        // stale in-memory copy still says pending; the row-level guard rejects
        assert!(transition(&conn, &invitation, InvitationStatus::Declined).is_err());

        let reloaded = load_invitation(&conn, "i1", InvitationKind::Invite).unwrap();
        assert_eq!(reloaded.status, InvitationStatus::Accepted);
    }

    #[test]
    fn terminal_states_are_rejected() {
        let db = seeded_db();
        for (id, status) in [
            ("i1", "accepted"),
            ("i2", "declined"),
            ("i3", "cancelled"),
            ("i4", "expired"),
        ] {
            seed_invitation(&db, id, status);
            let conn = db.conn();
            let invitation = load_invitation(&conn, id, InvitationKind::Invite).unwrap();
            assert!(transition(&conn, &invitation, InvitationStatus::Accepted).is_err());
        }
    }

    #[test]
    fn membership_is_unique_across_accept_after_join() {
        let db = seeded_db();
        let conn = db.conn();
        create_membership(&conn, "c1", "u2").unwrap();
        // Accepting an invitation after already joining conflicts
        assert!(create_membership(&conn, "c1", "u2").is_err());

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM members WHERE company_id = 'c1' AND user_id = 'u2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn kind_scoping_separates_invites_from_requests() {
        let db = seeded_db();
        seed_invitation(&db, "i1", "pending");
        let conn = db.conn();
        assert!(load_invitation(&conn, "i1", InvitationKind::Request).is_err());
        assert!(load_invitation(&conn, "i1", InvitationKind::Invite).is_ok());
    }
}
