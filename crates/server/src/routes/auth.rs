use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use quizhub_api::{
    crypto, service, AuthTokenResponse, ChangePasswordRequest, LoginRequest, LogoutRequest,
    OkResponse, RefreshRequest, RegisterRequest, UserResponse,
};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::AppConfig;

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Auth extractor
// ---------------------------------------------------------------------------

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
///
/// Verifies the signature and expiry, then loads the user row. Inactive
/// users are rejected even when their token is still valid.
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Db: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let db = Db::from_ref(state);
        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({"error": "missing or invalid Authorization header"})),
                )
                    .into_response()
            })?
            .to_string();

        let claims = crypto::verify_access_token(&token, &config.jwt_secret, now_unix())
            .map_err(|e| ApiErr::from(e).into_response())?;

        // The user row stays authoritative over the claims: deactivation and
        // email changes take effect before the token expires.
        let conn = db.conn();
        let result = conn.query_row(
            "SELECT id, email, is_active FROM users WHERE id = ?1",
            [&claims.sub],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        );

        match result {
            Ok((user_id, email, true)) => Ok(AuthUser { user_id, email }),
            Ok(_) => Err(ApiErr::forbidden("account is deactivated").into_response()),
            Err(_) => Err(ApiErr::unauthorized("unknown user").into_response()),
        }
    }
}

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

pub async fn register(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthTokenResponse>), ApiErr> {
    let email = service::validate_email(&req.email)?;
    service::validate_password(&req.password)?;

    let (hash, salt) = crypto::hash_password(&req.password)?;
    let user_id = Uuid::new_v4().to_string();

    let inserted = db.conn().execute(
        "INSERT INTO users (id, email, password_hash, password_salt, firstname, lastname)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![user_id, email, hash, salt, req.firstname, req.lastname],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(ApiErr::conflict("email already registered"));
        }
        Err(e) => return Err(ApiErr::from_db("register")(e)),
    }

    let bundle = service::prepare_token_bundle(
        &config.jwt_secret,
        config.token_lifetimes,
        &user_id,
        &email,
        now_unix(),
    )?;
    store_refresh_token(&db, &user_id, &bundle)?;

    Ok((StatusCode::CREATED, Json(bundle.response)))
}

fn store_refresh_token(
    db: &Db,
    user_id: &str,
    bundle: &service::TokenBundle,
) -> Result<(), ApiErr> {
    db.conn()
        .execute(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![bundle.token_id, user_id, bundle.token_hash, bundle.expires_at],
        )
        .map_err(ApiErr::from_db("store refresh token"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

pub async fn login(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, ApiErr> {
    let email = service::validate_email(&req.email)?;

    let row = db.conn().query_row(
        "SELECT id, password_hash, password_salt, is_active FROM users WHERE email = ?1",
        [&email],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        },
    );

    let (user_id, hash, salt, is_active) = match row {
        Ok(r) => r,
        // Same response as a bad password so login does not leak which
        // emails exist.
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return Err(ApiErr::unauthorized("invalid email or password"));
        }
        Err(e) => return Err(ApiErr::from_db("login lookup")(e)),
    };

    if !crypto::verify_password(&req.password, &hash, &salt) {
        return Err(ApiErr::unauthorized("invalid email or password"));
    }
    if !is_active {
        return Err(ApiErr::forbidden("account is deactivated"));
    }

    let bundle = service::prepare_token_bundle(
        &config.jwt_secret,
        config.token_lifetimes,
        &user_id,
        &email,
        now_unix(),
    )?;
    store_refresh_token(&db, &user_id, &bundle)?;

    Ok(Json(bundle.response))
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

pub async fn refresh(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>, ApiErr> {
    let token_hash = crypto::refresh_token_digest(&req.refresh_token);
    let now = quizhub_db::now_string();

    let row = db.conn().query_row(
        "SELECT rt.id, u.id, u.email, u.is_active
         FROM refresh_tokens rt
         JOIN users u ON u.id = rt.user_id
         WHERE rt.token_hash = ?1 AND rt.expires_at > ?2",
        rusqlite::params![token_hash, now],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        },
    );

    let (old_token_id, user_id, email, is_active) = match row {
        Ok(r) => r,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return Err(ApiErr::unauthorized("invalid or expired refresh token"));
        }
        Err(e) => return Err(ApiErr::from_db("refresh lookup")(e)),
    };

    if !is_active {
        return Err(ApiErr::forbidden("account is deactivated"));
    }

    // Rotate: the presented token is spent
    db.conn()
        .execute(
            "DELETE FROM refresh_tokens WHERE id = ?1",
            [&old_token_id],
        )
        .map_err(ApiErr::from_db("refresh rotate"))?;

    let bundle = service::prepare_token_bundle(
        &config.jwt_secret,
        config.token_lifetimes,
        &user_id,
        &email,
        now_unix(),
    )?;
    store_refresh_token(&db, &user_id, &bundle)?;

    Ok(Json(bundle.response))
}

// ---------------------------------------------------------------------------
// Logout
// ---------------------------------------------------------------------------

pub async fn logout(
    State(db): State<Db>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<OkResponse>, ApiErr> {
    let token_hash = crypto::refresh_token_digest(&req.refresh_token);
    db.conn()
        .execute(
            "DELETE FROM refresh_tokens WHERE token_hash = ?1",
            [&token_hash],
        )
        .map_err(ApiErr::from_db("logout"))?;
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Change password
// ---------------------------------------------------------------------------

pub async fn change_password(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<OkResponse>, ApiErr> {
    service::validate_password(&req.new_password)?;

    let (hash, salt): (String, String) = db
        .conn()
        .query_row(
            "SELECT password_hash, password_salt FROM users WHERE id = ?1",
            [&user.user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(ApiErr::from_db("change password lookup"))?;

    if !crypto::verify_password(&req.current_password, &hash, &salt) {
        return Err(ApiErr::unauthorized("current password is incorrect"));
    }

    let (new_hash, new_salt) = crypto::hash_password(&req.new_password)?;
    let conn = db.conn();
    conn.execute(
        "UPDATE users SET password_hash = ?1, password_salt = ?2, updated_at = ?3 WHERE id = ?4",
        rusqlite::params![new_hash, new_salt, quizhub_db::now_string(), user.user_id],
    )
    .map_err(ApiErr::from_db("change password"))?;

    // Every other session has to log in again
    conn.execute(
        "DELETE FROM refresh_tokens WHERE user_id = ?1",
        [&user.user_id],
    )
    .map_err(ApiErr::from_db("revoke refresh tokens"))?;

    tracing::info!("password changed for {}", user.email);
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Current user
// ---------------------------------------------------------------------------

pub async fn me(State(db): State<Db>, user: AuthUser) -> Result<Json<UserResponse>, ApiErr> {
    db.conn()
        .query_row(
            "SELECT id, email, firstname, lastname, city, phone, is_active, created_at
             FROM users WHERE id = ?1",
            [&user.user_id],
            |row| {
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
            },
        )
        .map(Json)
        .map_err(ApiErr::from_db("me"))
}
