//! Shared business logic — framework-agnostic pure functions.
//!
//! Route handlers stay thin adapters over these helpers so the rules are
//! testable without a running server.

use crate::{AuthTokenResponse, ServiceError};

// ─── Validation ─────────────────────────────────────────────────────────────

/// Validate and normalize an email address. Returns the lowercased, trimmed email.
pub fn validate_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || email.len() > 254 {
        return Err(ServiceError::BadRequest("invalid email address".into()));
    }
    Ok(email)
}

/// Validate a password (8-128 characters).
pub fn validate_password(password: &str) -> Result<(), ServiceError> {
    if password.len() < 8 {
        return Err(ServiceError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }
    if password.len() > 128 {
        return Err(ServiceError::BadRequest(
            "password must be at most 128 characters".into(),
        ));
    }
    Ok(())
}

/// Validate and normalize a company name. Returns the trimmed name.
pub fn validate_company_name(name: &str) -> Result<String, ServiceError> {
    let trimmed = name.trim().to_string();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return Err(ServiceError::BadRequest(
            "company name must be 1-128 characters".into(),
        ));
    }
    Ok(trimmed)
}

/// Validate and normalize a short title (invitations, quizzes, questions).
pub fn validate_title(title: &str) -> Result<String, ServiceError> {
    let trimmed = title.trim().to_string();
    if trimmed.is_empty() || trimmed.len() > 256 {
        return Err(ServiceError::BadRequest(
            "title must be 1-256 characters".into(),
        ));
    }
    Ok(trimmed)
}

// ─── Pagination ─────────────────────────────────────────────────────────────

/// Max page size accepted from clients.
pub const MAX_PER_PAGE: u32 = 100;

/// Clamp pagination to sane bounds and return `(limit, offset)` for SQL.
pub fn page_bounds(page: u32, per_page: u32) -> (i64, i64) {
    let page = page.max(1);
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let offset = (page - 1) as i64 * per_page as i64;
    (per_page as i64, offset)
}

// ─── Scoring ────────────────────────────────────────────────────────────────

/// Correct-answer ratio in [0, 1]. An empty history scores 0.0.
pub fn score_ratio(correct: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    correct as f64 / total as f64
}

// ─── Invitation expiry ──────────────────────────────────────────────────────

/// Invitations expire this many days after creation.
pub const INVITATION_EXPIRY_DAYS: i64 = 7;

/// SQLite datetime string for a new invitation's expiry.
pub fn invitation_expiry(now: chrono::DateTime<chrono::Utc>) -> String {
    (now + chrono::Duration::days(INVITATION_EXPIRY_DAYS))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// SQLite datetime string for "now" — the single timestamp format used
/// across the schema.
pub fn now_sqlite(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

// ─── Token Bundle ───────────────────────────────────────────────────────────

/// Pre-computed token bundle returned by [`prepare_token_bundle`].
///
/// Contains everything needed to insert a refresh token row and return the
/// auth response. The caller only needs to perform the DB INSERT.
pub struct TokenBundle {
    /// JWT access token.
    pub access_token: String,
    /// Raw refresh token (sent to the client).
    pub refresh_token: String,
    /// SHA-256 hash of the refresh token (stored in DB).
    pub token_hash: String,
    /// UUID primary key for the refresh_tokens row.
    pub token_id: String,
    /// `datetime` string for the refresh token expiry (DB column value).
    pub expires_at: String,
    /// Ready-to-return API response.
    pub response: AuthTokenResponse,
}

/// Build a [`TokenBundle`] containing an access token, refresh token, and
/// the auth response.
pub fn prepare_token_bundle(
    jwt_secret: &str,
    lifetimes: crate::crypto::TokenLifetimes,
    user_id: &str,
    email: &str,
    now_unix: u64,
) -> Result<TokenBundle, ServiceError> {
    use crate::crypto;

    let access_token =
        crypto::sign_access_token(user_id, email, jwt_secret, now_unix, lifetimes.access_secs)?;
    let refresh_token = crypto::new_refresh_token()?;
    let token_hash = crypto::refresh_token_digest(&refresh_token);
    let token_id = uuid::Uuid::new_v4().to_string();

    let base = chrono::DateTime::from_timestamp(now_unix as i64, 0)
        .ok_or_else(|| ServiceError::Internal("invalid timestamp".into()))?;
    let expires_at = base
        .checked_add_signed(chrono::Duration::seconds(lifetimes.refresh_secs as i64))
        .ok_or_else(|| ServiceError::Internal("timestamp overflow".into()))?
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    let response = AuthTokenResponse {
        access_token: access_token.clone(),
        refresh_token: refresh_token.clone(),
        expires_in: lifetimes.access_secs,
        user_id: user_id.to_string(),
        email: email.to_string(),
    };

    Ok(TokenBundle {
        access_token,
        refresh_token,
        token_hash,
        token_id,
        expires_at,
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        assert_eq!(validate_email("  Al@Example.COM ").unwrap(), "al@example.com");
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn password_length_bounds() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("longenough").is_ok());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn company_name_bounds() {
        assert_eq!(validate_company_name("  Acme  ").unwrap(), "Acme");
        assert!(validate_company_name("   ").is_err());
        assert!(validate_company_name(&"x".repeat(129)).is_err());
    }

    #[test]
    fn page_bounds_clamp() {
        assert_eq!(page_bounds(1, 10), (10, 0));
        assert_eq!(page_bounds(3, 10), (10, 20));
        assert_eq!(page_bounds(0, 0), (1, 0));
        assert_eq!(page_bounds(2, 10_000), (MAX_PER_PAGE as i64, MAX_PER_PAGE as i64));
    }

    #[test]
    fn score_ratio_never_divides_by_zero() {
        assert_eq!(score_ratio(0, 0), 0.0);
        assert_eq!(score_ratio(3, 4), 0.75);
        assert_eq!(score_ratio(5, -1), 0.0);
    }

    #[test]
    fn token_bundle_is_consistent() {
        let lifetimes = crate::crypto::TokenLifetimes::default();
        let bundle =
            prepare_token_bundle("secret", lifetimes, "u1", "a@b.c", 1_700_000_000).unwrap();
        assert_eq!(bundle.response.access_token, bundle.access_token);
        assert_eq!(bundle.response.expires_in, lifetimes.access_secs);
        assert_eq!(
            crate::crypto::refresh_token_digest(&bundle.refresh_token),
            bundle.token_hash
        );
        let claims =
            crate::crypto::verify_access_token(&bundle.access_token, "secret", 1_700_000_000)
                .unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email, "a@b.c");
    }

    #[test]
    fn token_bundle_honors_custom_lifetimes() {
        let lifetimes = crate::crypto::TokenLifetimes {
            access_secs: 60,
            refresh_secs: 120,
        };
        let bundle =
            prepare_token_bundle("secret", lifetimes, "u1", "a@b.c", 1_700_000_000).unwrap();
        assert_eq!(bundle.response.expires_in, 60);
        assert!(
            crate::crypto::verify_access_token(&bundle.access_token, "secret", 1_700_000_000 + 61)
                .is_err()
        );
    }

    #[test]
    fn invitation_expiry_is_seven_days_out() {
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let exp = invitation_expiry(now);
        assert!(exp > now_sqlite(now));
    }
}
