//! Authentication primitives.
//!
//! - PBKDF2-SHA256 password hashing (600k iterations)
//! - HMAC-SHA256 access tokens carrying the quizhub claim set
//! - Opaque refresh tokens, stored only as SHA-256 digests

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::ServiceError;

const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Issuer claim stamped into every access token this service signs.
const ISSUER: &str = "quizhub";

/// Constant-time byte comparison. Used for password hashes and token
/// signatures alike.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Password hashing ────────────────────────────────────────────────────────

fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Hash a password with PBKDF2-SHA256 under a fresh random salt.
/// Returns `(hash_hex, salt_hex)` for the users table.
pub fn hash_password(password: &str) -> Result<(String, String), ServiceError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt)
        .map_err(|e| ServiceError::Internal(format!("RNG failure: {e}")))?;
    let key = derive_key(password, &salt);
    Ok((hex::encode(key), hex::encode(salt)))
}

/// Verify a password against a stored hash and salt (both hex-encoded).
pub fn verify_password(password: &str, hash_hex: &str, salt_hex: &str) -> bool {
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(hash_hex) else {
        return false;
    };
    ct_eq(&derive_key(password, &salt), &expected)
}

// ── Access tokens ───────────────────────────────────────────────────────────

/// Access/refresh lifetimes, configurable per deployment.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access_secs: u64,
    pub refresh_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: 3600,
            refresh_secs: 7 * 24 * 3600,
        }
    }
}

/// Claim set carried by a quizhub access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub email: String,
    pub iat: u64,
    pub exp: u64,
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, ServiceError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| ServiceError::Internal(format!("claims serialization: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn unauthorized(msg: &str) -> ServiceError {
    ServiceError::Unauthorized(msg.into())
}

/// Sign an HS256 access token for the given user.
pub fn sign_access_token(
    user_id: &str,
    email: &str,
    secret: &str,
    now_unix: u64,
    ttl_secs: u64,
) -> Result<String, ServiceError> {
    let claims = Claims {
        iss: ISSUER.to_string(),
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now_unix,
        exp: now_unix + ttl_secs,
    };
    let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let signature = hmac_sha256(secret.as_bytes(), signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Verify an access token's signature, issuer, and expiry. Returns the
/// claim set on success.
pub fn verify_access_token(
    token: &str,
    secret: &str,
    now_unix: u64,
) -> Result<Claims, ServiceError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(unauthorized("malformed access token"));
    };

    let signing_input = format!("{header}.{payload}");
    let expected = hmac_sha256(secret.as_bytes(), signing_input.as_bytes());
    let presented = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| unauthorized("malformed token signature"))?;
    if !ct_eq(&expected, &presented) {
        return Err(unauthorized("token signature mismatch"));
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| unauthorized("malformed token payload"))?;
    let claims: Claims = serde_json::from_slice(&payload_bytes)
        .map_err(|_| unauthorized("unreadable token claims"))?;

    if claims.iss != ISSUER {
        return Err(unauthorized("token issued for another service"));
    }
    if now_unix > claims.exp {
        return Err(unauthorized("access token expired"));
    }

    Ok(claims)
}

// ── Refresh tokens ──────────────────────────────────────────────────────────

/// Mint an opaque refresh token: 32 random bytes, hex-encoded.
pub fn new_refresh_token() -> Result<String, ServiceError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| ServiceError::Internal(format!("RNG failure: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Digest under which a refresh token is stored. The raw token never
/// touches the database.
pub fn refresh_token_digest(token: &str) -> String {
    use sha2::Digest;
    hex::encode(sha2::Sha256::digest(token.as_bytes()))
}

// ── Internal ────────────────────────────────────────────────────────────────

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verify_round_trip() {
        let (hash, salt) = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash, &salt));
        assert!(!verify_password("hunter23", &hash, &salt));
    }

    #[test]
    fn password_verify_rejects_garbage_encoding() {
        assert!(!verify_password("x", "not-hex", "also-not-hex"));
    }

    #[test]
    fn access_token_round_trip() {
        let token = sign_access_token("user-1", "a@b.c", "secret", 1_000_000, 3600).unwrap();
        let claims = verify_access_token(&token, "secret", 1_000_000 + 10).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "a@b.c");
        assert_eq!(claims.exp, 1_000_000 + 3600);
    }

    #[test]
    fn access_token_rejects_wrong_secret() {
        let token = sign_access_token("user-1", "a@b.c", "secret", 1_000_000, 3600).unwrap();
        assert!(verify_access_token(&token, "other", 1_000_000).is_err());
    }

    #[test]
    fn access_token_rejects_expired() {
        let token = sign_access_token("user-1", "a@b.c", "secret", 1_000_000, 60).unwrap();
        assert!(verify_access_token(&token, "secret", 1_000_000 + 61).is_err());
    }

    #[test]
    fn access_token_rejects_foreign_issuer() {
        // Correctly signed, but not by this service's claim set
        let claims = Claims {
            iss: "somewhere-else".into(),
            sub: "user-1".into(),
            email: "a@b.c".into(),
            iat: 1_000_000,
            exp: 2_000_000,
        };
        let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
        let signing_input = format!(
            "{}.{}",
            encode_segment(&header).unwrap(),
            encode_segment(&claims).unwrap()
        );
        let sig = hmac_sha256(b"secret", signing_input.as_bytes());
        let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig));
        assert!(verify_access_token(&token, "secret", 1_000_000).is_err());
    }

    #[test]
    fn access_token_rejects_tampered_payload() {
        let token = sign_access_token("user-1", "a@b.c", "secret", 1_000_000, 3600).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            br#"{"iss":"quizhub","sub":"user-2","email":"a@b.c","iat":1,"exp":9999999999}"#,
        );
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(verify_access_token(&tampered, "secret", 1_000_000).is_err());
    }

    #[test]
    fn refresh_token_digest_is_stable() {
        let t = new_refresh_token().unwrap();
        assert_eq!(t.len(), 64);
        assert_eq!(refresh_token_digest(&t), refresh_token_digest(&t));
        assert_ne!(refresh_token_digest(&t), t);
    }
}
