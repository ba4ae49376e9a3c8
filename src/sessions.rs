use hmac::{Hmac, Mac};
use rusqlite::Connection;
use sha2::Sha256;

use crate::config::GatewayConfig;
use crate::db::{generate_session_id, generate_token, now_ms};
use crate::error::{ApiError, ErrorCode};
use crate::models::{SessionReady, SessionRow};
use crate::store;

type HmacSha256 = Hmac<Sha256>;

/// Keyed digest of a token value. Only digests are persisted; a stolen
/// database row cannot be replayed as a bearer token.
pub fn token_digest(secret: &str, token: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Mint a bearer auth_token for `user_id`: `uid.<user_id>.<hex digest>`.
/// Identity bootstrap is external; the gateway only verifies this signature.
pub fn mint_auth_token(secret: &str, user_id: &str) -> String {
    let sig = token_digest(secret, &format!("auth:{user_id}"));
    format!("uid.{user_id}.{sig}")
}

/// Mint a device credential binding `device_id` to `user_id`.
pub fn mint_device_credential(secret: &str, user_id: &str, device_id: &str) -> String {
    token_digest(secret, &format!("device:{user_id}:{device_id}"))
}

/// Verify an auth_token and extract the `user_id` it vouches for.
pub fn verify_auth_token(secret: &str, auth_token: &str) -> Option<String> {
    let rest = auth_token.strip_prefix("uid.")?;
    let (user_id, sig) = rest.rsplit_once('.')?;
    if user_id.is_empty() {
        return None;
    }
    let expected = token_digest(secret, &format!("auth:{user_id}"));
    // Constant-time-ish compare over fixed-length hex digests.
    if sig.len() == expected.len()
        && sig
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    {
        Some(user_id.to_string())
    } else {
        None
    }
}

fn unauthorized() -> ApiError {
    ApiError::new(ErrorCode::Unauthorized, "Invalid or expired credentials")
}

/// `session.start`: validate the bearer credential, bind the session to the
/// device, and issue a fresh token pair. A supplied `device_credential` must
/// match the (user, device) binding; absent means an unbound device.
pub fn start_session(
    conn: &Connection,
    cfg: &GatewayConfig,
    auth_token: &str,
    device_id: &str,
    device_credential: Option<&str>,
) -> Result<SessionReady, ApiError> {
    let user_id = verify_auth_token(&cfg.secret, auth_token).ok_or_else(unauthorized)?;

    let device_id = device_id.trim();
    if device_id.is_empty() || device_id.len() > 128 {
        return Err(ApiError::new(
            ErrorCode::InvalidFrame,
            "device_id must be 1-128 characters",
        ));
    }

    if let Some(cred) = device_credential
        && cred != mint_device_credential(&cfg.secret, &user_id, device_id)
    {
        return Err(unauthorized());
    }

    let active = store::active_session_count(conn, &user_id).map_err(ApiError::storage)?;
    if active >= cfg.max_sessions_per_user {
        return Err(ApiError::new(
            ErrorCode::RateLimited,
            "Too many active sessions for this user",
        ));
    }

    let session_id = generate_session_id();
    let session_token = generate_token("sess");
    let resume_token = generate_token("rsm");
    let expires_at_ms = now_ms() + cfg.session_ttl_ms;

    store::insert_session(
        conn,
        &session_id,
        &user_id,
        device_id,
        &token_digest(&cfg.secret, &session_token),
        &token_digest(&cfg.secret, &resume_token),
        expires_at_ms,
    )
    .map_err(ApiError::storage)?;

    Ok(SessionReady {
        session_id,
        user_id,
        session_token,
        resume_token,
        expires_at_ms,
    })
}

/// `session.resume`: rotate both tokens, keep the session_id (and with it the
/// session's cursors). The presented resume_token is consumed.
pub fn resume_session(
    conn: &Connection,
    cfg: &GatewayConfig,
    resume_token: &str,
) -> Result<SessionReady, ApiError> {
    let row = store::session_by_resume_hash(conn, &token_digest(&cfg.secret, resume_token))
        .map_err(ApiError::storage)?
        .ok_or_else(unauthorized)?;

    let session_token = generate_token("sess");
    let new_resume = generate_token("rsm");
    let expires_at_ms = now_ms() + cfg.session_ttl_ms;

    store::rotate_session_tokens(
        conn,
        &row.session_id,
        &token_digest(&cfg.secret, &session_token),
        &token_digest(&cfg.secret, &new_resume),
        expires_at_ms,
    )
    .map_err(ApiError::storage)?;

    Ok(SessionReady {
        session_id: row.session_id,
        user_id: row.user_id,
        session_token,
        resume_token: new_resume,
        expires_at_ms,
    })
}

/// Validate a presented session_token. Used by the HTTP bearer guard and the
/// WS handshake; also bumps coarse last-seen.
pub fn validate_session_token(
    conn: &Connection,
    cfg: &GatewayConfig,
    session_token: &str,
) -> Result<SessionRow, ApiError> {
    let row = store::session_by_token_hash(conn, &token_digest(&cfg.secret, session_token))
        .map_err(ApiError::storage)?
        .ok_or_else(unauthorized)?;
    store::touch_session(conn, &row.session_id).map_err(ApiError::storage)?;
    Ok(row)
}
