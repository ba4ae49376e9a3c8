use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::error::{ApiError, ErrorCode};
use crate::models::{ResumeSession, RevokeSessions, SessionInfo, SessionReady, StartSession};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use crate::sessions;
use crate::store;

use super::{AuthedSession, ClientIp};

#[post("/v1/session/start", format = "json", data = "<body>")]
pub fn start_session(
    db: &State<Db>,
    cfg: &State<GatewayConfig>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    body: Json<StartSession>,
) -> Result<RateLimited<SessionReady>, ApiError> {
    let rl = rate_limiter.check_with_info(
        &format!("session_start:{}", ip.0),
        rate_config.session_starts_max,
        rate_config.session_starts_window_secs,
    );
    if !rl.allowed {
        return Err(rl.into_error("session starts"));
    }

    let conn = db.conn();
    let ready = sessions::start_session(
        &conn,
        cfg,
        &body.auth_token,
        &body.device_id,
        body.device_credential.as_deref(),
    )?;
    Ok(RateLimited::new(Json(ready), rl))
}

#[post("/v1/session/resume", format = "json", data = "<body>")]
pub fn resume_session(
    db: &State<Db>,
    cfg: &State<GatewayConfig>,
    body: Json<ResumeSession>,
) -> Result<Json<SessionReady>, ApiError> {
    let conn = db.conn();
    let ready = sessions::resume_session(&conn, cfg, &body.resume_token)?;
    Ok(Json(ready))
}

#[post("/v1/session/logout")]
pub fn logout(db: &State<Db>, session: AuthedSession) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    store::revoke_session(&conn, &session.session_id).map_err(ApiError::storage)?;
    Ok(Json(serde_json::json!({ "revoked": 1 })))
}

#[post("/v1/session/logout_all")]
pub fn logout_all(
    db: &State<Db>,
    session: AuthedSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let revoked =
        store::revoke_user_sessions(&conn, &session.user_id, None).map_err(ApiError::storage)?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

#[post("/v1/session/revoke", format = "json", data = "<body>")]
pub fn revoke_sessions(
    db: &State<Db>,
    session: AuthedSession,
    body: Json<RevokeSessions>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();

    let revoked = if let Some(ref target) = body.session_id {
        // Only the owner of a session may revoke it.
        let owner: Option<String> = {
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT user_id FROM sessions WHERE session_id = ?1",
                rusqlite::params![target],
                |r| r.get(0),
            )
            .optional()
            .map_err(ApiError::storage)?
        };
        match owner {
            Some(user) if user == session.user_id => {
                if !body.include_self && *target == session.session_id {
                    return Err(ApiError::new(
                        ErrorCode::Forbidden,
                        "Refusing to revoke the calling session without include_self",
                    ));
                }
                usize::from(store::revoke_session(&conn, target).map_err(ApiError::storage)?)
            }
            _ => {
                return Err(ApiError::new(ErrorCode::NotFound, "No such session"));
            }
        }
    } else if let Some(ref device) = body.device_id {
        store::revoke_device_sessions(&conn, &session.user_id, device)
            .map_err(ApiError::storage)?
    } else {
        let keep = if body.include_self {
            None
        } else {
            Some(session.session_id.as_str())
        };
        store::revoke_user_sessions(&conn, &session.user_id, keep).map_err(ApiError::storage)?
    };

    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

#[get("/v1/session/list")]
pub fn list_sessions(
    db: &State<Db>,
    session: AuthedSession,
) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    let conn = db.conn();
    let sessions = store::list_user_sessions(&conn, &session.user_id, &session.session_id)
        .map_err(ApiError::storage)?;
    Ok(Json(sessions))
}
