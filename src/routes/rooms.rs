use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::db::{generate_conv_id, Db};
use crate::error::{ApiError, ErrorCode};
use crate::models::{Conversation, CreateConv, InviteMember, MembersResponse, MemberTarget};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use crate::registry::{self, Role};
use crate::store;

use super::AuthedSession;

fn check_room_ops(
    rate_limiter: &RateLimiter,
    rate_config: &RateLimitConfig,
    user_id: &str,
) -> Result<crate::rate_limit::RateLimitInfo, ApiError> {
    let rl = rate_limiter.check_with_info(
        &format!("room_ops:{user_id}"),
        rate_config.room_ops_max,
        rate_config.room_ops_window_secs,
    );
    if !rl.allowed {
        return Err(rl.into_error("room operations"));
    }
    Ok(rl)
}

#[post("/v1/rooms/create", format = "json", data = "<body>")]
pub fn create_room(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    session: AuthedSession,
    body: Json<CreateConv>,
) -> Result<RateLimited<Conversation>, ApiError> {
    let rl = check_room_ops(rate_limiter, rate_config, &session.user_id)?;

    let conv_id = match &body.conv_id {
        Some(id) => {
            let id = id.trim();
            if id.is_empty() || id.len() > 128 {
                return Err(ApiError::new(
                    ErrorCode::InvalidFrame,
                    "conv_id must be 1-128 characters",
                ));
            }
            id.to_string()
        }
        None => generate_conv_id(),
    };

    let mut conn = db.conn();
    let created = store::create_conversation(&mut conn, &conv_id, &session.user_id)
        .map_err(ApiError::storage)?;
    if !created {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("Conversation '{conv_id}' already exists"),
        ));
    }

    let conv = store::get_conversation(&conn, &conv_id)
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "Conversation vanished after create"))?;
    Ok(RateLimited::new(Json(conv), rl))
}

#[post("/v1/rooms/invite", format = "json", data = "<body>")]
pub fn invite_member(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    session: AuthedSession,
    body: Json<InviteMember>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_room_ops(rate_limiter, rate_config, &session.user_id)?;

    let user_id = body.user_id.trim();
    if user_id.is_empty() || user_id.len() > 128 {
        return Err(ApiError::new(
            ErrorCode::InvalidFrame,
            "user_id must be 1-128 characters",
        ));
    }
    let role = match body.role.as_deref() {
        None => Role::Member,
        Some(r) => Role::from_str(r).ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidFrame, "role must be 'member' or 'admin'")
        })?,
    };

    let conn = db.conn();
    registry::invite(&conn, &body.conv_id, &session.user_id, user_id, role)?;
    Ok(Json(serde_json::json!({
        "conv_id": body.conv_id,
        "user_id": user_id,
        "role": role.as_str(),
    })))
}

#[post("/v1/rooms/remove", format = "json", data = "<body>")]
pub fn remove_member(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    session: AuthedSession,
    body: Json<MemberTarget>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_room_ops(rate_limiter, rate_config, &session.user_id)?;

    let conn = db.conn();
    registry::remove(&conn, &body.conv_id, &session.user_id, &body.user_id)?;
    Ok(Json(serde_json::json!({
        "conv_id": body.conv_id,
        "user_id": body.user_id,
        "removed": true,
    })))
}

#[post("/v1/rooms/promote", format = "json", data = "<body>")]
pub fn promote_member(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    session: AuthedSession,
    body: Json<MemberTarget>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_room_ops(rate_limiter, rate_config, &session.user_id)?;

    let conn = db.conn();
    let role = registry::promote(&conn, &body.conv_id, &session.user_id, &body.user_id)?;
    Ok(Json(serde_json::json!({
        "conv_id": body.conv_id,
        "user_id": body.user_id,
        "role": role.as_str(),
    })))
}

#[post("/v1/rooms/demote", format = "json", data = "<body>")]
pub fn demote_member(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    session: AuthedSession,
    body: Json<MemberTarget>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_room_ops(rate_limiter, rate_config, &session.user_id)?;

    let conn = db.conn();
    let role = registry::demote(&conn, &body.conv_id, &session.user_id, &body.user_id)?;
    Ok(Json(serde_json::json!({
        "conv_id": body.conv_id,
        "user_id": body.user_id,
        "role": role.as_str(),
    })))
}

#[get("/v1/rooms/members?<conv_id>")]
pub fn list_room_members(
    db: &State<Db>,
    session: AuthedSession,
    conv_id: &str,
) -> Result<Json<MembersResponse>, ApiError> {
    let conn = db.conn();
    registry::require_member(&conn, conv_id, &session.user_id)?;
    let members = store::list_members(&conn, conv_id).map_err(ApiError::storage)?;
    Ok(Json(MembersResponse {
        conv_id: conv_id.to_string(),
        count: members.len(),
        members,
    }))
}
