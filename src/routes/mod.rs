// Route module decomposition — each surface area in its own file.
// Shared request guards live here; route functions in submodules.

mod convs;
#[path = "inbox.rs"]
mod inbox_impl;
mod rooms;
mod session_routes;
mod sse;
mod system;
mod ws;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use convs::{get_cursor, list_conversations};
pub use inbox_impl::{inbox, read_envelopes};
pub use rooms::{create_room, demote_member, invite_member, list_room_members, promote_member, remove_member};
pub use session_routes::{
    list_sessions, logout, logout_all, resume_session, revoke_sessions, start_session,
};
pub use sse::sse_stream;
pub use system::{
    bad_request, healthz, internal_error, llms_txt_api, llms_txt_root, not_found, prune_now,
    stats, too_many_requests, unauthorized, unprocessable,
};
pub use ws::ws_connect;

// --- Shared request guards ---

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::sessions;

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// Bearer-authenticated session. Validation rereads the store on every
/// request, so revocation and expiry take effect immediately.
pub struct AuthedSession {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthedSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = match req
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };
        let (Some(db), Some(cfg)) = (
            req.rocket().state::<Db>(),
            req.rocket().state::<GatewayConfig>(),
        ) else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let conn = db.conn();
        match sessions::validate_session_token(&conn, cfg, token) {
            Ok(row) => Outcome::Success(AuthedSession {
                session_id: row.session_id,
                user_id: row.user_id,
                device_id: row.device_id,
            }),
            Err(_) => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Raw bearer key for the /v1/admin surface; compared against
/// `GATEWAY_ADMIN_KEY` in the route.
pub struct AdminKey(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Some(auth) = req.headers().get_one("Authorization")
            && let Some(key) = auth.strip_prefix("Bearer ")
        {
            return Outcome::Success(AdminKey(key.to_string()));
        }
        if let Some(key) = req.headers().get_one("X-Admin-Key") {
            return Outcome::Success(AdminKey(key.to_string()));
        }
        Outcome::Error((Status::Unauthorized, ()))
    }
}
