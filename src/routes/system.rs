use rocket::serde::json::Json;
use rocket::{catch, get, post, State};

use crate::config::GatewayConfig;
use crate::db::Db;
use crate::error::{ApiError, ErrorCode};
use crate::hub::FanoutHub;
use crate::retention::{self, PruneResult};

use super::AdminKey;

#[get("/healthz")]
pub fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "envelope-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Coarse operational counts. No plaintext, no token material.
#[get("/v1/stats")]
pub fn stats(db: &State<Db>, hub: &State<FanoutHub>) -> Json<serde_json::Value> {
    let conn = db.conn();

    let conversations: i64 = conn
        .query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))
        .unwrap_or(0);
    let envelopes: i64 = conn
        .query_row("SELECT COUNT(*) FROM envelopes", [], |r| r.get(0))
        .unwrap_or(0);
    let active_sessions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE revoked_at_ms IS NULL AND expires_at_ms > ?1",
            [crate::db::now_ms()],
            |r| r.get(0),
        )
        .unwrap_or(0);

    Json(serde_json::json!({
        "conversations": conversations,
        "envelopes": envelopes,
        "active_sessions": active_sessions,
        "live_subscriptions": hub.subscriber_count(),
    }))
}

/// Run one pruning sweep now and report per-conversation results.
#[post("/v1/admin/prune")]
pub fn prune_now(
    db: &State<Db>,
    cfg: &State<GatewayConfig>,
    key: AdminKey,
) -> Result<Json<PruneResult>, ApiError> {
    if cfg.admin_key.is_empty() || key.0 != cfg.admin_key {
        return Err(ApiError::new(ErrorCode::Forbidden, "Admin key mismatch"));
    }
    let conn = db.conn();
    Ok(Json(retention::run_prune(&conn, cfg)))
}

#[get("/llms.txt")]
pub fn llms_txt_root() -> (rocket::http::ContentType, &'static str) {
    (rocket::http::ContentType::Plain, LLMS_TXT)
}

#[get("/v1/llms.txt")]
pub fn llms_txt_api() -> (rocket::http::ContentType, &'static str) {
    (rocket::http::ContentType::Plain, LLMS_TXT)
}

const LLMS_TXT: &str = r#"# Envelope Gateway API
> Ciphertext-only messaging gateway for MLS clients. The gateway never sees plaintext: it orders, stores, and fans out opaque encrypted envelopes.

## Quick Start
1. Start a session: POST /v1/session/start {"auth_token": "uid.<user>.<sig>", "device_id": "laptop"}
2. Create a conversation: POST /v1/rooms/create {"conv_id": "optional-id"} (Bearer session_token)
3. Send an envelope: POST /v1/inbox with a conv.send frame (env is base64 ciphertext)
4. Stream in order: GET /v1/sse?conv_id=...&from_seq=1, or open /v1/ws

## Auth Model
- `auth_token` is an HMAC-signed bearer credential (`uid.<user_id>.<hex>`); identity bootstrap happens outside the gateway.
- session.start issues a short-lived `session_token` (Bearer header on every call) and a device-bound `resume_token`.
- session.resume rotates both tokens and keeps the session (and its cursors).
- Only token digests are stored; token values never appear in logs.
- Optional `device_credential` binds the device to the user; wrong bindings are rejected.

## Sessions
- POST /v1/session/start — body: {"auth_token", "device_id", "device_credential?"} → {session_id, user_id, session_token, resume_token, expires_at_ms}
- POST /v1/session/resume — body: {"resume_token"} → rotated tokens, same session_id
- GET /v1/session/list — live sessions for the calling user (no token material)
- POST /v1/session/logout — revoke the calling session
- POST /v1/session/logout_all — revoke every session of the user
- POST /v1/session/revoke — body: {"session_id"?, "device_id"?, "include_self"?}
- Revocation takes effect on the next request or within one heartbeat on open sockets.

## Conversations & Membership
- POST /v1/rooms/create — body: {"conv_id"?}. Caller becomes owner. 409 `conflict` on duplicate conv_id.
- POST /v1/rooms/invite — body: {"conv_id", "user_id", "role"?} (member default; granting admin takes an owner)
- POST /v1/rooms/remove — body: {"conv_id", "user_id"}. Members may leave themselves; the last owner is protected.
- POST /v1/rooms/promote | /v1/rooms/demote — body: {"conv_id", "user_id"}. One rank at a time.
- GET /v1/rooms/members?conv_id= — members with roles (member-only)
- GET /v1/conversations — caller's memberships with window bounds and per-session unread counts
- Sends/subscribes/acks are authorized against membership at acceptance time.

## Envelopes (the ordered log)
- Every accepted envelope gets a per-conversation `seq`, dense from 1, assigned by the gateway.
- `msg_id` (sender-chosen, ≤128 bytes) is the idempotency key: retrying the same (conv_id, msg_id) returns the original seq with duplicate=true and writes nothing.
- `env` is opaque base64 ciphertext, ≤ MAX_ENV_BYTES (default 1 MiB); empty env is a valid handshake envelope.
- `origin_gateway` / `conv_home` are pass-through federation metadata.
- The append is fsync-durable before the gateway acknowledges it.

## Wire Frames (WS and inbox)
Envelope: {"v": 1, "t": "<type>", "id": "<correlation-id>", "ts": <epoch_ms>, "body": {...}}
- Client → server: session.start, session.resume, conv.subscribe {conv_id, from_seq?}, conv.unsubscribe {conv_id}, conv.ack {conv_id, seq}, conv.send {conv_id, msg_id, env}, pong
- Server → client: session.ready, conv.event {conv_id, seq, msg_id, env, ts}, conv.acked, error {code, message, ...}, ping
- All keys are snake_case; upper-case top-level body keys are rejected (`invalid_frame`). Unknown fields are ignored; unknown types are rejected.

## WebSocket /v1/ws
- First frame must be session.start or session.resume → session.ready.
- Server pings every PING_MS; reply pong within HEARTBEAT_MS or the socket closes.
- conv.send is answered with conv.acked carrying {conv_id, seq, msg_id, duplicate} under the request's correlation id.
- Per-session subscription cap and per-user connection cap apply.

## SSE /v1/sse?conv_id=&from_seq=
- Bearer-authenticated, one conversation per stream. Events: conv.event, error, heartbeat.
- Acks go over POST /v1/inbox or a parallel WS session.

## HTTP Inbox /v1/inbox
- POST a conv.send or conv.ack frame for socket-less clients; same semantics and replies as WS.

## Replay & Cursors
- conv.subscribe with from_seq=S replays [S, next_seq) in order, then continues live with no gap or duplicate.
- from_seq omitted → the session's stored cursor, or the live head on first subscribe.
- from_seq below the retained window → one error {code: "replay_window_exceeded", requested_from_seq, earliest_seq, latest_seq}; resubscribe from earliest_seq.
- conv.ack {conv_id, seq} advances the (session, conversation) cursor to max(current, seq+1); it never regresses. Out-of-range seq → `invalid_ack`.
- GET /v1/envelopes?conv_id=&from_seq=&limit= — authenticated range read over the retained window.
- GET /v1/cursors?conv_id= — this session's cursor and unread backlog.

## Retention
- Logs are pruned to MAX_RETAINED envelopes per conversation and/or RETAIN_MS age by a background sweep (every 60s).
- Pruning advances earliest_retained_seq; a pruned msg_id may be accepted again at a new seq.
- POST /v1/admin/prune — run a sweep now (GATEWAY_ADMIN_KEY bearer). Returns per-conversation results.

## Errors
Stable codes on every error, HTTP body {code, message, ...details} or a single WS/SSE error frame:
unauthorized (401), forbidden / not_member (403), conv_not_found / not_found (404), conflict (409), rate_limited (429), payload_too_large / invalid_frame / invalid_ack / replay_window_exceeded (400), slow_consumer (in-stream), storage_unavailable (503), internal (500).

## Backpressure
- Each subscription has a bounded delivery queue (SUBSCRIPTION_QUEUE_LEN). A subscriber saturated past SLOW_CONSUMER_MS is disconnected with `slow_consumer`; its durable cursor survives, so it reconnects and replays without loss. Other subscribers are unaffected.

## Rate Limiting
- Sends: per (device, conversation). Session starts: per IP. Room mutations: per user.
- Successful responses carry X-RateLimit-Limit / X-RateLimit-Remaining / X-RateLimit-Reset; 429 bodies include retry_after_secs.
- Configurable via RATE_LIMIT_SENDS, RATE_LIMIT_SENDS_WINDOW_SECS, RATE_LIMIT_SESSION_STARTS, RATE_LIMIT_ROOM_OPS.

## System
- GET /healthz — readiness
- GET /v1/stats — conversations, envelopes, active sessions, live subscriptions
- Deployment knobs: GATEWAY_SECRET, GATEWAY_ADMIN_KEY, DATABASE_PATH, MAX_ENV_BYTES, MAX_RETAINED, RETAIN_MS, SUBSCRIPTION_QUEUE_LEN, SLOW_CONSUMER_MS, PING_MS, HEARTBEAT_MS, MAX_SUBSCRIPTIONS_PER_SESSION, MAX_SESSIONS_PER_USER, MAX_WS_CONNECTIONS_PER_USER, SESSION_TTL_MS
"#;

// --- Catchers: every error leaving the gateway wears the same JSON shape ---

#[catch(400)]
pub fn bad_request() -> ApiError {
    ApiError::new(ErrorCode::InvalidFrame, "Malformed request")
}

#[catch(401)]
pub fn unauthorized() -> ApiError {
    ApiError::new(ErrorCode::Unauthorized, "Missing or invalid credentials")
}

#[catch(404)]
pub fn not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "No such endpoint or resource")
}

#[catch(422)]
pub fn unprocessable() -> ApiError {
    ApiError::new(ErrorCode::InvalidFrame, "Malformed request body")
}

#[catch(429)]
pub fn too_many_requests() -> ApiError {
    ApiError::new(ErrorCode::RateLimited, "Rate limited")
}

#[catch(500)]
pub fn internal_error() -> ApiError {
    ApiError::new(ErrorCode::Internal, "Internal error")
}
