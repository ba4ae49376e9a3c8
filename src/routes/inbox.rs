use base64::Engine;
use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::append::{self, AppendCtx};
use crate::config::GatewayConfig;
use crate::cursor;
use crate::db::Db;
use crate::error::{ApiError, ErrorCode};
use crate::hub::FanoutHub;
use crate::models::{AckedCursor, AppendOutcome, EnvelopeRange};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::registry;
use crate::replay;
use crate::store;
use crate::wire::{self, ClientFrame};

use super::AuthedSession;

/// Accepted inbox outcomes share the HTTP 200 path; the body mirrors the
/// matching WS reply.
#[derive(rocket::Responder)]
pub enum InboxReply {
    Send(Json<AppendOutcome>),
    Ack(Json<AckedCursor>),
}

/// `POST /v1/inbox` — the socket-less path: accepts the same `conv.send`
/// and `conv.ack` frames that flow over WebSocket, one per request.
#[post("/v1/inbox", format = "json", data = "<body>")]
pub fn inbox(
    db: &State<Db>,
    hub: &State<FanoutHub>,
    cfg: &State<GatewayConfig>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    session: AuthedSession,
    body: Json<serde_json::Value>,
) -> Result<InboxReply, ApiError> {
    let inbound = wire::parse_client_value(body.into_inner())?;

    match inbound.frame {
        ClientFrame::Send(send) => {
            let env = base64::engine::general_purpose::STANDARD
                .decode(&send.env)
                .map_err(|_| ApiError::new(ErrorCode::InvalidFrame, "env is not valid base64"))?;
            let ctx = AppendCtx {
                db,
                hub,
                cfg,
                limiter: rate_limiter,
                rl: rate_config,
            };
            let outcome = append::append(
                &ctx,
                &send.conv_id,
                &session.user_id,
                &session.device_id,
                &send.msg_id,
                &env,
                send.origin_gateway.as_deref(),
                send.conv_home.as_deref(),
            )?;
            Ok(InboxReply::Send(Json(outcome)))
        }
        ClientFrame::Ack(ack) => {
            let conn = db.conn();
            let acked = cursor::ack(
                &conn,
                &session.session_id,
                &session.user_id,
                &ack.conv_id,
                ack.seq,
            )?;
            Ok(InboxReply::Ack(Json(acked)))
        }
        _ => Err(ApiError::new(
            ErrorCode::InvalidFrame,
            "Inbox accepts conv.send and conv.ack frames",
        )),
    }
}

/// `GET /v1/envelopes` — authenticated range read over the retained window,
/// the HTTP face of the Replay Engine.
#[get("/v1/envelopes?<conv_id>&<from_seq>&<limit>")]
pub fn read_envelopes(
    db: &State<Db>,
    cfg: &State<GatewayConfig>,
    session: AuthedSession,
    conv_id: &str,
    from_seq: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<EnvelopeRange>, ApiError> {
    let conn = db.conn();
    registry::require_member(&conn, conv_id, &session.user_id)?;

    let window = store::conv_window(&conn, conv_id)
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::new(ErrorCode::ConvNotFound, "Unknown conversation"))?;

    let from_seq = from_seq.unwrap_or(window.earliest_retained_seq);
    if from_seq < window.earliest_retained_seq {
        return Err(replay::window_exceeded(from_seq, window));
    }

    let limit = limit.unwrap_or(cfg.replay_chunk).clamp(1, cfg.replay_chunk);
    let envelopes =
        store::read_range(&conn, conv_id, from_seq, limit).map_err(ApiError::storage)?;

    Ok(Json(EnvelopeRange {
        conv_id: conv_id.to_string(),
        earliest_retained_seq: window.earliest_retained_seq,
        next_seq: window.next_seq,
        envelopes,
    }))
}
