use std::collections::HashMap;

use rocket::futures::stream::{SplitSink, SplitStream};
use rocket::futures::{SinkExt, StreamExt};
use rocket::{get, State};
use rocket_ws as ws;
use rusqlite::params;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, Instant};

use crate::append::{self, AppendCtx};
use crate::config::GatewayConfig;
use crate::cursor;
use crate::db::Db;
use crate::error::{ApiError, ErrorCode};
use crate::hub::{ConnectionTracker, FanoutHub, Subscription, REASON_SLOW_CONSUMER};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::registry;
use crate::replay::{self, ReplayStart};
use crate::sessions;
use crate::store;
use crate::wire::{self, ClientFrame};

use super::ClientIp;

use base64::Engine;

/// Repeated malformed frames close the socket.
const MAX_INVALID_FRAMES: u32 = 3;

/// Connection-level outbound queue; per-subscription queues sit behind it.
const OUT_QUEUE_LEN: usize = 64;

type WsSink = SplitSink<ws::stream::DuplexStream, ws::Message>;
type WsSource = SplitStream<ws::stream::DuplexStream>;

struct WsCtx {
    db: Db,
    hub: FanoutHub,
    conns: ConnectionTracker,
    cfg: GatewayConfig,
    limiter: RateLimiter,
    rl: RateLimitConfig,
    ip: String,
}

struct ConnState {
    session_id: String,
    user_id: String,
    device_id: String,
}

/// `GET /v1/ws` — the socket carries JSON frames `{v, t, id, ts, body}`.
/// The first frame must establish or resume a session; everything after is
/// subscribe/ack/send plus ping/pong liveness.
#[get("/v1/ws")]
pub fn ws_connect(
    upgrade: ws::WebSocket,
    db: &State<Db>,
    hub: &State<FanoutHub>,
    conns: &State<ConnectionTracker>,
    cfg: &State<GatewayConfig>,
    limiter: &State<RateLimiter>,
    rl: &State<RateLimitConfig>,
    ip: ClientIp,
) -> ws::Channel<'static> {
    let ctx = WsCtx {
        db: db.inner().clone(),
        hub: hub.inner().clone(),
        conns: conns.inner().clone(),
        cfg: cfg.inner().clone(),
        limiter: limiter.inner().clone(),
        rl: rl.inner().clone(),
        ip: ip.0,
    };
    upgrade.channel(move |stream| {
        Box::pin(async move {
            run_session(stream, ctx).await;
            Ok(())
        })
    })
}

async fn run_session(stream: ws::stream::DuplexStream, ctx: WsCtx) {
    let (mut sink, mut source) = stream.split();

    let Some(conn_state) = handshake(&mut sink, &mut source, &ctx).await else {
        return;
    };

    let Some(_slot) = ctx
        .conns
        .try_acquire(&conn_state.user_id, ctx.cfg.max_ws_connections_per_user)
    else {
        let err = ApiError::new(
            ErrorCode::RateLimited,
            "Connection limit reached for this user",
        );
        let _ = sink.send(ws::Message::Text(wire::error_frame(None, &err))).await;
        return;
    };

    // Subscription forwarders feed serialized frames through one bounded
    // outbound queue; socket backpressure propagates back to the hub queues.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUT_QUEUE_LEN);
    let mut subs: HashMap<String, JoinHandle<()>> = HashMap::new();

    let mut ping = interval(Duration::from_millis(ctx.cfg.ping_ms));
    ping.tick().await; // the first tick fires immediately
    let mut last_pong = Instant::now();
    let mut invalid_frames = 0u32;

    loop {
        tokio::select! {
            msg = source.next() => {
                match msg {
                    Some(Ok(ws::Message::Text(text))) => {
                        let live = {
                            let conn = ctx.db.conn();
                            store::session_is_live(&conn, &conn_state.session_id).unwrap_or(false)
                        };
                        if !live {
                            let err = ApiError::new(ErrorCode::Unauthorized, "Session revoked or expired");
                            let _ = sink.send(ws::Message::Text(wire::error_frame(None, &err))).await;
                            break;
                        }
                        match wire::parse_client_frame(&text) {
                            Err(err) => {
                                invalid_frames += 1;
                                let _ = sink
                                    .send(ws::Message::Text(wire::error_frame(None, &err)))
                                    .await;
                                if invalid_frames >= MAX_INVALID_FRAMES {
                                    break;
                                }
                            }
                            Ok(inbound) => {
                                let reply = dispatch_frame(
                                    &ctx,
                                    &conn_state,
                                    &mut subs,
                                    &out_tx,
                                    &inbound.id,
                                    inbound.frame,
                                    &mut last_pong,
                                );
                                if let Some(frame) = reply
                                    && sink.send(ws::Message::Text(frame)).await.is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(ws::Message::Ping(data))) => {
                        let _ = sink.send(ws::Message::Pong(data)).await;
                    }
                    Some(Ok(ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            Some(frame) = out_rx.recv() => {
                if sink.send(ws::Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if last_pong.elapsed() > Duration::from_millis(ctx.cfg.heartbeat_ms) {
                    break;
                }
                // Revocation becomes effective within one heartbeat even on
                // a connection that only listens.
                let live = {
                    let conn = ctx.db.conn();
                    store::session_is_live(&conn, &conn_state.session_id).unwrap_or(false)
                };
                if !live {
                    let err = ApiError::new(ErrorCode::Unauthorized, "Session revoked or expired");
                    let _ = sink.send(ws::Message::Text(wire::error_frame(None, &err))).await;
                    break;
                }
                if sink.send(ws::Message::Text(wire::ping_frame())).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, handle) in subs {
        handle.abort();
    }
}

/// First frame: `session.start` or `session.resume`, inside the heartbeat
/// deadline. Replies `session.ready` or a single fatal `error`.
async fn handshake(sink: &mut WsSink, source: &mut WsSource, ctx: &WsCtx) -> Option<ConnState> {
    let deadline = Duration::from_millis(ctx.cfg.heartbeat_ms);
    let text = match timeout(deadline, source.next()).await {
        Ok(Some(Ok(ws::Message::Text(text)))) => text,
        _ => return None,
    };

    let inbound = match wire::parse_client_frame(&text) {
        Ok(i) => i,
        Err(err) => {
            let _ = sink
                .send(ws::Message::Text(wire::error_frame(None, &err)))
                .await;
            return None;
        }
    };

    let outcome = match inbound.frame {
        ClientFrame::SessionStart(body) => {
            let rl = ctx.limiter.check_with_info(
                &format!("session_start:{}", ctx.ip),
                ctx.rl.session_starts_max,
                ctx.rl.session_starts_window_secs,
            );
            if !rl.allowed {
                Err(rl.into_error("session starts"))
            } else {
                let conn = ctx.db.conn();
                sessions::start_session(
                    &conn,
                    &ctx.cfg,
                    &body.auth_token,
                    &body.device_id,
                    body.device_credential.as_deref(),
                )
                .map(
                    |ready| {
                        let state = ConnState {
                            session_id: ready.session_id.clone(),
                            user_id: ready.user_id.clone(),
                            device_id: body.device_id.clone(),
                        };
                        (ready, state)
                    },
                )
            }
        }
        ClientFrame::SessionResume(body) => {
            let conn = ctx.db.conn();
            sessions::resume_session(&conn, &ctx.cfg, &body.resume_token).map(|ready| {
                let device_id: String = conn
                    .query_row(
                        "SELECT device_id FROM sessions WHERE session_id = ?1",
                        params![ready.session_id],
                        |r| r.get(0),
                    )
                    .unwrap_or_default();
                let state = ConnState {
                    session_id: ready.session_id.clone(),
                    user_id: ready.user_id.clone(),
                    device_id,
                };
                (ready, state)
            })
        }
        _ => Err(ApiError::new(
            ErrorCode::InvalidFrame,
            "Handshake must be session.start or session.resume",
        )),
    };

    match outcome {
        Ok((ready, state)) => {
            let frame = wire::session_ready_frame(&inbound.id, &ready);
            if sink.send(ws::Message::Text(frame)).await.is_err() {
                return None;
            }
            Some(state)
        }
        Err(err) => {
            let _ = sink
                .send(ws::Message::Text(wire::error_frame(Some(&inbound.id), &err)))
                .await;
            None
        }
    }
}

/// Handle one admitted frame; the returned string, if any, is the direct
/// reply to write to the socket.
fn dispatch_frame(
    ctx: &WsCtx,
    conn_state: &ConnState,
    subs: &mut HashMap<String, JoinHandle<()>>,
    out_tx: &mpsc::Sender<String>,
    id: &str,
    frame: ClientFrame,
    last_pong: &mut Instant,
) -> Option<String> {
    match frame {
        ClientFrame::Pong => {
            *last_pong = Instant::now();
            None
        }
        ClientFrame::SessionStart(_) | ClientFrame::SessionResume(_) => {
            let err = ApiError::new(ErrorCode::InvalidFrame, "Session is already established");
            Some(wire::error_frame(Some(id), &err))
        }
        ClientFrame::Subscribe(body) => {
            subs.retain(|_, handle| !handle.is_finished());
            if subs.len() >= ctx.cfg.max_subscriptions_per_session {
                let err = ApiError::new(
                    ErrorCode::RateLimited,
                    "Subscription limit reached for this session",
                );
                return Some(wire::error_frame(Some(id), &err));
            }

            let resolved = {
                let conn = ctx.db.conn();
                registry::require_member(&conn, &body.conv_id, &conn_state.user_id).and_then(|_| {
                    replay::resolve_subscribe(
                        &conn,
                        &conn_state.session_id,
                        &body.conv_id,
                        body.from_seq,
                    )
                })
            };
            match resolved {
                Ok(start) => {
                    let sub = ctx.hub.subscribe(&body.conv_id, &conn_state.session_id);
                    let handle = spawn_forwarder(
                        ctx.db.clone(),
                        ctx.cfg.clone(),
                        body.conv_id.clone(),
                        start,
                        sub,
                        out_tx.clone(),
                    );
                    subs.insert(body.conv_id, handle);
                    None
                }
                Err(err) => Some(wire::error_frame(Some(id), &err)),
            }
        }
        ClientFrame::Unsubscribe(body) => {
            // Aborting the forwarder drops its Subscription, which
            // deregisters from the hub.
            if let Some(handle) = subs.remove(&body.conv_id) {
                handle.abort();
            }
            None
        }
        ClientFrame::Ack(body) => {
            let result = {
                let conn = ctx.db.conn();
                cursor::ack(
                    &conn,
                    &conn_state.session_id,
                    &conn_state.user_id,
                    &body.conv_id,
                    body.seq,
                )
            };
            Some(match result {
                Ok(acked) => wire::acked_frame(id, &acked.conv_id, acked.seq),
                Err(err) => wire::error_frame(Some(id), &err),
            })
        }
        ClientFrame::Send(body) => {
            let env = match base64::engine::general_purpose::STANDARD.decode(&body.env) {
                Ok(b) => b,
                Err(_) => {
                    let err = ApiError::new(ErrorCode::InvalidFrame, "env is not valid base64");
                    return Some(wire::error_frame(Some(id), &err));
                }
            };
            let append_ctx = AppendCtx {
                db: &ctx.db,
                hub: &ctx.hub,
                cfg: &ctx.cfg,
                limiter: &ctx.limiter,
                rl: &ctx.rl,
            };
            let result = append::append(
                &append_ctx,
                &body.conv_id,
                &conn_state.user_id,
                &conn_state.device_id,
                &body.msg_id,
                &env,
                body.origin_gateway.as_deref(),
                body.conv_home.as_deref(),
            );
            Some(match result {
                Ok(outcome) => wire::send_receipt_frame(id, &outcome, &body.msg_id),
                Err(err) => wire::error_frame(Some(id), &err),
            })
        }
    }
}

/// Owned task per subscription: drain history `[from_seq, head)`, then follow
/// the live queue, healing any queue-saturation gap from the store so the
/// client sees dense ascending seq. Exits when the socket or the hub closes
/// the channel; a slow-consumer close emits one final `error` frame.
fn spawn_forwarder(
    db: Db,
    cfg: GatewayConfig,
    conv_id: String,
    start: ReplayStart,
    mut sub: Subscription,
    out: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next_emit = start.from_seq;

        loop {
            let page = {
                let conn = db.conn();
                store::read_range(&conn, &conv_id, next_emit, cfg.replay_chunk)
            };
            match page {
                Ok(rows) => {
                    if rows.is_empty() {
                        break;
                    }
                    for row in rows {
                        next_emit = row.seq + 1;
                        if out.send(wire::event_frame(&row)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = out
                        .send(wire::error_frame(None, &ApiError::storage(e)))
                        .await;
                    return;
                }
            }
        }

        while let Some(row) = sub.rx.recv().await {
            if row.seq < next_emit {
                continue; // duplicate at the drain/live boundary
            }
            if row.seq > next_emit {
                let gap = {
                    let conn = db.conn();
                    replay::read_gap(&conn, &conv_id, next_emit, row.seq, cfg.replay_chunk)
                };
                match gap {
                    Ok(rows) => {
                        for r in rows {
                            next_emit = r.seq + 1;
                            if out.send(wire::event_frame(&r)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = out
                            .send(wire::error_frame(None, &ApiError::storage(e)))
                            .await;
                        return;
                    }
                }
            }
            next_emit = row.seq + 1;
            if out.send(wire::event_frame(&row)).await.is_err() {
                return;
            }
        }

        if sub.shared.closed_reason() == Some(REASON_SLOW_CONSUMER) {
            let err = ApiError::with_details(
                ErrorCode::SlowConsumer,
                "Delivery queue stayed saturated past the deadline",
                serde_json::json!({ "conv_id": conv_id }),
            );
            let _ = out.send(wire::error_frame(None, &err)).await;
        }
    })
}
