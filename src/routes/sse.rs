use rocket::response::stream::{Event, EventStream};
use rocket::{get, State};
use tokio::time::{interval, Duration};

use crate::config::GatewayConfig;
use crate::db::{now_ms, Db};
use crate::error::{ApiError, ErrorCode};
use crate::hub::{FanoutHub, REASON_SLOW_CONSUMER};
use crate::registry;
use crate::replay;
use crate::store;

use super::AuthedSession;

/// `GET /v1/sse?conv_id=…&from_seq=…` — one conversation per stream.
///
/// Replays `[from_seq, next_seq)` as `conv.event` entries, then follows live
/// traffic in seq order. Window violations and slow-consumer termination
/// arrive as a single in-stream `error` event before the stream ends;
/// authorization failures reject the request before any stream starts.
#[get("/v1/sse?<conv_id>&<from_seq>")]
pub fn sse_stream(
    db: &State<Db>,
    hub: &State<FanoutHub>,
    cfg: &State<GatewayConfig>,
    session: AuthedSession,
    conv_id: &str,
    from_seq: Option<i64>,
) -> Result<EventStream![Event + 'static], ApiError> {
    {
        let conn = db.conn();
        registry::require_member(&conn, conv_id, &session.user_id)?;
    }

    let db = db.inner().clone();
    let cfg = cfg.inner().clone();
    let conv_id = conv_id.to_string();
    let session_id = session.session_id.clone();

    // Register the live queue before reading history so nothing published
    // during the drain is missed; the next_emit filter dedupes the boundary.
    let mut sub = hub.subscribe(&conv_id, &session_id);

    Ok(EventStream! {
        let start = {
            let conn = db.conn();
            replay::resolve_subscribe(&conn, &session_id, &conv_id, from_seq)
        };
        let start = match start {
            Ok(s) => s,
            Err(err) => {
                yield Event::json(&err.body()).event("error");
                return;
            }
        };

        let mut next_emit = start.from_seq;

        // Historical drain, paged.
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
                        yield Event::json(&row).event("conv.event");
                    }
                }
                Err(e) => {
                    yield Event::json(&ApiError::storage(e).body()).event("error");
                    return;
                }
            }
        }

        let mut heartbeat = interval(Duration::from_millis(cfg.ping_ms));

        loop {
            tokio::select! {
                row = sub.rx.recv() => {
                    match row {
                        Some(row) => {
                            if row.seq < next_emit {
                                continue; // already emitted during the drain
                            }
                            if row.seq > next_emit {
                                // A saturated queue skipped rows; heal from the store.
                                let gap = {
                                    let conn = db.conn();
                                    replay::read_gap(&conn, &conv_id, next_emit, row.seq, cfg.replay_chunk)
                                };
                                match gap {
                                    Ok(rows) => {
                                        for r in rows {
                                            next_emit = r.seq + 1;
                                            yield Event::json(&r).event("conv.event");
                                        }
                                    }
                                    Err(e) => {
                                        yield Event::json(&ApiError::storage(e).body()).event("error");
                                        break;
                                    }
                                }
                            }
                            next_emit = row.seq + 1;
                            yield Event::json(&row).event("conv.event");
                        }
                        None => {
                            if sub.shared.closed_reason() == Some(REASON_SLOW_CONSUMER) {
                                let err = ApiError::new(
                                    ErrorCode::SlowConsumer,
                                    "Delivery queue stayed saturated past the deadline",
                                );
                                yield Event::json(&err.body()).event("error");
                            }
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    // Revocation becomes effective within one heartbeat.
                    let live = {
                        let conn = db.conn();
                        store::session_is_live(&conn, &session_id).unwrap_or(false)
                    };
                    if !live {
                        let err = ApiError::new(ErrorCode::Unauthorized, "Session revoked or expired");
                        yield Event::json(&err.body()).event("error");
                        break;
                    }
                    yield Event::json(&serde_json::json!({ "ts": now_ms() })).event("heartbeat");
                }
            }
        }
    })
}
