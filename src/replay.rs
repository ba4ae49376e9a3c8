use rusqlite::Connection;

use crate::error::{ApiError, ErrorCode};
use crate::store::{self, ConvWindow};

/// Where a subscription starts replaying, with the window observed at
/// resolution time.
#[derive(Debug, Clone, Copy)]
pub struct ReplayStart {
    pub from_seq: i64,
    pub window: ConvWindow,
}

/// Resolve the effective `from_seq` for a subscribe.
///
/// Omitted `from_seq` falls back to the session's stored cursor, and on a
/// first subscribe to the live head (`next_seq`). A request below the
/// retained window is a hard, structured error carrying the current bounds
/// so the client can resubscribe deterministically; a request past the head
/// clamps to live-only.
pub fn resolve_subscribe(
    conn: &Connection,
    session_id: &str,
    conv_id: &str,
    requested_from_seq: Option<i64>,
) -> Result<ReplayStart, ApiError> {
    let window = store::conv_window(conn, conv_id)
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::new(ErrorCode::ConvNotFound, "Unknown conversation"))?;

    let from_seq = match requested_from_seq {
        Some(s) => s,
        None => store::cursor_position(conn, session_id, conv_id)
            .map_err(ApiError::storage)?
            .unwrap_or(window.next_seq),
    };

    if from_seq < window.earliest_retained_seq {
        return Err(window_exceeded(from_seq, window));
    }

    Ok(ReplayStart {
        from_seq: from_seq.min(window.next_seq),
        window,
    })
}

/// Read every retained row in `[from_seq, to_seq_exclusive)`, paging by
/// `chunk`. Transports use this to heal a delivery gap left by a saturated
/// queue before emitting the out-of-band row.
pub fn read_gap(
    conn: &Connection,
    conv_id: &str,
    from_seq: i64,
    to_seq_exclusive: i64,
    chunk: i64,
) -> rusqlite::Result<Vec<crate::models::EnvelopeOut>> {
    let mut rows = Vec::new();
    let mut cursor = from_seq;
    while cursor < to_seq_exclusive {
        let limit = chunk.min(to_seq_exclusive - cursor);
        let page = store::read_range(conn, conv_id, cursor, limit)?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|r| r.seq + 1).unwrap_or(to_seq_exclusive);
        rows.extend(page.into_iter().filter(|r| r.seq < to_seq_exclusive));
    }
    Ok(rows)
}

/// The `replay_window_exceeded` error with recovery bounds:
/// `latest_seq` is the highest seq currently in the log.
pub fn window_exceeded(requested_from_seq: i64, window: ConvWindow) -> ApiError {
    ApiError::with_details(
        ErrorCode::ReplayWindowExceeded,
        "Requested replay start is below the retained window",
        serde_json::json!({
            "requested_from_seq": requested_from_seq,
            "earliest_seq": window.earliest_retained_seq,
            "latest_seq": window.next_seq - 1,
        }),
    )
}
