use rusqlite::Connection;

use crate::error::{ApiError, ErrorCode};
use crate::models::AckedCursor;
use crate::registry;
use crate::store;

/// `conv.ack`: record that the session has processed envelopes up to `seq`.
///
/// The acked seq must name an envelope the log has handed out
/// (`1 ≤ seq < next_seq`); the cursor only ever moves forward.
pub fn ack(
    conn: &Connection,
    session_id: &str,
    user_id: &str,
    conv_id: &str,
    seq: i64,
) -> Result<AckedCursor, ApiError> {
    registry::require_member(conn, conv_id, user_id)?;

    let window = store::conv_window(conn, conv_id)
        .map_err(ApiError::storage)?
        .ok_or_else(|| ApiError::new(ErrorCode::ConvNotFound, "Unknown conversation"))?;

    if seq < 1 || seq >= window.next_seq {
        return Err(ApiError::with_details(
            ErrorCode::InvalidAck,
            "Acked seq is outside the conversation log",
            serde_json::json!({ "seq": seq, "latest_seq": window.next_seq - 1 }),
        ));
    }

    let next_seq_to_ack =
        store::advance_cursor(conn, session_id, conv_id, seq).map_err(ApiError::storage)?;

    Ok(AckedCursor {
        conv_id: conv_id.to_string(),
        seq,
        next_seq_to_ack,
    })
}
