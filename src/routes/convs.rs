use rocket::serde::json::Json;
use rocket::{get, State};

use crate::db::Db;
use crate::error::ApiError;
use crate::models::{ConversationSummary, ConversationsResponse, CursorInfo};
use crate::registry;
use crate::store;

use super::AuthedSession;

/// A session with no cursor yet is behind by the whole retained window.
fn resolve_cursor(
    conn: &rusqlite::Connection,
    session_id: &str,
    conv_id: &str,
    earliest_retained_seq: i64,
) -> rusqlite::Result<i64> {
    Ok(store::cursor_position(conn, session_id, conv_id)?.unwrap_or(earliest_retained_seq))
}

/// `GET /v1/conversations` — every conversation the caller belongs to, with
/// the retained window and this session's unread backlog.
#[get("/v1/conversations")]
pub fn list_conversations(
    db: &State<Db>,
    session: AuthedSession,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let conn = db.conn();
    let rows = store::list_user_conversations(&conn, &session.user_id).map_err(ApiError::storage)?;

    let mut conversations = Vec::with_capacity(rows.len());
    let mut total_unread = 0i64;
    for (conv, role) in rows {
        let next_seq_to_ack = resolve_cursor(
            &conn,
            &session.session_id,
            &conv.conv_id,
            conv.earliest_retained_seq,
        )
        .map_err(ApiError::storage)?;
        let unread_count = (conv.next_seq - next_seq_to_ack).max(0);
        total_unread += unread_count;
        conversations.push(ConversationSummary {
            conv_id: conv.conv_id,
            role,
            earliest_retained_seq: conv.earliest_retained_seq,
            next_seq: conv.next_seq,
            latest_seq: conv.next_seq - 1,
            next_seq_to_ack,
            unread_count,
        });
    }

    Ok(Json(ConversationsResponse {
        count: conversations.len(),
        conversations,
        total_unread,
    }))
}

/// `GET /v1/cursors?conv_id=…` — this session's acknowledgement position.
#[get("/v1/cursors?<conv_id>")]
pub fn get_cursor(
    db: &State<Db>,
    session: AuthedSession,
    conv_id: &str,
) -> Result<Json<CursorInfo>, ApiError> {
    let conn = db.conn();
    registry::require_member(&conn, conv_id, &session.user_id)?;

    let window = store::conv_window(&conn, conv_id)
        .map_err(ApiError::storage)?
        .ok_or_else(|| {
            ApiError::new(crate::error::ErrorCode::ConvNotFound, "Unknown conversation")
        })?;
    let next_seq_to_ack = resolve_cursor(
        &conn,
        &session.session_id,
        conv_id,
        window.earliest_retained_seq,
    )
    .map_err(ApiError::storage)?;

    Ok(Json(CursorInfo {
        conv_id: conv_id.to_string(),
        next_seq_to_ack,
        unread_count: (window.next_seq - next_seq_to_ack).max(0),
    }))
}
