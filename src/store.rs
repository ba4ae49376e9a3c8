use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::now_ms;
use crate::models::{AppendOutcome, Conversation, EnvelopeOut, MemberEntry, SessionInfo, SessionRow};

/// Current replay window of a conversation: `[earliest_retained_seq, next_seq)`.
#[derive(Debug, Clone, Copy)]
pub struct ConvWindow {
    pub earliest_retained_seq: i64,
    pub next_seq: i64,
}

fn encode_env(env: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(env)
}

// --- Conversations ---

pub fn conv_window(conn: &Connection, conv_id: &str) -> rusqlite::Result<Option<ConvWindow>> {
    conn.query_row(
        "SELECT earliest_retained_seq, next_seq FROM rooms WHERE conv_id = ?1",
        params![conv_id],
        |r| {
            Ok(ConvWindow {
                earliest_retained_seq: r.get(0)?,
                next_seq: r.get(1)?,
            })
        },
    )
    .optional()
}

pub fn get_conversation(conn: &Connection, conv_id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        "SELECT conv_id, created_by, created_at_ms, earliest_retained_seq, next_seq
         FROM rooms WHERE conv_id = ?1",
        params![conv_id],
        |r| {
            Ok(Conversation {
                conv_id: r.get(0)?,
                created_by: r.get(1)?,
                created_at_ms: r.get(2)?,
                earliest_retained_seq: r.get(3)?,
                next_seq: r.get(4)?,
            })
        },
    )
    .optional()
}

/// Create a conversation with its first owner in one transaction.
/// Returns false if the conv_id already exists.
pub fn create_conversation(
    conn: &mut Connection,
    conv_id: &str,
    created_by: &str,
) -> rusqlite::Result<bool> {
    let now = now_ms();
    let tx = conn.transaction()?;
    let inserted = match tx.execute(
        "INSERT INTO rooms (conv_id, created_by, created_at_ms) VALUES (?1, ?2, ?3)",
        params![conv_id, created_by, now],
    ) {
        Ok(_) => true,
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    tx.execute(
        "INSERT INTO members (conv_id, user_id, role, added_at_ms) VALUES (?1, ?2, 'owner', ?3)",
        params![conv_id, created_by, now],
    )?;
    tx.commit()?;
    Ok(inserted)
}

// --- Membership ---

pub fn role_of(conn: &Connection, conv_id: &str, user_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT role FROM members WHERE conv_id = ?1 AND user_id = ?2",
        params![conv_id, user_id],
        |r| r.get(0),
    )
    .optional()
}

pub fn upsert_member(
    conn: &Connection,
    conv_id: &str,
    user_id: &str,
    role: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO members (conv_id, user_id, role, added_at_ms) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(conv_id, user_id) DO UPDATE SET role = excluded.role",
        params![conv_id, user_id, role, now_ms()],
    )?;
    Ok(())
}

pub fn remove_member(conn: &Connection, conv_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM members WHERE conv_id = ?1 AND user_id = ?2",
        params![conv_id, user_id],
    )?;
    Ok(n > 0)
}

pub fn list_members(conn: &Connection, conv_id: &str) -> rusqlite::Result<Vec<MemberEntry>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, role, added_at_ms FROM members WHERE conv_id = ?1 ORDER BY added_at_ms, user_id",
    )?;
    let rows = stmt
        .query_map(params![conv_id], |r| {
            Ok(MemberEntry {
                user_id: r.get(0)?,
                role: r.get(1)?,
                added_at_ms: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Conversations the user belongs to, with their role, ordered by recency
/// of the latest envelope.
pub fn list_user_conversations(
    conn: &Connection,
    user_id: &str,
) -> rusqlite::Result<Vec<(Conversation, String)>> {
    let mut stmt = conn.prepare(
        "SELECT r.conv_id, r.created_by, r.created_at_ms, r.earliest_retained_seq, r.next_seq,
                m.role,
                (SELECT MAX(ts_ms) FROM envelopes WHERE conv_id = r.conv_id) AS last_activity
         FROM rooms r JOIN members m ON m.conv_id = r.conv_id
         WHERE m.user_id = ?1
         ORDER BY last_activity IS NULL, last_activity DESC, r.conv_id",
    )?;
    let rows = stmt
        .query_map(params![user_id], |r| {
            Ok((
                Conversation {
                    conv_id: r.get(0)?,
                    created_by: r.get(1)?,
                    created_at_ms: r.get(2)?,
                    earliest_retained_seq: r.get(3)?,
                    next_seq: r.get(4)?,
                },
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn owner_count(conn: &Connection, conv_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM members WHERE conv_id = ?1 AND role = 'owner'",
        params![conv_id],
        |r| r.get(0),
    )
}

// --- Envelope log ---

/// Append one envelope under the conversation's write serialization.
/// Idempotent on `(conv_id, msg_id)` within retention: an existing row wins
/// and is returned with `duplicate = true`. Otherwise allocates
/// `seq = next_seq`, inserts the row, and bumps `next_seq`, all in one
/// durable transaction.
pub fn append_envelope(
    conn: &mut Connection,
    conv_id: &str,
    sender_user_id: &str,
    msg_id: &str,
    env: &[u8],
    origin_gateway: Option<&str>,
    conv_home: Option<&str>,
) -> rusqlite::Result<AppendOutcome> {
    let tx = conn.transaction()?;

    let existing: Option<(i64, i64)> = tx
        .query_row(
            "SELECT seq, ts_ms FROM envelopes WHERE conv_id = ?1 AND msg_id = ?2",
            params![conv_id, msg_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((seq, ts_ms)) = existing {
        return Ok(AppendOutcome {
            conv_id: conv_id.to_string(),
            seq,
            ts_ms,
            duplicate: true,
        });
    }

    let seq: i64 = tx.query_row(
        "SELECT next_seq FROM rooms WHERE conv_id = ?1",
        params![conv_id],
        |r| r.get(0),
    )?;
    let ts_ms = now_ms();
    tx.execute(
        "INSERT INTO envelopes (conv_id, seq, msg_id, sender_user_id, env, ts_ms, origin_gateway, conv_home)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![conv_id, seq, msg_id, sender_user_id, env, ts_ms, origin_gateway, conv_home],
    )?;
    tx.execute(
        "UPDATE rooms SET next_seq = next_seq + 1 WHERE conv_id = ?1",
        params![conv_id],
    )?;
    tx.commit()?;

    Ok(AppendOutcome {
        conv_id: conv_id.to_string(),
        seq,
        ts_ms,
        duplicate: false,
    })
}

/// Rows in `[from_seq, from_seq + limit)` in ascending seq order, wire-ready.
pub fn read_range(
    conn: &Connection,
    conv_id: &str,
    from_seq: i64,
    limit: i64,
) -> rusqlite::Result<Vec<EnvelopeOut>> {
    let mut stmt = conn.prepare(
        "SELECT seq, msg_id, env, ts_ms, origin_gateway, conv_home
         FROM envelopes WHERE conv_id = ?1 AND seq >= ?2 ORDER BY seq ASC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![conv_id, from_seq, limit], |r| {
            let env: Vec<u8> = r.get(2)?;
            Ok(EnvelopeOut {
                conv_id: conv_id.to_string(),
                seq: r.get(0)?,
                msg_id: r.get(1)?,
                env: encode_env(&env),
                ts: r.get(3)?,
                origin_gateway: r.get(4)?,
                conv_home: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop envelopes below `up_to_seq` and advance `earliest_retained_seq` to
/// the smallest surviving seq (the live head when the log empties out).
/// Returns the number of rows pruned.
pub fn prune_room(conn: &Connection, conv_id: &str, up_to_seq: i64) -> rusqlite::Result<i64> {
    let pruned = conn.execute(
        "DELETE FROM envelopes WHERE conv_id = ?1 AND seq < ?2",
        params![conv_id, up_to_seq],
    )?;
    conn.execute(
        "UPDATE rooms SET earliest_retained_seq =
             COALESCE((SELECT MIN(seq) FROM envelopes WHERE conv_id = ?1), next_seq)
         WHERE conv_id = ?1",
        params![conv_id],
    )?;
    Ok(pruned as i64)
}

// --- Cursors ---

pub fn cursor_position(
    conn: &Connection,
    session_id: &str,
    conv_id: &str,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT next_seq_to_ack FROM cursors WHERE session_id = ?1 AND conv_id = ?2",
        params![session_id, conv_id],
        |r| r.get(0),
    )
    .optional()
}

/// Advance the cursor to `max(current, seq + 1)`; never regresses.
/// Returns the resulting `next_seq_to_ack`.
pub fn advance_cursor(
    conn: &Connection,
    session_id: &str,
    conv_id: &str,
    seq: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO cursors (session_id, conv_id, next_seq_to_ack, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, conv_id) DO UPDATE
             SET next_seq_to_ack = MAX(next_seq_to_ack, excluded.next_seq_to_ack),
                 updated_at_ms = excluded.updated_at_ms",
        params![session_id, conv_id, seq + 1, now_ms()],
    )?;
    conn.query_row(
        "SELECT next_seq_to_ack FROM cursors WHERE session_id = ?1 AND conv_id = ?2",
        params![session_id, conv_id],
        |r| r.get(0),
    )
}

// --- Sessions ---

#[allow(clippy::too_many_arguments)]
pub fn insert_session(
    conn: &Connection,
    session_id: &str,
    user_id: &str,
    device_id: &str,
    session_token_hash: &str,
    resume_token_hash: &str,
    expires_at_ms: i64,
) -> rusqlite::Result<()> {
    let now = now_ms();
    conn.execute(
        "INSERT INTO sessions (session_id, user_id, device_id, session_token_hash,
                               resume_token_hash, created_at_ms, expires_at_ms, last_seen_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?6)",
        params![
            session_id,
            user_id,
            device_id,
            session_token_hash,
            resume_token_hash,
            now,
            expires_at_ms
        ],
    )?;
    Ok(())
}

fn session_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: r.get(0)?,
        user_id: r.get(1)?,
        device_id: r.get(2)?,
        expires_at_ms: r.get(3)?,
    })
}

/// Look up a live session by session-token digest. Expired or revoked rows
/// never match, so revocation takes effect on the next request.
pub fn session_by_token_hash(
    conn: &Connection,
    token_hash: &str,
) -> rusqlite::Result<Option<SessionRow>> {
    conn.query_row(
        "SELECT session_id, user_id, device_id, expires_at_ms FROM sessions
         WHERE session_token_hash = ?1 AND revoked_at_ms IS NULL AND expires_at_ms > ?2",
        params![token_hash, now_ms()],
        session_from_row,
    )
    .optional()
}

pub fn session_by_resume_hash(
    conn: &Connection,
    resume_hash: &str,
) -> rusqlite::Result<Option<SessionRow>> {
    conn.query_row(
        "SELECT session_id, user_id, device_id, expires_at_ms FROM sessions
         WHERE resume_token_hash = ?1 AND revoked_at_ms IS NULL",
        params![resume_hash],
        session_from_row,
    )
    .optional()
}

/// True while the session has not been revoked or expired. Long-lived
/// transports recheck this per inbound frame.
pub fn session_is_live(conn: &Connection, session_id: &str) -> rusqlite::Result<bool> {
    let live: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sessions
             WHERE session_id = ?1 AND revoked_at_ms IS NULL AND expires_at_ms > ?2",
            params![session_id, now_ms()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(live.is_some())
}

pub fn rotate_session_tokens(
    conn: &Connection,
    session_id: &str,
    session_token_hash: &str,
    resume_token_hash: &str,
    expires_at_ms: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions SET session_token_hash = ?2, resume_token_hash = ?3,
                             expires_at_ms = ?4, last_seen_ms = ?5
         WHERE session_id = ?1",
        params![
            session_id,
            session_token_hash,
            resume_token_hash,
            expires_at_ms,
            now_ms()
        ],
    )?;
    Ok(())
}

pub fn touch_session(conn: &Connection, session_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions SET last_seen_ms = ?2 WHERE session_id = ?1",
        params![session_id, now_ms()],
    )?;
    Ok(())
}

pub fn revoke_session(conn: &Connection, session_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE sessions SET revoked_at_ms = ?2 WHERE session_id = ?1 AND revoked_at_ms IS NULL",
        params![session_id, now_ms()],
    )?;
    Ok(n > 0)
}

/// Revoke all of a user's sessions, optionally keeping one alive.
pub fn revoke_user_sessions(
    conn: &Connection,
    user_id: &str,
    keep_session_id: Option<&str>,
) -> rusqlite::Result<usize> {
    let now = now_ms();
    let n = match keep_session_id {
        Some(keep) => conn.execute(
            "UPDATE sessions SET revoked_at_ms = ?2
             WHERE user_id = ?1 AND session_id != ?3 AND revoked_at_ms IS NULL",
            params![user_id, now, keep],
        )?,
        None => conn.execute(
            "UPDATE sessions SET revoked_at_ms = ?2 WHERE user_id = ?1 AND revoked_at_ms IS NULL",
            params![user_id, now],
        )?,
    };
    Ok(n)
}

pub fn revoke_device_sessions(
    conn: &Connection,
    user_id: &str,
    device_id: &str,
) -> rusqlite::Result<usize> {
    let n = conn.execute(
        "UPDATE sessions SET revoked_at_ms = ?3
         WHERE user_id = ?1 AND device_id = ?2 AND revoked_at_ms IS NULL",
        params![user_id, device_id, now_ms()],
    )?;
    Ok(n)
}

pub fn active_session_count(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sessions
         WHERE user_id = ?1 AND revoked_at_ms IS NULL AND expires_at_ms > ?2",
        params![user_id, now_ms()],
        |r| r.get(0),
    )
}

pub fn list_user_sessions(
    conn: &Connection,
    user_id: &str,
    current_session_id: &str,
) -> rusqlite::Result<Vec<SessionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, device_id, created_at_ms, expires_at_ms, last_seen_ms
         FROM sessions
         WHERE user_id = ?1 AND revoked_at_ms IS NULL AND expires_at_ms > ?2
         ORDER BY created_at_ms DESC",
    )?;
    let rows = stmt
        .query_map(params![user_id, now_ms()], |r| {
            let session_id: String = r.get(0)?;
            Ok(SessionInfo {
                current: session_id == current_session_id,
                session_id,
                device_id: r.get(1)?,
                created_at_ms: r.get(2)?,
                expires_at_ms: r.get(3)?,
                last_seen_ms: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
