use serde::{Deserialize, Serialize};

// --- Sessions ---

/// A validated session row. Token digests stay in the store; this carries
/// only what request handling needs.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    pub expires_at_ms: i64,
}

/// Reply to `session.start` / `session.resume`. The only place token values
/// ever appear; they are never persisted or logged.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionReady {
    pub session_id: String,
    pub user_id: String,
    pub session_token: String,
    pub resume_token: String,
    pub expires_at_ms: i64,
}

/// One entry of `session.list` — no token material.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub device_id: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub last_seen_ms: i64,
    pub current: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartSession {
    pub auth_token: String,
    pub device_id: String,
    #[serde(default)]
    pub device_credential: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeSession {
    pub resume_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeSessions {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub include_self: bool,
}

// --- Conversations & membership ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Conversation {
    pub conv_id: String,
    pub created_by: String,
    pub created_at_ms: i64,
    pub earliest_retained_seq: i64,
    pub next_seq: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemberEntry {
    pub user_id: String,
    pub role: String,
    pub added_at_ms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembersResponse {
    pub conv_id: String,
    pub members: Vec<MemberEntry>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateConv {
    #[serde(default)]
    pub conv_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteMember {
    pub conv_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MemberTarget {
    pub conv_id: String,
    pub user_id: String,
}

// --- Envelopes ---

/// Wire shape of one fanned-out envelope (`conv.event` body). `env` is the
/// opaque ciphertext, base64-encoded; the gateway never interprets it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnvelopeOut {
    pub conv_id: String,
    pub seq: i64,
    pub msg_id: String,
    pub env: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conv_home: Option<String>,
}

/// Result of an accepted (or deduplicated) append.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppendOutcome {
    pub conv_id: String,
    pub seq: i64,
    pub ts_ms: i64,
    pub duplicate: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnvelopeRange {
    pub conv_id: String,
    pub earliest_retained_seq: i64,
    pub next_seq: i64,
    pub envelopes: Vec<EnvelopeOut>,
}

/// One conversation as seen by a session: membership role, the retained
/// window, and how far behind this session's cursor is.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversationSummary {
    pub conv_id: String,
    pub role: String,
    pub earliest_retained_seq: i64,
    pub next_seq: i64,
    pub latest_seq: i64,
    pub next_seq_to_ack: i64,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
    pub count: usize,
    pub total_unread: i64,
}

// --- Cursors ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AckedCursor {
    pub conv_id: String,
    pub seq: i64,
    pub next_seq_to_ack: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CursorInfo {
    pub conv_id: String,
    pub next_seq_to_ack: i64,
    pub unread_count: i64,
}
