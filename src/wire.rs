use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::now_ms;
use crate::error::{ApiError, ErrorCode};
use crate::models::EnvelopeOut;

/// Protocol version carried in every frame envelope.
pub const WIRE_VERSION: i64 = 1;

/// Correlation ids and msg_ids share the same size cap.
pub const MAX_ID_BYTES: usize = 128;

// --- Client → server frames ---

#[derive(Debug, Deserialize)]
pub struct SessionStartBody {
    pub auth_token: String,
    pub device_id: String,
    #[serde(default)]
    pub device_credential: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionResumeBody {
    pub resume_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub conv_id: String,
    #[serde(default)]
    pub from_seq: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
    pub conv_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub conv_id: String,
    pub seq: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub conv_id: String,
    pub msg_id: String,
    /// Opaque ciphertext, base64. Empty encodes a bare handshake envelope.
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub origin_gateway: Option<String>,
    #[serde(default)]
    pub conv_home: Option<String>,
}

#[derive(Debug)]
pub enum ClientFrame {
    SessionStart(SessionStartBody),
    SessionResume(SessionResumeBody),
    Subscribe(SubscribeBody),
    Unsubscribe(UnsubscribeBody),
    Ack(AckBody),
    Send(SendBody),
    Pong,
}

/// A parsed inbound frame: the typed payload plus its correlation id.
#[derive(Debug)]
pub struct Inbound {
    pub frame: ClientFrame,
    pub id: String,
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidFrame, message)
}

/// Strict decode of one client frame. Unknown frame types are rejected,
/// unknown fields inside known bodies are ignored, and upper-case top-level
/// body keys are rejected to stop silent camelCase schema drift.
pub fn parse_client_frame(text: &str) -> Result<Inbound, ApiError> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| invalid("Frame is not valid JSON"))?;
    parse_client_value(value)
}

/// Same strict decode over an already-parsed JSON value (the HTTP inbox path).
pub fn parse_client_value(value: Value) -> Result<Inbound, ApiError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("Frame must be a JSON object"))?;

    let v = obj.get("v").and_then(Value::as_i64).unwrap_or(0);
    if v != WIRE_VERSION {
        return Err(invalid(format!("Unsupported protocol version {v}")));
    }

    let t = obj
        .get("t")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("Missing frame type 't'"))?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if id.len() > MAX_ID_BYTES {
        return Err(invalid("Frame id exceeds 128 bytes"));
    }

    let body = obj.get("body").cloned().unwrap_or_else(|| json!({}));
    if !body.is_object() {
        return Err(invalid("Frame body must be a JSON object"));
    }
    if let Some(bad) = body
        .as_object()
        .unwrap()
        .keys()
        .find(|k| k.chars().any(|c| c.is_ascii_uppercase()))
    {
        return Err(invalid(format!(
            "Body keys must be snake_case, got '{bad}'"
        )));
    }

    let frame = match t {
        "session.start" => ClientFrame::SessionStart(decode_body(body)?),
        "session.resume" => ClientFrame::SessionResume(decode_body(body)?),
        "conv.subscribe" => ClientFrame::Subscribe(decode_body(body)?),
        "conv.unsubscribe" => ClientFrame::Unsubscribe(decode_body(body)?),
        "conv.ack" => ClientFrame::Ack(decode_body(body)?),
        "conv.send" => ClientFrame::Send(decode_body(body)?),
        "pong" => ClientFrame::Pong,
        other => return Err(invalid(format!("Unknown frame type '{other}'"))),
    };

    Ok(Inbound { frame, id })
}

fn decode_body<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| invalid(format!("Malformed body: {e}")))
}

// --- Server → client frames ---

/// Build one serialized server frame `{v, t, id, ts, body}`. The id echoes
/// the client's correlation id where one applies.
pub fn server_frame(t: &str, id: Option<&str>, body: Value) -> String {
    let frame = json!({
        "v": WIRE_VERSION,
        "t": t,
        "id": id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        "ts": now_ms(),
        "body": body,
    });
    frame.to_string()
}

pub fn session_ready_frame(id: &str, ready: &crate::models::SessionReady) -> String {
    server_frame(
        "session.ready",
        Some(id),
        serde_json::to_value(ready).unwrap_or_else(|_| json!({})),
    )
}

pub fn event_frame(row: &EnvelopeOut) -> String {
    server_frame(
        "conv.event",
        None,
        serde_json::to_value(row).unwrap_or_else(|_| json!({})),
    )
}

/// Cursor-ack confirmation: `{conv_id, seq}`.
pub fn acked_frame(id: &str, conv_id: &str, seq: i64) -> String {
    server_frame("conv.acked", Some(id), json!({ "conv_id": conv_id, "seq": seq }))
}

/// Send receipt, emitted only after the append is durable: the same
/// `conv.acked` type with the idempotency outcome alongside.
pub fn send_receipt_frame(id: &str, outcome: &crate::models::AppendOutcome, msg_id: &str) -> String {
    server_frame(
        "conv.acked",
        Some(id),
        json!({
            "conv_id": outcome.conv_id,
            "seq": outcome.seq,
            "msg_id": msg_id,
            "duplicate": outcome.duplicate,
        }),
    )
}

pub fn error_frame(id: Option<&str>, err: &ApiError) -> String {
    server_frame("error", id, err.body())
}

pub fn ping_frame() -> String {
    server_frame("ping", None, json!({}))
}
