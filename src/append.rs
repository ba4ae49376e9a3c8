use crate::config::GatewayConfig;
use crate::db::Db;
use crate::error::{ApiError, ErrorCode};
use crate::hub::FanoutHub;
use crate::models::{AppendOutcome, EnvelopeOut};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::registry;
use crate::store;
use base64::Engine;

/// Attempts against a busy store before giving up with `storage_unavailable`.
const APPEND_ATTEMPTS: u32 = 3;

/// Everything `append` needs besides the envelope itself. All handles are
/// cheap clones of the managed state; transports build this once per call.
pub struct AppendCtx<'a> {
    pub db: &'a Db,
    pub hub: &'a FanoutHub,
    pub cfg: &'a GatewayConfig,
    pub limiter: &'a RateLimiter,
    pub rl: &'a RateLimitConfig,
}

/// Accept one envelope: validate, dedupe on `(conv_id, msg_id)`, assign the
/// next `seq`, commit durably, and publish to the fan-out hub. The returned
/// outcome is the sender's receipt; it exists only after the row is on disk.
///
/// Publish happens while the store lock is still held, so hub deliveries are
/// observed in global seq order.
pub fn append(
    ctx: &AppendCtx<'_>,
    conv_id: &str,
    sender_user_id: &str,
    device_id: &str,
    msg_id: &str,
    env: &[u8],
    origin_gateway: Option<&str>,
    conv_home: Option<&str>,
) -> Result<AppendOutcome, ApiError> {
    let mut conn = ctx.db.conn();

    registry::require_member(&conn, conv_id, sender_user_id)?;

    if msg_id.is_empty() || msg_id.len() > 128 {
        return Err(ApiError::new(
            ErrorCode::InvalidFrame,
            "msg_id must be 1-128 bytes",
        ));
    }
    if env.len() > ctx.cfg.max_env_bytes {
        return Err(ApiError::with_details(
            ErrorCode::PayloadTooLarge,
            format!("Envelope exceeds {} bytes", ctx.cfg.max_env_bytes),
            serde_json::json!({ "max_env_bytes": ctx.cfg.max_env_bytes }),
        ));
    }

    let rl = ctx.limiter.check_with_info(
        &format!("send:{device_id}:{conv_id}"),
        ctx.rl.sends_max,
        ctx.rl.sends_window_secs,
    );
    if !rl.allowed {
        return Err(rl.into_error("sends"));
    }

    let mut attempt = 0;
    let outcome = loop {
        match store::append_envelope(
            &mut conn,
            conv_id,
            sender_user_id,
            msg_id,
            env,
            origin_gateway,
            conv_home,
        ) {
            Ok(outcome) => break outcome,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                attempt += 1;
                if attempt >= APPEND_ATTEMPTS {
                    return Err(ApiError::new(
                        ErrorCode::StorageUnavailable,
                        "Storage busy, retry the send",
                    ));
                }
                std::thread::sleep(std::time::Duration::from_millis(10 * attempt as u64));
            }
            Err(e) => return Err(ApiError::storage(e)),
        }
    };

    // Duplicates are not republished; the winning append already fanned out.
    if !outcome.duplicate {
        ctx.hub.publish(
            conv_id,
            &EnvelopeOut {
                conv_id: conv_id.to_string(),
                seq: outcome.seq,
                msg_id: msg_id.to_string(),
                env: base64::engine::general_purpose::STANDARD.encode(env),
                ts: outcome.ts_ms,
                origin_gateway: origin_gateway.map(str::to_string),
                conv_home: conv_home.map(str::to_string),
            },
        );
    }

    Ok(outcome)
}
