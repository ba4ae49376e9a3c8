use std::env;

/// Deployment-tunable resource caps. All read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `GATEWAY_SECRET` — HMAC key for auth/session token digests
/// - `GATEWAY_ADMIN_KEY` — bearer key for `/v1/admin/*` (empty = disabled)
/// - `MAX_ENV_BYTES` — per-envelope ciphertext ceiling (default: 1 MiB)
/// - `MAX_RETAINED` — envelopes retained per conversation (default: 10000)
/// - `RETAIN_MS` — envelope age ceiling in ms, 0 = no age pruning (default: 7 days)
/// - `SUBSCRIPTION_QUEUE_LEN` — per-subscriber delivery queue (default: 1024)
/// - `SLOW_CONSUMER_MS` — sustained backpressure before disconnect (default: 30000)
/// - `PING_MS` — server ping interval (default: 15000)
/// - `HEARTBEAT_MS` — pong/handshake deadline (default: 45000)
/// - `MAX_SUBSCRIPTIONS_PER_SESSION` (default: 64)
/// - `MAX_SESSIONS_PER_USER` (default: 32)
/// - `MAX_WS_CONNECTIONS_PER_USER` (default: 8)
/// - `SESSION_TTL_MS` — session_token lifetime (default: 12 hours)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub secret: String,
    pub admin_key: String,
    pub max_env_bytes: usize,
    pub max_retained: i64,
    pub retain_ms: i64,
    pub subscription_queue_len: usize,
    pub slow_consumer_ms: u64,
    pub ping_ms: u64,
    pub heartbeat_ms: u64,
    pub max_subscriptions_per_session: usize,
    pub max_sessions_per_user: i64,
    pub max_ws_connections_per_user: usize,
    pub session_ttl_ms: i64,
    /// Page size for replay reads from the store.
    pub replay_chunk: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            secret: "insecure-dev-secret".to_string(),
            admin_key: String::new(),
            max_env_bytes: 1024 * 1024,
            max_retained: 10_000,
            retain_ms: 7 * 24 * 3600 * 1000,
            subscription_queue_len: 1024,
            slow_consumer_ms: 30_000,
            ping_ms: 15_000,
            heartbeat_ms: 45_000,
            max_subscriptions_per_session: 64,
            max_sessions_per_user: 32,
            max_ws_connections_per_user: 8,
            session_ttl_ms: 12 * 3600 * 1000,
            replay_chunk: 500,
        }
    }
}

impl GatewayConfig {
    /// Create a GatewayConfig from environment variables, with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("GATEWAY_SECRET")
            && !val.is_empty()
        {
            config.secret = val;
        } else {
            eprintln!("⚠️  GATEWAY_SECRET not set; using the insecure dev default");
        }
        if let Ok(val) = env::var("GATEWAY_ADMIN_KEY") {
            config.admin_key = val;
        }
        if let Ok(val) = env::var("MAX_ENV_BYTES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_env_bytes = n;
        }
        if let Ok(val) = env::var("MAX_RETAINED")
            && let Ok(n) = val.parse::<i64>()
        {
            config.max_retained = n;
        }
        if let Ok(val) = env::var("RETAIN_MS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.retain_ms = n;
        }
        if let Ok(val) = env::var("SUBSCRIPTION_QUEUE_LEN")
            && let Ok(n) = val.parse::<usize>()
        {
            config.subscription_queue_len = n;
        }
        if let Ok(val) = env::var("SLOW_CONSUMER_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.slow_consumer_ms = n;
        }
        if let Ok(val) = env::var("PING_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.ping_ms = n;
        }
        if let Ok(val) = env::var("HEARTBEAT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.heartbeat_ms = n;
        }
        if let Ok(val) = env::var("MAX_SUBSCRIPTIONS_PER_SESSION")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_subscriptions_per_session = n;
        }
        if let Ok(val) = env::var("MAX_SESSIONS_PER_USER")
            && let Ok(n) = val.parse::<i64>()
        {
            config.max_sessions_per_user = n;
        }
        if let Ok(val) = env::var("MAX_WS_CONNECTIONS_PER_USER")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_ws_connections_per_user = n;
        }
        if let Ok(val) = env::var("SESSION_TTL_MS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.session_ttl_ms = n;
        }

        config
    }
}
