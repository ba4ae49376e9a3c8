use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the gateway's SQLite store. A single writer connection
/// behind a mutex is the append serialization point: appends are serial per
/// conversation by construction.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

/// Epoch milliseconds; all persisted timestamps use this.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate an opaque 256-bit token: `<prefix>_<64 hex chars>`.
pub fn generate_token(prefix: &str) -> String {
    format!(
        "{}_{:032x}{:032x}",
        prefix,
        uuid::Uuid::new_v4().as_u128(),
        uuid::Uuid::new_v4().as_u128()
    )
}

/// Generate a conversation id: `conv_<32 hex chars>`.
pub fn generate_conv_id() -> String {
    format!("conv_{:032x}", uuid::Uuid::new_v4().as_u128())
}

/// Generate a session id: `sid_<32 hex chars>`.
pub fn generate_session_id() -> String {
    format!("sid_{:032x}", uuid::Uuid::new_v4().as_u128())
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        // FULL sync: an accepted append must survive power loss before it is acked.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )
        .expect("Failed to set pragmas");
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate();
        db
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rooms (
                conv_id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                earliest_retained_seq INTEGER NOT NULL DEFAULT 1,
                next_seq INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS members (
                conv_id TEXT NOT NULL REFERENCES rooms(conv_id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                added_at_ms INTEGER NOT NULL,
                PRIMARY KEY (conv_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_members_user ON members(user_id);

            CREATE TABLE IF NOT EXISTS envelopes (
                conv_id TEXT NOT NULL REFERENCES rooms(conv_id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                msg_id TEXT NOT NULL,
                sender_user_id TEXT NOT NULL,
                env BLOB NOT NULL,
                ts_ms INTEGER NOT NULL,
                origin_gateway TEXT,
                conv_home TEXT,
                PRIMARY KEY (conv_id, seq)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_envelopes_msg_id
                ON envelopes(conv_id, msg_id);

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                session_token_hash TEXT NOT NULL,
                resume_token_hash TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                revoked_at_ms INTEGER,
                last_seen_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_session_token
                ON sessions(session_token_hash);
            CREATE INDEX IF NOT EXISTS idx_sessions_resume_token
                ON sessions(resume_token_hash);

            CREATE TABLE IF NOT EXISTS cursors (
                session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                conv_id TEXT NOT NULL REFERENCES rooms(conv_id) ON DELETE CASCADE,
                next_seq_to_ack INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY (session_id, conv_id)
            );",
        )
        .expect("Failed to run migrations");
    }
}
