use rusqlite::{params, Connection};

use crate::config::GatewayConfig;
use crate::db::now_ms;

/// Interval between pruning sweeps (seconds).
const PRUNE_INTERVAL_SECS: u64 = 60;

/// Result of a single conversation's pruning sweep.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConvPruneDetail {
    pub conv_id: String,
    pub pruned_by_count: i64,
    pub pruned_by_age: i64,
    pub earliest_retained_seq: i64,
}

/// Result of a full pruning sweep across all conversations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PruneResult {
    pub convs_checked: usize,
    pub total_pruned: i64,
    pub details: Vec<ConvPruneDetail>,
}

/// Spawns a background task that periodically prunes envelope logs to the
/// configured window (MAX_RETAINED rows and/or RETAIN_MS age). Pruning
/// advances `earliest_retained_seq`; replay below it becomes
/// `replay_window_exceeded`, and a pruned `msg_id` may be accepted again at
/// a new seq.
pub fn spawn_prune_task(db_path: String, cfg: GatewayConfig) {
    tokio::spawn(async move {
        let conn = match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️  Prune task: failed to open DB: {e}");
                return;
            }
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();

        // Initial delay: let the server start up before the first sweep
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        loop {
            let result = run_prune(&conn, &cfg);
            if result.total_pruned > 0 {
                println!(
                    "🧹 Pruned {} envelopes across {} conversations",
                    result.total_pruned, result.convs_checked
                );
            }
            tokio::time::sleep(std::time::Duration::from_secs(PRUNE_INTERVAL_SECS)).await;
        }
    });
}

/// Execute one pruning sweep across all conversations.
/// Returns structured results for inspection/logging.
pub fn run_prune(conn: &Connection, cfg: &GatewayConfig) -> PruneResult {
    let mut result = PruneResult {
        convs_checked: 0,
        total_pruned: 0,
        details: Vec::new(),
    };

    let conv_ids: Vec<String> = {
        let mut stmt = match conn.prepare("SELECT conv_id FROM rooms") {
            Ok(s) => s,
            Err(_) => return result,
        };
        match stmt.query_map([], |row| row.get(0)) {
            Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
            Err(_) => return result,
        }
    };

    result.convs_checked = conv_ids.len();

    for conv_id in conv_ids {
        let pruned_by_count = prune_by_count(conn, &conv_id, cfg.max_retained);
        let pruned_by_age = if cfg.retain_ms > 0 {
            prune_by_age(conn, &conv_id, cfg.retain_ms)
        } else {
            0
        };

        let earliest = advance_window(conn, &conv_id);
        result.total_pruned += pruned_by_count + pruned_by_age;
        result.details.push(ConvPruneDetail {
            conv_id,
            pruned_by_count,
            pruned_by_age,
            earliest_retained_seq: earliest,
        });
    }

    result
}

/// Delete oldest envelopes beyond the row-count limit. Returns number pruned.
fn prune_by_count(conn: &Connection, conv_id: &str, max_retained: i64) -> i64 {
    if max_retained <= 0 {
        return 0;
    }
    // Smallest seq among the newest max_retained rows; everything below goes.
    let keep_from: Option<i64> = conn
        .query_row(
            "SELECT seq FROM envelopes WHERE conv_id = ?1
             ORDER BY seq DESC LIMIT 1 OFFSET ?2",
            params![conv_id, max_retained - 1],
            |r| r.get(0),
        )
        .ok();
    let Some(keep_from) = keep_from else {
        return 0;
    };
    crate::store::prune_room(conn, conv_id, keep_from).unwrap_or(0)
}

/// Delete envelopes older than the age ceiling. Returns number pruned.
fn prune_by_age(conn: &Connection, conv_id: &str, retain_ms: i64) -> i64 {
    let cutoff = now_ms() - retain_ms;
    conn.execute(
        "DELETE FROM envelopes WHERE conv_id = ?1 AND ts_ms < ?2",
        params![conv_id, cutoff],
    )
    .map(|n| n as i64)
    .unwrap_or(0)
}

/// Recompute `earliest_retained_seq` after deletes: the smallest surviving
/// seq, or the live head when the log is empty.
fn advance_window(conn: &Connection, conv_id: &str) -> i64 {
    conn.execute(
        "UPDATE rooms SET earliest_retained_seq =
             COALESCE((SELECT MIN(seq) FROM envelopes WHERE conv_id = ?1), next_seq)
         WHERE conv_id = ?1",
        params![conv_id],
    )
    .ok();
    conn.query_row(
        "SELECT earliest_retained_seq FROM rooms WHERE conv_id = ?1",
        params![conv_id],
        |r| r.get(0),
    )
    .unwrap_or(1)
}
