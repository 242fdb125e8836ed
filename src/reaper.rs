use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};
use crate::observability::SESSIONS_EXPIRED_TOTAL;
use crate::session::SessionStore;

/// Background task that periodically drops idle sessions.
pub async fn run_session_sweeper(sessions: Arc<dyn SessionStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let swept = sweep_once(sessions.as_ref());
        if swept > 0 {
            debug!("swept {swept} expired sessions");
        }
    }
}

pub fn sweep_once(sessions: &dyn SessionStore) -> usize {
    let swept = sessions.sweep_expired(now_ms());
    metrics::counter!(SESSIONS_EXPIRED_TOTAL).increment(swept as u64);
    swept
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Compact when at least `threshold` units were appended since the last
/// rewrite. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::session::MemorySessionStore;
    use crate::session::SessionToken;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staybook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_drops_expired_sessions() {
        let sessions = MemorySessionStore::new(0);
        sessions.put(&SessionToken::new(), "reservation", serde_json::json!(null));
        assert_eq!(sweep_once(&sessions), 1);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn compactor_respects_threshold() {
        let path = test_wal_path("compact_threshold.wal");
        let engine = Engine::open(&path).await.unwrap();
        engine.create_room(1, "General's Quarters".into()).await.unwrap();
        engine
            .commit_owner_block(1, span("2050-01-01", "2050-01-05"))
            .await
            .unwrap();

        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 2).await);
        assert_eq!(engine.appends_since_compact().await, 0);

        drop(engine);
        let reopened = Engine::open(&path).await.unwrap();
        assert!(!reopened
            .is_room_free(1, span("2050-01-02", "2050-01-03"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn in_memory_engine_never_compacts() {
        let engine = Engine::in_memory();
        engine.create_room(1, "General's Quarters".into()).await.unwrap();
        assert!(!compact_if_due(&engine, 1).await);
    }
}
