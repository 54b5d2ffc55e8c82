use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites the WAL once enough appends piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        maybe_compact(&engine, threshold).await;
    }
}

/// Compact if more than `threshold` events were appended since the last rewrite.
/// Returns whether a compaction ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(events) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL: {appended} appends rewritten as {events} events");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::model::*;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("dinespace_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(name: &str) -> RestaurantDraft {
        RestaurantDraft {
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn below_threshold_is_left_alone() {
        let path = test_wal_path("below.wal");
        let engine = Engine::new(path.clone(), Arc::new(Settings::default())).unwrap();
        engine.create_restaurant(draft("A")).await.unwrap();

        assert!(!maybe_compact(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn churn_is_compacted_away() {
        let path = test_wal_path("churn.wal");
        let engine = Engine::new(path.clone(), Arc::new(Settings::default())).unwrap();
        let kept = engine.create_restaurant(draft("Kept")).await.unwrap();
        for i in 0..5 {
            let r = engine.create_restaurant(draft(&format!("Temp {i}"))).await.unwrap();
            assert!(engine.delete_restaurant(r.id).await.unwrap());
        }

        assert!(maybe_compact(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events, vec![Event::RestaurantCreated { restaurant: kept }]);
    }
}
