use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL from its current state once
/// enough appends have accumulated since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Compact when appends since the last compaction reach `threshold`.
/// Returns the number of events written, if a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match engine.compact_wal().await {
        Ok(count) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL: {appends} appends -> {count} events");
            Some(count)
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarDay;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("vacancy_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();

        let property = Ulid::new();
        let room_type = Ulid::new();
        engine.create_property(property, "Quayside".into(), true).await.unwrap();
        engine
            .create_room_type(room_type, property, "Double".into(), true)
            .await
            .unwrap();
        let ci = CalendarDay::from_ymd(2026, 8, 1).unwrap();
        let co = CalendarDay::from_ymd(2026, 8, 3).unwrap();
        for _ in 0..5 {
            let id = Ulid::new();
            engine
                .record_reservation(id, room_type, StayWindow::new(ci, co).unwrap(), ReservationStatus::Confirmed)
                .await
                .unwrap();
            engine.set_reservation_status(id, ReservationStatus::Cancelled).await.unwrap();
        }

        assert_eq!(engine.wal_appends_since_compact().await, 12);
        assert_eq!(compact_if_needed(&engine, 100).await, None);

        // property + room type + 5 reservations (final status folded in)
        assert_eq!(compact_if_needed(&engine, 12).await, Some(7));
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 7);
        assert!(replayed.iter().all(|e| !matches!(e, Event::ReservationStatusChanged { .. })));
    }
}
