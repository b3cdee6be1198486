use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::WalStore;

/// Periodically compact the log once `threshold` appends have piled up.
/// Runs until the task is aborted.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} appends < {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            warn!("compaction of {} failed: {e}", store.path().display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use ulid::Ulid;

    use crate::model::{Reservation, ReservationStatus};
    use crate::store::ReservationStore;
    use crate::window::Window;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("agenda_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn churn(store: &WalStore, n: usize) {
        for _ in 0..n {
            let r = store
                .insert(Reservation {
                    id: Ulid::new(),
                    owner_id: Ulid::new(),
                    space_id: Ulid::new(),
                    day: "2025-02-02".parse().unwrap(),
                    window: Window::parse("09:00", "10:00").unwrap(),
                    status: ReservationStatus::Confirmed,
                    created_at: 0,
                    updated_at: 0,
                })
                .await
                .unwrap();
            store.delete_by_id(r.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let store = WalStore::open(&test_wal_path("threshold.wal")).unwrap();
        churn(&store, 2).await;
        assert!(!compact_if_due(&store, 5).await);
        assert_eq!(store.appends_since_compact().await, 4);

        churn(&store, 1).await;
        assert!(compact_if_due(&store, 5).await);
        assert_eq!(store.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn background_task_compacts() {
        let store = Arc::new(WalStore::open(&test_wal_path("background.wal")).unwrap());
        churn(&store, 3).await;

        let task = tokio::spawn(run_compactor(store.clone(), 1, Duration::from_millis(10)));
        let mut compacted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
        }
        task.abort();
        assert!(compacted);
        assert!(store.is_empty());
    }
}
