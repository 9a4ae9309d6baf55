use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::WalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once `threshold` appends have accumulated since the last compaction.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} appends, threshold {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically compacts the store's WAL.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::{Store, Wal};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomslot_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("compact_threshold.wal");
        let store = WalStore::open(path.clone()).unwrap();
        let building = Building {
            id: Ulid::new(),
            name: "Main".into(),
            floors: 2,
        };
        store.insert_building(building.clone()).await.unwrap();
        let room = Room {
            id: Ulid::new(),
            building_id: building.id,
            name: "M-1".into(),
            capacity: 20,
            floor: 0,
        };
        store.insert_room(room.clone()).await.unwrap();

        let start = chrono::NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let reservation = Reservation {
            id: Ulid::new(),
            room_id: room.id,
            owner_id: Ulid::new(),
            span: Span::new(start, start + chrono::Duration::hours(1)),
            attendees: 8,
            note: None,
            status: ReservationStatus::Approved,
            created_at: start,
        };
        store.insert_reservation(reservation.clone()).await.unwrap();
        store.delete_reservation(reservation.id).await.unwrap();

        assert!(!compact_if_needed(&store, 5).await);
        assert!(compact_if_needed(&store, 4).await);
        assert_eq!(store.appends_since_compact().await, 0);

        // Insert + delete collapsed away.
        drop(store);
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn background_task_compacts_on_first_tick() {
        let store = Arc::new(WalStore::open(test_wal_path("compact_task.wal")).unwrap());
        store
            .insert_building(Building {
                id: Ulid::new(),
                name: "Annex".into(),
                floors: 1,
            })
            .await
            .unwrap();
        assert_eq!(store.appends_since_compact().await, 1);

        let task = tokio::spawn(run_compactor(store.clone(), 1));
        let mut compacted = false;
        for _ in 0..100 {
            if store.appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert!(compacted);
    }
}
