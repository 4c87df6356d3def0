use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// How often the compactor checks the WAL growth.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically reconcile every vehicle's status with its reservations.
/// Catches syncs that failed after a committed reservation change.
pub async fn run_status_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let repaired = engine.sweep_vehicle_statuses().await;
        if repaired > 0 {
            metrics::counter!(crate::observability::STATUS_SWEEP_REPAIRS_TOTAL)
                .increment(repaired as u64);
            info!("status sweep repaired {repaired} cars");
        }
    }
}

/// Compact the WAL once `threshold` appends have piled up since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("WAL compacted");
        }
    }
}

/// Returns whether a compaction ran and succeeded.
async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    if engine.wal_appends_since_compact().await < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditHub;
    use crate::auth::{Actor, AdminList};
    use crate::catalog::VehicleInput;
    use crate::engine::ReservationRequest;
    use crate::model::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn car(id: Ulid) -> VehicleInput {
        VehicleInput {
            id,
            brand: "Skoda".into(),
            model: "Octavia".into(),
            year: 2021,
            category: "sedan".into(),
            transmission: "manual".into(),
            fuel: "diesel".into(),
            seats: 5,
            daily_price: Decimal::from(40),
            status: None,
            mileage: 0,
            description: String::new(),
            images: vec![],
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path, Arc::new(AuditHub::new())).unwrap();
        let admin = Actor::system();
        for _ in 0..3 {
            engine.create_vehicle(&admin, car(Ulid::new())).await.unwrap();
        }

        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.all_vehicles().await.len(), 3);
    }

    #[tokio::test]
    async fn sweep_is_noop_once_booking_synced() {
        let path = test_wal_path("sweep.wal");
        let engine = Engine::new(path, Arc::new(AuditHub::new())).unwrap();
        let admin = Actor::system();
        let id = Ulid::new();
        engine.create_vehicle(&admin, car(id)).await.unwrap();

        let alice = AdminList::default().resolve("alice");
        let req = ReservationRequest {
            id: Ulid::new(),
            vehicle_id: id,
            start: NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2030, 5, 4).unwrap(),
            pickup_location: "Airport".into(),
            dropoff_location: "Airport".into(),
            notes: String::new(),
            extra_ids: vec![],
        };
        engine.create_reservation(&alice, req).await.unwrap();
        assert_eq!(engine.get_vehicle(id).await.unwrap().status, VehicleStatus::Rented);

        // Nothing left to repair once the booking path has synced.
        assert_eq!(engine.sweep_vehicle_statuses().await, 0);
    }
}
