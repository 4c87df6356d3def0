mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{billable_days, can_cancel, now_ms, price_stay};
pub use error::{EngineError, ErrorKind};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::audit::AuditHub;
use crate::model::*;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

/// A customer's booking request, before pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub notes: String,
    pub extra_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub rating: i64,
    pub comment: String,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, and commits the lot with one fsync before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so the failed batch's bytes do not
    // ride along with the next one.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit of {} events failed: {e}", batch.len());
    }

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// In-memory rental ledger, durable through the WAL.
///
/// Each vehicle's state sits behind its own lock, so bookings on different
/// vehicles never contend. Extras are immutable once created and live in a
/// plain map.
pub struct Engine {
    pub vehicles: DashMap<Ulid, SharedVehicleState>,
    pub extras: DashMap<Ulid, Extra>,
    /// Reservation id → vehicle id.
    pub(super) reservation_to_vehicle: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by map-level inserts (vehicles, extras) across their WAL
    /// append, and exclusively by compaction while it snapshots.
    pub(super) catalog_gate: RwLock<()>,
    pub audit: Arc<AuditHub>,
}

/// Apply a per-vehicle event. The caller holds the vehicle's lock.
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::VehicleUpdated { vehicle } => {
            vs.vehicle = vehicle.clone();
        }
        Event::VehicleStatusChanged { status, .. } => {
            vs.vehicle.status = *status;
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.vehicle_id);
            vs.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = vs.reservation_mut(id) {
                r.status = *status;
            }
        }
        Event::ReviewAdded { review } => {
            vs.reviews.push(review.clone());
        }
        // Handled at the map level.
        Event::VehicleCreated { .. } | Event::VehicleDeleted { .. } | Event::ExtraCreated { .. } => {}
    }
}

/// Vehicle an event belongs to, for events applied under a vehicle lock.
fn event_vehicle_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::VehicleUpdated { vehicle } => Some(vehicle.id),
        Event::VehicleStatusChanged { id, .. } => Some(*id),
        Event::ReservationCreated { reservation } => Some(reservation.vehicle_id),
        Event::ReservationStatusChanged { vehicle_id, .. } => Some(*vehicle_id),
        Event::ReviewAdded { review } => Some(review.vehicle_id),
        Event::VehicleCreated { .. } | Event::VehicleDeleted { .. } | Event::ExtraCreated { .. } => {
            None
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, audit: Arc<AuditHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservation_to_vehicle = DashMap::new();
        let extras = DashMap::new();

        // Rebuild into plain state first; locks are only needed once shared.
        let mut rebuilt: HashMap<Ulid, VehicleState> = HashMap::new();
        for event in &events {
            match event {
                Event::VehicleCreated { vehicle } => {
                    rebuilt.insert(vehicle.id, VehicleState::new(vehicle.clone()));
                }
                Event::VehicleDeleted { id } => {
                    if let Some(vs) = rebuilt.remove(id) {
                        for r in &vs.reservations {
                            reservation_to_vehicle.remove(&r.id);
                        }
                    }
                }
                Event::ExtraCreated { extra } => {
                    extras.insert(extra.id, extra.clone());
                }
                other => {
                    if let Some(vid) = event_vehicle_id(other)
                        && let Some(vs) = rebuilt.get_mut(&vid)
                    {
                        apply_to_vehicle(vs, other, &reservation_to_vehicle);
                    }
                }
            }
        }

        let vehicles = DashMap::with_capacity(rebuilt.len());
        for (id, vs) in rebuilt {
            vehicles.insert(id, Arc::new(RwLock::new(vs)));
        }
        tracing::info!(
            events = events.len(),
            vehicles = vehicles.len(),
            reservations = reservation_to_vehicle.len(),
            "ledger replayed from {}",
            wal_path.display()
        );

        Ok(Self {
            vehicles,
            extras,
            reservation_to_vehicle,
            wal_tx,
            catalog_gate: RwLock::new(()),
            audit,
        })
    }

    /// Hand an event to the group-commit writer and wait for its fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_vehicle_state(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn vehicle_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_vehicle
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// Shared handles to every vehicle, taken without holding any map shard
    /// across an await.
    pub(super) fn vehicle_handles(&self) -> Vec<SharedVehicleState> {
        self.vehicles.iter().map(|e| e.value().clone()).collect()
    }

    /// Write lock on a vehicle that is still in the catalog once acquired.
    /// A delete that won the race removes the map entry before releasing.
    pub(super) async fn lock_vehicle(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vs = self
            .get_vehicle_state(&id)
            .ok_or(EngineError::VehicleNotFound(id))?;
        let guard = vs.write_owned().await;
        if !self.vehicles.contains_key(&id) {
            return Err(EngineError::VehicleNotFound(id));
        }
        Ok(guard)
    }

    /// Reservation → vehicle lookup, then the vehicle's write lock.
    pub(super) async fn lock_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let guard = self
            .lock_vehicle(vehicle_id)
            .await
            .map_err(|_| EngineError::ReservationNotFound(reservation_id))?;
        if guard.reservation(&reservation_id).is_none() {
            return Err(EngineError::ReservationNotFound(reservation_id));
        }
        Ok(guard)
    }

    /// WAL append, then apply to the locked vehicle.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vehicle(vs, event, &self.reservation_to_vehicle);
        Ok(())
    }
}
