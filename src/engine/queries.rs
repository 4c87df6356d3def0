use std::collections::HashSet;

use ulid::Ulid;

use crate::auth::Actor;
use crate::catalog::{self, SearchResult, VehicleQuery};
use crate::limits::*;
use crate::model::*;

use super::conflict::find_conflict;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_vehicle(&self, id: Ulid) -> Result<Vehicle, EngineError> {
        let vs = self
            .get_vehicle_state(&id)
            .ok_or(EngineError::VehicleNotFound(id))?;
        let guard = vs.read().await;
        Ok(guard.vehicle.clone())
    }

    /// Snapshot of every vehicle record.
    pub async fn all_vehicles(&self) -> Vec<Vehicle> {
        let mut out = Vec::with_capacity(self.vehicles.len());
        for vs in self.vehicle_handles() {
            out.push(vs.read().await.vehicle.clone());
        }
        out
    }

    pub async fn search_vehicles(&self, query: &VehicleQuery) -> SearchResult {
        catalog::search(self.all_vehicles().await, query)
    }

    /// Ordered by name.
    pub fn list_extras(&self) -> Vec<Extra> {
        let mut extras: Vec<Extra> = self.extras.iter().map(|e| e.value().clone()).collect();
        extras.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        extras
    }

    /// Extras matching any of `ids`, by name. Unknown ids are skipped and
    /// repeats collapse.
    pub fn extras_by_ids(&self, ids: &[Ulid]) -> Vec<Extra> {
        let wanted: HashSet<&Ulid> = ids.iter().collect();
        let mut extras: Vec<Extra> = wanted
            .into_iter()
            .filter_map(|id| self.extras.get(id).map(|e| e.value().clone()))
            .collect();
        extras.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        extras
    }

    /// True iff a blocking reservation on the vehicle overlaps `[start, end)`.
    /// An unknown vehicle or an empty window has no overlaps. Stay limits
    /// apply to bookings, not to this query.
    pub async fn has_overlap(
        &self,
        vehicle_id: Ulid,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> bool {
        if end <= start {
            return false;
        }
        let Some(vs) = self.get_vehicle_state(&vehicle_id) else {
            return false;
        };
        let guard = vs.read().await;
        find_conflict(&guard, &DateSpan::new(start, end)).is_some()
    }

    /// Any blocking reservation at all, dates ignored.
    pub async fn has_blocking_for_vehicle(&self, vehicle_id: Ulid) -> bool {
        match self.get_vehicle_state(&vehicle_id) {
            Some(vs) => vs.read().await.has_blocking(),
            None => false,
        }
    }

    /// Blocking reservations, ascending by start. Empty for unknown vehicles.
    pub async fn blocked_ranges(&self, vehicle_id: Ulid) -> Vec<BlockedRange> {
        let Some(vs) = self.get_vehicle_state(&vehicle_id) else {
            return Vec::new();
        };
        let guard = vs.read().await;
        guard
            .blocking()
            .map(|r| BlockedRange {
                start: r.span.start,
                end: r.span.end,
                status: r.status,
            })
            .collect()
    }

    /// Admins see every reservation, customers their own. Newest first.
    pub async fn list_reservations(&self, actor: &Actor) -> Vec<Reservation> {
        let mut out = Vec::new();
        for vs in self.vehicle_handles() {
            let guard = vs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| actor.is_admin() || r.customer_id == actor.id)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(MAX_RESERVATION_LISTING);
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let guard = vs.read().await;
        guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Newest first, with the average rating (0 when unreviewed).
    pub async fn reviews(&self, vehicle_id: Ulid) -> Result<ReviewSummary, EngineError> {
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::VehicleNotFound(vehicle_id))?;
        let guard = vs.read().await;
        let mut items = guard.reviews.clone();
        drop(guard);

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = items.len();
        let average_rating = if total == 0 {
            0.0
        } else {
            items.iter().map(|r| f64::from(r.rating)).sum::<f64>() / total as f64
        };
        Ok(ReviewSummary {
            items,
            average_rating,
            total,
        })
    }

    /// Fleet-wide counts and revenue over approved, active and completed.
    pub async fn fleet_metrics(&self) -> FleetMetrics {
        let mut m = FleetMetrics {
            total_vehicles: 0,
            available_vehicles: 0,
            active_rentals: 0,
            pending_reservations: 0,
            revenue: Money::ZERO,
        };
        for vs in self.vehicle_handles() {
            let guard = vs.read().await;
            m.total_vehicles += 1;
            if guard.vehicle.status == VehicleStatus::Available {
                m.available_vehicles += 1;
            }
            for r in &guard.reservations {
                match r.status {
                    ReservationStatus::Active => m.active_rentals += 1,
                    ReservationStatus::Pending => m.pending_reservations += 1,
                    _ => {}
                }
                if r.status.is_billable() {
                    m.revenue += r.total_price;
                }
            }
        }
        m
    }
}
