use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEntry, EntityType};
use crate::auth::Actor;
use crate::catalog::VehicleInput;
use crate::limits::*;
use crate::model::*;

use super::conflict::{can_cancel, find_conflict, now_ms, price_stay, validate_dates, validate_text};
use super::{Engine, EngineError, ReservationRequest, ReviewRequest, WalCommand};

fn require_admin(actor: &Actor, what: &'static str) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden(what))
    }
}

impl Engine {
    // ── Vehicles ─────────────────────────────────────────

    pub async fn create_vehicle(
        &self,
        actor: &Actor,
        input: VehicleInput,
    ) -> Result<Vehicle, EngineError> {
        require_admin(actor, "only admins can add cars")?;
        if self.vehicles.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        let vehicle = input.into_vehicle(now_ms())?;

        let gate = self.catalog_gate.read().await;
        if self.vehicles.contains_key(&vehicle.id) {
            return Err(EngineError::AlreadyExists(vehicle.id));
        }
        let event = Event::VehicleCreated {
            vehicle: vehicle.clone(),
        };
        self.wal_append(&event).await?;
        self.vehicles.insert(
            vehicle.id,
            Arc::new(RwLock::new(VehicleState::new(vehicle.clone()))),
        );
        drop(gate);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Create,
            EntityType::Vehicle,
            vehicle.id,
            json!({ "brand": vehicle.brand, "model": vehicle.model }),
        ));
        Ok(vehicle)
    }

    /// Full replace of the catalog fields. Creation time is kept, and the
    /// submitted status is reconciled with the ledger afterwards.
    pub async fn update_vehicle(
        &self,
        actor: &Actor,
        input: VehicleInput,
    ) -> Result<Vehicle, EngineError> {
        require_admin(actor, "only admins can edit cars")?;
        let id = input.id;
        let mut guard = self.lock_vehicle(id).await?;
        let vehicle = input.into_vehicle(guard.vehicle.created_at)?;
        let event = Event::VehicleUpdated {
            vehicle: vehicle.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Update,
            EntityType::Vehicle,
            id,
            json!({ "status": vehicle.status.as_str() }),
        ));
        self.sync_vehicle_status(id).await;
        Ok(vehicle)
    }

    /// Refused while any blocking reservation references the vehicle.
    /// Otherwise drops the vehicle with its reservation and review history.
    pub async fn delete_vehicle(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_admin(actor, "only admins can delete cars")?;
        let guard = self.lock_vehicle(id).await?;
        if guard.has_blocking() {
            return Err(EngineError::HasBlockingReservations(id));
        }
        self.wal_append(&Event::VehicleDeleted { id }).await?;
        for r in &guard.reservations {
            self.reservation_to_vehicle.remove(&r.id);
        }
        self.vehicles.remove(&id);
        drop(guard);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Delete,
            EntityType::Vehicle,
            id,
            serde_json::Value::Null,
        ));
        Ok(())
    }

    // ── Extras ───────────────────────────────────────────

    pub async fn create_extra(&self, actor: &Actor, extra: Extra) -> Result<Extra, EngineError> {
        require_admin(actor, "only admins can add extras")?;
        if extra.name.trim().is_empty() {
            return Err(EngineError::Validation("name is required".into()));
        }
        validate_text("name", &extra.name, MAX_SHORT_TEXT_LEN)?;
        if extra.price_per_day < Money::ZERO {
            return Err(EngineError::Validation(
                "price per day must not be negative".into(),
            ));
        }
        if self.extras.len() >= MAX_EXTRAS {
            return Err(EngineError::LimitExceeded("too many extras"));
        }

        let gate = self.catalog_gate.read().await;
        if self.extras.contains_key(&extra.id) {
            return Err(EngineError::AlreadyExists(extra.id));
        }
        self.wal_append(&Event::ExtraCreated {
            extra: extra.clone(),
        })
        .await?;
        self.extras.insert(extra.id, extra.clone());
        drop(gate);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Create,
            EntityType::Extra,
            extra.id,
            json!({ "name": extra.name, "price_per_day": extra.price_per_day.to_string() }),
        ));
        Ok(extra)
    }

    // ── Reservations ─────────────────────────────────────

    /// Validate, check availability, price and persist a booking.
    ///
    /// The overlap check and the insert run under the vehicle's write lock,
    /// so of two overlapping concurrent requests exactly one succeeds.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        req: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let span = validate_dates(req.start, req.end)?;
        validate_text("pickup location", &req.pickup_location, MAX_SHORT_TEXT_LEN)?;
        validate_text("dropoff location", &req.dropoff_location, MAX_SHORT_TEXT_LEN)?;
        validate_text("notes", &req.notes, MAX_LONG_TEXT_LEN)?;
        if req.extra_ids.len() > MAX_EXTRAS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many extras on one booking"));
        }

        let mut guard = self.lock_vehicle(req.vehicle_id).await?;
        if let Some(existing) = find_conflict(&guard, &span) {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::AlreadyReserved {
                vehicle_id: req.vehicle_id,
                conflicting: existing.id,
            });
        }
        if self.reservation_to_vehicle.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
        }

        let extras = self.extras_by_ids(&req.extra_ids);
        let reservation = Reservation {
            id: req.id,
            vehicle_id: req.vehicle_id,
            customer_id: actor.id.clone(),
            customer_name: actor.name.clone(),
            span,
            pickup_location: req.pickup_location,
            dropoff_location: req.dropoff_location,
            notes: req.notes,
            status: ReservationStatus::Pending,
            total_price: price_stay(&span, guard.vehicle.daily_price, &extras),
            created_at: now_ms(),
            extras,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Create,
            EntityType::Reservation,
            reservation.id,
            json!({
                "car_id": reservation.vehicle_id.to_string(),
                "start_date": reservation.span.start.to_string(),
                "end_date": reservation.span.end.to_string(),
                "total_price": reservation.total_price.to_string(),
            }),
        ));
        self.sync_vehicle_status(reservation.vehicle_id).await;
        Ok(reservation)
    }

    /// Owner-only. A reservation the caller does not own reads as missing.
    pub async fn cancel_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let current = guard
            .reservation(&id)
            .filter(|r| r.customer_id == actor.id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        if !can_cancel(&current, Utc::now()) {
            return Err(EngineError::CannotCancel(id));
        }
        let updated = self
            .update_reservation_status(&mut guard, id, ReservationStatus::Cancelled)
            .await?;
        drop(guard);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Cancel,
            EntityType::Reservation,
            id,
            json!({ "from": current.status.as_str() }),
        ));
        self.sync_vehicle_status(updated.vehicle_id).await;
        Ok(updated)
    }

    /// Admin lifecycle move. The target must be one of approved, denied,
    /// active or completed, and must follow from the current status.
    pub async fn set_reservation_status(
        &self,
        actor: &Actor,
        id: Ulid,
        status: &str,
    ) -> Result<Reservation, EngineError> {
        require_admin(actor, "only admins can change reservation status")?;
        let target: ReservationStatus = status
            .parse()
            .map_err(|_| EngineError::InvalidStatus(status.to_string()))?;
        if !target.is_admin_target() {
            return Err(EngineError::InvalidStatus(status.to_string()));
        }

        let mut guard = self.lock_reservation(id).await?;
        let from = guard
            .reservation(&id)
            .map(|r| r.status)
            .ok_or(EngineError::ReservationNotFound(id))?;
        if !from.admin_can_move_to(target) {
            return Err(EngineError::InvalidTransition { from, to: target });
        }
        let updated = self.update_reservation_status(&mut guard, id, target).await?;
        drop(guard);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::StatusChange,
            EntityType::Reservation,
            id,
            json!({ "from": from.as_str(), "to": target.as_str() }),
        ));
        self.sync_vehicle_status(updated.vehicle_id).await;
        Ok(updated)
    }

    /// Overwrite a reservation's status. Legality is the caller's concern.
    pub(super) async fn update_reservation_status(
        &self,
        vs: &mut VehicleState,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let event = Event::ReservationStatusChanged {
            id,
            vehicle_id: vs.vehicle.id,
            status,
        };
        self.persist_and_apply(vs, &event).await?;
        vs.reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    // ── Reviews ──────────────────────────────────────────

    /// One review per customer per vehicle.
    pub async fn add_review(&self, actor: &Actor, req: ReviewRequest) -> Result<Review, EngineError> {
        let rating = u8::try_from(req.rating)
            .ok()
            .filter(|r| (MIN_RATING..=MAX_RATING).contains(r))
            .ok_or_else(|| EngineError::Validation("rating must be between 1 and 5".into()))?;
        validate_text("comment", &req.comment, MAX_LONG_TEXT_LEN)?;

        let mut guard = self.lock_vehicle(req.vehicle_id).await?;
        if guard.reviews.iter().any(|r| r.id == req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if guard.reviews.iter().any(|r| r.customer_id == actor.id) {
            return Err(EngineError::DuplicateReview {
                vehicle_id: req.vehicle_id,
            });
        }
        let review = Review {
            id: req.id,
            vehicle_id: req.vehicle_id,
            customer_id: actor.id.clone(),
            customer_name: actor.name.clone(),
            rating,
            comment: req.comment,
            created_at: now_ms(),
        };
        self.persist_and_apply(
            &mut guard,
            &Event::ReviewAdded {
                review: review.clone(),
            },
        )
        .await?;
        drop(guard);

        self.audit.record(AuditEntry::new(
            actor,
            AuditAction::Create,
            EntityType::Review,
            review.id,
            json!({ "car_id": review.vehicle_id.to_string(), "rating": review.rating }),
        ));
        Ok(review)
    }

    // ── Status sync ──────────────────────────────────────

    /// Bring the vehicle's status in line with its blocking reservations.
    /// Returns the new status when it changed.
    pub async fn try_sync_vehicle_status(
        &self,
        vehicle_id: Ulid,
    ) -> Result<Option<VehicleStatus>, EngineError> {
        let mut guard = self.lock_vehicle(vehicle_id).await?;
        let current = guard.vehicle.status;
        let target = current.synced(guard.has_blocking());
        if target == current {
            return Ok(None);
        }
        self.persist_and_apply(
            &mut guard,
            &Event::VehicleStatusChanged {
                id: vehicle_id,
                status: target,
            },
        )
        .await?;
        tracing::debug!("car {vehicle_id} status {current} -> {target}");
        Ok(Some(target))
    }

    /// Best-effort [`Engine::try_sync_vehicle_status`]: failures are logged
    /// and counted, never returned. The periodic sweep repairs them.
    pub async fn sync_vehicle_status(&self, vehicle_id: Ulid) {
        if let Err(e) = self.try_sync_vehicle_status(vehicle_id).await {
            metrics::counter!(crate::observability::STATUS_SYNC_FAILURES_TOTAL).increment(1);
            tracing::warn!("status sync for car {vehicle_id} failed: {e}");
        }
    }

    /// Sync every vehicle. Returns how many changed.
    pub async fn sweep_vehicle_statuses(&self) -> usize {
        let ids: Vec<Ulid> = self.vehicles.iter().map(|e| *e.key()).collect();
        let mut repaired = 0;
        for id in ids {
            match self.try_sync_vehicle_status(id).await {
                Ok(Some(_)) => repaired += 1,
                Ok(None) | Err(EngineError::VehicleNotFound(_)) => {}
                Err(e) => tracing::warn!("status sweep for car {id} failed: {e}"),
            }
        }
        repaired
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL as the minimal event set for the current ledger.
    ///
    /// Blocks catalog inserts and holds every vehicle's read lock until the
    /// rewrite is swapped in, so no committed event can fall between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.catalog_gate.write().await;

        let mut events: Vec<Event> = self
            .extras
            .iter()
            .map(|e| Event::ExtraCreated {
                extra: e.value().clone(),
            })
            .collect();

        let mut guards = Vec::new();
        for vs in self.vehicle_handles() {
            let guard = vs.read_owned().await;
            if !self.vehicles.contains_key(&guard.vehicle.id) {
                continue; // deleted while we waited
            }
            events.push(Event::VehicleCreated {
                vehicle: guard.vehicle.clone(),
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
            events.extend(guard.reviews.iter().map(|r| Event::ReviewAdded { review: r.clone() }));
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
