use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation timestamps.
pub type Ms = i64;

/// Prices are exact decimals; never floats.
pub type Money = Decimal;

/// Half-open range of calendar days `[start, end)`.
///
/// A stay ending on the 12th and another starting on the 12th do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// Whole days between start and end.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }
}

/// Closed set of lowercase wire names for a catalog attribute.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            /// Accepts any casing and surrounding whitespace.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $label, value: s.to_string() }),
                }
            }
        }
    };
}

wire_enum!(
    /// Availability of a vehicle. Mirrors the ledger; see `VehicleStatus::synced`.
    VehicleStatus, "vehicle status" {
        Available => "available",
        Rented => "rented",
        Maintenance => "maintenance",
    }
);

wire_enum!(Category, "category" {
    Sedan => "sedan",
    Suv => "suv",
    Hatchback => "hatchback",
    Wagon => "wagon",
    Coupe => "coupe",
    Convertible => "convertible",
    Pickup => "pickup",
    Van => "van",
});

wire_enum!(Transmission, "transmission" {
    Manual => "manual",
    Automatic => "automatic",
});

wire_enum!(Fuel, "fuel" {
    Gasoline => "gasoline",
    Diesel => "diesel",
    Hybrid => "hybrid",
    Electric => "electric",
    Lpg => "lpg",
});

wire_enum!(
    /// Reservation lifecycle:
    ///
    /// ```text
    /// pending -> approved -> active -> completed
    /// pending -> denied
    /// pending | approved -> cancelled   (owner, before the start date)
    /// ```
    ReservationStatus, "reservation status" {
        Pending => "pending",
        Approved => "approved",
        Active => "active",
        Completed => "completed",
        Denied => "denied",
        Cancelled => "cancelled",
    }
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl VehicleStatus {
    /// Status a vehicle settles to given whether any blocking reservation
    /// references it. A blocking reservation always wins; without one, only
    /// `rented` is released back to `available`.
    pub fn synced(self, has_blocking: bool) -> VehicleStatus {
        if has_blocking {
            VehicleStatus::Rented
        } else if self == VehicleStatus::Rented {
            VehicleStatus::Available
        } else {
            self
        }
    }
}

impl ReservationStatus {
    /// Occupies the vehicle's calendar.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Approved | ReservationStatus::Active
        )
    }

    /// Counts toward revenue.
    pub fn is_billable(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Approved | ReservationStatus::Active | ReservationStatus::Completed
        )
    }

    /// Targets an administrator may set directly.
    pub fn is_admin_target(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Approved
                | ReservationStatus::Denied
                | ReservationStatus::Active
                | ReservationStatus::Completed
        )
    }

    /// Admin edges of the lifecycle. Cancellation is not an admin edge.
    pub fn admin_can_move_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Approved)
                | (ReservationStatus::Pending, ReservationStatus::Denied)
                | (ReservationStatus::Approved, ReservationStatus::Active)
                | (ReservationStatus::Active, ReservationStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub category: Category,
    pub transmission: Transmission,
    pub fuel: Fuel,
    pub seats: u32,
    pub daily_price: Money,
    pub status: VehicleStatus,
    pub mileage: u32,
    pub description: String,
    /// Opaque references (URLs or paths) in display order.
    pub images: Vec<String>,
    pub created_at: Ms,
}

impl Vehicle {
    /// `brand model`, lowercased. The haystack for free-text search.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.brand, self.model).to_lowercase()
    }
}

/// Paid add-on, priced per day of the stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    pub id: Ulid,
    pub name: String,
    pub price_per_day: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub customer_id: String,
    pub customer_name: String,
    pub span: DateSpan,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub notes: String,
    pub status: ReservationStatus,
    pub total_price: Money,
    pub created_at: Ms,
    /// Extras as priced at booking time.
    pub extras: Vec<Extra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub customer_id: String,
    pub customer_name: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: Ms,
}

/// A vehicle together with everything booked against it.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    /// All reservations ever made, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    /// Oldest first.
    pub reviews: Vec<Review>,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            reservations: Vec::new(),
            reviews: Vec::new(),
        }
    }

    /// Insert keeping sort order by start date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations of any status whose span overlaps `query`.
    /// Binary search skips everything starting on or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.status.is_blocking())
    }

    pub fn has_blocking(&self) -> bool {
        self.blocking().next().is_some()
    }
}

/// WAL record. One event per state change; a reservation and its extras are
/// a single record, so they become visible together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleCreated {
        vehicle: Vehicle,
    },
    VehicleUpdated {
        vehicle: Vehicle,
    },
    VehicleDeleted {
        id: Ulid,
    },
    VehicleStatusChanged {
        id: Ulid,
        status: VehicleStatus,
    },
    ExtraCreated {
        extra: Extra,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        status: ReservationStatus,
    },
    ReviewAdded {
        review: Review,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One occupied stretch of a vehicle's calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetMetrics {
    pub total_vehicles: usize,
    pub available_vehicles: usize,
    pub active_rentals: usize,
    pub pending_reservations: usize,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSummary {
    /// Newest first.
    pub items: Vec<Review>,
    pub average_rating: f64,
    pub total: usize,
}
