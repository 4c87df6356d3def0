//! Hard caps on what a single fleet may hold or a single request may ask for.

pub const MAX_VEHICLES: usize = 100_000;
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 50_000;
pub const MAX_EXTRAS: usize = 1_000;
pub const MAX_EXTRAS_PER_BOOKING: usize = 32;
pub const MAX_IMAGES_PER_VEHICLE: usize = 32;

/// Brand, model, location and name fields.
pub const MAX_SHORT_TEXT_LEN: usize = 256;
/// Descriptions, notes, review comments, image references.
pub const MAX_LONG_TEXT_LEN: usize = 4_096;

/// Longest bookable stay, in days.
pub const MAX_STAY_DAYS: i64 = 366;

pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Reservation listings return at most this many rows, newest first.
pub const MAX_RESERVATION_LISTING: usize = 50;

pub const MAX_IN_CLAUSE_IDS: usize = 1_000;

pub const MIN_VEHICLE_YEAR: i32 = 1900;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
