use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// End strictly after start, and no longer than the longest bookable stay.
pub(crate) fn validate_dates(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidDateRange);
    }
    let span = DateSpan::new(start, end);
    if span.days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

pub(crate) fn validate_text(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::Validation(format!("{field} too long")));
    }
    Ok(())
}

/// First blocking reservation on the vehicle that overlaps `span`.
pub(crate) fn find_conflict<'a>(vs: &'a VehicleState, span: &DateSpan) -> Option<&'a Reservation> {
    vs.overlapping(span).find(|r| r.status.is_blocking())
}

/// Whole days of the stay, never less than one.
pub fn billable_days(span: &DateSpan) -> i64 {
    span.days().max(1)
}

/// `days × (daily price + Σ extras per day)`. Extras are priced as passed in.
pub fn price_stay(span: &DateSpan, daily_price: Money, extras: &[Extra]) -> Money {
    let per_day = extras
        .iter()
        .fold(daily_price, |acc, e| acc + e.price_per_day);
    per_day * Money::from(billable_days(span))
}

/// Cancellable while pending or approved and the start date (midnight UTC)
/// is still in the future.
pub fn can_cancel(reservation: &Reservation, now: DateTime<Utc>) -> bool {
    let starts_at = reservation.span.start.and_time(NaiveTime::MIN).and_utc();
    now < starts_at
        && matches!(
            reservation.status,
            ReservationStatus::Pending | ReservationStatus::Approved
        )
}
