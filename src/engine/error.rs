use chrono::{NaiveDateTime, NaiveTime};
use ulid::Ulid;
use uuid::Uuid;

use crate::model::{format_date_time, Span};

/// How a failure should be presented to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateRangeProblem {
    Missing,
    EndNotAfterStart,
    TooLong { max_days: i64 },
}

#[derive(Debug)]
pub enum EngineError {
    RestaurantNotFound(Ulid),
    SpaceNotFound {
        restaurant_id: Ulid,
        space_id: Uuid,
    },
    ReservationNotFound(Ulid),
    MultiDayReservation {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    InvalidReservationDuration {
        min_minutes: u32,
    },
    OutsideOperatingHours {
        start: NaiveTime,
        end: NaiveTime,
        opens: NaiveTime,
        closes: NaiveTime,
    },
    InvalidPartySize {
        party_size: u32,
        min: u32,
        max: u32,
    },
    InvalidDateRange {
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        problem: DateRangeProblem,
    },
    InvalidPagination {
        page: u32,
        size: u32,
    },
    InvalidInput(String),
    CapacityExceeded {
        restaurant_id: Ulid,
        space_id: Uuid,
        span: Span,
        party_size: u32,
        occupancy: u32,
        max_capacity: u32,
    },
    SpaceInUse {
        space_id: Uuid,
        reservations: usize,
    },
    RestaurantInUse {
        restaurant_id: Ulid,
        reservations: usize,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::RestaurantNotFound(_)
            | EngineError::SpaceNotFound { .. }
            | EngineError::ReservationNotFound(_) => ErrorCategory::NotFound,
            EngineError::MultiDayReservation { .. }
            | EngineError::InvalidReservationDuration { .. }
            | EngineError::OutsideOperatingHours { .. }
            | EngineError::InvalidPartySize { .. }
            | EngineError::InvalidDateRange { .. }
            | EngineError::InvalidPagination { .. }
            | EngineError::InvalidInput(_)
            | EngineError::LimitExceeded(_) => ErrorCategory::Validation,
            EngineError::CapacityExceeded { .. }
            | EngineError::SpaceInUse { .. }
            | EngineError::RestaurantInUse { .. } => ErrorCategory::Conflict,
            EngineError::WalError(_) => ErrorCategory::Internal,
        }
    }

    /// Short stable label, used as a metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::RestaurantNotFound(_) => "restaurant_not_found",
            EngineError::SpaceNotFound { .. } => "space_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::MultiDayReservation { .. } => "multi_day",
            EngineError::InvalidReservationDuration { .. } => "duration",
            EngineError::OutsideOperatingHours { .. } => "operating_hours",
            EngineError::InvalidPartySize { .. } => "party_size",
            EngineError::InvalidDateRange { .. } => "date_range",
            EngineError::InvalidPagination { .. } => "pagination",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::CapacityExceeded { .. } => "capacity",
            EngineError::SpaceInUse { .. } => "space_in_use",
            EngineError::RestaurantInUse { .. } => "restaurant_in_use",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::WalError(_) => "wal",
        }
    }
}

fn opt_time(t: &Option<NaiveDateTime>) -> String {
    t.map(format_date_time).unwrap_or_else(|| "null".into())
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RestaurantNotFound(id) => write!(f, "Restaurant not found with ID: {id}"),
            EngineError::SpaceNotFound { restaurant_id, space_id } => {
                write!(f, "Space not found with ID: {space_id} in restaurant: {restaurant_id}")
            }
            EngineError::ReservationNotFound(id) => write!(f, "Reservation not found with ID: {id}"),
            EngineError::MultiDayReservation { start, end } => write!(
                f,
                "Multi-day reservations are not allowed. Start date: {}, End date: {}",
                start.date(),
                end.date()
            ),
            EngineError::InvalidReservationDuration { min_minutes } => {
                write!(f, "Reservation duration must be at least {min_minutes} minutes")
            }
            EngineError::OutsideOperatingHours { start, end, opens, closes } => write!(
                f,
                "Reservation time {}-{} is outside operating hours {}-{}",
                start.format("%H:%M"),
                end.format("%H:%M"),
                opens.format("%H:%M"),
                closes.format("%H:%M")
            ),
            EngineError::InvalidPartySize { party_size, min, max } => write!(
                f,
                "Party size {party_size} is outside the space capacity range of {min}-{max}"
            ),
            EngineError::InvalidDateRange { start, end, problem } => match problem {
                DateRangeProblem::Missing => {
                    write!(f, "Invalid date range: start and end time are both required")
                }
                DateRangeProblem::EndNotAfterStart => write!(
                    f,
                    "Invalid date range from {} to {}: End time must be after start time",
                    opt_time(start),
                    opt_time(end)
                ),
                DateRangeProblem::TooLong { max_days } => write!(
                    f,
                    "Date range from {} to {} exceeds maximum allowed range of {max_days} days",
                    opt_time(start),
                    opt_time(end)
                ),
            },
            EngineError::InvalidPagination { page, size } => {
                write!(f, "Invalid pagination: page {page}, size {size}")
            }
            EngineError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            EngineError::CapacityExceeded {
                restaurant_id,
                space_id,
                span,
                party_size,
                occupancy,
                max_capacity,
            } => write!(
                f,
                "Cannot accommodate party of {party_size} for space {space_id} in restaurant {restaurant_id} \
                 from {} to {}. Current occupancy: {occupancy}, Max capacity: {max_capacity}, Available: {}",
                format_date_time(span.start),
                format_date_time(span.end),
                max_capacity.saturating_sub(*occupancy)
            ),
            EngineError::SpaceInUse { space_id, reservations } => write!(
                f,
                "Space {space_id} cannot be removed: {reservations} reservation(s) still reference it"
            ),
            EngineError::RestaurantInUse { restaurant_id, reservations } => write!(
                f,
                "Restaurant {restaurant_id} cannot be removed: {reservations} reservation(s) still reference it"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
