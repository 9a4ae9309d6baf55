use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_RESERVATION_MINUTES;
use crate::store::{Occupant, StoreError};

/// A booking rule the proposal breaks. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("the end time must be after the start time")]
    InvalidOrder,
    #[error("a reservation may last at most {} minutes", MAX_RESERVATION_MINUTES)]
    DurationExceeded,
    #[error("reservations cannot start in the past")]
    PastTime,
    #[error("the room has a recurring class at that time")]
    RecurringClassConflict { class_id: Ulid },
    #[error("the room is already reserved at that time")]
    ReservationConflict { reservation_id: Ulid },
    #[error("attendee count {got} must be between {min} and {max}")]
    AttendeeCountOutOfRange { min: u32, max: u32, got: u32 },
}

impl Violation {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Violation::InvalidOrder => "invalid_order",
            Violation::DurationExceeded => "duration_exceeded",
            Violation::PastTime => "past_time",
            Violation::RecurringClassConflict { .. } => "recurring_class_conflict",
            Violation::ReservationConflict { .. } => "reservation_conflict",
            Violation::AttendeeCountOutOfRange { .. } => "attendee_count_out_of_range",
        }
    }
}

impl From<Occupant> for Violation {
    fn from(occupant: Occupant) -> Self {
        match occupant {
            Occupant::Reservation(reservation_id) => Violation::ReservationConflict { reservation_id },
            Occupant::RecurringClass(class_id) => Violation::RecurringClassConflict { class_id },
        }
    }
}

/// Everything a booking operation can fail with. Terminal for the attempt.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("sign in to make or change reservations")]
    Unauthenticated,
    #[error("select a room first")]
    NoRoomSelected,
    #[error("not permitted for the signed-in user")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("a submission is already in progress")]
    SubmissionInFlight,
    #[error("invalid schedule: {0}")]
    InvalidSchedule(&'static str),
    #[error(transparent)]
    Violation(#[from] Violation),
    #[error("the request could not be saved, please try again")]
    PersistenceFailure(#[source] StoreError),
}

impl From<StoreError> for BookingError {
    /// Overlap refusals from the store are the same rule violations the validator
    /// reports; a vanished record is `NotFound`; anything else is a store failure.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(occupant) => BookingError::Violation(occupant.into()),
            StoreError::NotFound(id) => BookingError::NotFound(id),
            other => BookingError::PersistenceFailure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_become_violations() {
        let id = Ulid::new();
        let err: BookingError = StoreError::Conflict(Occupant::Reservation(id)).into();
        assert!(matches!(
            err,
            BookingError::Violation(Violation::ReservationConflict { reservation_id }) if reservation_id == id
        ));
        let err: BookingError = StoreError::Conflict(Occupant::RecurringClass(id)).into();
        assert!(matches!(
            err,
            BookingError::Violation(Violation::RecurringClassConflict { .. })
        ));
    }

    #[test]
    fn wal_errors_are_persistence_failures_with_generic_message() {
        let err: BookingError = StoreError::Wal("disk full".into()).into();
        assert!(matches!(err, BookingError::PersistenceFailure(_)));
        assert!(!err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn attendee_message_names_bounds() {
        let v = Violation::AttendeeCountOutOfRange {
            min: 10,
            max: 30,
            got: 4,
        };
        assert_eq!(v.to_string(), "attendee count 4 must be between 10 and 30");
        assert_eq!(v.reason(), "attendee_count_out_of_range");
    }
}
