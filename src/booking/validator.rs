use chrono::Duration;
use ulid::Ulid;

use super::error::Violation;
use crate::limits::MAX_RESERVATION_MINUTES;
use crate::model::*;

/// Checks a proposed booking against a consistent snapshot of one room.
///
/// Never mutates anything; the caller fetches `classes` and `reservations`
/// for the proposal's room and date(s) beforehand.
pub struct BookingValidator<'a> {
    pub room: &'a Room,
    pub classes: &'a [RecurringClass],
    pub reservations: &'a [Reservation],
    pub now: Instant,
}

impl<'a> BookingValidator<'a> {
    pub fn new(
        room: &'a Room,
        classes: &'a [RecurringClass],
        reservations: &'a [Reservation],
        now: Instant,
    ) -> Self {
        Self {
            room,
            classes,
            reservations,
            now,
        }
    }

    /// First broken rule, in fixed order: ordering, duration, past, recurring
    /// class, approved reservation, attendee count.
    pub fn validate(
        &self,
        span: &Span,
        attendees: u32,
        excluding: Option<Ulid>,
    ) -> Result<(), Violation> {
        Self::check_timing(span, self.now)?;
        if let Some(class) = self.class_conflict(span) {
            return Err(Violation::RecurringClassConflict { class_id: class.id });
        }
        if let Some(other) = self.reservation_conflict(span, excluding) {
            return Err(Violation::ReservationConflict {
                reservation_id: other.id,
            });
        }
        Self::check_attendees(self.room, attendees)
    }

    /// The first three rules. They need no snapshot, so callers run them
    /// before fetching one.
    pub fn check_timing(span: &Span, now: Instant) -> Result<(), Violation> {
        if span.end <= span.start {
            return Err(Violation::InvalidOrder);
        }
        if span.duration() > Duration::minutes(MAX_RESERVATION_MINUTES) {
            return Err(Violation::DurationExceeded);
        }
        if span.start < now {
            return Err(Violation::PastTime);
        }
        Ok(())
    }

    /// At least a third of the room, at most its capacity.
    pub fn check_attendees(room: &Room, attendees: u32) -> Result<(), Violation> {
        let (min, max) = (room.min_attendees(), room.capacity);
        if attendees < min || attendees > max {
            return Err(Violation::AttendeeCountOutOfRange {
                min,
                max,
                got: attendees,
            });
        }
        Ok(())
    }

    fn class_conflict(&self, span: &Span) -> Option<&'a RecurringClass> {
        self.classes
            .iter()
            .filter(|c| c.room_id == self.room.id)
            .find(|c| c.clashes_with(span))
    }

    fn reservation_conflict(&self, span: &Span, excluding: Option<Ulid>) -> Option<&'a Reservation> {
        self.reservations.iter().find(|r| {
            r.room_id == self.room.id
                && r.is_approved()
                && Some(r.id) != excluding
                && r.span.overlaps(span)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, Weekday};

    fn at(d: u32, h: u32, m: u32) -> Instant {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn room() -> Room {
        Room {
            id: Ulid::new(),
            building_id: Ulid::new(),
            name: "M-101".into(),
            capacity: 30,
            floor: 1,
        }
    }

    fn approved(room: &Room, start: Instant, end: Instant) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: room.id,
            owner_id: Ulid::new(),
            span: Span::new(start, end),
            attendees: 12,
            note: None,
            status: ReservationStatus::Approved,
            created_at: at(1, 0, 0),
        }
    }

    fn monday_class(room: &Room) -> RecurringClass {
        RecurringClass {
            id: Ulid::new(),
            room_id: room.id,
            name: "Physics".into(),
            weekday: Weekday::Mon,
            start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
        }
    }

    // Sunday morning before the test week.
    fn now() -> Instant {
        at(2, 8, 0)
    }

    #[test]
    fn exactly_two_hours_accepted() {
        let room = room();
        let v = BookingValidator::new(&room, &[], &[], now());
        let span = Span::new(at(3, 9, 0), at(3, 11, 0));
        assert_eq!(v.validate(&span, 10, None), Ok(()));
    }

    #[test]
    fn recurring_class_overlap_rejected() {
        let room = room();
        let class = monday_class(&room);
        let classes = [class.clone()];
        let v = BookingValidator::new(&room, &classes, &[], now());
        let span = Span::new(at(3, 10, 30), at(3, 11, 30));
        assert_eq!(
            v.validate(&span, 10, None),
            Err(Violation::RecurringClassConflict { class_id: class.id })
        );
        // Same hours on Tuesday are fine.
        let tuesday = Span::new(at(4, 10, 30), at(4, 11, 30));
        assert_eq!(v.validate(&tuesday, 10, None), Ok(()));
        // Touching the class end is fine.
        let after = Span::new(at(3, 11, 30), at(3, 12, 30));
        assert_eq!(v.validate(&after, 10, None), Ok(()));
    }

    #[test]
    fn approved_reservation_overlap_rejected() {
        let room = room();
        let existing = approved(&room, at(3, 14, 0), at(3, 16, 0));
        let reservations = [existing.clone()];
        let v = BookingValidator::new(&room, &[], &reservations, now());
        let span = Span::new(at(3, 15, 0), at(3, 16, 0));
        assert_eq!(
            v.validate(&span, 10, None),
            Err(Violation::ReservationConflict {
                reservation_id: existing.id
            })
        );
    }

    #[test]
    fn mid_hour_collision_rejected() {
        let room = room();
        let reservations = [approved(&room, at(3, 14, 30), at(3, 15, 30))];
        let v = BookingValidator::new(&room, &[], &reservations, now());
        let span = Span::new(at(3, 13, 45), at(3, 14, 45));
        assert!(matches!(
            v.validate(&span, 10, None),
            Err(Violation::ReservationConflict { .. })
        ));
    }

    #[test]
    fn three_hours_rejected() {
        let room = room();
        let v = BookingValidator::new(&room, &[], &[], now());
        let span = Span::new(at(3, 9, 0), at(3, 12, 0));
        assert_eq!(v.validate(&span, 10, None), Err(Violation::DurationExceeded));
    }

    #[test]
    fn yesterday_rejected() {
        let room = room();
        let v = BookingValidator::new(&room, &[], &[], at(4, 8, 0));
        let span = Span::new(at(3, 9, 0), at(3, 10, 0));
        assert_eq!(v.validate(&span, 10, None), Err(Violation::PastTime));
    }

    #[test]
    fn start_equal_to_now_accepted() {
        let room = room();
        let v = BookingValidator::new(&room, &[], &[], at(3, 9, 0));
        let span = Span::new(at(3, 9, 0), at(3, 10, 0));
        assert_eq!(v.validate(&span, 10, None), Ok(()));
    }

    #[test]
    fn inverted_and_empty_rejected() {
        let room = room();
        let v = BookingValidator::new(&room, &[], &[], now());
        let inverted = Span::new(at(3, 11, 0), at(3, 10, 0));
        assert_eq!(v.validate(&inverted, 10, None), Err(Violation::InvalidOrder));
        let empty = Span::new(at(3, 10, 0), at(3, 10, 0));
        assert_eq!(v.validate(&empty, 10, None), Err(Violation::InvalidOrder));
    }

    #[test]
    fn attendee_bounds() {
        let room = room();
        let v = BookingValidator::new(&room, &[], &[], now());
        let span = Span::new(at(3, 9, 0), at(3, 10, 0));
        assert_eq!(
            v.validate(&span, 9, None),
            Err(Violation::AttendeeCountOutOfRange {
                min: 10,
                max: 30,
                got: 9
            })
        );
        assert_eq!(v.validate(&span, 30, None), Ok(()));
        assert!(v.validate(&span, 31, None).is_err());
    }

    #[test]
    fn order_short_circuits() {
        let room = room();
        let class = monday_class(&room);
        let classes = [class];
        // Past, too long, overlapping a class, and too few attendees: past wins over class,
        // duration wins over past.
        let v = BookingValidator::new(&room, &classes, &[], at(5, 0, 0));
        let span = Span::new(at(3, 9, 0), at(3, 12, 0));
        assert_eq!(v.validate(&span, 1, None), Err(Violation::DurationExceeded));
        let span = Span::new(at(3, 10, 0), at(3, 11, 0));
        assert_eq!(v.validate(&span, 1, None), Err(Violation::PastTime));
    }

    #[test]
    fn snapshot_free_checks_match_validate() {
        let room = room();
        let inverted = Span::new(at(3, 11, 0), at(3, 10, 0));
        assert_eq!(
            BookingValidator::check_timing(&inverted, now()),
            Err(Violation::InvalidOrder)
        );
        let fine = Span::new(at(3, 9, 0), at(3, 10, 0));
        assert_eq!(BookingValidator::check_timing(&fine, now()), Ok(()));
        assert_eq!(
            BookingValidator::check_timing(&fine, at(3, 9, 1)),
            Err(Violation::PastTime)
        );
        assert_eq!(BookingValidator::check_attendees(&room, 10), Ok(()));
        assert!(BookingValidator::check_attendees(&room, 31).is_err());
    }

    #[test]
    fn self_excluded_during_edit() {
        let room = room();
        let mine = approved(&room, at(3, 14, 0), at(3, 15, 0));
        let reservations = [mine.clone()];
        let v = BookingValidator::new(&room, &[], &reservations, now());
        let shifted = Span::new(at(3, 14, 30), at(3, 15, 30));
        assert_eq!(v.validate(&shifted, 10, Some(mine.id)), Ok(()));
        assert!(v.validate(&shifted, 10, None).is_err());
    }

    #[test]
    fn only_approved_reservations_conflict() {
        let room = room();
        let mut pending = approved(&room, at(3, 14, 0), at(3, 15, 0));
        pending.status = ReservationStatus::Pending;
        let mut rejected = approved(&room, at(3, 14, 0), at(3, 15, 0));
        rejected.status = ReservationStatus::Rejected;
        let reservations = [pending, rejected];
        let v = BookingValidator::new(&room, &[], &reservations, now());
        let span = Span::new(at(3, 14, 0), at(3, 15, 0));
        assert_eq!(v.validate(&span, 10, None), Ok(()));
    }

    #[test]
    fn class_on_next_day_caught_across_midnight() {
        let room = room();
        let class = RecurringClass {
            id: Ulid::new(),
            room_id: room.id,
            name: "Night lab".into(),
            weekday: Weekday::Tue,
            start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        };
        let classes = [class.clone()];
        let v = BookingValidator::new(&room, &classes, &[], now());
        let span = Span::new(at(3, 23, 30), at(4, 0, 30));
        assert_eq!(
            v.validate(&span, 10, None),
            Err(Violation::RecurringClassConflict { class_id: class.id })
        );
    }
}
