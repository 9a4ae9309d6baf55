//! Property-based tests for the booking rules using proptest.
//!
//! Whatever the proposal, an accepted booking is short, correctly sized,
//! not in the past, and never collides with an approved booking or a class.

use chrono::{Duration, NaiveDate, NaiveTime, Weekday};
use proptest::prelude::*;
use ulid::Ulid;

use roomslot::booking::{BookingValidator, Violation};
use roomslot::model::*;
use roomslot::store::{Store, WalStore};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Start within the week of 2024-06-03, on a 15-minute grid.
fn arb_start() -> impl Strategy<Value = Instant> {
    (0i64..5, 7i64..22, 0i64..4).prop_map(|(day, hour, quarter)| {
        monday() + Duration::days(day) + Duration::hours(hour) + Duration::minutes(quarter * 15)
    })
}

/// Includes empty, inverted and over-long proposals.
fn arb_minutes() -> impl Strategy<Value = i64> {
    prop_oneof![-60i64..=0, 15i64..=120, 121i64..=240]
}

fn arb_capacity() -> impl Strategy<Value = u32> {
    1u32..=200
}

fn arb_attendees() -> impl Strategy<Value = u32> {
    0u32..=250
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn monday() -> Instant {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn room(capacity: u32) -> Room {
    Room {
        id: Ulid::new(),
        building_id: Ulid::new(),
        name: "P-1".into(),
        capacity,
        floor: 0,
    }
}

fn approved(room: &Room, span: Span, attendees: u32) -> Reservation {
    Reservation {
        id: Ulid::new(),
        room_id: room.id,
        owner_id: Ulid::new(),
        span,
        attendees,
        note: None,
        status: ReservationStatus::Approved,
        created_at: monday(),
    }
}

fn tuesday_class(room: &Room) -> RecurringClass {
    RecurringClass {
        id: Ulid::new(),
        room_id: room.id,
        name: "Lab".into(),
        weekday: Weekday::Tue,
        start: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
    }
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Property 1: accepted bookings last more than zero and at most two hours
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn accepted_duration_is_bounded(start in arb_start(), minutes in arb_minutes()) {
        let room = room(30);
        let span = Span::new(start, start + Duration::minutes(minutes));
        let v = BookingValidator::new(&room, &[], &[], monday());
        let result = v.validate(&span, 10, None);
        if result.is_ok() {
            prop_assert!(span.duration() > Duration::zero());
            prop_assert!(span.duration() <= Duration::hours(2));
        }
        if minutes <= 0 {
            prop_assert_eq!(result, Err(Violation::InvalidOrder));
        } else if minutes > 120 {
            prop_assert_eq!(result, Err(Violation::DurationExceeded));
        }
    }
}

// ---------------------------------------------------------------------------
// Property 2: accepted attendee counts fill a third of the room and fit in it
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn accepted_attendees_are_bounded(
        capacity in arb_capacity(),
        attendees in arb_attendees(),
        start in arb_start(),
    ) {
        let room = room(capacity);
        let span = Span::new(start, start + Duration::hours(1));
        let v = BookingValidator::new(&room, &[], &[], monday());
        let ok = v.validate(&span, attendees, None).is_ok();
        let in_range = capacity.div_ceil(3) <= attendees && attendees <= capacity;
        prop_assert_eq!(ok, in_range);
    }
}

// ---------------------------------------------------------------------------
// Property 3: nothing starting before now is accepted
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn past_starts_rejected(start in arb_start(), lag in 1i64..=600) {
        let room = room(30);
        let span = Span::new(start, start + Duration::hours(1));
        let now = start + Duration::minutes(lag);
        let v = BookingValidator::new(&room, &[], &[], now);
        prop_assert_eq!(v.validate(&span, 10, None), Err(Violation::PastTime));
    }
}

// ---------------------------------------------------------------------------
// Property 4: greedily accepting proposals never produces an overlap
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn accepted_set_never_overlaps(
        proposals in prop::collection::vec((arb_start(), 15i64..=120), 1..40),
    ) {
        let room = room(30);
        let classes = vec![tuesday_class(&room)];
        let mut accepted: Vec<Reservation> = Vec::new();

        for (start, minutes) in proposals {
            let span = Span::new(start, start + Duration::minutes(minutes));
            let v = BookingValidator::new(&room, &classes, &accepted, monday());
            if v.validate(&span, 10, None).is_ok() {
                accepted.push(approved(&room, span, 10));
            }
        }

        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                prop_assert!(!a.span.overlaps(&b.span), "{:?} overlaps {:?}", a.span, b.span);
            }
            for d in a.span.dates() {
                if let Some(occ) = classes[0].occurs_on(d) {
                    prop_assert!(!occ.overlaps(&a.span));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Property 5: the store refuses overlapping approved writes on its own
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    #[test]
    fn store_keeps_approved_reservations_disjoint(
        proposals in prop::collection::vec((arb_start(), 15i64..=120), 1..25),
    ) {
        let stored = tokio_test::block_on(async {
            let dir = std::env::temp_dir().join(format!("roomslot_prop_{}", Ulid::new()));
            std::fs::create_dir_all(&dir).unwrap();
            let store = WalStore::open(dir.join("prop.wal")).unwrap();
            let building = Building { id: Ulid::new(), name: "P".into(), floors: 1 };
            store.insert_building(building.clone()).await.unwrap();
            let mut room = room(30);
            room.building_id = building.id;
            store.insert_room(room.clone()).await.unwrap();

            for (start, minutes) in proposals {
                let span = Span::new(start, start + Duration::minutes(minutes));
                let _ = store.insert_reservation(approved(&room, span, 10)).await;
            }
            let week = Span::new(monday(), monday() + Duration::days(7));
            let stored = store.list_reservations_by_room(room.id, week).await.unwrap();
            let _ = std::fs::remove_dir_all(&dir);
            stored
        });

        prop_assert!(!stored.is_empty());
        for w in stored.windows(2) {
            prop_assert!(w[0].span.end <= w[1].span.start);
        }
    }
}
