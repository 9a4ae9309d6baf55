use std::fmt::Write as _;

use chrono::{Datelike, Duration, NaiveDate};
use futures::future::join_all;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::{Store, StoreError};

// ── Week grid ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Available,
    /// Slot start is before now.
    Past,
    /// The day's reservations have not arrived yet.
    Pending,
    Class(Ulid),
    Reserved(Ulid),
}

impl SlotState {
    pub fn is_available(self) -> bool {
        self == SlotState::Available
    }
}

/// Per-day, per-hour occupancy of one room over one Monday–Friday week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekGrid {
    pub room_id: Ulid,
    pub week_start: NaiveDate,
    pub slots: [[SlotState; SLOTS_PER_DAY]; DAYS_PER_WEEK],
}

impl WeekGrid {
    pub fn dates(&self) -> [NaiveDate; DAYS_PER_WEEK] {
        week_dates(self.week_start)
    }

    pub fn day_index(&self, date: NaiveDate) -> Option<usize> {
        let offset = (date - self.week_start).num_days();
        usize::try_from(offset).ok().filter(|i| *i < DAYS_PER_WEEK)
    }

    pub fn slot_index(hour: u32) -> Option<usize> {
        hour.checked_sub(DAY_START_HOUR)
            .map(|i| i as usize)
            .filter(|i| *i < SLOTS_PER_DAY)
    }

    /// `None` outside the displayed week or the daily window.
    pub fn slot(&self, date: NaiveDate, hour: u32) -> Option<SlotState> {
        Some(self.slots[self.day_index(date)?][Self::slot_index(hour)?])
    }

    pub fn is_available(&self, date: NaiveDate, hour: u32) -> bool {
        self.slot(date, hour).is_some_and(SlotState::is_available)
    }

    /// Text table: `.` free, `C` class, `R` reserved, `-` past, `?` loading, `*` selected.
    pub fn render(&self, selected: Option<&CandidateSelection>) -> String {
        let dates = self.dates();
        let mut out = String::from("      ");
        for d in &dates {
            let _ = write!(out, " {}", d.format("%a %m/%d"));
        }
        out.push('\n');
        for (slot, hour) in (DAY_START_HOUR..day_end_hour()).enumerate() {
            let _ = write!(out, "{hour:02}:00 ");
            for (day, date) in dates.iter().enumerate() {
                let picked = selected.is_some_and(|c| {
                    c.room_id == self.room_id && c.span().contains_span(&slot_span(*date, hour))
                });
                let mark = if picked {
                    '*'
                } else {
                    match self.slots[day][slot] {
                        SlotState::Available => '.',
                        SlotState::Past => '-',
                        SlotState::Pending => '?',
                        SlotState::Class(_) => 'C',
                        SlotState::Reserved(_) => 'R',
                    }
                };
                let _ = write!(out, "     {mark}    ");
            }
            out.push('\n');
        }
        out
    }
}

/// Merge the weekly schedule and per-day reservations into a grid.
///
/// `days[i]` holds the reservations fetched for weekday `i`; `None` means the
/// fetch is still outstanding. A slot is occupied when an occupant's interval
/// overlaps the slot's hour (display granularity only). `excluding` hides one
/// reservation, so an edit can re-pick its own slots.
pub fn compute_week(
    room_id: Ulid,
    week_of: NaiveDate,
    classes: &[RecurringClass],
    days: &[Option<Vec<Reservation>>; DAYS_PER_WEEK],
    now: Instant,
    excluding: Option<Ulid>,
) -> WeekGrid {
    let monday = week_start(week_of);
    let mut slots = [[SlotState::Available; SLOTS_PER_DAY]; DAYS_PER_WEEK];

    for (day, date) in week_dates(monday).into_iter().enumerate() {
        let occurrences: Vec<(Ulid, Span)> = classes
            .iter()
            .filter(|c| c.room_id == room_id)
            .filter_map(|c| c.occurs_on(date).map(|occ| (c.id, occ)))
            .collect();

        for (i, hour) in (DAY_START_HOUR..day_end_hour()).enumerate() {
            let slot = slot_span(date, hour);

            let class = occurrences.iter().find(|(_, occ)| occ.overlaps(&slot));
            let reservation = days[day].as_ref().and_then(|list| {
                list.iter().find(|r| {
                    r.room_id == room_id
                        && r.status.occupies()
                        && Some(r.id) != excluding
                        && r.span.overlaps(&slot)
                })
            });

            slots[day][i] = if let Some((id, _)) = class {
                SlotState::Class(*id)
            } else if let Some(r) = reservation {
                SlotState::Reserved(r.id)
            } else if slot.start < now {
                SlotState::Past
            } else if days[day].is_none() {
                SlotState::Pending
            } else {
                SlotState::Available
            };
        }
    }

    WeekGrid {
        room_id,
        week_start: monday,
        slots,
    }
}

// ── Fetching ──────────────────────────────────────────────────────

/// `[date 00:00, date+1 00:00)`.
pub fn day_window(date: NaiveDate) -> Span {
    let start = date.and_time(chrono::NaiveTime::MIN);
    Span::new(start, start + Duration::days(1))
}

/// One day's reservations, tagged with what the fetch was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFetch {
    pub generation: u64,
    pub room_id: Ulid,
    /// Monday-based position within the week the fetch was issued for.
    pub day_index: usize,
    pub date: NaiveDate,
    pub reservations: Vec<Reservation>,
}

pub async fn fetch_day(
    store: &dyn Store,
    room_id: Ulid,
    date: NaiveDate,
    generation: u64,
) -> Result<DayFetch, StoreError> {
    let day_index = date.weekday().num_days_from_monday() as usize;
    let reservations = store
        .list_reservations_by_room(room_id, day_window(date))
        .await?;
    Ok(DayFetch {
        generation,
        room_id,
        day_index,
        date,
        reservations,
    })
}

/// Issue the five per-day fetches concurrently. Results come back in weekday
/// order, but each carries its own date so callers never rely on that.
pub async fn fetch_week_days(
    store: &dyn Store,
    room_id: Ulid,
    week_of: NaiveDate,
    generation: u64,
) -> Vec<Result<DayFetch, StoreError>> {
    let fetches = week_dates(week_start(week_of))
        .into_iter()
        .map(|date| fetch_day(store, room_id, date, generation));
    join_all(fetches).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use crate::store::WalStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> Instant {
        date(d).and_hms_opt(h, m, 0).unwrap()
    }

    fn class(room_id: Ulid, weekday: Weekday, start: (u32, u32), end: (u32, u32)) -> RecurringClass {
        RecurringClass {
            id: Ulid::new(),
            room_id,
            name: "Calculus".into(),
            weekday,
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    fn reservation(room_id: Ulid, start: Instant, end: Instant) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id,
            owner_id: Ulid::new(),
            span: Span::new(start, end),
            attendees: 10,
            note: None,
            status: ReservationStatus::Approved,
            created_at: at(1, 0, 0),
        }
    }

    fn loaded() -> [Option<Vec<Reservation>>; DAYS_PER_WEEK] {
        std::array::from_fn(|_| Some(Vec::new()))
    }

    // Saturday before the displayed week.
    fn early() -> Instant {
        at(1, 8, 0)
    }

    #[test]
    fn empty_week_is_all_available() {
        let room = Ulid::new();
        let grid = compute_week(room, date(5), &[], &loaded(), early(), None);
        assert_eq!(grid.week_start, date(3));
        assert!(grid.slots.iter().flatten().all(|s| s.is_available()));
        assert!(grid.is_available(date(3), 9));
        assert!(grid.is_available(date(7), 20));
    }

    #[test]
    fn out_of_window_is_not_available() {
        let grid = compute_week(Ulid::new(), date(3), &[], &loaded(), early(), None);
        assert!(!grid.is_available(date(3), 8));
        assert!(!grid.is_available(date(3), 21));
        assert!(!grid.is_available(date(8), 10)); // Saturday
        assert!(!grid.is_available(date(2), 10)); // previous Sunday
    }

    #[test]
    fn recurring_class_blocks_each_touched_hour() {
        let room = Ulid::new();
        let c = class(room, Weekday::Mon, (10, 0), (11, 30));
        let grid = compute_week(room, date(3), &[c.clone()], &loaded(), early(), None);
        assert_eq!(grid.slot(date(3), 9), Some(SlotState::Available));
        assert_eq!(grid.slot(date(3), 10), Some(SlotState::Class(c.id)));
        assert_eq!(grid.slot(date(3), 11), Some(SlotState::Class(c.id)));
        assert_eq!(grid.slot(date(3), 12), Some(SlotState::Available));
        // Tuesday untouched.
        assert!(grid.is_available(date(4), 10));
    }

    #[test]
    fn other_rooms_classes_ignored() {
        let room = Ulid::new();
        let c = class(Ulid::new(), Weekday::Mon, (10, 0), (11, 0));
        let grid = compute_week(room, date(3), &[c], &loaded(), early(), None);
        assert!(grid.is_available(date(3), 10));
    }

    #[test]
    fn reservation_blocks_its_hours() {
        let room = Ulid::new();
        let r = reservation(room, at(5, 14, 0), at(5, 16, 0));
        let mut days = loaded();
        days[2] = Some(vec![r.clone()]);
        let grid = compute_week(room, date(3), &[], &days, early(), None);
        assert_eq!(grid.slot(date(5), 13), Some(SlotState::Available));
        assert_eq!(grid.slot(date(5), 14), Some(SlotState::Reserved(r.id)));
        assert_eq!(grid.slot(date(5), 15), Some(SlotState::Reserved(r.id)));
        assert_eq!(grid.slot(date(5), 16), Some(SlotState::Available));
    }

    #[test]
    fn half_hour_reservation_still_blocks_its_slot() {
        let room = Ulid::new();
        let r = reservation(room, at(3, 10, 0), at(3, 10, 30));
        let mut days = loaded();
        days[0] = Some(vec![r.clone()]);
        let grid = compute_week(room, date(3), &[], &days, early(), None);
        assert_eq!(grid.slot(date(3), 10), Some(SlotState::Reserved(r.id)));
        assert!(grid.is_available(date(3), 11));
    }

    #[test]
    fn rejected_and_excluded_reservations_do_not_block() {
        let room = Ulid::new();
        let mut rejected = reservation(room, at(3, 9, 0), at(3, 10, 0));
        rejected.status = ReservationStatus::Rejected;
        let editing = reservation(room, at(3, 11, 0), at(3, 12, 0));
        let mut days = loaded();
        days[0] = Some(vec![rejected, editing.clone()]);

        let grid = compute_week(room, date(3), &[], &days, early(), Some(editing.id));
        assert!(grid.is_available(date(3), 9));
        assert!(grid.is_available(date(3), 11));
    }

    #[test]
    fn past_slots_unavailable() {
        let room = Ulid::new();
        let now = at(4, 12, 30);
        let grid = compute_week(room, date(3), &[], &loaded(), now, None);
        assert_eq!(grid.slot(date(3), 20), Some(SlotState::Past));
        assert_eq!(grid.slot(date(4), 12), Some(SlotState::Past)); // started at 12:00
        assert_eq!(grid.slot(date(4), 13), Some(SlotState::Available));
        assert!(grid.is_available(date(7), 9));
    }

    #[test]
    fn occupant_wins_over_past() {
        let room = Ulid::new();
        let c = class(room, Weekday::Mon, (9, 0), (10, 0));
        let grid = compute_week(room, date(3), &[c.clone()], &loaded(), at(6, 0, 0), None);
        assert_eq!(grid.slot(date(3), 9), Some(SlotState::Class(c.id)));
        assert_eq!(grid.slot(date(3), 10), Some(SlotState::Past));
    }

    #[test]
    fn unresolved_day_is_pending() {
        let room = Ulid::new();
        let mut days = loaded();
        days[1] = None;
        let grid = compute_week(room, date(3), &[], &days, early(), None);
        assert_eq!(grid.slot(date(4), 10), Some(SlotState::Pending));
        assert!(!grid.is_available(date(4), 10));
        assert!(grid.is_available(date(5), 10));
    }

    #[test]
    fn render_marks_states() {
        let room = Ulid::new();
        let c = class(room, Weekday::Mon, (9, 0), (10, 0));
        let r = reservation(room, at(4, 9, 0), at(4, 10, 0));
        let mut days = loaded();
        days[1] = Some(vec![r]);
        let grid = compute_week(room, date(3), &[c], &days, early(), None);
        let pick = CandidateSelection {
            room_id: room,
            date: date(5),
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        };
        let text = grid.render(Some(&pick));
        let nine = text.lines().find(|l| l.starts_with("09:00")).unwrap();
        let marks: Vec<char> = nine[6..].chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(marks, vec!['C', 'R', '*', '.', '.']);
        assert!(text.lines().next().unwrap().contains("Mon 06/03"));
    }

    #[test]
    fn render_marks_each_hour_inside_the_pick() {
        let room = Ulid::new();
        let grid = compute_week(room, date(3), &[], &loaded(), early(), None);
        let pick = CandidateSelection {
            room_id: room,
            date: date(4),
            start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        };
        let text = grid.render(Some(&pick));
        let tuesday_mark = |hour: &str| {
            let line = text.lines().find(|l| l.starts_with(hour)).unwrap();
            line[6..].chars().filter(|c| !c.is_whitespace()).nth(1).unwrap()
        };
        assert_eq!(tuesday_mark("09:00"), '.');
        assert_eq!(tuesday_mark("10:00"), '*');
        assert_eq!(tuesday_mark("11:00"), '*');
        assert_eq!(tuesday_mark("12:00"), '.');

        // A pick for another room is not drawn.
        let elsewhere = CandidateSelection {
            room_id: Ulid::new(),
            ..pick
        };
        assert!(!grid.render(Some(&elsewhere)).contains('*'));
    }

    #[tokio::test]
    async fn week_fetch_tags_each_day() {
        let dir = std::env::temp_dir().join(format!("roomslot_avail_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = WalStore::open(dir.join("test.wal")).unwrap();
        let building = Building { id: Ulid::new(), name: "Main".into(), floors: 3 };
        let room = Room { id: Ulid::new(), building_id: building.id, name: "101".into(), capacity: 30, floor: 1 };
        store.insert_building(building).await.unwrap();
        store.insert_room(room.clone()).await.unwrap();
        let r = reservation(room.id, at(6, 13, 0), at(6, 14, 0));
        store.insert_reservation(r.clone()).await.unwrap();

        let fetched = fetch_week_days(&store, room.id, date(5), 7).await;
        assert_eq!(fetched.len(), DAYS_PER_WEEK);
        for (i, f) in fetched.into_iter().enumerate() {
            let f = f.unwrap();
            assert_eq!(f.generation, 7);
            assert_eq!(f.day_index, i);
            assert_eq!(f.date, date(3 + i as u32));
            if f.date == date(6) {
                assert_eq!(f.reservations, vec![r.clone()]);
            } else {
                assert!(f.reservations.is_empty());
            }
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn day_window_is_one_day() {
        let w = day_window(date(3));
        assert_eq!(w, Span::new(at(3, 0, 0), at(4, 0, 0)));
    }
}
