use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Campus-local wall-clock instant, minute precision in practice.
pub type Instant = NaiveDateTime;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    /// Construct without ordering checks; `BookingValidator` reports inverted spans.
    pub fn new(start: Instant, end: Instant) -> Self {
        Self { start, end }
    }

    pub fn on(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self::new(date.and_time(start), date.and_time(end))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Instant) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Every calendar date this span touches (end is exclusive).
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut out = vec![self.start.date()];
        let last = if self.end > self.start && self.end.time() == NaiveTime::MIN {
            self.end.date() - Duration::days(1)
        } else {
            self.end.date()
        };
        let mut d = self.start.date();
        while d < last {
            d += Duration::days(1);
            out.push(d);
        }
        out
    }
}

/// `[date hour:00, date hour+1:00)`.
pub fn slot_span(date: NaiveDate, hour: u32) -> Span {
    let start = date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));
    Span::new(start, start + Duration::hours(1))
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Monday through Friday of the week starting at `monday`.
pub fn week_dates(monday: NaiveDate) -> [NaiveDate; crate::limits::DAYS_PER_WEEK] {
    std::array::from_fn(|i| monday + Duration::days(i as i64))
}

pub fn is_school_day(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

// ── Directory ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: Ulid,
    pub name: String,
    pub floors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub building_id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub floor: u32,
}

impl Room {
    /// A booking must fill at least a third of the room.
    pub fn min_attendees(&self) -> u32 {
        self.capacity.div_ceil(3)
    }
}

// ── Weekly schedule ──────────────────────────────────────────────

/// A block that repeats every week on `weekday`. Never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringClass {
    pub id: Ulid,
    pub room_id: Ulid,
    pub name: String,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl RecurringClass {
    /// Concrete occurrence on `date`, if the class meets that weekday.
    pub fn occurs_on(&self, date: NaiveDate) -> Option<Span> {
        (date.weekday() == self.weekday).then(|| Span::on(date, self.start, self.end))
    }

    /// Whether any occurrence meets `span`, on every date the span touches.
    pub fn clashes_with(&self, span: &Span) -> bool {
        span.dates()
            .into_iter()
            .filter_map(|d| self.occurs_on(d))
            .any(|occ| occ.overlaps(span))
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReservationStatus {
    /// Moderation state machine: `Pending → {Approved, Rejected}`, the rest terminal.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Approved)
                | (ReservationStatus::Pending, ReservationStatus::Rejected)
        )
    }

    /// Whether the reservation holds its slot on the availability grid.
    pub fn occupies(self) -> bool {
        !matches!(self, ReservationStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub owner_id: Ulid,
    pub span: Span,
    pub attendees: u32,
    pub note: Option<String>,
    pub status: ReservationStatus,
    pub created_at: Instant,
}

impl Reservation {
    pub fn is_approved(&self) -> bool {
        self.status == ReservationStatus::Approved
    }

    pub fn date(&self) -> NaiveDate {
        self.span.start.date()
    }
}

/// In-progress pick on the grid, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSelection {
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl CandidateSelection {
    pub fn span(&self) -> Span {
        Span::on(self.date, self.start, self.end)
    }

    pub fn from_reservation(r: &Reservation) -> Self {
        Self {
            room_id: r.room_id,
            date: r.span.start.date(),
            start: r.span.start.time(),
            end: r.span.end.time(),
        }
    }
}

/// Write-ahead log record. Flat, one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BuildingCreated { building: Building },
    RoomCreated { room: Room },
    RecurringClassAdded { class: RecurringClass },
    RecurringClassRemoved { id: Ulid, room_id: Ulid },
    ReservationInserted { reservation: Reservation },
    ReservationReplaced { previous_room_id: Ulid, reservation: Reservation },
    ReservationDeleted { id: Ulid, room_id: Ulid },
}

impl Event {
    /// Rooms the event touches. A replace that moves rooms touches two;
    /// directory events touch none.
    pub fn room_ids(&self) -> Vec<Ulid> {
        match self {
            Event::RecurringClassAdded { class } => vec![class.room_id],
            Event::RecurringClassRemoved { room_id, .. }
            | Event::ReservationDeleted { room_id, .. } => vec![*room_id],
            Event::ReservationInserted { reservation } => vec![reservation.room_id],
            Event::ReservationReplaced {
                previous_room_id,
                reservation,
            } => {
                if *previous_room_id == reservation.room_id {
                    vec![reservation.room_id]
                } else {
                    vec![*previous_room_id, reservation.room_id]
                }
            }
            Event::BuildingCreated { .. } | Event::RoomCreated { .. } => vec![],
        }
    }
}

/// Everything known about one room: schedule plus reservations sorted by start.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub classes: Vec<RecurringClass>,
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            classes: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn remove_class(&mut self, id: Ulid) -> Option<RecurringClass> {
        let pos = self.classes.iter().position(|c| c.id == id)?;
        Some(self.classes.remove(pos))
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Recurring-class occurrences that overlap `span` on any date it touches.
    pub fn class_conflict(&self, span: &Span) -> Option<&RecurringClass> {
        self.classes.iter().find(|c| c.clashes_with(span))
    }

    /// First approved reservation, not yet over at `from`, that a new class would land on.
    pub fn reservation_clash(&self, class: &RecurringClass, from: Instant) -> Option<&Reservation> {
        self.reservations
            .iter()
            .filter(|r| r.is_approved() && r.span.end > from)
            .find(|r| class.clashes_with(&r.span))
    }
}
