use chrono::NaiveDate;
use ulid::Ulid;

use super::availability::{compute_week, DayFetch, WeekGrid};
use super::selection::{SelectionPolicy, SelectionState, SlotSelector};
use crate::identity::{Principal, SessionEvent};
use crate::limits::DAYS_PER_WEEK;
use crate::model::*;

/// The displayed week for one room. `days[i]` is `None` until weekday `i` arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekView {
    pub room_id: Ulid,
    pub week_start: NaiveDate,
    pub generation: u64,
    pub days: [Option<Vec<Reservation>>; DAYS_PER_WEEK],
}

impl WeekView {
    pub fn contains(&self, room_id: Ulid, date: NaiveDate) -> bool {
        self.room_id == room_id && week_dates(self.week_start).contains(&date)
    }

    pub fn is_complete(&self) -> bool {
        self.days.iter().all(Option::is_some)
    }
}

/// Everything the booking screens show. Only changed through [`reduce`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub principal: Option<Principal>,
    pub buildings: Vec<Building>,
    pub selected_building: Option<Ulid>,
    pub rooms: Vec<Room>,
    pub selected_room: Option<Room>,
    pub classes: Vec<RecurringClass>,
    pub week: Option<WeekView>,
    /// Bumped on every room or week change; day fetches carry the value they were issued under.
    pub generation: u64,
    pub my_reservations: Vec<Reservation>,
    pub selector: SlotSelector,
    /// Reservation whose slots are being re-picked.
    pub editing: Option<Ulid>,
    pub submitting: bool,
}

impl AppState {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            selector: SlotSelector::new(policy),
            ..Default::default()
        }
    }

    /// Whether a day fetch still belongs to the displayed week.
    pub fn accepts(&self, fetch: &DayFetch) -> bool {
        self.week.as_ref().is_some_and(|w| {
            w.generation == fetch.generation
                && w.room_id == fetch.room_id
                && fetch.day_index < DAYS_PER_WEEK
                && week_dates(w.week_start)[fetch.day_index] == fetch.date
        })
    }

    /// Grid for the displayed week as of `now`, hiding the reservation under edit.
    pub fn week_grid(&self, now: Instant) -> Option<WeekGrid> {
        let week = self.week.as_ref()?;
        Some(compute_week(
            week.room_id,
            week.week_start,
            &self.classes,
            &week.days,
            now,
            self.editing,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Session(SessionEvent),
    BuildingsLoaded(Vec<Building>),
    BuildingSelected { building_id: Ulid, rooms: Vec<Room> },
    RoomSelected(Room),
    ClassesLoaded { room_id: Ulid, classes: Vec<RecurringClass> },
    WeekRequested { room_id: Ulid, week_start: NaiveDate },
    DayLoaded(DayFetch),
    SelectionChanged(SelectionState),
    SelectionCleared,
    MyReservationsLoaded(Vec<Reservation>),
    ReservationRemoved(Ulid),
    EditStarted { reservation_id: Ulid, candidate: CandidateSelection },
    EditEnded,
    SubmitStarted,
    SubmitFinished,
}

pub fn reduce(mut state: AppState, action: Action) -> AppState {
    match action {
        Action::Session(SessionEvent::SignedIn(principal)) => {
            if state.principal.as_ref().map(|p| p.id) != Some(principal.id) {
                state.my_reservations.clear();
                state.editing = None;
                state.selector.clear();
            }
            state.principal = Some(principal);
        }
        Action::Session(SessionEvent::SignedOut) => {
            state.principal = None;
            state.my_reservations.clear();
            state.editing = None;
            state.selector.clear();
        }
        Action::BuildingsLoaded(buildings) => {
            state.buildings = buildings;
        }
        Action::BuildingSelected { building_id, rooms } => {
            state.selected_building = Some(building_id);
            state.rooms = rooms;
            state.selected_room = None;
            state.classes.clear();
            state.week = None;
            state.generation += 1;
            state.selector.clear();
        }
        Action::RoomSelected(room) => {
            if state.selected_room.as_ref().map(|r| r.id) != Some(room.id) {
                state.classes.clear();
                state.week = None;
                state.generation += 1;
                state.selector.clear();
            }
            state.selected_building = Some(room.building_id);
            state.selected_room = Some(room);
        }
        Action::ClassesLoaded { room_id, classes } => {
            if state.selected_room.as_ref().is_some_and(|r| r.id == room_id) {
                state.classes = classes;
            }
        }
        Action::WeekRequested {
            room_id,
            week_start: week_of,
        } => {
            state.generation += 1;
            state.week = Some(WeekView {
                room_id,
                week_start: week_start(week_of),
                generation: state.generation,
                days: Default::default(),
            });
        }
        Action::DayLoaded(fetch) => {
            if state.accepts(&fetch)
                && let Some(week) = state.week.as_mut()
            {
                week.days[fetch.day_index] = Some(fetch.reservations);
            }
        }
        Action::SelectionChanged(selection) => {
            state.selector.state = selection;
        }
        Action::SelectionCleared => {
            state.selector.clear();
        }
        Action::MyReservationsLoaded(reservations) => {
            state.my_reservations = reservations;
        }
        Action::ReservationRemoved(id) => {
            state.my_reservations.retain(|r| r.id != id);
            if let Some(week) = state.week.as_mut() {
                for day in week.days.iter_mut().flatten() {
                    day.retain(|r| r.id != id);
                }
            }
            if state.editing == Some(id) {
                state.editing = None;
                state.selector.clear();
            }
        }
        Action::EditStarted {
            reservation_id,
            candidate,
        } => {
            state.editing = Some(reservation_id);
            state.selector.preload(candidate);
        }
        Action::EditEnded => {
            state.editing = None;
            state.selector.clear();
        }
        Action::SubmitStarted => {
            state.submitting = true;
        }
        Action::SubmitFinished => {
            state.submitting = false;
        }
    }
    state
}
