use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, NaiveDate, NaiveTime, Weekday};
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::availability::{fetch_day, fetch_week_days, DayFetch, WeekGrid};
use super::error::BookingError;
use super::selection::{ClickOutcome, SelectionPolicy, Unselectable};
use super::state::{reduce, Action, AppState};
use super::validator::BookingValidator;
use crate::clock::Clock;
use crate::identity::{Principal, SessionEvent};
use crate::model::*;
use crate::observability::{self, rejection_label};
use crate::signal::{Signal, SignalHub};
use crate::store::{Store, StoreError};

/// The user-editable part of a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub start: Instant,
    pub end: Instant,
    pub attendees: u32,
    pub note: Option<String>,
}

impl ReservationDraft {
    pub fn from_candidate(candidate: &CandidateSelection, attendees: u32, note: Option<String>) -> Self {
        let span = candidate.span();
        Self {
            start: span.start,
            end: span.end,
            attendees,
            note,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Async adapter around [`AppState`]: issues store calls and folds their
/// results back in through [`reduce`]. The state lock is never held across
/// an await.
pub struct ReservationManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    signals: Arc<SignalHub>,
    state: Mutex<AppState>,
}

/// Marks a create/update in flight; cleared on drop, whatever the outcome.
struct SubmitGuard<'a> {
    manager: &'a ReservationManager,
}

impl<'a> SubmitGuard<'a> {
    fn acquire(manager: &'a ReservationManager) -> Result<Self, BookingError> {
        let mut state = manager.lock();
        if state.submitting {
            return Err(BookingError::SubmissionInFlight);
        }
        let current = std::mem::take(&mut *state);
        *state = reduce(current, Action::SubmitStarted);
        Ok(Self { manager })
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.manager.dispatch(Action::SubmitFinished);
    }
}

impl ReservationManager {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        signals: Arc<SignalHub>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            signals,
            state: Mutex::new(AppState::new(policy)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dispatch(&self, action: Action) {
        let mut state = self.lock();
        let current = std::mem::take(&mut *state);
        *state = reduce(current, action);
    }

    pub fn snapshot(&self) -> AppState {
        self.lock().clone()
    }

    pub fn signals(&self) -> &SignalHub {
        &self.signals
    }

    fn principal(&self) -> Result<Principal, BookingError> {
        self.lock()
            .principal
            .clone()
            .ok_or(BookingError::Unauthenticated)
    }

    fn admin(&self) -> Result<Principal, BookingError> {
        let principal = self.principal()?;
        if !principal.is_admin() {
            return Err(BookingError::Forbidden);
        }
        Ok(principal)
    }

    fn note_rejection(&self, err: &BookingError) {
        metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => rejection_label(err))
            .increment(1);
        match err {
            BookingError::PersistenceFailure(source) => warn!("store call failed: {source}"),
            other => debug!("booking refused: {other}"),
        }
    }

    // ── Session ──────────────────────────────────────────────────

    pub fn handle_session(&self, event: SessionEvent) {
        match &event {
            SessionEvent::SignedIn(p) => info!("signed in: {} ({:?})", p.identifier, p.role),
            SessionEvent::SignedOut => info!("signed out"),
        }
        self.dispatch(Action::Session(event));
    }

    /// Sign in and load the principal's reservations.
    pub async fn sign_in(&self, principal: Principal) -> Result<(), BookingError> {
        self.handle_session(SessionEvent::SignedIn(principal));
        self.refresh_my_reservations().await.map(|_| ())
    }

    pub fn sign_out(&self) {
        self.handle_session(SessionEvent::SignedOut);
    }

    // ── Navigation ───────────────────────────────────────────────

    pub async fn load_buildings(&self) -> Result<Vec<Building>, BookingError> {
        let buildings = self.store.list_buildings().await?;
        self.dispatch(Action::BuildingsLoaded(buildings.clone()));
        Ok(buildings)
    }

    pub async fn select_building(&self, building_id: Ulid) -> Result<Vec<Room>, BookingError> {
        let rooms = self.store.list_rooms(building_id).await?;
        self.dispatch(Action::BuildingSelected {
            building_id,
            rooms: rooms.clone(),
        });
        Ok(rooms)
    }

    async fn load_room(&self, room_id: Ulid) -> Result<Room, BookingError> {
        let room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or(BookingError::NotFound(room_id))?;
        self.dispatch(Action::RoomSelected(room.clone()));
        let classes = self.store.list_recurring_classes(room_id).await?;
        self.dispatch(Action::ClassesLoaded { room_id, classes });
        Ok(room)
    }

    /// Select a room and show the week already on screen, or the current one.
    pub async fn select_room(&self, room_id: Ulid) -> Result<WeekGrid, BookingError> {
        let shown = self.lock().week.as_ref().map(|w| w.week_start);
        self.load_room(room_id).await?;
        let week_of = shown.unwrap_or_else(|| self.clock.now().date());
        self.show_week(week_of).await
    }

    /// Display the week containing `week_of` for the selected room, fetching
    /// its five days concurrently.
    pub async fn show_week(&self, week_of: NaiveDate) -> Result<WeekGrid, BookingError> {
        let (room_id, generation) = {
            let mut state = self.lock();
            let room_id = state
                .selected_room
                .as_ref()
                .map(|r| r.id)
                .ok_or(BookingError::NoRoomSelected)?;
            let current = std::mem::take(&mut *state);
            *state = reduce(current, Action::WeekRequested { room_id, week_start: week_of });
            (room_id, state.generation)
        };

        let mut first_error = None;
        for result in fetch_week_days(self.store.as_ref(), room_id, week_of, generation).await {
            match result {
                Ok(fetch) => {
                    self.apply_day_fetch(fetch);
                }
                Err(e) => {
                    warn!("day fetch for room {room_id} failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }
        self.week_grid().ok_or(BookingError::NoRoomSelected)
    }

    pub async fn next_week(&self) -> Result<WeekGrid, BookingError> {
        self.shift_week(7).await
    }

    pub async fn previous_week(&self) -> Result<WeekGrid, BookingError> {
        self.shift_week(-7).await
    }

    async fn shift_week(&self, days: i64) -> Result<WeekGrid, BookingError> {
        let shown = self.lock().week.as_ref().map(|w| w.week_start);
        let base = shown.unwrap_or_else(|| self.clock.now().date());
        self.show_week(base + Duration::days(days)).await
    }

    /// Fold one day's reservations in. Returns false if the fetch was stale.
    pub fn apply_day_fetch(&self, fetch: DayFetch) -> bool {
        let mut state = self.lock();
        if !state.accepts(&fetch) {
            debug!(
                "discarding stale fetch for {} (generation {}, current {})",
                fetch.date, fetch.generation, state.generation
            );
            metrics::counter!(observability::STALE_FETCHES_DISCARDED_TOTAL).increment(1);
            return false;
        }
        let current = std::mem::take(&mut *state);
        *state = reduce(current, Action::DayLoaded(fetch));
        true
    }

    pub fn week_grid(&self) -> Option<WeekGrid> {
        self.lock().week_grid(self.clock.now())
    }

    pub fn click_slot(&self, date: NaiveDate, hour: u32) -> Result<ClickOutcome, Unselectable> {
        let now = self.clock.now();
        let mut state = self.lock();
        let grid = state.week_grid(now).ok_or(Unselectable { date, hour })?;
        let mut selector = state.selector;
        let outcome = selector.click(&grid, date, hour)?;
        let current = std::mem::take(&mut *state);
        *state = reduce(current, Action::SelectionChanged(selector.state));
        Ok(outcome)
    }

    pub fn candidate(&self) -> Option<CandidateSelection> {
        self.lock().selector.candidate()
    }

    // ── Reservation lifecycle ────────────────────────────────────

    /// Book the selected room. Persists as approved.
    pub async fn create(&self, draft: ReservationDraft) -> Result<Reservation, BookingError> {
        self.try_create(draft)
            .await
            .inspect_err(|e| self.note_rejection(e))
    }

    async fn try_create(&self, draft: ReservationDraft) -> Result<Reservation, BookingError> {
        let principal = self.principal()?;
        let room = self
            .lock()
            .selected_room
            .clone()
            .ok_or(BookingError::NoRoomSelected)?;
        let _submit = SubmitGuard::acquire(self)?;

        let span = draft.span();
        let now = self.clock.now();
        self.validate(&room, &span, draft.attendees, None, now).await?;

        let reservation = Reservation {
            id: Ulid::new(),
            room_id: room.id,
            owner_id: principal.id,
            span,
            attendees: draft.attendees,
            note: draft.note,
            status: ReservationStatus::Approved,
            created_at: now,
        };
        self.store.insert_reservation(reservation.clone()).await?;

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} created: room {} {}..{} for {}",
            reservation.id, room.name, span.start, span.end, principal.identifier
        );
        self.dispatch(Action::SelectionCleared);
        self.after_commit(room.id, reservation.date()).await;
        self.refresh_my_reservations_logged().await;
        Ok(reservation)
    }

    /// Replace an owned reservation's interval, attendees and note. The
    /// selected room becomes its room.
    pub async fn update(&self, id: Ulid, draft: ReservationDraft) -> Result<Reservation, BookingError> {
        self.try_update(id, draft)
            .await
            .inspect_err(|e| self.note_rejection(e))
    }

    async fn try_update(&self, id: Ulid, draft: ReservationDraft) -> Result<Reservation, BookingError> {
        let principal = self.principal()?;
        let room = self
            .lock()
            .selected_room
            .clone()
            .ok_or(BookingError::NoRoomSelected)?;
        let _submit = SubmitGuard::acquire(self)?;

        let existing = self.owned_reservation(&principal, id).await?;
        let span = draft.span();
        let now = self.clock.now();
        self.validate(&room, &span, draft.attendees, Some(id), now).await?;

        let reservation = Reservation {
            room_id: room.id,
            span,
            attendees: draft.attendees,
            note: draft.note,
            ..existing.clone()
        };
        self.store.update_reservation(reservation.clone()).await?;

        metrics::counter!(observability::RESERVATIONS_UPDATED_TOTAL).increment(1);
        info!(
            "reservation {id} updated: room {} {}..{}",
            room.name, span.start, span.end
        );
        self.dispatch(Action::EditEnded);
        self.after_commit(existing.room_id, existing.date()).await;
        if (existing.room_id, existing.date()) != (room.id, reservation.date()) {
            self.after_commit(room.id, reservation.date()).await;
        }
        self.refresh_my_reservations_logged().await;
        Ok(reservation)
    }

    /// Delete an owned reservation and free its slots.
    pub async fn cancel(&self, id: Ulid) -> Result<(), BookingError> {
        self.try_cancel(id)
            .await
            .inspect_err(|e| self.note_rejection(e))
    }

    async fn try_cancel(&self, id: Ulid) -> Result<(), BookingError> {
        let principal = self.principal()?;
        let existing = self.owned_reservation(&principal, id).await?;
        self.store.delete_reservation(id).await?;

        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!("reservation {id} cancelled by {}", principal.identifier);
        self.dispatch(Action::ReservationRemoved(id));
        self.after_commit(existing.room_id, existing.date()).await;
        Ok(())
    }

    /// Ask the host to open the booking form for `reservation_id`.
    pub fn request_edit(&self, reservation_id: Ulid) {
        self.signals.send(Signal::EditRequested { reservation_id });
    }

    /// Load an owned reservation into the grid and selector for re-picking.
    pub async fn begin_edit(&self, id: Ulid) -> Result<CandidateSelection, BookingError> {
        let principal = self.principal()?;
        let reservation = self.owned_reservation(&principal, id).await?;
        self.dispatch(Action::EditEnded);

        self.load_room(reservation.room_id).await?;
        let candidate = CandidateSelection::from_reservation(&reservation);
        self.dispatch(Action::EditStarted {
            reservation_id: id,
            candidate,
        });
        self.show_week(reservation.date()).await?;
        debug!("editing reservation {id}");
        Ok(candidate)
    }

    pub fn cancel_edit(&self) {
        self.dispatch(Action::EditEnded);
    }

    pub async fn refresh_my_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        let principal = self.principal()?;
        let mine = self.store.list_reservations_by_owner(principal.id).await?;
        self.dispatch(Action::MyReservationsLoaded(mine.clone()));
        Ok(mine)
    }

    async fn refresh_my_reservations_logged(&self) {
        if let Err(e) = self.refresh_my_reservations().await {
            warn!("reservation list refresh failed after commit: {e}");
        }
    }

    async fn owned_reservation(&self, principal: &Principal, id: Ulid) -> Result<Reservation, BookingError> {
        let reservation = self
            .store
            .get_reservation(id)
            .await?
            .ok_or(BookingError::NotFound(id))?;
        if reservation.owner_id != principal.id {
            return Err(BookingError::Forbidden);
        }
        Ok(reservation)
    }

    /// Timing rules first, then a fresh snapshot of the room around `span` for
    /// the full validator.
    async fn validate(
        &self,
        room: &Room,
        span: &Span,
        attendees: u32,
        excluding: Option<Ulid>,
        now: Instant,
    ) -> Result<(), BookingError> {
        BookingValidator::check_timing(span, now)?;
        let (classes, reservations) = match self.room_snapshot(room.id, span).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Refused either way; a broken attendee rule outranks the store error.
                BookingValidator::check_attendees(room, attendees)?;
                return Err(e.into());
            }
        };
        BookingValidator::new(room, &classes, &reservations, now).validate(span, attendees, excluding)?;
        Ok(())
    }

    async fn room_snapshot(
        &self,
        room_id: Ulid,
        span: &Span,
    ) -> Result<(Vec<RecurringClass>, Vec<Reservation>), StoreError> {
        let classes = self.store.list_recurring_classes(room_id).await?;
        let reservations = self.store.list_reservations_by_room(room_id, *span).await?;
        Ok((classes, reservations))
    }

    /// Re-fetch one day if it is on screen, and tell listeners the room changed.
    async fn after_commit(&self, room_id: Ulid, date: NaiveDate) {
        self.signals.send(Signal::RoomChanged { room_id, date });
        let generation = {
            let state = self.lock();
            match state.week.as_ref() {
                Some(w) if w.contains(room_id, date) => w.generation,
                _ => return,
            }
        };
        match fetch_day(self.store.as_ref(), room_id, date, generation).await {
            Ok(fetch) => {
                self.apply_day_fetch(fetch);
            }
            Err(e) => warn!("availability refresh for {date} failed after commit: {e}"),
        }
    }

    // ── Administration ───────────────────────────────────────────

    pub async fn add_building(&self, name: String, floors: u32) -> Result<Building, BookingError> {
        self.admin()?;
        let building = Building {
            id: Ulid::new(),
            name,
            floors,
        };
        self.store.insert_building(building.clone()).await?;
        info!("building {} added: {}", building.id, building.name);
        Ok(building)
    }

    pub async fn add_room(
        &self,
        building_id: Ulid,
        name: String,
        capacity: u32,
        floor: u32,
    ) -> Result<Room, BookingError> {
        self.admin()?;
        let room = Room {
            id: Ulid::new(),
            building_id,
            name,
            capacity,
            floor,
        };
        self.store.insert_room(room.clone()).await?;
        info!("room {} added: {} (capacity {})", room.id, room.name, room.capacity);
        Ok(room)
    }

    pub async fn add_recurring_class(
        &self,
        room_id: Ulid,
        name: String,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<RecurringClass, BookingError> {
        self.admin()?;
        if end <= start {
            return Err(BookingError::InvalidSchedule("a class must end after it starts"));
        }
        if !is_school_day(weekday) {
            return Err(BookingError::InvalidSchedule("classes meet Monday through Friday"));
        }
        let class = RecurringClass {
            id: Ulid::new(),
            room_id,
            name,
            weekday,
            start,
            end,
        };
        self.store
            .insert_recurring_class(class.clone(), self.clock.now())
            .await?;
        info!("class {} added to room {room_id}: {:?} {}-{}", class.name, weekday, start, end);
        self.reload_classes(room_id).await;
        Ok(class)
    }

    pub async fn remove_recurring_class(&self, class_id: Ulid) -> Result<(), BookingError> {
        self.admin()?;
        let room_id = self.lock().selected_room.as_ref().map(|r| r.id);
        self.store.delete_recurring_class(class_id).await?;
        info!("class {class_id} removed");
        if let Some(room_id) = room_id {
            self.reload_classes(room_id).await;
        }
        Ok(())
    }

    pub async fn list_recurring_classes(&self, room_id: Ulid) -> Result<Vec<RecurringClass>, BookingError> {
        Ok(self.store.list_recurring_classes(room_id).await?)
    }

    async fn reload_classes(&self, room_id: Ulid) {
        let selected = self
            .lock()
            .selected_room
            .as_ref()
            .is_some_and(|r| r.id == room_id);
        if !selected {
            return;
        }
        match self.store.list_recurring_classes(room_id).await {
            Ok(classes) => self.dispatch(Action::ClassesLoaded { room_id, classes }),
            Err(e) => warn!("class list refresh failed: {e}"),
        }
    }
}
