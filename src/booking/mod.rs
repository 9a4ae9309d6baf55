//! The booking core: week availability, slot selection, rule validation and
//! the reservation lifecycle over an explicit application state.

pub mod availability;
mod error;
mod lifecycle;
pub mod selection;
pub mod state;
pub mod validator;

pub use availability::{compute_week, DayFetch, SlotState, WeekGrid};
pub use error::{BookingError, Violation};
pub use lifecycle::{ReservationDraft, ReservationManager};
pub use selection::{ClickOutcome, SelectionPolicy, SelectionState, SlotSelector, Unselectable};
pub use state::{reduce, Action, AppState, WeekView};
pub use validator::BookingValidator;
