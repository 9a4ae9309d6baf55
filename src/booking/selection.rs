use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::debug;

use super::availability::WeekGrid;
use crate::model::CandidateSelection;

/// How grid clicks turn into a candidate. One per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Click picks one hour; clicking the next hour extends to two.
    #[default]
    Incremental,
    /// Click picks a two-hour block starting at that hour.
    FixedBlock,
}

#[derive(Debug, Error)]
#[error("unknown selection policy {0:?} (expected \"incremental\" or \"fixed-block\")")]
pub struct UnknownPolicy(pub String);

impl FromStr for SelectionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(SelectionPolicy::Incremental),
            "fixed-block" | "fixed_block" | "fixed" => Ok(SelectionPolicy::FixedBlock),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionState {
    #[default]
    Idle,
    OneHourPicked(CandidateSelection),
    TwoHourPicked(CandidateSelection),
    FixedBlockPicked(CandidateSelection),
}

impl SelectionState {
    pub fn candidate(&self) -> Option<CandidateSelection> {
        match self {
            SelectionState::Idle => None,
            SelectionState::OneHourPicked(c)
            | SelectionState::TwoHourPicked(c)
            | SelectionState::FixedBlockPicked(c) => Some(*c),
        }
    }
}

/// Click refused; the selection is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{date} {hour:02}:00 cannot be selected")]
pub struct Unselectable {
    pub date: NaiveDate,
    pub hour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Selected(CandidateSelection),
    Cleared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotSelector {
    pub policy: SelectionPolicy,
    pub state: SelectionState,
}

fn hour_time(hour: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, 0, 0)
}

impl SlotSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            state: SelectionState::Idle,
        }
    }

    pub fn candidate(&self) -> Option<CandidateSelection> {
        self.state.candidate()
    }

    pub fn clear(&mut self) {
        self.state = SelectionState::Idle;
    }

    /// Seed the selection from an existing reservation being edited.
    pub fn preload(&mut self, candidate: CandidateSelection) {
        self.clear();
        self.state = match self.policy {
            SelectionPolicy::FixedBlock => SelectionState::FixedBlockPicked(candidate),
            SelectionPolicy::Incremental if candidate.span().duration() <= Duration::hours(1) => {
                SelectionState::OneHourPicked(candidate)
            }
            SelectionPolicy::Incremental => SelectionState::TwoHourPicked(candidate),
        };
    }

    /// Apply a click on `(date, hour)` of `grid`. On `Err` the state is untouched.
    pub fn click(
        &mut self,
        grid: &WeekGrid,
        date: NaiveDate,
        hour: u32,
    ) -> Result<ClickOutcome, Unselectable> {
        let refused = Unselectable { date, hour };
        let current = self
            .candidate()
            .filter(|c| c.room_id == grid.room_id && c.date == date);

        if let Some(c) = current {
            let hit = match self.policy {
                SelectionPolicy::Incremental => {
                    let t = hour_time(hour).ok_or(refused)?;
                    c.span().contains_instant(date.and_time(t))
                }
                SelectionPolicy::FixedBlock => hour_time(hour) == Some(c.start),
            };
            if hit {
                debug!("selection cleared by re-click on {date} {hour:02}:00");
                self.clear();
                return Ok(ClickOutcome::Cleared);
            }
        }

        if !grid.is_available(date, hour) {
            return Err(refused);
        }

        let next = match self.policy {
            SelectionPolicy::Incremental => {
                let extends = current.filter(|c| {
                    matches!(self.state, SelectionState::OneHourPicked(_))
                        && hour_time(hour) == Some(c.end)
                });
                match extends {
                    Some(c) => SelectionState::TwoHourPicked(CandidateSelection {
                        end: hour_time(hour + 1).ok_or(refused)?,
                        ..c
                    }),
                    None => SelectionState::OneHourPicked(CandidateSelection {
                        room_id: grid.room_id,
                        date,
                        start: hour_time(hour).ok_or(refused)?,
                        end: hour_time(hour + 1).ok_or(refused)?,
                    }),
                }
            }
            SelectionPolicy::FixedBlock => {
                if !grid.is_available(date, hour + 1) {
                    return Err(refused);
                }
                SelectionState::FixedBlockPicked(CandidateSelection {
                    room_id: grid.room_id,
                    date,
                    start: hour_time(hour).ok_or(refused)?,
                    end: hour_time(hour + 2).ok_or(refused)?,
                })
            }
        };

        self.state = next;
        debug!(state = ?self.state, "selection changed");
        self.candidate()
            .map(ClickOutcome::Selected)
            .ok_or(refused)
    }
}
