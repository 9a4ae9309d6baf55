/// First bookable hour of the daily grid (09:00).
pub const DAY_START_HOUR: u32 = 9;

/// Number of one-hour slots per day (09:00 through 20:00 starts).
pub const SLOTS_PER_DAY: usize = 12;

/// Monday through Friday.
pub const DAYS_PER_WEEK: usize = 5;

/// Longest allowed reservation.
pub const MAX_RESERVATION_MINUTES: i64 = 120;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_NOTE_LEN: usize = 1024;

/// Largest room the directory accepts.
pub const MAX_ROOM_CAPACITY: u32 = 10_000;

/// One past the last slot start hour.
pub const fn day_end_hour() -> u32 {
    DAY_START_HOUR + SLOTS_PER_DAY as u32
}
