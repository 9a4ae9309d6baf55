use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Cross-component notifications for whatever view layer hosts the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Switch to the booking form, pre-loaded with this reservation.
    EditRequested { reservation_id: Ulid },
    /// Availability for this room/date changed after a commit.
    RoomChanged { room_id: Ulid, date: NaiveDate },
}

/// Broadcast hub; every subscriber sees every signal.
pub struct SignalHub {
    sender: broadcast::Sender<Signal>,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Send a signal. No-op if nobody is listening.
    pub fn send(&self, signal: Signal) {
        let _ = self.sender.send(signal);
    }
}
