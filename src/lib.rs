pub mod booking;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod identity;
pub mod limits;
pub mod model;
pub mod observability;
pub mod signal;
pub mod store;
