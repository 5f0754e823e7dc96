//! Core domain types shared across the engine.

pub mod market;
pub mod position;
pub mod signal;

pub use market::{Bar, Direction, Tick, VenuePosition};
pub use position::{PendingRetest, Position};
pub use signal::{ScreeningVerdict, Signal};
