//! Signal generator interface.
//!
//! Generators form a fixed, tagged set behind one trait; the router picks
//! exactly one per instrument per cycle based on the measured regime.
//! There is no open-ended plugin loading.

use crate::domain::{Bar, Signal};
use crate::error::Result;
use crate::indicators::IndicatorLibrary;

/// How an accepted signal reaches the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStyle {
    /// Order immediately after screening passes.
    Immediate,
    /// Park in the retest queue and wait for a pullback confirmation.
    AwaitRetest,
}

pub trait SignalGenerator: Send + Sync {
    fn id(&self) -> &'static str;

    fn entry_style(&self) -> EntryStyle {
        EntryStyle::Immediate
    }

    /// Produce zero or one signal from the bar history (oldest first).
    /// Insufficient or degenerate data returns `Ok(None)`, not an error.
    fn generate(
        &self,
        bars: &[Bar],
        indicators: &dyn IndicatorLibrary,
    ) -> Result<Option<Signal>>;
}
