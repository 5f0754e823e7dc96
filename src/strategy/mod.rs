//! Signal generation: regime router and the generator set.

pub mod breakout;
pub mod mean_reversion;
pub mod router;
pub mod traits;

pub use breakout::{Breakout, BreakoutConfig};
pub use mean_reversion::{MeanReversion, MeanReversionConfig};
pub use router::{BlackoutWindow, RouterConfig, RoutedSignal, StrategyRouter};
pub use traits::{EntryStyle, SignalGenerator};
