//! Engine ownership and scheduling.

pub mod exposure;
pub mod supervisor;

pub use exposure::ExposureGuard;
pub use supervisor::{EngineSnapshot, EngineState, EngineSupervisor};
