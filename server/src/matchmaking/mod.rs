pub mod engine;
pub mod instance;
pub mod reaper;
pub mod routes;
pub mod store;

pub use engine::{Matchmaker, MatchmakingSettings};
pub use instance::{Instance, InstanceSummary, MatchmakingMode, Placement, SessionLocation};
pub use store::{InstanceStore, ALL_ROOMS};
