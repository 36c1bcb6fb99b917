//! Session lifecycle: the registry of live sessions, the per-session driver, and
//! the storage seam.

pub mod controller;
pub mod state;
pub mod store;

pub use controller::{PresenceFeed, SessionCoordinator};
pub(crate) use state::ActiveSession;
pub use state::{LiveSnapshot, SessionEvent, TickOutcome};
pub use store::SessionStore;
