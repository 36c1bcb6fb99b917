//! Plain data structures shared by the engine, the coordinator and persistence.

mod alert;
mod session;
mod status;

pub use alert::{Alert, AlertChannel, AlertLevel};
pub use session::{EndReason, Interval, Session, SessionStatus, MAX_RECENT_ALERTS};
pub use status::Status;
