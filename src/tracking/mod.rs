//! Frame-level presence to stable status: run-length debouncing and the interval log.

pub mod debounce;
pub mod intervals;

pub use debounce::Debouncer;
