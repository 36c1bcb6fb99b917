//! SQLite persistence for sessions, their intervals and alerts, and study totals.

mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{GlobalStats, UserStats};
