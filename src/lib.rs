pub mod alerts;
pub mod analytics;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod presence;
pub mod session;
pub mod settings;
pub mod tracking;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use alerts::ChannelDelivery;
use db::Database;
use presence::FlagFileFactory;
use session::{PresenceFeed, SessionCoordinator, SessionEvent};
use settings::SettingsStore;

pub use error::{SessionError, SessionResult};
pub use metrics::Metrics;
pub use models::{Alert, AlertChannel, EndReason, Interval, Session, SessionStatus, Status};

/// Command-line options: `studywatch [user] [timer-minutes]`.
#[derive(Debug, Clone, PartialEq)]
struct RunOptions {
    user_id: String,
    timer: Option<Duration>,
}

impl RunOptions {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let user_id = args
            .next()
            .or_else(|| std::env::var("STUDYWATCH_USER").ok())
            .unwrap_or_else(|| "local".to_string());
        let timer = args
            .next()
            .map(|minutes| {
                minutes
                    .parse::<u64>()
                    .with_context(|| format!("timer must be whole minutes, got {minutes}"))
            })
            .transpose()?
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes * 60));

        Ok(Self { user_id, timer })
    }
}

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("STUDYWATCH_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("neither STUDYWATCH_DATA_DIR nor HOME is set")?;
    Ok(PathBuf::from(home).join(".studywatch"))
}

/// Runs one session for the given user until it ends on its own or Ctrl-C.
///
/// Presence is read from a flag file written by an external detector
/// (`STUDYWATCH_PRESENCE_FILE`, default `<data dir>/presence`).
pub async fn run() -> Result<()> {
    utils::logging::init();

    let options = RunOptions::parse(std::env::args().skip(1))?;
    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let engine = settings.engine().with_env_overrides();
    let db = Database::new(data_dir.join("studywatch.sqlite3"))?;

    let presence_file = std::env::var("STUDYWATCH_PRESENCE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("presence"));

    let coordinator = SessionCoordinator::new(
        Arc::new(db.clone()),
        Arc::new(ChannelDelivery::default()),
        PresenceFeed::Local(Arc::new(FlagFileFactory::new(presence_file))),
        engine,
    );

    match coordinator.recover_stale().await {
        Ok(0) => {}
        Ok(count) => info!("Marked {count} abandoned session(s) as interrupted"),
        Err(err) => warn!("Failed to recover stale sessions: {err}"),
    }

    let mut events = coordinator.subscribe();
    let user_id = options.user_id.clone();
    let session_id = match coordinator.resume(&user_id).await? {
        Some(session_id) => session_id,
        None => coordinator.start(&user_id, options.timer).await?,
    };
    coordinator.spawn_checkpointer().await;
    info!("Studying as {user_id} (session {session_id}); Ctrl-C to finish");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                match coordinator.end(&user_id, Utc::now()).await {
                    Ok(metrics) => println!("{}", serde_json::to_string(&metrics)?),
                    Err(err) => warn!("Nothing to end: {err}"),
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let SessionEvent::Ended { session_id: ended, .. } = &event {
                        if *ended == session_id {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {skipped} session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    coordinator.shutdown().await;

    let summary = analytics::today_summary(&db, &user_id, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_parse_user_and_timer() {
        let options = RunOptions::parse(args(&["ada", "25"])).unwrap();
        assert_eq!(options.user_id, "ada");
        assert_eq!(options.timer, Some(Duration::from_secs(25 * 60)));
    }

    #[test]
    fn test_zero_timer_means_untimed() {
        let options = RunOptions::parse(args(&["ada", "0"])).unwrap();
        assert_eq!(options.timer, None);
    }

    #[test]
    fn test_rejects_non_numeric_timer() {
        assert!(RunOptions::parse(args(&["ada", "soon"])).is_err());
    }
}
