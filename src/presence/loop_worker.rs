use std::sync::{Arc, Mutex, TryLockError};

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{PresenceSample, PresenceSource};

// Per-tick readings log at debug level.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Kept under the sampling-controller stop bound.
const RELEASE_WAIT: Duration = Duration::from_millis(750);

pub(crate) type SharedSource = Arc<Mutex<Box<dyn PresenceSource>>>;

/// Polls `source` every `interval` and forwards each reading to `samples`.
///
/// A reading that fails or exceeds `sample_timeout` is forwarded as "not detected"
/// so a stuck camera reads as absence instead of stalling the session. Exits on
/// cancellation or when the receiver is gone, releasing the source either way.
pub async fn sampling_loop(
    user_id: String,
    source: SharedSource,
    interval: Duration,
    sample_timeout: Duration,
    samples: mpsc::Sender<PresenceSample>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let timestamp = Utc::now();
                let detected = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    detected = read_presence(&user_id, &source, sample_timeout) => detected,
                };

                log_debug!("presence sample for {}: {}", user_id, detected);
                let sent = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    sent = samples.send(PresenceSample { detected, timestamp }) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    release_source(&user_id, &source).await;
    log_info!("sampling loop for {} shutting down", user_id);
}

async fn read_presence(user_id: &str, source: &SharedSource, sample_timeout: Duration) -> bool {
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || -> Result<bool> {
        let mut guard = match source.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(anyhow!("presence source still busy with a previous sample"))
            }
        };
        guard.sample()
    });

    match tokio::time::timeout(sample_timeout, task).await {
        Ok(Ok(Ok(detected))) => detected,
        Ok(Ok(Err(err))) => {
            log_warn!("presence sample failed for {}: {err:#}", user_id);
            false
        }
        Ok(Err(join_err)) => {
            log_warn!("presence sample worker for {} panicked: {join_err}", user_id);
            false
        }
        Err(_) => {
            log_warn!(
                "presence sample timeout (> {}ms) for {}",
                sample_timeout.as_millis(),
                user_id
            );
            false
        }
    }
}

/// Releases the device once no read holds it. A read still in flight keeps the
/// lock, so the release waits for it on the blocking pool for up to `RELEASE_WAIT`.
/// Past that the loop exits anyway and the release lands when the read returns.
async fn release_source(user_id: &str, source: &SharedSource) {
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = match source.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.release();
    });

    match tokio::time::timeout(RELEASE_WAIT, task).await {
        Ok(Ok(())) => {}
        Ok(Err(join_err)) => {
            log_warn!("presence source release for {} panicked: {join_err}", user_id)
        }
        Err(_) => log_warn!(
            "presence source for {} still busy after {:?}; release deferred to the pending read",
            user_id,
            RELEASE_WAIT
        ),
    }
}
