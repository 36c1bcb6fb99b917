use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

use super::loop_worker::{sampling_loop, SharedSource};
use super::{PresenceSample, PresenceSource};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Upper bound on how long stopping waits for each task to wind down.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const SAMPLE_BUFFER: usize = 64;

/// Owns the sampling task of one session and the task that consumes its readings.
pub struct SamplingController {
    sampler: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl SamplingController {
    /// Opens the device and launches the sampling loop. The returned receiver yields
    /// one sample per tick, in order.
    pub async fn start(
        user_id: &str,
        mut source: Box<dyn PresenceSource>,
        interval: Duration,
        sample_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<PresenceSample>)> {
        let source = tokio::task::spawn_blocking(move || -> Result<Box<dyn PresenceSource>> {
            source.open()?;
            Ok(source)
        })
        .await
        .context("presence source open worker failed to join")??;

        let shared: SharedSource = Arc::new(Mutex::new(source));
        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);

        let handle = tokio::spawn(sampling_loop(
            user_id.to_string(),
            shared,
            interval,
            sample_timeout,
            tx,
            cancel_token.clone(),
        ));

        log_info!(
            "sampling started for {} every {}ms",
            user_id,
            interval.as_millis()
        );

        Ok((
            Self {
                sampler: Some(handle),
                driver: None,
                cancel_token,
            },
            rx,
        ))
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn attach_driver(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.driver.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels both tasks and waits up to [`STOP_TIMEOUT`] for each. Idempotent.
    ///
    /// `from_driver` is set when the driver task itself is ending the session; its
    /// own handle is then detached instead of joined.
    pub async fn stop(&mut self, from_driver: bool) -> Result<()> {
        self.cancel_token.cancel();

        let sampler = self.sampler.take();
        let driver = self.driver.take();

        let mut result = Ok(());
        if let Some(handle) = sampler {
            if let Err(err) = join_bounded(handle, "sampling loop").await {
                result = Err(err);
            }
        }
        if let Some(handle) = driver {
            if !from_driver {
                if let Err(err) = join_bounded(handle, "session driver").await {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        result
    }
}

async fn join_bounded(mut handle: JoinHandle<()>, what: &str) -> Result<()> {
    match time::timeout(STOP_TIMEOUT, &mut handle).await {
        Ok(joined) => joined.with_context(|| format!("{what} task failed to join")),
        Err(_) => {
            log_warn!("{} did not stop within {:?}; aborting", what, STOP_TIMEOUT);
            handle.abort();
            Err(anyhow!("{what} did not stop within {STOP_TIMEOUT:?}"))
        }
    }
}

impl Drop for SamplingController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
