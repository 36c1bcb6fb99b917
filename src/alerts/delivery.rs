use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::models::Alert;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const SPEECH_TIMEOUT_SECS: u64 = 15;

/// Best-effort sink for alert messages.
#[async_trait]
pub trait AlertDelivery: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Hands the alert to `delivery` on its own task and returns immediately.
///
/// Failures are logged and dropped. There is no retry: the alert already lives on
/// the session, delivery only notifies.
pub fn dispatch(delivery: Arc<dyn AlertDelivery>, alert: Alert) {
    tokio::spawn(async move {
        if let Err(err) = delivery.deliver(&alert).await {
            log_warn!("alert delivery failed ({:?}): {err:#}", alert.channel);
        }
    });
}

/// Text channel: writes the message to the log.
pub struct LogDelivery;

#[async_trait]
impl AlertDelivery for LogDelivery {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        log_info!("[alert {}] {}", alert.timestamp.to_rfc3339(), alert.message);
        Ok(())
    }
}

/// Voice channel: runs a text-to-speech command with the message as last argument
/// (`say` on macOS, `espeak` or `spd-say` elsewhere).
pub struct SpeechDelivery {
    program: String,
    args: Vec<String>,
}

impl SpeechDelivery {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("say", Vec::new())
        } else {
            Self::new("espeak", Vec::new())
        }
    }
}

#[async_trait]
impl AlertDelivery for SpeechDelivery {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let status = tokio::time::timeout(
            Duration::from_secs(SPEECH_TIMEOUT_SECS),
            Command::new(&self.program)
                .args(&self.args)
                .arg(&alert.message)
                .kill_on_drop(true)
                .status(),
        )
        .await
        .with_context(|| format!("{} timed out", self.program))?
        .with_context(|| format!("failed to run {}", self.program))?;

        if !status.success() {
            bail!("{} exited with {status}", self.program);
        }
        Ok(())
    }
}

/// Routes each alert by its channel to the text and/or voice sink.
pub struct ChannelDelivery {
    text: Arc<dyn AlertDelivery>,
    voice: Arc<dyn AlertDelivery>,
}

impl ChannelDelivery {
    pub fn new(text: Arc<dyn AlertDelivery>, voice: Arc<dyn AlertDelivery>) -> Self {
        Self { text, voice }
    }
}

impl Default for ChannelDelivery {
    fn default() -> Self {
        Self::new(Arc::new(LogDelivery), Arc::new(SpeechDelivery::platform_default()))
    }
}

#[async_trait]
impl AlertDelivery for ChannelDelivery {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let mut first_err = None;
        if alert.channel.writes() {
            if let Err(err) = self.text.deliver(alert).await {
                first_err = Some(err);
            }
        }
        if alert.channel.speaks() {
            if let Err(err) = self.voice.deliver(alert).await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertChannel, AlertLevel};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertDelivery for Recording {
        async fn deliver(&self, alert: &Alert) -> Result<()> {
            self.seen.lock().unwrap().push(alert.message.clone());
            if self.fail {
                bail!("speaker unplugged");
            }
            Ok(())
        }
    }

    fn alert(channel: AlertChannel) -> Alert {
        Alert {
            message: "come back".into(),
            timestamp: Utc::now(),
            level: AlertLevel::Warning,
            channel,
        }
    }

    #[tokio::test]
    async fn test_channel_routing() {
        let text = Arc::new(Recording::default());
        let voice = Arc::new(Recording::default());
        let delivery = ChannelDelivery::new(text.clone(), voice.clone());

        delivery.deliver(&alert(AlertChannel::Text)).await.unwrap();
        delivery.deliver(&alert(AlertChannel::Voice)).await.unwrap();
        delivery.deliver(&alert(AlertChannel::Both)).await.unwrap();
        delivery.deliver(&alert(AlertChannel::None)).await.unwrap();

        assert_eq!(text.seen.lock().unwrap().len(), 2);
        assert_eq!(voice.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_voice_failure_still_writes_text() {
        let text = Arc::new(Recording::default());
        let voice = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let delivery = ChannelDelivery::new(text.clone(), voice);

        assert!(delivery.deliver(&alert(AlertChannel::Both)).await.is_err());
        assert_eq!(text.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failure() {
        let voice = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        dispatch(voice.clone(), alert(AlertChannel::Voice));

        for _ in 0..50 {
            if !voice.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(voice.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_speech_program_is_an_error() {
        let speech = SpeechDelivery::new("studywatch-no-such-tts-binary", Vec::new());
        assert!(speech.deliver(&alert(AlertChannel::Voice)).await.is_err());
    }
}
