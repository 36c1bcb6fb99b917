use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    alerts::{dispatch, AlertDelivery},
    error::{SessionError, SessionResult},
    metrics::{self, Metrics},
    models::{EndReason, Session, SessionStatus},
    presence::{PresenceSample, PresenceSourceFactory, SamplingController},
    settings::EngineSettings,
    tracking::intervals,
};

use super::{ActiveSession, LiveSnapshot, SessionEvent, SessionStore, TickOutcome};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const EVENT_BUFFER: usize = 256;

/// Where presence readings come from.
#[derive(Clone)]
pub enum PresenceFeed {
    /// A sampling loop per session, polling a source built by the factory.
    Local(Arc<dyn PresenceSourceFactory>),
    /// Readings are pushed in by the caller through [`SessionCoordinator::tick`].
    External,
}

/// Owns every live session and drives each one through its lifecycle.
///
/// One lock guards the whole registry. It is never held across a store write, an
/// alert delivery, or a join on the sampling tasks.
#[derive(Clone)]
pub struct SessionCoordinator {
    sessions: Arc<Mutex<HashMap<String, ActiveSession>>>,
    store: Arc<dyn SessionStore>,
    delivery: Arc<dyn AlertDelivery>,
    feed: PresenceFeed,
    settings: EngineSettings,
    events: broadcast::Sender<SessionEvent>,
    checkpointer: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_token: CancellationToken,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        delivery: Arc<dyn AlertDelivery>,
        feed: PresenceFeed,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            store,
            delivery,
            feed,
            settings,
            events,
            checkpointer: Arc::new(Mutex::new(None)),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self, user_id: &str, timer: Option<Duration>) -> SessionResult<String> {
        self.start_at(user_id, timer, Utc::now()).await
    }

    /// Opens a session for `user_id` starting at `now`, with an optional study timer.
    pub async fn start_at(
        &self,
        user_id: &str,
        timer: Option<Duration>,
        now: DateTime<Utc>,
    ) -> SessionResult<String> {
        if self.sessions.lock().await.contains_key(user_id) {
            return Err(SessionError::AlreadyActive);
        }

        let timer_ms = timer.map(|timer| timer.as_millis().min(i64::MAX as u128) as u64);
        let session = Session::begin(Uuid::new_v4().to_string(), user_id.to_string(), now, timer_ms);
        let session_id = session.id.clone();

        self.activate(session, false).await?;
        log_info!("session {} started for {}", session_id, user_id);
        Ok(session_id)
    }

    /// Reinstates the user's most recent unfinished session if it was checkpointed
    /// within the restore window. Returns the live session id, if any.
    pub async fn resume(&self, user_id: &str) -> SessionResult<Option<String>> {
        if let Some(active) = self.sessions.lock().await.get(user_id) {
            return Ok(Some(active.id().to_string()));
        }

        let found = self
            .store
            .find_open_session(user_id, self.settings.restore_window())
            .await
            .map_err(SessionError::PersistenceUnavailable)?;

        let Some(session) = found else {
            return Ok(None);
        };
        let session_id = session.id.clone();
        self.activate(session, true).await?;
        log_info!("session {} resumed for {}", session_id, user_id);
        Ok(Some(session_id))
    }

    async fn activate(&self, session: Session, resumed: bool) -> SessionResult<()> {
        let user_id = session.user_id.clone();
        let session_id = session.id.clone();

        let sampling = match &self.feed {
            PresenceFeed::Local(factory) => Some(self.open_sampling(factory.as_ref(), &user_id).await?),
            PresenceFeed::External => None,
        };

        let record = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&user_id) {
                drop(sessions);
                if let Some((mut controller, _)) = sampling {
                    if let Err(err) = controller.stop(false).await {
                        log_warn!("failed to stop sampling for {}: {err:#}", user_id);
                    }
                }
                return Err(SessionError::AlreadyActive);
            }

            let mut active = ActiveSession::new(session, &self.settings);
            if let Some((mut controller, samples)) = sampling {
                let driver = tokio::spawn(self.clone().drive(
                    user_id.clone(),
                    session_id.clone(),
                    samples,
                    controller.cancel_token(),
                ));
                controller.attach_driver(driver);
                active.sampling = Some(controller);
            }
            let checkpoint_at = if resumed {
                Utc::now()
            } else {
                active.session.started_at
            };
            let record = active.checkpoint_record(checkpoint_at);
            sessions.insert(user_id.clone(), active);
            record
        };

        self.checkpoint(&record).await;
        self.emit(SessionEvent::Started {
            user_id,
            session_id,
            resumed,
        });
        Ok(())
    }

    async fn open_sampling(
        &self,
        factory: &dyn PresenceSourceFactory,
        user_id: &str,
    ) -> SessionResult<(SamplingController, mpsc::Receiver<PresenceSample>)> {
        let source = factory
            .create(user_id)
            .map_err(|err| SessionError::CameraUnavailable(format!("{err:#}")))?;

        SamplingController::start(
            user_id,
            source,
            self.settings.sample_interval(),
            self.settings.sample_timeout(),
        )
        .await
        .map_err(|err| SessionError::CameraUnavailable(format!("{err:#}")))
    }

    /// Feeds one raw presence reading into the user's session.
    pub async fn tick(
        &self,
        user_id: &str,
        detected: bool,
        now: DateTime<Utc>,
    ) -> SessionResult<TickOutcome> {
        self.tick_session(user_id, None, detected, now, false).await
    }

    async fn tick_session(
        &self,
        user_id: &str,
        expected_session: Option<&str>,
        detected: bool,
        now: DateTime<Utc>,
        from_driver: bool,
    ) -> SessionResult<TickOutcome> {
        let (session_id, outcome, at, record) = {
            let mut sessions = self.sessions.lock().await;
            let active = sessions
                .get_mut(user_id)
                .filter(|active| expected_session.map_or(true, |id| active.id() == id))
                .ok_or(SessionError::NoActiveSession)?;

            let outcome = active.advance(detected, now);
            let at = active.clamp(now);
            // Status changes and alerts are written right away; ending writes in `finish`.
            let record = (outcome.ended.is_none()
                && (outcome.status_changed || outcome.alert.is_some()))
            .then(|| active.checkpoint_record(at));
            (active.id().to_string(), outcome, at, record)
        };

        if outcome.status_changed {
            log_info!("{} is now {}", user_id, outcome.status);
            self.emit(SessionEvent::StatusChanged {
                user_id: user_id.to_string(),
                session_id: session_id.clone(),
                status: outcome.status,
                at,
            });
        }

        if let Some(alert) = &outcome.alert {
            log_warn!("alert for {}: {}", user_id, alert.message);
            dispatch(Arc::clone(&self.delivery), alert.clone());
            self.emit(SessionEvent::Alert {
                user_id: user_id.to_string(),
                session_id: session_id.clone(),
                alert: alert.clone(),
            });
        }

        if let Some(record) = &record {
            self.checkpoint(record).await;
        }

        if let Some(reason) = outcome.ended {
            let removed = {
                let mut sessions = self.sessions.lock().await;
                let same_session = sessions
                    .get(user_id)
                    .map_or(false, |active| active.id() == session_id);
                if same_session {
                    sessions.remove(user_id)
                } else {
                    None
                }
            };
            if let Some(active) = removed {
                self.finish(active, reason, at, from_driver).await;
            }
        }

        Ok(outcome)
    }

    pub async fn current(&self, user_id: &str, now: DateTime<Utc>) -> SessionResult<LiveSnapshot> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(user_id)
            .map(|active| active.snapshot(now))
            .ok_or(SessionError::NoActiveSession)
    }

    /// Ends the session normally. Always leaves the user without an active session,
    /// even when the final write fails.
    pub async fn end(&self, user_id: &str, now: DateTime<Utc>) -> SessionResult<Metrics> {
        let active = self
            .sessions
            .lock()
            .await
            .remove(user_id)
            .ok_or(SessionError::NoActiveSession)?;

        Ok(self.finish(active, EndReason::Manual, now, false).await)
    }

    /// Discards the user's session after a best-effort checkpoint. Never fails and
    /// does not count towards user or global totals.
    pub async fn force_clear(&self, user_id: &str) {
        let Some(mut active) = self.sessions.lock().await.remove(user_id) else {
            return;
        };

        let metrics = active.close(EndReason::ForceCleared, Utc::now());
        self.stop_sampling(&mut active, false).await;
        self.checkpoint(&active.session).await;

        log_info!("session {} force-cleared for {}", active.id(), user_id);
        self.emit(SessionEvent::Ended {
            user_id: user_id.to_string(),
            session_id: active.session.id.clone(),
            reason: EndReason::ForceCleared,
            metrics,
        });
    }

    async fn finish(
        &self,
        mut active: ActiveSession,
        reason: EndReason,
        now: DateTime<Utc>,
        from_driver: bool,
    ) -> Metrics {
        let metrics = active.close(reason, now);
        self.stop_sampling(&mut active, from_driver).await;

        if let Err(err) = self.store.save_final(&active.session, &metrics).await {
            log_error!(
                "failed to persist final state of session {}: {err:#}",
                active.id()
            );
        }

        log_info!(
            "session {} ended ({}): studying {}ms, away {}ms, focus {:.1}",
            active.id(),
            reason.describe(),
            metrics.studying_ms,
            metrics.away_ms,
            metrics.focus_score
        );
        self.emit(SessionEvent::Ended {
            user_id: active.session.user_id.clone(),
            session_id: active.session.id.clone(),
            reason,
            metrics: metrics.clone(),
        });
        metrics
    }

    async fn stop_sampling(&self, active: &mut ActiveSession, from_driver: bool) {
        if let Some(mut controller) = active.sampling.take() {
            if let Err(err) = controller.stop(from_driver).await {
                log_warn!("sampling for session {} did not stop cleanly: {err:#}", active.id());
            }
        }
    }

    /// Consumes one session's presence samples until it ends or is cancelled.
    async fn drive(
        self,
        user_id: String,
        session_id: String,
        mut samples: mpsc::Receiver<PresenceSample>,
        cancel_token: CancellationToken,
    ) {
        loop {
            let sample = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                sample = samples.recv() => sample,
            };
            let Some(sample) = sample else {
                break;
            };

            match self
                .tick_session(&user_id, Some(&session_id), sample.detected, sample.timestamp, true)
                .await
            {
                Ok(outcome) if outcome.ended.is_some() => break,
                Ok(_) => {}
                Err(SessionError::NoActiveSession) => break,
                Err(err) => {
                    log_error!("tick failed for session {}: {err}", session_id);
                    break;
                }
            }
        }
    }

    async fn checkpoint(&self, session: &Session) {
        match self.store.save_checkpoint(session).await {
            Ok(()) => self.emit(SessionEvent::Checkpointed {
                user_id: session.user_id.clone(),
                session_id: session.id.clone(),
                at: session.updated_at,
            }),
            Err(err) => log_error!("failed to checkpoint session {}: {err:#}", session.id),
        }
    }

    /// Writes every live session once. Each write stands alone: one failing session
    /// does not keep the others from being saved.
    pub async fn checkpoint_all(&self, now: DateTime<Utc>) -> usize {
        let records: Vec<Session> = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .values_mut()
                .map(|active| active.checkpoint_record(now))
                .collect()
        };

        let count = records.len();
        for record in &records {
            self.checkpoint(record).await;
        }
        count
    }

    /// Starts the periodic checkpoint loop. Calling it again replaces the loop.
    pub async fn spawn_checkpointer(&self) {
        let mut guard = self.checkpointer.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let coordinator = self.clone();
        let period = self.settings.checkpoint_interval();
        let cancel_token = self.shutdown_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.checkpoint_all(Utc::now()).await;
                    }
                }
            }
        });

        *guard = Some(handle);
    }

    /// Marks running sessions that went quiet beyond the restore window as
    /// interrupted. Their last interval is closed at the last checkpoint and no
    /// totals are counted. Returns how many were marked.
    pub async fn recover_stale(&self) -> SessionResult<usize> {
        let stale = self
            .store
            .find_stale_sessions(self.settings.restore_window())
            .await
            .map_err(SessionError::PersistenceUnavailable)?;

        let live: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions.values().map(|active| active.id().to_string()).collect()
        };

        let mut recovered = 0;
        for mut session in stale {
            if live.contains(&session.id) {
                continue;
            }

            let last_seen = session.updated_at.max(session.started_at);
            intervals::close_open(&mut session.intervals, last_seen);
            session.metrics = metrics::compute(&session, last_seen);
            session.status = SessionStatus::Interrupted;
            session.ended_at = Some(last_seen);

            match self.store.save_checkpoint(&session).await {
                Ok(()) => {
                    log_warn!("session {} of {} marked interrupted", session.id, session.user_id);
                    recovered += 1;
                }
                Err(err) => log_error!("failed to mark session {} interrupted: {err:#}", session.id),
            }
        }
        Ok(recovered)
    }

    /// Stops the checkpoint loop and every sampling loop after a last checkpoint.
    /// Sessions stay open in storage so they can be resumed.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        if let Some(handle) = self.checkpointer.lock().await.take() {
            if time::timeout(Duration::from_secs(1), handle).await.is_err() {
                log_warn!("checkpoint loop did not stop in time");
            }
        }

        self.checkpoint_all(Utc::now()).await;

        let drained: Vec<ActiveSession> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, active)| active).collect()
        };
        for mut active in drained {
            self.stop_sampling(&mut active, false).await;
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alert, Status};
    use crate::presence::{PresenceSource, ScriptedSource};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex as StdMutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    #[derive(Default)]
    struct RecordingStore {
        checkpoints: StdMutex<Vec<Session>>,
        finals: StdMutex<Vec<(Session, Metrics)>>,
        open: StdMutex<Option<Session>>,
        stale: StdMutex<Vec<Session>>,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn checkpoints(&self) -> Vec<Session> {
            self.checkpoints.lock().unwrap().clone()
        }

        fn finals(&self) -> Vec<(Session, Metrics)> {
            self.finals.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionStore for RecordingStore {
        async fn save_checkpoint(&self, session: &Session) -> Result<()> {
            if self.fail {
                bail!("disk full");
            }
            self.checkpoints.lock().unwrap().push(session.clone());
            Ok(())
        }

        async fn save_final(&self, session: &Session, metrics: &Metrics) -> Result<()> {
            if self.fail {
                bail!("disk full");
            }
            self.finals
                .lock()
                .unwrap()
                .push((session.clone(), metrics.clone()));
            Ok(())
        }

        async fn find_open_session(
            &self,
            user_id: &str,
            _max_age: ChronoDuration,
        ) -> Result<Option<Session>> {
            Ok(self
                .open
                .lock()
                .unwrap()
                .clone()
                .filter(|session| session.user_id == user_id))
        }

        async fn find_stale_sessions(&self, _max_age: ChronoDuration) -> Result<Vec<Session>> {
            Ok(self.stale.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingDelivery {
        delivered: StdMutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertDelivery for RecordingDelivery {
        async fn deliver(&self, alert: &Alert) -> Result<()> {
            self.delivered.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Harness {
        coordinator: SessionCoordinator,
        store: Arc<RecordingStore>,
        delivery: Arc<RecordingDelivery>,
    }

    fn harness_with(store: RecordingStore, feed: PresenceFeed, settings: EngineSettings) -> Harness {
        let store = Arc::new(store);
        let delivery = Arc::new(RecordingDelivery::default());
        let coordinator = SessionCoordinator::new(store.clone(), delivery.clone(), feed, settings);
        Harness {
            coordinator,
            store,
            delivery,
        }
    }

    fn harness() -> Harness {
        harness_with(
            RecordingStore::default(),
            PresenceFeed::External,
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_start_checkpoints_and_rejects_second_start() {
        let h = harness();
        let id = h.coordinator.start_at("ada", None, at(0)).await.unwrap();

        let checkpoints = h.store.checkpoints();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].id, id);
        assert_eq!(checkpoints[0].status, SessionStatus::Running);

        let second = h.coordinator.start_at("ada", None, at(1)).await;
        assert!(matches!(second, Err(SessionError::AlreadyActive)));

        // Other users are independent.
        assert!(h.coordinator.start_at("bob", None, at(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_tick_without_session() {
        let h = harness();
        let result = h.coordinator.tick("ada", true, at(1)).await;
        assert!(matches!(result, Err(SessionError::NoActiveSession)));
        assert!(matches!(
            h.coordinator.current("ada", at(1)).await,
            Err(SessionError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn test_present_run_then_absent_run() {
        let h = harness();
        let mut events = h.coordinator.subscribe();
        h.coordinator.start_at("ada", None, at(0)).await.unwrap();

        let readings = [true, true, true, false, false, false, false, false, false, false, false];
        for (i, detected) in readings.into_iter().enumerate() {
            h.coordinator.tick("ada", detected, at(i as i64 + 1)).await.unwrap();
        }

        let snapshot = h.coordinator.current("ada", at(11)).await.unwrap();
        assert_eq!(snapshot.status, Status::Away);
        assert_eq!(snapshot.intervals.len(), 2);
        assert_eq!(snapshot.intervals[0].status, Status::Studying);
        assert_eq!(snapshot.intervals[0].start, at(0));
        assert_eq!(snapshot.intervals[0].end, Some(at(11)));
        assert_eq!(snapshot.intervals[1].start, at(11));
        assert!(snapshot.intervals[1].is_open());

        let mut changes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::StatusChanged { status, at, .. } = event {
                changes.push((status, at));
            }
        }
        assert_eq!(changes, vec![(Status::Away, at(11))]);
    }

    #[tokio::test]
    async fn test_single_flipped_reading_keeps_status() {
        let h = harness();
        h.coordinator.start_at("ada", None, at(0)).await.unwrap();

        for i in 1..=20 {
            let detected = i != 10;
            let outcome = h.coordinator.tick("ada", detected, at(i)).await.unwrap();
            assert!(!outcome.status_changed);
        }
        let snapshot = h.coordinator.current("ada", at(20)).await.unwrap();
        assert_eq!(snapshot.intervals.len(), 1);
    }

    #[tokio::test]
    async fn test_long_absence_escalates_to_termination() {
        let settings = EngineSettings {
            away_threshold_ticks: 1,
            ..EngineSettings::default()
        };
        let h = harness_with(RecordingStore::default(), PresenceFeed::External, settings);
        h.coordinator.start_at("ada", None, at(0)).await.unwrap();

        let mut alert_times = Vec::new();
        let mut ended_at = None;
        for secs in 0..=181 {
            match h.coordinator.tick("ada", false, at(secs)).await {
                Ok(outcome) => {
                    if let Some(alert) = outcome.alert {
                        alert_times.push(alert.timestamp);
                    }
                    if let Some(reason) = outcome.ended {
                        assert_eq!(reason, EndReason::TooMuchTimeAway);
                        ended_at = Some(secs);
                    }
                }
                Err(SessionError::NoActiveSession) => break,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!(alert_times, vec![at(60), at(120), at(180)]);
        assert_eq!(ended_at, Some(180));

        let finals = h.store.finals();
        assert_eq!(finals.len(), 1);
        let (session, metrics) = &finals[0];
        assert_eq!(session.status, SessionStatus::Terminated);
        assert_eq!(session.total_alerts, 3);
        assert_eq!(metrics.away_ms, 180_000);
        assert_eq!(metrics.focus_score, 0.0);

        for _ in 0..100 {
            if h.delivery.delivered.lock().unwrap().len() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.delivery.delivered.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_alert_and_status_change_are_checkpointed_immediately() {
        let settings = EngineSettings {
            away_threshold_ticks: 1,
            ..EngineSettings::default()
        };
        let h = harness_with(RecordingStore::default(), PresenceFeed::External, settings);
        h.coordinator.start_at("ada", None, at(0)).await.unwrap();

        h.coordinator.tick("ada", false, at(1)).await.unwrap();
        let checkpoints = h.store.checkpoints();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[1].intervals.len(), 2);
        assert_eq!(checkpoints[1].current_status(), Status::Away);

        // Quiet ticks do not write.
        for secs in 2..61 {
            h.coordinator.tick("ada", false, at(secs)).await.unwrap();
        }
        assert_eq!(h.store.checkpoints().len(), 2);

        let outcome = h.coordinator.tick("ada", false, at(61)).await.unwrap();
        assert!(outcome.alert.is_some());
        let last = h.store.checkpoints().pop().unwrap();
        assert_eq!(last.total_alerts, 1);
        assert_eq!(last.alerts.len(), 1);
        assert_eq!(last.updated_at, at(61));
        assert_eq!(last.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_end_mid_interval_counts_up_to_now() {
        let h = harness();
        let mut events = h.coordinator.subscribe();
        h.coordinator.start_at("ada", None, at(0)).await.unwrap();
        for secs in 1..=3 {
            h.coordinator.tick("ada", true, at(secs)).await.unwrap();
        }

        let end = at(90) + ChronoDuration::milliseconds(500);
        let metrics = h.coordinator.end("ada", end).await.unwrap();
        assert_eq!(metrics.studying_ms, 90_500);
        assert_eq!(metrics.focus_score, 100.0);

        let finals = h.store.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].0.ended_at, Some(end));
        assert_eq!(finals[0].0.status, SessionStatus::Completed);
        assert!(finals[0].0.intervals.iter().all(|interval| !interval.is_open()));

        assert!(matches!(
            h.coordinator.end("ada", end).await,
            Err(SessionError::NoActiveSession)
        ));

        let mut saw_end = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Ended { reason, .. } = event {
                assert_eq!(reason, EndReason::Manual);
                saw_end = true;
            }
        }
        assert!(saw_end);
    }

    #[tokio::test]
    async fn test_timer_completes_session() {
        let h = harness();
        h.coordinator
            .start_at("ada", Some(Duration::from_secs(10)), at(0))
            .await
            .unwrap();

        let outcome = h.coordinator.tick("ada", true, at(5)).await.unwrap();
        assert_eq!(outcome.ended, None);
        let outcome = h.coordinator.tick("ada", true, at(10)).await.unwrap();
        assert_eq!(outcome.ended, Some(EndReason::TimerElapsed));

        assert_eq!(h.store.finals()[0].0.status, SessionStatus::Completed);
        assert!(h.coordinator.current("ada", at(11)).await.is_err());
    }

    #[tokio::test]
    async fn test_end_survives_persistence_failure() {
        let h = harness_with(
            RecordingStore::failing(),
            PresenceFeed::External,
            EngineSettings::default(),
        );
        h.coordinator.start_at("ada", None, at(0)).await.unwrap();

        let metrics = h.coordinator.end("ada", at(30)).await.unwrap();
        assert_eq!(metrics.studying_ms, 30_000);
        assert!(h.coordinator.current("ada", at(31)).await.is_err());
        assert!(h.coordinator.start_at("ada", None, at(40)).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_clear_never_fails() {
        let h = harness_with(
            RecordingStore::failing(),
            PresenceFeed::External,
            EngineSettings::default(),
        );
        h.coordinator.force_clear("nobody").await;

        h.coordinator.start_at("ada", None, at(0)).await.unwrap();
        h.coordinator.force_clear("ada").await;
        assert!(h.coordinator.current("ada", at(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_force_clear_checkpoints_without_finalizing() {
        let h = harness();
        h.coordinator.start_at("ada", None, Utc::now()).await.unwrap();
        h.coordinator.force_clear("ada").await;

        assert!(h.store.finals().is_empty());
        let last = h.store.checkpoints().pop().unwrap();
        assert_eq!(last.status, SessionStatus::Cleared);
        assert!(last.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_camera_failure_leaves_no_session() {
        struct NoCamera;

        impl PresenceSource for NoCamera {
            fn open(&mut self) -> Result<()> {
                bail!("device busy");
            }

            fn sample(&mut self) -> Result<bool> {
                Ok(false)
            }
        }

        let factory = |_: &str| -> Result<Box<dyn PresenceSource>> { Ok(Box::new(NoCamera)) };
        let h = harness_with(
            RecordingStore::default(),
            PresenceFeed::Local(Arc::new(factory)),
            EngineSettings::default(),
        );

        for _ in 0..2 {
            match h.coordinator.start("ada", None).await {
                Err(SessionError::CameraUnavailable(message)) => {
                    assert!(message.contains("device busy"))
                }
                other => panic!("expected camera failure, got {other:?}"),
            }
        }
        assert!(h.store.checkpoints().is_empty());
        assert!(h.coordinator.current("ada", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_local_feed_drives_session() {
        let factory = |_: &str| -> Result<Box<dyn PresenceSource>> {
            Ok(Box::new(ScriptedSource::new([], false)))
        };
        let settings = EngineSettings {
            away_threshold_ticks: 3,
            sample_interval_ms: 10,
            ..EngineSettings::default()
        };
        let h = harness_with(
            RecordingStore::default(),
            PresenceFeed::Local(Arc::new(factory)),
            settings,
        );
        h.coordinator.start("ada", None).await.unwrap();

        let mut status = Status::Studying;
        for _ in 0..200 {
            status = h.coordinator.current("ada", Utc::now()).await.unwrap().status;
            if status == Status::Away {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, Status::Away);

        let metrics = h.coordinator.end("ada", Utc::now()).await.unwrap();
        assert!(metrics.away_ms <= metrics.accounted_ms());
        assert_eq!(h.store.finals().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpointer_writes_periodically() {
        let h = harness();
        h.coordinator.start("ada", None).await.unwrap();
        h.coordinator.start("bob", None).await.unwrap();
        assert_eq!(h.store.checkpoints().len(), 2);

        h.coordinator.spawn_checkpointer().await;
        time::sleep(Duration::from_secs(61)).await;

        let checkpoints = h.store.checkpoints();
        assert_eq!(checkpoints.len(), 6);
        assert_eq!(checkpoints.iter().filter(|s| s.user_id == "ada").count(), 3);

        h.coordinator.shutdown().await;
        assert!(h.coordinator.current("ada", Utc::now()).await.is_err());
        assert!(h.store.finals().is_empty());
    }

    #[tokio::test]
    async fn test_resume_reinstates_open_session() {
        let store = RecordingStore::default();
        let now = Utc::now();
        let mut stored = Session::begin("s-open".into(), "ada".into(), now - ChronoDuration::minutes(20), None);
        intervals::on_confirmed_status(&mut stored.intervals, Status::Away, now - ChronoDuration::minutes(5));
        stored.updated_at = now - ChronoDuration::minutes(1);
        *store.open.lock().unwrap() = Some(stored);

        let h = harness_with(store, PresenceFeed::External, EngineSettings::default());
        assert_eq!(h.coordinator.resume("bob").await.unwrap(), None);

        let resumed = h.coordinator.resume("ada").await.unwrap();
        assert_eq!(resumed.as_deref(), Some("s-open"));
        assert_eq!(h.coordinator.resume("ada").await.unwrap().as_deref(), Some("s-open"));

        let snapshot = h.coordinator.current("ada", Utc::now()).await.unwrap();
        assert_eq!(snapshot.status, Status::Away);
        assert_eq!(snapshot.intervals.len(), 2);
        assert!(matches!(
            h.coordinator.start("ada", None).await,
            Err(SessionError::AlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_recover_stale_marks_interrupted() {
        let store = RecordingStore::default();
        let mut stale = Session::begin("s-old".into(), "ada".into(), at(0), None);
        intervals::on_confirmed_status(&mut stale.intervals, Status::Away, at(600));
        stale.updated_at = at(900);
        store.stale.lock().unwrap().push(stale);

        let h = harness_with(store, PresenceFeed::External, EngineSettings::default());
        assert_eq!(h.coordinator.recover_stale().await.unwrap(), 1);

        let checkpoints = h.store.checkpoints();
        assert_eq!(checkpoints.len(), 1);
        let marked = &checkpoints[0];
        assert_eq!(marked.status, SessionStatus::Interrupted);
        assert_eq!(marked.ended_at, Some(at(900)));
        assert_eq!(marked.intervals[1].end, Some(at(900)));
        assert_eq!(marked.metrics.studying_ms, 600_000);
        assert_eq!(marked.metrics.away_ms, 300_000);
        assert!(h.store.finals().is_empty());
    }
}
