//! Consumer-side polling state machine.
//!
//! Drives a dashboard's view of a session from repeated reads on a fixed
//! interval; there is no push channel. Terminal conditions are a record
//! with `complete: true` (exactly one [`PollEvent::Complete`] is emitted)
//! and a not-found condition that persists for the whole grace window
//! ([`PollEvent::GaveUp`]). Infrastructure errors are reported but leave
//! the schedule untouched.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::record::{ProgressRecord, SessionId};

/// Outcome of a single read against the synchronization service.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Record(ProgressRecord),
    /// The session key is absent or expired; indistinguishable by design.
    NotFound,
}

/// Transient failure reaching the service. Safe to retry on the normal
/// schedule; never treated as a verdict about the session itself.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response status: {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Body(String),
}

/// The seam between the state machine and the wire. Production code uses
/// [`crate::client::HttpProgressSource`]; tests script their own.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch(&self, id: &SessionId) -> Result<Fetched, SourceError>;
}

/// Connection state as displayed by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Before the first read completes.
    Connecting,
    /// A read is in flight.
    Polling,
    /// The last read returned a record.
    Connected,
    /// The last read failed with an infrastructure error.
    Error,
    /// The last read found no record; the give-up countdown is running.
    NotFound,
}

/// Events emitted by [`Poller::run`] over its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Status(ConnectionStatus),
    /// A non-terminal record was observed.
    Snapshot(ProgressRecord),
    /// Terminal: `complete: true` observed. Emitted at most once; the loop
    /// stops immediately after.
    Complete(ProgressRecord),
    /// Terminal: the session stayed not-found for the whole grace window.
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed delay between reads.
    pub interval: Duration,
    /// How long a not-found condition may persist before giving up.
    pub give_up_after: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            give_up_after: Duration::from_secs(10),
        }
    }
}

/// Polls one session until a terminal condition or cancellation.
pub struct Poller<S> {
    source: S,
    session: SessionId,
    config: PollerConfig,
}

impl<S: ProgressSource> Poller<S> {
    pub fn new(source: S, session: SessionId) -> Self {
        Self::with_config(source, session, PollerConfig::default())
    }

    pub fn with_config(source: S, session: SessionId, config: PollerConfig) -> Self {
        Self {
            source,
            session,
            config,
        }
    }

    /// Runs the polling loop. Returns when a terminal event has been
    /// emitted, the token is cancelled, or the receiver is dropped; no
    /// event is ever sent after any of those.
    pub async fn run(self, events: mpsc::Sender<PollEvent>, cancel: CancellationToken) {
        let mut not_found_since: Option<Instant> = None;

        if emit(&events, PollEvent::Status(ConnectionStatus::Connecting))
            .await
            .is_err()
        {
            return;
        }

        loop {
            if emit(&events, PollEvent::Status(ConnectionStatus::Polling))
                .await
                .is_err()
            {
                return;
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                fetched = self.source.fetch(&self.session) => fetched,
            };

            match fetched {
                Ok(Fetched::Record(record)) => {
                    // A live record clears any pending give-up countdown.
                    not_found_since = None;
                    if record.complete {
                        debug!(session = %self.session, "session complete, stopping poll");
                        let _ = emit(&events, PollEvent::Complete(record)).await;
                        return;
                    }
                    if emit(&events, PollEvent::Status(ConnectionStatus::Connected))
                        .await
                        .is_err()
                        || emit(&events, PollEvent::Snapshot(record)).await.is_err()
                    {
                        return;
                    }
                }
                Ok(Fetched::NotFound) => {
                    not_found_since.get_or_insert_with(Instant::now);
                    if emit(&events, PollEvent::Status(ConnectionStatus::NotFound))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    warn!(session = %self.session, error = %e, "progress read failed");
                    if emit(&events, PollEvent::Status(ConnectionStatus::Error))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            let give_up_at = not_found_since.map(|since| since + self.config.give_up_after);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = sleep_until_opt(give_up_at) => {
                    debug!(session = %self.session, "session never appeared, giving up");
                    let _ = emit(&events, PollEvent::GaveUp).await;
                    return;
                }
                _ = time::sleep(self.config.interval) => {}
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn emit(events: &mpsc::Sender<PollEvent>, event: PollEvent) -> Result<(), ()> {
    events.send(event).await.map_err(|_| ())
}

/// Emits a 1-second elapsed-time tick (total seconds so far), independent
/// of the poll interval, until cancelled or the receiver is dropped.
pub async fn elapsed_ticker(ticks: mpsc::Sender<u64>, cancel: CancellationToken) {
    let mut interval = time::interval(Duration::from_secs(1));
    interval.tick().await; // completes immediately
    let mut seconds = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                seconds += 1;
                if ticks.send(seconds).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Phase;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn record(complete: bool) -> ProgressRecord {
        ProgressRecord {
            session_id: SessionId::from_str("s1"),
            current_step: 1,
            completed_steps: vec![],
            current_action: "Installing Git".to_string(),
            tool_status: BTreeMap::new(),
            errors: vec![],
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            phase: Phase::Phase1,
            complete,
        }
    }

    /// Replays a fixed script of fetch results; repeats the last entry
    /// once the script is exhausted.
    struct ScriptedSource {
        script: Mutex<Vec<Result<Fetched, SourceError>>>,
        last: Fetched,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Fetched, SourceError>>, last: Fetched) -> Self {
            Self {
                script: Mutex::new(script),
                last,
            }
        }
    }

    #[async_trait]
    impl ProgressSource for ScriptedSource {
        async fn fetch(&self, _id: &SessionId) -> Result<Fetched, SourceError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(self.last.clone())
            } else {
                script.remove(0)
            }
        }
    }

    async fn collect(mut rx: mpsc::Receiver<PollEvent>) -> Vec<PollEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn completion_fires_once_and_stops_the_loop() {
        let source = ScriptedSource::new(
            vec![Ok(Fetched::Record(record(false)))],
            Fetched::Record(record(true)),
        );
        let (tx, rx) = mpsc::channel(64);
        let poller = Poller::new(source, SessionId::from_str("s1"));
        let handle = tokio::spawn(poller.run(tx, CancellationToken::new()));

        let events = collect(rx).await;
        handle.await.unwrap();

        let completions = events
            .iter()
            .filter(|e| matches!(e, PollEvent::Complete(_)))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(events.last(), Some(&PollEvent::Complete(record(true))));
        // One non-terminal snapshot was observed before completion.
        assert!(events.contains(&PollEvent::Snapshot(record(false))));
    }

    #[tokio::test(start_paused = true)]
    async fn infrastructure_errors_keep_the_schedule() {
        let source = ScriptedSource::new(
            vec![
                Err(SourceError::Transport("connection refused".to_string())),
                Err(SourceError::Status(503)),
            ],
            Fetched::Record(record(true)),
        );
        let (tx, rx) = mpsc::channel(64);
        let poller = Poller::new(source, SessionId::from_str("s1"));
        tokio::spawn(poller.run(tx, CancellationToken::new()));

        let events = collect(rx).await;
        let error_statuses = events
            .iter()
            .filter(|e| matches!(e, PollEvent::Status(ConnectionStatus::Error)))
            .count();
        assert_eq!(error_statuses, 2);
        // Polling survived the failures and still reached completion.
        assert!(matches!(events.last(), Some(PollEvent::Complete(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_not_found_gives_up_after_grace_window() {
        let source = ScriptedSource::new(vec![], Fetched::NotFound);
        let (tx, rx) = mpsc::channel(64);
        let config = PollerConfig::default();
        let poller = Poller::with_config(source, SessionId::from_str("typo"), config);

        let started = Instant::now();
        tokio::spawn(poller.run(tx, CancellationToken::new()));
        let events = collect(rx).await;

        assert_eq!(events.last(), Some(&PollEvent::GaveUp));
        assert!(events.contains(&PollEvent::Status(ConnectionStatus::NotFound)));
        // Gave up at the 10-second mark, not on a poll boundary after it.
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_read_cancels_the_give_up_countdown() {
        // Not found for 8 seconds (4 polls), then the record appears.
        let source = ScriptedSource::new(
            vec![
                Ok(Fetched::NotFound),
                Ok(Fetched::NotFound),
                Ok(Fetched::NotFound),
                Ok(Fetched::NotFound),
                Ok(Fetched::Record(record(false))),
            ],
            Fetched::Record(record(true)),
        );
        let (tx, rx) = mpsc::channel(64);
        let poller = Poller::new(source, SessionId::from_str("s1"));
        tokio::spawn(poller.run(tx, CancellationToken::new()));

        let events = collect(rx).await;
        assert!(!events.contains(&PollEvent::GaveUp));
        assert!(matches!(events.last(), Some(PollEvent::Complete(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_without_further_events() {
        let source = ScriptedSource::new(vec![], Fetched::Record(record(false)));
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let poller = Poller::new(source, SessionId::from_str("s1"));
        let handle = tokio::spawn(poller.run(tx, cancel.clone()));

        // Let a few polls happen, then cancel during the sleep phase.
        time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        let events = collect(rx).await;
        // No terminal event was emitted, and the channel is closed.
        assert!(!events.iter().any(|e| matches!(
            e,
            PollEvent::Complete(_) | PollEvent::GaveUp
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_ticker_counts_seconds_independently() {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(elapsed_ticker(tx, cancel.clone()));

        time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();

        let mut ticks = Vec::new();
        while let Some(tick) = rx.recv().await {
            ticks.push(tick);
        }
        assert_eq!(ticks, vec![1, 2, 3]);
    }
}
