//! # Session Management Module
//!
//! Owns the connection to one heart rate sensor for the lifetime of the process.
//!
//! ## Key Components
//! - `SessionManager`: configures and starts a session
//! - `SessionHandle`: cloneable control surface (stop, state, statistics)
//! - `ConnectionState`: explicit state machine of the connection loop
//!
//! ## Threading
//! The loop runs on a dedicated OS thread driving its own current-thread Tokio
//! runtime, so the consumer never blocks on Bluetooth I/O. The only shared
//! state is the stop flag, the sample channel, and snapshots of state and
//! statistics behind short-lived locks.
//!
//! ## Retry Policy
//! - Connection attempt fails: wait `retry_backoff`, then try again
//! - Established link is lost: reconnect immediately
//! - Stop requested: leave the loop at the next suspension point, release the link

use crate::error::{ConnectionError, ShutdownTimedOut};
use crate::link::{Connector, Link};
use crate::measurement;
use crate::sample_channel::{HeartRateSample, SampleSender};
use crate::statistics::Statistics;
use crate::stop_signal::StopSignal;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Upper bound for releasing a link during teardown
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Stopping,
    Stopped,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Stopped, _) => false,
            (Stopping, Stopped) => true,
            (Stopping, _) => false,
            (_, Stopping) => true,
            (Idle, Connecting) => true,
            (Connecting, Connecting) | (Connecting, Connected) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Connecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Stopping => "stopping",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub retry_backoff: Duration,
    pub liveness_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicked holder cannot leave a Copy snapshot half-written
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Why the connected phase ended
#[derive(Debug)]
enum LinkOutcome {
    Stopped,
    Lost(String),
}

/// Configures a monitoring session. `start` consumes it.
pub struct SessionManager<C: Connector> {
    connector: C,
    config: SessionConfig,
    samples: SampleSender,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, config: SessionConfig, samples: SampleSender) -> Self {
        Self {
            connector,
            config,
            samples,
        }
    }

    /// Start monitoring `address` on a background thread.
    ///
    /// The handle is returned in `Connecting`; the session keeps retrying
    /// until a stop is requested.
    pub fn start(
        self,
        address: impl Into<String>,
        characteristic: Uuid,
    ) -> Result<SessionHandle, ConnectionError> {
        let address = address.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConnectionError::RuntimeCreation(e.to_string()))?;

        let stop = StopSignal::new();
        let state = Arc::new(Mutex::new(ConnectionState::Idle));
        let statistics = Arc::new(Mutex::new(Statistics::new()));
        let (done_tx, done_rx) = bounded::<()>(0);

        let mut session = Session {
            connector: self.connector,
            config: self.config,
            samples: self.samples,
            address: address.clone(),
            characteristic,
            stop: stop.clone(),
            state: state.clone(),
            statistics: statistics.clone(),
            next_sequence: 1,
        };
        session.transition(ConnectionState::Connecting);

        std::thread::Builder::new()
            .name("hr-session".to_string())
            .spawn(move || run_session(runtime, session, done_tx))
            .map_err(|e| {
                *lock(&state) = ConnectionState::Stopped;
                ConnectionError::ThreadSpawn(e.to_string())
            })?;

        log::info!("Session started for {} ({})", address, characteristic);

        Ok(SessionHandle {
            stop,
            state,
            statistics,
            done: done_rx,
        })
    }
}

/// Forces `Stopped` when the session thread exits, including by unwinding.
struct StoppedOnExit(Arc<Mutex<ConnectionState>>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        let mut state = lock(&self.0);
        if *state != ConnectionState::Stopped {
            log::error!("Session thread exited abnormally in state {}", *state);
            *state = ConnectionState::Stopped;
        }
    }
}

fn run_session<C: Connector>(runtime: Runtime, mut session: Session<C>, done: Sender<()>) {
    // locals drop before arguments, so waiters woken by `done` already see `Stopped`
    let _stopped = StoppedOnExit(session.state.clone());

    runtime.block_on(session.run());
    // no pending work may outlive the loop on this runtime
    runtime.shutdown_timeout(Duration::from_millis(100));
    session.transition(ConnectionState::Stopped);
    log::info!("Session stopped");
    // dropping the sender is what shutdown waiters observe
    drop(done);
}

struct Session<C: Connector> {
    connector: C,
    config: SessionConfig,
    samples: SampleSender,
    address: String,
    characteristic: Uuid,
    stop: StopSignal,
    state: Arc<Mutex<ConnectionState>>,
    statistics: Arc<Mutex<Statistics>>,
    next_sequence: u64,
}

impl<C: Connector> Session<C> {
    fn transition(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        let current = *state;
        debug_assert!(
            current.can_transition_to(next),
            "invalid session transition {} -> {}",
            current,
            next
        );
        if current.can_transition_to(next) {
            log::debug!("Session: {} -> {}", current, next);
            *state = next;
        } else {
            log::warn!("Session: ignoring invalid transition {} -> {}", current, next);
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    async fn run(&mut self) {
        let stop = self.stop.clone();

        while !stop.is_requested() {
            if self.state() != ConnectionState::Connecting {
                self.transition(ConnectionState::Connecting);
            }

            let attempt = tokio::select! {
                biased;
                _ = stop.wait() => None,
                result = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.connector.connect(&self.address, self.characteristic),
                ) => Some(result),
            };

            // a dropped connect future may have left the device connected
            let attempt = match attempt {
                Some(Ok(result)) => result,
                Some(Err(_)) => {
                    self.abort_pending().await;
                    Err(ConnectionError::Timeout {
                        device_id: self.address.clone(),
                        after: self.config.connect_timeout,
                    })
                }
                None => {
                    self.transition(ConnectionState::Stopping);
                    self.abort_pending().await;
                    break;
                }
            };

            let mut link = match attempt {
                Ok(link) => link,
                Err(e) => {
                    log::warn!("{}, retrying in {:?}", e, self.config.retry_backoff);
                    if !stop.sleep(self.config.retry_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if stop.is_requested() {
                self.transition(ConnectionState::Stopping);
                release(&mut link).await;
                break;
            }

            self.transition(ConnectionState::Connected);
            log::info!("Connected to {}, receiving heart rate", self.address);

            match self.pump(&mut link, &stop).await {
                LinkOutcome::Stopped => {
                    self.transition(ConnectionState::Stopping);
                    release(&mut link).await;
                    break;
                }
                LinkOutcome::Lost(reason) => {
                    log::warn!("{} disconnected ({}), reconnecting", self.address, reason);
                    self.transition(ConnectionState::Disconnected);
                    release(&mut link).await;
                }
            }
        }

        if self.state() != ConnectionState::Stopping {
            self.transition(ConnectionState::Stopping);
        }
    }

    async fn abort_pending(&self) {
        if tokio::time::timeout(RELEASE_TIMEOUT, self.connector.abort_pending())
            .await
            .is_err()
        {
            log::debug!("Releasing half-open connection timed out");
        }
    }

    /// Deliver notifications until the link is lost or a stop arrives.
    async fn pump(&mut self, link: &mut C::Link, stop: &StopSignal) -> LinkOutcome {
        let period = self.config.liveness_interval;
        let mut liveness = tokio::time::interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.wait() => return LinkOutcome::Stopped,
                notification = link.next_notification() => match notification {
                    Some(payload) => self.handle_notification(&payload),
                    None => return LinkOutcome::Lost("notification stream ended".to_string()),
                },
                _ = liveness.tick() => {
                    let alive = tokio::select! {
                        biased;
                        _ = stop.wait() => return LinkOutcome::Stopped,
                        alive = link.is_connected() => alive,
                    };
                    match alive {
                        Ok(true) => {}
                        Ok(false) => {
                            return LinkOutcome::Lost("link reported disconnected".to_string())
                        }
                        Err(e) => return LinkOutcome::Lost(e.to_string()),
                    }
                }
            }
        }
    }

    fn handle_notification(&mut self, payload: &[u8]) {
        let value = match measurement::decode(payload) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Dropping notification {:02x?}: {}", payload, e);
                return;
            }
        };

        lock(&self.statistics).update(value);

        let sample = HeartRateSample {
            value,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        log::info!("Heart rate: {} bpm", value);
        self.samples.push(sample);
    }
}

async fn release<L: Link>(link: &mut L) {
    match tokio::time::timeout(RELEASE_TIMEOUT, link.disconnect()).await {
        Ok(Ok(())) => log::debug!("Link released"),
        Ok(Err(e)) => log::debug!("Releasing link failed: {}", e),
        Err(_) => log::debug!("Releasing link timed out"),
    }
}

/// Control surface for a running session. Clones share the same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    stop: StopSignal,
    state: Arc<Mutex<ConnectionState>>,
    statistics: Arc<Mutex<Statistics>>,
    done: Receiver<()>,
}

impl SessionHandle {
    /// Ask the session to stop. Safe to call any number of times from any thread.
    pub fn request_stop(&self) {
        if self.stop.request() {
            log::info!("Stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() != ConnectionState::Stopped
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Copy of the statistics at this instant
    pub fn statistics(&self) -> Statistics {
        *lock(&self.statistics)
    }

    /// Block until the session thread has finished, or `timeout` elapses.
    pub fn wait_stopped(&self, timeout: Duration) -> Result<(), ShutdownTimedOut> {
        match self.done.recv_timeout(timeout) {
            // the sender is never used, only dropped
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Ok(()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(ShutdownTimedOut { waited: timeout })
            }
        }
    }

    pub fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownTimedOut> {
        crate::shutdown::shutdown(self, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_channel::{sample_channel, SampleReceiver};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant as StdInstant;

    enum Attempt {
        Fail,
        Succeed(Vec<Vec<u8>>),
        /// Notification stream ends after the payloads
        Ending(Vec<Vec<u8>>),
        /// Liveness check errors on its first tick
        FailingLiveness,
        /// Device connects at the OS level, subscribing never finishes
        Hang,
        /// A stop lands while the attempt is completing
        StopThenSucceed,
        Panic,
    }

    /// Scripted connector. Attempts past the end of the script fail.
    #[derive(Default)]
    struct MockConnector {
        script: Mutex<VecDeque<Attempt>>,
        attempts: Arc<AtomicUsize>,
        links: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
        releases: Arc<AtomicUsize>,
        polls: Arc<AtomicUsize>,
        os_connected: Arc<AtomicBool>,
        aborts: Arc<AtomicUsize>,
        stopper: Arc<Mutex<Option<SessionHandle>>>,
    }

    impl MockConnector {
        fn new(script: Vec<Attempt>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn link(&self, payloads: Vec<Vec<u8>>) -> MockLink {
            let connected = Arc::new(AtomicBool::new(true));
            self.links.lock().unwrap().push(connected.clone());
            MockLink {
                payloads: payloads.into(),
                ends: false,
                liveness_fails: false,
                connected,
                releases: self.releases.clone(),
                polls: self.polls.clone(),
            }
        }
    }

    struct MockLink {
        payloads: VecDeque<Vec<u8>>,
        ends: bool,
        liveness_fails: bool,
        connected: Arc<AtomicBool>,
        releases: Arc<AtomicUsize>,
        polls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Link = MockLink;

        async fn connect(
            &self,
            address: &str,
            _characteristic: Uuid,
        ) -> Result<MockLink, ConnectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Attempt::Succeed(payloads)) => Ok(self.link(payloads)),
                Some(Attempt::Ending(payloads)) => Ok(MockLink {
                    ends: true,
                    ..self.link(payloads)
                }),
                Some(Attempt::FailingLiveness) => Ok(MockLink {
                    liveness_fails: true,
                    ..self.link(Vec::new())
                }),
                Some(Attempt::Hang) => {
                    self.os_connected.store(true, Ordering::SeqCst);
                    std::future::pending().await
                }
                Some(Attempt::StopThenSucceed) => {
                    let handle = loop {
                        let installed = self.stopper.lock().unwrap().clone();
                        match installed {
                            Some(handle) => break handle,
                            None => tokio::time::sleep(Duration::from_millis(5)).await,
                        }
                    };
                    handle.request_stop();
                    Ok(self.link(vec![vec![0x00, 99]]))
                }
                Some(Attempt::Panic) => panic!("adapter backend crashed"),
                Some(Attempt::Fail) | None => Err(ConnectionError::DeviceConnection {
                    device_id: address.to_string(),
                    reason: "out of range".to_string(),
                }),
            }
        }

        async fn abort_pending(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.os_connected.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Link for MockLink {
        async fn next_notification(&mut self) -> Option<Vec<u8>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.payloads.pop_front() {
                Some(payload) => Some(payload),
                None if self.ends => None,
                None => std::future::pending().await,
            }
        }

        async fn is_connected(&mut self) -> Result<bool, ConnectionError> {
            if self.liveness_fails {
                return Err(ConnectionError::DeviceConnection {
                    device_id: "AA:BB:CC:DD:EE:FF".to_string(),
                    reason: "adapter went away".to_string(),
                });
            }
            Ok(self.connected.load(Ordering::SeqCst))
        }

        async fn disconnect(&mut self) -> Result<(), ConnectionError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config(retry_backoff: Duration) -> SessionConfig {
        SessionConfig {
            retry_backoff,
            liveness_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(1),
        }
    }

    fn start(connector: MockConnector, config: SessionConfig) -> (SessionHandle, SampleReceiver) {
        let (tx, rx) = sample_channel();
        let handle = SessionManager::new(connector, config, tx)
            .start("AA:BB:CC:DD:EE:FF", measurement::HEART_RATE_MEASUREMENT_UUID)
            .expect("session starts");
        (handle, rx)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = StdInstant::now() + timeout;
        while StdInstant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Stopping.can_transition_to(Stopped));
        for state in [Idle, Connecting, Connected, Disconnected] {
            assert!(state.can_transition_to(Stopping));
        }

        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Stopping.can_transition_to(Connecting));
        for state in [Idle, Connecting, Connected, Disconnected, Stopping, Stopped] {
            assert!(!Stopped.can_transition_to(state));
        }
    }

    #[test]
    fn test_notifications_reach_channel_and_statistics() {
        let connector = MockConnector::new(vec![Attempt::Succeed(vec![
            vec![0x00, 65],
            vec![0x01, 70, 0x00],
            vec![0x00, 80],
        ])]);
        let (handle, rx) = start(connector, fast_config(Duration::from_secs(5)));

        let mut samples = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            samples.extend(rx.try_pop_all());
            samples.len() == 3
        }));

        assert_eq!(
            samples,
            vec![
                HeartRateSample { value: 65, sequence: 1 },
                HeartRateSample { value: 70, sequence: 2 },
                HeartRateSample { value: 80, sequence: 3 },
            ]
        );
        assert_eq!(handle.state(), ConnectionState::Connected);

        let stats = handle.statistics();
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.sum(), 215);
        assert_eq!(stats.max(), Some(80));
        assert_eq!(stats.min(), Some(65));

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
    }

    #[test]
    fn test_malformed_notification_is_dropped_not_fatal() {
        let connector = MockConnector::new(vec![Attempt::Succeed(vec![
            vec![0x00, 72],
            vec![0x01, 0x50],
            vec![],
            vec![0x00, 74],
        ])]);
        let attempts = connector.attempts.clone();
        let (handle, rx) = start(connector, fast_config(Duration::from_secs(5)));

        let mut samples = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            samples.extend(rx.try_pop_all());
            samples.len() == 2
        }));

        let values: Vec<u16> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![72, 74]);
        assert_eq!(samples[1].sequence, 2);
        assert_eq!(handle.statistics().count(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ConnectionState::Connected);

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
    }

    #[test]
    fn test_reconnects_after_connection_error() {
        let connector = MockConnector::new(vec![
            Attempt::Fail,
            Attempt::Succeed(vec![vec![0x00, 90]]),
        ]);
        let attempts = connector.attempts.clone();
        let (handle, rx) = start(connector, fast_config(Duration::from_millis(50)));

        assert!(wait_until(Duration::from_secs(2), || {
            handle.state() == ConnectionState::Connected
        }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let mut samples = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            samples.extend(rx.try_pop_all());
            !samples.is_empty()
        }));
        assert_eq!(samples[0], HeartRateSample { value: 90, sequence: 1 });

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
    }

    #[test]
    fn test_lost_link_reconnects_without_backoff() {
        let connector = MockConnector::new(vec![
            Attempt::Succeed(vec![vec![0x00, 60]]),
            Attempt::Succeed(vec![vec![0x00, 61]]),
        ]);
        let attempts = connector.attempts.clone();
        let links = connector.links.clone();
        let releases = connector.releases.clone();
        // a backoff this long would fail the test if it were applied
        let (handle, rx) = start(connector, fast_config(Duration::from_secs(30)));

        assert!(wait_until(Duration::from_secs(2), || {
            handle.state() == ConnectionState::Connected
        }));
        links.lock().unwrap()[0].store(false, Ordering::SeqCst);

        assert!(wait_until(Duration::from_secs(2), || {
            attempts.load(Ordering::SeqCst) == 2 && handle.state() == ConnectionState::Connected
        }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let mut samples = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            samples.extend(rx.try_pop_all());
            samples.len() == 2
        }));
        let sequences: Vec<u64> = samples.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_interrupts_backoff_sleep() {
        let connector = MockConnector::new(vec![Attempt::Fail]);
        let attempts = connector.attempts.clone();
        let (handle, _rx) = start(connector, fast_config(Duration::from_secs(5)));

        assert!(wait_until(Duration::from_secs(2), || {
            attempts.load(Ordering::SeqCst) == 1
        }));
        std::thread::sleep(Duration::from_millis(50));

        let started = StdInstant::now();
        handle.shutdown(Duration::from_secs(4)).expect("clean shutdown");

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert!(!handle.is_running());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_stop_requests_tear_down_once() {
        let connector = MockConnector::new(vec![Attempt::Succeed(vec![])]);
        let releases = connector.releases.clone();
        let (handle, _rx) = start(connector, fast_config(Duration::from_secs(5)));

        assert!(wait_until(Duration::from_secs(2), || {
            handle.state() == ConnectionState::Connected
        }));

        let callers: Vec<_> = (0..2)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.shutdown(Duration::from_secs(2)))
            })
            .collect();
        for caller in callers {
            assert!(caller.join().expect("caller panicked").is_ok());
        }

        handle.request_stop();
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_running_until_stopped() {
        let connector = MockConnector::new(vec![Attempt::Succeed(vec![])]);
        let (handle, _rx) = start(connector, fast_config(Duration::from_secs(5)));
        assert!(handle.is_running());

        handle.request_stop();
        assert!(handle.wait_stopped(Duration::from_secs(2)).is_ok());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stream_end_reconnects_without_backoff() {
        let connector = MockConnector::new(vec![
            Attempt::Ending(vec![vec![0x00, 60]]),
            Attempt::Succeed(vec![vec![0x00, 61]]),
        ]);
        let attempts = connector.attempts.clone();
        let releases = connector.releases.clone();
        let (handle, rx) = start(connector, fast_config(Duration::from_secs(30)));

        assert!(wait_until(Duration::from_secs(2), || {
            attempts.load(Ordering::SeqCst) == 2 && handle.state() == ConnectionState::Connected
        }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let mut samples = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            samples.extend(rx.try_pop_all());
            samples.len() == 2
        }));
        let values: Vec<u16> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![60, 61]);

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
    }

    #[test]
    fn test_liveness_error_is_treated_as_lost_link() {
        let connector = MockConnector::new(vec![
            Attempt::FailingLiveness,
            Attempt::Succeed(vec![]),
        ]);
        let attempts = connector.attempts.clone();
        let releases = connector.releases.clone();
        let (handle, _rx) = start(connector, fast_config(Duration::from_secs(30)));

        assert!(wait_until(Duration::from_secs(2), || {
            attempts.load(Ordering::SeqCst) == 2 && handle.state() == ConnectionState::Connected
        }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_interrupts_pending_connect_and_releases_it() {
        let connector = MockConnector::new(vec![Attempt::Hang]);
        let attempts = connector.attempts.clone();
        let os_connected = connector.os_connected.clone();
        let aborts = connector.aborts.clone();
        let (handle, _rx) = start(connector, fast_config(Duration::from_secs(5)));

        assert!(wait_until(Duration::from_secs(2), || {
            os_connected.load(Ordering::SeqCst)
        }));

        let started = StdInstant::now();
        handle.shutdown(Duration::from_secs(4)).expect("clean shutdown");

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!os_connected.load(Ordering::SeqCst));
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_timeout_releases_half_open_link() {
        let connector = MockConnector::new(vec![Attempt::Hang]);
        let attempts = connector.attempts.clone();
        let os_connected = connector.os_connected.clone();
        let aborts = connector.aborts.clone();
        let config = SessionConfig {
            connect_timeout: Duration::from_millis(100),
            ..fast_config(Duration::from_secs(5))
        };
        let (handle, _rx) = start(connector, config);

        assert!(wait_until(Duration::from_secs(2), || {
            aborts.load(Ordering::SeqCst) == 1
        }));
        assert!(!os_connected.load(Ordering::SeqCst));
        // timed out attempts back off like any other failure
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ConnectionState::Connecting);

        handle.shutdown(Duration::from_secs(2)).expect("clean shutdown");
    }

    #[test]
    fn test_stop_after_connect_releases_without_connecting() {
        let connector = MockConnector::new(vec![Attempt::StopThenSucceed]);
        let stopper = connector.stopper.clone();
        let releases = connector.releases.clone();
        let polls = connector.polls.clone();
        let attempts = connector.attempts.clone();
        let (handle, rx) = start(connector, fast_config(Duration::from_secs(5)));
        *stopper.lock().unwrap() = Some(handle.clone());

        assert!(handle.wait_stopped(Duration::from_secs(2)).is_ok());
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        // the link was never pumped, so it never counted as connected
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert!(rx.try_pop_all().is_empty());
    }

    #[test]
    fn test_panicking_session_thread_ends_stopped() {
        let connector = MockConnector::new(vec![Attempt::Panic]);
        let (handle, rx) = start(connector, fast_config(Duration::from_secs(5)));

        assert!(handle.wait_stopped(Duration::from_secs(2)).is_ok());
        assert_eq!(handle.state(), ConnectionState::Stopped);
        assert!(!handle.is_running());
        assert!(wait_until(Duration::from_secs(1), || {
            rx.try_pop_all().is_empty() && rx.is_closed()
        }));
    }
}
