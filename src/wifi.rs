//! # Station Bring-up
//!
//! Drives a wireless station from power-on to "has an address" with a bounded
//! retry policy, and lets the caller await the terminal outcome.
//!
//! ## Two Execution Contexts
//!
//! The platform reports progress asynchronously through [`StationEvent`]s sent
//! over a bounded channel. A spawned handler task owns the receiving end,
//! applies each event to the [`ConnectionState`] machine and reissues connect
//! attempts on the driver. The caller of
//! [`ConnectivityManager::bring_up_station`] awaits a one-shot outcome which the
//! handler fulfils exactly once.
//!
//! ## State Machine
//!
//! ```text
//!   Idle --Started--> Connecting --AddressAcquired--> Connected
//!                      |   ^                              |
//!                      |   +-------Disconnected-----------+
//!                      |        (retry_count < ceiling)
//!                      +--Disconnected (ceiling reached)--> Failed
//! ```
//!
//! `Failed` absorbs every later event. `Connected` always has a zero retry
//! count; the counter restarts from zero after every successful association.
//!
//! ## Bounded Wait
//!
//! The wait ends on the first of: an outcome from the handler, the optional
//! deadline, or the cancellation signal. A platform that stops reporting
//! events therefore cannot hang the caller when a deadline is configured.

use crate::credentials::Credentials;
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Consecutive disconnects tolerated before the bring-up gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Depth of the driver -> handler notification queue.
pub const EVENT_QUEUE_DEPTH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Asynchronous notification delivered by a [`StationDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StationEvent {
    /// Station interface is up and ready for a connect attempt
    Started,
    /// Association attempt failed or an established link dropped
    Disconnected { reason: String },
    /// Address acquired; the station is usable
    AddressAcquired(IpAddr),
}

/// Terminal result of a bring-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Connected,
    Failed,
}

/// What the handler has to do after an event has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Issue a (re)connect attempt on the driver
    Connect,
    /// Deliver the terminal outcome to the waiting caller
    Signal(ConnectionOutcome),
    /// Nothing to do
    Ignore,
}

#[derive(Error, Debug)]
pub enum StationError {
    /// Driver refused an operation (init, start, connect, stop)
    #[error("station driver: {0}")]
    Driver(String),

    /// No terminal outcome before the deadline
    #[error("no station outcome within {0:?}")]
    DeadlineElapsed(Duration),

    /// Wait was cancelled by the caller
    #[error("station bring-up cancelled")]
    Cancelled,

    /// Notification handler went away without an outcome
    #[error("station notifications closed before an outcome")]
    NotificationsClosed,
}

/// Platform seam for the wireless station.
///
/// `connect` must not block for the duration of the association: it starts an
/// attempt and the result arrives later as a [`StationEvent`] on the sender
/// handed over in `init`.
pub trait StationDriver: Send + 'static {
    /// Prepare the interface and register the notification sender.
    fn init(
        &mut self,
        credentials: &Credentials,
        events: mpsc::Sender<StationEvent>,
    ) -> Result<(), StationError>;

    /// Bring the station up; expected to produce [`StationEvent::Started`].
    fn start(&mut self) -> Result<(), StationError>;

    /// Begin one association attempt.
    fn connect(&mut self) -> Result<(), StationError>;

    /// Tear the station down.
    fn stop(&mut self) -> Result<(), StationError>;
}

/// Phase plus retry counter, with the retry ceiling it enforces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    retry_count: u32,
    max_retries: u32,
}

impl ConnectionState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Apply one notification and report the follow-up action.
    pub fn apply(&mut self, event: &StationEvent) -> Action {
        if self.phase == ConnectionPhase::Failed {
            return Action::Ignore;
        }

        match event {
            StationEvent::Started => {
                self.phase = ConnectionPhase::Connecting;
                Action::Connect
            }
            StationEvent::Disconnected { .. } => {
                if self.retry_count < self.max_retries {
                    self.retry_count += 1;
                }
                if self.retry_count >= self.max_retries {
                    self.phase = ConnectionPhase::Failed;
                    Action::Signal(ConnectionOutcome::Failed)
                } else {
                    self.phase = ConnectionPhase::Connecting;
                    Action::Connect
                }
            }
            StationEvent::AddressAcquired(_) => {
                self.retry_count = 0;
                self.phase = ConnectionPhase::Connected;
                Action::Signal(ConnectionOutcome::Connected)
            }
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Owns a [`StationDriver`] and the notification handler task.
pub struct ConnectivityManager<D: StationDriver> {
    driver: Arc<Mutex<D>>,
    state: Arc<Mutex<ConnectionState>>,
    handler: Option<JoinHandle<()>>,
}

impl<D: StationDriver> ConnectivityManager<D> {
    pub fn new(driver: D, max_retries: u32) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            state: Arc::new(Mutex::new(ConnectionState::new(max_retries))),
            handler: None,
        }
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Bring the station up and wait for the terminal outcome.
    ///
    /// Returns `Ok(Connected)` or `Ok(Failed)` when the state machine reaches a
    /// terminal phase. Driver errors during init/start, the deadline, a
    /// cancellation via `cancel.notify_one()` and a vanished handler are
    /// reported as [`StationError`]s.
    pub async fn bring_up_station(
        &mut self,
        credentials: &Credentials,
        deadline: Option<Duration>,
        cancel: &Notify,
    ) -> Result<ConnectionOutcome, StationError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        lock_driver(&self.driver)?.init(credentials, event_tx)?;

        if let Some(previous) = self.handler.take() {
            previous.abort();
        }
        self.handler = Some(tokio::spawn(handle_events(
            Arc::clone(&self.driver),
            Arc::clone(&self.state),
            event_rx,
            outcome_tx,
        )));

        lock_driver(&self.driver)?.start()?;
        info!(target: "Station", "Station started, waiting for SSID:{} password:***", credentials.ssid);

        let deadline_elapsed = async {
            match deadline {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            outcome = outcome_rx => outcome.map_err(|_| StationError::NotificationsClosed),
            _ = cancel.notified() => Err(StationError::Cancelled),
            limit = deadline_elapsed => Err(StationError::DeadlineElapsed(limit)),
        };

        match &outcome {
            Ok(ConnectionOutcome::Connected) => {
                info!(target: "Station", "Connected to AP SSID:{} password:***", credentials.ssid)
            }
            Ok(ConnectionOutcome::Failed) => {
                error!(target: "Station", "Failed to connect to SSID:{} password:***", credentials.ssid)
            }
            Err(e) => error!(target: "Station", "Station bring-up aborted: {}", e),
        }
        outcome
    }

    /// Stop the driver and end the notification handler.
    pub fn shutdown(&mut self) -> Result<(), StationError> {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        info!(target: "Station", "Shutting down station");
        lock_driver(&self.driver)?.stop()
    }
}

impl<D: StationDriver> Drop for ConnectivityManager<D> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

fn lock_driver<D>(driver: &Mutex<D>) -> Result<MutexGuard<'_, D>, StationError> {
    driver
        .lock()
        .map_err(|_| StationError::Driver("driver lock poisoned".to_string()))
}

/// Notification handler: applies events until the driver drops its sender.
async fn handle_events<D: StationDriver>(
    driver: Arc<Mutex<D>>,
    state: Arc<Mutex<ConnectionState>>,
    mut events: mpsc::Receiver<StationEvent>,
    outcome_tx: oneshot::Sender<ConnectionOutcome>,
) {
    let mut outcome_tx = Some(outcome_tx);

    while let Some(event) = events.recv().await {
        let mut pending = Some(event);

        // A connect call that fails outright counts as a disconnect.
        while let Some(event) = pending.take() {
            let (action, snapshot) = match state.lock() {
                Ok(mut state) => (state.apply(&event), *state),
                Err(_) => {
                    error!(target: "Station", "Connection state poisoned, dropping notifications");
                    return;
                }
            };

            match &event {
                StationEvent::Started => info!(target: "Station", "Connecting to Wi-Fi..."),
                StationEvent::Disconnected { reason } => warn!(
                    target: "Station",
                    "Connect to the AP failed ({}), retry {}/{}",
                    reason, snapshot.retry_count, snapshot.max_retries
                ),
                StationEvent::AddressAcquired(ip) => {
                    info!(target: "Station", "Got IP Address: {}", ip)
                }
            }

            match action {
                Action::Connect => {
                    let attempt = match driver.lock() {
                        Ok(mut driver) => driver.connect(),
                        Err(_) => Err(StationError::Driver("driver lock poisoned".to_string())),
                    };
                    if let Err(e) = attempt {
                        pending = Some(StationEvent::Disconnected {
                            reason: e.to_string(),
                        });
                    }
                }
                Action::Signal(outcome) => {
                    if let Some(tx) = outcome_tx.take() {
                        let _ = tx.send(outcome);
                    }
                }
                Action::Ignore => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn disconnected() -> StationEvent {
        StationEvent::Disconnected {
            reason: "auth expire".to_string(),
        }
    }

    fn address() -> StationEvent {
        StationEvent::AddressAcquired(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)))
    }

    fn credentials() -> Credentials {
        Credentials {
            ssid: "home".to_string(),
            password: "hunter22".to_string(),
            api_key: "key".to_string(),
            city: "Brno".to_string(),
            country: "CZ".to_string(),
        }
    }

    /// Driver that answers each connect attempt with the next scripted event.
    struct ScriptedStation {
        script: VecDeque<StationEvent>,
        events: Option<mpsc::Sender<StationEvent>>,
        connects: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
        refuse_init: bool,
        refuse_connect: bool,
    }

    impl ScriptedStation {
        fn new(script: Vec<StationEvent>) -> Self {
            Self {
                script: script.into(),
                events: None,
                connects: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicBool::new(false)),
                refuse_init: false,
                refuse_connect: false,
            }
        }

        fn send(&self, event: StationEvent) {
            if let Some(events) = &self.events {
                events.try_send(event).unwrap();
            }
        }
    }

    impl StationDriver for ScriptedStation {
        fn init(
            &mut self,
            _credentials: &Credentials,
            events: mpsc::Sender<StationEvent>,
        ) -> Result<(), StationError> {
            if self.refuse_init {
                return Err(StationError::Driver("no such interface".to_string()));
            }
            self.events = Some(events);
            Ok(())
        }

        fn start(&mut self) -> Result<(), StationError> {
            self.send(StationEvent::Started);
            Ok(())
        }

        fn connect(&mut self) -> Result<(), StationError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect {
                return Err(StationError::Driver("radio busy".to_string()));
            }
            if let Some(event) = self.script.pop_front() {
                self.send(event);
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), StationError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_five_disconnects_fail_and_stay_failed() {
        let mut state = ConnectionState::default();
        state.apply(&StationEvent::Started);
        for _ in 0..4 {
            assert_eq!(state.apply(&disconnected()), Action::Connect);
            assert_eq!(state.phase(), ConnectionPhase::Connecting);
        }
        assert_eq!(
            state.apply(&disconnected()),
            Action::Signal(ConnectionOutcome::Failed)
        );
        assert_eq!(state.phase(), ConnectionPhase::Failed);
        assert_eq!(state.retry_count(), 5);

        // Terminal: further notifications change nothing
        assert_eq!(state.apply(&disconnected()), Action::Ignore);
        assert_eq!(state.apply(&address()), Action::Ignore);
        assert_eq!(state.phase(), ConnectionPhase::Failed);
        assert_eq!(state.retry_count(), 5);
    }

    #[test]
    fn test_address_after_four_disconnects_resets_counter() {
        let mut state = ConnectionState::default();
        state.apply(&StationEvent::Started);
        for _ in 0..4 {
            state.apply(&disconnected());
        }
        assert_eq!(state.retry_count(), 4);
        assert_eq!(
            state.apply(&address()),
            Action::Signal(ConnectionOutcome::Connected)
        );
        assert_eq!(state.phase(), ConnectionPhase::Connected);
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn test_link_drop_after_connect_retries_again() {
        let mut state = ConnectionState::default();
        state.apply(&StationEvent::Started);
        state.apply(&address());
        assert_eq!(state.apply(&disconnected()), Action::Connect);
        assert_eq!(state.phase(), ConnectionPhase::Connecting);
        assert_eq!(state.retry_count(), 1);
    }

    #[test]
    fn test_zero_ceiling_fails_on_first_disconnect() {
        let mut state = ConnectionState::new(0);
        state.apply(&StationEvent::Started);
        assert_eq!(
            state.apply(&disconnected()),
            Action::Signal(ConnectionOutcome::Failed)
        );
    }

    #[tokio::test]
    async fn test_bring_up_connects_after_retries() {
        let driver = ScriptedStation::new(vec![disconnected(), disconnected(), address()]);
        let connects = Arc::clone(&driver.connects);
        let mut manager = ConnectivityManager::new(driver, DEFAULT_MAX_RETRIES);

        let outcome = manager
            .bring_up_station(&credentials(), Some(Duration::from_secs(5)), &Notify::new())
            .await
            .unwrap();

        assert_eq!(outcome, ConnectionOutcome::Connected);
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(manager.state().phase(), ConnectionPhase::Connected);
        assert_eq!(manager.state().retry_count(), 0);
    }

    #[tokio::test]
    async fn test_bring_up_fails_at_ceiling() {
        let driver = ScriptedStation::new(vec![disconnected(); 8]);
        let connects = Arc::clone(&driver.connects);
        let mut manager = ConnectivityManager::new(driver, DEFAULT_MAX_RETRIES);

        let outcome = manager
            .bring_up_station(&credentials(), Some(Duration::from_secs(5)), &Notify::new())
            .await
            .unwrap();

        assert_eq!(outcome, ConnectionOutcome::Failed);
        assert_eq!(connects.load(Ordering::SeqCst), 5);
        assert_eq!(manager.state().phase(), ConnectionPhase::Failed);
    }

    #[tokio::test]
    async fn test_refused_connect_counts_as_disconnect() {
        let mut driver = ScriptedStation::new(vec![]);
        driver.refuse_connect = true;
        let mut manager = ConnectivityManager::new(driver, 3);

        let outcome = manager
            .bring_up_station(&credentials(), Some(Duration::from_secs(5)), &Notify::new())
            .await
            .unwrap();

        assert_eq!(outcome, ConnectionOutcome::Failed);
        assert_eq!(manager.state().retry_count(), 3);
    }

    #[tokio::test]
    async fn test_silent_platform_hits_deadline() {
        // Connect attempts never produce a notification
        let driver = ScriptedStation::new(vec![]);
        let mut manager = ConnectivityManager::new(driver, DEFAULT_MAX_RETRIES);

        let result = manager
            .bring_up_station(&credentials(), Some(Duration::from_millis(50)), &Notify::new())
            .await;

        assert!(matches!(result, Err(StationError::DeadlineElapsed(_))));
        assert_eq!(manager.state().phase(), ConnectionPhase::Connecting);
    }

    #[tokio::test]
    async fn test_cancellation_ends_unbounded_wait() {
        let driver = ScriptedStation::new(vec![]);
        let mut manager = ConnectivityManager::new(driver, DEFAULT_MAX_RETRIES);
        let cancel = Notify::new();
        cancel.notify_one();

        let result = manager.bring_up_station(&credentials(), None, &cancel).await;

        assert!(matches!(result, Err(StationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_init_failure_is_reported() {
        let mut driver = ScriptedStation::new(vec![address()]);
        driver.refuse_init = true;
        let mut manager = ConnectivityManager::new(driver, DEFAULT_MAX_RETRIES);

        let result = manager
            .bring_up_station(&credentials(), Some(Duration::from_secs(1)), &Notify::new())
            .await;

        assert!(matches!(result, Err(StationError::Driver(_))));
        assert_eq!(manager.state().phase(), ConnectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_stops_driver() {
        let driver = ScriptedStation::new(vec![address()]);
        let stopped = Arc::clone(&driver.stopped);
        let mut manager = ConnectivityManager::new(driver, DEFAULT_MAX_RETRIES);
        manager
            .bring_up_station(&credentials(), Some(Duration::from_secs(5)), &Notify::new())
            .await
            .unwrap();

        manager.shutdown().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }
}
