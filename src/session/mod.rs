//! Session lifecycle controller.
//!
//! Owns the one relay session: its connection status, the current pairing
//! artifact, the active transport and the generation ("epoch") counter that
//! tells successive transports apart. Transport events, logout, reset and
//! shutdown are serialized by a command lock; status reads only take the state
//! lock briefly and never wait on transport I/O.
//!
//! Every time the active transport is invalidated the epoch is bumped. Events
//! and scheduled reconnects carry the epoch they were created for and are
//! dropped when it no longer matches. The epoch, plus a closing flag raised
//! before the transport is told to log out, is published on a watch channel
//! so dispatches can stop using a handle they already hold.

mod scheduler;

pub use scheduler::{Scheduler, TokioScheduler};

use crate::error::Error;
use crate::events::{CloseReason, IncomingMessage, TransportEvent};
use crate::pairing;
use crate::store::{Credentials, Store};
use crate::transport::{Connector, EventSink, Transport};
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Connection phase of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    AwaitingScan,
    Connected,
    /// Logout, reset or shutdown in progress.
    Closing,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub connected: bool,
}

/// Answer to "what should the user scan?".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingArtifact {
    /// Already paired and connected; nothing to scan.
    AlreadyConnected,
    /// Rendered pairing code (PNG data URI).
    Available(String),
    /// No code yet; poll again.
    NotYetAvailable,
}

/// Fixed delays between connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// After the connection closed for any reason other than logout.
    pub after_failure: Duration,
    /// After an explicit logout, before pairing again.
    pub after_logout: Duration,
    /// After a reset, before pairing again.
    pub after_reset: Duration,
    /// After the connector failed to build a transport.
    pub after_connect_error: Duration,
    /// Upper bound for best-effort session termination (reset, shutdown).
    pub termination_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            after_failure: Duration::from_secs(5),
            after_logout: Duration::from_secs(2),
            after_reset: Duration::from_secs(1),
            after_connect_error: Duration::from_secs(5),
            termination_timeout: Duration::from_secs(10),
        }
    }
}

/// What dispatches watch: the current generation and whether it is being torn down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Generation {
    pub epoch: u64,
    pub closing: bool,
}

impl Generation {
    /// Whether a send started for `epoch` must not reach the transport.
    pub fn supersedes(&self, epoch: u64) -> bool {
        self.closing || self.epoch != epoch
    }
}

/// The active transport together with the epoch it was created for.
#[derive(Clone)]
pub(crate) struct TransportHandle {
    pub(crate) epoch: u64,
    pub(crate) transport: Arc<dyn Transport>,
}

/// `pairing_code` is set only while awaiting a scan. `transport` is set while
/// awaiting a scan, connected or closing, and also between a connect attempt
/// returning and the new transport's first event (status still disconnected).
struct SessionState {
    status: SessionStatus,
    /// Some iff status is AwaitingScan.
    pairing_code: Option<String>,
    transport: Option<TransportHandle>,
    epoch: u64,
}

type EventEnvelope = (u64, TransportEvent);

struct Inner {
    state: RwLock<SessionState>,
    commands: Mutex<()>,
    store: Store,
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
    events_tx: mpsc::UnboundedSender<EventEnvelope>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<EventEnvelope>>>,
    generation_tx: watch::Sender<Generation>,
}

/// Handle to the session controller. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        store: Store,
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (generation_tx, _) = watch::channel(Generation::default());
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState {
                    status: SessionStatus::Disconnected,
                    pairing_code: None,
                    transport: None,
                    epoch: 0,
                }),
                commands: Mutex::new(()),
                store,
                connector,
                scheduler,
                policy,
                events_tx,
                events_rx: std::sync::Mutex::new(Some(events_rx)),
                generation_tx,
            }),
        }
    }

    /// Start consuming transport events and make the first connection attempt.
    pub async fn start(&self) {
        let rx = self
            .inner
            .events_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take());
        let Some(mut rx) = rx else {
            warn!("session controller already started");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some((epoch, event)) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SessionController { inner }.handle_event(epoch, event).await;
            }
            debug!("event loop finished");
        });

        self.connect_now().await;
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn status(&self) -> StatusSnapshot {
        let st = self.inner.state.read().await;
        StatusSnapshot {
            status: st.status,
            connected: st.status == SessionStatus::Connected,
        }
    }

    pub async fn pairing_artifact(&self) -> PairingArtifact {
        let st = self.inner.state.read().await;
        match (st.status, &st.pairing_code) {
            (SessionStatus::Connected, _) => PairingArtifact::AlreadyConnected,
            (SessionStatus::AwaitingScan, Some(code)) => PairingArtifact::Available(code.clone()),
            _ => PairingArtifact::NotYetAvailable,
        }
    }

    /// Current transport generation.
    pub async fn epoch(&self) -> u64 {
        self.inner.state.read().await.epoch
    }

    /// Notified whenever the transport generation changes or starts closing.
    pub fn watch_generation(&self) -> watch::Receiver<Generation> {
        self.inner.generation_tx.subscribe()
    }

    /// The transport to send through, only while connected.
    pub(crate) async fn active_transport(&self) -> Option<TransportHandle> {
        let st = self.inner.state.read().await;
        match st.status {
            SessionStatus::Connected => st.transport.clone(),
            _ => None,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Sign out of the network, erase credentials and start pairing again shortly after.
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.inner.commands.lock().await;
        let handle = {
            let mut st = self.inner.state.write().await;
            let handle = match (st.status, &st.transport) {
                (SessionStatus::Connected, Some(handle)) => handle.clone(),
                _ => return Err(Error::NoActiveSession),
            };
            st.status = SessionStatus::Closing;
            self.inner.generation_tx.send_modify(|g| g.closing = true);
            handle
        };

        info!(epoch = handle.epoch, "logging out");
        if let Err(e) = handle.transport.logout().await {
            let mut st = self.inner.state.write().await;
            if st.epoch == handle.epoch && st.status == SessionStatus::Closing {
                st.status = SessionStatus::Connected;
                self.inner.generation_tx.send_modify(|g| g.closing = false);
            }
            error!(error = %e, "logout failed");
            return Err(e.into());
        }

        let cleared = self.inner.store.clear().await;
        if let Err(e) = &cleared {
            error!(error = %e, "could not erase credentials");
        }

        let epoch = {
            let mut st = self.inner.state.write().await;
            st.status = SessionStatus::Disconnected;
            st.pairing_code = None;
            st.transport = None;
            self.bump_epoch(&mut st)
        };
        let delay = self.inner.policy.after_logout;
        info!(epoch, ?delay, "logged out, pairing again");
        self.schedule_reconnect(epoch, delay);
        cleared
    }

    /// Drop whatever session exists and start an entirely new pairing cycle.
    ///
    /// Works in any state. Terminating the old transport is best-effort.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.inner.commands.lock().await;
        let previous = {
            let mut st = self.inner.state.write().await;
            st.pairing_code = None;
            let previous = st.transport.clone();
            st.status = match previous {
                Some(_) => SessionStatus::Closing,
                None => SessionStatus::Disconnected,
            };
            self.bump_epoch(&mut st);
            previous
        };

        info!(had_transport = previous.is_some(), "resetting session");
        if let Some(handle) = previous {
            let timeout = self.inner.policy.termination_timeout;
            match tokio::time::timeout(timeout, handle.transport.logout()).await {
                Ok(Ok(())) => debug!("previous session logged out"),
                Ok(Err(e)) => warn!(error = %e, "previous session did not log out cleanly"),
                Err(_) => warn!(?timeout, "timed out logging out previous session"),
            }
        }

        let cleared = self.inner.store.clear().await;
        match &cleared {
            Ok(()) => info!("previous credentials erased"),
            Err(e) => error!(error = %e, "could not erase credentials"),
        }

        let epoch = {
            let mut st = self.inner.state.write().await;
            st.status = SessionStatus::Disconnected;
            st.transport = None;
            st.epoch
        };
        let delay = self.inner.policy.after_reset;
        info!(epoch, ?delay, "session reset, new pairing code pending");
        self.schedule_reconnect(epoch, delay);
        cleared
    }

    /// Best-effort termination on process exit.
    ///
    /// A connected session is logged out when `logout` is set and closed
    /// otherwise; either way bounded by the termination timeout. The session
    /// ends disconnected and nothing is reconnected afterwards.
    pub async fn shutdown(&self, logout: bool) {
        let _guard = self.inner.commands.lock().await;
        let (handle, was_connected) = {
            let mut st = self.inner.state.write().await;
            let was_connected = st.status == SessionStatus::Connected;
            st.pairing_code = None;
            let handle = st.transport.clone();
            st.status = match handle {
                Some(_) => SessionStatus::Closing,
                None => SessionStatus::Disconnected,
            };
            self.bump_epoch(&mut st);
            (handle, was_connected)
        };
        let Some(handle) = handle else {
            return;
        };

        let timeout = self.inner.policy.termination_timeout;
        let terminate = async {
            if was_connected && logout {
                info!("closing WhatsApp session");
                handle.transport.logout().await
            } else {
                handle.transport.close().await
            }
        };
        match tokio::time::timeout(timeout, terminate).await {
            Ok(Ok(())) => debug!("session terminated"),
            Ok(Err(e)) => warn!(error = %e, "session termination failed"),
            Err(_) => warn!(?timeout, "session termination timed out"),
        }

        let mut st = self.inner.state.write().await;
        st.status = SessionStatus::Disconnected;
        st.transport = None;
    }

    // ── Transport events ─────────────────────────────────────────────────────

    /// Apply one transport event. Normally driven by the event loop [`start`](Self::start) spawns.
    pub async fn handle_event(&self, epoch: u64, event: TransportEvent) {
        if let TransportEvent::Message(msg) = &event {
            log_incoming(msg);
            return;
        }

        let _guard = self.inner.commands.lock().await;
        match event {
            TransportEvent::PairingCode(code) => self.on_pairing_code(epoch, &code).await,
            TransportEvent::Open => self.on_open(epoch).await,
            TransportEvent::Closed(reason) => self.on_closed(epoch, reason).await,
            TransportEvent::CredentialsUpdated(credentials) => {
                self.on_credentials(epoch, &credentials).await
            }
            TransportEvent::Message(_) => {}
        }
    }

    async fn on_pairing_code(&self, epoch: u64, code: &str) {
        let artifact = match pairing::render_qr_data_uri(code) {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(error = %e, "could not render pairing code");
                return;
            }
        };

        let mut st = self.inner.state.write().await;
        if st.epoch != epoch {
            debug!(epoch, current = st.epoch, "dropping stale pairing code");
            return;
        }
        if matches!(st.status, SessionStatus::Connected | SessionStatus::Closing) {
            debug!(status = %st.status, "ignoring pairing code");
            return;
        }
        st.pairing_code = Some(artifact);
        st.status = SessionStatus::AwaitingScan;
        info!(epoch, "pairing code available");
    }

    async fn on_open(&self, epoch: u64) {
        let mut st = self.inner.state.write().await;
        if st.epoch != epoch || st.status == SessionStatus::Closing {
            debug!(epoch, current = st.epoch, status = %st.status, "ignoring open");
            return;
        }
        st.status = SessionStatus::Connected;
        st.pairing_code = None;
        info!(epoch, "connected to WhatsApp");
    }

    async fn on_closed(&self, epoch: u64, reason: CloseReason) {
        let next_epoch = {
            let mut st = self.inner.state.write().await;
            if st.epoch != epoch || st.status == SessionStatus::Closing {
                debug!(epoch, current = st.epoch, %reason, "ignoring close");
                return;
            }
            st.status = SessionStatus::Disconnected;
            st.pairing_code = None;
            st.transport = None;
            self.bump_epoch(&mut st)
        };

        if reason.is_logged_out() {
            warn!(%reason, "session logged out, not reconnecting");
            if let Err(e) = self.inner.store.clear().await {
                error!(error = %e, "could not erase credentials");
            }
            return;
        }

        let delay = self.inner.policy.after_failure;
        warn!(%reason, ?delay, "connection closed, reconnecting");
        self.schedule_reconnect(next_epoch, delay);
    }

    async fn on_credentials(&self, epoch: u64, credentials: &Credentials) {
        if self.epoch().await != epoch {
            debug!(epoch, "dropping credentials from superseded transport");
            return;
        }
        match self.inner.store.save(credentials).await {
            Ok(()) => debug!("credentials saved"),
            Err(e) => error!(error = %e, "could not save credentials"),
        }
    }

    // ── Connecting ───────────────────────────────────────────────────────────

    pub(crate) async fn connect_now(&self) {
        let epoch = self.epoch().await;
        self.connect(epoch).await;
    }

    /// Build a transport for `epoch` unless a newer generation took over meanwhile.
    async fn connect(&self, epoch: u64) {
        // Events the new transport emits wait until its handle is installed.
        let _guard = self.inner.commands.lock().await;
        {
            let st = self.inner.state.read().await;
            if st.epoch != epoch || st.transport.is_some() {
                debug!(epoch, current = st.epoch, "skipping stale reconnect");
                return;
            }
        }

        let credentials = match self.inner.store.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "could not load credentials, pairing from scratch");
                None
            }
        };
        info!(epoch, resuming = credentials.is_some(), "connecting to WhatsApp");

        let events = EventSink::new(epoch, self.inner.events_tx.clone());
        match self.inner.connector.connect(credentials, events).await {
            Ok(transport) => {
                let mut st = self.inner.state.write().await;
                if st.epoch == epoch && st.transport.is_none() {
                    st.transport = Some(TransportHandle { epoch, transport });
                    return;
                }
                drop(st);
                debug!(epoch, "closing transport from superseded attempt");
                if let Err(e) = transport.close().await {
                    debug!(error = %e, "superseded transport close failed");
                }
            }
            Err(e) => {
                let delay = self.inner.policy.after_connect_error;
                warn!(epoch, error = %e, ?delay, "connect failed, retrying");
                self.schedule_reconnect(epoch, delay);
            }
        }
    }

    fn schedule_reconnect(&self, epoch: u64, delay: Duration) {
        let this = self.clone();
        self.inner
            .scheduler
            .schedule(delay, Box::pin(async move { this.connect(epoch).await }));
    }

    fn bump_epoch(&self, st: &mut SessionState) -> u64 {
        st.epoch += 1;
        self.inner.generation_tx.send_replace(Generation {
            epoch: st.epoch,
            closing: false,
        });
        st.epoch
    }

    #[cfg(test)]
    pub(crate) async fn current_transport(&self) -> Option<TransportHandle> {
        self.inner.state.read().await.transport.clone()
    }

    #[cfg(test)]
    pub(crate) async fn raw_pairing_code(&self) -> Option<String> {
        self.inner.state.read().await.pairing_code.clone()
    }
}

fn log_incoming(msg: &IncomingMessage) {
    if msg.is_from_me {
        return;
    }
    info!(
        from = %msg.from,
        id = %msg.id,
        text = msg.text.as_deref().unwrap_or("<media>"),
        "message received"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConnectFailureReason;
    use crate::store::{CredentialStore, MemoryStore};
    use crate::testing::Harness;
    use std::sync::atomic::Ordering;

    fn creds(bytes: &[u8]) -> Credentials {
        Credentials::from_bytes(bytes.to_vec())
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let h = Harness::new();
        let snapshot = h.session.status().await;
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(!snapshot.connected);
        assert_eq!(
            serde_json::to_value(snapshot.status).unwrap(),
            serde_json::json!("disconnected")
        );
        assert_eq!(
            h.session.pairing_artifact().await,
            PairingArtifact::NotYetAvailable
        );
    }

    #[tokio::test]
    async fn pairing_code_event_exposes_rendered_artifact() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::PairingCode("ABC".into())).await;

        let expected = pairing::render_qr_data_uri("ABC").unwrap();
        assert_eq!(
            h.session.pairing_artifact().await,
            PairingArtifact::Available(expected)
        );
        assert_eq!(h.session.status().await.status, SessionStatus::AwaitingScan);
    }

    #[tokio::test]
    async fn newer_pairing_code_replaces_older() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::PairingCode("first".into())).await;
        h.emit(TransportEvent::PairingCode("second".into())).await;

        let expected = pairing::render_qr_data_uri("second").unwrap();
        assert_eq!(h.session.raw_pairing_code().await, Some(expected));
    }

    #[tokio::test]
    async fn open_clears_pairing_code() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::PairingCode("ABC".into())).await;
        h.emit(TransportEvent::Open).await;

        let snapshot = h.session.status().await;
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert!(snapshot.connected);
        assert!(h.session.raw_pairing_code().await.is_none());
        assert_eq!(
            h.session.pairing_artifact().await,
            PairingArtifact::AlreadyConnected
        );
    }

    #[tokio::test]
    async fn pairing_code_while_connected_is_ignored() {
        let h = Harness::connected().await;
        h.emit(TransportEvent::PairingCode("late".into())).await;

        assert_eq!(h.session.status().await.status, SessionStatus::Connected);
        assert!(h.session.raw_pairing_code().await.is_none());
        assert_eq!(
            h.session.pairing_artifact().await,
            PairingArtifact::AlreadyConnected
        );
    }

    #[tokio::test]
    async fn incoming_messages_leave_state_alone() {
        let h = Harness::connected().await;
        let epoch = h.session.epoch().await;
        for is_from_me in [false, true] {
            h.emit(TransportEvent::Message(IncomingMessage {
                from: crate::types::Jid::user("15550001111"),
                id: "3EB0AA".into(),
                is_from_me,
                text: Some("hello".into()),
            }))
            .await;
        }
        assert_eq!(h.session.status().await.status, SessionStatus::Connected);
        assert_eq!(h.session.epoch().await, epoch);
        assert_eq!(h.scheduler.count(), 0);
    }

    #[tokio::test]
    async fn logged_out_close_does_not_reconnect() {
        let h = Harness::connected().await;
        h.store.save(&creds(b"paired")).await.unwrap();

        h.emit(TransportEvent::Closed(CloseReason::LoggedOut)).await;

        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert_eq!(h.scheduler.count(), 0);
        assert!(h.store.load().await.unwrap().is_none());
        assert!(h.session.current_transport().await.is_none());
    }

    #[tokio::test]
    async fn primary_device_gone_counts_as_logout() {
        let h = Harness::connected().await;
        h.emit(TransportEvent::Closed(CloseReason::Failure(
            ConnectFailureReason::MainDeviceGone,
        )))
        .await;
        assert_eq!(h.scheduler.count(), 0);
    }

    #[tokio::test]
    async fn network_close_schedules_one_reconnect() {
        let h = Harness::connected().await;
        h.store.save(&creds(b"paired")).await.unwrap();

        h.emit(TransportEvent::Closed(CloseReason::ConnectionLost)).await;

        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert_eq!(h.scheduler.delays(), vec![Some(Duration::from_secs(5))]);
        // credentials survive a transient drop
        assert!(h.store.load().await.unwrap().is_some());

        h.scheduler.fire(0).await;
        assert_eq!(h.connector.connect_count(), 2);
        let handle = h.session.current_transport().await.unwrap();
        assert_eq!(handle.epoch, h.session.epoch().await);
    }

    #[tokio::test]
    async fn close_while_awaiting_scan_clears_code() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::PairingCode("ABC".into())).await;
        h.emit(TransportEvent::Closed(CloseReason::TimedOut)).await;

        assert_eq!(
            h.session.pairing_artifact().await,
            PairingArtifact::NotYetAvailable
        );
        assert!(h.session.raw_pairing_code().await.is_none());
        assert_eq!(h.scheduler.count(), 1);
    }

    #[tokio::test]
    async fn events_from_superseded_transport_are_dropped() {
        let h = Harness::connected().await;
        let old = h.connector.last_sink();
        h.emit(TransportEvent::Closed(CloseReason::ConnectionLost)).await;
        h.scheduler.fire(0).await;

        h.session
            .handle_event(old.epoch(), TransportEvent::Open)
            .await;
        h.session
            .handle_event(old.epoch(), TransportEvent::Closed(CloseReason::ConnectionLost))
            .await;

        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert_eq!(h.scheduler.count(), 1);
    }

    #[tokio::test]
    async fn logout_without_session_changes_nothing() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::PairingCode("ABC".into())).await;
        let epoch = h.session.epoch().await;

        let err = h.session.logout().await.unwrap_err();
        assert!(matches!(err, Error::NoActiveSession));
        assert_eq!(h.session.status().await.status, SessionStatus::AwaitingScan);
        assert!(h.session.raw_pairing_code().await.is_some());
        assert_eq!(h.session.epoch().await, epoch);
        assert_eq!(h.scheduler.count(), 0);
        assert_eq!(h.connector.last_transport().logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_terminates_erases_and_repairs_later() {
        let h = Harness::connected().await;
        h.store.save(&creds(b"paired")).await.unwrap();
        let transport = h.connector.last_transport();

        h.session.logout().await.unwrap();

        assert_eq!(transport.logouts.load(Ordering::SeqCst), 1);
        assert!(h.store.load().await.unwrap().is_none());
        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert!(h.session.current_transport().await.is_none());
        assert_eq!(h.scheduler.delays(), vec![Some(Duration::from_secs(2))]);

        h.scheduler.fire(0).await;
        assert_eq!(h.connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn failed_logout_keeps_session() {
        let h = Harness::connected().await;
        h.store.save(&creds(b"paired")).await.unwrap();
        h.connector
            .last_transport()
            .fail_logout
            .store(true, Ordering::SeqCst);

        let err = h.session.logout().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(h.session.status().await.status, SessionStatus::Connected);
        assert!(h.store.load().await.unwrap().is_some());
        assert_eq!(h.scheduler.count(), 0);
    }

    #[tokio::test]
    async fn reset_from_connected_starts_new_pairing() {
        let h = Harness::connected().await;
        h.store.save(&creds(b"paired")).await.unwrap();
        let transport = h.connector.last_transport();
        let epoch = h.session.epoch().await;

        h.session.reset().await.unwrap();

        assert_eq!(transport.logouts.load(Ordering::SeqCst), 1);
        assert!(h.store.load().await.unwrap().is_none());
        assert!(h.session.current_transport().await.is_none());
        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert!(h.session.epoch().await > epoch);
        assert_eq!(h.scheduler.delays(), vec![Some(Duration::from_secs(1))]);
    }

    #[tokio::test]
    async fn reset_tolerates_failing_logout_and_no_transport() {
        let h = Harness::connected().await;
        h.connector
            .last_transport()
            .fail_logout
            .store(true, Ordering::SeqCst);
        h.session.reset().await.unwrap();

        // again, now with nothing to terminate
        h.session.reset().await.unwrap();
        assert_eq!(h.scheduler.count(), 2);
        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reset_keeps_handle_until_old_transport_terminates() {
        let h = Harness::connected().await;
        let transport = h.connector.last_transport();
        transport.hold_logout.store(true, Ordering::SeqCst);

        let reset = tokio::spawn({
            let session = h.session.clone();
            async move { session.reset().await }
        });
        while transport.logouts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.session.status().await.status, SessionStatus::Closing);
        assert!(h.session.current_transport().await.is_some());
        assert!(h.session.active_transport().await.is_none());

        transport.release_logout.notify_one();
        reset.await.unwrap().unwrap();
        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert!(h.session.current_transport().await.is_none());
    }

    #[tokio::test]
    async fn reset_without_transport_goes_straight_to_disconnected() {
        let h = Harness::new();
        h.session.reset().await.unwrap();
        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert!(h.session.current_transport().await.is_none());
        assert_eq!(h.scheduler.count(), 1);
    }

    #[tokio::test]
    async fn logout_publishes_closing_before_terminating() {
        let h = Harness::connected().await;
        let transport = h.connector.last_transport();
        transport.hold_logout.store(true, Ordering::SeqCst);
        let generations = h.session.watch_generation();
        let epoch = generations.borrow().epoch;

        let logout = tokio::spawn({
            let session = h.session.clone();
            async move { session.logout().await }
        });
        while transport.logouts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            *generations.borrow(),
            Generation {
                epoch,
                closing: true
            }
        );

        transport.release_logout.notify_one();
        logout.await.unwrap().unwrap();
        let after = *generations.borrow();
        assert!(!after.closing);
        assert!(after.epoch > epoch);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_logout_and_reset_settle_consistently() {
        for _ in 0..50 {
            let h = Harness::connected().await;
            let transport = h.connector.last_transport();

            let logout = tokio::spawn({
                let session = h.session.clone();
                async move { session.logout().await }
            });
            let reset = tokio::spawn({
                let session = h.session.clone();
                async move { session.reset().await }
            });
            let (logout, reset) = (logout.await.unwrap(), reset.await.unwrap());

            reset.unwrap();
            if let Err(e) = &logout {
                assert!(matches!(e, Error::NoActiveSession));
            }
            assert_eq!(transport.logouts.load(Ordering::SeqCst), 1);
            assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
            assert!(h.session.current_transport().await.is_none());
            assert!(h.session.raw_pairing_code().await.is_none());
            assert_eq!(h.scheduler.count(), 1 + usize::from(logout.is_ok()));
            assert!(!h.session.watch_generation().borrow().closing);
        }
    }

    #[tokio::test]
    async fn stale_reconnect_does_not_replace_reset_transport() {
        let h = Harness::connected().await;
        h.emit(TransportEvent::Closed(CloseReason::ConnectionLost)).await;
        h.session.reset().await.unwrap();
        assert_eq!(
            h.scheduler.delays(),
            vec![Some(Duration::from_secs(5)), Some(Duration::from_secs(1))]
        );

        h.scheduler.fire(1).await;
        let fresh = h.connector.last_transport();
        h.scheduler.fire(0).await;

        assert_eq!(h.connector.connect_count(), 2);
        let handle = h.session.current_transport().await.unwrap();
        assert_eq!(handle.epoch, h.session.epoch().await);
        assert!(std::ptr::addr_eq(
            Arc::as_ptr(&handle.transport),
            Arc::as_ptr(&fresh)
        ));
    }

    #[tokio::test]
    async fn stale_reconnect_firing_first_is_a_noop() {
        let h = Harness::connected().await;
        h.emit(TransportEvent::Closed(CloseReason::ConnectionLost)).await;
        h.session.reset().await.unwrap();

        h.scheduler.fire(0).await;
        assert_eq!(h.connector.connect_count(), 1);
        assert!(h.session.current_transport().await.is_none());

        h.scheduler.fire(1).await;
        assert_eq!(h.connector.connect_count(), 2);
        assert!(h.session.current_transport().await.is_some());
    }

    #[tokio::test]
    async fn connect_failure_retries_after_delay() {
        let h = Harness::new();
        h.connector.failures_left.store(1, Ordering::SeqCst);

        h.session.connect_now().await;
        assert!(h.session.current_transport().await.is_none());
        assert_eq!(h.scheduler.delays(), vec![Some(Duration::from_secs(5))]);

        h.scheduler.fire(0).await;
        assert!(h.session.current_transport().await.is_some());
    }

    #[tokio::test]
    async fn credential_updates_are_persisted() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::CredentialsUpdated(creds(b"v1"))).await;
        h.emit(TransportEvent::CredentialsUpdated(creds(b"v2"))).await;

        assert_eq!(h.store.load().await.unwrap(), Some(creds(b"v2")));
    }

    #[tokio::test]
    async fn credentials_from_superseded_transport_are_dropped() {
        let h = Harness::with_store(MemoryStore::new());
        h.session.connect_now().await;
        let old = h.connector.last_sink();
        h.session.reset().await.unwrap();

        h.session
            .handle_event(old.epoch(), TransportEvent::CredentialsUpdated(creds(b"stale")))
            .await;
        assert!(h.store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_logs_out_connected_session() {
        let h = Harness::connected().await;
        let transport = h.connector.last_transport();

        h.session.shutdown(true).await;

        assert_eq!(transport.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.status().await.status, SessionStatus::Disconnected);
        assert!(h.session.current_transport().await.is_none());
        assert_eq!(h.scheduler.count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_unpaired_transport() {
        let h = Harness::new();
        h.session.connect_now().await;
        h.emit(TransportEvent::PairingCode("ABC".into())).await;
        let transport = h.connector.last_transport();

        h.session.shutdown(true).await;

        assert_eq!(transport.logouts.load(Ordering::SeqCst), 0);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }
}
