//! Fakes shared by the unit tests.

use crate::error::TransportError;
use crate::session::{ReconnectPolicy, Scheduler, SessionController};
use crate::store::{MemoryStore, Store};
use crate::transport::{
    Connector, EventSink, OutgoingMessage, SendReceipt, Transport, TransportResult,
};
use crate::types::Jid;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Transport that records calls and answers with a fixed receipt.
pub(crate) struct FakeTransport {
    pub(crate) sends: AtomicUsize,
    pub(crate) logouts: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    pub(crate) last_send: Mutex<Option<(Jid, OutgoingMessage)>>,
    pub(crate) fail_logout: AtomicBool,
    pub(crate) send_error: Mutex<Option<String>>,
    pub(crate) hang_sends: AtomicBool,
    /// Logout waits for `release_logout` while set.
    pub(crate) hold_logout: AtomicBool,
    pub(crate) release_logout: Notify,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            sends: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            last_send: Mutex::new(None),
            fail_logout: AtomicBool::new(false),
            send_error: Mutex::new(None),
            hang_sends: AtomicBool::new(false),
            hold_logout: AtomicBool::new(false),
            release_logout: Notify::new(),
        }
    }

    pub(crate) fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub(crate) fn last_send(&self) -> Option<(Jid, OutgoingMessage)> {
        self.last_send.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(
        &self,
        to: &Jid,
        message: OutgoingMessage,
    ) -> TransportResult<SendReceipt> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        *self.last_send.lock().unwrap() = Some((to.clone(), message));
        if self.hang_sends.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if let Some(reason) = self.send_error.lock().unwrap().clone() {
            return Err(TransportError::Rejected(reason));
        }
        Ok(SendReceipt {
            id: "m1".to_string(),
            timestamp: 1000,
        })
    }

    async fn logout(&self) -> TransportResult<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        if self.hold_logout.load(Ordering::SeqCst) {
            self.release_logout.notified().await;
        }
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("logout refused".into()));
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`FakeTransport`]s and keeping their sinks.
#[derive(Default)]
pub(crate) struct FakeConnector {
    pub(crate) transports: Mutex<Vec<Arc<FakeTransport>>>,
    pub(crate) sinks: Mutex<Vec<EventSink>>,
    pub(crate) failures_left: AtomicUsize,
}

impl FakeConnector {
    /// Connect calls so far, failed ones included.
    pub(crate) fn connect_count(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub(crate) fn last_transport(&self) -> Arc<FakeTransport> {
        Arc::clone(self.transports.lock().unwrap().last().unwrap())
    }

    pub(crate) fn last_sink(&self) -> EventSink {
        self.sinks.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _credentials: Option<crate::store::Credentials>,
        events: EventSink,
    ) -> TransportResult<Arc<dyn Transport>> {
        self.sinks.lock().unwrap().push(events);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("network unreachable".into()));
        }
        let mut transports = self.transports.lock().unwrap();
        let transport = Arc::new(FakeTransport::new());
        transports.push(Arc::clone(&transport));
        Ok(transport)
    }
}

type Task = (Duration, BoxFuture<'static, ()>);

/// Scheduler that only records tasks; tests fire them explicitly.
#[derive(Default)]
pub(crate) struct FakeScheduler {
    tasks: Mutex<Vec<Option<Task>>>,
}

impl FakeScheduler {
    /// Number of tasks scheduled so far, fired or not.
    pub(crate) fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Delays of every scheduled task, in scheduling order.
    pub(crate) fn delays(&self) -> Vec<Option<Duration>> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.as_ref().map(|(delay, _)| *delay))
            .collect()
    }

    /// Run the task scheduled `index`-th (0-based). Panics if already fired.
    pub(crate) async fn fire(&self, index: usize) {
        let task = self.tasks.lock().unwrap()[index].take();
        let (_, fut) = task.expect("task already fired");
        fut.await;
    }
}

impl Scheduler for FakeScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        self.tasks.lock().unwrap().push(Some((delay, task)));
    }
}

pub(crate) struct Harness {
    pub(crate) session: SessionController,
    pub(crate) connector: Arc<FakeConnector>,
    pub(crate) scheduler: Arc<FakeScheduler>,
    pub(crate) store: Arc<MemoryStore>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub(crate) fn with_store(store: MemoryStore) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let scheduler = Arc::new(FakeScheduler::default());
        let store = Arc::new(store);
        let session = SessionController::new(
            Arc::clone(&store) as Store,
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            ReconnectPolicy::default(),
        );
        Self {
            session,
            connector,
            scheduler,
            store,
        }
    }

    /// Build the first transport and feed it `open`.
    pub(crate) async fn connected() -> Self {
        let h = Self::new();
        h.session.connect_now().await;
        h.emit(crate::events::TransportEvent::Open).await;
        h
    }

    /// Deliver an event as the most recently created transport.
    pub(crate) async fn emit(&self, event: crate::events::TransportEvent) {
        let epoch = self.connector.last_sink().epoch();
        self.session.handle_event(epoch, event).await;
    }
}
