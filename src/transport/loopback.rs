//! In-process transport that behaves like a linked device without touching the network.
//!
//! Unpaired connects emit a pairing code built from fresh pairing keys. Stored
//! credentials whose signed device identity verifies connect straight away. With
//! a link delay configured, an unpaired connection "gets scanned" after the delay:
//! it persists a signed device identity and opens. Sends are recorded and
//! acknowledged with a generated message ID.

use super::{Connector, EventSink, OutgoingMessage, SendReceipt, Transport, TransportResult};
use crate::error::{PairingError, TransportError};
use crate::events::{CloseReason, TransportEvent};
use crate::pairing::{self, PairingKeys};
use crate::store::Credentials;
use crate::types::{Jid, MessageId};
use async_trait::async_trait;
use sha2::Digest;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const PLATFORM: &str = "wa-relay loopback";

/// Device identity persisted by the loopback transport.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct LinkedDevice {
    id: Option<Jid>,
    platform: Option<String>,
    noise_key_pub: Option<[u8; 32]>,
    identity_key_pub: Option<[u8; 32]>,
    /// Signed device identity (verifying key || signature || payload).
    account: Option<Vec<u8>>,
}

impl LinkedDevice {
    fn link(jid: Jid, keys: &PairingKeys) -> Self {
        let account = pairing::sign_device_identity(jid.to_string().as_bytes(), &keys.identity_private);
        Self {
            id: Some(jid),
            platform: Some(PLATFORM.to_string()),
            noise_key_pub: Some(keys.noise_public),
            identity_key_pub: Some(keys.identity_public),
            account: Some(account),
        }
    }

    fn from_credentials(credentials: &Credentials) -> crate::Result<Self> {
        serde_json::from_slice(credentials.as_bytes())
            .map_err(|e| PairingError::MalformedCredentials(e.to_string()).into())
    }

    fn to_credentials(&self) -> crate::Result<Credentials> {
        let blob = serde_json::to_vec(self)
            .map_err(|e| PairingError::MalformedCredentials(e.to_string()))?;
        Ok(Credentials::from_bytes(blob))
    }

    /// Logged in when paired and the stored identity still verifies for this JID.
    fn is_logged_in(&self) -> bool {
        match (&self.id, &self.account) {
            (Some(jid), Some(account)) => pairing::verify_signed_identity(account)
                .map(|payload| payload == jid.to_string().as_bytes())
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Credentials of an already-linked loopback device, e.g. to seed a store.
pub fn linked_credentials(jid: Jid) -> crate::Result<Credentials> {
    LinkedDevice::link(jid, &pairing::generate_pairing_keys()).to_credentials()
}

/// A message the loopback transport accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    /// Which transport instance sent it (1 for the first connect).
    pub instance: u64,
    pub to: Jid,
    pub message: OutgoingMessage,
}

#[derive(Default)]
struct Shared {
    link_after: Option<Duration>,
    connects: AtomicUsize,
    instances: AtomicU64,
    sent: Mutex<Vec<SentMessage>>,
    fail_sends: Mutex<Option<String>>,
}

/// Connector producing [`LoopbackTransport`]s.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the phone scanning the pairing code `delay` after it is shown.
    pub fn with_link_after(delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                link_after: Some(delay),
                ..Shared::default()
            }),
        }
    }

    /// Number of connect calls so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Every message accepted so far, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.shared
            .sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Make every following send fail with `reason` (`None` to recover).
    pub fn fail_sends(&self, reason: Option<&str>) {
        if let Ok(mut fail) = self.shared.fail_sends.lock() {
            *fail = reason.map(str::to_string);
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
        events: EventSink,
    ) -> TransportResult<Arc<dyn Transport>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let instance = self.shared.instances.fetch_add(1, Ordering::SeqCst) + 1;
        let transport = Arc::new(LoopbackTransport {
            instance,
            shared: Arc::clone(&self.shared),
            events: events.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        });

        let device = credentials.as_ref().and_then(|c| match LinkedDevice::from_credentials(c) {
            Ok(device) => Some(device),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable credentials");
                None
            }
        });

        if device.as_ref().is_some_and(LinkedDevice::is_logged_in) {
            tracing::debug!(instance, "loopback resuming stored session");
            events.emit(TransportEvent::Open);
            return Ok(transport);
        }

        let keys = pairing::generate_pairing_keys();
        let reference = format!("2@{:X}", rand::random::<u64>());
        events.emit(TransportEvent::PairingCode(pairing::pairing_code(&reference, &keys)));

        if let Some(delay) = self.shared.link_after {
            let closed = Arc::clone(&transport.closed);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                let jid = Jid::user(format!("1555{:07}", rand::random::<u32>() % 10_000_000));
                match LinkedDevice::link(jid.clone(), &keys).to_credentials() {
                    Ok(credentials) => {
                        tracing::debug!(instance, %jid, "loopback device linked");
                        events.emit(TransportEvent::CredentialsUpdated(credentials));
                        events.emit(TransportEvent::Open);
                    }
                    Err(e) => tracing::error!(error = %e, "loopback link failed"),
                }
            });
        }

        Ok(transport)
    }
}

/// One loopback connection.
pub struct LoopbackTransport {
    instance: u64,
    shared: Arc<Shared>,
    events: EventSink,
    closed: Arc<AtomicBool>,
}

impl LoopbackTransport {
    /// Generate a message ID (3EB0 + hex of hash).
    fn generate_message_id() -> MessageId {
        let mut data = Vec::with_capacity(8 + 20 + 16);
        data.extend_from_slice(&unix_now().to_be_bytes());
        data.extend_from_slice(b"@c.us");
        data.extend_from_slice(&rand::random::<[u8; 16]>());
        let hash = sha2::Sha256::digest(&data);
        format!("3EB0{}", hex::encode(&hash[..9]))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send_message(
        &self,
        to: &Jid,
        message: OutgoingMessage,
    ) -> TransportResult<SendReceipt> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Some(reason) = self.shared.fail_sends.lock().ok().and_then(|f| f.clone()) {
            return Err(TransportError::Rejected(reason));
        }
        self.shared
            .sent
            .lock()
            .map_err(|e| TransportError::Rejected(e.to_string()))?
            .push(SentMessage {
                instance: self.instance,
                to: to.clone(),
                message,
            });
        Ok(SendReceipt {
            id: Self::generate_message_id(),
            timestamp: unix_now(),
        })
    }

    async fn logout(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.events.emit(TransportEvent::Closed(CloseReason::LoggedOut));
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events
                .emit(TransportEvent::Closed(CloseReason::Other("closed locally".into())));
        }
        Ok(())
    }
}
