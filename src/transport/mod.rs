//! Transport abstraction for the messaging network.
//!
//! A [`Connector`] builds one [`Transport`] per connection attempt. The transport
//! owns the wire connection and authentication; it reports lifecycle changes by
//! emitting [`TransportEvent`]s into the [`EventSink`] it was handed and accepts
//! send calls. Protocol framing and encryption live entirely behind this seam.

pub mod loopback;

use crate::error::TransportError;
use crate::events::TransportEvent;
use crate::store::Credentials;
use crate::types::{Jid, MessageId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result type for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// One outbound message with its kind-specific metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text {
        text: String,
    },
    Image {
        data: Vec<u8>,
        caption: String,
        file_name: String,
    },
    Document {
        data: Vec<u8>,
        file_name: String,
        mimetype: String,
    },
    Audio {
        data: Vec<u8>,
        mimetype: String,
        /// Send as a voice note.
        ptt: bool,
    },
}

impl OutgoingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Document { .. } => "document",
            Self::Audio { .. } => "audio",
        }
    }
}

/// What the network assigned to a sent message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: MessageId,
    /// Server timestamp, seconds since the epoch.
    pub timestamp: u64,
}

/// A live connection to the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message.
    async fn send_message(&self, to: &Jid, message: OutgoingMessage)
        -> TransportResult<SendReceipt>;

    /// Terminate the session on the network side (unlink this device).
    async fn logout(&self) -> TransportResult<()>;

    /// Close the connection without unlinking.
    async fn close(&self) -> TransportResult<()>;
}

/// Builds transports. Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Start connecting with stored credentials, or start a fresh pairing when `None`.
    ///
    /// Returns once the transport exists; authentication progress is reported
    /// through `events`.
    async fn connect(
        &self,
        credentials: Option<Credentials>,
        events: EventSink,
    ) -> TransportResult<Arc<dyn Transport>>;
}

/// Where a transport reports its events, tagged with the generation it belongs to.
#[derive(Clone, Debug)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    /// Generation of the transport this sink was created for.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue an event. Returns false once the controller has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}
