//! # wa-relay
//!
//! HTTP relay that keeps one WhatsApp web multidevice session alive and sends
//! messages through it.
//!
//! ## Features
//!
//! - QR code pairing, exposed as a PNG data URI
//! - Credential persistence and automatic reconnects (until logged out)
//! - Text, image, document and voice-note dispatch
//! - Logout and forced re-pairing
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wa_relay::server::{build_router, RouterOptions};
//! use wa_relay::session::{ReconnectPolicy, SessionController, TokioScheduler};
//! use wa_relay::store::MemoryStore;
//! use wa_relay::transport::loopback::LoopbackConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SessionController::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(LoopbackConnector::new()),
//!         Arc::new(TokioScheduler),
//!         ReconnectPolicy::default(),
//!     );
//!     session.start().await;
//!     let app = build_router(session, &RouterOptions::default());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pairing;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{CloseReason, TransportEvent};
pub use gateway::{DispatchReceipt, Gateway};
pub use session::{PairingArtifact, SessionController, SessionStatus, StatusSnapshot};
pub use store::{CredentialStore, Credentials, Store};
pub use transport::{Connector, Transport};
pub use types::{Jid, MessageId};
