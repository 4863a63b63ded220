use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session controller and the dispatch gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// A required request field was missing or unusable.
    #[error("{0}")]
    InvalidRequest(String),

    /// The operation needs a connected session.
    #[error("not connected to WhatsApp")]
    SessionUnavailable,

    /// Logout was requested while nothing was logged in.
    #[error("no active session")]
    NoActiveSession,

    /// The transport rejected or failed the send. Carries its description verbatim.
    #[error("{0}")]
    SendFailed(String),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("pairing: {0}")]
    Pairing(#[from] PairingError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Connection, authentication and send failures reported by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection closed")]
    Closed,

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Rejected(String),
}

/// Credential store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("save failed: {0}")]
    Save(String),

    #[error("load failed: {0}")]
    Load(String),

    #[error("clear failed: {0}")]
    Clear(String),
}

/// Pairing-related errors.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("invalid device signature")]
    InvalidDeviceSignature,

    #[error("qr render: {0}")]
    QrRender(String),

    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),
}
