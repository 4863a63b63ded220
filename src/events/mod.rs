//! Events a transport emits into the session controller.

use crate::store::Credentials;
use crate::types::{Jid, MessageId};
use std::fmt;

/// Lifecycle events from one transport instance.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Raw pairing code to render and show to the user.
    PairingCode(String),

    /// Authenticated and ready to send.
    Open,

    /// Connection ended.
    Closed(CloseReason),

    /// Authentication material changed and should be persisted.
    CredentialsUpdated(Credentials),

    /// Incoming message.
    Message(IncomingMessage),
}

#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub from: Jid,
    pub id: MessageId,
    pub is_from_me: bool,
    /// Plain text body, `None` for media.
    pub text: Option<String>,
}

/// Why a connection closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit sign-out (here or from the phone).
    LoggedOut,
    /// Another client took over the session.
    StreamReplaced,
    ConnectionLost,
    TimedOut,
    /// Server refused the connection.
    Failure(ConnectFailureReason),
    Other(String),
}

impl CloseReason {
    /// Map a close status code as reported by the server.
    pub fn from_status_code(code: i32) -> Self {
        match code {
            401 => Self::LoggedOut,
            408 => Self::TimedOut,
            428 => Self::ConnectionLost,
            440 => Self::StreamReplaced,
            _ => match ConnectFailureReason::from_code(code) {
                Some(reason) => Self::Failure(reason),
                None => Self::Other(format!("status {code}")),
            },
        }
    }

    /// Whether the session is gone for good and must not be auto-resumed.
    pub fn is_logged_out(&self) -> bool {
        match self {
            Self::LoggedOut => true,
            Self::Failure(reason) => reason.is_logged_out(),
            _ => false,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::StreamReplaced => write!(f, "stream replaced"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failure(reason) => write!(f, "{reason}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Connect failure reason.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConnectFailureReason {
    Generic = 400,
    LoggedOut = 401,
    TempBanned = 402,
    MainDeviceGone = 403,
    ClientOutdated = 405,
    UnknownLogout = 406,
    BadUserAgent = 409,
    CATExpired = 413,
    CATInvalid = 414,
    NotFound = 415,
    ClientUnknown = 418,
    InternalServerError = 500,
    Experimental = 501,
    ServiceUnavailable = 503,
}

impl ConnectFailureReason {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            400 => Some(Self::Generic),
            401 => Some(Self::LoggedOut),
            402 => Some(Self::TempBanned),
            403 => Some(Self::MainDeviceGone),
            405 => Some(Self::ClientOutdated),
            406 => Some(Self::UnknownLogout),
            409 => Some(Self::BadUserAgent),
            413 => Some(Self::CATExpired),
            414 => Some(Self::CATInvalid),
            415 => Some(Self::NotFound),
            418 => Some(Self::ClientUnknown),
            500 => Some(Self::InternalServerError),
            501 => Some(Self::Experimental),
            503 => Some(Self::ServiceUnavailable),
            _ => None,
        }
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(
            self,
            Self::LoggedOut | Self::MainDeviceGone | Self::UnknownLogout
        )
    }
}

impl fmt::Display for ConnectFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::LoggedOut => "logged out from another device",
            Self::TempBanned => "account temporarily banned",
            Self::MainDeviceGone => "primary device was logged out",
            Self::UnknownLogout => "logged out for unknown reason",
            Self::ClientOutdated => "client is out of date",
            Self::BadUserAgent => "client user agent was rejected",
            Self::CATExpired => "messenger crypto auth token has expired",
            Self::CATInvalid => "messenger crypto auth token is invalid",
            _ => "connection failure",
        };
        write!(f, "{} (code {})", msg, *self as i32)
    }
}
