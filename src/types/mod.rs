mod jid;

pub use jid::{normalize_recipient, Jid, DEFAULT_USER_SERVER, GROUP_SERVER};

/// Message ID type (WhatsApp internal ID string).
pub type MessageId = String;
