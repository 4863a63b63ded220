use std::fmt;
use std::str::FromStr;

/// Default server for individual users.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// WhatsApp address (`user@server`, optionally `user:device@server`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// New regular JID (user@server).
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// Individual user on the default server.
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }
}

/// Turn a loosely formatted phone number into a JID.
///
/// Every non-digit character of the user part is dropped, as is a `:device`
/// suffix. Input that already names a network server ([`DEFAULT_USER_SERVER`]
/// or [`GROUP_SERVER`]) keeps it; anything else lands on the default server.
/// Feeding the output back in returns it unchanged. Returns `None` when no
/// digits remain.
pub fn normalize_recipient(raw: &str) -> Option<Jid> {
    let (user, server) = match raw.rsplit_once('@') {
        Some((user, server)) => (user, known_server(server)),
        None => (raw, DEFAULT_USER_SERVER),
    };
    let user = user.split_once(':').map_or(user, |(user, _device)| user);
    let digits: String = user.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    Some(Jid::new(digits, server))
}

fn known_server(server: &str) -> &'static str {
    let server = server.trim();
    if server.eq_ignore_ascii_case(GROUP_SERVER) {
        GROUP_SERVER
    } else {
        DEFAULT_USER_SERVER
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let Some((user, server)) = s.split_once('@') else {
            return Ok(Self::new("", s));
        };
        if server.contains('@') {
            return Err(JidParseError);
        }
        match user.split_once(':') {
            Some((user, device)) => Ok(Self {
                user: user.to_string(),
                device: device.parse().map_err(|_| JidParseError)?,
                server: server.to_string(),
            }),
            None => Ok(Self::new(user, server)),
        }
    }
}

#[derive(Debug)]
pub struct JidParseError;

impl fmt::Display for JidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid JID format")
    }
}

impl std::error::Error for JidParseError {}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

impl serde::Serialize for Jid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Jid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Jid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
