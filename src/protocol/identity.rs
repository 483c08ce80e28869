//! Publisher identity: who connects, with which credentials, to which broker

use rand::Rng;
use std::fmt;

/// Upper bound (inclusive) of the random client id suffix
const CLIENT_ID_SUFFIX_MAX: u32 = 1000;

/// Generate a client id of the form `<prefix>-<n>` with a random `n`
///
/// Called once at startup; the result stays fixed for the process lifetime.
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = rand::rng().random_range(0..=CLIENT_ID_SUFFIX_MAX);
    format!("{prefix}-{suffix}")
}

/// Immutable connection identity for the single publisher
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    client_id: String,
    username: String,
    password: String,
    broker_host: String,
    broker_port: u16,
}

impl Identity {
    pub fn new(
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        broker_host: impl Into<String>,
        broker_port: u16,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            username: username.into(),
            password: password.into(),
            broker_host: broker_host.into(),
            broker_port,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    /// `host:port` for log lines
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

// Password is never printed
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .finish()
    }
}
