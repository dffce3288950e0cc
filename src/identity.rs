//! Client identity used to key rate limits and suspicion tracking.

use serde::{Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;

/// Subject id of a caller already authenticated by the host application.
///
/// Route layers that run before the guard may insert this into the request
/// extensions; the guard then scopes counters by address *and* subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// Network address plus optional authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity {
    address: String,
    subject: Option<String>,
}

impl ClientIdentity {
    /// Identity for an address string.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            address: if address.is_empty() {
                "unknown".to_string()
            } else {
                address
            },
            subject: None,
        }
    }

    /// Identity for a peer IP.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self::new(ip.to_string())
    }

    /// Identity for requests whose peer address is not known.
    pub fn unknown() -> Self {
        Self::new("unknown")
    }

    /// Identity for checks initiated by the server itself (outbound calls).
    pub fn internal() -> Self {
        Self::new("internal")
    }

    /// Attach an authenticated subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        if !subject.is_empty() {
            self.subject = Some(subject);
        }
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{}#{}", self.address, subject),
            None => f.write_str(&self.address),
        }
    }
}

impl Serialize for ClientIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
