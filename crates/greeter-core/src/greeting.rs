use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound message: a client introducing itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingRequest {
    pub name: String,
}

/// Outbound message pushed to every connected session on each broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GreetingReply {
    pub message: String,
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
}

impl GreetingReply {
    /// `"<greeting>, <name>"`, or the bare greeting before the peer has said who it is.
    pub fn compose(greeting: &str, name: Option<&str>, sequence: u64) -> Self {
        let message = match name {
            Some(name) if !name.is_empty() => format!("{greeting}, {name}"),
            _ => greeting.to_string(),
        };
        Self {
            message,
            sequence,
            sent_at: Utc::now(),
        }
    }
}
