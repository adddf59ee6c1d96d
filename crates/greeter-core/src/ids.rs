use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ServerError;
use crate::tag::MAX_SESSION_ID;

/// Identifies one session for the lifetime of the server.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier source. Values start at 1 and are never reused.
///
/// Running past the limit is fatal for new sessions: once exhausted the
/// allocator refuses every later request instead of wrapping around.
#[derive(Debug)]
pub struct SessionIdAllocator {
    next: u64,
    limit: u64,
    exhausted: bool,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self::with_limit(MAX_SESSION_ID)
    }

    /// Allocator that stops after `limit`. Clamped to what a tag can carry.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            next: 1,
            limit: limit.min(MAX_SESSION_ID),
            exhausted: false,
        }
    }

    pub fn allocate(&mut self) -> Result<SessionId, ServerError> {
        if self.exhausted || self.next > self.limit {
            self.exhausted = true;
            return Err(ServerError::IdSpaceExhausted { limit: self.limit });
        }
        let id = SessionId(self.next);
        self.next += 1;
        Ok(id)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
