//! Event tags: a session identifier and an event kind packed into one `u64`.
//!
//! The kind occupies the low [`EVENT_KIND_BITS`] bits, the session identifier
//! the remaining high bits. Tags are the only thing an event source hands back
//! on completion, so every asynchronous operation is armed with one.

use std::fmt;

use crate::errors::TagError;
use crate::ids::SessionId;

/// What happened to a session's stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Accept completed, the stream is open.
    Connected,
    /// An inbound message finished arriving.
    ReadDone,
    /// An outbound message finished sending.
    WriteDone,
    /// The stream closed, by peer disconnect or cancellation.
    Finished,
}

impl EventKind {
    /// Every kind, in encoding order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Connected,
        EventKind::ReadDone,
        EventKind::WriteDone,
        EventKind::Finished,
    ];

    /// Position in [`EventKind::ALL`], which is also the encoded bit pattern.
    pub const fn index(self) -> u64 {
        match self {
            Self::Connected => 0,
            Self::ReadDone => 1,
            Self::WriteDone => 2,
            Self::Finished => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ReadDone => "read_done",
            Self::WriteDone => "write_done",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low bits reserved for the event kind: just enough for every variant.
pub const EVENT_KIND_BITS: u32 = (EventKind::ALL.len() as u64)
    .next_power_of_two()
    .trailing_zeros();

const KIND_MASK: u64 = (1 << EVENT_KIND_BITS) - 1;

/// Largest session identifier that survives a round trip through a tag.
pub const MAX_SESSION_ID: u64 = u64::MAX >> EVENT_KIND_BITS;

/// Opaque completion handle. Only constructible through [`Tag::encode`] or
/// the validating [`Tag::from_raw`], so decoding never fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag(u64);

impl Tag {
    /// Pack `session` and `kind`. The identifier must be at most
    /// [`MAX_SESSION_ID`]; the allocator never hands out anything larger.
    pub const fn encode(session: SessionId, kind: EventKind) -> Self {
        debug_assert!(session.get() <= MAX_SESSION_ID);
        Self((session.get() << EVENT_KIND_BITS) | kind.index())
    }

    pub fn decode(self) -> (SessionId, EventKind) {
        (self.session(), self.kind())
    }

    pub const fn session(self) -> SessionId {
        SessionId::new(self.0 >> EVENT_KIND_BITS)
    }

    pub fn kind(self) -> EventKind {
        // In range: checked by every constructor.
        EventKind::ALL[(self.0 & KIND_MASK) as usize]
    }

    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// Rebuild a tag from a raw integer, rejecting kind bits that name no event.
    pub fn from_raw(raw: u64) -> Result<Self, TagError> {
        if (raw & KIND_MASK) as usize >= EventKind::ALL.len() {
            return Err(TagError::UnknownKind { raw });
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (session, kind) = self.decode();
        write!(f, "{session}/{kind}")
    }
}
