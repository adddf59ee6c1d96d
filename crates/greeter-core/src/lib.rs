pub mod errors;
pub mod greeting;
pub mod ids;
pub mod tag;

pub use errors::{ServerError, TagError};
pub use greeting::{GreetingReply, GreetingRequest};
pub use ids::{SessionId, SessionIdAllocator};
pub use tag::{EventKind, Tag, EVENT_KIND_BITS, MAX_SESSION_ID};
