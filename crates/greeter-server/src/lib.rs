pub mod broadcaster;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use config::ServerConfig;
pub use context::ServerContext;
pub use dispatcher::Dispatch;
pub use queue::{Completion, CompletionQueue, EventQueues, QueueKind};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::{Session, SessionStatus, SharedSession, Step};
pub use transport::{MemoryTransport, TcpTransport, Transport, TransportOp};
