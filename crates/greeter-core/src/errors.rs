/// Failures surfaced by the server as a whole.
///
/// Anything that goes wrong with a single session travels through the
/// not-ok completion path instead and never shows up here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    // Fatal
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session identifier space exhausted (limit {limit})")]
    IdSpaceExhausted { limit: u64 },

    // Operational
    #[error("server already started")]
    AlreadyStarted,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Whether the server cannot carry on (or cannot admit new sessions).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::IdSpaceExhausted { .. })
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::IdSpaceExhausted { .. } => "id_space_exhausted",
            Self::AlreadyStarted => "already_started",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("raw tag {raw:#x} carries no known event kind")]
    UnknownKind { raw: u64 },
}
