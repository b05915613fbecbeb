//! Unified error types for the BLE RPC core.
//!
//! Every subsystem has its own small error enum; all of them convert into
//! the top-level [`Error`] so callers at the outer boundary can handle
//! failures uniformly. Framing and dispatch errors never escape to the
//! transport: they are reported to the peer in-band (flag bits or an
//! `{ok:false}` document) and surface here only for logging and tests.

use core::fmt;

use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Inbound chunk stream was malformed.
    Frame(FrameError),
    /// Request could not be dispatched.
    Rpc(RpcError),
    /// Key-value backend failed.
    Storage(StorageError),
    /// Configuration is invalid.
    Config(ConfigError),
    /// Connection-level failure (session table).
    Server(ServerError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Rpc(e) => write!(f, "rpc: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Server(e) => write!(f, "server: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Framing errors
// ---------------------------------------------------------------------------

/// Reasons a chunk was rejected by the reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Chunk shorter than the 4-byte header.
    ShortChunk,
    /// Sequence gap: the chunk did not carry the expected sequence number.
    MissedChunks { expected: u16, got: u16 },
    /// Accepting the chunk would exceed the configured message limit.
    SizeOverflow { size: usize, limit: usize },
    /// The device answered with a MISSED chunk.
    PeerMissed,
    /// The device answered with an OVERFLOW chunk.
    PeerOverflow,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortChunk => write!(f, "chunk shorter than header"),
            Self::MissedChunks { expected, got } => {
                write!(f, "missed chunks (expected seq {expected}, got {got})")
            }
            Self::SizeOverflow { size, limit } => {
                write!(f, "message size {size} exceeds limit {limit}")
            }
            Self::PeerMissed => write!(f, "peer reported missed chunks"),
            Self::PeerOverflow => write!(f, "peer reported message overflow"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

// ---------------------------------------------------------------------------
// Dispatch errors
// ---------------------------------------------------------------------------

/// Dispatch failures. `Display` produces the exact `result` string sent to
/// the peer in an `{ok:false}` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Request bytes were not a valid request document.
    ParseError(String),
    /// No method registered under the requested name.
    MethodNotFound,
    /// `args` length differs from the declared parameter count.
    ArgumentCount,
    /// An argument's runtime type differs from the declared kind.
    ArgumentType,
    /// A handler produced a value of a kind other than the declared one.
    ReturnType,
    /// The calling session must authenticate first.
    Unauthenticated,
    /// The handler itself failed.
    Handler(String),
}

impl RpcError {
    /// Shorthand for handler-raised failures.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "Invalid request: {msg}"),
            Self::MethodNotFound => write!(f, "Method not found"),
            Self::ArgumentCount => write!(f, "Number of arguments mismatch"),
            Self::ArgumentType => write!(f, "Argument type mismatch"),
            Self::ReturnType => write!(f, "Return type mismatch"),
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::Handler(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation. The message names the field.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Server errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerError {
    /// Session table has no free slot.
    TooManyConnections,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyConnections => write!(f, "session table full"),
        }
    }
}

impl From<ServerError> for Error {
    fn from(e: ServerError) -> Self {
        Self::Server(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
