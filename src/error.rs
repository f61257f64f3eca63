use enum_as_inner::EnumAsInner;

use crate::c37_118::parser::CodecError;
use crate::node::TransportError;

/// Top-level error classification for the routing core.
///
/// `Codec` and `Transport` errors surface to the path loop, which logs them
/// and either keeps running (a bad frame is dropped) or terminates the
/// affected thread (transport failure). Violated internal contracts do not
/// appear here; those are asserted and abort the process.
#[derive(Debug, thiserror::Error, EnumAsInner)]
pub enum Error {
    /// Static rejection while building or preparing a path.
    #[error("configuration error: {0}")]
    Config(String),

    /// Pool, queue or timer acquisition failed.
    #[error("resource error: {0}")]
    Resource(String),

    /// Frame en-/decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A node's I/O operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
