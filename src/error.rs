//! Error type shared by the trace builder, its writers and the decode side.

use thiserror::Error;

use crate::intern::Namespace;

/// Errors surfaced by rendering, writing or decoding a trace.
///
/// Building a trace never fails; only handing the packet tree to the
/// protobuf encoder (or an output sink) and reading a trace back can.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The protobuf encoder or decoder rejected a message.
    #[error("protobuf encoding failed: {0}")]
    Encode(#[from] protobuf::Error),

    /// The output sink or input source failed.
    #[error("trace I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A `Features` document could not be parsed.
    #[error("invalid features configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A packet referenced an interning id that no earlier packet defined.
    #[error("{namespace} iid {iid} referenced before it was interned")]
    UnresolvedIid { namespace: Namespace, iid: u64 },

    /// The byte stream is not a framed sequence of trace packets.
    #[error("malformed trace: {0}")]
    MalformedTrace(String),
}

pub type Result<T> = std::result::Result<T, TraceError>;
