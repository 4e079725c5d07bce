//! Error types for rust-netconf

use std::time::Duration;

use thiserror::Error;

use crate::messages::ErrorInfo;

/// Main error type for NETCONF operations
#[derive(Debug, Error)]
pub enum NetconfError {
    /// Device address could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Session could not be established (network, authentication, hello, version mismatch)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Mid-session I/O or framing failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reply is not well-formed XML or violates the RPC envelope structure
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// No reply arrived within the deadline
    #[error("RPC {message_id} timed out after {timeout:?}")]
    RpcTimeout { message_id: u64, timeout: Duration },

    /// The session broke or was closed while the call was outstanding
    #[error("Transport closed")]
    TransportClosed,

    /// Device reported one or more rpc-errors
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// ConfigNode invariant violated
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// XML writer failure
    #[error("XML encode error: {0}")]
    Encode(String),

    /// The device did not advertise a capability the operation needs
    #[error("Capability not supported by device: {0}")]
    Unsupported(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (configuration files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the framed byte stream underneath a session
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing violation: {0}")]
    Framing(String),

    #[error("connection closed by peer")]
    Closed,
}

/// Device-reported failure of a single RPC.
///
/// Carries every `<rpc-error>` of the reply in the order the device sent them.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub message_id: u64,
    pub errors: Vec<ErrorInfo>,
}

impl RpcError {
    /// Wrap the error descriptors of the reply to `message_id`
    pub fn new(message_id: u64, errors: Vec<ErrorInfo>) -> Self {
        Self { message_id, errors }
    }

    /// Descriptors in the order the device sent them
    pub fn errors(&self) -> &[ErrorInfo] {
        &self.errors
    }

    /// True if any descriptor carries the given error-tag (e.g. "data-exists")
    pub fn has_tag(&self, tag: &str) -> bool {
        self.errors.iter().any(|e| e.error_tag == tag)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RPC {} failed with {} error(s)",
            self.message_id,
            self.errors.len()
        )?;
        for error in &self.errors {
            write!(f, "; {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// Result type alias for NETCONF operations
pub type Result<T> = std::result::Result<T, NetconfError>;
