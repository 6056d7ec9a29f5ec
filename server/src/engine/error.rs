use thiserror::Error;

/// Reasons an inbound frame is dropped. Per the protocol, none of these is
/// ever surfaced to the sender — the connection stays open and the frame is
/// discarded. Callers log them at debug level at most.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Frame is not valid JSON for a known message type.
    #[error("unparseable frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The sender's address exhausted its message budget for the current window.
    #[error("rate limit exceeded")]
    RateExceeded,

    /// A chat frame arrived before the hello handshake completed.
    #[error("chat before hello handshake")]
    NotJoined,
}
