//! Connection-loss detection
//!
//! Recognises driver error text that means the server link is gone, as
//! opposed to an ordinary statement failure.

/// Error text fragments that mean the link dropped
const LOST_SIGNATURES: &[&str] = &[
    "server closed the connection unexpectedly",
    "Unable to set non-blocking to true",
    "connection closed",
    "terminating connection due to administrator command",
    "Connection reset by peer",
    "Broken pipe",
];

/// True when `message` matches a known dropped-connection signature
pub fn is_connection_lost(message: &str) -> bool {
    LOST_SIGNATURES.iter().any(|sig| message.contains(sig))
}
