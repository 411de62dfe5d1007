//! Coordinator error types

use thiserror::Error;

/// Structural errors returned by the coordinator API
///
/// Transport failures never surface here; they settle through the failure
/// handler instead.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Request identity must not be empty")]
    EmptyIdentity,

    #[error("Payload must be a JSON object or null, got {0}")]
    InvalidPayload(&'static str),

    #[error("Periodic interval must be greater than zero")]
    ZeroInterval,

    #[error("Coordinator channel closed")]
    ChannelClosed,

    #[error("Coordinator shut down before replying")]
    NoReply,
}
