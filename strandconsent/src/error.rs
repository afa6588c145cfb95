// StrandConsent error types

use thiserror::Error;

use crate::session::HandshakeStatus;

/// Top-level error type for the StrandConsent crate.
#[derive(Debug, Error)]
pub enum ConsentError {
    // ── Caller input ────────────────────────────────────────────────────
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limit exceeded for {requester}: {limit} requests per hour, retry in {retry_after_secs}s")]
    RateLimitExceeded {
        requester: String,
        limit: u32,
        retry_after_secs: u64,
    },

    // ── Participants ────────────────────────────────────────────────────
    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("responder {identifier} unavailable: {reason}")]
    ResponderUnavailable { identifier: String, reason: String },

    #[error("participant {actual} is not the responder of session {session_id} (expected {expected})")]
    ParticipantMismatch {
        session_id: String,
        expected: String,
        actual: String,
    },

    // ── Session lifecycle ───────────────────────────────────────────────
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("cannot {operation} session {session_id} in state {status}")]
    InvalidState {
        session_id: String,
        status: HandshakeStatus,
        operation: &'static str,
    },

    #[error("session {session_id} expired: expires_at={expires_at}, now={now}")]
    RequestExpired {
        session_id: String,
        expires_at: u64,
        now: u64,
    },

    // ── Disclosure ──────────────────────────────────────────────────────
    #[error("no value available for field {0}")]
    FieldUnavailable(String),

    #[error("disclosure failed: {0}")]
    Disclosure(String),

    // ── Collaborators / ambient ─────────────────────────────────────────
    #[error("notification dispatch failed: {0}")]
    Notification(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, ConsentError>;

/// Coarse classification of a [`ConsentError`], used by callers to decide
/// between fixing input, retrying later, or reporting a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    RateLimitExceeded,
    ResponderUnavailable,
    SessionNotFound,
    InvalidState,
    RequestExpired,
    Internal,
}

impl ConsentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsentError::Validation(_)
            | ConsentError::ParticipantMismatch { .. }
            | ConsentError::Config(_)
            | ConsentError::Json(_) => ErrorKind::Validation,
            ConsentError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            ConsentError::ParticipantNotFound(_) | ConsentError::ResponderUnavailable { .. } => {
                ErrorKind::ResponderUnavailable
            }
            ConsentError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            ConsentError::InvalidState { .. } => ErrorKind::InvalidState,
            ConsentError::RequestExpired { .. } => ErrorKind::RequestExpired,
            ConsentError::FieldUnavailable(_)
            | ConsentError::Disclosure(_)
            | ConsentError::Notification(_) => ErrorKind::Internal,
        }
    }

    /// Only rate limiting clears by itself; everything else needs the caller
    /// to change something first.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::RateLimitExceeded
    }

    /// HTTP status code for the `/handshake` REST surface.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::RateLimitExceeded => 429,
            ErrorKind::ResponderUnavailable => 503,
            ErrorKind::SessionNotFound => 404,
            ErrorKind::InvalidState => 409,
            ErrorKind::RequestExpired => 410,
            ErrorKind::Internal => 500,
        }
    }
}
