//! Handshake session aggregate and its request/response records.
//!
//! Status lifecycle, shared by the session and its request:
//! Pending -> Approved | Rejected | Expired. Every non-pending state is
//! terminal. Cancellation is recorded as Rejected with a
//! `cancellationReason` in the session metadata.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::disclosure::{SelectiveDisclosureBundle, ZeroKnowledgeProof};
use crate::error::{ConsentError, Result};
use crate::participant::Participant;

/// Open key-value metadata attached to requests, responses and sessions.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Build a field set from anything string-like.
pub fn field_set<I, S>(fields: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    fields.into_iter().map(Into::into).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeStatus {
    /// Waiting for the responder's decision.
    Pending,
    /// At least one field was approved.
    Approved,
    /// Nothing was approved, or the request was cancelled.
    Rejected,
    /// `expires_at` passed while still pending.
    Expired,
}

impl HandshakeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, HandshakeStatus::Pending)
    }

    /// Only `Pending` has outgoing edges, and it cannot loop to itself.
    pub fn can_transition_to(self, to: HandshakeStatus) -> bool {
        self == HandshakeStatus::Pending && to != HandshakeStatus::Pending
    }
}

impl fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeStatus::Pending => write!(f, "pending"),
            HandshakeStatus::Approved => write!(f, "approved"),
            HandshakeStatus::Rejected => write!(f, "rejected"),
            HandshakeStatus::Expired => write!(f, "expired"),
        }
    }
}

/// The requester's ask: which fields, for what purpose, until when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub id: String,
    pub requester_identifier: String,
    pub requester_name: String,
    pub requested_fields: BTreeSet<String>,
    pub purpose: String,
    pub expires_at: u64,
    pub status: HandshakeStatus,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// The responder's field-by-field decision. Written once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub id: String,
    pub request_id: String,
    pub responder_identifier: String,
    pub approved_fields: BTreeSet<String>,
    pub rejected_fields: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selective_disclosure: Option<SelectiveDisclosureBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_knowledge_proof: Option<ZeroKnowledgeProof>,
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Aggregate root tracking one handshake from initiation to its outcome.
///
/// `status` and `request.status` (and the two `updated_at` stamps) only
/// change together, through [`HandshakeSession::transition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeSession {
    /// Same as `request.id`.
    pub id: String,
    pub requester: Participant,
    pub responder: Participant,
    pub request: HandshakeRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HandshakeResponse>,
    pub status: HandshakeStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub expires_at: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl HandshakeSession {
    /// Wrap a freshly built request. The session mirrors the request's id,
    /// status and timestamps.
    pub fn new(requester: Participant, responder: Participant, request: HandshakeRequest) -> Self {
        Self {
            id: request.id.clone(),
            requester,
            responder,
            status: request.status,
            created_at: request.created_at,
            updated_at: request.updated_at,
            expires_at: request.expires_at,
            metadata: Metadata::new(),
            request,
            response: None,
        }
    }

    /// Read-only projection of the request, as handed to API callers.
    pub fn request_view(&self) -> HandshakeRequest {
        self.request.clone()
    }

    pub fn involves(&self, identifier: &str) -> bool {
        self.requester.identifier == identifier || self.responder.identifier == identifier
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Fail with `InvalidState` unless the session is still pending.
    pub fn ensure_pending(&self, operation: &'static str) -> Result<()> {
        if self.status != HandshakeStatus::Pending {
            return Err(ConsentError::InvalidState {
                session_id: self.id.clone(),
                status: self.status,
                operation,
            });
        }
        Ok(())
    }

    /// Move session and request to `to` in lock-step.
    pub fn transition(&mut self, to: HandshakeStatus, now: u64) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ConsentError::InvalidState {
                session_id: self.id.clone(),
                status: self.status,
                operation: "transition",
            });
        }
        self.status = to;
        self.updated_at = now;
        self.request.status = to;
        self.request.updated_at = now;
        Ok(())
    }
}
