//! Handshake protocol: consent negotiation over identity fields.
//!
//! ```text
//!   Requester                      Responder
//!     |--- initiate -------------->|   session: pending
//!     |<-- respond (field-by-field)|   session: approved | rejected
//!     |--- cancel ---------------->|   session: rejected (no response record)
//!                 sweep / lazy check   session: expired
//! ```
//!
//! Cancel and the expiry sweep run their read-check-write under the session
//! store's `update`. Respond validates against a snapshot, builds proofs with
//! no lock held, then commits through `update` only if the session is still
//! `pending`, so a concurrent respond and cancel cannot both succeed.
//! Notifications go out after the store write and are best-effort.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{HandshakeConfig, MAX_EXPIRY_HOURS, RATE_LIMIT_WINDOW_SECS};
use crate::disclosure::{DisclosureEngine, StaticFieldValues};
use crate::error::{ConsentError, Result};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::participant::{Participant, ParticipantResolver};
use crate::session::{
    HandshakeRequest, HandshakeResponse, HandshakeSession, HandshakeStatus, Metadata,
};
use crate::store::{MemorySessionStore, SessionStore};

const SECS_PER_HOUR: u64 = 3600;

/// Optional inputs to [`HandshakeProtocol::initiate_handshake`].
#[derive(Debug, Clone, Default)]
pub struct InitiateOptions {
    /// Overrides `HandshakeConfig::default_expiry_hours`.
    pub expiry_hours: Option<u64>,
    pub metadata: Metadata,
}

impl InitiateOptions {
    pub fn expiry_hours(mut self, hours: u64) -> Self {
        self.expiry_hours = Some(hours);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The responder's decision on a pending request.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub approved_fields: BTreeSet<String>,
    pub rejected_fields: BTreeSet<String>,
    pub use_zero_knowledge_proofs: bool,
    pub use_selective_disclosure: bool,
    pub metadata: Metadata,
}

impl Decision {
    pub fn new(approved_fields: BTreeSet<String>, rejected_fields: BTreeSet<String>) -> Self {
        Self {
            approved_fields,
            rejected_fields,
            ..Self::default()
        }
    }

    pub fn with_zero_knowledge_proofs(mut self) -> Self {
        self.use_zero_knowledge_proofs = true;
        self
    }

    pub fn with_selective_disclosure(mut self) -> Self {
        self.use_selective_disclosure = true;
        self
    }

    fn validate(&self, requested: &BTreeSet<String>) -> Result<()> {
        if let Some(field) = self.approved_fields.intersection(&self.rejected_fields).next() {
            return Err(ConsentError::Validation(format!(
                "field {field} is both approved and rejected"
            )));
        }
        let decided = self.approved_fields.iter().chain(&self.rejected_fields);
        for field in decided {
            if !requested.contains(field) {
                return Err(ConsentError::Validation(format!(
                    "field {field} was not requested"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`HandshakeProtocol`].
///
/// # Example
/// ```ignore
/// let protocol = HandshakeProtocol::builder(directory, outbox)
///     .config(HandshakeConfig::default().max_requests_per_hour(5))
///     .clock(clock)
///     .build()?;
/// ```
pub struct HandshakeProtocolBuilder<S> {
    config: HandshakeConfig,
    store: S,
    resolver: Arc<dyn ParticipantResolver>,
    notifier: Arc<dyn Notifier>,
    engine: Option<DisclosureEngine>,
    clock: Option<Arc<dyn Clock>>,
}

impl<S: SessionStore> HandshakeProtocolBuilder<S> {
    pub fn config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn engine(mut self, engine: DisclosureEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Swap the session store backend.
    pub fn store<T: SessionStore>(self, store: T) -> HandshakeProtocolBuilder<T> {
        HandshakeProtocolBuilder {
            config: self.config,
            store,
            resolver: self.resolver,
            notifier: self.notifier,
            engine: self.engine,
            clock: self.clock,
        }
    }

    pub fn build(self) -> Result<HandshakeProtocol<S>> {
        self.config.validate()?;
        Ok(HandshakeProtocol {
            config: self.config,
            store: self.store,
            resolver: self.resolver,
            notifier: self.notifier,
            engine: self.engine.unwrap_or_else(|| {
                DisclosureEngine::new(Arc::new(StaticFieldValues::placeholder()))
            }),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            initiate_lock: Mutex::new(()),
        })
    }
}

/// The handshake state machine and its collaborators.
pub struct HandshakeProtocol<S = MemorySessionStore> {
    config: HandshakeConfig,
    store: S,
    resolver: Arc<dyn ParticipantResolver>,
    notifier: Arc<dyn Notifier>,
    engine: DisclosureEngine,
    clock: Arc<dyn Clock>,
    /// Serializes the rate-limit count with the insert that follows it.
    initiate_lock: Mutex<()>,
}

impl HandshakeProtocol<MemorySessionStore> {
    /// Start building a protocol with an in-memory store, the default
    /// configuration, wall-clock time and placeholder field values.
    pub fn builder(
        resolver: Arc<dyn ParticipantResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> HandshakeProtocolBuilder<MemorySessionStore> {
        HandshakeProtocolBuilder {
            config: HandshakeConfig::default(),
            store: MemorySessionStore::new(),
            resolver,
            notifier,
            engine: None,
            clock: None,
        }
    }
}

impl<S: SessionStore> HandshakeProtocol<S> {
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Open a new handshake from `requester` to `responder_identifier`.
    ///
    /// Validation, rate limiting and responder resolution all happen before
    /// anything is stored. Both participant snapshots come from the resolver
    /// when it knows them; an unregistered requester is stored as supplied. The responder is notified with a
    /// `handshake.request` notification.
    pub fn initiate_handshake(
        &self,
        requester: &Participant,
        responder_identifier: &str,
        requested_fields: BTreeSet<String>,
        purpose: &str,
        options: InitiateOptions,
    ) -> Result<HandshakeRequest> {
        let requested_fields = normalize_fields(requested_fields)?;
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(ConsentError::Validation("purpose must not be empty".into()));
        }
        let expiry_hours = options.expiry_hours.unwrap_or(self.config.default_expiry_hours);
        if expiry_hours == 0 || expiry_hours > MAX_EXPIRY_HOURS {
            return Err(ConsentError::Validation(format!(
                "expiry must be between 1 and {MAX_EXPIRY_HOURS} hours"
            )));
        }
        if requester.identifier == responder_identifier {
            return Err(ConsentError::Validation(
                "requester and responder must differ".into(),
            ));
        }

        let request = {
            let _guard = self.initiate_lock.lock();
            let now = self.clock.now();
            let expires_at = expiry_hours
                .checked_mul(SECS_PER_HOUR)
                .and_then(|secs| now.checked_add(secs))
                .ok_or_else(|| {
                    ConsentError::Validation(format!(
                        "expiry of {expiry_hours} hours overflows the clock"
                    ))
                })?;
            self.check_rate_limit(&requester.identifier, now)?;

            let responder = self.resolver.resolve(responder_identifier).map_err(|e| {
                ConsentError::ResponderUnavailable {
                    identifier: responder_identifier.to_string(),
                    reason: e.to_string(),
                }
            })?;

            let requester = self.requester_snapshot(requester);

            let request = HandshakeRequest {
                id: Uuid::new_v4().to_string(),
                requester_identifier: requester.identifier.clone(),
                requester_name: requester.display_name.clone(),
                requested_fields,
                purpose: purpose.to_string(),
                expires_at,
                status: HandshakeStatus::Pending,
                created_at: now,
                updated_at: now,
                metadata: options.metadata,
            };
            let session = HandshakeSession::new(requester, responder, request.clone());
            self.store.put(session)?;
            request
        };

        tracing::info!(
            session_id = %request.id,
            requester = %request.requester_identifier,
            responder = responder_identifier,
            fields = request.requested_fields.len(),
            "handshake initiated"
        );

        let fields: Vec<&str> = request.requested_fields.iter().map(String::as_str).collect();
        let mut metadata = Metadata::new();
        metadata.insert("sessionId".into(), request.id.clone().into());
        metadata.insert("requesterName".into(), request.requester_name.clone().into());
        metadata.insert("purpose".into(), request.purpose.clone().into());
        metadata.insert("requestedFields".into(), fields.clone().into());
        self.notify(Notification {
            recipient_identifier: responder_identifier.to_string(),
            kind: NotificationKind::Request,
            title: "New identity request".into(),
            message: format!(
                "{} is requesting {} for: {}",
                request.requester_name,
                fields.join(", "),
                request.purpose
            ),
            action_url: Some(action_url(&request.id)),
            metadata,
        });

        Ok(request)
    }

    /// Record the responder's decision on a pending session.
    ///
    /// An expired-but-unswept session is moved to `expired` here and the
    /// call fails with `RequestExpired`. On success the session becomes
    /// `approved` when anything was approved, `rejected` otherwise.
    pub fn respond_to_handshake(
        &self,
        session_id: &str,
        responder: &Participant,
        decision: Decision,
    ) -> Result<HandshakeResponse> {
        let now = self.clock.now();
        let snapshot = self
            .store
            .get(session_id)?
            .ok_or_else(|| ConsentError::SessionNotFound(session_id.to_string()))?;
        snapshot.ensure_pending("respond to")?;
        if snapshot.is_expired_at(now) {
            self.store.update(session_id, |session| {
                session.ensure_pending("respond to")?;
                self.expire_if_due(session, now)
            })?;
        }

        if responder.identifier != snapshot.responder.identifier {
            return Err(ConsentError::ParticipantMismatch {
                session_id: snapshot.id,
                expected: snapshot.responder.identifier,
                actual: responder.identifier.clone(),
            });
        }
        decision.validate(&snapshot.request.requested_fields)?;

        // Proofs may call out to the field value resolver, so they are built
        // without holding the store lock.
        let verifier = snapshot.requester.identifier.as_str();
        let zero_knowledge_proof = (decision.use_zero_knowledge_proofs
            && self.config.enable_zero_knowledge_proofs)
            .then(|| {
                self.engine
                    .build_zero_knowledge_proof(&decision.approved_fields, verifier, now)
            });
        let selective_disclosure =
            if decision.use_selective_disclosure && self.config.enable_selective_disclosure {
                Some(self.engine.build_selective_disclosure(
                    &decision.approved_fields,
                    verifier,
                    now,
                )?)
            } else {
                None
            };

        let status = if decision.approved_fields.is_empty() {
            HandshakeStatus::Rejected
        } else {
            HandshakeStatus::Approved
        };
        let response = HandshakeResponse {
            id: Uuid::new_v4().to_string(),
            request_id: snapshot.request.id.clone(),
            responder_identifier: responder.identifier.clone(),
            approved_fields: decision.approved_fields,
            rejected_fields: decision.rejected_fields,
            selective_disclosure,
            zero_knowledge_proof,
            timestamp: now,
            metadata: decision.metadata,
        };

        // Commit only if nothing decided the session since the snapshot.
        let requester_identifier = self.store.update(session_id, |session| {
            session.ensure_pending("respond to")?;
            session.transition(status, now)?;
            session.response = Some(response.clone());
            Ok(session.requester.identifier.clone())
        })?;

        let approved = response.approved_fields.len();
        let rejected = response.rejected_fields.len();
        tracing::info!(
            session_id,
            approved,
            rejected,
            "handshake response recorded"
        );

        let (title, status) = if approved > 0 {
            ("Identity request approved", HandshakeStatus::Approved)
        } else {
            ("Identity request declined", HandshakeStatus::Rejected)
        };
        let mut metadata = Metadata::new();
        metadata.insert("sessionId".into(), session_id.into());
        metadata.insert("responseId".into(), response.id.clone().into());
        metadata.insert("status".into(), status.to_string().into());
        metadata.insert("approvedCount".into(), approved.into());
        metadata.insert("rejectedCount".into(), rejected.into());
        self.notify(Notification {
            recipient_identifier: requester_identifier,
            kind: NotificationKind::Response,
            title: title.into(),
            message: format!(
                "{} approved {approved} and declined {rejected} of the requested fields",
                responder.display_name
            ),
            action_url: Some(action_url(session_id)),
            metadata,
        });

        Ok(response)
    }

    /// Withdraw a pending request. Ends in `rejected` with the reason in
    /// `metadata.cancellationReason`; no response record is created.
    pub fn cancel_handshake(&self, session_id: &str, reason: Option<&str>) -> Result<()> {
        let now = self.clock.now();
        let reason = reason.unwrap_or("cancelled by requester").to_string();
        let (responder_identifier, requester_name) = self.store.update(session_id, |session| {
            session.ensure_pending("cancel")?;
            self.expire_if_due(session, now)?;
            session.transition(HandshakeStatus::Rejected, now)?;
            session
                .metadata
                .insert("cancellationReason".into(), reason.clone().into());
            Ok((
                session.responder.identifier.clone(),
                session.requester.display_name.clone(),
            ))
        })?;

        tracing::info!(session_id, reason = %reason, "handshake cancelled");

        let mut metadata = Metadata::new();
        metadata.insert("sessionId".into(), session_id.into());
        metadata.insert("cancellationReason".into(), reason.clone().into());
        self.notify(Notification {
            recipient_identifier: responder_identifier,
            kind: NotificationKind::Cancelled,
            title: "Identity request cancelled".into(),
            message: format!("{requester_name} cancelled their request: {reason}"),
            action_url: None,
            metadata,
        });
        Ok(())
    }

    pub fn get_handshake_session(&self, session_id: &str) -> Result<Option<HandshakeSession>> {
        self.store.get(session_id)
    }

    /// Every session where `identifier` is requester or responder, in
    /// creation order.
    pub fn get_participant_sessions(&self, identifier: &str) -> Result<Vec<HandshakeSession>> {
        Ok(self
            .store
            .sessions()?
            .into_iter()
            .filter(|s| s.involves(identifier))
            .collect())
    }

    /// Expire every pending session past its deadline. Idempotent; sends no
    /// notifications. Returns how many sessions were expired by this call.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self.store.update_all(&mut |session: &mut HandshakeSession| {
            session.status == HandshakeStatus::Pending
                && session.is_expired_at(now)
                && session.transition(HandshakeStatus::Expired, now).is_ok()
        })?;
        if expired > 0 {
            tracing::info!(expired, "expired stale handshake sessions");
        }
        Ok(expired)
    }

    /// Number of stored sessions in each status.
    pub fn status_counts(&self) -> Result<HashMap<HandshakeStatus, usize>> {
        let mut counts = HashMap::new();
        for session in self.store.sessions()? {
            *counts.entry(session.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn check_rate_limit(&self, requester: &str, now: u64) -> Result<()> {
        let recent: Vec<u64> = self
            .store
            .sessions()?
            .iter()
            .filter(|s| {
                s.requester.identifier == requester
                    && now.saturating_sub(s.created_at) < RATE_LIMIT_WINDOW_SECS
            })
            .map(|s| s.created_at)
            .collect();

        let limit = self.config.max_requests_per_hour;
        if recent.len() >= limit as usize {
            let oldest = recent.iter().copied().min().unwrap_or(now);
            let retry_after_secs = oldest
                .saturating_add(RATE_LIMIT_WINDOW_SECS)
                .saturating_sub(now);
            tracing::warn!(requester, limit, retry_after_secs, "handshake rate limit hit");
            return Err(ConsentError::RateLimitExceeded {
                requester: requester.to_string(),
                limit,
                retry_after_secs,
            });
        }
        Ok(())
    }

    /// The directory's record for the requester, or the caller's own
    /// description when the requester is not registered.
    fn requester_snapshot(&self, requester: &Participant) -> Participant {
        match self.resolver.resolve(&requester.identifier) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::debug!(requester = %requester.identifier, error = %e, "requester not resolved, using supplied record");
                requester.clone()
            }
        }
    }

    /// Lazy expiry: mark a pending session expired once its deadline has
    /// passed and report `RequestExpired`.
    fn expire_if_due(&self, session: &mut HandshakeSession, now: u64) -> Result<()> {
        if !session.is_expired_at(now) {
            return Ok(());
        }
        session.transition(HandshakeStatus::Expired, now)?;
        tracing::debug!(session_id = %session.id, expires_at = session.expires_at, now, "session expired on access");
        Err(ConsentError::RequestExpired {
            session_id: session.id.clone(),
            expires_at: session.expires_at,
            now,
        })
    }

    fn notify(&self, notification: Notification) {
        let recipient = notification.recipient_identifier.clone();
        let kind = notification.kind;
        if let Err(e) = self.notifier.dispatch(notification) {
            tracing::warn!(recipient = %recipient, kind = %kind, error = %e, "notification dispatch failed");
        }
    }
}

fn action_url(session_id: &str) -> String {
    format!("/handshake/{session_id}")
}

/// Trim field names and reject empty names or an empty set.
fn normalize_fields(fields: BTreeSet<String>) -> Result<BTreeSet<String>> {
    if fields.is_empty() {
        return Err(ConsentError::Validation(
            "at least one field must be requested".into(),
        ));
    }
    fields
        .into_iter()
        .map(|f| {
            let trimmed = f.trim();
            if trimmed.is_empty() {
                Err(ConsentError::Validation("field names must not be blank".into()))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::field_set;

    #[test]
    fn normalize_trims_and_dedups() {
        let fields = normalize_fields(field_set([" name", "name ", "email"])).unwrap();
        assert_eq!(fields, field_set(["email", "name"]));
    }

    #[test]
    fn normalize_rejects_blank() {
        assert!(normalize_fields(field_set(["name", "  "])).is_err());
        assert!(normalize_fields(BTreeSet::new()).is_err());
    }

    #[test]
    fn decision_must_be_disjoint() {
        let d = Decision::new(field_set(["name"]), field_set(["name"]));
        assert!(d.validate(&field_set(["name"])).is_err());
    }

    #[test]
    fn decision_must_stay_within_request() {
        let d = Decision::new(field_set(["ssn"]), BTreeSet::new());
        let err = d.validate(&field_set(["name"])).unwrap_err();
        assert!(matches!(err, ConsentError::Validation(m) if m.contains("ssn")));
    }

    #[test]
    fn decision_may_leave_fields_undecided() {
        let d = Decision::new(field_set(["name"]), BTreeSet::new());
        d.validate(&field_set(["name", "email"])).unwrap();
    }

    #[test]
    fn initiate_options_builder() {
        let opts = InitiateOptions::default()
            .expiry_hours(2)
            .metadata("channel", "qr");
        assert_eq!(opts.expiry_hours, Some(2));
        assert_eq!(opts.metadata["channel"], "qr");
    }
}
