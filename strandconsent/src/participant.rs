// Handshake participants and the resolver capability that looks them up.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ConsentError, Result};

/// The role a participant plays in the wider identity system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Individual,
    Organization,
    Verifier,
}

/// Immutable snapshot of a participant, captured into a session at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub identifier: String,
    pub display_name: String,
    pub role: ParticipantRole,
    /// Reference to the participant's public key (e.g. a DID URL).
    pub public_key_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_reference: Option<String>,
}

impl Participant {
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        role: ParticipantRole,
    ) -> Self {
        let identifier = identifier.into();
        let public_key_reference = format!("{identifier}#key-1");
        Self {
            identifier,
            display_name: display_name.into(),
            role,
            public_key_reference,
            endpoint_reference: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_reference = Some(endpoint.into());
        self
    }
}

/// Looks up a participant by identifier.
///
/// Implementations fail with [`ConsentError::ParticipantNotFound`] when the
/// identifier cannot be resolved.
pub trait ParticipantResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> Result<Participant>;
}

/// In-memory participant directory.
#[derive(Debug, Default)]
pub struct Directory {
    participants: RwLock<HashMap<String, Participant>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a participant.
    pub fn register(&self, participant: Participant) {
        self.participants
            .write()
            .insert(participant.identifier.clone(), participant);
    }

    pub fn remove(&self, identifier: &str) -> Option<Participant> {
        self.participants.write().remove(identifier)
    }
}

impl FromIterator<Participant> for Directory {
    fn from_iter<I: IntoIterator<Item = Participant>>(iter: I) -> Self {
        let participants = iter
            .into_iter()
            .map(|p| (p.identifier.clone(), p))
            .collect();
        Self {
            participants: RwLock::new(participants),
        }
    }
}

impl ParticipantResolver for Directory {
    fn resolve(&self, identifier: &str) -> Result<Participant> {
        self.participants
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| ConsentError::ParticipantNotFound(identifier.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_registered() {
        let dir = Directory::new();
        dir.register(Participant::new("did:example:bob", "Bob", ParticipantRole::Individual));
        let bob = dir.resolve("did:example:bob").unwrap();
        assert_eq!(bob.display_name, "Bob");
        assert_eq!(bob.public_key_reference, "did:example:bob#key-1");
    }

    #[test]
    fn unknown_identifier_fails() {
        let dir: Directory = [Participant::new("a", "A", ParticipantRole::Verifier)]
            .into_iter()
            .collect();
        let err = dir.resolve("b").unwrap_err();
        assert!(matches!(err, ConsentError::ParticipantNotFound(id) if id == "b"));
    }

    #[test]
    fn removed_participant_no_longer_resolves() {
        let dir = Directory::new();
        dir.register(Participant::new("a", "A", ParticipantRole::Organization));
        assert!(dir.remove("a").is_some());
        assert!(dir.resolve("a").is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let p = Participant::new("did:example:acme", "Acme", ParticipantRole::Organization)
            .with_endpoint("https://acme.example/inbox");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["displayName"], "Acme");
        assert_eq!(json["role"], "organization");
        assert_eq!(json["endpointReference"], "https://acme.example/inbox");
    }
}
