//! Field Disclosure Engine.
//!
//! Turns a set of approved field names into disclosure records: a
//! [`SelectiveDisclosureBundle`] carrying the resolved values with per-field
//! proof tokens, and/or a [`ZeroKnowledgeProof`]. The proof values are
//! digest/signature placeholders with a fixed wire shape; a real proof
//! system can replace [`proof`] without changing these types.

pub mod proof;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConsentError, Result};

/// Field names the wallet knows how to disclose.
pub const CANONICAL_FIELDS: [&str; 7] = [
    "name",
    "email",
    "birthDate",
    "address",
    "phone",
    "ssn",
    "license",
];

/// One revealed field with its proof token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisclosedField {
    pub field_name: String,
    pub value: Value,
    pub proof: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectiveDisclosureBundle {
    pub credential_id: String,
    /// Exactly the approved fields, in field-name order.
    pub disclosed_fields: Vec<DisclosedField>,
    /// Canonical fields minus the approved ones.
    pub non_disclosed_fields: BTreeSet<String>,
    /// Hex signature (or digest, when unsigned) over the bundle.
    pub proof: String,
}

impl SelectiveDisclosureBundle {
    pub fn disclosed_names(&self) -> BTreeSet<&str> {
        self.disclosed_fields
            .iter()
            .map(|f| f.field_name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZeroKnowledgeProof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub proof_purpose: String,
    pub verification_method: String,
    pub challenge: String,
    pub proof_value: String,
    pub created: u64,
}

/// Supplies the holder's field values. In a wallet this reads the
/// credential store.
pub trait FieldValueResolver: Send + Sync {
    /// Identifier of the credential the values come from.
    fn credential_id(&self) -> String;

    /// Fails with [`ConsentError::FieldUnavailable`] for fields it cannot serve.
    fn resolve_value(&self, field_name: &str) -> Result<Value>;
}

/// Fixed field values held in memory.
#[derive(Debug, Clone)]
pub struct StaticFieldValues {
    credential_id: String,
    values: HashMap<String, Value>,
}

impl StaticFieldValues {
    pub fn new(credential_id: impl Into<String>) -> Self {
        Self {
            credential_id: credential_id.into(),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field_name.into(), value.into());
        self
    }

    /// Sample values for every canonical field.
    pub fn placeholder() -> Self {
        Self::new("urn:credential:identity:placeholder")
            .with("name", "Jane Doe")
            .with("email", "jane.doe@example.com")
            .with("birthDate", "1990-01-01")
            .with("address", "1 Example Street, Springfield")
            .with("phone", "+1-555-0100")
            .with("ssn", "***-**-0000")
            .with("license", "D0000000")
    }
}

impl FieldValueResolver for StaticFieldValues {
    fn credential_id(&self) -> String {
        self.credential_id.clone()
    }

    fn resolve_value(&self, field_name: &str) -> Result<Value> {
        self.values
            .get(field_name)
            .cloned()
            .ok_or_else(|| ConsentError::FieldUnavailable(field_name.to_string()))
    }
}

/// Builds disclosure bundles and proofs over approved fields.
#[derive(Clone)]
pub struct DisclosureEngine {
    values: Arc<dyn FieldValueResolver>,
    universe: BTreeSet<String>,
    signing_key: Option<SigningKey>,
}

impl DisclosureEngine {
    /// Engine over [`CANONICAL_FIELDS`], producing unsigned bundles.
    pub fn new(values: Arc<dyn FieldValueResolver>) -> Self {
        Self {
            values,
            universe: CANONICAL_FIELDS.iter().map(|f| f.to_string()).collect(),
            signing_key: None,
        }
    }

    /// Sign bundle proofs with the holder's Ed25519 key.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.signing_key.as_ref().map(SigningKey::verifying_key)
    }

    pub fn universe(&self) -> &BTreeSet<String> {
        &self.universe
    }

    /// Resolve and disclose exactly `approved`; everything else in the
    /// canonical universe is listed as non-disclosed.
    pub fn build_selective_disclosure(
        &self,
        approved: &BTreeSet<String>,
        verifier: &str,
        now: u64,
    ) -> Result<SelectiveDisclosureBundle> {
        let credential_id = self.values.credential_id();

        let mut disclosed_fields = Vec::with_capacity(approved.len());
        for field_name in approved {
            let value = self.values.resolve_value(field_name)?;
            let proof = proof::field_proof(&credential_id, verifier, field_name, &value, now);
            disclosed_fields.push(DisclosedField {
                field_name: field_name.clone(),
                value,
                proof,
                timestamp: now,
            });
        }

        let non_disclosed_fields = self.universe.difference(approved).cloned().collect();

        let mut bundle = SelectiveDisclosureBundle {
            credential_id,
            disclosed_fields,
            non_disclosed_fields,
            proof: String::new(),
        };
        bundle.proof = match &self.signing_key {
            Some(key) => proof::sign_bundle(key, &bundle, verifier),
            None => hex::encode(proof::bundle_digest(&bundle, verifier)),
        };
        Ok(bundle)
    }

    /// Proof over the approved field names, bound to `verifier` and a fresh
    /// random challenge.
    pub fn build_zero_knowledge_proof(
        &self,
        approved: &BTreeSet<String>,
        verifier: &str,
        now: u64,
    ) -> ZeroKnowledgeProof {
        let challenge = hex::encode(rand::random::<[u8; 32]>());
        let proof_value = proof::zk_proof_value(verifier, approved, &challenge);
        ZeroKnowledgeProof {
            proof_type: proof::ZK_PROOF_TYPE.to_string(),
            proof_purpose: "authentication".to_string(),
            verification_method: format!("{verifier}#key-1"),
            challenge,
            proof_value,
            created: now,
        }
    }
}
