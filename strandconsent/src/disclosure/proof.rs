// Proof tokens for disclosure bundles and the zero-knowledge placeholder.
//
// Every digest input is length-prefixed (u32 BE) so field boundaries cannot
// be shifted between adjacent strings.
//
//   field proof   = BLAKE3(credential_id | verifier | field | value | timestamp)
//   bundle digest = SHA-256(credential_id | verifier | field proofs... | non-disclosed...)
//   zk proofValue = SHA-256(verifier | sorted fields... | challenge)

use std::collections::BTreeSet;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::disclosure::SelectiveDisclosureBundle;
use crate::error::{ConsentError, Result};

pub const ZK_PROOF_TYPE: &str = "ZeroKnowledgeProof2024";

fn absorb_sha(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_be_bytes());
    hasher.update(bytes);
}

fn absorb_blake(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u32).to_be_bytes());
    hasher.update(bytes);
}

/// Hex proof token for one disclosed field.
pub fn field_proof(
    credential_id: &str,
    verifier: &str,
    field_name: &str,
    value: &Value,
    timestamp: u64,
) -> String {
    let mut hasher = blake3::Hasher::new();
    absorb_blake(&mut hasher, credential_id.as_bytes());
    absorb_blake(&mut hasher, verifier.as_bytes());
    absorb_blake(&mut hasher, field_name.as_bytes());
    absorb_blake(&mut hasher, value.to_string().as_bytes());
    hasher.update(&timestamp.to_be_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Canonical digest of a bundle. The bundle's own `proof` field is excluded.
pub fn bundle_digest(bundle: &SelectiveDisclosureBundle, verifier: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    absorb_sha(&mut hasher, bundle.credential_id.as_bytes());
    absorb_sha(&mut hasher, verifier.as_bytes());
    hasher.update((bundle.disclosed_fields.len() as u32).to_be_bytes());
    for field in &bundle.disclosed_fields {
        absorb_sha(&mut hasher, field.field_name.as_bytes());
        absorb_sha(&mut hasher, field.proof.as_bytes());
    }
    hasher.update((bundle.non_disclosed_fields.len() as u32).to_be_bytes());
    for name in &bundle.non_disclosed_fields {
        absorb_sha(&mut hasher, name.as_bytes());
    }
    hasher.finalize().into()
}

/// Hex Ed25519 signature over [`bundle_digest`].
pub fn sign_bundle(key: &SigningKey, bundle: &SelectiveDisclosureBundle, verifier: &str) -> String {
    let sig: Signature = key.sign(&bundle_digest(bundle, verifier));
    hex::encode(sig.to_bytes())
}

/// Check a signed bundle's `proof` against the holder's public key.
pub fn verify_bundle(
    key: &VerifyingKey,
    bundle: &SelectiveDisclosureBundle,
    verifier: &str,
) -> Result<()> {
    let bytes = hex::decode(&bundle.proof)
        .map_err(|e| ConsentError::Disclosure(format!("bundle proof is not hex: {e}")))?;
    let sig_bytes: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
        ConsentError::Disclosure(format!("bundle proof is {} bytes, expected 64", bytes.len()))
    })?;
    key.verify(&bundle_digest(bundle, verifier), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| ConsentError::Disclosure("bundle signature verification failed".into()))
}

/// Hex `proofValue` binding the verifier, the field set and the challenge.
pub fn zk_proof_value(verifier: &str, fields: &BTreeSet<String>, challenge: &str) -> String {
    let mut hasher = Sha256::new();
    absorb_sha(&mut hasher, verifier.as_bytes());
    hasher.update((fields.len() as u32).to_be_bytes());
    for field in fields {
        absorb_sha(&mut hasher, field.as_bytes());
    }
    absorb_sha(&mut hasher, challenge.as_bytes());
    hex::encode(hasher.finalize())
}
