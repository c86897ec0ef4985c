//! Fair target generation.
//!
//! The target is drawn only after both picks are locked (or the deadline
//! fires), from a VRF over an input that binds the session id, the
//! resolution timestamp and the committed picks. The VRF secret key is the
//! server-held entropy no client can observe, and the recorded proof lets
//! either player verify the draw after settlement.

use crate::storage::DuelStorage;
use crate::types::{TargetProof, MAX_PICK};
use schnorrkel::{Keypair, PublicKey, Signature};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const TARGET_SIGNING_CONTEXT: &[u8] = b"fartduel-target";
const VRF_KEYPAIR_KEY: &[u8] = b"duel:vrf:keypair";

/// A drawn target with its fairness proof.
#[derive(Debug, Clone)]
pub struct TargetDraw {
    pub target: u8,
    pub proof: TargetProof,
}

#[derive(Debug, thiserror::Error)]
pub enum EntropyError {
    #[error("Entropy source unavailable: {0}")]
    Unavailable(String),
}

/// Source of fair targets in [1, 100]. Resolution fails closed when a draw
/// errors; implementations must never silently default.
pub trait TargetSource: Send + Sync {
    fn draw(
        &self,
        session_id: &str,
        resolved_at_ms: i64,
        commitments: &str,
    ) -> Result<TargetDraw, EntropyError>;
}

/// VRF-backed target source using a schnorrkel keypair.
pub struct VrfTargetSource {
    keypair: Arc<Keypair>,
}

impl VrfTargetSource {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Create a source with a fresh random keypair.
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng))
    }

    /// Load the keypair persisted in storage, creating one on first run.
    /// Keeps the published public key stable across restarts.
    pub fn load_or_create(storage: &DuelStorage) -> Result<Self, EntropyError> {
        if let Some(bytes) = storage.get(VRF_KEYPAIR_KEY) {
            let keypair = Keypair::from_bytes(&bytes)
                .map_err(|e| EntropyError::Unavailable(format!("Stored keypair invalid: {:?}", e)))?;
            return Ok(Self::new(keypair));
        }

        use rand_core::OsRng;
        let keypair = Keypair::generate_with(OsRng);
        storage
            .put(VRF_KEYPAIR_KEY, &keypair.to_bytes())
            .map_err(|e| EntropyError::Unavailable(format!("Failed to persist keypair: {}", e)))?;
        Ok(Self::new(keypair))
    }

    fn vrf_sign(&self, message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        use schnorrkel::context::SigningContext;

        let ctx = SigningContext::new(TARGET_SIGNING_CONTEXT);
        let signature = self.keypair.sign(ctx.bytes(message));

        // VRF output is the hash of the signature; the signature is the proof.
        let mut hasher = Sha256::new();
        hasher.update(signature.to_bytes());
        let vrf_output = hasher.finalize().to_vec();

        (vrf_output, signature.to_bytes().to_vec())
    }

    /// Map a VRF output uniformly onto [1, 100].
    pub fn compute_target(vrf_output: &[u8]) -> u8 {
        let mut buf = [0u8; 8];
        for (i, byte) in vrf_output.iter().take(8).enumerate() {
            buf[i] = *byte;
        }
        ((u64::from_be_bytes(buf) % MAX_PICK as u64) + 1) as u8
    }

    /// Verify a recorded target proof against its expected input.
    pub fn verify_target_proof(proof: &TargetProof, expected_input: &str) -> Result<bool, String> {
        if proof.input_message != expected_input {
            return Ok(false);
        }

        let vrf_output = hex::decode(&proof.vrf_output)
            .map_err(|e| format!("Invalid VRF output hex: {}", e))?;
        let vrf_proof = hex::decode(&proof.vrf_proof)
            .map_err(|e| format!("Invalid VRF proof hex: {}", e))?;
        let public_key_bytes = hex::decode(&proof.public_key)
            .map_err(|e| format!("Invalid public key hex: {}", e))?;

        let public_key_array: [u8; 32] = public_key_bytes
            .try_into()
            .map_err(|_| "Public key must be 32 bytes")?;
        let public_key = PublicKey::from_bytes(&public_key_array)
            .map_err(|e| format!("Invalid public key: {:?}", e))?;

        let signature_array: [u8; 64] = vrf_proof
            .try_into()
            .map_err(|_| "Signature must be 64 bytes")?;
        let signature = Signature::from_bytes(&signature_array)
            .map_err(|e| format!("Invalid signature: {:?}", e))?;

        use schnorrkel::context::SigningContext;
        let ctx = SigningContext::new(TARGET_SIGNING_CONTEXT);
        if public_key
            .verify(ctx.bytes(expected_input.as_bytes()), &signature)
            .is_err()
        {
            return Ok(false);
        }

        let mut hasher = Sha256::new();
        hasher.update(signature_array);
        Ok(hasher.finalize().as_slice() == vrf_output.as_slice())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }
}

/// Builds the canonical VRF input for a resolution.
pub fn target_input(session_id: &str, resolved_at_ms: i64, commitments: &str) -> String {
    format!(
        "duel:{}:resolved:{}:picks:{}",
        session_id, resolved_at_ms, commitments
    )
}

impl TargetSource for VrfTargetSource {
    fn draw(
        &self,
        session_id: &str,
        resolved_at_ms: i64,
        commitments: &str,
    ) -> Result<TargetDraw, EntropyError> {
        let input_message = target_input(session_id, resolved_at_ms, commitments);
        let (vrf_output, vrf_proof) = self.vrf_sign(input_message.as_bytes());
        let target = Self::compute_target(&vrf_output);

        Ok(TargetDraw {
            target,
            proof: TargetProof {
                vrf_output: hex::encode(vrf_output),
                vrf_proof: hex::encode(vrf_proof),
                public_key: self.public_key_hex(),
                input_message,
            },
        })
    }
}

/// Deterministic source returning a fixed target. No fairness proof is
/// produced; intended for tests and local simulation only.
pub struct FixedTargetSource {
    pub target: u8,
}

impl TargetSource for FixedTargetSource {
    fn draw(
        &self,
        session_id: &str,
        resolved_at_ms: i64,
        commitments: &str,
    ) -> Result<TargetDraw, EntropyError> {
        Ok(TargetDraw {
            target: self.target,
            proof: TargetProof {
                vrf_output: String::new(),
                vrf_proof: String::new(),
                public_key: String::new(),
                input_message: target_input(session_id, resolved_at_ms, commitments),
            },
        })
    }
}
