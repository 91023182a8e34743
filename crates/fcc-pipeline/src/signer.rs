//! Document signing capability.
//!
//! The pipeline hands the canonical registration payload to a
//! [`DocumentSigner`] and forwards whatever artifact comes back. Two signers
//! ship with the connector: [`Ed25519Signer`] produces a real detached
//! signature, [`DeterministicSigner`] a reproducible digest envelope for
//! tests and dry runs.

use async_trait::async_trait;
use thiserror::Error;

use fcc_crypto::{ChainHasher, Signature, SigningKey, VerifyingKey};
use fcc_types::SignedArtifact;

/// Errors from a signer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    /// The signer could not be reached or is not configured.
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Produces a signed artifact from a registration payload.
#[async_trait]
pub trait DocumentSigner: Send + Sync {
    async fn sign(&self, payload: &[u8]) -> Result<SignedArtifact, SigningError>;
}

/// Signs payloads with an Ed25519 key.
///
/// The artifact is the payload followed by the 64-byte detached signature;
/// `signer` carries the hex verifying key.
#[derive(Debug)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub const SIGNATURE_LEN: usize = fcc_crypto::SIGNATURE_LEN;

    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// A signer with a freshly generated key.
    pub fn generate() -> Self {
        Self::new(SigningKey::generate())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Split an artifact produced by this signer into payload and signature.
    pub fn split(artifact: &SignedArtifact) -> Option<(&[u8], Signature)> {
        let cut = artifact.bytes.len().checked_sub(Self::SIGNATURE_LEN)?;
        let (payload, sig) = artifact.bytes.split_at(cut);
        Signature::from_bytes(sig).ok().map(|sig| (payload, sig))
    }
}

#[async_trait]
impl DocumentSigner for Ed25519Signer {
    async fn sign(&self, payload: &[u8]) -> Result<SignedArtifact, SigningError> {
        if payload.is_empty() {
            return Err(SigningError::Failed("empty payload".into()));
        }
        let signature = self.key.sign(payload);
        let mut bytes = Vec::with_capacity(payload.len() + Self::SIGNATURE_LEN);
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&signature.to_bytes());
        Ok(SignedArtifact::new(bytes, self.key.verifying_key().to_hex()))
    }
}

/// Reproducible stand-in signer.
///
/// Wraps the payload in an envelope headed by its SHA-256 digest:
/// `SHA256:<HEX>\n<payload>`. The same payload always yields the same bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicSigner;

impl DeterministicSigner {
    pub const NAME: &'static str = "deterministic";
    const PREFIX: &'static str = "SHA256:";

    /// Recover the payload from an envelope, checking its digest.
    pub fn open(artifact: &SignedArtifact) -> Option<&[u8]> {
        let bytes = artifact.bytes.strip_prefix(Self::PREFIX.as_bytes())?;
        let newline = bytes.iter().position(|b| *b == b'\n')?;
        let (digest, payload) = (&bytes[..newline], &bytes[newline + 1..]);
        let expected = hex::encode_upper(ChainHasher::digest(payload));
        (digest == expected.as_bytes()).then_some(payload)
    }
}

#[async_trait]
impl DocumentSigner for DeterministicSigner {
    async fn sign(&self, payload: &[u8]) -> Result<SignedArtifact, SigningError> {
        let digest = hex::encode_upper(ChainHasher::digest(payload));
        let mut bytes = Vec::with_capacity(Self::PREFIX.len() + digest.len() + 1 + payload.len());
        bytes.extend_from_slice(Self::PREFIX.as_bytes());
        bytes.extend_from_slice(digest.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(payload);
        Ok(SignedArtifact::new(bytes, Self::NAME))
    }
}
