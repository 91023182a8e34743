use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque signed registration payload ready for transport.
///
/// Produced either by a signer or supplied pre-signed by the caller. The
/// connector never inspects the bytes; `signer` names who produced them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedArtifact {
    pub bytes: Vec<u8>,
    pub signer: String,
}

impl SignedArtifact {
    pub fn new(bytes: Vec<u8>, signer: impl Into<String>) -> Self {
        Self {
            bytes,
            signer: signer.into(),
        }
    }

    /// An artifact supplied by the caller rather than a configured signer.
    pub fn pre_signed(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "external")
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for SignedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignedArtifact({}, {} bytes)", self.signer, self.bytes.len())
    }
}
