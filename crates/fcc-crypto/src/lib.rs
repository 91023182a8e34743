//! Cryptographic primitives for the fiscal chain connector.
//!
//! Provides the canonical SHA-256 document hash that links a series chain
//! and the Ed25519 keys used to sign registration payloads.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;
pub mod signer;

pub use hasher::ChainHasher;
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey, SIGNATURE_LEN};
