use fcc_types::{ChainHash, ChainLink, FiscalDocument};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

/// Canonical document hasher for series chains.
///
/// The payload is the fixed field sequence
///
/// ```text
/// taxpayer_id|series|number|YYYYMMDD|total|prev_hash
/// ```
///
/// where `total` has exactly two fraction digits and `prev_hash` is empty for
/// the first document of a series. The UTF-8 payload is hashed with SHA-256
/// and rendered as uppercase hex, so any implementation fed the same fields
/// reproduces the same hash byte for byte.
///
/// Every operation returns `None` when the document total overflows, since
/// such a document has no canonical payload.
pub struct ChainHasher;

impl ChainHasher {
    /// Field separator of the canonical payload.
    pub const SEPARATOR: char = '|';

    /// Build the canonical payload for a document linked after `prev_hash`.
    pub fn canonical_payload(
        doc: &FiscalDocument,
        prev_hash: Option<&ChainHash>,
    ) -> Option<String> {
        let sep = Self::SEPARATOR;
        let total = format_total(doc.total()?);
        Some(format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            doc.taxpayer_id,
            doc.series,
            doc.number,
            doc.issue_date.format("%Y%m%d"),
            total,
            prev_hash.map(ChainHash::as_str).unwrap_or(""),
        ))
    }

    /// Hash a document as if linked after `prev_hash`.
    pub fn compute(doc: &FiscalDocument, prev_hash: Option<&ChainHash>) -> Option<ChainHash> {
        let payload = Self::canonical_payload(doc, prev_hash)?;
        Some(ChainHash::from_digest(Self::digest(payload.as_bytes())))
    }

    /// Compute the full chain link for a document linked after `prev_hash`.
    pub fn link(doc: &FiscalDocument, prev_hash: Option<ChainHash>) -> Option<ChainLink> {
        let hash = Self::compute(doc, prev_hash.as_ref())?;
        Some(ChainLink { prev_hash, hash })
    }

    /// Returns `true` if the document carries a hash that matches its fields
    /// and recorded previous hash.
    pub fn verify(doc: &FiscalDocument) -> bool {
        match &doc.hash {
            Some(hash) => Self::compute(doc, doc.prev_hash.as_ref()).as_ref() == Some(hash),
            None => false,
        }
    }

    /// Raw SHA-256 digest.
    pub fn digest(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }
}

/// Two fraction digits, `.` separator, no grouping; midpoints round away
/// from zero.
fn format_total(total: Decimal) -> String {
    let mut rounded = total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}
