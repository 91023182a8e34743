use serde::{Deserialize, Serialize};

use fcc_crypto::ChainHasher;
use fcc_types::{FiscalDocument, SeriesKey};

/// Result of a series audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesAudit {
    pub key: SeriesKey,
    pub document_count: u64,
    pub links_valid: bool,
    pub hashes_valid: bool,
    pub violations: Vec<Violation>,
}

impl SeriesAudit {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific integrity defect found during an audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// 1-based position in the series.
    pub position: u64,
    pub number: String,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ForeignDocument,
    MissingHash,
    GenesisHasPrevHash,
    MissingPrevHash,
    BrokenLink,
    HashMismatch,
}

/// Series integrity auditor.
///
/// The auditor keeps going after the first defect and reports every one it
/// finds.
pub struct SeriesAuditor;

impl SeriesAuditor {
    /// Audit the committed documents of `key`, given in chain order.
    pub fn audit(key: &SeriesKey, documents: &[FiscalDocument]) -> SeriesAudit {
        let mut violations = Vec::new();
        let mut links_valid = true;
        let mut hashes_valid = true;

        for (index, doc) in documents.iter().enumerate() {
            let position = index as u64 + 1;
            let mut flag = |kind: ViolationKind, description: String| {
                violations.push(Violation {
                    position,
                    number: doc.number.clone(),
                    kind,
                    description,
                });
            };

            if doc.taxpayer_id != key.taxpayer_id() || doc.series != key.series() {
                flag(
                    ViolationKind::ForeignDocument,
                    format!("belongs to {}|{}", doc.taxpayer_id, doc.series),
                );
            }

            let Some(hash) = &doc.hash else {
                hashes_valid = false;
                flag(ViolationKind::MissingHash, "document has no hash".into());
                continue;
            };

            // Check prev_hash link
            if index == 0 {
                if doc.prev_hash.is_some() {
                    links_valid = false;
                    flag(
                        ViolationKind::GenesisHasPrevHash,
                        "first document must have an empty previous hash".into(),
                    );
                }
            } else {
                let expected = documents[index - 1].hash.as_ref();
                match &doc.prev_hash {
                    None => {
                        links_valid = false;
                        flag(
                            ViolationKind::MissingPrevHash,
                            "previous hash is empty".into(),
                        );
                    }
                    Some(prev) if Some(prev) != expected => {
                        links_valid = false;
                        flag(
                            ViolationKind::BrokenLink,
                            format!("previous hash {} does not match", prev.short_hex()),
                        );
                    }
                    Some(_) => {}
                }
            }

            // Recompute and verify hash
            match ChainHasher::compute(doc, doc.prev_hash.as_ref()) {
                Some(computed) if computed == *hash => {}
                Some(computed) => {
                    hashes_valid = false;
                    flag(
                        ViolationKind::HashMismatch,
                        format!(
                            "stored {} but fields hash to {}",
                            hash.short_hex(),
                            computed.short_hex()
                        ),
                    );
                }
                None => {
                    hashes_valid = false;
                    flag(
                        ViolationKind::HashMismatch,
                        format!("stored {} but total overflows", hash.short_hex()),
                    );
                }
            }
        }

        SeriesAudit {
            key: key.clone(),
            document_count: documents.len() as u64,
            links_valid,
            hashes_valid,
            violations,
        }
    }
}
