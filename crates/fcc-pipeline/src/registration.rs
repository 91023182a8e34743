use rust_decimal::Decimal;
use serde::Serialize;

use fcc_types::{ChainHash, DocumentType, FiscalDocument, TaxLine};

use crate::signer::SigningError;

/// The registration record handed to the signer.
///
/// Built from a document whose chain link is already assigned. Field order is
/// fixed by the struct, so the encoded bytes are stable for a given document.
#[derive(Debug, Serialize)]
pub struct RegistrationPayload<'a> {
    pub taxpayer_id: &'a str,
    pub taxpayer_name: &'a str,
    pub series: &'a str,
    pub number: &'a str,
    pub issue_date: String,
    pub document_type: DocumentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    pub tax_lines: &'a [TaxLine],
    pub total: Decimal,
    pub prev_hash: &'a str,
    pub hash: &'a ChainHash,
}

impl<'a> RegistrationPayload<'a> {
    /// Returns `None` if the document has not been hashed yet or its total
    /// overflows.
    pub fn from_document(doc: &'a FiscalDocument) -> Option<Self> {
        let hash = doc.hash.as_ref()?;
        let total = doc.total()?.round_dp(2);
        Some(Self {
            taxpayer_id: &doc.taxpayer_id,
            taxpayer_name: &doc.taxpayer_name,
            series: &doc.series,
            number: &doc.number,
            issue_date: doc.issue_date.format("%Y-%m-%d").to_string(),
            document_type: doc.document_type,
            text: doc.text.as_deref(),
            tax_lines: &doc.tax_lines,
            total,
            prev_hash: doc.prev_hash.as_ref().map(ChainHash::as_str).unwrap_or(""),
            hash,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SigningError> {
        serde_json::to_vec(self).map_err(|e| SigningError::Failed(e.to_string()))
    }
}

/// Encode the registration payload of a hashed document.
pub fn registration_bytes(doc: &FiscalDocument) -> Result<Vec<u8>, SigningError> {
    RegistrationPayload::from_document(doc)
        .ok_or_else(|| SigningError::Failed("document has no chain hash or total".into()))?
        .to_bytes()
}
