use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ChainHash;
use crate::identity::SeriesKey;

/// Tax regime a line is levied under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxKind {
    /// Value added tax (mainland).
    #[default]
    Iva,
    /// Canary Islands general indirect tax.
    Igic,
    /// Ceuta and Melilla production, services and import tax.
    Ipsi,
}

/// Fiscal document type code as registered with the authority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Complete invoice.
    #[default]
    F1,
    /// Simplified invoice (ticket).
    F2,
    /// Invoice replacing simplified invoices.
    F3,
    /// Corrective invoice.
    R1,
    R2,
    R3,
    R4,
    /// Corrective simplified invoice.
    R5,
}

/// One taxed line of a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLine {
    /// Taxable base.
    pub tax_base: Decimal,
    /// Rate as a percentage (21.00 means 21 %).
    pub tax_rate: Decimal,
    /// Tax amount; must match `round(tax_base * tax_rate / 100, 2)`.
    pub tax_amount: Decimal,
    /// Equivalence surcharge rate, if the line carries one.
    #[serde(default)]
    pub surcharge_rate: Option<Decimal>,
    #[serde(default)]
    pub surcharge_amount: Option<Decimal>,
    #[serde(default)]
    pub tax_kind: TaxKind,
}

impl TaxLine {
    /// A line without surcharge.
    pub fn new(tax_base: Decimal, tax_rate: Decimal, tax_amount: Decimal) -> Self {
        Self {
            tax_base,
            tax_rate,
            tax_amount,
            surcharge_rate: None,
            surcharge_amount: None,
            tax_kind: TaxKind::Iva,
        }
    }

    /// Attach an equivalence surcharge.
    pub fn with_surcharge(mut self, rate: Decimal, amount: Decimal) -> Self {
        self.surcharge_rate = Some(rate);
        self.surcharge_amount = Some(amount);
        self
    }
}

/// The position a document occupies in its series chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Head of the chain when the document was hashed; `None` for the first
    /// document of a series.
    #[serde(with = "prev_hash_serde")]
    pub prev_hash: Option<ChainHash>,
    /// The document's own hash.
    pub hash: ChainHash,
}

impl ChainLink {
    /// The previous hash as it appears in canonical payloads: empty for genesis.
    pub fn prev_hash_str(&self) -> &str {
        self.prev_hash.as_ref().map(ChainHash::as_str).unwrap_or("")
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }
}

/// A fiscal document submitted to the authority.
///
/// The chain fields start out empty and are filled in by the processing
/// pipeline once the series head has been observed under the series lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub taxpayer_id: String,
    #[serde(default)]
    pub taxpayer_name: String,
    pub series: String,
    pub number: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub document_type: DocumentType,
    #[serde(default)]
    pub text: Option<String>,
    pub tax_lines: Vec<TaxLine>,
    /// Serialized as the empty string for the first document of a series.
    #[serde(default, with = "prev_hash_serde")]
    pub prev_hash: Option<ChainHash>,
    #[serde(default)]
    pub hash: Option<ChainHash>,
}

impl FiscalDocument {
    /// A document with no chain link assigned yet.
    pub fn new(
        taxpayer_id: impl Into<String>,
        series: impl Into<String>,
        number: impl Into<String>,
        issue_date: NaiveDate,
        tax_lines: Vec<TaxLine>,
    ) -> Self {
        Self {
            taxpayer_id: taxpayer_id.into(),
            taxpayer_name: String::new(),
            series: series.into(),
            number: number.into(),
            issue_date,
            document_type: DocumentType::F1,
            text: None,
            tax_lines,
            prev_hash: None,
            hash: None,
        }
    }

    /// The series this document belongs to.
    pub fn series_key(&self) -> Result<SeriesKey, TypeError> {
        SeriesKey::new(self.taxpayer_id.clone(), self.series.clone())
    }

    /// Sum of taxable bases, or `None` if the sum overflows.
    pub fn total_tax_base(&self) -> Option<Decimal> {
        checked_sum(self.tax_lines.iter().map(|l| l.tax_base))
    }

    pub fn total_tax_amount(&self) -> Option<Decimal> {
        checked_sum(self.tax_lines.iter().map(|l| l.tax_amount))
    }

    pub fn total_surcharge(&self) -> Option<Decimal> {
        checked_sum(self.tax_lines.iter().filter_map(|l| l.surcharge_amount))
    }

    /// Grand total: bases plus tax plus surcharge. `None` on overflow.
    pub fn total(&self) -> Option<Decimal> {
        self.total_tax_base()?
            .checked_add(self.total_tax_amount()?)?
            .checked_add(self.total_surcharge()?)
    }

    /// The assigned chain link, if the document has been hashed.
    pub fn chain_link(&self) -> Option<ChainLink> {
        self.hash.clone().map(|hash| ChainLink {
            prev_hash: self.prev_hash.clone(),
            hash,
        })
    }

    /// Record the chain position computed for this document.
    pub fn assign_link(&mut self, link: ChainLink) {
        self.prev_hash = link.prev_hash;
        self.hash = Some(link.hash);
    }

    /// Drop any chain link, e.g. after a failed attempt.
    pub fn clear_link(&mut self) {
        self.prev_hash = None;
        self.hash = None;
    }
}

fn checked_sum(amounts: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    amounts.fold(Some(Decimal::ZERO), |acc, amount| acc?.checked_add(amount))
}

/// `Option<ChainHash>` as a string where the empty string means `None`.
mod prev_hash_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::hash::ChainHash;

    pub fn serialize<S>(value: &Option<ChainHash>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_ref().map(ChainHash::as_str).unwrap_or(""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ChainHash>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => ChainHash::from_hex(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn totals_include_surcharge() {
        let doc = FiscalDocument::new(
            "B00000000",
            "A",
            "1",
            date(),
            vec![
                TaxLine::new(dec!(100.00), dec!(21.00), dec!(21.00)),
                TaxLine::new(dec!(50.00), dec!(10.00), dec!(5.00))
                    .with_surcharge(dec!(1.4), dec!(0.70)),
            ],
        );
        assert_eq!(doc.total_tax_base(), Some(dec!(150.00)));
        assert_eq!(doc.total_tax_amount(), Some(dec!(26.00)));
        assert_eq!(doc.total_surcharge(), Some(dec!(0.70)));
        assert_eq!(doc.total(), Some(dec!(176.70)));
    }

    #[test]
    fn overflowing_total_is_none() {
        let doc = FiscalDocument::new(
            "B00000000",
            "A",
            "1",
            date(),
            vec![
                TaxLine::new(Decimal::MAX, dec!(0), dec!(0)),
                TaxLine::new(Decimal::MAX, dec!(0), dec!(0)),
            ],
        );
        assert_eq!(doc.total_tax_base(), None);
        assert_eq!(doc.total(), None);

        let doc = FiscalDocument::new(
            "B00000000",
            "A",
            "1",
            date(),
            vec![TaxLine::new(Decimal::MAX, dec!(0), dec!(1))],
        );
        assert_eq!(doc.total_tax_base(), Some(Decimal::MAX));
        assert_eq!(doc.total(), None);
    }

    #[test]
    fn genesis_prev_hash_serializes_as_empty_string() {
        let mut doc = FiscalDocument::new(
            "B00000000",
            "A",
            "1",
            date(),
            vec![TaxLine::new(dec!(100.00), dec!(21.00), dec!(21.00))],
        );
        doc.assign_link(ChainLink {
            prev_hash: None,
            hash: ChainHash::from_digest([1; 32]),
        });
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["prev_hash"], "");
        assert_eq!(json["hash"], "01".repeat(32));

        let back: FiscalDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back.prev_hash, None);
        assert!(back.chain_link().unwrap().is_genesis());
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let json = r#"{
            "taxpayer_id": "B00000000",
            "series": "A",
            "number": "7",
            "issue_date": "2024-01-15",
            "tax_lines": [{"tax_base": "100.00", "tax_rate": "21", "tax_amount": "21.00"}]
        }"#;
        let doc: FiscalDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.document_type, DocumentType::F1);
        assert_eq!(doc.tax_lines[0].tax_kind, TaxKind::Iva);
        assert!(doc.prev_hash.is_none());
        assert!(doc.hash.is_none());
        assert_eq!(doc.total(), Some(dec!(121.00)));
    }

    #[test]
    fn chain_link_prev_hash_str() {
        let prev = ChainHash::from_digest([2; 32]);
        let link = ChainLink {
            prev_hash: Some(prev.clone()),
            hash: ChainHash::from_digest([3; 32]),
        };
        assert_eq!(link.prev_hash_str(), prev.as_str());
        assert!(!link.is_genesis());
    }

    #[test]
    fn clear_link_resets_chain_fields() {
        let mut doc = FiscalDocument::new("B00000000", "A", "1", date(), Vec::new());
        doc.assign_link(ChainLink {
            prev_hash: Some(ChainHash::from_digest([2; 32])),
            hash: ChainHash::from_digest([3; 32]),
        });
        doc.clear_link();
        assert!(doc.chain_link().is_none());
        assert!(doc.prev_hash.is_none());
    }
}
