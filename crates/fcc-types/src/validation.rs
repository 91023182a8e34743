//! Structural and arithmetic validation of fiscal documents.
//!
//! Validation runs before any lock is taken, so a failure here never leaves a
//! side effect behind.

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::document::{FiscalDocument, TaxLine};
use crate::identity::SeriesKey;

/// Largest accepted difference between a declared and a computed amount.
pub const TAX_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Issue years that fit the fixed-width `YYYYMMDD` hash field.
pub const ISSUE_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Reasons a document is refused before processing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid series key: {0}")]
    InvalidKey(String),

    #[error("at least one tax line is required")]
    NoTaxLines,

    #[error("tax amount mismatch on line {line} for rate {rate}%: expected {expected}, got {actual}")]
    TaxAmountMismatch {
        line: usize,
        rate: Decimal,
        expected: Decimal,
        actual: Decimal,
    },

    #[error("surcharge amount mismatch on line {line}: expected {expected}, got {actual}")]
    SurchargeMismatch {
        line: usize,
        expected: Decimal,
        actual: Decimal,
    },

    #[error("surcharge amount on line {line} has no surcharge rate")]
    SurchargeWithoutRate { line: usize },

    #[error("amount overflow in {0}")]
    AmountOverflow(String),

    #[error("issue date {0} is outside years 0001-9999")]
    IssueDateOutOfRange(NaiveDate),
}

/// Check that a document is complete and that its tax arithmetic holds.
pub fn validate_document(doc: &FiscalDocument) -> Result<(), ValidationError> {
    if doc.taxpayer_id.trim().is_empty() {
        return Err(ValidationError::MissingField("taxpayer_id"));
    }
    if doc.series.trim().is_empty() {
        return Err(ValidationError::MissingField("series"));
    }
    if doc.number.trim().is_empty() {
        return Err(ValidationError::MissingField("number"));
    }
    // The canonical payload is '|'-joined, so the key parts must not contain it.
    SeriesKey::new(doc.taxpayer_id.clone(), doc.series.clone())
        .map_err(|e| ValidationError::InvalidKey(e.to_string()))?;
    if doc.number.contains('|') {
        return Err(ValidationError::InvalidKey(format!(
            "number contains '|': {}",
            doc.number
        )));
    }

    if !ISSUE_YEARS.contains(&doc.issue_date.year()) {
        return Err(ValidationError::IssueDateOutOfRange(doc.issue_date));
    }

    if doc.tax_lines.is_empty() {
        return Err(ValidationError::NoTaxLines);
    }

    for (i, line) in doc.tax_lines.iter().enumerate() {
        validate_line(i, line)?;
    }
    if doc.total().is_none() {
        return Err(ValidationError::AmountOverflow("document total".into()));
    }
    Ok(())
}

fn validate_line(index: usize, line: &TaxLine) -> Result<(), ValidationError> {
    let overflow = || ValidationError::AmountOverflow(format!("line {index}"));

    let expected = percentage(line.tax_base, line.tax_rate).ok_or_else(overflow)?;
    if !within_tolerance(line.tax_amount, expected).ok_or_else(overflow)? {
        return Err(ValidationError::TaxAmountMismatch {
            line: index,
            rate: line.tax_rate,
            expected,
            actual: line.tax_amount,
        });
    }

    match (line.surcharge_rate, line.surcharge_amount) {
        (Some(rate), Some(actual)) => {
            let expected = percentage(line.tax_base, rate).ok_or_else(overflow)?;
            if !within_tolerance(actual, expected).ok_or_else(overflow)? {
                return Err(ValidationError::SurchargeMismatch {
                    line: index,
                    expected,
                    actual,
                });
            }
        }
        (None, Some(_)) => return Err(ValidationError::SurchargeWithoutRate { line: index }),
        _ => {}
    }
    Ok(())
}

/// `round(base * rate / 100, 2)` with banker's rounding, `None` on overflow.
fn percentage(base: Decimal, rate: Decimal) -> Option<Decimal> {
    Some(
        base.checked_mul(rate)?
            .checked_div(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
    )
}

fn within_tolerance(actual: Decimal, expected: Decimal) -> Option<bool> {
    Some(actual.checked_sub(expected)?.abs() <= TAX_TOLERANCE)
}
