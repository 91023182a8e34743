use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The `(taxpayer, series)` pair that keys a hash chain and its series lock.
///
/// Each taxpayer numbers its documents in independent series; every series
/// carries its own chain, so two series of the same taxpayer never contend.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    taxpayer_id: String,
    series: String,
}

impl SeriesKey {
    /// Build a key from a taxpayer id and series name.
    ///
    /// Both parts must be non-blank and may not contain the `|` separator
    /// used in canonical payloads and log output.
    pub fn new(
        taxpayer_id: impl Into<String>,
        series: impl Into<String>,
    ) -> Result<Self, TypeError> {
        let taxpayer_id = taxpayer_id.into();
        let series = series.into();
        for (label, value) in [("taxpayer id", &taxpayer_id), ("series", &series)] {
            if value.trim().is_empty() {
                return Err(TypeError::InvalidIdentifier(format!("{label} is empty")));
            }
            if value.contains('|') {
                return Err(TypeError::InvalidIdentifier(format!(
                    "{label} contains '|': {value}"
                )));
            }
        }
        Ok(Self { taxpayer_id, series })
    }

    pub fn taxpayer_id(&self) -> &str {
        &self.taxpayer_id
    }

    pub fn series(&self) -> &str {
        &self.series
    }
}

impl fmt::Debug for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesKey({}|{})", self.taxpayer_id, self.series)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.taxpayer_id, self.series)
    }
}

/// Identifier of a stored document record (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(uuid::Uuid);

impl DocumentId {
    /// Generate a new time-ordered document ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from the hyphenated UUID form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidIdentifier(e.to_string()))
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single series lock grant.
///
/// Fresh for every successful acquisition, so a holder whose lease expired can
/// tell its grant apart from the one that replaced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(uuid::Uuid);

impl LockId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockId({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_key_display() {
        let key = SeriesKey::new("B00000000", "A").unwrap();
        assert_eq!(key.to_string(), "B00000000|A");
        assert_eq!(key.taxpayer_id(), "B00000000");
        assert_eq!(key.series(), "A");
    }

    #[test]
    fn series_key_rejects_blank_parts() {
        assert!(SeriesKey::new("", "A").is_err());
        assert!(SeriesKey::new("B00000000", "  ").is_err());
    }

    #[test]
    fn series_key_rejects_separator() {
        let err = SeriesKey::new("B0|0", "A").unwrap_err();
        assert!(matches!(err, TypeError::InvalidIdentifier(_)));
    }

    #[test]
    fn document_ids_are_distinct() {
        assert_ne!(DocumentId::new(), DocumentId::new());
    }

    #[test]
    fn document_id_parse_roundtrip() {
        let id = DocumentId::new();
        assert_eq!(DocumentId::parse(&id.to_string()).unwrap(), id);
        assert!(DocumentId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn lock_ids_are_unique() {
        assert_ne!(LockId::new(), LockId::new());
    }
}
