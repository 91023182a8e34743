use std::fmt;

use serde::{Deserialize, Serialize};

/// Processing state of a submitted document.
///
/// The pipeline walks `Queued → Locking → Hashing → Signing → Transporting →
/// Committing` and ends in one of the terminal states. `Error` is reachable
/// from every non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Queued,
    Locking,
    Hashing,
    Signing,
    Transporting,
    Committing,
    /// Registered by the authority and committed to the chain.
    Accepted,
    /// Refused by the authority; the chain is unchanged.
    Rejected,
    /// Annulled at the authority after acceptance.
    Cancelled,
    /// The attempt failed; see the record's error for the cause.
    Error,
}

impl DocumentStatus {
    /// Returns `true` once no further pipeline transition will happen.
    ///
    /// `Accepted` is terminal for submission even though a later
    /// cancellation may still move it to `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Rejected | Self::Cancelled | Self::Error
        )
    }

    /// Returns `true` for states whose chain link is committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Accepted | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Locking => "LOCKING",
            Self::Hashing => "HASHING",
            Self::Signing => "SIGNING",
            Self::Transporting => "TRANSPORTING",
            Self::Committing => "COMMITTING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
