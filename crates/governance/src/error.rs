//! Error types for governance operations

use std::fmt;
use thiserror::Error;

use consent_core::StorageError;

use crate::types::ProposalStatus;

/// Which half of an authorization check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The caller could not be identified
    Identity,
    /// The caller is known but lacks ownership or role
    Permission,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::Identity => write!(f, "identity"),
            AuthFailure::Permission => write!(f, "permission"),
        }
    }
}

/// Why a minority report had nothing to compile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NothingToReport {
    /// The proposal has not reached a decided state
    NotDecided(ProposalStatus),
    /// No oppose or block positions were recorded
    NoDissent,
}

impl fmt::Display for NothingToReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NothingToReport::NotDecided(status) => {
                write!(f, "minority reports can only be generated once decided (status is {})", status)
            }
            NothingToReport::NoDissent => write!(f, "no oppose or block positions were recorded"),
        }
    }
}

/// Error types for governance operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Malformed input; the caller can correct it
    #[error("Validation error: {0}")]
    Validation(String),

    /// Proposal not found
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    /// Evidence not found
    #[error("Evidence not found: {0}")]
    EvidenceNotFound(String),

    /// No minority report has been generated for the proposal
    #[error("Minority report not found for proposal {0}")]
    ReportNotFound(String),

    /// Ownership or role mismatch
    #[error("Unauthorized ({failure}): {message}")]
    Unauthorized {
        failure: AuthFailure,
        message: String,
    },

    /// Not a failure: there is nothing to put in a minority report
    #[error("No minority positions for proposal {proposal_id}: {reason}")]
    NoMinorityPositions {
        proposal_id: String,
        reason: NothingToReport,
    },

    /// A transition was requested from a state that does not permit it.
    /// This indicates a caller bug.
    #[error("Invalid state transition for proposal {proposal_id}: {from} -> {to}")]
    InvalidState {
        proposal_id: String,
        from: ProposalStatus,
        to: ProposalStatus,
    },

    /// An optimistic revision check failed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Error with storage
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;

impl GovernanceError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GovernanceError::Validation(msg.into())
    }

    /// The caller could not be identified
    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self {
        GovernanceError::Unauthorized {
            failure: AuthFailure::Identity,
            message: msg.into(),
        }
    }

    /// The caller lacks ownership or role
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        GovernanceError::Unauthorized {
            failure: AuthFailure::Permission,
            message: msg.into(),
        }
    }

    /// Any of the "referenced entity absent" variants
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GovernanceError::ProposalNotFound(_)
                | GovernanceError::EvidenceNotFound(_)
                | GovernanceError::ReportNotFound(_)
        )
    }

    /// True for outcomes callers should map to a no-op rather than a failure
    pub fn is_signal(&self) -> bool {
        matches!(self, GovernanceError::NoMinorityPositions { .. })
    }

    /// True for errors that indicate a defect in the calling code
    pub fn is_defect(&self) -> bool {
        matches!(self, GovernanceError::InvalidState { .. })
    }

    /// HTTP-equivalent status a host should surface for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GovernanceError::Validation(_) => 400,
            GovernanceError::ProposalNotFound(_)
            | GovernanceError::EvidenceNotFound(_)
            | GovernanceError::ReportNotFound(_) => 404,
            GovernanceError::Unauthorized { failure: AuthFailure::Identity, .. } => 401,
            GovernanceError::Unauthorized { failure: AuthFailure::Permission, .. } => 403,
            GovernanceError::NoMinorityPositions { .. } => 200,
            GovernanceError::Conflict(_) => 409,
            GovernanceError::InvalidState { .. }
            | GovernanceError::StorageError(_)
            | GovernanceError::SerializationError(_) => 500,
        }
    }
}

impl From<serde_json::Error> for GovernanceError {
    fn from(e: serde_json::Error) -> Self {
        GovernanceError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GovernanceError::validation("bad").status_code(), 400);
        assert_eq!(GovernanceError::ProposalNotFound("p".into()).status_code(), 404);
        assert_eq!(GovernanceError::unauthenticated("who?").status_code(), 401);
        assert_eq!(GovernanceError::forbidden("not yours").status_code(), 403);
        assert_eq!(GovernanceError::Conflict("stale".into()).status_code(), 409);
    }

    #[test]
    fn test_classification() {
        let signal = GovernanceError::NoMinorityPositions {
            proposal_id: "p".into(),
            reason: NothingToReport::NoDissent,
        };
        assert!(signal.is_signal());
        assert!(!signal.is_defect());

        let defect = GovernanceError::InvalidState {
            proposal_id: "p".into(),
            from: ProposalStatus::Draft,
            to: ProposalStatus::Decided,
        };
        assert!(defect.is_defect());
        assert!(defect.to_string().contains("draft -> decided"));

        assert!(GovernanceError::EvidenceNotFound("e".into()).is_not_found());
    }
}
