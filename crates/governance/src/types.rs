//! Governance entities: proposals, positions, evidence and minority reports

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, GovernanceResult};

/// Opaque member identifier
pub type MemberId = String;

/// Opaque proposal identifier
pub type ProposalId = String;

/// Longest accepted identifier
const MAX_IDENTIFIER_LEN: usize = 128;

/// Check that an identifier is usable as a storage key segment.
///
/// Identifiers are non-empty, at most 128 characters, and made of ASCII
/// alphanumerics plus `-_.:@`.
pub fn validate_identifier(kind: &str, value: &str) -> GovernanceResult<()> {
    if value.is_empty() {
        return Err(GovernanceError::validation(format!("{} cannot be empty", kind)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(GovernanceError::validation(format!(
            "{} cannot exceed {} characters", kind, MAX_IDENTIFIER_LEN
        )));
    }
    if value == "." || value == ".." {
        return Err(GovernanceError::validation(format!("{} is not a valid identifier", kind)));
    }
    if let Some(bad) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || "-_.:@".contains(*c))) {
        return Err(GovernanceError::validation(format!(
            "{} contains invalid character {:?}", kind, bad
        )));
    }
    Ok(())
}

/// Label set used when displaying stances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vocabulary {
    /// support / oppose / abstain / block
    #[default]
    Position,
    /// consent / concern / abstain / block
    Consent,
}

/// A member's stance on a proposal.
///
/// This is the only stance type in the engine. The consent vocabulary
/// (`consent`, `concern`) is accepted on input and available for display,
/// mapping onto `Support` and `Oppose` at equal severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    #[serde(alias = "consent")]
    Support,
    #[serde(alias = "concern")]
    Oppose,
    Abstain,
    Block,
}

impl Stance {
    /// Every stance, in display order
    pub const ALL: [Stance; 4] = [Stance::Support, Stance::Oppose, Stance::Abstain, Stance::Block];

    /// Oppose and block form the dissenting set; abstain never does
    pub fn is_dissent(&self) -> bool {
        matches!(self, Stance::Oppose | Stance::Block)
    }

    /// Whether a position with this stance must carry reasoning
    pub fn requires_justification(&self) -> bool {
        self.is_dissent()
    }

    /// Display label in the given vocabulary
    pub fn label(&self, vocabulary: Vocabulary) -> &'static str {
        match (self, vocabulary) {
            (Stance::Support, Vocabulary::Position) => "support",
            (Stance::Support, Vocabulary::Consent) => "consent",
            (Stance::Oppose, Vocabulary::Position) => "oppose",
            (Stance::Oppose, Vocabulary::Consent) => "concern",
            (Stance::Abstain, _) => "abstain",
            (Stance::Block, _) => "block",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(Vocabulary::Position))
    }
}

impl FromStr for Stance {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "support" | "consent" => Ok(Stance::Support),
            "oppose" | "concern" => Ok(Stance::Oppose),
            "abstain" => Ok(Stance::Abstain),
            "block" => Ok(Stance::Block),
            other => Err(GovernanceError::validation(format!(
                "Invalid stance '{}': expected support, oppose, abstain or block", other
            ))),
        }
    }
}

/// Status of a proposal in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Being written
    #[default]
    Draft,
    /// Gathering evidence and options
    Research,
    /// Positions are being collected
    Voting,
    /// Approved by the tally
    Decided,
    /// Decision reviewed
    Reviewed,
    /// Being implemented
    Delivery,
    /// Closed, terminal
    Archived,
}

impl ProposalStatus {
    /// Every status, in lifecycle order
    pub const ALL: [ProposalStatus; 7] = [
        ProposalStatus::Draft,
        ProposalStatus::Research,
        ProposalStatus::Voting,
        ProposalStatus::Decided,
        ProposalStatus::Reviewed,
        ProposalStatus::Delivery,
        ProposalStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Research => "research",
            ProposalStatus::Voting => "voting",
            ProposalStatus::Decided => "decided",
            ProposalStatus::Reviewed => "reviewed",
            ProposalStatus::Delivery => "delivery",
            ProposalStatus::Archived => "archived",
        }
    }

    /// No transitions leave a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Archived)
    }

    /// Positions can be recorded until a decision is reached
    pub fn accepts_positions(&self) -> bool {
        matches!(self, ProposalStatus::Draft | ProposalStatus::Research | ProposalStatus::Voting)
    }

    /// Statuses from which a minority report may be generated
    pub fn permits_minority_report(&self) -> bool {
        matches!(self, ProposalStatus::Decided | ProposalStatus::Reviewed | ProposalStatus::Delivery)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProposalStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| GovernanceError::validation(format!("Invalid proposal status '{}'", s)))
    }
}

/// A governance proposal.
///
/// `revision` increases on every change to the proposal or its positions and
/// is the basis of optimistic concurrency control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    /// Group or member the proposal belongs to; selects the threshold policy
    pub scope_id: String,
    pub author_id: MemberId,
    pub title: String,
    pub summary: String,
    pub status: ProposalStatus,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Create a new proposal in `draft`
    pub fn new(scope_id: &str, author_id: &str, title: &str, summary: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("proposal-{}", uuid::Uuid::new_v4()),
            scope_id: scope_id.to_string(),
            author_id: author_id.to_string(),
            title: title.to_string(),
            summary: summary.to_string(),
            status: ProposalStatus::Draft,
            revision: 0,
            created_at: now,
            updated_at: now,
            decided_at: None,
        }
    }
}

/// A member's current stance and reasoning on one proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Stable across updates by the same member
    pub id: String,
    pub proposal_id: ProposalId,
    pub member_id: MemberId,
    pub stance: Stance,
    /// Stored verbatim
    pub reasoning: String,
    pub recorded_at: DateTime<Utc>,
}

/// Evidence categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    Research,
    Data,
    Expert,
    Precedent,
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceType::Research => "research",
            EvidenceType::Data => "data",
            EvidenceType::Expert => "expert",
            EvidenceType::Precedent => "precedent",
        };
        f.write_str(s)
    }
}

impl FromStr for EvidenceType {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Ok(EvidenceType::Research),
            "data" => Ok(EvidenceType::Data),
            "expert" => Ok(EvidenceType::Expert),
            "precedent" => Ok(EvidenceType::Precedent),
            other => Err(GovernanceError::validation(format!(
                "Invalid evidence type '{}': expected research, data, expert or precedent", other
            ))),
        }
    }
}

/// An evidentiary item attached to a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub proposal_id: ProposalId,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
    /// Only this member may delete the item
    pub attached_by: MemberId,
    pub attached_at: DateTime<Utc>,
}

/// Compiled record of dissent on a decided proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorityReport {
    pub proposal_id: ProposalId,
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub last_edited_by: Option<MemberId>,
    pub last_edited_at: Option<DateTime<Utc>>,
}
