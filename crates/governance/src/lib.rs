//! Consent-based governance engine
//!
//! Members record positions on proposals; positions are tallied under a
//! configurable threshold policy with an absolute block veto; the tally
//! drives proposals through their lifecycle; and, once a proposal is
//! decided, the reasoning of dissenting members is preserved in a minority
//! report.
//!
//! [`GovernanceManager`] is the entry point for hosts. The individual
//! components are public for hosts that want to compose them differently.

pub mod config;
pub mod error;
pub mod evidence;
pub mod identity;
pub mod lifecycle;
pub mod manager;
pub mod positions;
pub mod report;
pub mod store;
pub mod tally;
pub mod types;

pub use config::{GovernanceConfig, LengthBounds, ThresholdRule};
pub use error::{AuthFailure, GovernanceError, GovernanceResult, NothingToReport};
pub use evidence::{
    DisputeCategory, EvidenceRegistry, ReviewDecision, ValidationRecord, ValidationStats, ValidationStatus,
};
pub use identity::{Caller, IdentityProvider, StaticIdentity};
pub use lifecycle::DecisionOutcome;
pub use manager::{Decision, GovernanceManager};
pub use positions::{PositionLedger, PositionStats};
pub use report::{compile_report, MinorityReportCompiler, ReportStatus};
pub use store::{GovernanceStore, KvGovernanceStore, PositionWrite};
pub use tally::{
    compute_tally, FnPolicy, MinimumSupport, SimpleMajority, Supermajority, Tally, ThresholdPolicy, Unanimous,
};
pub use types::{
    Evidence, EvidenceType, MemberId, MinorityReport, Position, Proposal, ProposalId, ProposalStatus, Stance,
    Vocabulary,
};
