//! Decision state machine
//!
//! Proposals move one way through
//! `draft -> research -> voting -> decided -> reviewed -> delivery`, and any
//! non-archived proposal may be archived. The only way into `decided` is
//! [`attempt_decide`], which consults a tally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{GovernanceError, GovernanceResult};
use crate::tally::Tally;
use crate::types::{Proposal, ProposalStatus};

/// Result of asking the tally for a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    /// Threshold met with no blocks; the proposal is now `decided`
    Approved,
    /// At least one block; the proposal stays in `voting`
    Blocked,
    /// Threshold not met; the proposal stays in `voting`
    Pending,
}

/// Statuses reachable from `from` by an explicit transition.
///
/// `decided` never appears here; it is entered only through the tally.
pub fn allowed_transitions(from: ProposalStatus) -> &'static [ProposalStatus] {
    use ProposalStatus::*;

    match from {
        Draft => &[Research, Archived],
        Research => &[Voting, Archived],
        Voting => &[Archived],
        Decided => &[Reviewed, Archived],
        Reviewed => &[Delivery, Archived],
        Delivery => &[Archived],
        Archived => &[],
    }
}

/// Whether an explicit transition from `from` to `to` is permitted
pub fn can_transition(from: ProposalStatus, to: ProposalStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

fn invalid_state(proposal: &Proposal, to: ProposalStatus) -> GovernanceError {
    error!(
        proposal_id = %proposal.id,
        from = %proposal.status,
        to = %to,
        "Invalid proposal state transition requested"
    );
    GovernanceError::InvalidState {
        proposal_id: proposal.id.clone(),
        from: proposal.status,
        to,
    }
}

/// Apply an explicit, non-tally transition to `proposal`.
///
/// Any transition outside the table, including any request for `decided`,
/// is an `InvalidState` error and leaves the proposal untouched.
pub fn transition(proposal: &mut Proposal, to: ProposalStatus, now: DateTime<Utc>) -> GovernanceResult<()> {
    if !can_transition(proposal.status, to) {
        return Err(invalid_state(proposal, to));
    }

    debug!(proposal_id = %proposal.id, from = %proposal.status, to = %to, "Proposal transition");
    proposal.status = to;
    proposal.updated_at = now;
    Ok(())
}

/// Consult `tally` and move a voting proposal to `decided` if it approves.
///
/// Only valid while the proposal is in `voting`. The caller is responsible
/// for making sure `tally` reflects the proposal's current positions.
pub fn attempt_decide(
    proposal: &mut Proposal,
    tally: &Tally,
    now: DateTime<Utc>,
) -> GovernanceResult<DecisionOutcome> {
    if proposal.status != ProposalStatus::Voting {
        return Err(invalid_state(proposal, ProposalStatus::Decided));
    }

    if tally.has_blocks {
        return Ok(DecisionOutcome::Blocked);
    }
    if !tally.threshold_met {
        return Ok(DecisionOutcome::Pending);
    }

    proposal.status = ProposalStatus::Decided;
    proposal.decided_at = Some(now);
    proposal.updated_at = now;
    Ok(DecisionOutcome::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::{compute_tally, SimpleMajority};
    use crate::types::{Position, Stance};

    fn voting_proposal() -> Proposal {
        let mut proposal = Proposal::new("coop", "alice", "Bike shed", "Build a bike shed by the gate");
        proposal.status = ProposalStatus::Voting;
        proposal
    }

    fn tally_of(stances: &[Stance]) -> Tally {
        let positions: Vec<Position> = stances
            .iter()
            .enumerate()
            .map(|(i, stance)| Position {
                id: format!("pos-{}", i),
                proposal_id: "p".into(),
                member_id: format!("m{}", i),
                stance: *stance,
                reasoning: "reasoning text".into(),
                recorded_at: Utc::now(),
            })
            .collect();
        compute_tally(&positions, &SimpleMajority)
    }

    #[test]
    fn test_forward_path() {
        let mut proposal = Proposal::new("coop", "alice", "Bike shed", "Build a bike shed by the gate");
        let now = Utc::now();

        transition(&mut proposal, ProposalStatus::Research, now).unwrap();
        transition(&mut proposal, ProposalStatus::Voting, now).unwrap();

        let outcome = attempt_decide(&mut proposal, &tally_of(&[Stance::Support]), now).unwrap();
        assert_eq!(outcome, DecisionOutcome::Approved);
        assert_eq!(proposal.decided_at, Some(now));

        transition(&mut proposal, ProposalStatus::Reviewed, now).unwrap();
        transition(&mut proposal, ProposalStatus::Delivery, now).unwrap();
        transition(&mut proposal, ProposalStatus::Archived, now).unwrap();
        assert!(proposal.status.is_terminal());
    }

    #[test]
    fn test_decided_only_through_tally() {
        let mut proposal = voting_proposal();
        let err = transition(&mut proposal, ProposalStatus::Decided, Utc::now()).unwrap_err();
        assert!(err.is_defect());
        assert_eq!(proposal.status, ProposalStatus::Voting);
    }

    #[test]
    fn test_no_backwards_or_skipping() {
        let mut proposal = voting_proposal();
        assert!(transition(&mut proposal, ProposalStatus::Research, Utc::now()).is_err());
        assert!(transition(&mut proposal, ProposalStatus::Delivery, Utc::now()).is_err());

        proposal.status = ProposalStatus::Archived;
        for to in ProposalStatus::ALL {
            assert!(!can_transition(ProposalStatus::Archived, to));
        }
    }

    #[test]
    fn test_archive_from_any_live_state() {
        for from in ProposalStatus::ALL {
            let expected = from != ProposalStatus::Archived;
            assert_eq!(can_transition(from, ProposalStatus::Archived), expected, "from {}", from);
        }
    }

    #[test]
    fn test_block_keeps_voting() {
        let mut proposal = voting_proposal();
        let tally = tally_of(&[Stance::Support, Stance::Support, Stance::Block]);

        let outcome = attempt_decide(&mut proposal, &tally, Utc::now()).unwrap();
        assert_eq!(outcome, DecisionOutcome::Blocked);
        assert_eq!(proposal.status, ProposalStatus::Voting);
        assert!(proposal.decided_at.is_none());
    }

    #[test]
    fn test_pending_keeps_voting() {
        let mut proposal = voting_proposal();
        let tally = tally_of(&[Stance::Support, Stance::Oppose]);

        assert_eq!(attempt_decide(&mut proposal, &tally, Utc::now()).unwrap(), DecisionOutcome::Pending);
        assert_eq!(proposal.status, ProposalStatus::Voting);
    }

    #[test]
    fn test_decide_outside_voting_is_defect() {
        let mut proposal = Proposal::new("coop", "alice", "Bike shed", "Build a bike shed by the gate");
        let err = attempt_decide(&mut proposal, &tally_of(&[Stance::Support]), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::InvalidState { from: ProposalStatus::Draft, to: ProposalStatus::Decided, .. }
        ));
    }
}
