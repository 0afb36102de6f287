//! Position ledger
//!
//! Holds at most one current position per member per proposal. Writes are
//! validated here and applied atomically by the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use consent_core::utils::trimmed_len;

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, GovernanceResult};
use crate::store::{GovernanceStore, PositionWrite};
use crate::types::{validate_identifier, Position, Stance};

/// Per-stance summary of the positions on a proposal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionStats {
    pub proposal_id: String,
    pub by_stance: BTreeMap<Stance, usize>,
    /// Every recorded position, abstentions included
    pub total: usize,
}

pub struct PositionLedger {
    store: Arc<dyn GovernanceStore>,
    config: Arc<GovernanceConfig>,
}

impl PositionLedger {
    pub fn new(store: Arc<dyn GovernanceStore>, config: Arc<GovernanceConfig>) -> Self {
        Self { store, config }
    }

    /// Check reasoning against the stance's justification rule
    pub fn validate_reasoning(&self, stance: Stance, reasoning: &str) -> GovernanceResult<()> {
        let len = trimmed_len(reasoning);
        if len > self.config.max_reasoning_length {
            return Err(GovernanceError::validation(format!(
                "Reasoning cannot exceed {} characters", self.config.max_reasoning_length
            )));
        }
        if stance.requires_justification() && len < self.config.min_reasoning_length {
            return Err(GovernanceError::validation(format!(
                "A {} position needs reasoning of at least {} characters",
                stance, self.config.min_reasoning_length
            )));
        }
        Ok(())
    }

    /// Record or replace a member's position.
    ///
    /// Identical stance and reasoning leaves the ledger untouched and returns
    /// the stored position.
    pub async fn upsert_position(
        &self,
        proposal_id: &str,
        member_id: &str,
        stance: Stance,
        reasoning: &str,
    ) -> GovernanceResult<PositionWrite> {
        validate_identifier("proposal id", proposal_id)?;
        validate_identifier("member id", member_id)?;
        self.validate_reasoning(stance, reasoning)?;

        let candidate = Position {
            id: format!("position-{}", uuid::Uuid::new_v4()),
            proposal_id: proposal_id.to_string(),
            member_id: member_id.to_string(),
            stance,
            reasoning: reasoning.to_string(),
            recorded_at: Utc::now(),
        };

        let write = self.store.record_position(candidate).await?;
        match &write {
            PositionWrite::Stored(position) => info!(
                proposal_id = %proposal_id,
                member_id = %member_id,
                stance = %position.stance,
                "Position recorded"
            ),
            PositionWrite::Unchanged(_) => debug!(
                proposal_id = %proposal_id,
                member_id = %member_id,
                "Position unchanged"
            ),
        }
        Ok(write)
    }

    /// All current positions, ordered by member
    pub async fn get_positions(&self, proposal_id: &str) -> GovernanceResult<Vec<Position>> {
        self.store.get_proposal(proposal_id).await?;
        let mut positions = self.store.get_positions(proposal_id).await?;
        positions.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        Ok(positions)
    }

    pub async fn get_position(&self, proposal_id: &str, member_id: &str) -> GovernanceResult<Option<Position>> {
        self.store.get_proposal(proposal_id).await?;
        self.store.get_position(proposal_id, member_id).await
    }

    /// Remove `member_id`'s position. Only that member may withdraw it.
    pub async fn withdraw_position(
        &self,
        proposal_id: &str,
        member_id: &str,
        requester_id: &str,
    ) -> GovernanceResult<bool> {
        if member_id != requester_id {
            warn!(
                proposal_id = %proposal_id,
                member_id = %member_id,
                requester = %requester_id,
                "Position withdrawal refused: not the owner"
            );
            return Err(GovernanceError::forbidden(format!(
                "Only {} may withdraw their position", member_id
            )));
        }

        let removed = self.store.remove_position(proposal_id, member_id).await?;
        if removed {
            info!(proposal_id = %proposal_id, member_id = %member_id, "Position withdrawn");
        }
        Ok(removed)
    }

    pub async fn position_stats(&self, proposal_id: &str) -> GovernanceResult<PositionStats> {
        let positions = self.get_positions(proposal_id).await?;
        let mut by_stance: BTreeMap<Stance, usize> = Stance::ALL.iter().map(|s| (*s, 0)).collect();
        for position in &positions {
            *by_stance.entry(position.stance).or_default() += 1;
        }
        Ok(PositionStats {
            proposal_id: proposal_id.to_string(),
            by_stance,
            total: positions.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthFailure;
    use crate::store::KvGovernanceStore;
    use crate::types::Proposal;
    use consent_core::MemoryStorage;

    async fn ledger() -> (PositionLedger, Proposal) {
        let store = Arc::new(KvGovernanceStore::new(Arc::new(MemoryStorage::new())));
        let proposal = Proposal::new("coop", "alice", "Tool library", "Lend tools between members");
        store.insert_proposal(&proposal).await.unwrap();
        (PositionLedger::new(store, Arc::new(GovernanceConfig::default())), proposal)
    }

    #[tokio::test]
    async fn test_upsert_replaces_prior_position() {
        let (ledger, proposal) = ledger().await;

        ledger.upsert_position(&proposal.id, "bob", Stance::Support, "").await.unwrap();
        let updated = ledger
            .upsert_position(&proposal.id, "bob", Stance::Oppose, "Insurance costs are unclear")
            .await
            .unwrap()
            .into_position();

        let positions = ledger.get_positions(&proposal.id).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].stance, Stance::Oppose);
        assert_eq!(positions[0].id, updated.id);
    }

    #[tokio::test]
    async fn test_justification_rules() {
        let (ledger, proposal) = ledger().await;

        for stance in [Stance::Oppose, Stance::Block] {
            let err = ledger.upsert_position(&proposal.id, "bob", stance, "   no   ").await.unwrap_err();
            assert!(matches!(err, GovernanceError::Validation(_)));
        }

        ledger.upsert_position(&proposal.id, "bob", Stance::Abstain, "").await.unwrap();
        ledger.upsert_position(&proposal.id, "carol", Stance::Support, "ok").await.unwrap();

        let too_long = "x".repeat(2001);
        assert!(ledger
            .upsert_position(&proposal.id, "dan", Stance::Support, &too_long)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reasoning_stored_verbatim() {
        let (ledger, proposal) = ledger().await;
        let reasoning = "  Budget too high;\n  see line 4.  ";
        let position = ledger
            .upsert_position(&proposal.id, "bob", Stance::Oppose, reasoning)
            .await
            .unwrap()
            .into_position();
        assert_eq!(position.reasoning, reasoning);
    }

    #[tokio::test]
    async fn test_unknown_proposal() {
        let (ledger, _) = ledger().await;
        let err = ledger.upsert_position("nope", "bob", Stance::Support, "").await.unwrap_err();
        assert!(matches!(err, GovernanceError::ProposalNotFound(_)));
        assert!(ledger.get_positions("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_withdraw_owner_only() {
        let (ledger, proposal) = ledger().await;
        ledger.upsert_position(&proposal.id, "bob", Stance::Support, "").await.unwrap();

        let err = ledger.withdraw_position(&proposal.id, "bob", "carol").await.unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized { failure: AuthFailure::Permission, .. }));

        assert!(ledger.withdraw_position(&proposal.id, "bob", "bob").await.unwrap());
        assert!(ledger.get_position(&proposal.id, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_position_stats_include_abstain() {
        let (ledger, proposal) = ledger().await;
        ledger.upsert_position(&proposal.id, "a", Stance::Support, "").await.unwrap();
        ledger.upsert_position(&proposal.id, "b", Stance::Abstain, "").await.unwrap();
        ledger
            .upsert_position(&proposal.id, "c", Stance::Block, "Unsafe storage plan")
            .await
            .unwrap();

        let stats = ledger.position_stats(&proposal.id).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_stance[&Stance::Abstain], 1);
        assert_eq!(stats.by_stance[&Stance::Oppose], 0);
    }
}
