//! Governance manager implementation
//!
//! This module provides the façade hosts call: it resolves authorization
//! for the calling member, delegates to the ledger, registry and report
//! compiler, caches tallies, and runs the optimistic decide loop.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use consent_core::utils::timestamp_ms;
use consent_core::Storage;

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, GovernanceResult};
use crate::evidence::{
    DisputeCategory, EvidenceRegistry, NewEvidence, ReviewDecision, ValidationRecord, ValidationStats,
};
use crate::identity::Caller;
use crate::lifecycle::{self, DecisionOutcome};
use crate::positions::{PositionLedger, PositionStats};
use crate::report::{MinorityReportCompiler, ReportStatus};
use crate::store::{GovernanceStore, KvGovernanceStore, PositionWrite};
use crate::tally::{compute_tally, Tally};
use crate::types::{Evidence, EvidenceType, MinorityReport, Position, Proposal, ProposalStatus, Stance};

/// Result of a decision attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    /// The tally the outcome was based on
    pub tally: Tally,
    /// The proposal as stored after the attempt
    pub proposal: Proposal,
    pub attempts: u32,
}

/// The main entry point into the governance engine
pub struct GovernanceManager {
    store: Arc<dyn GovernanceStore>,
    config: Arc<GovernanceConfig>,
    ledger: PositionLedger,
    evidence: EvidenceRegistry,
    reports: MinorityReportCompiler,
    /// Last computed tally per proposal, stamped with the proposal revision
    tally_cache: DashMap<String, (u64, Tally)>,
}

impl GovernanceManager {
    /// Create a manager persisting through a key/value storage backend
    pub fn new(storage: Arc<dyn Storage>, config: GovernanceConfig) -> GovernanceResult<Self> {
        Self::with_store(Arc::new(KvGovernanceStore::new(storage)), config)
    }

    /// Create a manager over a custom store implementation
    pub fn with_store(store: Arc<dyn GovernanceStore>, config: GovernanceConfig) -> GovernanceResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        Ok(Self {
            ledger: PositionLedger::new(store.clone(), config.clone()),
            evidence: EvidenceRegistry::new(store.clone(), config.clone()),
            reports: MinorityReportCompiler::new(store.clone(), config.clone()),
            store,
            config,
            tally_cache: DashMap::new(),
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    // Proposals

    /// Create a proposal in `draft`, authored by the caller
    pub async fn create_proposal(
        &self,
        caller: &Caller,
        scope_id: &str,
        title: &str,
        summary: &str,
    ) -> GovernanceResult<Proposal> {
        let author = caller.ensure_identified()?;
        crate::types::validate_identifier("scope id", scope_id)?;
        self.config.proposal_title.check("Proposal title", title)?;
        self.config.proposal_summary.check("Proposal summary", summary)?;
        // Fail early on a scope whose configured threshold is unusable
        self.config.policy_for_scope(scope_id)?;

        let proposal = Proposal::new(scope_id, author, title.trim(), summary.trim());
        self.store.insert_proposal(&proposal).await?;

        info!(proposal_id = %proposal.id, scope_id = %scope_id, author = %author, "Proposal created");
        Ok(proposal)
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.store.get_proposal(proposal_id).await
    }

    pub async fn list_proposals(&self) -> GovernanceResult<Vec<Proposal>> {
        self.store.list_proposals().await
    }

    /// Apply an explicit lifecycle transition.
    ///
    /// The author or a moderator may advance a proposal; only moderators may
    /// archive. `decided` is reached through [`Self::attempt_decide`] only.
    pub async fn advance(&self, caller: &Caller, proposal_id: &str, to: ProposalStatus) -> GovernanceResult<Proposal> {
        let member = caller.ensure_identified()?;
        if to == ProposalStatus::Archived {
            caller.ensure_moderator("archive proposals")?;
        }

        let mut last_conflict = None;
        for attempt in 1..=self.config.max_decide_attempts {
            let current = self.store.get_proposal(proposal_id).await?;
            if current.author_id != member && !caller.is_moderator {
                return Err(GovernanceError::forbidden(format!(
                    "Only the author or a moderator may advance proposal {}", proposal_id
                )));
            }

            let mut next = current.clone();
            lifecycle::transition(&mut next, to, Utc::now())?;

            match self.store.update_proposal(&next, current.revision).await {
                Ok(stored) => {
                    info!(proposal_id = %proposal_id, from = %current.status, to = %to, "Proposal advanced");
                    return Ok(stored);
                }
                Err(e @ GovernanceError::Conflict(_)) => {
                    debug!(proposal_id = %proposal_id, attempt, "Retrying transition after conflict");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| GovernanceError::Conflict(proposal_id.to_string())))
    }

    /// Archive a proposal from any live status. Moderators only.
    pub async fn archive(&self, caller: &Caller, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.advance(caller, proposal_id, ProposalStatus::Archived).await
    }

    // Positions

    /// Record the caller's position on a proposal
    pub async fn upsert_position(
        &self,
        caller: &Caller,
        proposal_id: &str,
        stance: Stance,
        reasoning: &str,
    ) -> GovernanceResult<Position> {
        let member = caller.ensure_identified()?;
        let write = self.ledger.upsert_position(proposal_id, member, stance, reasoning).await?;
        if let PositionWrite::Stored(_) = write {
            self.tally_cache.remove(proposal_id);
        }
        Ok(write.into_position())
    }

    pub async fn get_positions(&self, proposal_id: &str) -> GovernanceResult<Vec<Position>> {
        self.ledger.get_positions(proposal_id).await
    }

    pub async fn get_position(&self, proposal_id: &str, member_id: &str) -> GovernanceResult<Option<Position>> {
        self.ledger.get_position(proposal_id, member_id).await
    }

    /// Withdraw the caller's own position
    pub async fn withdraw_position(&self, caller: &Caller, proposal_id: &str, member_id: &str) -> GovernanceResult<bool> {
        let requester = caller.ensure_identified()?;
        let removed = self.ledger.withdraw_position(proposal_id, member_id, requester).await?;
        if removed {
            self.tally_cache.remove(proposal_id);
        }
        Ok(removed)
    }

    pub async fn position_stats(&self, proposal_id: &str) -> GovernanceResult<PositionStats> {
        self.ledger.position_stats(proposal_id).await
    }

    // Tally and decision

    fn tally_snapshot(&self, proposal: &Proposal, positions: &[Position]) -> GovernanceResult<Tally> {
        if let Some(entry) = self.tally_cache.get(&proposal.id) {
            let (revision, tally) = entry.value();
            if *revision == proposal.revision {
                return Ok(tally.clone());
            }
        }

        let policy = self.config.policy_for_scope(&proposal.scope_id)?;
        let tally = compute_tally(positions, policy.as_ref());
        self.tally_cache
            .insert(proposal.id.clone(), (proposal.revision, tally.clone()));
        Ok(tally)
    }

    /// Current tally for a proposal, under its scope's threshold policy
    pub async fn tally(&self, proposal_id: &str) -> GovernanceResult<Tally> {
        let (proposal, positions) = self.store.proposal_with_positions(proposal_id).await?;
        self.tally_snapshot(&proposal, &positions)
    }

    /// Ask the tally to decide a voting proposal.
    ///
    /// The status change is committed with a compare-and-set on the
    /// proposal revision; a position arriving in between aborts the commit
    /// and the attempt is repeated against a fresh tally.
    pub async fn attempt_decide(&self, caller: &Caller, proposal_id: &str) -> GovernanceResult<Decision> {
        caller.ensure_identified()?;
        let started = timestamp_ms();

        let mut last_conflict = None;
        for attempt in 1..=self.config.max_decide_attempts {
            let (current, positions) = self.store.proposal_with_positions(proposal_id).await?;
            let tally = self.tally_snapshot(&current, &positions)?;

            let mut next = current.clone();
            let outcome = lifecycle::attempt_decide(&mut next, &tally, Utc::now())?;

            if outcome != DecisionOutcome::Approved {
                debug!(proposal_id = %proposal_id, ?outcome, "Proposal not decided");
                return Ok(Decision { outcome, tally, proposal: current, attempts: attempt });
            }

            match self.store.update_proposal(&next, current.revision).await {
                Ok(stored) => {
                    info!(
                        proposal_id = %proposal_id,
                        support = tally.support,
                        total = tally.total,
                        policy = %tally.policy,
                        elapsed_ms = timestamp_ms().saturating_sub(started),
                        "Proposal decided"
                    );
                    return Ok(Decision { outcome, tally, proposal: stored, attempts: attempt });
                }
                Err(e @ GovernanceError::Conflict(_)) => {
                    warn!(proposal_id = %proposal_id, attempt, "Positions changed during decision, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| GovernanceError::Conflict(proposal_id.to_string())))
    }

    // Minority reports

    /// Compile and store the minority report for a decided proposal
    pub async fn generate_report(&self, caller: &Caller, proposal_id: &str) -> GovernanceResult<MinorityReport> {
        caller.ensure_identified()?;
        self.reports.generate_report(proposal_id).await
    }

    /// Replace the report text with the caller's edit. Moderators only.
    pub async fn update_report(&self, caller: &Caller, proposal_id: &str, new_text: &str) -> GovernanceResult<MinorityReport> {
        caller.ensure_moderator("edit minority reports")?;
        self.reports.update_report(proposal_id, new_text, &caller.member_id).await
    }

    /// Remove a report, e.g. when reworking a proposal. Moderators only.
    pub async fn clear_report(&self, caller: &Caller, proposal_id: &str) -> GovernanceResult<bool> {
        caller.ensure_moderator("clear minority reports")?;
        self.reports.clear_report(proposal_id).await
    }

    pub async fn get_report(&self, proposal_id: &str) -> GovernanceResult<MinorityReport> {
        self.reports.get_report(proposal_id).await
    }

    pub async fn report_status(&self, proposal_id: &str) -> GovernanceResult<ReportStatus> {
        self.reports.report_status(proposal_id).await
    }

    // Evidence

    /// Attach evidence to a proposal on the caller's behalf
    pub async fn add_evidence(
        &self,
        caller: &Caller,
        proposal_id: &str,
        evidence_type: EvidenceType,
        title: &str,
        summary: &str,
        url: Option<&str>,
    ) -> GovernanceResult<Evidence> {
        let member = caller.ensure_identified()?;
        self.evidence
            .add_evidence(NewEvidence {
                proposal_id,
                evidence_type,
                title,
                summary,
                url,
                attached_by: member,
            })
            .await
    }

    pub async fn get_evidence_by_proposal(&self, proposal_id: &str) -> GovernanceResult<Vec<Evidence>> {
        self.evidence.get_evidence_by_proposal(proposal_id).await
    }

    /// Delete evidence the caller attached. Moderators get no override.
    pub async fn delete_evidence(&self, caller: &Caller, evidence_id: &str) -> GovernanceResult<bool> {
        let requester = caller.ensure_identified()?;
        self.evidence.delete_evidence(evidence_id, requester).await
    }

    pub async fn verify_evidence(&self, caller: &Caller, evidence_id: &str) -> GovernanceResult<ValidationRecord> {
        let member = caller.ensure_identified()?;
        self.evidence.verify_evidence(evidence_id, member).await
    }

    pub async fn dispute_evidence(
        &self,
        caller: &Caller,
        evidence_id: &str,
        category: DisputeCategory,
        explanation: &str,
    ) -> GovernanceResult<ValidationRecord> {
        let member = caller.ensure_identified()?;
        self.evidence.dispute_evidence(evidence_id, member, category, explanation).await
    }

    /// Settle a disputed evidence item. Moderators only.
    pub async fn review_disputed_evidence(
        &self,
        caller: &Caller,
        evidence_id: &str,
        decision: ReviewDecision,
        reasoning: &str,
    ) -> GovernanceResult<ValidationRecord> {
        caller.ensure_moderator("review disputed evidence")?;
        self.evidence
            .review_disputed_evidence(evidence_id, &caller.member_id, decision, reasoning)
            .await
    }

    pub async fn evidence_validation(&self, evidence_id: &str) -> GovernanceResult<ValidationRecord> {
        self.evidence.validation(evidence_id).await
    }

    pub async fn disputed_evidence_queue(&self) -> GovernanceResult<Vec<ValidationRecord>> {
        self.evidence.disputed_queue().await
    }

    pub async fn validation_stats(&self) -> GovernanceResult<ValidationStats> {
        self.evidence.validation_stats().await
    }
}
