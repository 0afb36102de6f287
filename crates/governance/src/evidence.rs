//! Evidence registry and peer validation
//!
//! Any identified member may attach evidence to a proposal. Only the member
//! who attached an item may delete it; there is no moderator override here.
//!
//! Each item also carries a validation record. Members cast at most one
//! verify or dispute vote per item, and the item's status moves from
//! `pending` to `verified` or `disputed` once enough votes accumulate.
//! Disputed items wait for a moderator review.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, GovernanceResult};
use crate::store::GovernanceStore;
use crate::types::{validate_identifier, Evidence, EvidenceType, MemberId};

/// Minimum length of dispute explanations and review reasoning
const MIN_EXPLANATION_LEN: usize = 10;

/// Peer validation status of an evidence item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Verified,
    Disputed,
    Rejected,
}

impl ValidationStatus {
    /// No further votes are accepted
    pub fn is_settled(&self) -> bool {
        matches!(self, ValidationStatus::Verified | ValidationStatus::Rejected)
    }
}

/// Why a member disputes an evidence item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeCategory {
    Inaccurate,
    Outdated,
    Misleading,
    UnreliableSource,
    Other,
}

impl FromStr for DisputeCategory {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "inaccurate" => Ok(DisputeCategory::Inaccurate),
            "outdated" => Ok(DisputeCategory::Outdated),
            "misleading" => Ok(DisputeCategory::Misleading),
            "unreliable_source" => Ok(DisputeCategory::UnreliableSource),
            "other" => Ok(DisputeCategory::Other),
            other => Err(GovernanceError::validation(format!("Invalid dispute category '{}'", other))),
        }
    }
}

/// A dispute vote with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeReason {
    pub member_id: MemberId,
    pub category: DisputeCategory,
    pub explanation: String,
    pub filed_at: DateTime<Utc>,
}

/// Moderator decision on a disputed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Verified,
    Rejected,
    /// Stays disputed until the evidence is revised
    NeedsUpdate,
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewDecision::Verified => "verified",
            ReviewDecision::Rejected => "rejected",
            ReviewDecision::NeedsUpdate => "needs_update",
        };
        f.write_str(s)
    }
}

impl FromStr for ReviewDecision {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "verified" => Ok(ReviewDecision::Verified),
            "rejected" => Ok(ReviewDecision::Rejected),
            "needs_update" => Ok(ReviewDecision::NeedsUpdate),
            other => Err(GovernanceError::validation(format!("Invalid review decision '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorReview {
    pub moderator_id: MemberId,
    pub decision: ReviewDecision,
    pub reasoning: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Peer validation state of one evidence item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub evidence_id: String,
    pub proposal_id: String,
    pub status: ValidationStatus,
    pub verifiers: Vec<MemberId>,
    pub disputes: Vec<DisputeReason>,
    pub review: Option<ModeratorReview>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationRecord {
    pub fn new(evidence: &Evidence) -> Self {
        Self {
            evidence_id: evidence.id.clone(),
            proposal_id: evidence.proposal_id.clone(),
            status: ValidationStatus::Pending,
            verifiers: Vec::new(),
            disputes: Vec::new(),
            review: None,
            updated_at: evidence.attached_at,
        }
    }

    pub fn verify_count(&self) -> usize {
        self.verifiers.len()
    }

    pub fn dispute_count(&self) -> usize {
        self.disputes.len()
    }

    fn has_voted(&self, member_id: &str) -> bool {
        self.verifiers.iter().any(|m| m == member_id) || self.disputes.iter().any(|d| d.member_id == member_id)
    }

    /// Reject a vote the member may not cast
    fn check_vote(&self, member_id: &str) -> GovernanceResult<()> {
        if self.status.is_settled() {
            return Err(GovernanceError::validation(format!(
                "Validation of evidence {} is already complete ({:?})",
                self.evidence_id, self.status
            )));
        }
        if self.has_voted(member_id) {
            return Err(GovernanceError::validation(format!(
                "Member {} has already validated evidence {}",
                member_id, self.evidence_id
            )));
        }
        Ok(())
    }
}

/// Count of validation records per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total: usize,
    pub pending: usize,
    pub verified: usize,
    pub disputed: usize,
    pub rejected: usize,
}

/// Input for a new evidence item
#[derive(Debug, Clone)]
pub struct NewEvidence<'a> {
    pub proposal_id: &'a str,
    pub evidence_type: EvidenceType,
    pub title: &'a str,
    pub summary: &'a str,
    pub url: Option<&'a str>,
    pub attached_by: &'a str,
}

fn validate_url(raw: &str) -> GovernanceResult<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| GovernanceError::validation(format!("Invalid evidence URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(GovernanceError::validation(format!(
            "Evidence URL must use http or https, got '{}'", scheme
        ))),
    }
}

fn validate_explanation(field: &str, text: &str) -> GovernanceResult<()> {
    if consent_core::utils::trimmed_len(text) < MIN_EXPLANATION_LEN {
        return Err(GovernanceError::validation(format!(
            "{} must be at least {} characters", field, MIN_EXPLANATION_LEN
        )));
    }
    Ok(())
}

/// Attaches, lists and removes evidence, and runs peer validation
pub struct EvidenceRegistry {
    store: Arc<dyn GovernanceStore>,
    config: Arc<GovernanceConfig>,
    /// Serializes validation read-modify-write per item
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EvidenceRegistry {
    pub fn new(store: Arc<dyn GovernanceStore>, config: Arc<GovernanceConfig>) -> Self {
        Self {
            store,
            config,
            locks: DashMap::new(),
        }
    }

    /// Lock for an item that exists; unknown ids never enter the table
    async fn item_lock(&self, evidence_id: &str) -> GovernanceResult<Arc<Mutex<()>>> {
        self.get_evidence(evidence_id).await?;
        Ok(self
            .locks
            .entry(evidence_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Validation record of an item whose lock is held. Drops the lock entry
    /// if the item was deleted while waiting.
    async fn locked_validation(&self, evidence_id: &str) -> GovernanceResult<ValidationRecord> {
        let result = self.validation(evidence_id).await;
        if matches!(result, Err(GovernanceError::EvidenceNotFound(_))) {
            self.locks.remove(evidence_id);
        }
        result
    }

    /// Attach a new evidence item to an existing proposal
    pub async fn add_evidence(&self, new: NewEvidence<'_>) -> GovernanceResult<Evidence> {
        validate_identifier("proposal id", new.proposal_id)?;
        validate_identifier("member id", new.attached_by)?;
        self.config.evidence_title.check("Evidence title", new.title)?;
        self.config.evidence_summary.check("Evidence summary", new.summary)?;
        let url = match new.url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) => Some(validate_url(raw)?),
            None => None,
        };

        // Existence check only; evidence may be attached in any status
        self.store.get_proposal(new.proposal_id).await?;

        let evidence = Evidence {
            id: format!("evidence-{}", uuid::Uuid::new_v4()),
            proposal_id: new.proposal_id.to_string(),
            evidence_type: new.evidence_type,
            title: new.title.trim().to_string(),
            summary: new.summary.trim().to_string(),
            url,
            attached_by: new.attached_by.to_string(),
            attached_at: Utc::now(),
        };

        self.store.put_evidence(&evidence).await?;
        self.store.put_validation(&ValidationRecord::new(&evidence)).await?;

        info!(
            proposal_id = %evidence.proposal_id,
            evidence_id = %evidence.id,
            evidence_type = %evidence.evidence_type,
            "Evidence attached"
        );
        Ok(evidence)
    }

    /// All evidence on a proposal, oldest first
    pub async fn get_evidence_by_proposal(&self, proposal_id: &str) -> GovernanceResult<Vec<Evidence>> {
        self.store.get_proposal(proposal_id).await?;
        self.store.evidence_for(proposal_id).await
    }

    pub async fn get_evidence(&self, evidence_id: &str) -> GovernanceResult<Evidence> {
        self.store
            .get_evidence(evidence_id)
            .await?
            .ok_or_else(|| GovernanceError::EvidenceNotFound(evidence_id.to_string()))
    }

    /// Delete an item. Only the member who attached it may do so.
    pub async fn delete_evidence(&self, evidence_id: &str, requester_id: &str) -> GovernanceResult<bool> {
        let evidence = self.get_evidence(evidence_id).await?;

        if evidence.attached_by != requester_id {
            warn!(
                evidence_id = %evidence_id,
                requester = %requester_id,
                "Evidence deletion refused: requester did not attach this item"
            );
            return Err(GovernanceError::forbidden(format!(
                "Only {} may delete evidence {}",
                evidence.attached_by, evidence_id
            )));
        }

        let lock = self.item_lock(evidence_id).await?;
        let _guard = lock.lock().await;
        self.store.delete_evidence(&evidence).await?;
        self.locks.remove(evidence_id);

        info!(proposal_id = %evidence.proposal_id, evidence_id = %evidence_id, "Evidence deleted");
        Ok(true)
    }

    /// Validation record of an item
    pub async fn validation(&self, evidence_id: &str) -> GovernanceResult<ValidationRecord> {
        let evidence = self.get_evidence(evidence_id).await?;
        Ok(self
            .store
            .get_validation(evidence_id)
            .await?
            .unwrap_or_else(|| ValidationRecord::new(&evidence)))
    }

    /// Cast a verification vote
    pub async fn verify_evidence(&self, evidence_id: &str, member_id: &str) -> GovernanceResult<ValidationRecord> {
        validate_identifier("member id", member_id)?;

        let lock = self.item_lock(evidence_id).await?;
        let _guard = lock.lock().await;

        let mut record = self.locked_validation(evidence_id).await?;
        record.check_vote(member_id)?;

        record.verifiers.push(member_id.to_string());
        record.updated_at = Utc::now();
        if record.verify_count() >= self.config.evidence_verify_threshold {
            record.status = ValidationStatus::Verified;
            info!(evidence_id = %evidence_id, "Evidence verified by peers");
        }

        self.store.put_validation(&record).await?;
        Ok(record)
    }

    /// Cast a dispute vote with a category and explanation
    pub async fn dispute_evidence(
        &self,
        evidence_id: &str,
        member_id: &str,
        category: DisputeCategory,
        explanation: &str,
    ) -> GovernanceResult<ValidationRecord> {
        validate_identifier("member id", member_id)?;
        validate_explanation("Dispute explanation", explanation)?;

        let lock = self.item_lock(evidence_id).await?;
        let _guard = lock.lock().await;

        let mut record = self.locked_validation(evidence_id).await?;
        record.check_vote(member_id)?;

        let now = Utc::now();
        record.disputes.push(DisputeReason {
            member_id: member_id.to_string(),
            category,
            explanation: explanation.trim().to_string(),
            filed_at: now,
        });
        record.updated_at = now;
        if record.dispute_count() >= self.config.evidence_dispute_threshold {
            record.status = ValidationStatus::Disputed;
            warn!(evidence_id = %evidence_id, disputes = record.dispute_count(), "Evidence disputed");
        }

        self.store.put_validation(&record).await?;
        Ok(record)
    }

    /// Record a moderator's decision on a disputed item.
    ///
    /// Callers are responsible for checking the moderator role.
    pub async fn review_disputed_evidence(
        &self,
        evidence_id: &str,
        moderator_id: &str,
        decision: ReviewDecision,
        reasoning: &str,
    ) -> GovernanceResult<ValidationRecord> {
        validate_explanation("Review reasoning", reasoning)?;

        let lock = self.item_lock(evidence_id).await?;
        let _guard = lock.lock().await;

        let mut record = self.locked_validation(evidence_id).await?;
        if record.status != ValidationStatus::Disputed {
            return Err(GovernanceError::validation(format!(
                "Evidence {} is not disputed", evidence_id
            )));
        }

        let now = Utc::now();
        record.review = Some(ModeratorReview {
            moderator_id: moderator_id.to_string(),
            decision,
            reasoning: reasoning.trim().to_string(),
            reviewed_at: now,
        });
        match decision {
            ReviewDecision::Verified => record.status = ValidationStatus::Verified,
            ReviewDecision::Rejected => record.status = ValidationStatus::Rejected,
            ReviewDecision::NeedsUpdate => {}
        }
        record.updated_at = now;

        self.store.put_validation(&record).await?;
        info!(evidence_id = %evidence_id, decision = %decision, "Disputed evidence reviewed");
        Ok(record)
    }

    /// Disputed items no moderator has reviewed yet
    pub async fn disputed_queue(&self) -> GovernanceResult<Vec<ValidationRecord>> {
        let mut records: Vec<ValidationRecord> = self
            .store
            .list_validations()
            .await?
            .into_iter()
            .filter(|r| r.status == ValidationStatus::Disputed && r.review.is_none())
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(records)
    }

    /// Count validation records per status
    pub async fn validation_stats(&self) -> GovernanceResult<ValidationStats> {
        let records = self.store.list_validations().await?;
        let mut stats = ValidationStats {
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            match record.status {
                ValidationStatus::Pending => stats.pending += 1,
                ValidationStatus::Verified => stats.verified += 1,
                ValidationStatus::Disputed => stats.disputed += 1,
                ValidationStatus::Rejected => stats.rejected += 1,
            }
        }
        Ok(stats)
    }
}
