//! Storage collaborator for the governance engine
//!
//! [`GovernanceStore`] is the narrow contract the engine persists through.
//! [`KvGovernanceStore`] implements it over any [`Storage`] backend, keeping
//! one JSON document per entity.
//!
//! Every write that touches a proposal or its positions runs under that
//! proposal's lock and bumps `Proposal::revision`, which makes the revision a
//! reliable version stamp for tally caching and for the compare-and-set in
//! [`GovernanceStore::update_proposal`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use consent_core::{JsonStorage, Storage};

use crate::error::{GovernanceError, GovernanceResult};
use crate::evidence::ValidationRecord;
use crate::types::{Evidence, MinorityReport, Position, Proposal};

/// Path constants for storage
const PROPOSALS_PATH: &str = "governance/proposals";
const POSITIONS_PATH: &str = "governance/positions";
const EVIDENCE_PATH: &str = "governance/evidence";
const EVIDENCE_INDEX_PATH: &str = "governance/evidence-index";
const VALIDATION_PATH: &str = "governance/evidence-validation";
const REPORTS_PATH: &str = "governance/reports";

/// Outcome of recording a position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionWrite {
    /// A new or changed position was written
    Stored(Position),
    /// The stored position already had this stance and reasoning
    Unchanged(Position),
}

impl PositionWrite {
    pub fn position(&self) -> &Position {
        match self {
            PositionWrite::Stored(p) | PositionWrite::Unchanged(p) => p,
        }
    }

    pub fn into_position(self) -> Position {
        match self {
            PositionWrite::Stored(p) | PositionWrite::Unchanged(p) => p,
        }
    }
}

/// Persistence contract used by the engine
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    /// Store a newly created proposal. Fails if the id is already taken.
    async fn insert_proposal(&self, proposal: &Proposal) -> GovernanceResult<()>;

    /// Fetch a proposal, failing with `ProposalNotFound`
    async fn get_proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal>;

    async fn list_proposals(&self) -> GovernanceResult<Vec<Proposal>>;

    /// Replace a proposal if its stored revision still equals
    /// `expected_revision`, returning the stored record with the revision
    /// incremented. A mismatch is `Conflict`.
    async fn update_proposal(&self, proposal: &Proposal, expected_revision: u64) -> GovernanceResult<Proposal>;

    /// A proposal and its positions, read together under the proposal lock
    async fn proposal_with_positions(&self, proposal_id: &str) -> GovernanceResult<(Proposal, Vec<Position>)>;

    /// Atomically replace the position for `(proposal_id, member_id)`.
    ///
    /// The proposal must exist and accept positions. An existing position
    /// keeps its id; an identical stance and reasoning is left untouched.
    async fn record_position(&self, candidate: Position) -> GovernanceResult<PositionWrite>;

    /// Remove a member's position, returning whether one existed
    async fn remove_position(&self, proposal_id: &str, member_id: &str) -> GovernanceResult<bool>;

    async fn get_position(&self, proposal_id: &str, member_id: &str) -> GovernanceResult<Option<Position>>;

    async fn get_positions(&self, proposal_id: &str) -> GovernanceResult<Vec<Position>>;

    async fn put_evidence(&self, evidence: &Evidence) -> GovernanceResult<()>;

    async fn get_evidence(&self, evidence_id: &str) -> GovernanceResult<Option<Evidence>>;

    async fn evidence_for(&self, proposal_id: &str) -> GovernanceResult<Vec<Evidence>>;

    /// Remove an evidence item together with its validation record
    async fn delete_evidence(&self, evidence: &Evidence) -> GovernanceResult<()>;

    async fn get_validation(&self, evidence_id: &str) -> GovernanceResult<Option<ValidationRecord>>;

    async fn put_validation(&self, record: &ValidationRecord) -> GovernanceResult<()>;

    async fn list_validations(&self) -> GovernanceResult<Vec<ValidationRecord>>;

    async fn get_report(&self, proposal_id: &str) -> GovernanceResult<Option<MinorityReport>>;

    /// Overwrite the report for a proposal
    async fn put_report(&self, report: &MinorityReport) -> GovernanceResult<()>;

    /// Remove the report, returning whether one existed
    async fn delete_report(&self, proposal_id: &str) -> GovernanceResult<bool>;
}

/// [`GovernanceStore`] over a key/value [`Storage`]
pub struct KvGovernanceStore {
    storage: Arc<dyn Storage>,
    /// Serializes writes per proposal
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KvGovernanceStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: DashMap::new(),
        }
    }

    async fn lock(&self, proposal_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(proposal_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Lock a stored proposal and load it. Unknown ids get no lock entry;
    /// proposals are never deleted, so existing entries stay meaningful.
    async fn lock_proposal(&self, proposal_id: &str) -> GovernanceResult<(OwnedMutexGuard<()>, Proposal)> {
        if !self.storage.exists(&Self::proposal_key(proposal_id)).await? {
            return Err(GovernanceError::ProposalNotFound(proposal_id.to_string()));
        }
        let guard = self.lock(proposal_id).await;
        let proposal = self.load_proposal(proposal_id).await?;
        Ok((guard, proposal))
    }

    fn proposal_key(proposal_id: &str) -> String {
        format!("{}/{}", PROPOSALS_PATH, proposal_id)
    }

    fn position_key(proposal_id: &str, member_id: &str) -> String {
        format!("{}/{}/{}", POSITIONS_PATH, proposal_id, member_id)
    }

    fn evidence_key(proposal_id: &str, evidence_id: &str) -> String {
        format!("{}/{}/{}", EVIDENCE_PATH, proposal_id, evidence_id)
    }

    fn evidence_index_key(evidence_id: &str) -> String {
        format!("{}/{}", EVIDENCE_INDEX_PATH, evidence_id)
    }

    fn validation_key(evidence_id: &str) -> String {
        format!("{}/{}", VALIDATION_PATH, evidence_id)
    }

    fn report_key(proposal_id: &str) -> String {
        format!("{}/{}", REPORTS_PATH, proposal_id)
    }

    async fn load_proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.storage
            .find_json::<Proposal>(&Self::proposal_key(proposal_id))
            .await?
            .ok_or_else(|| GovernanceError::ProposalNotFound(proposal_id.to_string()))
    }

    async fn load_all<T>(&self, prefix: &str) -> GovernanceResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let keys = self.storage.list(&format!("{}/", prefix)).await?;
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match self.storage.find_json::<T>(&key).await? {
                Some(item) => items.push(item),
                // Removed between list and read
                None => debug!("Skipping vanished key {}", key),
            }
        }
        Ok(items)
    }

    /// Bump the revision of a proposal whose lock is held
    async fn bump_revision(&self, mut proposal: Proposal) -> GovernanceResult<Proposal> {
        proposal.revision += 1;
        proposal.updated_at = Utc::now();
        self.storage.put_json(&Self::proposal_key(&proposal.id), &proposal).await?;
        Ok(proposal)
    }

    fn ensure_accepts_positions(proposal: &Proposal) -> GovernanceResult<()> {
        if !proposal.status.accepts_positions() {
            return Err(GovernanceError::validation(format!(
                "Proposal {} is {} and no longer accepts position changes",
                proposal.id, proposal.status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GovernanceStore for KvGovernanceStore {
    async fn insert_proposal(&self, proposal: &Proposal) -> GovernanceResult<()> {
        let _guard = self.lock(&proposal.id).await;
        let key = Self::proposal_key(&proposal.id);
        if self.storage.exists(&key).await? {
            return Err(GovernanceError::validation(format!(
                "Proposal {} already exists", proposal.id
            )));
        }
        self.storage.put_json(&key, proposal).await?;
        Ok(())
    }

    async fn get_proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.load_proposal(proposal_id).await
    }

    async fn list_proposals(&self) -> GovernanceResult<Vec<Proposal>> {
        let mut proposals: Vec<Proposal> = self.load_all(PROPOSALS_PATH).await?;
        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(proposals)
    }

    async fn update_proposal(&self, proposal: &Proposal, expected_revision: u64) -> GovernanceResult<Proposal> {
        let (_guard, stored) = self.lock_proposal(&proposal.id).await?;
        if stored.revision != expected_revision {
            warn!(
                proposal_id = %proposal.id,
                expected = expected_revision,
                actual = stored.revision,
                "Proposal revision changed underneath an update"
            );
            return Err(GovernanceError::Conflict(format!(
                "proposal {} is at revision {}, expected {}",
                proposal.id, stored.revision, expected_revision
            )));
        }

        let mut updated = proposal.clone();
        updated.revision = expected_revision + 1;
        self.storage.put_json(&Self::proposal_key(&updated.id), &updated).await?;
        Ok(updated)
    }

    async fn proposal_with_positions(&self, proposal_id: &str) -> GovernanceResult<(Proposal, Vec<Position>)> {
        let (_guard, proposal) = self.lock_proposal(proposal_id).await?;
        let positions = self.load_all(&format!("{}/{}", POSITIONS_PATH, proposal_id)).await?;
        Ok((proposal, positions))
    }

    async fn record_position(&self, mut candidate: Position) -> GovernanceResult<PositionWrite> {
        let (_guard, proposal) = self.lock_proposal(&candidate.proposal_id).await?;
        Self::ensure_accepts_positions(&proposal)?;

        let key = Self::position_key(&candidate.proposal_id, &candidate.member_id);
        if let Some(existing) = self.storage.find_json::<Position>(&key).await? {
            if existing.stance == candidate.stance && existing.reasoning == candidate.reasoning {
                return Ok(PositionWrite::Unchanged(existing));
            }
            candidate.id = existing.id;
        }

        // Position before revision, so a cached tally is never newer than its stamp
        self.storage.put_json(&key, &candidate).await?;
        self.bump_revision(proposal).await?;
        Ok(PositionWrite::Stored(candidate))
    }

    async fn remove_position(&self, proposal_id: &str, member_id: &str) -> GovernanceResult<bool> {
        let (_guard, proposal) = self.lock_proposal(proposal_id).await?;

        let key = Self::position_key(proposal_id, member_id);
        if !self.storage.exists(&key).await? {
            return Ok(false);
        }
        Self::ensure_accepts_positions(&proposal)?;

        self.storage.delete(&key).await?;
        self.bump_revision(proposal).await?;
        Ok(true)
    }

    async fn get_position(&self, proposal_id: &str, member_id: &str) -> GovernanceResult<Option<Position>> {
        Ok(self.storage.find_json(&Self::position_key(proposal_id, member_id)).await?)
    }

    async fn get_positions(&self, proposal_id: &str) -> GovernanceResult<Vec<Position>> {
        self.load_all(&format!("{}/{}", POSITIONS_PATH, proposal_id)).await
    }

    async fn put_evidence(&self, evidence: &Evidence) -> GovernanceResult<()> {
        self.storage
            .put_json(&Self::evidence_key(&evidence.proposal_id, &evidence.id), evidence)
            .await?;
        self.storage
            .put_json(&Self::evidence_index_key(&evidence.id), &evidence.proposal_id)
            .await?;
        Ok(())
    }

    async fn get_evidence(&self, evidence_id: &str) -> GovernanceResult<Option<Evidence>> {
        let proposal_id: String = match self.storage.find_json(&Self::evidence_index_key(evidence_id)).await? {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(self.storage.find_json(&Self::evidence_key(&proposal_id, evidence_id)).await?)
    }

    async fn evidence_for(&self, proposal_id: &str) -> GovernanceResult<Vec<Evidence>> {
        let mut items: Vec<Evidence> = self.load_all(&format!("{}/{}", EVIDENCE_PATH, proposal_id)).await?;
        items.sort_by(|a, b| a.attached_at.cmp(&b.attached_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn delete_evidence(&self, evidence: &Evidence) -> GovernanceResult<()> {
        self.storage.delete(&Self::evidence_key(&evidence.proposal_id, &evidence.id)).await?;
        self.storage.delete(&Self::validation_key(&evidence.id)).await?;
        self.storage.delete(&Self::evidence_index_key(&evidence.id)).await?;
        Ok(())
    }

    async fn get_validation(&self, evidence_id: &str) -> GovernanceResult<Option<ValidationRecord>> {
        Ok(self.storage.find_json(&Self::validation_key(evidence_id)).await?)
    }

    async fn put_validation(&self, record: &ValidationRecord) -> GovernanceResult<()> {
        self.storage.put_json(&Self::validation_key(&record.evidence_id), record).await?;
        Ok(())
    }

    async fn list_validations(&self) -> GovernanceResult<Vec<ValidationRecord>> {
        self.load_all(VALIDATION_PATH).await
    }

    async fn get_report(&self, proposal_id: &str) -> GovernanceResult<Option<MinorityReport>> {
        Ok(self.storage.find_json(&Self::report_key(proposal_id)).await?)
    }

    async fn put_report(&self, report: &MinorityReport) -> GovernanceResult<()> {
        self.storage.put_json(&Self::report_key(&report.proposal_id), report).await?;
        Ok(())
    }

    async fn delete_report(&self, proposal_id: &str) -> GovernanceResult<bool> {
        let key = Self::report_key(proposal_id);
        if !self.storage.exists(&key).await? {
            return Ok(false);
        }
        self.storage.delete(&key).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProposalStatus, Stance};
    use consent_core::MemoryStorage;

    fn store() -> KvGovernanceStore {
        KvGovernanceStore::new(Arc::new(MemoryStorage::new()))
    }

    fn position(proposal_id: &str, member: &str, stance: Stance, reasoning: &str) -> Position {
        Position {
            id: format!("pos-{}-{}", member, uuid::Uuid::new_v4()),
            proposal_id: proposal_id.to_string(),
            member_id: member.to_string(),
            stance,
            reasoning: reasoning.to_string(),
            recorded_at: Utc::now(),
        }
    }

    async fn seeded() -> (KvGovernanceStore, Proposal) {
        let store = store();
        let proposal = Proposal::new("coop", "alice", "Solar roof", "Install panels on the hall");
        store.insert_proposal(&proposal).await.unwrap();
        (store, proposal)
    }

    #[tokio::test]
    async fn test_unknown_proposal_leaves_no_lock() {
        let (store, proposal) = seeded().await;
        let before = store.locks.len();

        let missing = position("missing", "bob", Stance::Block, "never recorded anywhere");
        assert!(store.record_position(missing).await.unwrap_err().is_not_found());
        assert!(store.remove_position("missing", "bob").await.unwrap_err().is_not_found());
        assert!(store.proposal_with_positions("missing").await.unwrap_err().is_not_found());
        let mut ghost = proposal.clone();
        ghost.id = "ghost".into();
        assert!(store.update_proposal(&ghost, 0).await.unwrap_err().is_not_found());

        assert_eq!(store.locks.len(), before);
        assert!(!store.locks.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_insert_and_fetch_proposal() {
        let (store, proposal) = seeded().await;
        assert_eq!(store.get_proposal(&proposal.id).await.unwrap(), proposal);
        assert!(store.insert_proposal(&proposal).await.is_err());
        assert!(store.get_proposal("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_position_write_bumps_revision_and_keeps_id() {
        let (store, proposal) = seeded().await;

        let first = store
            .record_position(position(&proposal.id, "bob", Stance::Oppose, "too expensive for now"))
            .await
            .unwrap();
        assert!(matches!(first, PositionWrite::Stored(_)));
        assert_eq!(store.get_proposal(&proposal.id).await.unwrap().revision, 1);

        let second = store
            .record_position(position(&proposal.id, "bob", Stance::Support, ""))
            .await
            .unwrap();
        assert_eq!(second.position().id, first.position().id);
        assert_eq!(store.get_proposal(&proposal.id).await.unwrap().revision, 2);
        assert_eq!(store.get_positions(&proposal.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_position_is_unchanged() {
        let (store, proposal) = seeded().await;
        store
            .record_position(position(&proposal.id, "bob", Stance::Support, "yes"))
            .await
            .unwrap();
        let again = store
            .record_position(position(&proposal.id, "bob", Stance::Support, "yes"))
            .await
            .unwrap();
        assert!(matches!(again, PositionWrite::Unchanged(_)));
        assert_eq!(store.get_proposal(&proposal.id).await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_positions_rejected_after_decision() {
        let (store, mut proposal) = seeded().await;
        proposal.status = ProposalStatus::Decided;
        store.update_proposal(&proposal, 0).await.unwrap();

        let err = store
            .record_position(position(&proposal.id, "bob", Stance::Support, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_proposal_compare_and_set() {
        let (store, proposal) = seeded().await;
        store
            .record_position(position(&proposal.id, "bob", Stance::Support, ""))
            .await
            .unwrap();

        // Stale revision 0 after a position write
        let err = store.update_proposal(&proposal, 0).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));

        let updated = store.update_proposal(&proposal, 1).await.unwrap();
        assert_eq!(updated.revision, 2);
    }

    #[tokio::test]
    async fn test_remove_position() {
        let (store, proposal) = seeded().await;
        store
            .record_position(position(&proposal.id, "bob", Stance::Abstain, ""))
            .await
            .unwrap();

        assert!(store.remove_position(&proposal.id, "bob").await.unwrap());
        assert!(!store.remove_position(&proposal.id, "bob").await.unwrap());
        assert!(store.get_position(&proposal.id, "bob").await.unwrap().is_none());
        assert_eq!(store.get_proposal(&proposal.id).await.unwrap().revision, 2);
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let (store, proposal) = seeded().await;
        assert!(store.get_report(&proposal.id).await.unwrap().is_none());

        let report = MinorityReport {
            proposal_id: proposal.id.clone(),
            content: "## Minority Report".into(),
            generated_at: Utc::now(),
            last_edited_by: None,
            last_edited_at: None,
        };
        store.put_report(&report).await.unwrap();
        assert_eq!(store.get_report(&proposal.id).await.unwrap(), Some(report));

        assert!(store.delete_report(&proposal.id).await.unwrap());
        assert!(!store.delete_report(&proposal.id).await.unwrap());
    }
}
