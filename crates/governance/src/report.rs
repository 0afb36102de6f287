//! Minority report compiler
//!
//! Once a proposal is decided, the reasoning of every member who opposed or
//! blocked it is compiled into a markdown document. Reasoning is copied
//! verbatim and each entry is attributed to its member, so every dissenting
//! argument stays separately auditable.
//!
//! Reports may be regenerated (overwriting the stored copy) or edited by a
//! moderator. Edits append an attribution footer below the editor's text.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, GovernanceResult, NothingToReport};
use crate::store::GovernanceStore;
use crate::types::{validate_identifier, MinorityReport, Position, Proposal, Stance};

fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

fn render_section(out: &mut String, heading: &str, entry_label: &str, entries: &[&Position]) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, "### {}\n", heading);
    for (i, position) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "**{} {}** (member {}, recorded {}):\n",
            entry_label,
            i + 1,
            position.member_id,
            position.recorded_at.format("%Y-%m-%d")
        );
        let _ = writeln!(out, "{}\n", position.reasoning);
    }
}

/// Compile the minority report text for a decided proposal.
///
/// Fails with `NoMinorityPositions` when the proposal is not in a decided
/// status or nobody opposed or blocked it. Abstentions are never dissent.
pub fn compile_report(
    proposal: &Proposal,
    positions: &[Position],
    generated_at: DateTime<Utc>,
) -> GovernanceResult<String> {
    if !proposal.status.permits_minority_report() {
        return Err(GovernanceError::NoMinorityPositions {
            proposal_id: proposal.id.clone(),
            reason: NothingToReport::NotDecided(proposal.status),
        });
    }

    let mut dissent: Vec<&Position> = positions.iter().filter(|p| p.stance.is_dissent()).collect();
    if dissent.is_empty() {
        return Err(GovernanceError::NoMinorityPositions {
            proposal_id: proposal.id.clone(),
            reason: NothingToReport::NoDissent,
        });
    }
    dissent.sort_by(|a, b| {
        a.recorded_at
            .cmp(&b.recorded_at)
            .then_with(|| a.member_id.cmp(&b.member_id))
    });

    let (blocks, opposition): (Vec<&Position>, Vec<&Position>) =
        dissent.iter().copied().partition(|p| p.stance == Stance::Block);

    let mut out = String::new();
    let _ = writeln!(out, "## Minority Report\n");
    let _ = writeln!(out, "**Proposal:** {} ({})\n", proposal.title, proposal.id);
    let _ = writeln!(
        out,
        "{} recorded dissent on this decision: {} and {}.\n",
        plural(dissent.len(), "member", "members"),
        plural(blocks.len(), "blocking objection", "blocking objections"),
        plural(opposition.len(), "opposition statement", "opposition statements"),
    );

    render_section(&mut out, "Blocking Objections", "Objection", &blocks);
    render_section(&mut out, "Opposition Statements", "Statement", &opposition);

    let _ = writeln!(out, "---");
    let _ = write!(out, "*Generated on {}*", generated_at.format("%Y-%m-%d"));
    Ok(out)
}

/// Footer appended below a moderator's edit
pub fn attribution_footer(editor_id: &str, edited_at: DateTime<Utc>) -> String {
    format!("\n\n---\n*Edited by {} on {}*", editor_id, edited_at.to_rfc3339())
}

/// What a host needs to decide whether to offer report generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStatus {
    pub proposal_id: String,
    pub has_report: bool,
    pub has_dissent: bool,
    pub can_generate: bool,
    pub last_edited_by: Option<String>,
}

/// Generates, stores and edits minority reports
pub struct MinorityReportCompiler {
    store: Arc<dyn GovernanceStore>,
    config: Arc<GovernanceConfig>,
}

impl MinorityReportCompiler {
    pub fn new(store: Arc<dyn GovernanceStore>, config: Arc<GovernanceConfig>) -> Self {
        Self { store, config }
    }

    /// Compile the report from the current positions and store it,
    /// overwriting any earlier copy.
    pub async fn generate_report(&self, proposal_id: &str) -> GovernanceResult<MinorityReport> {
        let (proposal, positions) = self.store.proposal_with_positions(proposal_id).await?;
        let now = Utc::now();
        let content = compile_report(&proposal, &positions, now)?;

        let report = self.save_report(proposal_id, content, now).await?;
        info!(proposal_id = %proposal_id, "Minority report generated");
        Ok(report)
    }

    /// Store report text as freshly generated. Idempotent overwrite.
    pub async fn save_report(
        &self,
        proposal_id: &str,
        content: String,
        generated_at: DateTime<Utc>,
    ) -> GovernanceResult<MinorityReport> {
        let report = MinorityReport {
            proposal_id: proposal_id.to_string(),
            content,
            generated_at,
            last_edited_by: None,
            last_edited_at: None,
        };
        self.store.put_report(&report).await?;
        Ok(report)
    }

    /// Replace the report text with a moderator's edit.
    ///
    /// Callers are responsible for checking the moderator role.
    pub async fn update_report(
        &self,
        proposal_id: &str,
        new_text: &str,
        editor_id: &str,
    ) -> GovernanceResult<MinorityReport> {
        validate_identifier("editor id", editor_id)?;
        if new_text.trim().is_empty() {
            return Err(GovernanceError::validation("Report text cannot be empty"));
        }

        let mut report = self.get_report(proposal_id).await?;
        // A compiled report may already be longer than the configured cap
        let limit = self.config.max_report_length.max(report.content.chars().count());
        if new_text.chars().count() > limit {
            return Err(GovernanceError::validation(format!(
                "Report text cannot exceed {} characters", limit
            )));
        }

        let now = Utc::now();
        report.content = format!("{}{}", new_text, attribution_footer(editor_id, now));
        report.last_edited_by = Some(editor_id.to_string());
        report.last_edited_at = Some(now);

        self.store.put_report(&report).await?;
        info!(proposal_id = %proposal_id, editor = %editor_id, "Minority report edited");
        Ok(report)
    }

    /// Remove the report, returning whether one existed
    pub async fn clear_report(&self, proposal_id: &str) -> GovernanceResult<bool> {
        self.store.get_proposal(proposal_id).await?;
        let removed = self.store.delete_report(proposal_id).await?;
        debug!(proposal_id = %proposal_id, removed, "Minority report cleared");
        Ok(removed)
    }

    pub async fn get_report(&self, proposal_id: &str) -> GovernanceResult<MinorityReport> {
        self.store.get_proposal(proposal_id).await?;
        self.store
            .get_report(proposal_id)
            .await?
            .ok_or_else(|| GovernanceError::ReportNotFound(proposal_id.to_string()))
    }

    pub async fn report_status(&self, proposal_id: &str) -> GovernanceResult<ReportStatus> {
        let (proposal, positions) = self.store.proposal_with_positions(proposal_id).await?;
        let report = self.store.get_report(proposal_id).await?;
        let has_dissent = positions.iter().any(|p| p.stance.is_dissent());

        Ok(ReportStatus {
            proposal_id: proposal_id.to_string(),
            has_report: report.is_some(),
            has_dissent,
            can_generate: has_dissent && proposal.status.permits_minority_report(),
            last_edited_by: report.and_then(|r| r.last_edited_by),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProposalStatus;
    use chrono::TimeZone;

    fn decided_proposal() -> Proposal {
        let mut proposal = Proposal::new("coop", "alice", "Raise dues", "Raise monthly dues by five");
        proposal.status = ProposalStatus::Decided;
        proposal
    }

    fn position(member: &str, stance: Stance, reasoning: &str, day: u32) -> Position {
        Position {
            id: format!("pos-{}", member),
            proposal_id: "p".into(),
            member_id: member.into(),
            stance,
            reasoning: reasoning.into(),
            recorded_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_report_contains_only_dissent() {
        let positions = vec![
            position("A", Stance::Support, "backs plan", 1),
            position("B", Stance::Support, "agree", 1),
            position("C", Stance::Oppose, "budget too high", 2),
            position("D", Stance::Abstain, "", 2),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();

        let report = compile_report(&decided_proposal(), &positions, now).unwrap();

        assert!(report.starts_with("## Minority Report"));
        assert!(report.contains("1 member recorded dissent"));
        assert!(report.contains("### Opposition Statements"));
        assert!(!report.contains("### Blocking Objections"));
        assert!(report.contains("**Statement 1** (member C, recorded 2026-03-02):\n\nbudget too high"));
        assert!(!report.contains("member A"));
        assert!(!report.contains("member D"));
        assert!(report.ends_with("---\n*Generated on 2026-03-10*"));
    }

    #[test]
    fn test_blocks_listed_first_in_recorded_order() {
        let positions = vec![
            position("zed", Stance::Oppose, "Timeline is unrealistic", 3),
            position("amy", Stance::Block, "The process was unfair", 2),
            position("bo", Stance::Block, "Violates our bylaws", 1),
        ];

        let report = compile_report(&decided_proposal(), &positions, Utc::now()).unwrap();

        let bo = report.find("**Objection 1** (member bo").unwrap();
        let amy = report.find("**Objection 2** (member amy").unwrap();
        let zed = report.find("**Statement 1** (member zed").unwrap();
        assert!(bo < amy && amy < zed);
        assert!(report.contains("3 members recorded dissent on this decision: 2 blocking objections and 1 opposition statement."));
    }

    #[test]
    fn test_not_decided_signals() {
        let mut proposal = decided_proposal();
        proposal.status = ProposalStatus::Voting;
        let positions = vec![position("C", Stance::Oppose, "budget too high", 2)];

        let err = compile_report(&proposal, &positions, Utc::now()).unwrap_err();
        assert!(err.is_signal());
        assert!(matches!(
            err,
            GovernanceError::NoMinorityPositions { reason: NothingToReport::NotDecided(ProposalStatus::Voting), .. }
        ));
    }

    #[test]
    fn test_no_dissent_signals() {
        let positions = vec![position("A", Stance::Support, "", 1), position("D", Stance::Abstain, "", 1)];
        let err = compile_report(&decided_proposal(), &positions, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::NoMinorityPositions { reason: NothingToReport::NoDissent, .. }
        ));
    }

    #[test]
    fn test_attribution_footer() {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 8, 30, 0).unwrap();
        let footer = attribution_footer("mod-1", at);
        assert!(footer.starts_with("\n\n---\n*Edited by mod-1 on 2026-04-01"));
        assert!(footer.ends_with('*'));
    }
}
