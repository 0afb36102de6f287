use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use consent_core::FileStorage;
use consent_governance::{
    Caller, DisputeCategory, EvidenceType, GovernanceConfig, GovernanceError, GovernanceManager, IdentityProvider,
    ProposalStatus, ReviewDecision, Stance, StaticIdentity, Vocabulary,
};

#[derive(Parser)]
#[command(author, version, about = "Consent-based governance from the command line", long_about = None)]
struct Cli {
    /// Directory holding governance data
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Member id to act as
    #[arg(long = "as", global = true, value_name = "MEMBER")]
    member: Option<String>,

    /// Act with moderator capability
    #[arg(long, global = true)]
    moderator: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage proposals
    Proposal {
        #[command(subcommand)]
        command: ProposalCommands,
    },
    /// Record and inspect positions
    Position {
        #[command(subcommand)]
        command: PositionCommands,
    },
    /// Show the current tally for a proposal
    Tally {
        proposal_id: String,
        /// Label stances with the consent vocabulary
        #[arg(long)]
        consent_labels: bool,
    },
    /// Ask the tally to decide a voting proposal
    Decide { proposal_id: String },
    /// Manage minority reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Manage evidence and its peer validation
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommands,
    },
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// Create a proposal in draft
    Create {
        /// Scope (group) the proposal belongs to
        scope_id: String,
        title: String,
        summary: String,
    },
    /// Show a proposal
    Show { proposal_id: String },
    /// List all proposals
    List,
    /// Move a proposal to its next status
    Advance {
        proposal_id: String,
        /// research, voting, reviewed or delivery
        status: ProposalStatus,
    },
    /// Archive a proposal (moderators)
    Archive { proposal_id: String },
}

#[derive(Subcommand)]
enum PositionCommands {
    /// Record your position
    Set {
        proposal_id: String,
        /// support, oppose, abstain, block (or consent, concern)
        stance: Stance,
        #[arg(long, default_value = "")]
        reasoning: String,
    },
    /// Withdraw your position
    Withdraw { proposal_id: String },
    /// List positions on a proposal
    List { proposal_id: String },
    /// Count positions per stance
    Stats { proposal_id: String },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Compile the minority report for a decided proposal
    Generate { proposal_id: String },
    /// Show the stored report
    Show { proposal_id: String },
    /// Whether a report exists or can be generated
    Status { proposal_id: String },
    /// Replace the report text (moderators)
    Edit { proposal_id: String, text: String },
    /// Remove the report (moderators)
    Clear { proposal_id: String },
}

#[derive(Subcommand)]
enum EvidenceCommands {
    /// Attach evidence to a proposal
    Add {
        proposal_id: String,
        /// research, data, expert or precedent
        evidence_type: EvidenceType,
        title: String,
        summary: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// List evidence on a proposal
    List { proposal_id: String },
    /// Delete evidence you attached
    Delete { evidence_id: String },
    /// Vouch for an evidence item
    Verify { evidence_id: String },
    /// Dispute an evidence item
    Dispute {
        evidence_id: String,
        /// inaccurate, outdated, misleading, unreliable_source or other
        category: DisputeCategory,
        explanation: String,
    },
    /// Settle a disputed item (moderators)
    Review {
        evidence_id: String,
        /// verified, rejected or needs_update
        decision: ReviewDecision,
        reasoning: String,
    },
    /// Show the validation record of an item
    Validation { evidence_id: String },
    /// Disputed items awaiting review
    Queue,
    /// Validation counts per status
    Stats,
}

fn default_data_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("org", "consent", "consent")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine a data directory; pass --data-dir"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Host {
    manager: GovernanceManager,
    identity: StaticIdentity,
}

impl Host {
    async fn caller(&self) -> Result<Caller> {
        Ok(self.identity.current_caller().await?)
    }

    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Proposal { command } => self.proposal(command).await,
            Commands::Position { command } => self.position(command).await,
            Commands::Tally { proposal_id, consent_labels } => {
                let tally = self.manager.tally(&proposal_id).await?;
                let vocabulary = if consent_labels { Vocabulary::Consent } else { Vocabulary::Position };
                let counts: serde_json::Map<String, serde_json::Value> = tally
                    .labelled_counts(vocabulary)
                    .into_iter()
                    .map(|(label, count)| (label.to_string(), json!(count)))
                    .collect();
                print_json(&json!({
                    "proposal_id": proposal_id,
                    "counts": counts,
                    "total": tally.total,
                    "has_blocks": tally.has_blocks,
                    "threshold_met": tally.threshold_met,
                    "policy": tally.policy,
                    "support_ratio": tally.support_ratio(),
                }))
            }
            Commands::Decide { proposal_id } => {
                let caller = self.caller().await?;
                print_json(&self.manager.attempt_decide(&caller, &proposal_id).await?)
            }
            Commands::Report { command } => self.report(command).await,
            Commands::Evidence { command } => self.evidence(command).await,
        }
    }

    async fn proposal(&self, command: ProposalCommands) -> Result<()> {
        match command {
            ProposalCommands::Create { scope_id, title, summary } => {
                let caller = self.caller().await?;
                print_json(&self.manager.create_proposal(&caller, &scope_id, &title, &summary).await?)
            }
            ProposalCommands::Show { proposal_id } => print_json(&self.manager.get_proposal(&proposal_id).await?),
            ProposalCommands::List => print_json(&self.manager.list_proposals().await?),
            ProposalCommands::Advance { proposal_id, status } => {
                let caller = self.caller().await?;
                print_json(&self.manager.advance(&caller, &proposal_id, status).await?)
            }
            ProposalCommands::Archive { proposal_id } => {
                let caller = self.caller().await?;
                print_json(&self.manager.archive(&caller, &proposal_id).await?)
            }
        }
    }

    async fn position(&self, command: PositionCommands) -> Result<()> {
        match command {
            PositionCommands::Set { proposal_id, stance, reasoning } => {
                let caller = self.caller().await?;
                print_json(&self.manager.upsert_position(&caller, &proposal_id, stance, &reasoning).await?)
            }
            PositionCommands::Withdraw { proposal_id } => {
                let caller = self.caller().await?;
                let removed = self
                    .manager
                    .withdraw_position(&caller, &proposal_id, &caller.member_id)
                    .await?;
                print_json(&json!({ "proposal_id": proposal_id, "withdrawn": removed }))
            }
            PositionCommands::List { proposal_id } => print_json(&self.manager.get_positions(&proposal_id).await?),
            PositionCommands::Stats { proposal_id } => print_json(&self.manager.position_stats(&proposal_id).await?),
        }
    }

    async fn report(&self, command: ReportCommands) -> Result<()> {
        match command {
            ReportCommands::Generate { proposal_id } => {
                let caller = self.caller().await?;
                match self.manager.generate_report(&caller, &proposal_id).await {
                    Ok(report) => print_json(&report),
                    Err(GovernanceError::NoMinorityPositions { reason, .. }) => print_json(&json!({
                        "proposal_id": proposal_id,
                        "generated": false,
                        "reason": reason.to_string(),
                    })),
                    Err(e) => Err(e.into()),
                }
            }
            ReportCommands::Show { proposal_id } => {
                let report = self.manager.get_report(&proposal_id).await?;
                println!("{}", report.content);
                Ok(())
            }
            ReportCommands::Status { proposal_id } => print_json(&self.manager.report_status(&proposal_id).await?),
            ReportCommands::Edit { proposal_id, text } => {
                let caller = self.caller().await?;
                print_json(&self.manager.update_report(&caller, &proposal_id, &text).await?)
            }
            ReportCommands::Clear { proposal_id } => {
                let caller = self.caller().await?;
                let removed = self.manager.clear_report(&caller, &proposal_id).await?;
                print_json(&json!({ "proposal_id": proposal_id, "cleared": removed }))
            }
        }
    }

    async fn evidence(&self, command: EvidenceCommands) -> Result<()> {
        match command {
            EvidenceCommands::Add { proposal_id, evidence_type, title, summary, url } => {
                let caller = self.caller().await?;
                let evidence = self
                    .manager
                    .add_evidence(&caller, &proposal_id, evidence_type, &title, &summary, url.as_deref())
                    .await?;
                print_json(&evidence)
            }
            EvidenceCommands::List { proposal_id } => {
                print_json(&self.manager.get_evidence_by_proposal(&proposal_id).await?)
            }
            EvidenceCommands::Delete { evidence_id } => {
                let caller = self.caller().await?;
                let deleted = self.manager.delete_evidence(&caller, &evidence_id).await?;
                print_json(&json!({ "evidence_id": evidence_id, "deleted": deleted }))
            }
            EvidenceCommands::Verify { evidence_id } => {
                let caller = self.caller().await?;
                print_json(&self.manager.verify_evidence(&caller, &evidence_id).await?)
            }
            EvidenceCommands::Dispute { evidence_id, category, explanation } => {
                let caller = self.caller().await?;
                print_json(&self.manager.dispute_evidence(&caller, &evidence_id, category, &explanation).await?)
            }
            EvidenceCommands::Review { evidence_id, decision, reasoning } => {
                let caller = self.caller().await?;
                let record = self
                    .manager
                    .review_disputed_evidence(&caller, &evidence_id, decision, &reasoning)
                    .await?;
                print_json(&record)
            }
            EvidenceCommands::Validation { evidence_id } => {
                print_json(&self.manager.evidence_validation(&evidence_id).await?)
            }
            EvidenceCommands::Queue => print_json(&self.manager.disputed_evidence_queue().await?),
            EvidenceCommands::Stats => print_json(&self.manager.validation_stats().await?),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    consent_core::init_tracing(&cli.log_level);

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    debug!("Using data directory {}", data_dir.display());

    let config = GovernanceConfig::from_env().context("Invalid governance configuration")?;
    let storage = FileStorage::new(&data_dir)
        .await
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
    let manager = GovernanceManager::new(Arc::new(storage), config)?;

    let identity = match cli.member {
        Some(member_id) => StaticIdentity::new(Caller { member_id, is_moderator: cli.moderator }),
        None => StaticIdentity::anonymous(),
    };

    Host { manager, identity }.run(cli.command).await
}
