use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tokio_test::block_on;

use consent_core::MemoryStorage;
use consent_governance::{
    compile_report, compute_tally, Caller, EvidenceType, FnPolicy, GovernanceConfig, GovernanceError,
    GovernanceManager, MinimumSupport, Position, Proposal, ProposalStatus, SimpleMajority, Stance, Supermajority,
    ThresholdPolicy, Unanimous,
};

fn stance_strategy() -> impl Strategy<Value = Stance> {
    prop_oneof![
        Just(Stance::Support),
        Just(Stance::Oppose),
        Just(Stance::Abstain),
        Just(Stance::Block),
    ]
}

fn policies() -> Vec<Box<dyn ThresholdPolicy>> {
    vec![
        Box::new(SimpleMajority),
        Box::new(Supermajority::two_thirds()),
        Box::new(Unanimous),
        Box::new(MinimumSupport { count: 1 }),
        Box::new(FnPolicy::new("always", |_, _| true)),
    ]
}

fn positions_from(stances: &[Stance]) -> Vec<Position> {
    stances
        .iter()
        .enumerate()
        .map(|(i, stance)| Position {
            id: format!("position-{}", i),
            proposal_id: "proposal-x".into(),
            member_id: format!("member-{:03}", i),
            stance: *stance,
            reasoning: format!("reasoning number {} for the record", i),
            recorded_at: Utc.with_ymd_and_hms(2026, 1, 1 + (i % 28) as u32, 0, 0, 0).unwrap(),
        })
        .collect()
}

proptest! {
    #[test]
    fn block_always_vetoes(mut stances in prop::collection::vec(stance_strategy(), 0..40), at in any::<prop::sample::Index>()) {
        let index = at.index(stances.len() + 1);
        stances.insert(index, Stance::Block);
        let positions = positions_from(&stances);

        for policy in policies() {
            let tally = compute_tally(&positions, policy.as_ref());
            prop_assert!(tally.has_blocks);
            prop_assert!(!tally.threshold_met);
        }
    }

    #[test]
    fn abstain_only_never_approves(count in 0usize..30) {
        let positions = positions_from(&vec![Stance::Abstain; count]);
        for policy in policies() {
            let tally = compute_tally(&positions, policy.as_ref());
            prop_assert_eq!(tally.total, 0);
            prop_assert!(!tally.threshold_met);
        }
    }

    #[test]
    fn counts_partition_positions(stances in prop::collection::vec(stance_strategy(), 0..60)) {
        let positions = positions_from(&stances);
        let tally = compute_tally(&positions, &SimpleMajority);
        prop_assert_eq!(tally.support + tally.oppose + tally.abstain + tally.block, positions.len());
        prop_assert_eq!(tally.total, positions.len() - tally.abstain);
    }

    #[test]
    fn report_covers_exactly_the_dissent(stances in prop::collection::vec(stance_strategy(), 1..40)) {
        let mut proposal = Proposal::new("coop", "alice", "Any title", "Any proposal summary");
        proposal.status = ProposalStatus::Decided;
        let positions = positions_from(&stances);

        match compile_report(&proposal, &positions, Utc::now()) {
            Ok(report) => {
                for position in &positions {
                    let attribution = format!("(member {}, recorded", position.member_id);
                    prop_assert_eq!(report.contains(&attribution), position.stance.is_dissent());
                }
                let dissent = positions.iter().filter(|p| p.stance.is_dissent()).count();
                let entries = report.matches("**Objection ").count() + report.matches("**Statement ").count();
                prop_assert_eq!(entries, dissent);
            }
            Err(err) => {
                prop_assert!(err.is_signal());
                prop_assert!(positions.iter().all(|p| !p.stance.is_dissent()));
            }
        }
    }

    #[test]
    fn undecided_proposals_never_produce_reports(
        stances in prop::collection::vec(stance_strategy(), 0..20),
        status in prop_oneof![
            Just(ProposalStatus::Draft),
            Just(ProposalStatus::Research),
            Just(ProposalStatus::Voting),
            Just(ProposalStatus::Archived),
        ],
    ) {
        let mut proposal = Proposal::new("coop", "alice", "Any title", "Any proposal summary");
        proposal.status = status;
        let result = compile_report(&proposal, &positions_from(&stances), Utc::now());
        prop_assert!(matches!(result, Err(GovernanceError::NoMinorityPositions { .. })), "expected NoMinorityPositions error");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn identical_upsert_is_idempotent(stance in stance_strategy(), reasoning in "[a-z][a-z ]{8,38}[a-z]") {
        block_on(async {
            let storage = Arc::new(MemoryStorage::new());
            let manager = GovernanceManager::new(storage.clone(), GovernanceConfig::default()).unwrap();
            let author = Caller::member("alice");
            let proposal = manager
                .create_proposal(&author, "coop", "Idempotence", "Checking repeated writes")
                .await
                .unwrap();

            let bob = Caller::member("bob");
            let first = manager.upsert_position(&bob, &proposal.id, stance, &reasoning).await.unwrap();
            let after_once = storage.snapshot().await;

            let second = manager.upsert_position(&bob, &proposal.id, stance, &reasoning).await.unwrap();
            let after_twice = storage.snapshot().await;

            assert_eq!(first, second);
            assert_eq!(after_once, after_twice);
        });
    }

    #[test]
    fn only_the_attacher_may_delete(owner in "[a-z]{3,8}", requester in "[a-z]{3,8}", moderator in any::<bool>()) {
        block_on(async {
            let manager = GovernanceManager::new(Arc::new(MemoryStorage::new()), GovernanceConfig::default()).unwrap();
            let proposal = manager
                .create_proposal(&Caller::member("author"), "coop", "Ownership", "Checking evidence ownership")
                .await
                .unwrap();
            let evidence = manager
                .add_evidence(
                    &Caller::member(owner.as_str()),
                    &proposal.id,
                    EvidenceType::Research,
                    "A study",
                    "A study relevant to the proposal",
                    None,
                )
                .await
                .unwrap();

            let caller = Caller { member_id: requester.clone(), is_moderator: moderator };
            let result = manager.delete_evidence(&caller, &evidence.id).await;
            if requester == owner {
                assert!(result.unwrap());
            } else {
                assert_eq!(result.unwrap_err().status_code(), 403);
            }
        });
    }
}
