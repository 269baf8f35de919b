//! Integration tests for agreement between validators: perfect match,
//! tolerance consensus, aborted and failed rounds.
//!
//! Every test drives one engine per validator through the same sequence of
//! blocks and delivers the same proposals to each, the way the replicated
//! chain would.

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing
)]

#[allow(dead_code)]
mod common;

use chrono::{DateTime, Utc};
use common::{Calc, Node, at, committee, genesis, params, sample, state_var_id};
use floatvar_types::{ConsensusState, EventType, KeyValueBundle, Value};
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use rust_decimal_macros::dec;

// =============================================================================
// Round start
// =============================================================================

#[test]
fn market_event_starts_the_same_round_on_every_validator() {
    let mut nodes = committee(&Calc::Deferred, &[EventType::MarketEnactment]);
    for node in &mut nodes {
        node.tick(genesis());
        node.market_event(EventType::MarketEnactment);
        node.end_block();
    }

    let event_id = nodes[0].active_event().unwrap();
    let suffix = event_id.as_str().strip_prefix("asset_market_").unwrap();
    assert_eq!(suffix.len(), 32);
    assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));

    for node in &nodes {
        assert_eq!(node.active_event().as_ref(), Some(&event_id));
        let events = node.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state_var_id, state_var_id());
        assert_eq!(events[0].event_id, event_id);
        assert_eq!(events[0].state, ConsensusState::CalculationStarted);
    }
}

#[test]
fn events_of_other_markets_or_types_are_ignored() {
    let mut node = Node::new("0", Calc::Deferred);
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());

    node.market_event(EventType::AuctionEnded);
    node.engine
        .new_event("asset", "other_market", EventType::MarketEnactment);
    node.end_block();

    assert!(node.active_event().is_none());
    assert!(node.events().is_empty());
    assert_eq!(node.state(), ConsensusState::Unspecified);
}

#[test]
fn superseding_event_aborts_before_restarting() {
    let mut node = Node::new("0", Calc::Deferred);
    node.register(&[EventType::MarketEnactment, EventType::MarketUpdated]);
    node.tick(genesis());

    node.market_event(EventType::MarketEnactment);
    let first = node.active_event().unwrap();
    node.market_event(EventType::MarketUpdated);
    let second = node.active_event().unwrap();
    node.end_block();

    assert_ne!(first, second);
    let events: Vec<_> = node
        .events()
        .into_iter()
        .map(|event| (event.event_id, event.state))
        .collect();
    assert_eq!(
        events,
        vec![
            (first.clone(), ConsensusState::CalculationStarted),
            (first, ConsensusState::CalculationAborted),
            (second, ConsensusState::CalculationStarted),
        ]
    );
}

// =============================================================================
// Calculation outcome
// =============================================================================

#[test]
fn calculation_error_emits_error_and_rests() {
    let mut node = Node::new("0", Calc::Fails);
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());
    node.market_event(EventType::MarketEnactment);
    node.end_block();

    assert_eq!(
        node.states(),
        vec![ConsensusState::CalculationStarted, ConsensusState::Error]
    );
    let events = node.events();
    assert_eq!(events[0].event_id, events[1].event_id);
    assert!(node.active_event().is_none());
    assert!(node.submitted().is_empty());
}

#[test]
fn validator_proposes_its_result_for_the_active_event() {
    let mut node = Node::new("2", Calc::Returns(sample()));
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());
    node.market_event(EventType::MarketEnactment);

    let submitted = node.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].state_var_id, state_var_id());
    assert_eq!(Some(submitted[0].event_id.clone()), node.active_event());
    assert_eq!(
        submitted[0].bundle.get("param1").map(|entry| &entry.value),
        Some(&Value::Scalar(dec!(1.23456789)))
    );
}

#[test]
fn non_validator_does_not_propose_but_follows_agreement() {
    let mut observer = Node::new("observer", Calc::Returns(sample()));
    observer.register(&[EventType::MarketEnactment]);
    observer.tick(genesis());
    observer.market_event(EventType::MarketEnactment);
    assert!(observer.submitted().is_empty());

    let event_id = observer.active_event().unwrap();
    observer.deliver("1", &event_id, &sample());
    observer.deliver("4", &event_id, &sample());
    observer.end_block();

    assert_eq!(observer.results(), vec![sample()]);
    assert_eq!(
        observer.states(),
        vec![
            ConsensusState::CalculationStarted,
            ConsensusState::PerfectMatch
        ]
    );
}

#[test]
fn late_calculation_result_is_ignored() {
    let mut node = Node::new("0", Calc::Deferred);
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());

    node.market_event(EventType::MarketEnactment);
    let stale = node.take_handles().pop().unwrap();
    node.market_event(EventType::MarketEnactment);
    let current = node.take_handles().pop().unwrap();
    assert_ne!(stale.event_id(), current.event_id());

    stale.finish(Ok(sample()));
    assert!(node.submitted().is_empty());
    assert_eq!(node.state(), ConsensusState::CalculationStarted);

    current.finish(Ok(sample()));
    let submitted = node.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(&submitted[0].event_id, node.active_event().as_ref().unwrap());
}

#[tokio::test]
async fn calculation_runs_on_the_runtime() {
    let mut node = Node::new("3", Calc::Spawned(sample()));
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());
    node.market_event(EventType::MarketEnactment);

    node.join_calculations().await;

    let submitted = node.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(Some(submitted[0].event_id.clone()), node.active_event());
}

// =============================================================================
// Perfect match
// =============================================================================

#[test]
fn identical_proposals_with_quorum_are_a_perfect_match() {
    let mut nodes = committee(&Calc::Returns(sample()), &[EventType::MarketEnactment]);
    for node in &mut nodes {
        node.tick(genesis());
        node.market_event(EventType::MarketEnactment);
    }
    let event_id = nodes[0].submitted()[0].event_id.clone();
    let wrong_event = floatvar_types::EventId::new("asset_market_not-the-active-event");

    for node in &mut nodes {
        assert_eq!(node.submitted().len(), 1);

        for from in ["0", "1", "2", "3", "4"] {
            node.deliver(from, &wrong_event, &sample());
        }
        assert!(node.results().is_empty());

        for from in ["5", "6", "7", "8", "9"] {
            node.deliver(from, &event_id, &sample());
        }
        assert!(node.results().is_empty());

        node.deliver("1", &event_id, &sample());
        assert!(node.results().is_empty());
        node.deliver("4", &event_id, &sample());
        assert_eq!(node.results(), vec![sample()]);

        // Late proposals for a resolved event change nothing.
        node.deliver("0", &event_id, &sample());
        assert_eq!(node.results().len(), 1);

        node.end_block();
        assert_eq!(
            node.states(),
            vec![
                ConsensusState::CalculationStarted,
                ConsensusState::PerfectMatch
            ]
        );
        assert_eq!(node.state(), ConsensusState::PerfectMatch);
        assert!(node.active_event().is_none());
    }
}

#[test]
fn agreed_bundle_that_does_not_convert_skips_the_callback() {
    let mut node = Node::new("0", Calc::Deferred);
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());
    node.market_event(EventType::MarketEnactment);
    let event_id = node.active_event().unwrap();

    let malformed = KeyValueBundle::new().with("param1", Value::Vector(vec![dec!(1)]), dec!(1));
    node.deliver_bundle("1", &event_id, malformed.clone());
    node.deliver_bundle("4", &event_id, malformed);
    node.end_block();

    assert!(node.results().is_empty());
    assert_eq!(
        node.states(),
        vec![
            ConsensusState::CalculationStarted,
            ConsensusState::PerfectMatch
        ]
    );
}

// =============================================================================
// Tolerance consensus
// =============================================================================

#[test]
fn tolerance_consensus_accepts_the_only_well_supported_proposal() {
    // Tolerances are 1 for param1 and 2 for param2. The centre proposal of
    // validator 0 is within tolerance of the three corners, which are all out
    // of tolerance of each other; validator 4 is far from everyone.
    let centre = params(dec!(0), dec!(0));
    let proposals = [
        ("4", params(dec!(50), dec!(50))),
        ("3", params(dec!(1), dec!(-2))),
        ("2", params(dec!(-1), dec!(-2))),
        ("1", params(dec!(1), dec!(2))),
        ("0", centre.clone()),
    ];

    let mut nodes = committee(&Calc::Deferred, &[EventType::MarketEnactment]);
    for node in &mut nodes {
        node.tick(genesis());
        node.market_event(EventType::MarketEnactment);
    }

    for node in &mut nodes {
        let event_id = node.active_event().unwrap();
        for (step, (from, value)) in proposals.iter().enumerate() {
            node.deliver(from, &event_id, value);
            match step {
                0 => assert_eq!(node.state(), ConsensusState::CalculationStarted),
                1..=3 => {
                    assert_eq!(node.state(), ConsensusState::SeekingConsensus);
                    assert!(node.results().is_empty());
                }
                _ => {}
            }
        }

        assert_eq!(node.results(), vec![centre.clone()]);
        node.end_block();
        assert_eq!(
            node.states(),
            vec![
                ConsensusState::CalculationStarted,
                ConsensusState::ConsensusReached
            ]
        );
        assert!(node.active_event().is_none());
    }
}

/// Validator picked when 3 and 4 both have quorum within tolerance: the
/// first candidate drawn from the block-seeded generator once the event id
/// has been drawn from it.
fn expected_pick(block_time: DateTime<Utc>) -> &'static str {
    let seed = u64::from_be_bytes(block_time.timestamp().to_be_bytes());
    let mut rng = StdRng::seed_from_u64(seed);
    let _event_suffix: String = (&mut rng)
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    ["3", "4"][rng.random_range(0..2_usize)]
}

/// Run one round at `block_time` where every proposal is within tolerance
/// of every other one, and return what each validator accepted.
fn agree_among_close_proposals(block_time: DateTime<Utc>) -> Vec<String> {
    let proposals = [
        ("4", params(dec!(0.4), dec!(0.4))),
        ("3", params(dec!(0.3), dec!(0.3))),
        ("2", params(dec!(0.2), dec!(0.2))),
        ("1", params(dec!(0.1), dec!(0.1))),
        ("0", params(dec!(0), dec!(0))),
    ];

    let mut nodes = committee(&Calc::Deferred, &[EventType::MarketEnactment]);
    nodes
        .iter_mut()
        .map(|node| {
            node.tick(block_time);
            node.market_event(EventType::MarketEnactment);
            let event_id = node.active_event().unwrap();
            for (from, value) in &proposals {
                node.deliver(from, &event_id, value);
            }
            assert_eq!(node.state(), ConsensusState::ConsensusReached);

            let results = node.results();
            assert_eq!(results.len(), 1);
            let (picked, _) = proposals
                .iter()
                .find(|(_, value)| *value == results[0])
                .unwrap();
            (*picked).to_owned()
        })
        .collect()
}

#[test]
fn tolerance_consensus_pick_follows_the_block_seed() {
    let mut picks = std::collections::BTreeSet::new();
    for offset in 0..16 {
        let block_time = at(offset);
        let accepted = agree_among_close_proposals(block_time);

        // 4 then 3 reach quorum together and both are supported by 90.
        let expected = expected_pick(block_time);
        assert!(
            accepted.iter().all(|pick| pick == expected),
            "block {offset}: {accepted:?}, expected {expected}"
        );
        picks.insert(expected);
    }
    assert_eq!(picks.len(), 2, "the pick should vary with the block time");
}

#[test]
fn proposals_too_far_apart_keep_seeking() {
    let mut nodes = committee(&Calc::Deferred, &[EventType::MarketEnactment]);
    for node in &mut nodes {
        node.tick(genesis());
        node.market_event(EventType::MarketEnactment);
        let event_id = node.active_event().unwrap();

        for (from, offset) in [("0", dec!(0)), ("1", dec!(10)), ("2", dec!(20)), ("3", dec!(30)), ("4", dec!(40))] {
            node.deliver(from, &event_id, &params(offset, offset));
        }
        node.end_block();

        assert!(node.results().is_empty());
        assert_eq!(node.state(), ConsensusState::SeekingConsensus);
        assert_eq!(node.active_event(), Some(event_id));
        assert_eq!(node.states(), vec![ConsensusState::CalculationStarted]);
    }
}

#[test]
fn stale_is_reported_after_three_superseded_rounds() {
    let mut node = Node::new("0", Calc::Deferred);
    node.register(&[EventType::MarketEnactment]);
    node.tick(genesis());

    let mut rounds = Vec::new();
    for _ in 0..3 {
        node.market_event(EventType::MarketEnactment);
        let event_id = node.active_event().unwrap();
        node.deliver("4", &event_id, &params(dec!(0), dec!(0)));
        node.deliver("3", &event_id, &params(dec!(10), dec!(10)));
        assert_eq!(node.state(), ConsensusState::SeekingConsensus);
        rounds.push(event_id);
    }
    node.market_event(EventType::MarketEnactment);
    let last = node.active_event().unwrap();
    node.end_block();

    let events: Vec<_> = node
        .events()
        .into_iter()
        .map(|event| (event.event_id, event.state))
        .collect();
    assert_eq!(
        events,
        vec![
            (rounds[0].clone(), ConsensusState::CalculationStarted),
            (rounds[0].clone(), ConsensusState::CalculationAborted),
            (rounds[1].clone(), ConsensusState::CalculationStarted),
            (rounds[1].clone(), ConsensusState::CalculationAborted),
            (rounds[2].clone(), ConsensusState::CalculationStarted),
            (rounds[2].clone(), ConsensusState::Stale),
            (rounds[2].clone(), ConsensusState::CalculationAborted),
            (last.clone(), ConsensusState::CalculationStarted),
        ]
    );

    let id = state_var_id();
    let internal = node.engine.state_variable(&id).unwrap().internal_state();
    assert_eq!(internal.rounds_since_meaningful_update, 3);

    // Agreement resets the counter.
    node.deliver("3", &last, &sample());
    node.deliver("4", &last, &sample());
    let internal = node.engine.state_variable(&id).unwrap().internal_state();
    assert_eq!(internal.rounds_since_meaningful_update, 0);
    assert_eq!(node.results(), vec![sample()]);
}

#[test]
fn lower_vote_requirement_takes_effect_immediately() {
    let mut node = Node::new("0", Calc::Deferred);
    node.register(&[EventType::MarketEnactment]);
    node.engine
        .on_default_validators_vote_required_update(dec!(0.3));
    node.tick(genesis());
    node.market_event(EventType::MarketEnactment);
    let event_id = node.active_event().unwrap();

    node.deliver("4", &event_id, &sample());

    assert_eq!(node.results(), vec![sample()]);
    assert_eq!(node.state(), ConsensusState::PerfectMatch);
}
