use std::io::Cursor;

use rpsls_league::{
    prelude::*,
    record::{write_line, MatchLog},
    replay::ReplayReport,
};

mod common;
use common::*;

const ROUNDS: u32 = 200;

fn replay_rules(rounds: u32) -> Rules {
    RulesBuilder::new()
        .with_rounds(rounds)
        .with_token_budget(10)
        .with_action_timeout(RELAXED_TIMEOUT)
        .build()
        .unwrap()
}

fn record_match(
    rules: &Rules,
    a: &str,
    house_a: &str,
    b: &str,
    house_b: &str,
) -> (Vec<RoundRecord>, MatchSummary) {
    let mut engine = MatchEngine::new(
        rules,
        Isolation::Inline,
        (a, house::by_name(house_a).unwrap()),
        (b, house::by_name(house_b).unwrap()),
    );
    let mut records = vec![];
    let summary = engine.run(|r| records.push(r.clone())).unwrap();
    (records, summary)
}

fn validate(
    rules: &Rules,
    (a, house_a): (&str, &str),
    (b, house_b): (&str, &str),
    records: Vec<RoundRecord>,
) -> Result<ReplayReport, ReplayError> {
    ReplayValidator::new(rules, Isolation::Inline).validate(
        a,
        house::by_name(house_a).unwrap(),
        b,
        house::by_name(house_b).unwrap(),
        records.into_iter().map(Ok),
    )
}

fn bluffers() -> (Rules, Vec<RoundRecord>, MatchSummary) {
    let rules = replay_rules(ROUNDS);
    let (records, summary) = record_match(&rules, "left", "bluffer", "right", "bluffer");
    (rules, records, summary)
}

#[test]
fn recorded_match_replays() {
    init_test_logger();
    let (rules, records, summary) = bluffers();
    assert!(records.iter().any(|r| r.a_shadow));
    assert!(records.iter().any(|r| r.b_shadow));

    let report = validate(&rules, ("left", "bluffer"), ("right", "bluffer"), records).unwrap();
    assert_eq!(report.rounds, ROUNDS);
    assert_eq!(report.summary, summary);
    ReplayValidator::check_summary(&report, &summary).unwrap();
}

#[test]
fn every_house_pairing_replays() {
    let rules = replay_rules(60);
    for a in house::HOUSE_NAMES {
        for b in ["uniform", "bluffer", "frequency_counter"] {
            let (records, summary) = record_match(&rules, a, a, b, b);
            let report = validate(&rules, (a, a), (b, b), records).unwrap();
            assert_eq!(report.summary, summary, "{a} vs {b}");
        }
    }
}

#[test]
fn tampered_move_diverges() {
    let (rules, mut records, _) = bluffers();
    let logged = records[4].b_real.beats()[0];
    records[4].b_real = logged;
    match validate(&rules, ("left", "bluffer"), ("right", "bluffer"), records) {
        Err(ReplayError::Divergence {
            round,
            bot_a,
            bot_b,
            bot,
            logged: l,
            recomputed,
        }) => {
            assert_eq!(round, 5);
            assert_eq!((bot_a.as_str(), bot_b.as_str()), ("left", "right"));
            assert_eq!(bot, "right");
            assert_eq!(l, logged);
            assert_ne!(recomputed, logged);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn other_strategy_diverges() {
    let rules = replay_rules(ROUNDS);
    let (records, _) = record_match(&rules, "left", "uniform", "right", "bluffer");
    let err = validate(&rules, ("left", "frequency_counter"), ("right", "bluffer"), records)
        .unwrap_err();
    // both play uniformly during the warm-up
    assert!(
        matches!(err, ReplayError::Divergence { round, ref bot, .. } if bot == "left" && round > 10),
        "{err}"
    );
}

#[test]
fn forged_shadows_are_caught() {
    let rules = replay_rules(50);
    let (records, _) = record_match(&rules, "honest", "uniform", "liar", "bluffer");

    // uniform never asks for a shadow
    let mut forged = records.clone();
    forged[3].a_shadow = true;
    let err = validate(&rules, ("honest", "uniform"), ("liar", "bluffer"), forged).unwrap_err();
    assert!(matches!(err, ReplayError::ShadowDivergence { round: 4, .. }), "{err}");

    // a shadow the strategy did ask for, but showing something else
    let shadowed = records.iter().position(|r| r.b_shadow).expect("bluffer bluffs");
    let mut forged = records.clone();
    forged[shadowed].b_visible = Move::ALL
        .into_iter()
        .find(|m| *m != records[shadowed].b_visible)
        .unwrap();
    let err = validate(&rules, ("honest", "uniform"), ("liar", "bluffer"), forged).unwrap_err();
    assert!(matches!(err, ReplayError::ShadowDivergence { .. }), "{err}");

    // an unshadowed round must show the real move
    let plain = records.iter().position(|r| !r.b_shadow).unwrap();
    let mut forged = records.clone();
    forged[plain].b_visible = forged[plain].b_real.beats()[1];
    let err = validate(&rules, ("honest", "uniform"), ("liar", "bluffer"), forged).unwrap_err();
    assert!(matches!(err, ReplayError::InconsistentLog { .. }), "{err}");

    let mut forged = records;
    forged[0].a_bucket = Bucket::Empty;
    let err = validate(&rules, ("honest", "uniform"), ("liar", "bluffer"), forged).unwrap_err();
    assert!(matches!(err, ReplayError::InconsistentLog { round: 1, .. }), "{err}");
}

#[test]
fn short_and_long_logs_are_refused() {
    let (rules, records, _) = bluffers();

    let short = records[..150].to_vec();
    let err = validate(&rules, ("left", "bluffer"), ("right", "bluffer"), short).unwrap_err();
    assert!(matches!(err, ReplayError::Truncated { expected: ROUNDS, found: 150 }), "{err}");

    let fewer = replay_rules(100);
    let err = validate(&fewer, ("left", "bluffer"), ("right", "bluffer"), records).unwrap_err();
    assert!(matches!(err, ReplayError::InconsistentLog { round: 101, .. }), "{err}");

    let err = validate(&rules, ("left", "bluffer"), ("right", "bluffer"), vec![]).unwrap_err();
    assert!(matches!(err, ReplayError::MalformedLog { line: 0, .. }), "{err}");
}

#[test]
fn records_must_name_the_replayed_pair() {
    let (rules, records, _) = bluffers();
    let err = validate(&rules, ("right", "bluffer"), ("left", "bluffer"), records.clone())
        .unwrap_err();
    assert!(matches!(err, ReplayError::IdentityMismatch { round: 1, .. }), "{err}");

    let mut renumbered = records;
    renumbered[7].round = 9;
    let err = validate(&rules, ("left", "bluffer"), ("right", "bluffer"), renumbered).unwrap_err();
    assert!(matches!(err, ReplayError::InconsistentLog { round: 8, .. }), "{err}");
}

#[test]
fn summary_mismatch_names_the_field() {
    let (rules, records, summary) = bluffers();
    let report = validate(&rules, ("left", "bluffer"), ("right", "bluffer"), records).unwrap();

    let mut forged = summary.clone();
    forged.score_a += 1;
    let err = ReplayValidator::check_summary(&report, &forged).unwrap_err();
    assert!(matches!(err, ReplayError::SummaryMismatch { field: "score_a", .. }), "{err}");

    let mut forged = summary;
    *forged.moves_b.entry(Move::Spock).or_default() += 1;
    let err = ReplayValidator::check_summary(&report, &forged).unwrap_err();
    assert!(matches!(err, ReplayError::SummaryMismatch { field: "moves_b", .. }), "{err}");
}

#[test]
fn multi_match_log_streams_back() {
    init_test_logger();
    let rules = replay_rules(40);
    let registry = registry();
    let pairs = [("uniform", "bluffer"), ("bluffer", "frequency_counter"), ("uniform", "bluffer")];

    let mut log = vec![];
    let mut summaries = vec![];
    for (a, b) in pairs {
        let (records, summary) = record_match(&rules, a, a, b, b);
        for record in &records {
            write_line(&mut log, record).unwrap();
        }
        log.extend_from_slice(b"\n");
        summaries.push(summary);
    }

    let validator = ReplayValidator::new(&rules, Isolation::Worker);
    let matches: Vec<MatchLog> = split_matches(RecordReader::new(Cursor::new(log)))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(matches.len(), 3);
    for (log, summary) in matches.into_iter().zip(&summaries) {
        assert_eq!(log.rounds.len(), 40);
        let report = validator.validate_registered(&registry, log).unwrap();
        ReplayValidator::check_summary(&report, summary).unwrap();
    }
}

#[test]
fn malformed_lines_are_located() {
    let rules = replay_rules(5);
    let (records, _) = record_match(&rules, "a", "uniform", "b", "uniform");
    let mut log = vec![];
    for record in &records[..2] {
        write_line(&mut log, record).unwrap();
    }
    log.extend_from_slice(b"{\"round\":3,\"a_real\":\"DYNAMITE\"}\n");

    let err = ReplayValidator::new(&rules, Isolation::Inline)
        .validate(
            "a",
            house::by_name("uniform").unwrap(),
            "b",
            house::by_name("uniform").unwrap(),
            RecordReader::new(Cursor::new(log)),
        )
        .unwrap_err();
    assert!(matches!(err, ReplayError::MalformedLog { line: 3, .. }), "{err}");
}
