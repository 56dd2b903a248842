use std::time::{Duration, Instant};

use rpsls_league::{
    deception::BucketThresholds,
    engine::MatchPhase,
    error::MatchError,
    prelude::*,
};

mod common;
use common::*;

fn shadow_rules(rounds: u32, budget: u32, reject: f64) -> Rules {
    RulesBuilder::new()
        .with_rounds(rounds)
        .with_token_budget(budget)
        .with_shadow_reject_prob(reject)
        .with_action_timeout(RELAXED_TIMEOUT)
        .build()
        .unwrap()
}

fn play_all(engine: &mut MatchEngine) -> (Vec<RoundRecord>, MatchSummary) {
    let mut records = vec![];
    let summary = engine.run(|r| records.push(r.clone())).unwrap();
    (records, summary)
}

#[test]
fn beater_wins_every_round() {
    init_test_logger();
    for isolation in [Isolation::Inline, Isolation::Worker] {
        let mut engine = MatchEngine::new(
            &rules(3),
            isolation,
            ("rocky", Box::new(Fixed(Move::Rock))),
            ("beater", Box::new(Beater(Move::Rock))),
        );
        let (records, summary) = play_all(&mut engine);
        assert_eq!((summary.score_a, summary.score_b), (-3, 3));
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.b_real.beats().contains(&Move::Rock)));
        assert_eq!(summary.moves_a.get(&Move::Rock), Some(&3));
        assert_eq!(summary.moves_a.len(), 1);
        assert_eq!((summary.tokens_used_a, summary.tokens_used_b), (0, 0));
        assert_eq!(summary.shadow_efficiency_a, 0.0);
        assert_eq!(engine.phase(), MatchPhase::Completed);
    }
}

#[test]
fn bucket_examples() {
    let thresholds = BucketThresholds::default();
    assert_eq!(thresholds.classify(50), Bucket::High);
    assert_eq!(thresholds.classify(40), Bucket::High);
    assert_eq!(thresholds.classify(39), Bucket::Medium);
    assert_eq!(thresholds.classify(15), Bucket::Low);
    assert_eq!(thresholds.classify(1), Bucket::Low);
    assert_eq!(thresholds.classify(0), Bucket::Empty);
}

#[test]
fn tokens_run_out_and_buckets_follow() {
    init_test_logger();
    let mut engine = MatchEngine::new(
        &shadow_rules(6, 3, 0.0),
        Isolation::Inline,
        (
            "liar",
            Box::new(Shadower {
                real: Move::Rock,
                shadow: Move::Paper,
            }),
        ),
        ("honest", Box::new(Fixed(Move::Scissors))),
    );
    let (records, summary) = play_all(&mut engine);

    let shadows: Vec<bool> = records.iter().map(|r| r.a_shadow).collect();
    assert_eq!(shadows, [true, true, true, false, false, false]);
    let buckets: Vec<Bucket> = records.iter().map(|r| r.a_bucket).collect();
    assert_eq!(
        buckets,
        [
            Bucket::Low,
            Bucket::Low,
            Bucket::Empty,
            Bucket::Empty,
            Bucket::Empty,
            Bucket::Empty
        ]
    );
    for r in &records {
        assert_eq!(r.a_real, Move::Rock);
        assert_eq!(r.a_visible, if r.a_shadow { Move::Paper } else { Move::Rock });
        assert!(!r.b_shadow);
        assert_eq!(r.b_bucket, Bucket::Low);
    }
    assert_eq!(summary.tokens_used_a, 3);
    assert_eq!(summary.shadow_efficiency_a, 1.0);
    // scored on real moves: rock crushes scissors every round
    assert_eq!((summary.score_a, summary.score_b), (6, -6));
    assert_eq!(engine.tokens_left(), (0, 3));
    // one draw per funded attempt, none once the pool is empty
    assert_eq!(engine.stream_draws(), (Some(3), Some(0)));
}

#[test]
fn certain_rejection_still_costs_a_draw() {
    let mut engine = MatchEngine::new(
        &shadow_rules(10, 5, 1.0),
        Isolation::Inline,
        (
            "liar",
            Box::new(Shadower {
                real: Move::Lizard,
                shadow: Move::Spock,
            }),
        ),
        ("honest", Box::new(Fixed(Move::Lizard))),
    );
    let (records, summary) = play_all(&mut engine);
    assert!(records.iter().all(|r| !r.a_shadow && r.a_visible == Move::Lizard));
    assert_eq!(summary.tokens_used_a, 0);
    assert_eq!(engine.tokens_left(), (5, 5));
    assert_eq!(engine.stream_draws(), (Some(10), Some(0)));
}

#[test]
fn empty_budget_never_draws() {
    let mut engine = MatchEngine::new(
        &shadow_rules(4, 0, 0.0),
        Isolation::Inline,
        (
            "liar",
            Box::new(Shadower {
                real: Move::Paper,
                shadow: Move::Rock,
            }),
        ),
        ("honest", Box::new(Fixed(Move::Paper))),
    );
    let (records, summary) = play_all(&mut engine);
    assert!(records.iter().all(|r| !r.a_shadow && r.a_bucket == Bucket::Empty));
    assert_eq!(summary.shadow_efficiency_a, 0.0);
    assert_eq!(engine.stream_draws(), (Some(0), Some(0)));
}

#[test]
fn opponents_only_see_visible_moves() {
    let (recorder, views) = Recorder::new();
    let mut engine = MatchEngine::new(
        &shadow_rules(5, 2, 0.0),
        Isolation::Worker,
        (
            "liar",
            Box::new(Shadower {
                real: Move::Rock,
                shadow: Move::Paper,
            }),
        ),
        ("watcher", Box::new(recorder)),
    );
    let (records, _) = play_all(&mut engine);
    let views = views.lock().unwrap().clone();
    assert_eq!(views.len(), 5);

    assert_eq!(views[0].round, 1);
    assert_eq!(views[0].opponent_last_visible, None);
    assert_eq!(views[0].own_last_real, None);
    assert_eq!(views[0].opponent_bucket, Bucket::Low);
    for (view, previous) in views[1..].iter().zip(&records) {
        assert_eq!(view.round, previous.round + 1);
        assert_eq!(view.opponent_last_visible, Some(previous.a_visible));
        assert_eq!(view.own_last_real, Some(previous.b_real));
        assert_eq!(view.opponent_bucket, previous.a_bucket);
    }
    // the first two rounds were shadowed, so the watcher saw paper twice
    assert_eq!(views[1].opponent_last_visible, Some(Move::Paper));
    assert_eq!(views[2].opponent_last_visible, Some(Move::Paper));
    assert_eq!(views[3].opponent_last_visible, Some(Move::Rock));
    assert_eq!(views[3].opponent_bucket, Bucket::Empty);
}

#[test]
fn runaway_strategy_does_not_stall_the_match() {
    init_test_logger();
    let rules = RulesBuilder::new()
        .with_rounds(3)
        .with_action_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut engine = MatchEngine::new(
        &rules,
        Isolation::Worker,
        ("sleeper", Box::new(Sleeper)),
        ("paper", Box::new(Fixed(Move::Paper))),
    );
    let start = Instant::now();
    let (records, summary) = play_all(&mut engine);
    assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());

    assert!(records.iter().all(|r| r.a_real == Move::DEFAULT));
    assert_eq!((summary.score_a, summary.score_b), (-3, 3));
    let (stats, _) = engine.guard_stats();
    assert_eq!(stats.timeouts, 1);
    // still asleep after round 1's move: its shadow request and later calls are skipped
    assert_eq!(stats.unavailable, 5);
    assert_eq!(engine.stream_draws().0, None);
}

#[test]
fn one_slow_move_costs_one_round() {
    let rules = RulesBuilder::new()
        .with_rounds(6)
        .with_action_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let play = |isolation| {
        let mut engine = MatchEngine::new(
            &rules,
            isolation,
            ("slow_once", Box::new(SlowOnce::new(Duration::from_millis(500), Move::Paper))),
            ("rock", Box::new(Fixed(Move::Rock))),
        );
        let (records, summary) = play_all(&mut engine);
        assert_eq!(engine.guard_stats().0.timeouts, 1);
        assert!(engine.stream_draws().0.is_some());
        (records, summary)
    };

    let (inline, inline_summary) = play(Isolation::Inline);
    let a_real: Vec<Move> = inline.iter().map(|r| r.a_real).collect();
    let mut expected = vec![Move::Paper; 6];
    expected[0] = Move::DEFAULT;
    assert_eq!(a_real, expected);
    assert_eq!((inline_summary.score_a, inline_summary.score_b), (5, -5));

    let (worker, worker_summary) = play(Isolation::Worker);
    assert_eq!(worker, inline);
    assert_eq!(worker_summary, inline_summary);
}

#[test]
fn faults_become_the_default_move() {
    let mut engine = MatchEngine::new(
        &rules(4),
        Isolation::Inline,
        ("faulty", Box::new(Faulty)),
        ("scissors", Box::new(Fixed(Move::Scissors))),
    );
    let (records, summary) = play_all(&mut engine);
    assert!(records.iter().all(|r| r.a_real == Move::Rock && !r.a_shadow));
    assert_eq!((summary.score_a, summary.score_b), (4, -4));
    assert_eq!(engine.guard_stats().0.faults, 8);
}

#[test]
fn malformed_move_aborts_the_match() {
    init_test_logger();
    let mut engine = MatchEngine::new(
        &rules(10),
        Isolation::Inline,
        ("rock", Box::new(Fixed(Move::Rock))),
        ("garbage", Box::new(Garbage { round: 3 })),
    );
    assert!(engine.play_round().unwrap().is_some());
    assert!(engine.play_round().unwrap().is_some());
    let expected = MatchError::MalformedMove {
        round: 3,
        bot: "garbage".to_string(),
        token: "DYNAMITE".to_string(),
    };
    assert_eq!(engine.play_round().unwrap_err(), expected);
    assert_eq!(engine.phase(), MatchPhase::Aborted);
    assert_eq!(engine.play_round().unwrap_err(), expected);
    assert!(engine.summary().is_none());
    assert_eq!(engine.scores(), (-2, 2));

    let mut engine = MatchEngine::new(
        &rules(10),
        Isolation::Worker,
        ("rock", Box::new(Fixed(Move::Rock))),
        ("garbage", Box::new(Garbage { round: 1 })),
    );
    assert!(matches!(
        engine.run(|_| {}),
        Err(MatchError::MalformedMove { round: 1, .. })
    ));
}

#[test]
fn same_pairing_plays_the_same_match() {
    let rules = rules(300);
    let play = |a: &str, b: &str| {
        let mut engine = MatchEngine::new(
            &rules,
            Isolation::Inline,
            (a, house::by_name("bluffer").unwrap()),
            (b, house::by_name("frequency_counter").unwrap()),
        );
        play_all(&mut engine)
    };

    let (first, summary) = play("one", "two");
    let (second, again) = play("one", "two");
    assert_eq!(first, second);
    assert_eq!(summary, again);
    assert_eq!(summary.score_a + summary.score_b, 0);
    let played: u32 = summary.moves_a.values().sum();
    assert_eq!(played, 300);

    // other identities, other streams
    let (swapped, _) = play("two", "one");
    let moves = |records: &[RoundRecord]| -> Vec<(Move, Move)> {
        records.iter().map(|r| (r.a_real, r.b_real)).collect()
    };
    assert_ne!(moves(&first), moves(&swapped));
}

#[test]
fn salt_changes_the_match() {
    let play = |salt: &str| {
        let rules = RulesBuilder::new()
            .with_rounds(100)
            .with_seed_salt(salt)
            .with_action_timeout(RELAXED_TIMEOUT)
            .build()
            .unwrap();
        let mut engine = MatchEngine::new(
            &rules,
            Isolation::Inline,
            ("a", house::by_name("uniform").unwrap()),
            ("b", house::by_name("uniform").unwrap()),
        );
        play_all(&mut engine).0
    };
    assert_eq!(play("x"), play("x"));
    assert_ne!(play("x"), play("y"));
}
