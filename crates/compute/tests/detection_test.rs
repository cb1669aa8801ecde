//! End-to-end detection scenarios over exported activity records.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use vigil_compute::*;
use vigil_core::config::DetectionConfig;
use vigil_core::{SignalType, Status, VigilError};

/// 250 users with 0 to 2 failed logins, weighted towards 0 and 1.
fn login_baseline_records() -> Vec<Value> {
    (0..250u64)
        .map(|id| {
            let n = match id % 25 {
                0..=11 => 0,
                12..=22 => 1,
                _ => 2,
            };
            json!({"user_id": id.to_string(), "failed_logins": n})
        })
        .collect()
}

fn review_baseline_records() -> Vec<Value> {
    (0..120u64)
        .map(|id| json!({"user_id": id, "reviews_last_5m": id % 4}))
        .collect()
}

fn batch(signal: SignalType, baseline: &[Value], recent: &[Value]) -> SignalBatch {
    SignalBatch::new(
        signal,
        observations_from_records(baseline, signal).observations,
        observations_from_records(recent, signal).observations,
    )
}

fn pipeline() -> Pipeline {
    Pipeline::new(DetectionConfig::default()).unwrap()
}

// ── Scenario: extreme failed-login count ─────────────────────────────

#[test]
fn burst_of_failed_logins_is_bad() {
    let recent = vec![
        json!({"user_id": "501", "failed_logins": 47}),
        json!({"user_id": "502", "failed_logins": 1}),
    ];
    let out = pipeline()
        .run(&[batch(SignalType::FailedLogin, &login_baseline_records(), &recent)])
        .unwrap();

    assert_eq!(out.alerts.len(), 2);
    let burst = out.alerts.iter().find(|a| a.user_id == 501).unwrap();
    let normal = out.alerts.iter().find(|a| a.user_id == 502).unwrap();

    assert_eq!(burst.login_status, Some(Status::Bad));
    assert_eq!(burst.failed_logins, Some(47));
    assert_eq!(normal.login_status, Some(Status::Good));
    assert!(burst.login_anomaly_score > normal.login_anomaly_score);
    assert_eq!(out.report.bad_alerts, 1);
}

/// 250 users drawing 0, 1 or 2 failed logins with the given weights.
fn weighted_login_baseline(weights: [f64; 3], seed: u64) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..250u64)
        .map(|id| {
            let roll: f64 = rng.gen();
            let n = if roll < weights[0] {
                0
            } else if roll < weights[0] + weights[1] {
                1
            } else {
                2
            };
            json!({"user_id": id, "failed_logins": n})
        })
        .collect()
}

#[test]
fn burst_is_bad_and_single_failure_good_across_baselines() {
    let recent = vec![
        json!({"user_id": 501, "failed_logins": 47}),
        json!({"user_id": 502, "failed_logins": 1}),
    ];
    let weight_sets = [
        [0.7, 0.29, 0.01],
        [0.55, 0.43, 0.02],
        [0.5, 0.4, 0.1],
        [0.6, 0.35, 0.05],
        [0.45, 0.45, 0.1],
        [0.4, 0.5, 0.1],
    ];

    let mut failures = Vec::new();
    for weights in weight_sets {
        for seed in 0..20 {
            let baseline = weighted_login_baseline(weights, seed);
            let signals = [batch(SignalType::FailedLogin, &baseline, &recent)];

            let scored = pipeline().run(&signals).unwrap();
            let status = |user: u64| {
                scored
                    .alerts
                    .iter()
                    .find(|a| a.user_id == user)
                    .and_then(|a| a.login_status)
            };
            if status(501) != Some(Status::Bad) || status(502) != Some(Status::Good) {
                failures.push(format!("score mode {weights:?} seed {seed}"));
            }

            let labeled = pipeline()
                .with_mode(DetectionMode::Label)
                .run(&signals)
                .unwrap();
            let flagged: Vec<u64> = labeled.alerts.iter().map(|a| a.user_id).collect();
            if flagged != vec![501] {
                failures.push(format!("label mode {weights:?} seed {seed}: {flagged:?}"));
            }
        }
    }
    assert!(failures.is_empty(), "{failures:#?}");
}

// ── Scenario: disjoint signals ───────────────────────────────────────

#[test]
fn users_in_one_signal_keep_other_signal_null() {
    let logins = vec![json!({"user_id": 11, "failed_logins": 2})];
    let reviews = vec![json!({"user_id": 22, "reviews_last_5m": 1})];
    let out = pipeline()
        .run(&[
            batch(SignalType::FailedLogin, &login_baseline_records(), &logins),
            batch(SignalType::ReviewRate, &review_baseline_records(), &reviews),
        ])
        .unwrap();

    assert_eq!(out.alerts.len(), 2);
    for alert in &out.alerts {
        assert_eq!(alert.scored_signals(), 1, "{alert:?}");
    }
    let login_user = out.alerts.iter().find(|a| a.user_id == 11).unwrap();
    assert!(login_user.login_anomaly_score.is_some());
    assert_eq!(login_user.review_anomaly_score, None);
    assert_eq!(login_user.reviews_last_5m, None);
}

// ── Scenario: empty baseline ─────────────────────────────────────────

#[test]
fn empty_baseline_is_insufficient_data() {
    let recent = vec![json!({"user_id": 1, "reviews_last_5m": 9})];
    let err = pipeline()
        .run(&[batch(SignalType::ReviewRate, &[], &recent)])
        .unwrap_err();

    match err {
        PipelineError::Scoring(e) => {
            assert_eq!(e.signal, SignalType::ReviewRate);
            assert!(matches!(e.source, VigilError::InsufficientData(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn scorer_stays_untrained_after_empty_baseline() {
    let mut scorer = AnomalyScorer::from_config(SignalType::ReviewRate, &DetectionConfig::default());
    assert!(scorer.train_baseline(&[]).is_err());
    assert!(!scorer.is_trained());
}

// ── Properties ───────────────────────────────────────────────────────

#[test]
fn signal_order_does_not_change_alerts() {
    let logins = vec![
        json!({"user_id": 1, "failed_logins": 30}),
        json!({"user_id": 2, "failed_logins": 0}),
    ];
    let reviews = vec![
        json!({"user_id": 2, "reviews_last_5m": 25}),
        json!({"user_id": 3, "reviews_last_5m": 1}),
    ];
    let a = batch(SignalType::FailedLogin, &login_baseline_records(), &logins);
    let b = batch(SignalType::ReviewRate, &review_baseline_records(), &reviews);

    let forward = pipeline().run(&[a.clone(), b.clone()]).unwrap();
    let reverse = pipeline().run(&[b, a]).unwrap();
    assert_eq!(forward.alerts, reverse.alerts);
    assert_eq!(forward.alerts.len(), 3);
}

#[test]
fn malformed_records_still_score() {
    let recent = vec![
        json!({"failed_logins": "many"}),
        json!({"user_id": "x7", "failed_logins": null}),
    ];
    let parsed = observations_from_records(&recent, SignalType::FailedLogin);
    assert_eq!(parsed.coerced, 2);

    let out = pipeline()
        .run(&[batch(SignalType::FailedLogin, &login_baseline_records(), &recent)])
        .unwrap();
    // Both coerce to user 0 with a zero count and fuse into one alert.
    assert_eq!(out.scores.len(), 2);
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].user_id, 0);
    assert_eq!(out.alerts[0].failed_logins, Some(0));
}

#[test]
fn repeated_runs_are_deterministic() {
    let recent = vec![
        json!({"user_id": 1, "failed_logins": 5}),
        json!({"user_id": 2, "failed_logins": 47}),
    ];
    let run = || {
        pipeline()
            .run(&[batch(SignalType::FailedLogin, &login_baseline_records(), &recent)])
            .unwrap()
            .scores
    };
    assert_eq!(run(), run());
}
