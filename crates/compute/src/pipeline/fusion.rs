//! Signal fusion: full outer join of per-signal results on `user_id`.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use vigil_core::{AlertRecord, AnomalyScore, Label, Observation, SignalType, UserId};

/// Join score sequences into one alert per user.
///
/// A user missing from a signal keeps `None` for that signal's columns.
/// Repeated scores for one user within a signal collapse to the highest.
/// Output is sorted by `user_id`.
pub fn fuse(signals: &[&[AnomalyScore]]) -> Vec<AlertRecord> {
    let mut best: BTreeMap<(UserId, SignalType), AnomalyScore> = BTreeMap::new();
    for score in signals.iter().flat_map(|s| s.iter()) {
        match best.entry((score.user_id, score.signal_type)) {
            Entry::Vacant(slot) => {
                slot.insert(*score);
            }
            Entry::Occupied(mut slot) => {
                if score.score > slot.get().score {
                    slot.insert(*score);
                }
            }
        }
    }

    let mut alerts: BTreeMap<UserId, AlertRecord> = BTreeMap::new();
    for ((user_id, _), score) in best {
        alerts
            .entry(user_id)
            .or_insert_with(|| AlertRecord::new(user_id))
            .set_score(&score);
    }
    alerts.into_values().collect()
}

/// Label-mode fusion: one record per user with at least one anomalous
/// observation, carrying only raw counts.
pub fn fuse_labels(signals: &[&[(Observation, Label)]]) -> Vec<AlertRecord> {
    let mut alerts: BTreeMap<UserId, AlertRecord> = BTreeMap::new();
    for (obs, _) in signals
        .iter()
        .flat_map(|s| s.iter())
        .filter(|(_, label)| *label == Label::Anomalous)
    {
        let alert = alerts
            .entry(obs.user_id)
            .or_insert_with(|| AlertRecord::new(obs.user_id));
        let keep = alert
            .count(obs.signal_type)
            .map_or(true, |c| obs.raw_value.round() as i64 > c);
        if keep {
            alert.set_count(obs.signal_type, obs.raw_value);
        }
    }
    alerts.into_values().collect()
}
