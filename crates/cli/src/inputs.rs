use tracing::{info, warn};

use vigil_compute::{observations_from_records, SignalBatch};
use vigil_core::config::InputConfig;
use vigil_core::SignalType;
use vigil_storage::load_records;

/// Load baseline and recent exports for every signal.
pub fn load_batches(inputs: &InputConfig) -> Vec<SignalBatch> {
    SignalType::ALL
        .iter()
        .map(|&signal| {
            let baseline = load_signal(inputs, signal, Source::Baseline);
            let recent = load_signal(inputs, signal, Source::Recent);
            info!(
                signal = %signal,
                baseline = baseline.len(),
                recent = recent.len(),
                "signal inputs loaded"
            );
            SignalBatch::new(signal, baseline, recent)
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Source {
    Baseline,
    Recent,
}

fn load_signal(
    inputs: &InputConfig,
    signal: SignalType,
    source: Source,
) -> Vec<vigil_core::Observation> {
    let path = match source {
        Source::Baseline => inputs.baseline_path(signal),
        Source::Recent => inputs.recent_path(signal),
    };
    let batch = observations_from_records(&load_records(&path), signal);
    if batch.coerced > 0 {
        warn!(
            signal = %signal,
            path = %path.display(),
            coerced = batch.coerced,
            "malformed records coerced to zero"
        );
    }
    batch.observations
}
