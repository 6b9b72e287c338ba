//! Weighted voting over typed signals

use serde::Serialize;

use crate::models::{DeviceType, Signal, SignalSource};

/// Weight of the most reliable source; used to normalize confidence
pub const MAX_SOURCE_WEIGHT: f64 = 0.90;

/// Reliability weight of each signal source
pub fn source_weight(source: SignalSource) -> f64 {
    match source {
        SignalSource::Fingerbank => 0.90,
        SignalSource::Upnp => 0.85,
        SignalSource::Ssdp => 0.80,
        SignalSource::Mdns => 0.80,
        SignalSource::Banner => 0.75,
        SignalSource::Hostname => 0.70,
        SignalSource::Behavior => 0.65,
        SignalSource::MacAnalysis => 0.60,
        SignalSource::PortScan => 0.50,
    }
}

/// Result of an inference pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inference {
    pub device_type: DeviceType,
    /// `best_score / (signal_count * MAX_SOURCE_WEIGHT)`, clamped to [0, 1]
    pub confidence: f64,
    pub best_score: f64,
    /// Per-type scores, highest first; equal scores keep first-seen order
    pub scores: Vec<(DeviceType, f64)>,
}

impl Inference {
    fn unknown(scores: Vec<(DeviceType, f64)>) -> Self {
        Self {
            device_type: DeviceType::Unknown,
            confidence: 0.0,
            best_score: 0.0,
            scores,
        }
    }
}

/// Most likely device type for the given signals.
pub fn infer(signals: &[Signal]) -> DeviceType {
    infer_with_confidence(signals).device_type
}

/// Device type plus normalized confidence and the full score table.
///
/// Ties go to the type whose first signal appears earliest in `signals`,
/// so the result depends only on the input order.
pub fn infer_with_confidence(signals: &[Signal]) -> Inference {
    // Insertion-ordered accumulator; a handful of types at most.
    let mut scores: Vec<(DeviceType, f64)> = Vec::new();

    for signal in signals {
        if signal.suggested_type.is_unknown() {
            continue;
        }
        let weighted = signal.confidence * source_weight(signal.source);
        match scores.iter_mut().find(|(ty, _)| *ty == signal.suggested_type) {
            Some((_, score)) => *score += weighted,
            None => scores.push((signal.suggested_type, weighted)),
        }
    }

    let mut best: Option<(DeviceType, f64)> = None;
    for &(ty, score) in &scores {
        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((ty, score));
        }
    }

    let mut ordered = scores.clone();
    // sort_by is stable, so first-seen order survives among equal scores
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let Some((device_type, best_score)) = best else {
        return Inference::unknown(ordered);
    };

    let confidence = (best_score / (signals.len() as f64 * MAX_SOURCE_WEIGHT)).clamp(0.0, 1.0);

    Inference {
        device_type,
        confidence,
        best_score,
        scores: ordered,
    }
}
