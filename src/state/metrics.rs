use std::time::Duration;

use dashmap::DashMap;

use crate::dto::health::BroadcastLatency;

#[derive(Debug, Default, Clone, Copy)]
struct LatencyStats {
    count: u64,
    total_ms: f64,
    max_ms: f64,
    last_ms: f64,
}

/// Per event kind latency between snapshot receipt and push completion.
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    stats: DashMap<&'static str, LatencyStats>,
}

impl LatencyRecorder {
    /// Recorder with no observations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation for `kind`.
    pub fn record(&self, kind: &'static str, latency: Duration) {
        let ms = latency.as_secs_f64() * 1_000.0;
        let mut entry = self.stats.entry(kind).or_default();
        entry.count += 1;
        entry.total_ms += ms;
        entry.max_ms = entry.max_ms.max(ms);
        entry.last_ms = ms;
    }

    /// Summaries sorted by event kind.
    pub fn snapshot(&self) -> Vec<BroadcastLatency> {
        let mut summaries: Vec<BroadcastLatency> = self
            .stats
            .iter()
            .map(|entry| {
                let stats = entry.value();
                BroadcastLatency {
                    kind: (*entry.key()).to_string(),
                    count: stats.count,
                    mean_ms: if stats.count == 0 {
                        0.0
                    } else {
                        stats.total_ms / stats.count as f64
                    },
                    max_ms: stats.max_ms,
                    last_ms: stats.last_ms,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.kind.cmp(&b.kind));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_per_kind() {
        let recorder = LatencyRecorder::new();
        recorder.record("PhaseChanged", Duration::from_millis(4));
        recorder.record("PhaseChanged", Duration::from_millis(2));
        recorder.record("IdleState", Duration::from_millis(1));

        let summaries = recorder.snapshot();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].kind, "IdleState");
        let phase = &summaries[1];
        assert_eq!(phase.count, 2);
        assert!((phase.mean_ms - 3.0).abs() < 1e-9);
        assert!((phase.max_ms - 4.0).abs() < 1e-9);
        assert!((phase.last_ms - 2.0).abs() < 1e-9);
    }
}
