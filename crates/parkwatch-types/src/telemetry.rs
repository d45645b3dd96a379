use serde::{Deserialize, Serialize};

/// What a single update cycle ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    /// No frame could be sampled; estimation and publishing were skipped.
    Skipped,
    Published { occupied: u32, available: u32 },
    PublishFailed { occupied: u32, available: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Shutdown,
    Fault(String),
}

/// Summary reported when the update loop stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    pub cycles: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub skipped: u64,
    pub stop: StopReason,
}

impl Default for LoopReport {
    fn default() -> Self {
        Self {
            cycles: 0,
            published: 0,
            publish_failures: 0,
            skipped: 0,
            stop: StopReason::Shutdown,
        }
    }
}

impl LoopReport {
    pub fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Skipped => self.skipped += 1,
            CycleOutcome::Published { .. } => self.published += 1,
            CycleOutcome::PublishFailed { .. } => self.publish_failures += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tallies_outcomes() {
        let mut report = LoopReport::default();
        report.record(CycleOutcome::Skipped);
        report.record(CycleOutcome::Published {
            occupied: 3,
            available: 9,
        });
        report.record(CycleOutcome::PublishFailed {
            occupied: 4,
            available: 8,
        });
        assert_eq!(report.skipped, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.stop, StopReason::Shutdown);
    }
}
