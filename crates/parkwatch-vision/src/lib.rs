//! Occupancy estimation from a single camera frame.
//!
//! Estimation runs a chain of tiers: edge contours first, adaptive-threshold
//! contours when that fails, and a time-of-day share of capacity when both
//! image tiers fail. The result is always clamped to the site capacity.

pub mod heuristics;

use chrono::{Local, Timelike};
use parkwatch_types::{
    config::{EstimatorConfig, SiteConfig},
    vision::ImageFrame,
    ParkwatchError, Result,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{error, info};

use crate::heuristics::{detect_edges, detect_threshold, frame_to_gray};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimationTier {
    Edge,
    AdaptiveThreshold,
    TimeOfDay,
}

/// Occupied spot count in `[0, total_spots]` and the tier that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub occupied: u32,
    pub tier: EstimationTier,
}

/// Supplies the local wall-clock hour used by the time-of-day default.
pub trait HourSource: Send + Sync {
    fn current_hour(&self) -> u32;
}

pub struct LocalClock;

impl HourSource for LocalClock {
    fn current_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Always reports the same hour.
pub struct FixedHour(pub u32);

impl HourSource for FixedHour {
    fn current_hour(&self) -> u32 {
        self.0
    }
}

/// Expected occupancy when no frame can be analysed.
pub fn time_of_day_default(total_spots: u32, hour: u32) -> u32 {
    let share = match hour {
        8..=17 => 0.6,
        18..=21 => 0.4,
        _ => 0.2,
    };
    ((total_spots as f64 * share).round() as u32).min(total_spots)
}

pub struct OccupancyEstimator {
    total_spots: u32,
    clock: Box<dyn HourSource>,
    rng: StdRng,
}

impl OccupancyEstimator {
    pub fn new(site: &SiteConfig, config: &EstimatorConfig) -> Self {
        let rng = match config.perturbation_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            total_spots: site.total_spots,
            clock: Box::new(LocalClock),
            rng,
        }
    }

    pub fn with_clock(mut self, clock: impl HourSource + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Edge tier, falling back to the adaptive-threshold tier on failure.
    pub fn estimate(&self, frame: &ImageFrame) -> Estimate {
        match self.edge_tier(frame) {
            Ok(occupied) => Estimate {
                occupied,
                tier: EstimationTier::Edge,
            },
            Err(err) => {
                error!("Error in edge detection: {}", err);
                self.threshold_tier(frame)
            }
        }
    }

    /// [`estimate`](Self::estimate) plus a random step in `{-1, 0, +1}`.
    ///
    /// The time-of-day default is returned as is.
    pub fn analyze(&mut self, frame: &ImageFrame) -> Estimate {
        let estimate = self.estimate(frame);
        if estimate.tier == EstimationTier::TimeOfDay {
            return estimate;
        }
        let variation: i64 = self.rng.gen_range(-1..=1);
        let occupied =
            (estimate.occupied as i64 + variation).clamp(0, self.total_spots as i64) as u32;
        Estimate {
            occupied,
            ..estimate
        }
    }

    fn edge_tier(&self, frame: &ImageFrame) -> Result<u32> {
        let gray = frame_to_gray(frame)?;
        let detection = detect_edges(&gray)?;
        let occupied = detection.candidates.min(self.total_spots);
        match detection.mean_area() {
            Some(area) => info!(
                "Edge detection: {} cars detected (avg area: {:.0})",
                occupied, area
            ),
            None => info!("Edge detection: {} cars detected", occupied),
        }
        Ok(occupied)
    }

    fn threshold_tier(&self, frame: &ImageFrame) -> Estimate {
        match frame_to_gray(frame).map(|gray| detect_threshold(&gray)) {
            Ok(detection) => {
                let occupied = detection.candidates.min(self.total_spots);
                info!(
                    "Threshold detection found {} objects, estimated {} cars",
                    detection.candidates, occupied
                );
                Estimate {
                    occupied,
                    tier: EstimationTier::AdaptiveThreshold,
                }
            }
            Err(err) => {
                error!("Error in threshold detection: {}", err);
                let hour = self.clock.current_hour();
                let occupied = time_of_day_default(self.total_spots, hour);
                info!("Using time-of-day default for hour {}: {} cars", hour, occupied);
                Estimate {
                    occupied,
                    tier: EstimationTier::TimeOfDay,
                }
            }
        }
    }
}

pub fn vision_error(message: impl Into<String>) -> ParkwatchError {
    ParkwatchError::Vision(message.into())
}
