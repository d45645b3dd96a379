//! Update loop coordinating frame sampling, occupancy estimation, and publishing.

use chrono::Local;
use parkwatch_sampler::{FrameSampler, StreamSource};
use parkwatch_store::{AvailabilityPublisher, StoreConnector};
use parkwatch_types::{
    config::{ParkwatchConfig, SiteConfig},
    telemetry::{CycleOutcome, LoopReport, StopReason},
    ParkwatchError, Result,
};
use parkwatch_vision::OccupancyEstimator;
use tokio::{
    sync::watch,
    time::{sleep, Duration},
};
use tracing::{error, info};

const BANNER_WIDTH: usize = 70;

/// Sample → estimate → publish → sleep, one cycle at a time.
pub struct UpdateLoop<S, C>
where
    S: StreamSource,
    C: StoreConnector,
{
    sampler: FrameSampler<S>,
    estimator: OccupancyEstimator,
    publisher: AvailabilityPublisher<C>,
    site: SiteConfig,
    update_interval: Duration,
}

impl<S, C> UpdateLoop<S, C>
where
    S: StreamSource,
    C: StoreConnector,
{
    pub fn new(
        config: &ParkwatchConfig,
        sampler: FrameSampler<S>,
        estimator: OccupancyEstimator,
        publisher: AvailabilityPublisher<C>,
    ) -> Self {
        Self {
            sampler,
            estimator,
            publisher,
            site: config.site.clone(),
            update_interval: config.schedule.update_interval(),
        }
    }

    /// Startup connectivity probe; the loop must not start when this fails.
    pub async fn boot(&self) -> Result<()> {
        info!("{}", "=".repeat(BANNER_WIDTH));
        info!("Live camera parking update service - starting");
        info!("Location ID: {}", self.site.location_id);
        info!("Total spots: {}", self.site.total_spots);
        info!("Update interval: {} seconds", self.update_interval.as_secs());
        info!("Store: {}", self.publisher.connector().describe());
        info!("{}", "=".repeat(BANNER_WIDTH));

        if let Err(err) = self.publisher.probe().await {
            error!("Cannot start - initial store connection failed: {}", err);
            return Err(err);
        }
        info!("Initial store connection test successful");
        Ok(())
    }

    /// One cycle without the inter-cycle sleep.
    ///
    /// Sampling and publishing failures are reported through the outcome;
    /// only invariant violations come back as errors.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let Some(frame) = self.sampler.extract_frame().await else {
            error!("Failed to extract frame from camera");
            info!("Skipping this update cycle");
            return Ok(CycleOutcome::Skipped);
        };

        let estimate = self.estimator.analyze(&frame);
        let occupied = estimate.occupied;
        let available = self.available_spots(occupied)?;
        info!(
            "Camera analysis ({:?} tier): occupied {} cars, available {} spots, occupancy rate {:.1}%",
            estimate.tier,
            occupied,
            available,
            occupied as f64 / self.site.total_spots as f64 * 100.0
        );

        let count = i32::try_from(available)
            .map_err(|_| orchestrator_error(format!("available count {available} overflows i32")))?;
        if self
            .publisher
            .publish(&self.site.location_id, count)
            .await
        {
            info!("Successfully updated store");
            Ok(CycleOutcome::Published {
                occupied,
                available,
            })
        } else {
            error!("Failed to update store");
            Ok(CycleOutcome::PublishFailed {
                occupied,
                available,
            })
        }
    }

    /// Single diagnostic cycle; fails when no frame can be sampled.
    pub async fn run_once(&mut self) -> Result<CycleOutcome> {
        match self.run_cycle().await? {
            CycleOutcome::Skipped => Err(orchestrator_error("could not extract frame")),
            outcome => Ok(outcome),
        }
    }

    /// Probes the store, then cycles until `shutdown` flips to `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<LoopReport> {
        self.boot().await?;

        let mut report = LoopReport::default();
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            report.cycles += 1;
            info!("{}", "=".repeat(BANNER_WIDTH));
            info!(
                "Update #{} - {}",
                report.cycles,
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );

            match self.run_cycle().await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    error!("Unexpected error: {}", err);
                    info!("Service stopped due to error after {} updates", report.cycles);
                    report.stop = StopReason::Fault(err.to_string());
                    return Ok(report);
                }
            }

            info!(
                "Waiting {} seconds until next update...",
                self.update_interval.as_secs()
            );
            tokio::select! {
                _ = sleep(self.update_interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Received shutdown signal");
        info!("Total updates performed: {}", report.cycles);
        info!("Shutdown complete");
        Ok(report)
    }

    fn available_spots(&self, occupied: u32) -> Result<u32> {
        self.site.total_spots.checked_sub(occupied).ok_or_else(|| {
            orchestrator_error(format!(
                "estimate of {occupied} occupied exceeds capacity {}",
                self.site.total_spots
            ))
        })
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone without a request: nobody can stop us any more.
            std::future::pending::<()>().await;
        }
    }
}

pub fn orchestrator_error(message: impl Into<String>) -> ParkwatchError {
    ParkwatchError::Orchestrator(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkwatch_sampler::MockSource;
    use parkwatch_store::MemoryStore;
    use parkwatch_types::{config::EstimatorConfig, vision::ImageFrame};
    use parkwatch_vision::FixedHour;

    fn config() -> ParkwatchConfig {
        let mut config = ParkwatchConfig::default();
        config.estimator.perturbation_seed = Some(11);
        config
    }

    fn frame_with_boxes(width: u32, height: u32, boxes: &[(u32, u32, u32, u32)]) -> ImageFrame {
        let mut data = vec![40; (width * height * 3) as usize];
        for &(x, y, w, h) in boxes {
            for py in y..y + h {
                for px in x..x + w {
                    let offset = ((py * width + px) * 3) as usize;
                    data[offset..offset + 3].fill(220);
                }
            }
        }
        ImageFrame::from_rgb(width, height, data)
    }

    fn three_cars() -> ImageFrame {
        frame_with_boxes(
            360,
            120,
            &[(20, 40, 60, 40), (140, 40, 60, 40), (260, 40, 60, 40)],
        )
    }

    fn build(
        config: &ParkwatchConfig,
        source: &MockSource,
        store: &MemoryStore,
        estimator_spots: u32,
    ) -> UpdateLoop<MockSource, MemoryStore> {
        let mut site = config.site.clone();
        site.total_spots = estimator_spots;
        let estimator = OccupancyEstimator::new(
            &site,
            &EstimatorConfig {
                perturbation_seed: Some(11),
            },
        )
        .with_clock(FixedHour(10));
        UpdateLoop::new(
            config,
            FrameSampler::new(source.clone(), config.sampler.clone()),
            estimator,
            AvailabilityPublisher::new(store.clone(), &config.store),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn three_cars_are_published_as_availability() {
        let config = config();
        let source = MockSource::new(three_cars());
        let store = MemoryStore::new();
        let mut update_loop = build(&config, &source, &store, 12);

        let outcome = update_loop.run_cycle().await.unwrap();
        let CycleOutcome::Published {
            occupied,
            available,
        } = outcome
        else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!((2..=4).contains(&occupied));
        assert_eq!(available, 12 - occupied);

        let puts = store.snapshot_puts().await;
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].cells[0].value, (available as i32).to_be_bytes().to_vec());
        assert_eq!(store.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sampling_skips_publishing() {
        let config = config();
        let source = MockSource::new(three_cars()).always_failing();
        let store = MemoryStore::new();
        let mut update_loop = build(&config, &source, &store, 12);

        assert_eq!(update_loop.run_cycle().await.unwrap(), CycleOutcome::Skipped);
        assert_eq!(source.open_calls(), 3);
        assert_eq!(store.connects(), 0);
        assert!(store.snapshot_puts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_put_is_reported_not_raised() {
        let config = config();
        let source = MockSource::new(three_cars());
        let store = MemoryStore::new();
        store.set_fail_put(true);
        let mut update_loop = build(&config, &source, &store, 12);

        let outcome = update_loop.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::PublishFailed { .. }));
        assert_eq!(store.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_frame_publishes_time_of_day_default() {
        let config = config();
        let source = MockSource::new(ImageFrame::from_rgb(64, 48, vec![0; 5]));
        let store = MemoryStore::new();
        let mut update_loop = build(&config, &source, &store, 12);

        assert_eq!(
            update_loop.run_cycle().await.unwrap(),
            CycleOutcome::Published {
                occupied: 7,
                available: 5
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_and_reports_cycles() {
        let config = config();
        let source = MockSource::new(three_cars());
        let store = MemoryStore::new();
        let mut update_loop = build(&config, &source, &store, 12);

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            sleep(Duration::from_secs(150)).await;
            let _ = tx.send(true);
        });

        let report = update_loop.run(rx).await.unwrap();
        // Cycles start at 0s, 60s and 120s; the signal lands during the third sleep.
        assert_eq!(report.cycles, 3);
        assert_eq!(report.published, 3);
        assert_eq!(report.stop, StopReason::Shutdown);
        // One probe plus one connection per cycle, each closed.
        assert_eq!(store.connects(), 4);
        assert_eq!(store.closes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_and_failed_cycles_keep_the_loop_running() {
        let config = config();
        let source = MockSource::new(three_cars()).always_failing();
        let store = MemoryStore::new();
        let mut update_loop = build(&config, &source, &store, 12);

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            // Each skipped cycle spends 15s in backoff before the 60s sleep.
            sleep(Duration::from_secs(200)).await;
            let _ = tx.send(true);
        });

        let report = update_loop.run(rx).await.unwrap();
        assert_eq!(report.cycles, 3);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.published, 0);
        assert_eq!(store.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_aborts_startup() {
        let config = config();
        let source = MockSource::new(three_cars());
        let store = MemoryStore::new();
        store.set_fail_connect(true);
        let mut update_loop = build(&config, &source, &store, 12);

        let (_tx, rx) = watch::channel(false);
        let err = update_loop.run(rx).await.unwrap_err();
        assert!(matches!(err, ParkwatchError::Store(_)));
        assert_eq!(source.open_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_first_cycle_runs_nothing() {
        let config = config();
        let source = MockSource::new(three_cars());
        let store = MemoryStore::new();
        let mut update_loop = build(&config, &source, &store, 12);

        let (_tx, rx) = watch::channel(true);
        let report = update_loop.run(rx).await.unwrap();
        assert_eq!(report.cycles, 0);
        assert_eq!(source.open_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn estimate_beyond_capacity_stops_the_loop() {
        let config = config();
        let mut boxes = Vec::new();
        for row in 0..4 {
            for col in 0..5 {
                boxes.push((20 + col * 80, 20 + row * 80, 40, 30));
            }
        }
        let source = MockSource::new(frame_with_boxes(420, 340, &boxes));
        let store = MemoryStore::new();
        // Estimator sized for a bigger lot than the site being reported.
        let mut update_loop = build(&config, &source, &store, 40);

        let (_tx, rx) = watch::channel(false);
        let report = update_loop.run(rx).await.unwrap();
        assert_eq!(report.cycles, 1);
        assert!(matches!(report.stop, StopReason::Fault(_)));
        assert!(store.snapshot_puts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_once_requires_a_frame() {
        let config = config();
        let store = MemoryStore::new();

        let failing = MockSource::new(three_cars()).always_failing();
        let mut update_loop = build(&config, &failing, &store, 12);
        assert!(update_loop.run_once().await.is_err());

        let working = MockSource::new(three_cars());
        let mut update_loop = build(&config, &working, &store, 12);
        assert!(matches!(
            update_loop.run_once().await.unwrap(),
            CycleOutcome::Published { .. }
        ));
        // No startup probe in one-shot mode.
        assert_eq!(store.connects(), 1);
    }
}
