//! Live stream sampling: stream source abstraction and bounded-retry frame extraction.

mod ffmpeg;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use async_trait::async_trait;
use parkwatch_types::{config::SamplerConfig, vision::ImageFrame, ParkwatchError, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};

pub use ffmpeg::FfmpegSource;

/// A video endpoint that can be opened for reading.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn StreamHandle>>;
    fn describe(&self) -> String;
}

/// An opened stream. Callers must hand every handle back through `release`.
#[async_trait]
pub trait StreamHandle: Send {
    /// Pulls exactly one frame.
    async fn read_frame(&mut self) -> Result<ImageFrame>;
    async fn release(self: Box<Self>);
}

/// Acquires single frames from a [`StreamSource`] with linear backoff.
pub struct FrameSampler<S: StreamSource> {
    source: S,
    config: SamplerConfig,
}

impl<S: StreamSource> FrameSampler<S> {
    pub fn new(source: S, config: SamplerConfig) -> Self {
        info!("Initialized frame sampler for stream: {}", source.describe());
        Self { source, config }
    }

    /// Returns `None` once every attempt has failed; stream errors never escape.
    pub async fn extract_frame(&self) -> Option<ImageFrame> {
        let max_retries = self.config.max_retries;
        for attempt in 1..=max_retries {
            info!(
                "Extracting frame from live camera (attempt {}/{})",
                attempt, max_retries
            );
            match self.try_extract().await {
                Ok(frame) => {
                    info!(
                        "Frame extracted successfully ({}x{})",
                        frame.width, frame.height
                    );
                    return Some(frame);
                }
                Err(err) => {
                    warn!("Attempt {} failed: {}", attempt, err);
                    if attempt < max_retries {
                        sleep(self.config.retry_delay() * attempt).await;
                    }
                }
            }
        }
        error!("All {} attempts failed", max_retries);
        None
    }

    async fn try_extract(&self) -> Result<ImageFrame> {
        let mut handle = self.source.open().await?;
        let frame = handle.read_frame().await;
        handle.release().await;
        frame
    }
}

/// Failure injected into one attempt of a [`MockSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Open,
    Read,
}

#[derive(Debug, Default)]
struct MockCounters {
    open_calls: AtomicU32,
    opened: AtomicU32,
    released: AtomicU32,
}

/// In-process source serving a fixed frame, with scripted open/read failures.
#[derive(Clone)]
pub struct MockSource {
    frame: ImageFrame,
    plan: Arc<Vec<MockFailure>>,
    always_fail: bool,
    counters: Arc<MockCounters>,
}

impl MockSource {
    pub fn new(frame: ImageFrame) -> Self {
        Self {
            frame,
            plan: Arc::new(Vec::new()),
            always_fail: false,
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Attempt `n` fails with `failures[n - 1]`; later attempts succeed.
    pub fn with_failures(mut self, failures: Vec<MockFailure>) -> Self {
        self.plan = Arc::new(failures);
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn open_calls(&self) -> u32 {
        self.counters.open_calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> u32 {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u32 {
        self.counters.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamSource for MockSource {
    async fn open(&self) -> Result<Box<dyn StreamHandle>> {
        let attempt = self.counters.open_calls.fetch_add(1, Ordering::SeqCst) as usize;
        let planned = self.plan.get(attempt).copied();
        if self.always_fail || planned == Some(MockFailure::Open) {
            return Err(stream_error("Failed to open video stream"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            frame: self.frame.clone(),
            fail_read: planned == Some(MockFailure::Read),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn describe(&self) -> String {
        format!("mock://{}x{}", self.frame.width, self.frame.height)
    }
}

struct MockHandle {
    frame: ImageFrame,
    fail_read: bool,
    counters: Arc<MockCounters>,
}

#[async_trait]
impl StreamHandle for MockHandle {
    async fn read_frame(&mut self) -> Result<ImageFrame> {
        if self.fail_read {
            Err(stream_error("Failed to read frame from stream"))
        } else {
            Ok(self.frame.clone())
        }
    }

    async fn release(self: Box<Self>) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Generate an error aligned with stream access semantics.
pub fn stream_error(message: impl Into<String>) -> ParkwatchError {
    ParkwatchError::Stream(message.into())
}
