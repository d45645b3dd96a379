use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use image::ImageFormat;
use parkwatch_types::{config::StreamConfig, vision::ImageFrame, ParkwatchError, Result};
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    time::{timeout, Duration},
};

use crate::{stream_error, StreamHandle, StreamSource};

const DEFAULT_FFMPEG: &str = "ffmpeg";

/// HLS (or any ffmpeg-readable) stream decoded one PNG frame at a time.
pub struct FfmpegSource {
    url: String,
    ffmpeg_path: PathBuf,
    read_timeout: Duration,
}

impl FfmpegSource {
    pub fn new(config: &StreamConfig) -> Self {
        let ffmpeg_path = config
            .ffmpeg_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));

        Self {
            url: config.url.clone(),
            ffmpeg_path,
            read_timeout: config.read_timeout(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-loglevel", "error", "-i"])
            .arg(&self.url)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl StreamSource for FfmpegSource {
    async fn open(&self) -> Result<Box<dyn StreamHandle>> {
        let child = self.command().spawn().map_err(|err| {
            stream_error(format!(
                "Failed to open video stream ({:?}): {err}",
                self.ffmpeg_path
            ))
        })?;
        Ok(Box::new(FfmpegHandle {
            child,
            read_timeout: self.read_timeout,
        }))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct FfmpegHandle {
    child: Child,
    read_timeout: Duration,
}

impl FfmpegHandle {
    /// Reads stdout to EOF while draining stderr, so a chatty ffmpeg cannot stall on a full pipe.
    async fn read_output(&mut self) -> Result<(Vec<u8>, String)> {
        let mut stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| stream_error("ffmpeg stdout already consumed"))?;
        let stderr = self.child.stderr.take();

        let read_stdout = async {
            let mut raw = Vec::new();
            stdout
                .read_to_end(&mut raw)
                .await
                .map_err(|err| stream_error(format!("ffmpeg read failed: {err}")))?;
            Ok::<_, ParkwatchError>(raw)
        };
        let read_stderr = async {
            let mut raw = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut raw).await;
            }
            String::from_utf8_lossy(&raw).trim().to_string()
        };

        let (raw, diagnostics) = tokio::join!(read_stdout, read_stderr);
        Ok((raw?, diagnostics))
    }
}

#[async_trait]
impl StreamHandle for FfmpegHandle {
    async fn read_frame(&mut self) -> Result<ImageFrame> {
        let (raw, stderr) = timeout(self.read_timeout, self.read_output())
            .await
            .map_err(|_| {
                stream_error(format!(
                    "ffmpeg timeout ({}s)",
                    self.read_timeout.as_secs()
                ))
            })??;

        if raw.is_empty() {
            return Err(stream_error(format!(
                "Failed to read frame from stream: {}",
                if stderr.is_empty() { "empty output" } else { last_line(&stderr) }
            )));
        }

        let img = image::load_from_memory_with_format(&raw, ImageFormat::Png)
            .map_err(|err| stream_error(format!("frame decoding failed: {err}")))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(ImageFrame::from_rgb(width, height, rgb.into_raw()))
    }

    async fn release(mut self: Box<Self>) {
        // Already-exited processes reject the kill; reaping still has to happen.
        let _ = self.child.start_kill();
        if let Err(err) = self.child.wait().await {
            tracing::debug!("ffmpeg reap failed: {}", err);
        }
    }
}

fn last_line(diagnostics: &str) -> &str {
    diagnostics.lines().last().unwrap_or(diagnostics)
}
