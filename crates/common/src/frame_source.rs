//! Looping video source backed by FFmpeg
//!
//! FFmpeg decodes the source to raw RGB24 on stdout; a dedicated thread reads
//! frames sequentially and publishes each one into a [`LatestFrame`] slot.
//! At end of stream the decoder is restarted from the beginning, so callers
//! see an endless sequence with no distinct end signal.

use crate::shared::LatestFrame;
use crate::vision::Frame;
use anyhow::{Context, Result};
use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay before respawning the decoder after a failed or empty pass
const RESTART_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct FrameSourceConfig {
    /// File path or stream URI understood by FFmpeg
    pub uri: String,
    /// Pace file input at its native frame rate (`-re`)
    pub realtime: bool,
    /// Restart from the beginning at end of stream
    pub looping: bool,
}

impl FrameSourceConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            realtime: true,
            looping: true,
        }
    }
}

/// Read exactly one RGB24 frame of the given size.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes of a new frame read).
pub fn read_rgb_frame<R: Read>(reader: &mut R, width: u32, height: u32) -> Result<Option<RgbImage>> {
    let frame_len = width as usize * height as usize * 3;
    let mut buf = vec![0u8; frame_len];
    let mut filled = 0;

    while filled < frame_len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => anyhow::bail!(
                "truncated frame: got {} of {} bytes",
                filled,
                frame_len
            ),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("failed to read frame bytes"),
        }
    }

    RgbImage::from_raw(width, height, buf)
        .map(Some)
        .context("frame buffer does not match dimensions")
}

/// Extract frame dimensions from a video source using ffprobe
///
/// Returns (width, height) tuple
pub fn probe_frame_dimensions(source_uri: &str) -> Result<(u32, u32)> {
    debug!(source = %source_uri, "probing video dimensions");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0",
            source_uri,
        ])
        .output()
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        anyhow::bail!("ffprobe failed: {:?}", output.status);
    }

    let output_str = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    parse_dimensions(&output_str)
}

fn parse_dimensions(output: &str) -> Result<(u32, u32)> {
    let mut parts = output.trim().split(',');
    let (Some(w), Some(h), None) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("unexpected ffprobe output format: {}", output);
    };
    let width: u32 = w.trim().parse().context("failed to parse width")?;
    let height: u32 = h.trim().parse().context("failed to parse height")?;
    if width == 0 || height == 0 {
        anyhow::bail!("video reports zero-sized frames");
    }
    Ok((width, height))
}

/// Handle to the running reader thread
pub struct FrameSource {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Probe the source and start the reader thread.
    pub fn spawn(config: FrameSourceConfig, slot: LatestFrame) -> Result<Self> {
        let (width, height) = probe_frame_dimensions(&config.uri)
            .with_context(|| format!("cannot open video source {}", config.uri))?;
        info!(source = %config.uri, width, height, "video source opened");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("frame-reader".to_string())
            .spawn(move || reader_loop(config, width, height, slot, token))
            .context("failed to spawn frame reader thread")?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("frame reader thread panicked");
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn reader_loop(
    config: FrameSourceConfig,
    width: u32,
    height: u32,
    slot: LatestFrame,
    cancel: CancellationToken,
) {
    let mut sequence = 0u64;

    while !cancel.is_cancelled() {
        let start = sequence;
        let result = decode_once(&config, width, height, &slot, &cancel, &mut sequence);
        match &result {
            Ok(()) => debug!(source = %config.uri, frames = sequence - start, "end of stream"),
            Err(e) => warn!(source = %config.uri, error = %e, "decoder failed, restarting"),
        }
        if !config.looping || cancel.is_cancelled() {
            break;
        }
        if let Some(delay) = restart_delay(&result, sequence - start) {
            std::thread::sleep(delay);
        }
    }

    info!(source = %config.uri, frames = sequence, "frame reader stopped");
}

/// Backoff before the next decoder pass. A pass that failed or produced no
/// frames would otherwise respawn ffmpeg in a tight loop.
fn restart_delay(result: &Result<()>, frames: u64) -> Option<Duration> {
    if result.is_err() || frames == 0 {
        Some(RESTART_BACKOFF)
    } else {
        None
    }
}

fn decode_once(
    config: &FrameSourceConfig,
    width: u32,
    height: u32,
    slot: &LatestFrame,
    cancel: &CancellationToken,
    sequence: &mut u64,
) -> Result<()> {
    let mut args: Vec<&str> = vec!["-loglevel", "error"];
    if config.realtime {
        args.push("-re");
    }
    args.extend([
        "-i",
        config.uri.as_str(),
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "pipe:1",
    ]);

    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to execute ffmpeg")?;

    let mut stdout = child.stdout.take().context("ffmpeg stdout not captured")?;

    let result = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }
        match read_rgb_frame(&mut stdout, width, height) {
            Ok(Some(image)) => {
                *sequence += 1;
                slot.store(Frame::new(image, *sequence));
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = child.kill() {
        debug!(error = %e, "ffmpeg already exited");
    }
    let _ = child.wait();
    result
}
