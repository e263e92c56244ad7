use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use ffmpeg::{ffi, format, media, Error};
use indicatif::{HumanDuration, ProgressBar};
use tracing::{info, warn};

use crate::context::Context;
use crate::error::SweepError;

const OUTPUT_LINES: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: i32,
    pub denominator: i32,
}

impl FrameRate {
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            f64::from(self.numerator) / f64::from(self.denominator)
        }
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Facts about a video file needed to drive and report a sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    pub frame_rate: FrameRate,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub extension: String,
}

impl VideoInfo {
    /// Effective bitrate in bits per second, derived from the file size.
    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn bitrate(&self) -> f64 {
        if self.duration > 0.0 {
            self.size as f64 * 8.0 / self.duration
        } else {
            0.0
        }
    }

    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    #[must_use]
    pub fn frame_count(&self) -> Option<u64> {
        let frames = (self.duration * self.frame_rate.as_f64()).round();
        (frames > 0.0).then_some(frames as u64)
    }

    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1_000_000.0
    }
}

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_precision_loss)]
pub fn probe(path: &Path) -> anyhow::Result<VideoInfo> {
    let input_context =
        format::input(&path).with_context(|| format!("Unable to open {path:?} with FFmpeg"))?;

    let (frame_rate, width, height) = {
        let input = input_context
            .streams()
            .best(media::Type::Video)
            .ok_or(Error::StreamNotFound)
            .with_context(|| format!("Unable to find video stream in {path:?}"))?;

        let rate = if input.avg_frame_rate() > ffmpeg::Rational(0, 1) {
            input.avg_frame_rate()
        } else {
            input.rate()
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(input.parameters())
            .context("Unable to create FFmpeg decoder context")?
            .decoder()
            .video()
            .context("Unable to access FFmpeg decoder video")?;

        (
            FrameRate {
                numerator: rate.numerator(),
                denominator: rate.denominator(),
            },
            decoder.width(),
            decoder.height(),
        )
    };

    let duration = input_context.duration();

    if duration <= 0 {
        return Err(anyhow!("Unable to determine the duration of {path:?}"));
    }

    let size = std::fs::metadata(path)
        .with_context(|| format!("Unable to read file size of {path:?}"))?
        .len();

    Ok(VideoInfo {
        duration: duration as f64 / f64::from(ffi::AV_TIME_BASE),
        frame_rate,
        size,
        width,
        height,
        extension: path
            .extension()
            .map(|extension| extension.to_string_lossy().to_string())
            .unwrap_or_default(),
    })
}

/// A progress report parsed from an FFmpeg `-stats` line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressEvent {
    pub frame: u64,
    pub fps: Option<f64>,
    pub time: Option<f64>,
    pub speed: Option<f64>,
}

impl ProgressEvent {
    /// Parses lines such as `frame=  240 fps= 60 q=28.0 size=512kB time=00:00:10.00 speed=2.5x`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let normalized = line.split('=').map(str::trim).collect::<Vec<_>>().join("=");

        let mut event: Option<Self> = None;
        let mut fps = None;
        let mut time = None;
        let mut speed = None;

        for (key, value) in normalized
            .split_whitespace()
            .filter_map(|field| field.split_once('='))
        {
            match key {
                "frame" => {
                    event = value.parse().ok().map(|frame| Self {
                        frame,
                        ..Self::default()
                    });
                }
                "fps" => fps = value.parse().ok(),
                "time" => time = parse_timestamp(value),
                "speed" => speed = value.trim_end_matches('x').parse().ok(),
                _ => {}
            }
        }

        event.map(|event| Self {
            fps,
            time,
            speed,
            ..event
        })
    }

    /// Estimated wall-clock time until `duration` seconds of media are processed.
    #[must_use]
    pub fn eta(&self, duration: f64) -> Option<Duration> {
        let remaining = duration - self.time?;
        let speed = self.speed.filter(|speed| *speed > 0.0)?;

        (remaining >= 0.0).then(|| Duration::from_secs_f64(remaining / speed))
    }
}

fn parse_timestamp(value: &str) -> Option<f64> {
    let mut seconds = 0.0_f64;

    for part in value.trim_start_matches('-').split(':') {
        seconds = seconds * 60.0 + part.parse::<f64>().ok()?;
    }

    Some(seconds)
}

#[must_use]
pub fn command_line(args: &[OsString]) -> String {
    std::iter::once("ffmpeg".into())
        .chain(args.iter().map(|arg| arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs FFmpeg to completion, reporting its progress on `progress_bar`.
///
/// `duration` is the amount of media FFmpeg is expected to process, used for the ETA.
pub fn run(
    context: &Context,
    label: &str,
    args: &[OsString],
    progress_bar: &ProgressBar,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    if context.show_commands {
        info!("{}", command_line(args));
    }

    let mut child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("Unable to spawn FFmpeg subprocess")?;

    let mut stderr = BufReader::new(
        child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Unable to access stderr for FFmpeg subprocess"))?,
    );

    let mut buffer = Vec::with_capacity(256);
    let mut old_buffer: VecDeque<String> = VecDeque::with_capacity(OUTPUT_LINES);

    while let Ok(bytes) = stderr.read_until(b'\r', &mut buffer) {
        if bytes == 0 {
            break;
        }

        if context.interrupt.is_set() {
            if let Err(err) = child.kill() {
                warn!("Unable to stop FFmpeg subprocess: {err}");
            }

            break;
        }

        for line in String::from_utf8_lossy(&buffer)
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
        {
            if let Some(event) = ProgressEvent::parse(line) {
                progress_bar.set_position(event.frame);

                let speed = event
                    .speed
                    .map_or_else(|| "-".to_owned(), |speed| format!("{speed:.2}x"));
                let remaining = duration
                    .and_then(|duration| event.eta(duration))
                    .map_or_else(|| "-".to_owned(), |eta| format!("{:#}", HumanDuration(eta)));

                progress_bar.set_message(format!("{speed}, {remaining} left"));
            } else {
                old_buffer.push_back(line.to_owned());
            }
        }

        while old_buffer.len() > OUTPUT_LINES {
            old_buffer.pop_front();
        }

        buffer.clear();
    }

    let status = child
        .wait()
        .context("Unable to wait for FFmpeg subprocess")?;

    progress_bar.finish_and_clear();

    if context.interrupt.is_set() {
        return Err(SweepError::Interrupted {
            label: label.to_owned(),
        }
        .into());
    }

    if !status.success() {
        return Err(SweepError::ExternalTool {
            label: label.to_owned(),
            tool: "FFmpeg",
            status,
            output: Vec::from(old_buffer).join("\n"),
        }
        .into());
    }

    Ok(())
}
