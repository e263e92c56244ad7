use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tracing::{info, warn};

use crate::config::{file_name, Config};
use crate::context::Context;
use crate::error::SweepError;
use crate::ffmpeg::{self, VideoInfo};
use crate::util::{remove_stale, verify_directory};

const OVERVIEW_NAME: &str = "Overview_Video.mkv";
const CLIP_LIST: &str = "clips.txt";

fn lossless_video() -> [OsString; 4] {
    ["-c:v", "ffv1", "-level", "3"].map(OsString::from)
}

/// `<stem> [<N>s].mkv`
#[must_use]
pub fn truncated_name(source: &Path, seconds: f64) -> String {
    let stem = source
        .file_stem()
        .map_or_else(|| "reference".into(), |stem| stem.to_string_lossy());

    format!("{stem} [{seconds}s].mkv")
}

#[must_use]
pub fn truncate_arguments(source: &Path, seconds: f64, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![];

    args.extend(["-hide_banner", "-loglevel", "error", "-stats", "-y"].map(OsString::from));
    args.push("-i".into());
    args.push(source.into());
    args.extend(["-map", "0:V", "-map", "0:a?", "-map", "0:s?"].map(OsString::from));
    args.push("-t".into());
    args.push(seconds.to_string().into());
    args.extend(lossless_video());
    args.extend(["-c:a", "copy", "-c:s", "copy"].map(OsString::from));
    args.push(output.into());

    args
}

/// Losslessly cuts the first `seconds` of `source` into the output directory.
pub fn truncate(
    context: &Context,
    source: &Path,
    info: &VideoInfo,
    seconds: f64,
    output_directory: &Path,
) -> anyhow::Result<PathBuf> {
    let output = output_directory.join(truncated_name(source, seconds));
    let temporary_output = output.with_extension("tmp.mkv");
    remove_stale(&temporary_output)?;

    info!("Creating a lossless {seconds}s cut of {source:?}...");

    let length = seconds.min(info.duration);
    let frames = VideoInfo {
        duration: length,
        ..info.clone()
    }
    .frame_count();

    let progress_bar = context.progress_bar(frames, "Truncating...")?;

    if let Err(err) = ffmpeg::run(
        context,
        "the truncated reference",
        &truncate_arguments(source, seconds, &temporary_output),
        &progress_bar,
        Some(length),
    ) {
        remove_stale(&temporary_output)?;
        return Err(err);
    }

    fs::rename(&temporary_output, &output)
        .with_context(|| format!("Unable to rename {temporary_output:?} to {output:?}"))?;

    info!("Done, output file: {output:?}");

    Ok(output)
}

/// Start times of every overview clip. Fails when not even one clip fits.
#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn clip_positions(duration: f64, interval: u32) -> Result<Vec<u32>, SweepError> {
    if f64::from(interval) > duration {
        return Err(SweepError::Overview(format!(
            "the interval ({interval}s) is longer than the video ({duration:.2}s)"
        )));
    }

    let count = (duration / f64::from(interval)).floor() as u32;

    Ok((0..count).map(|index| index * interval).collect())
}

fn clip_arguments(source: &Path, start: u32, clip_length: u32, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![];

    args.extend(["-hide_banner", "-loglevel", "error", "-y"].map(OsString::from));
    args.push("-ss".into());
    args.push(start.to_string().into());
    args.push("-i".into());
    args.push(source.into());
    args.extend(["-map", "0:V:0"].map(OsString::from));
    args.push("-t".into());
    args.push(clip_length.to_string().into());
    args.extend(lossless_video());
    args.push(output.into());

    args
}

fn concat_arguments(list: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![];

    args.extend(
        ["-hide_banner", "-loglevel", "error", "-y", "-f", "concat", "-safe", "0", "-i"]
            .map(OsString::from),
    );
    args.push(list.into());
    args.extend(["-c", "copy"].map(OsString::from));
    args.push(output.into());

    args
}

/// Concat demuxer list. Entries are resolved relative to the list, which sits next to the clips.
fn clip_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| format!("file '{}'\n", file_name(clip).replace('\'', r"'\''")))
        .collect()
}

fn overview_failure(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<SweepError>() {
        Ok(SweepError::Interrupted { label }) => SweepError::Interrupted { label }.into(),
        Ok(other) => SweepError::Overview(other.to_string()).into(),
        Err(other) => SweepError::Overview(format!("{other:#}")).into(),
    }
}

/// Builds a reference from `clip_length`-second clips taken every `interval` seconds.
pub fn overview(
    context: &Context,
    source: &Path,
    info: &VideoInfo,
    interval: u32,
    clip_length: u32,
    output_directory: &Path,
) -> anyhow::Result<PathBuf> {
    let positions = clip_positions(info.duration, interval)?;

    build_overview(context, source, &positions, interval, clip_length, output_directory)
        .map_err(overview_failure)
}

fn build_overview(
    context: &Context,
    source: &Path,
    positions: &[u32],
    interval: u32,
    clip_length: u32,
    output_directory: &Path,
) -> anyhow::Result<PathBuf> {
    let clips_directory = output_directory.join("clips");
    verify_directory(&clips_directory)?;

    info!(
        "Creating an overview video from {} clips of {clip_length}s every {interval}s...",
        positions.len()
    );

    let progress_bar = context.progress_bar(
        Some(u64::try_from(positions.len()).unwrap_or(u64::MAX)),
        "Extracting clips...",
    )?;
    let hidden = indicatif::ProgressBar::hidden();
    let mut clips = Vec::with_capacity(positions.len());

    for (index, start) in positions.iter().enumerate() {
        let clip = clips_directory.join(format!("clip{index:05}.mkv"));

        ffmpeg::run(
            context,
            &format!("overview clip {index}"),
            &clip_arguments(source, *start, clip_length, &clip),
            &hidden,
            None,
        )?;

        clips.push(clip);
        progress_bar.inc(1);
    }

    progress_bar.finish_and_clear();

    let list = clips_directory.join(CLIP_LIST);
    fs::write(&list, clip_list(&clips))
        .with_context(|| format!("Unable to write clip list {list:?}"))?;

    let output = output_directory.join(OVERVIEW_NAME);
    let temporary_output = output.with_extension("tmp.mkv");

    ffmpeg::run(
        context,
        "the overview video",
        &concat_arguments(&list, &temporary_output),
        &hidden,
        None,
    )?;

    fs::rename(&temporary_output, &output)
        .with_context(|| format!("Unable to rename {temporary_output:?} to {output:?}"))?;

    // Clips are only removed once the overview they feed is in place.
    if let Err(err) = fs::remove_dir_all(&clips_directory) {
        warn!("Unable to remove {clips_directory:?}: {err}");
    }

    info!("Done, output file: {output:?}");

    Ok(output)
}

/// Returns the path of the video every job transcodes from and is compared against.
pub fn prepare(
    context: &Context,
    config: &Config,
    original: &VideoInfo,
    output_directory: &Path,
) -> anyhow::Result<PathBuf> {
    if let Some(seconds) = config.encode_length {
        return truncate(context, &config.source, original, seconds, output_directory);
    }

    if let Some(interval) = config.interval {
        return overview(
            context,
            &config.source,
            original,
            interval,
            config.clip_length,
            output_directory,
        );
    }

    Ok(config.source.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::FrameRate;
    use rstest::rstest;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string_lossy().to_string()).collect()
    }

    #[rstest]
    #[case(60.0, 10, vec![0, 10, 20, 30, 40, 50])]
    #[case(65.5, 30, vec![0, 30])]
    #[case(30.0, 30, vec![0])]
    fn clips_are_taken_every_interval(#[case] duration: f64, #[case] interval: u32, #[case] expected: Vec<u32>) {
        assert_eq!(clip_positions(duration, interval).unwrap(), expected);
    }

    #[test]
    fn interval_longer_than_video_creates_nothing() {
        let directory = tempfile::tempdir().unwrap();
        let info = VideoInfo {
            duration: 30.0,
            frame_rate: FrameRate {
                numerator: 24,
                denominator: 1,
            },
            size: 1,
            width: 1920,
            height: 1080,
            extension: "mkv".to_owned(),
        };

        let error = overview(
            &Context::quiet(2),
            Path::new("in.mkv"),
            &info,
            45,
            1,
            directory.path(),
        )
        .unwrap_err();

        assert!(matches!(error.downcast_ref::<SweepError>(), Some(SweepError::Overview(_))));
        assert!(!directory.path().join("clips").exists());
    }

    #[test]
    fn truncation_is_lossless_and_keeps_other_streams() {
        let args = strings(&truncate_arguments(Path::new("in.mp4"), 30.0, Path::new("out/in [30s].mkv")));

        assert!(args.windows(2).any(|pair| pair == ["-c:v", "ffv1"]));
        assert!(args.windows(2).any(|pair| pair == ["-level", "3"]));
        assert!(args.windows(2).any(|pair| pair == ["-t", "30"]));
        assert!(args.windows(2).any(|pair| pair == ["-c:a", "copy"]));
        assert_eq!(truncated_name(Path::new("videos/in.mp4"), 30.0), "in [30s].mkv");
        assert_eq!(truncated_name(Path::new("in.mp4"), 7.5), "in [7.5s].mkv");
    }

    #[test]
    fn clip_list_quotes_paths() {
        let list = clip_list(&[PathBuf::from("out/clips/clip00000.mkv"), PathBuf::from("out/clips/it's.mkv")]);

        assert_eq!(list, "file 'clip00000.mkv'\nfile 'it'\\''s.mkv'\n");
    }

    #[test]
    fn overview_concatenates_without_reencoding() {
        let args = strings(&concat_arguments(Path::new("clips/clips.txt"), Path::new("Overview_Video.mkv")));

        assert!(args.windows(2).any(|pair| pair == ["-f", "concat"]));
        assert!(args.windows(2).any(|pair| pair == ["-c", "copy"]));
    }
}
