//! Media tool driving.
//!
//! [`FfmpegTool`] compiles a normalized operation chain into ffmpeg
//! arguments, runs the subprocess with progress parsing, and exposes the
//! merge mode used for multi-input jobs. The [`MediaRunner`] trait is the
//! seam the executor depends on, so workers are testable without ffmpeg.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::jobs::operations::Op;
use crate::{Error, Result};

/// Hardware encoder names used when acceleration is enabled.
const HW_H264_ENCODER: &str = "h264_videotoolbox";
const HW_HEVC_ENCODER: &str = "hevc_videotoolbox";

/// Font files for text overlays (present in the service container).
const FONT_REGULAR: &str = "/usr/share/fonts/ttf-dejavu/DejaVuSans.ttf";
const FONT_BOLD: &str = "/usr/share/fonts/ttf-dejavu/DejaVuSans-Bold.ttf";

/// One progress tick from the media tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: i32,
    pub operation: String,
}

/// Non-blocking progress sink handed to the tool.
///
/// `report` is a `try_send`: a full pump never stalls the subprocess
/// readers, ticks are simply dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub fn report(&self, percent: i32, operation: &str) {
        let _ = self.tx.try_send(ProgressUpdate {
            percent,
            operation: operation.to_string(),
        });
    }
}

/// Options for single-input processing.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub input_path: String,
    pub output_path: String,
    pub operations: Vec<Op>,
    pub use_hardware_accel: bool,
    /// Input duration in seconds, used to turn out_time into a percent.
    pub duration_hint: Option<f64>,
}

/// Options for merging multiple inputs into one output.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub input_paths: Vec<String>,
    pub output_path: String,
    pub use_hardware_accel: bool,
    pub duration_hint: Option<f64>,
}

/// Media tool contract used by the executor.
#[async_trait]
pub trait MediaRunner: Send + Sync {
    async fn process(
        &self,
        opts: ProcessOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<()>;

    async fn merge(
        &self,
        opts: MergeOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// ffmpeg-backed [`MediaRunner`].
pub struct FfmpegTool {
    ffmpeg_path: String,
    /// CPU thread cap (0 = let ffmpeg decide).
    max_threads: u32,
    /// Trade output size for encode speed.
    prefer_fast_presets: bool,
}

impl FfmpegTool {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            max_threads: 0,
            prefer_fast_presets: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            max_threads: config.max_threads,
            prefer_fast_presets: config.prefer_fast_presets,
        }
    }

    fn preset(&self) -> &'static str {
        if self.prefer_fast_presets {
            "veryfast"
        } else {
            "medium"
        }
    }

    fn common_prefix(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
        ];
        if self.max_threads > 0 {
            args.extend(["-threads".to_string(), self.max_threads.to_string()]);
        }
        args
    }

    fn default_video_codec_args(&self, use_hw: bool) -> Vec<String> {
        if use_hw {
            vec![
                "-c:v".to_string(),
                HW_H264_ENCODER.to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
            ]
        } else {
            vec![
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                self.preset().to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
            ]
        }
    }

    /// Build the argument list for process mode.
    fn build_process_args(&self, opts: &ProcessOptions) -> Vec<String> {
        let use_hw = opts.use_hardware_accel;
        let preset = self.preset();

        // Operations that replace the whole command line win outright.
        for op in &opts.operations {
            if let Op::Thumbnail(params) = op {
                let mut args = self.common_prefix();
                args.extend([
                    "-ss".to_string(),
                    params.timestamp.clone(),
                    "-i".to_string(),
                    opts.input_path.clone(),
                    "-vframes".to_string(),
                    "1".to_string(),
                    "-vf".to_string(),
                    format!("scale={}:-1", params.width),
                    "-q:v".to_string(),
                    "2".to_string(),
                    opts.output_path.clone(),
                ]);
                return args;
            }
            if let Op::AddAudio(params) = op {
                if !params.audio_path.is_empty() {
                    return self.build_add_audio_args(opts, params);
                }
            }
        }

        let mut args = self.common_prefix();
        args.extend(["-i".to_string(), opts.input_path.clone()]);

        let mut video_filters: Vec<String> = Vec::new();
        let mut audio_filters: Vec<String> = Vec::new();

        for op in &opts.operations {
            match op {
                Op::Trim(params) => {
                    if let Some(start) = &params.start_time {
                        args.extend(["-ss".to_string(), start.clone()]);
                    }
                    if let Some(end) = &params.end_time {
                        args.extend(["-to".to_string(), end.clone()]);
                    }
                }

                Op::Resize(params) => {
                    let (w, h) = (params.width, params.height);
                    if w > 0 || h > 0 {
                        let filter = if params.maintain_aspect {
                            if w > 0 && h > 0 {
                                format!("scale={}:{}:force_original_aspect_ratio=decrease", w, h)
                            } else if w > 0 {
                                format!("scale={}:-2", w)
                            } else {
                                format!("scale=-2:{}", h)
                            }
                        } else {
                            format!("scale={}:{}", w, h)
                        };
                        video_filters.push(filter);
                    }
                }

                Op::Compress(params) => {
                    // quality 1-100 -> CRF 0-51, lower CRF is better.
                    let crf = 51 - (params.quality.clamp(0, 100) * 51 / 100);
                    args.extend(["-crf".to_string(), crf.to_string()]);
                    if use_hw {
                        args.extend([
                            "-c:v".to_string(),
                            HW_H264_ENCODER.to_string(),
                            "-c:a".to_string(),
                            "aac".to_string(),
                        ]);
                    } else {
                        args.extend([
                            "-c:v".to_string(),
                            "libx264".to_string(),
                            "-preset".to_string(),
                            preset.to_string(),
                            "-c:a".to_string(),
                            "aac".to_string(),
                        ]);
                    }
                }

                Op::ConvertFormat(params) => {
                    if let Some(target) = params.target_format.as_deref() {
                        match target {
                            "mp4" | "mov" | "mkv" => {
                                args.extend(self.default_video_codec_args(use_hw));
                            }
                            "webm" => {
                                args.extend([
                                    "-c:v".to_string(),
                                    "libvpx-vp9".to_string(),
                                    "-cpu-used".to_string(),
                                    "4".to_string(),
                                    "-row-mt".to_string(),
                                    "1".to_string(),
                                    "-c:a".to_string(),
                                    "libopus".to_string(),
                                ]);
                            }
                            "avi" => {
                                args.extend([
                                    "-c:v".to_string(),
                                    "mpeg4".to_string(),
                                    "-c:a".to_string(),
                                    "mp3".to_string(),
                                ]);
                            }
                            _ => {}
                        }
                    } else if let Some(codec) = params.codec.as_deref() {
                        match codec {
                            "h264" => {
                                if use_hw {
                                    args.extend(["-c:v".to_string(), HW_H264_ENCODER.to_string()]);
                                } else {
                                    args.extend([
                                        "-c:v".to_string(),
                                        "libx264".to_string(),
                                        "-preset".to_string(),
                                        preset.to_string(),
                                    ]);
                                }
                            }
                            "h265" => {
                                if use_hw {
                                    args.extend(["-c:v".to_string(), HW_HEVC_ENCODER.to_string()]);
                                } else {
                                    args.extend([
                                        "-c:v".to_string(),
                                        "libx265".to_string(),
                                        "-preset".to_string(),
                                        preset.to_string(),
                                    ]);
                                }
                            }
                            "vp9" => {
                                args.extend([
                                    "-c:v".to_string(),
                                    "libvpx-vp9".to_string(),
                                    "-cpu-used".to_string(),
                                    "4".to_string(),
                                    "-row-mt".to_string(),
                                    "1".to_string(),
                                ]);
                            }
                            _ => {}
                        }
                    }
                }

                Op::Rotate(params) => {
                    match params.degrees {
                        90 => video_filters.push("transpose=1".to_string()),
                        180 => video_filters.push("transpose=1,transpose=1".to_string()),
                        270 => video_filters.push("transpose=2".to_string()),
                        _ => {}
                    }
                    if params.flip_horizontal {
                        video_filters.push("hflip".to_string());
                    }
                    if params.flip_vertical {
                        video_filters.push("vflip".to_string());
                    }
                }

                Op::Crop(params) => {
                    if params.width > 0 && params.height > 0 {
                        video_filters.push(format!(
                            "crop={}:{}:{}:{}",
                            params.width, params.height, params.x, params.y
                        ));
                    }
                }

                Op::ExtractAudio(params) => {
                    args.push("-vn".to_string());
                    let kbps = format!("{}k", params.bitrate / 1000);
                    match params.format.as_str() {
                        "aac" => args.extend([
                            "-acodec".to_string(),
                            "aac".to_string(),
                            "-b:a".to_string(),
                            kbps,
                        ]),
                        "wav" => args.extend(["-acodec".to_string(), "pcm_s16le".to_string()]),
                        "flac" => args.extend([
                            "-acodec".to_string(),
                            "flac".to_string(),
                            "-compression_level".to_string(),
                            "5".to_string(),
                        ]),
                        "ogg" => args.extend([
                            "-acodec".to_string(),
                            "libvorbis".to_string(),
                            "-b:a".to_string(),
                            kbps,
                        ]),
                        "mp3" => args.extend([
                            "-acodec".to_string(),
                            "libmp3lame".to_string(),
                            "-b:a".to_string(),
                            kbps,
                        ]),
                        _ => args.extend([
                            "-acodec".to_string(),
                            "libmp3lame".to_string(),
                            "-b:a".to_string(),
                            "192k".to_string(),
                        ]),
                    }
                }

                Op::ChangeSpeed(params) => {
                    if params.multiplier != 1.0 && params.multiplier > 0.0 {
                        video_filters.push(format!("setpts={:.2}*PTS", 1.0 / params.multiplier));
                        audio_filters.push(format!("atempo={:.2}", params.multiplier));
                    }
                }

                Op::CreateGif(params) => {
                    video_filters.push(format!(
                        "fps={},scale={}:-1:flags=lanczos",
                        params.fps, params.width
                    ));
                }

                Op::ChangeBitrate(params) => {
                    args.extend(["-b:a".to_string(), params.bitrate.to_string()]);
                }

                Op::AdjustVolume(params) => {
                    if params.db != 0.0 {
                        audio_filters.push(format!("volume={:.1}dB", params.db));
                    }
                }

                Op::FadeInOut(params) => {
                    if params.fade_in > 0.0 {
                        audio_filters.push(format!("afade=t=in:st=0:d={:.1}", params.fade_in));
                    }
                    if params.fade_out > 0.0 {
                        audio_filters.push(format!("afade=t=out:st=0:d={:.1}", params.fade_out));
                    }
                }

                Op::AddWatermark(params) => {
                    if !params.text.is_empty() {
                        let (x, y) = watermark_position(&params.position);
                        let filter = format!(
                            "drawtext=text='{}':fontfile={}:fontsize={}:fontcolor={}:alpha={:.2}:x={}:y={}",
                            escape_drawtext(&params.text),
                            FONT_REGULAR,
                            params.font_size,
                            params.font_color,
                            params.opacity,
                            x,
                            y
                        );
                        video_filters.push(filter);
                    }
                }

                Op::AddText(params) => {
                    if !params.text.is_empty() {
                        video_filters.push(build_text_overlay(params));
                    }
                }

                Op::AddAudio(_) => {
                    // Empty audio path: nothing to add.
                }

                Op::RemoveAudio => args.push("-an".to_string()),

                Op::Reverse => {
                    video_filters.push("reverse".to_string());
                    audio_filters.push("areverse".to_string());
                }

                Op::Loop(params) => {
                    args.extend([
                        "-stream_loop".to_string(),
                        (params.count.max(1) - 1).to_string(),
                    ]);
                }

                Op::Filters(params) => {
                    build_adjustment_filters(params, &mut video_filters);
                }

                Op::Thumbnail(_) | Op::Merge => {
                    // Thumbnail handled above; merge runs in merge mode.
                }
            }
        }

        if !video_filters.is_empty() {
            args.extend(["-vf".to_string(), video_filters.join(",")]);
        }
        if !audio_filters.is_empty() {
            args.extend(["-af".to_string(), audio_filters.join(",")]);
        }

        // Filter-only chains would otherwise re-encode with ffmpeg's slow
        // default settings.
        let has_video_codec = args.iter().any(|a| a == "-c:v");
        let has_video_filters = args.iter().any(|a| a == "-vf");
        if !has_video_codec && has_video_filters {
            args.extend(self.default_video_codec_args(use_hw));
        }

        args.push(opts.output_path.clone());
        args
    }

    fn build_add_audio_args(
        &self,
        opts: &ProcessOptions,
        params: &crate::jobs::operations::AddAudioParams,
    ) -> Vec<String> {
        let mut args = self.common_prefix();
        args.extend([
            "-i".to_string(),
            opts.input_path.clone(),
            "-i".to_string(),
            params.audio_path.clone(),
        ]);

        if params.mode == "replace" {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "1:a".to_string(),
                "-c:v".to_string(),
                "copy".to_string(),
            ]);
            if params.volume != 1.0 {
                args.extend(["-af".to_string(), format!("volume={:.2}", params.volume)]);
            }
            args.push("-shortest".to_string());
        } else {
            let volume_filter = if params.volume != 1.0 {
                format!(",volume={:.2}", params.volume)
            } else {
                String::new()
            };
            args.extend([
                "-filter_complex".to_string(),
                format!("[0:a][1:a]amix=inputs=2:duration=first{}[aout]", volume_filter),
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "[aout]".to_string(),
                "-c:v".to_string(),
                "copy".to_string(),
            ]);
        }

        args.push(opts.output_path.clone());
        args
    }

    /// Build the argument list for merge mode.
    ///
    /// Inputs are normalized to 1080p30 yuv420p + stereo 44.1kHz and
    /// concatenated with re-encoding, so mixed codecs and resolutions work.
    fn build_merge_args(&self, opts: &MergeOptions) -> Vec<String> {
        let mut args = self.common_prefix();

        for input in &opts.input_paths {
            args.extend(["-i".to_string(), input.clone()]);
        }

        let mut filter_parts: Vec<String> = Vec::new();
        for i in 0..opts.input_paths.len() {
            filter_parts.push(format!(
                "[{i}:v]scale=1920:1080:force_original_aspect_ratio=decrease,\
                 pad=1920:1080:(ow-iw)/2:(oh-ih)/2,setsar=1,fps=30,format=yuv420p[v{i}]"
            ));
            filter_parts.push(format!(
                "[{i}:a]aformat=sample_fmts=fltp:sample_rates=44100:channel_layouts=stereo[a{i}]"
            ));
        }

        let concat_inputs: String = (0..opts.input_paths.len())
            .map(|i| format!("[v{i}][a{i}]"))
            .collect();
        filter_parts.push(format!(
            "{}concat=n={}:v=1:a=1[outv][outa]",
            concat_inputs,
            opts.input_paths.len()
        ));

        args.extend([
            "-filter_complex".to_string(),
            filter_parts.join(";"),
            "-map".to_string(),
            "[outv]".to_string(),
            "-map".to_string(),
            "[outa]".to_string(),
        ]);

        if opts.use_hardware_accel {
            args.extend([
                "-c:v".to_string(),
                HW_H264_ENCODER.to_string(),
                "-b:v".to_string(),
                "5M".to_string(),
            ]);
        } else {
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                self.preset().to_string(),
                "-crf".to_string(),
                "23".to_string(),
            ]);
        }
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
        ]);

        args.push(opts.output_path.clone());
        args
    }

    async fn run(
        &self,
        args: Vec<String>,
        label: String,
        duration_hint: Option<f64>,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<()> {
        debug!("ffmpeg args: {:?}", args);

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::media(format!("failed to spawn {}: {}", self.ffmpeg_path, e)))?;

        // Progress reader: ffmpeg's `-progress pipe:1` key=value stream.
        let stdout = child.stdout.take();
        let reporter = progress.clone();
        let reporter_label = label.clone();
        let progress_task = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            let mut last_percent = -1;
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(raw) = line.strip_prefix("out_time_ms=") else {
                    continue;
                };
                // out_time_ms is microseconds despite the name.
                let Ok(micros) = raw.trim().parse::<i64>() else {
                    continue;
                };
                let Some(duration) = duration_hint.filter(|d| *d > 0.0) else {
                    continue;
                };
                let secs = micros as f64 / 1_000_000.0;
                let percent = ((secs / duration) * 100.0).clamp(0.0, 99.0) as i32;
                if percent > last_percent {
                    last_percent = percent;
                    reporter.report(percent, &reporter_label);
                }
            }
        });

        // Error collector: with `-loglevel error` stderr only carries
        // failures, keep the tail for the job error message.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            let Some(stderr) = stderr else { return tail };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() >= 20 {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        });

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = waited else {
            warn!("Media tool cancelled, killing subprocess");
            let _ = child.kill().await;
            progress_task.abort();
            stderr_task.abort();
            return Err(Error::media("media processing cancelled"));
        };
        let status = status?;

        let _ = progress_task.await;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = stderr_tail
                .last()
                .cloned()
                .unwrap_or_else(|| "unknown ffmpeg error".to_string());
            return Err(Error::media(format!(
                "ffmpeg exited with code {}: {}",
                status.code().unwrap_or(-1),
                detail
            )));
        }

        progress.report(100, &label);
        Ok(())
    }
}

#[async_trait]
impl MediaRunner for FfmpegTool {
    async fn process(
        &self,
        opts: ProcessOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<()> {
        let label = opts
            .operations
            .first()
            .map(|op| op.kind().to_string())
            .unwrap_or_else(|| "processing".to_string());
        let args = self.build_process_args(&opts);
        self.run(args, label, opts.duration_hint, progress, cancel)
            .await
    }

    async fn merge(
        &self,
        opts: MergeOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<()> {
        if opts.input_paths.len() < 2 {
            return Err(Error::media("merge requires at least 2 input files"));
        }
        let args = self.build_merge_args(&opts);
        self.run(
            args,
            "merge".to_string(),
            opts.duration_hint,
            progress,
            cancel,
        )
        .await
    }
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
}

fn watermark_position(position: &str) -> (&'static str, &'static str) {
    match position {
        "topleft" => ("10", "10"),
        "topright" => ("w-tw-10", "10"),
        "bottomleft" => ("10", "h-th-10"),
        "center" => ("(w-tw)/2", "(h-th)/2"),
        _ => ("w-tw-10", "h-th-10"),
    }
}

fn text_position(position: &str) -> (&'static str, &'static str) {
    match position {
        "topleft" => ("20", "20"),
        "topcenter" => ("(w-tw)/2", "20"),
        "topright" => ("w-tw-20", "20"),
        "centerleft" => ("20", "(h-th)/2"),
        "centerright" => ("w-tw-20", "(h-th)/2"),
        "bottomleft" => ("20", "h-th-20"),
        "bottomcenter" => ("(w-tw)/2", "h-th-20"),
        "bottomright" => ("w-tw-20", "h-th-20"),
        _ => ("(w-tw)/2", "(h-th)/2"),
    }
}

fn build_text_overlay(params: &crate::jobs::operations::AddTextParams) -> String {
    let (x, y) = text_position(&params.position);
    let mut x = x.to_string();
    let mut y = y.to_string();

    match params.animation.as_str() {
        "scrollLeft" => x = format!("w-{}*t", params.font_size * 2),
        "scrollRight" => x = format!("-{}+{}*t", params.font_size * 5, params.font_size * 2),
        "scrollUp" => y = format!("h-{}*t", params.font_size),
        "scrollDown" => y = format!("-{}+{}*t", params.font_size * 2, params.font_size),
        _ => {}
    }

    let mut filter = format!(
        "drawtext=text='{}':fontfile={}:fontsize={}:fontcolor={}:x={}:y={}",
        escape_drawtext(&params.text),
        FONT_BOLD,
        params.font_size,
        params.font_color,
        x,
        y
    );

    if !params.bg_color.is_empty() {
        filter.push_str(&format!(
            ":box=1:boxcolor={}@{:.2}:boxborderw=10",
            params.bg_color, params.bg_opacity
        ));
    }

    if params.start_time > 0.0 || params.end_time > 0.0 {
        if params.end_time > 0.0 {
            filter.push_str(&format!(
                ":enable='between(t,{:.2},{:.2})'",
                params.start_time, params.end_time
            ));
        } else {
            filter.push_str(&format!(":enable='gte(t,{:.2})'", params.start_time));
        }
    }

    if params.animation == "fadeIn" {
        filter.push_str(":alpha='if(lt(t,1),t,1)'");
    }

    filter
}

fn build_adjustment_filters(
    params: &crate::jobs::operations::FiltersParams,
    video_filters: &mut Vec<String>,
) {
    let mut eq_parts: Vec<String> = Vec::new();
    if params.brightness != 0.0 {
        eq_parts.push(format!("brightness={:.2}", params.brightness));
    }
    if params.contrast != 1.0 {
        eq_parts.push(format!("contrast={:.2}", params.contrast));
    }
    if params.saturation != 1.0 {
        eq_parts.push(format!("saturation={:.2}", params.saturation));
    }
    if params.gamma != 1.0 {
        eq_parts.push(format!("gamma={:.2}", params.gamma));
    }
    if !eq_parts.is_empty() {
        video_filters.push(format!("eq={}", eq_parts.join(":")));
    }

    if params.hue != 0.0 {
        video_filters.push(format!("hue=h={:.1}", params.hue));
    }

    if params.blur > 0.0 {
        let radius = ((params.blur * 2.0) as i64).max(1);
        video_filters.push(format!("boxblur={}:{}", radius, radius));
    }

    if params.sharpen > 0.0 {
        let amount = params.sharpen * 1.5;
        video_filters.push(format!("unsharp=5:5:{:.1}:5:5:0", amount));
    }

    if params.vignette {
        video_filters.push("vignette=PI/4".to_string());
    }

    if params.grayscale {
        video_filters.push("colorchannelmixer=.3:.4:.3:0:.3:.4:.3:0:.3:.4:.3".to_string());
    }

    if params.sepia {
        video_filters
            .push("colorchannelmixer=.393:.769:.189:0:.349:.686:.168:0:.272:.534:.131".to_string());
    }

    if params.negative {
        video_filters.push("negate".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::operations::{normalize, Operation};

    fn tool() -> FfmpegTool {
        FfmpegTool::new("ffmpeg")
    }

    fn process_opts(ops: Vec<Op>) -> ProcessOptions {
        ProcessOptions {
            input_path: "/in/a.mp4".to_string(),
            output_path: "/out/b.mp4".to_string(),
            operations: ops,
            use_hardware_accel: false,
            duration_hint: Some(60.0),
        }
    }

    fn op(kind: &str, params: serde_json::Value) -> Op {
        let wire = Operation {
            kind: kind.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        };
        normalize(&wire).unwrap()
    }

    #[test]
    fn test_trim_args() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "trim",
            serde_json::json!({"startTime": "00:00:05", "endTime": "00:00:10"}),
        )]));
        let joined = args.join(" ");
        assert!(joined.contains("-ss 00:00:05"));
        assert!(joined.contains("-to 00:00:10"));
        assert!(joined.ends_with("/out/b.mp4"));
    }

    #[test]
    fn test_resize_maintains_aspect() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "resize",
            serde_json::json!({"width": 1280, "height": 720}),
        )]));
        let vf = args[args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        assert!(vf.contains("scale=1280:720:force_original_aspect_ratio=decrease"));
    }

    #[test]
    fn test_resize_width_only() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "resize",
            serde_json::json!({"width": 640}),
        )]));
        let vf = args[args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        assert_eq!(vf, "scale=640:-2");
    }

    #[test]
    fn test_compress_quality_to_crf() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "compress",
            serde_json::json!({"quality": 70}),
        )]));
        let crf = args[args.iter().position(|a| a == "-crf").unwrap() + 1].clone();
        // 51 - 70*51/100 = 51 - 35 = 16
        assert_eq!(crf, "16");
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"veryfast".to_string()));
    }

    #[test]
    fn test_convert_format_webm() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "convertFormat",
            serde_json::json!({"targetFormat": "webm"}),
        )]));
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"libopus".to_string()));
    }

    #[test]
    fn test_rotate_and_flip() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "rotate",
            serde_json::json!({"degrees": 90, "flipHorizontal": true}),
        )]));
        let vf = args[args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        assert!(vf.contains("transpose=1"));
        assert!(vf.contains("hflip"));
    }

    #[test]
    fn test_extract_audio_mp3() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "extractAudio",
            serde_json::json!({"format": "mp3", "bitrate": 192000}),
        )]));
        assert!(args.contains(&"-vn".to_string()));
        assert!(args.contains(&"libmp3lame".to_string()));
        assert!(args.contains(&"192k".to_string()));
    }

    #[test]
    fn test_change_speed_filters() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "changeSpeed",
            serde_json::json!({"multiplier": 2.0}),
        )]));
        let vf = args[args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        let af = args[args.iter().position(|a| a == "-af").unwrap() + 1].clone();
        assert!(vf.contains("setpts=0.50*PTS"));
        assert!(af.contains("atempo=2.00"));
    }

    #[test]
    fn test_watermark_escapes_text() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "addWatermark",
            serde_json::json!({"text": "demo:clip"}),
        )]));
        let vf = args[args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        assert!(vf.contains("drawtext=text='demo\\:clip'"));
        assert!(vf.contains("x=w-tw-10:y=h-th-10"));
    }

    #[test]
    fn test_thumbnail_overrides_command() {
        let args = tool().build_process_args(&process_opts(vec![
            op("resize", serde_json::json!({"width": 640})),
            op("thumbnail", serde_json::json!({"timestamp": "00:00:02", "width": 320})),
        ]));
        assert!(args.contains(&"-vframes".to_string()));
        assert!(args.contains(&"scale=320:-1".to_string()));
        // The resize filter never makes it into thumbnail mode.
        assert!(!args.iter().any(|a| a.contains("scale=640")));
    }

    #[test]
    fn test_add_audio_replace_mode() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "addAudio",
            serde_json::json!({"audioPath": "/in/track.mp3", "mode": "replace"}),
        )]));
        let joined = args.join(" ");
        assert!(joined.contains("-i /in/track.mp3"));
        assert!(joined.contains("-map 0:v -map 1:a"));
        assert!(joined.contains("-shortest"));
    }

    #[test]
    fn test_add_audio_mix_mode() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "addAudio",
            serde_json::json!({"audioPath": "/in/track.mp3", "volume": 0.5}),
        )]));
        let joined = args.join(" ");
        assert!(joined.contains("amix=inputs=2:duration=first,volume=0.50[aout]"));
    }

    #[test]
    fn test_filter_only_chain_gets_default_codec() {
        let args = tool().build_process_args(&process_opts(vec![op(
            "createGif",
            serde_json::json!({}),
        )]));
        assert!(args.contains(&"libx264".to_string()));
    }

    #[test]
    fn test_no_ops_is_stream_copyish() {
        let args = tool().build_process_args(&process_opts(vec![]));
        assert!(!args.contains(&"-vf".to_string()));
        assert!(!args.contains(&"-c:v".to_string()));
    }

    #[test]
    fn test_merge_args_shape() {
        let opts = MergeOptions {
            input_paths: vec!["/in/a.mp4".to_string(), "/in/b.mp4".to_string()],
            output_path: "/out/m.mp4".to_string(),
            use_hardware_accel: false,
            duration_hint: None,
        };
        let args = tool().build_merge_args(&opts);
        let joined = args.join(" ");
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(joined.contains("concat=n=2:v=1:a=1[outv][outa]"));
        assert!(joined.contains("-map [outv] -map [outa]"));
        assert!(args.contains(&"libx264".to_string()));
    }

    #[tokio::test]
    async fn test_merge_requires_two_inputs() {
        let opts = MergeOptions {
            input_paths: vec!["/in/a.mp4".to_string()],
            output_path: "/out/m.mp4".to_string(),
            use_hardware_accel: false,
            duration_hint: None,
        };
        let err = tool()
            .merge(opts, ProgressReporter::noop(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn test_threads_cap_applied() {
        let mut tool = FfmpegTool::new("ffmpeg");
        tool.max_threads = 2;
        let args = tool.build_process_args(&process_opts(vec![]));
        let joined = args.join(" ");
        assert!(joined.contains("-threads 2"));
    }

    #[test]
    fn test_progress_reporter_never_blocks() {
        let (reporter, mut rx) = ProgressReporter::channel(2);
        for i in 0..10 {
            reporter.report(i, "convertFormat");
        }
        // Only the buffered ticks survive; the rest were dropped.
        assert_eq!(rx.try_recv().unwrap().percent, 0);
        assert_eq!(rx.try_recv().unwrap().percent, 1);
        assert!(rx.try_recv().is_err());
    }
}
