//! Final video compositing.
//!
//! The compositor lays the collected visuals end to end under the
//! narration, fades the picture in and out, shows the title card over the
//! opening seconds, burns in the captions and extracts a thumbnail.
//! Without visuals it renders a solid background instead.

use async_trait::async_trait;
use reel_models::AssetKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, warn};

use crate::command::{check_ffmpeg, check_ffprobe, escape_filter_path, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_media;
use crate::thumbnail::{generate_thumbnail, thumbnail_offset_secs};

/// Longest time one visual stays on screen before the next one.
pub const MAX_SEGMENT_SECS: f64 = 8.0;

/// Upper bound on timeline entries, each of which is one FFmpeg input.
pub const MAX_TIMELINE_ENTRIES: usize = 240;

/// A downloaded visual to place on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualInput {
    pub path: PathBuf,
    pub kind: AssetKind,
}

/// Everything the compositor needs for one video.
#[derive(Debug, Clone)]
pub struct ComposeJob {
    /// Shown as the opening title card and on the thumbnail
    pub title: Option<String>,
    pub narration: PathBuf,
    pub captions: Option<PathBuf>,
    pub visuals: Vec<VisualInput>,
    pub output: PathBuf,
    pub thumbnail: PathBuf,
}

/// Result of a successful composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeOutput {
    pub duration_secs: f64,
    pub thumbnail_written: bool,
}

/// Video compositor seam.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Render the final video and thumbnail.
    async fn compose(&self, job: &ComposeJob) -> MediaResult<ComposeOutput>;

    /// Verify the compositor's toolchain; returns a version string.
    async fn check(&self) -> MediaResult<String>;
}

/// Output geometry and encoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Background colour when there are no visuals (FFmpeg colour syntax)
    pub background: String,
    pub crf: u8,
    pub preset: String,
    pub caption_style: String,
    pub title_font_size: u32,
    /// How long the title card stays up
    pub title_secs: f64,
    /// Fade in/out of the title card
    pub title_fade_secs: f64,
    /// Fade from and to black at the ends of the video
    pub fade_secs: f64,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 24,
            background: "0x14141e".to_string(),
            crf: 23,
            preset: "veryfast".to_string(),
            caption_style: "FontName=Arial,FontSize=24,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,Outline=2,Shadow=0,MarginV=40".to_string(),
            title_font_size: 72,
            title_secs: 3.0,
            title_fade_secs: 0.5,
            fade_secs: 1.0,
        }
    }
}

/// One slot on the visual timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineEntry {
    /// Index into the job's visuals
    pub visual: usize,
    pub duration_secs: f64,
}

/// Distribute visuals over the narration length.
///
/// Visuals cycle in order; each slot lasts at most [`MAX_SEGMENT_SECS`]
/// and the slots sum to `total_secs`.
pub fn plan_timeline(visual_count: usize, total_secs: f64) -> Vec<TimelineEntry> {
    if visual_count == 0 || total_secs <= 0.0 {
        return Vec::new();
    }
    let slots = ((total_secs / MAX_SEGMENT_SECS).ceil() as usize)
        .max(visual_count.min(MAX_TIMELINE_ENTRIES))
        .clamp(1, MAX_TIMELINE_ENTRIES);
    let slot = total_secs / slots as f64;
    (0..slots)
        .map(|i| TimelineEntry {
            visual: i % visual_count,
            duration_secs: slot,
        })
        .collect()
}

/// Where the title text is written for `drawtext=textfile`, next to the output.
pub fn title_file_path(job: &ComposeJob) -> PathBuf {
    job.output.with_extension("title.txt")
}

/// Fade from black at the start and to black at the end.
fn fade_filter(settings: &ComposeSettings, total_secs: f64) -> String {
    let fade = settings.fade_secs.min(total_secs / 2.0).max(0.0);
    format!(
        "fade=t=in:st=0:d={fade:.3},fade=t=out:st={out:.3}:d={fade:.3}",
        fade = fade,
        out = (total_secs - fade).max(0.0),
    )
}

/// Centered title card over the opening seconds, faded in and out.
fn title_filter(settings: &ComposeSettings, title_file: &std::path::Path) -> String {
    let shown = settings.title_secs;
    let fade = settings.title_fade_secs.min(shown / 2.0).max(0.001);
    format!(
        "drawtext=textfile='{file}':expansion=none:fontsize={size}:fontcolor=white:\
         borderw=3:bordercolor=black:font=Arial:x=(w-text_w)/2:y=(h-text_h)/2:\
         enable='between(t,0,{shown:.3})':\
         alpha='if(lt(t,{fade:.3}),t/{fade:.3},if(lt(t,{hold:.3}),1,({shown:.3}-t)/{fade:.3}))'",
        file = escape_filter_path(title_file),
        size = settings.title_font_size,
        shown = shown,
        fade = fade,
        hold = shown - fade,
    )
}

/// FFmpeg-backed compositor.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCompositor {
    runner: FfmpegRunner,
    settings: ComposeSettings,
}

impl FfmpegCompositor {
    pub fn new(runner: FfmpegRunner, settings: ComposeSettings) -> Self {
        Self { runner, settings }
    }

    /// Build the composition command for a known narration length.
    pub fn build_command(&self, job: &ComposeJob, total_secs: f64) -> FfmpegCommand {
        let s = &self.settings;
        let timeline = plan_timeline(job.visuals.len(), total_secs);
        let mut cmd = FfmpegCommand::new(&job.output);
        let mut filters = Vec::new();

        let video_label = if timeline.is_empty() {
            cmd = cmd.lavfi_input(format!(
                "color=c={}:s={}x{}:r={}:d={:.3}",
                s.background, s.width, s.height, s.fps, total_secs
            ));
            "0:v".to_string()
        } else {
            for (i, entry) in timeline.iter().enumerate() {
                let visual = &job.visuals[entry.visual];
                let duration = format!("{:.3}", entry.duration_secs);
                let input_args: Vec<String> = match visual.kind {
                    AssetKind::Video => vec!["-stream_loop".into(), "-1".into(), "-t".into(), duration.clone()],
                    AssetKind::Image => vec!["-loop".into(), "1".into(), "-t".into(), duration.clone()],
                };
                cmd = cmd.input_with(input_args, visual.path.to_string_lossy());
                filters.push(format!(
                    "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
                     pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color={bg},setsar=1,fps={fps},\
                     trim=duration={d},setpts=PTS-STARTPTS[v{i}]",
                    i = i,
                    w = s.width,
                    h = s.height,
                    bg = s.background,
                    fps = s.fps,
                    d = duration,
                ));
            }
            let labels: String = (0..timeline.len()).map(|i| format!("[v{}]", i)).collect();
            filters.push(format!("{}concat=n={}:v=1:a=0[vcat]", labels, timeline.len()));
            "vcat".to_string()
        };

        let audio_index = cmd.input_count();
        cmd = cmd.input(&job.narration);

        let mut chain = vec![fade_filter(s, total_secs)];
        if job.title.is_some() {
            chain.push(title_filter(s, &title_file_path(job)));
        }
        if let Some(captions) = &job.captions {
            chain.push(format!(
                "subtitles='{}':force_style='{}'",
                escape_filter_path(captions),
                s.caption_style
            ));
        }
        filters.push(format!("[{}]{}[vout]", video_label, chain.join(",")));

        cmd.filter_complex(filters.join(";"))
            .map("[vout]")
            .map(format!("{}:a", audio_index))
            .video_codec("libx264")
            .preset(s.preset.clone())
            .crf(s.crf)
            .output_args(["-pix_fmt", "yuv420p", "-r"])
            .output_arg(s.fps.to_string())
            .audio_codec("aac")
            .audio_bitrate("192k")
            .output_args(["-movflags", "+faststart"])
            .shortest()
    }
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    async fn compose(&self, job: &ComposeJob) -> MediaResult<ComposeOutput> {
        let started = Instant::now();

        let narration = probe_media(&job.narration).await?;
        if !narration.has_audio || narration.duration <= 0.0 {
            return Err(MediaError::InvalidMedia(format!(
                "narration has no playable audio: {}",
                job.narration.display()
            )));
        }

        info!(
            visuals = job.visuals.len(),
            duration_secs = narration.duration,
            "Composing video"
        );

        let title_file = match &job.title {
            Some(title) => {
                let path = title_file_path(job);
                tokio::fs::write(&path, title.trim()).await?;
                Some(path)
            }
            None => None,
        };

        let cmd = self.build_command(job, narration.duration);
        self.runner.run(&cmd).await?;

        let thumbnail_written = match generate_thumbnail(
            &self.runner,
            &job.output,
            &job.thumbnail,
            thumbnail_offset_secs(narration.duration),
            title_file.as_deref(),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Thumbnail extraction failed");
                false
            }
        };

        metrics::histogram!("reel_compose_duration_seconds").record(started.elapsed().as_secs_f64());

        Ok(ComposeOutput {
            duration_secs: narration.duration,
            thumbnail_written,
        })
    }

    async fn check(&self) -> MediaResult<String> {
        let ffmpeg = check_ffmpeg()?;
        check_ffprobe()?;

        let output = Command::new(&ffmpeg).arg("-version").output().await?;
        if !output.status.success() {
            return Err(MediaError::ffmpeg_failed(
                "ffmpeg -version failed",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
                output.status.code(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("ffmpeg").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(visuals: Vec<VisualInput>) -> ComposeJob {
        ComposeJob {
            title: Some("Dune: Part Two".to_string()),
            narration: PathBuf::from("/runs/r1/narration.mp3"),
            captions: Some(PathBuf::from("/runs/r1/captions.srt")),
            visuals,
            output: PathBuf::from("/runs/r1/final.mp4"),
            thumbnail: PathBuf::from("/runs/r1/thumbnail.jpg"),
        }
    }

    #[test]
    fn test_plan_timeline_cycles_visuals() {
        let plan = plan_timeline(2, 20.0);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.iter().map(|e| e.visual).collect::<Vec<_>>(), vec![0, 1, 0]);
        let total: f64 = plan.iter().map(|e| e.duration_secs).sum();
        assert!((total - 20.0).abs() < 1e-9);
        assert!(plan.iter().all(|e| e.duration_secs <= MAX_SEGMENT_SECS));
    }

    #[test]
    fn test_plan_timeline_shows_every_visual() {
        let plan = plan_timeline(5, 8.0);
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn test_plan_timeline_is_bounded() {
        assert_eq!(plan_timeline(3, 100_000.0).len(), MAX_TIMELINE_ENTRIES);
        assert!(plan_timeline(0, 60.0).is_empty());
    }

    #[test]
    fn test_solid_background_without_visuals() {
        let compositor = FfmpegCompositor::default();
        let args = compositor.build_command(&job(vec![]), 12.0).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("color=c=0x14141e:s=1920x1080"));
        assert!(joined.contains("[0:v]fade=t=in:st=0:d=1.000,fade=t=out:st=11.000:d=1.000,drawtext="));
        assert!(joined.contains(",subtitles="));
        assert!(joined.contains("-map 1:a"));
    }

    #[test]
    fn test_visual_inputs_precede_narration() {
        let compositor = FfmpegCompositor::default();
        let visuals = vec![
            VisualInput {
                path: PathBuf::from("/runs/r1/visuals/a.mp4"),
                kind: AssetKind::Video,
            },
            VisualInput {
                path: PathBuf::from("/runs/r1/visuals/b.jpg"),
                kind: AssetKind::Image,
            },
        ];
        let cmd = compositor.build_command(&job(visuals), 10.0);
        assert_eq!(cmd.input_count(), 3);
        let joined = cmd.build_args().join(" ");
        assert!(joined.contains("concat=n=2:v=1:a=0[vcat]"));
        assert!(joined.contains("[vcat]fade=t=in"));
        assert!(joined.contains("subtitles="));
        assert!(joined.contains("-map 2:a"));
        assert!(joined.contains("-loop 1"));
    }

    #[test]
    fn test_title_card_fades_over_opening_seconds() {
        let compositor = FfmpegCompositor::default();
        let graph = compositor.build_command(&job(vec![]), 30.0).build_args().join(" ");

        assert!(graph.contains("drawtext=textfile='/runs/r1/final.title.txt':expansion=none"));
        assert!(graph.contains("fontsize=72"));
        assert!(graph.contains("enable='between(t,0,3.000)'"));
        assert!(graph.contains("alpha='if(lt(t,0.500),t/0.500,if(lt(t,2.500),1,(3.000-t)/0.500))'"));
        assert!(graph.contains("fade=t=out:st=29.000:d=1.000"));
        let drawtext = graph.find("drawtext").unwrap();
        assert!(drawtext < graph.find("subtitles").unwrap());
    }

    #[test]
    fn test_untitled_job_has_fades_only() {
        let compositor = FfmpegCompositor::default();
        let mut untitled = job(vec![]);
        untitled.title = None;
        untitled.captions = None;
        let graph = compositor.build_command(&untitled, 1.0).build_args().join(" ");

        assert!(!graph.contains("drawtext"));
        assert!(graph.contains("[0:v]fade=t=in:st=0:d=0.500,fade=t=out:st=0.500:d=0.500[vout]"));
    }
}
