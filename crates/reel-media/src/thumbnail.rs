//! Thumbnail extraction from the composed video, with the title drawn on.

use std::path::Path;

use crate::command::{escape_filter_path, FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Width of the generated thumbnail; height follows the aspect ratio.
pub const THUMBNAIL_WIDTH: u32 = 1280;

/// Pick the frame at 10% of the video, capped at 30 seconds in.
pub fn thumbnail_offset_secs(duration_secs: f64) -> f64 {
    (duration_secs * 0.1).clamp(0.0, 30.0)
}

/// Title size on the thumbnail.
pub const THUMBNAIL_TITLE_SIZE: u32 = 60;

/// Build the thumbnail command without running it.
pub fn thumbnail_command(
    video_path: &Path,
    output_path: &Path,
    offset_secs: f64,
    title_file: Option<&Path>,
) -> FfmpegCommand {
    let mut filter = format!("scale={}:-2", THUMBNAIL_WIDTH);
    if let Some(title_file) = title_file {
        filter.push_str(&format!(
            ",drawtext=textfile='{}':expansion=none:fontsize={}:fontcolor=white:\
             borderw=3:bordercolor=black:font=Arial:x=(w-text_w)/2:y=h-text_h-60",
            escape_filter_path(title_file),
            THUMBNAIL_TITLE_SIZE
        ));
    }
    FfmpegCommand::new(output_path)
        .input_with(
            ["-ss".to_string(), format!("{:.3}", offset_secs)],
            video_path.to_string_lossy(),
        )
        .single_frame()
        .video_filter(filter)
        .output_args(["-q:v", "2"])
        .log_level("error")
}

/// Generate a JPEG thumbnail from a video file.
pub async fn generate_thumbnail(
    runner: &FfmpegRunner,
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    offset_secs: f64,
    title_file: Option<&Path>,
) -> MediaResult<()> {
    let cmd = thumbnail_command(video_path.as_ref(), output_path.as_ref(), offset_secs, title_file);
    runner.run(&cmd).await
}
