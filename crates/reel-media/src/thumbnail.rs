//! Thumbnail extraction.

use std::path::Path;

use reel_models::encoding::THUMBNAIL_SCALE_WIDTH;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Seek position for a thumbnail near the start, kept inside short videos.
pub fn thumbnail_offset(preferred_secs: f64, video_secs: f64) -> f64 {
    if video_secs <= 0.0 {
        return 0.0;
    }
    preferred_secs.max(0.0).min(video_secs / 2.0)
}

fn thumbnail_command(video_path: &Path, output_path: &Path, offset_secs: f64) -> FfmpegCommand {
    FfmpegCommand::new(output_path)
        .input_with(["-ss".to_string(), format!("{:.3}", offset_secs)], video_path.to_string_lossy())
        .single_frame()
        .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
        .log_level("error")
}

/// Write a JPEG thumbnail taken `offset_secs` into the video.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    offset_secs: f64,
) -> MediaResult<()> {
    let cmd = thumbnail_command(video_path.as_ref(), output_path.as_ref(), offset_secs);
    FfmpegRunner::new().run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_offset_stays_near_start() {
        assert!((thumbnail_offset(1.0, 12.0) - 1.0).abs() < 1e-9);
        assert!((thumbnail_offset(1.0, 1.0) - 0.5).abs() < 1e-9);
        assert_eq!(thumbnail_offset(1.0, 0.0), 0.0);
        assert_eq!(thumbnail_offset(-3.0, 10.0), 0.0);
    }

    #[test]
    fn test_thumbnail_command() {
        let args = thumbnail_command(Path::new("/w/out.mp4"), Path::new("/w/thumb.jpg"), 1.0).build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "/w/out.mp4").unwrap();
        assert!(ss < input);
        assert!(args.contains(&"scale=480:-2".to_string()));
        assert!(args.contains(&"-frames:v".to_string()));
    }
}
