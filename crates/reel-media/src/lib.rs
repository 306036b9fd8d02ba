//! FFmpeg and image processing for product videos.
//!
//! This crate provides:
//! - Multi-input FFmpeg command building and a runner that parses `-progress pipe:2`
//! - FFprobe helpers for video and audio durations
//! - Fetching of local or remote images and audio with a bounded timeout
//! - Still frame preparation (center-crop resize, tonal presets)
//! - Slideshow encoding with an audio plan (silent, single track, narration over music)
//! - Thumbnail extraction

pub mod command;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod probe;
pub mod progress;
pub mod slideshow;
pub mod thumbnail;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fetch::{MediaFetcher, DEFAULT_FETCH_TIMEOUT};
pub use frame::{apply_preset, prepare_frame, render_frame, FrameSpec};
pub use probe::{probe_duration, probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use slideshow::{
    encode_slideshow, expected_output_duration, AudioDurationMode, AudioPlan, AudioTrack, SlideFrame,
    SlideshowOutput, SlideshowSpec,
};
pub use thumbnail::{generate_thumbnail, thumbnail_offset};
