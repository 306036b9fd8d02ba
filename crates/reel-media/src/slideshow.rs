//! Slideshow encoding: timed still frames plus an audio plan into one file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use reel_models::{EncodingConfig, TransitionKind};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Longest fade applied at each end of a faded scene.
const FADE_SECS: f64 = 0.5;
const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// One still frame shown for a fixed time.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideFrame {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub transition: TransitionKind,
    /// UTF-8 text file drawn over the lower part of the frame
    pub caption: Option<PathBuf>,
}

/// An audio input with its duration when known.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub duration_secs: Option<f64>,
}

impl AudioTrack {
    pub fn new(path: impl Into<PathBuf>, duration_secs: Option<f64>) -> Self {
        Self {
            path: path.into(),
            duration_secs,
        }
    }
}

/// What ends up on the audio stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPlan {
    /// Generated silence for the whole video
    Silent,
    /// One track attached directly
    Single(AudioTrack),
    /// Narration at full level over attenuated music
    Mixed {
        narration: AudioTrack,
        music: AudioTrack,
        music_volume: f32,
    },
}

impl AudioPlan {
    /// Choose the plan from whichever tracks are present.
    pub fn from_tracks(narration: Option<AudioTrack>, music: Option<AudioTrack>, music_volume: f32) -> Self {
        match (narration, music) {
            (Some(narration), Some(music)) => AudioPlan::Mixed {
                narration,
                music,
                music_volume,
            },
            (Some(track), None) | (None, Some(track)) => AudioPlan::Single(track),
            (None, None) => AudioPlan::Silent,
        }
    }

    pub fn has_audio(&self) -> bool {
        !matches!(self, AudioPlan::Silent)
    }

    fn tracks(&self) -> Vec<&AudioTrack> {
        match self {
            AudioPlan::Silent => Vec::new(),
            AudioPlan::Single(track) => vec![track],
            AudioPlan::Mixed { narration, music, .. } => vec![narration, music],
        }
    }

    /// Length of the attached audio; the shorter track when mixed.
    pub fn audio_duration(&self) -> Option<f64> {
        self.tracks()
            .into_iter()
            .filter_map(|t| t.duration_secs)
            .filter(|d| d.is_finite() && *d > 0.0)
            .reduce(f64::min)
    }
}

/// How output length relates to attached audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioDurationMode {
    /// Stop at whichever of video or audio ends first
    #[default]
    Shortest,
    /// Always keep the full video, padding audio with silence
    Video,
}

impl FromStr for AudioDurationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shortest" => Ok(AudioDurationMode::Shortest),
            "video" | "longest" => Ok(AudioDurationMode::Video),
            other => Err(format!("unknown audio duration mode: {}", other)),
        }
    }
}

/// Everything needed to encode one slideshow.
#[derive(Debug, Clone)]
pub struct SlideshowSpec {
    pub frames: Vec<SlideFrame>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoding: EncodingConfig,
    pub audio: AudioPlan,
    pub duration_mode: AudioDurationMode,
}

impl SlideshowSpec {
    /// Sum of scene durations.
    pub fn video_duration(&self) -> f64 {
        self.frames.iter().map(|f| f.duration_secs).sum()
    }

    /// Duration of the encoded file.
    pub fn output_duration(&self) -> f64 {
        expected_output_duration(self.video_duration(), &self.audio, self.duration_mode)
    }

    fn validate(&self) -> MediaResult<()> {
        if self.frames.is_empty() {
            return Err(MediaError::invalid_input("slideshow has no frames"));
        }
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(MediaError::invalid_input(format!(
                "resolution must be even and non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(MediaError::invalid_input("fps must be positive"));
        }
        if let Some((i, _)) = self
            .frames
            .iter()
            .enumerate()
            .find(|(_, f)| !(f.duration_secs.is_finite() && f.duration_secs > 0.0))
        {
            return Err(MediaError::invalid_input(format!("scene {} has no duration", i)));
        }
        Ok(())
    }
}

/// Output length for a video of `video_secs` under an audio plan.
pub fn expected_output_duration(video_secs: f64, audio: &AudioPlan, mode: AudioDurationMode) -> f64 {
    match (mode, audio.audio_duration()) {
        (AudioDurationMode::Shortest, Some(audio_secs)) if audio.has_audio() => video_secs.min(audio_secs),
        _ => video_secs,
    }
}

/// Per-scene video chain including the optional fade.
fn scene_filter(index: usize, frame: &SlideFrame, fps: u32, pixel_format: &str) -> String {
    let mut chain = format!("[{index}:v]setsar=1,fps={fps},format={pixel_format}");
    if let Some(caption) = &frame.caption {
        chain.push_str(&caption_filter(caption));
    }
    if frame.transition == TransitionKind::Fade {
        let fade = FADE_SECS.min(frame.duration_secs / 4.0);
        let out_start = (frame.duration_secs - fade).max(0.0);
        chain.push_str(&format!(
            ",fade=t=in:st=0:d={fade:.3},fade=t=out:st={out_start:.3}:d={fade:.3}"
        ));
    }
    chain.push_str(&format!("[v{index}]"));
    chain
}

/// `drawtext` reading the caption from a file, centred above the bottom edge.
fn caption_filter(path: &Path) -> String {
    // Quoted values are literal up to the next quote.
    let escaped = path.to_string_lossy().replace('\'', "");
    format!(
        ",drawtext=textfile='{escaped}':fontsize=h/22:fontcolor=white:\
         box=1:boxcolor=black@0.45:boxborderw=24:\
         x=(w-text_w)/2:y=h-text_h-h/8"
    )
}

/// Audio chain for the inputs following the frames, labelled `[aout]`.
fn audio_filter(plan: &AudioPlan, first_input: usize, mode: AudioDurationMode) -> Option<String> {
    let pad = match mode {
        AudioDurationMode::Video => ",apad",
        AudioDurationMode::Shortest => "",
    };
    match plan {
        AudioPlan::Silent => None,
        AudioPlan::Single(_) => Some(format!(
            "[{first_input}:a]aresample={AUDIO_SAMPLE_RATE}{pad}[aout]"
        )),
        AudioPlan::Mixed { music_volume, .. } => {
            let music_input = first_input + 1;
            Some(format!(
                "[{first_input}:a]aresample={AUDIO_SAMPLE_RATE},volume=1.0[narration];\
                 [{music_input}:a]aresample={AUDIO_SAMPLE_RATE},volume={music_volume:.2}[music];\
                 [narration][music]amix=inputs=2:duration=shortest:dropout_transition=0:normalize=0{pad}[aout]"
            ))
        }
    }
}

/// Full `-filter_complex` graph for a spec.
pub fn build_filter_graph(spec: &SlideshowSpec) -> String {
    let mut parts: Vec<String> = spec
        .frames
        .iter()
        .enumerate()
        .map(|(i, f)| scene_filter(i, f, spec.fps, &spec.encoding.pixel_format))
        .collect();

    let labels: String = (0..spec.frames.len()).map(|i| format!("[v{i}]")).collect();
    parts.push(format!("{labels}concat=n={}:v=1:a=0[vout]", spec.frames.len()));

    if let Some(audio) = audio_filter(&spec.audio, spec.frames.len(), spec.duration_mode) {
        parts.push(audio);
    }
    parts.join(";")
}

/// Build the FFmpeg command for a spec.
pub fn build_command(spec: &SlideshowSpec, output: &Path) -> FfmpegCommand {
    let fps = spec.fps.to_string();
    let mut cmd = FfmpegCommand::new(output);

    for frame in &spec.frames {
        cmd = cmd.input_with(
            [
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                fps.clone(),
                "-t".to_string(),
                format!("{:.3}", frame.duration_secs),
            ],
            frame.path.to_string_lossy(),
        );
    }

    let video_secs = spec.video_duration();
    let audio_label = match &spec.audio {
        AudioPlan::Silent => {
            let index = cmd.input_count();
            cmd = cmd.input_with(
                ["-f".to_string(), "lavfi".to_string(), "-t".to_string(), format!("{:.3}", video_secs)],
                format!("anullsrc=channel_layout=stereo:sample_rate={AUDIO_SAMPLE_RATE}"),
            );
            format!("{index}:a")
        }
        AudioPlan::Single(track) => {
            cmd = cmd.input(&track.path);
            "[aout]".to_string()
        }
        AudioPlan::Mixed { narration, music, .. } => {
            cmd = cmd.input(&narration.path).input(&music.path);
            "[aout]".to_string()
        }
    };

    cmd = cmd
        .filter_complex(build_filter_graph(spec))
        .map("[vout]")
        .map(audio_label)
        .output_arg("-r")
        .output_arg(fps)
        .output_args(spec.encoding.to_ffmpeg_args());

    if spec.duration_mode == AudioDurationMode::Shortest && spec.audio.has_audio() {
        cmd = cmd.output_arg("-shortest");
    }

    cmd.duration(spec.output_duration())
        .output_args(["-movflags", "+faststart"])
}

/// Result of a finished encode.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideshowOutput {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// Encode the slideshow, reporting whole-percent progress.
///
/// Runs to completion; there is no timeout or cancellation.
pub async fn encode_slideshow<F>(spec: &SlideshowSpec, output: &Path, on_progress: F) -> MediaResult<SlideshowOutput>
where
    F: Fn(u8) + Send + 'static,
{
    spec.validate()?;

    let duration_secs = spec.output_duration();
    let total_ms = (duration_secs * 1000.0) as i64;
    let cmd = build_command(spec, output);

    info!(
        scenes = spec.frames.len(),
        duration_secs = duration_secs,
        audio = spec.audio.has_audio(),
        "Encoding slideshow to {}",
        output.display()
    );

    FfmpegRunner::new()
        .run_with_progress(&cmd, move |p| on_progress(p.percent(total_ms)))
        .await?;

    if !output.exists() {
        return Err(MediaError::ffmpeg_failed(
            "FFmpeg reported success but wrote no output",
            None,
            None,
        ));
    }

    Ok(SlideshowOutput {
        path: output.to_path_buf(),
        duration_secs,
    })
}
