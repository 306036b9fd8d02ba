//! Audio inputs: background music and synthesized narration.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use reel_media::{probe_duration, AudioPlan, AudioTrack, MediaFetcher};
use reel_models::MusicTrack;
use reel_services::{NarrationService, ServiceError};

use crate::error::{WorkerError, WorkerResult};

/// Extension for a local copy of `location`; `mp3` when unknown.
fn audio_extension(location: &str) -> String {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "mp3".to_string())
}

/// Length of an audio file, or `fallback` when it cannot be probed.
async fn track_duration(path: &Path, fallback: Option<f64>) -> Option<f64> {
    match probe_duration(path).await {
        Ok(secs) if secs > 0.0 => Some(secs),
        Ok(_) => fallback,
        Err(e) => {
            warn!("Could not probe {}: {}", path.display(), e);
            fallback
        }
    }
}

/// Make the music track available locally.
pub async fn fetch_music(fetcher: &MediaFetcher, track: &MusicTrack, dir: &Path) -> WorkerResult<AudioTrack> {
    let dest = dir.join(format!("music.{}", audio_extension(&track.location)));
    let path = fetcher.fetch_to_file(&track.location, &dest).await?;
    let duration = track_duration(&path, track.duration_secs).await;
    debug!(music = %track.id, duration_secs = ?duration, "Music ready");
    Ok(AudioTrack::new(path, duration))
}

/// Synthesize narration audio for `text`.
pub async fn synthesize_narration(
    service: Option<&Arc<dyn NarrationService>>,
    text: &str,
    dir: &Path,
) -> WorkerResult<AudioTrack> {
    let service = service.ok_or_else(|| ServiceError::NotConfigured("NARRATION_SERVICE_URL".into()))?;
    let path = service.synthesize(text, &dir.join("narration.mp3")).await?;
    let duration = track_duration(&path, None).await;
    debug!(duration_secs = ?duration, "Narration ready");
    Ok(AudioTrack::new(path, duration))
}

/// Resolve every requested audio input into a plan.
pub async fn prepare_audio(
    fetcher: &MediaFetcher,
    narration_service: Option<&Arc<dyn NarrationService>>,
    narration_text: Option<&str>,
    music: Option<&MusicTrack>,
    music_volume: f32,
    dir: &Path,
) -> WorkerResult<AudioPlan> {
    let music = match music {
        Some(track) => Some(fetch_music(fetcher, track, dir).await?),
        None => None,
    };
    let narration = match narration_text {
        Some(text) => Some(synthesize_narration(narration_service, text, dir).await?),
        None => None,
    };
    Ok(AudioPlan::from_tracks(narration, music, music_volume))
}

/// Narration requested but no service to produce it.
pub fn narration_unavailable(narration_text: Option<&str>, service: Option<&Arc<dyn NarrationService>>) -> Option<WorkerError> {
    match (narration_text, service) {
        (Some(_), None) => Some(ServiceError::NotConfigured("NARRATION_SERVICE_URL".into()).into()),
        _ => None,
    }
}
