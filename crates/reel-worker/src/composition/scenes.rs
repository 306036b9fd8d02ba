//! Scene derivation.

use reel_models::{ImageRef, Scene, TransitionKind};

/// Scenes needed to reach `min_total_secs` at `scene_secs` each.
pub fn min_scene_count(min_total_secs: f64, scene_secs: f64) -> usize {
    if !(scene_secs.is_finite() && scene_secs > 0.0) || !(min_total_secs.is_finite() && min_total_secs > 0.0) {
        return 0;
    }
    // Tolerate float noise such as 9.000000001 / 3.0.
    (min_total_secs / scene_secs - 1e-9).ceil().max(0.0) as usize
}

/// Build the ordered scene list for one composition.
///
/// The count is `max(ceil(min_total / d), key_points.len())`, and at least
/// one. Images are reused cyclically when there are fewer images than
/// scenes; scenes past the last key point carry no text. Returns an empty
/// list when there are no images.
pub fn derive_scenes(
    images: &[ImageRef],
    key_points: &[String],
    scene_secs: f64,
    min_total_secs: f64,
    transition: TransitionKind,
) -> Vec<Scene> {
    if images.is_empty() {
        return Vec::new();
    }

    let target = min_scene_count(min_total_secs, scene_secs)
        .max(key_points.len())
        .max(1);

    (0..target)
        .map(|i| Scene {
            image: images[i % images.len()].clone(),
            text: key_points.get(i).map(|t| t.trim().to_string()).unwrap_or_default(),
            duration_secs: scene_secs,
            transition,
        })
        .collect()
}

/// Total length of the scene sequence.
pub fn total_duration(scenes: &[Scene]) -> f64 {
    scenes.iter().map(|s| s.duration_secs).sum()
}
