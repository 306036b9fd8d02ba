//! Still frame preparation: decode, center-crop to the template resolution,
//! optional tonal preset.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::debug;

use reel_models::TonalPreset;

use crate::error::{MediaError, MediaResult};

/// Target geometry and look for every frame of one composition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    pub preset: Option<TonalPreset>,
}

impl FrameSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            preset: None,
        }
    }

    pub fn with_preset(mut self, preset: Option<TonalPreset>) -> Self {
        self.preset = preset;
        self
    }
}

/// Decode `bytes`, shape them to `spec` and write a PNG to `output`.
///
/// Runs on the blocking pool; decoding and resampling are CPU bound.
pub async fn render_frame(
    bytes: Vec<u8>,
    location: String,
    spec: FrameSpec,
    output: PathBuf,
) -> MediaResult<PathBuf> {
    tokio::task::spawn_blocking(move || {
        let frame = prepare_frame(&bytes, &location, spec)?;
        save_png(&frame, &output)?;
        Ok(output)
    })
    .await
    .map_err(|e| MediaError::invalid_input(format!("frame task failed: {}", e)))?
}

/// Decode and shape one frame in memory.
pub fn prepare_frame(bytes: &[u8], location: &str, spec: FrameSpec) -> MediaResult<RgbImage> {
    if spec.width == 0 || spec.height == 0 {
        return Err(MediaError::invalid_input(format!(
            "invalid frame size {}x{}",
            spec.width, spec.height
        )));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| MediaError::decode_failed(location, e.to_string()))?;
    debug!(
        location = location,
        src_width = decoded.width(),
        src_height = decoded.height(),
        "Decoded image"
    );

    let filled = decoded.resize_to_fill(spec.width, spec.height, FilterType::Lanczos3);
    let mut rgb = filled.to_rgb8();
    if let Some(preset) = spec.preset {
        apply_preset(&mut rgb, preset);
    }
    Ok(rgb)
}

fn save_png(frame: &RgbImage, output: &Path) -> MediaResult<()> {
    DynamicImage::ImageRgb8(frame.clone()).save_with_format(output, ImageFormat::Png)?;
    Ok(())
}

/// Apply a named tonal preset in place.
pub fn apply_preset(img: &mut RgbImage, preset: TonalPreset) {
    match preset {
        TonalPreset::Vivid => {
            adjust_saturation(img, 1.35);
            adjust_brightness(img, 8);
        }
        TonalPreset::Muted => adjust_saturation(img, 0.6),
        TonalPreset::Bright => adjust_brightness(img, 25),
        TonalPreset::Warm => tint(img, Rgb([255, 170, 90]), 0.15),
        TonalPreset::Cool => tint(img, Rgb([90, 150, 255]), 0.15),
        TonalPreset::Mono => adjust_saturation(img, 0.0),
        TonalPreset::Sepia => {
            adjust_saturation(img, 0.0);
            tint(img, Rgb([112, 66, 20]), 0.35);
        }
    }
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Scale distance from gray; 0 is grayscale, 1 is unchanged.
fn adjust_saturation(img: &mut RgbImage, factor: f32) {
    for p in img.pixels_mut() {
        let y = luma(p);
        for c in 0..3 {
            p[c] = clamp_u8(y + (p[c] as f32 - y) * factor);
        }
    }
}

fn adjust_brightness(img: &mut RgbImage, delta: i32) {
    for p in img.pixels_mut() {
        for c in 0..3 {
            p[c] = (p[c] as i32 + delta).clamp(0, 255) as u8;
        }
    }
}

fn tint(img: &mut RgbImage, color: Rgb<u8>, amount: f32) {
    let amount = amount.clamp(0.0, 1.0);
    for p in img.pixels_mut() {
        for c in 0..3 {
            p[c] = clamp_u8(p[c] as f32 * (1.0 - amount) + color[c] as f32 * amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_center_crop_to_portrait() {
        let bytes = png(400, 200, [10, 200, 30]);
        let frame = prepare_frame(&bytes, "wide.png", FrameSpec::new(108, 192)).unwrap();
        assert_eq!(frame.dimensions(), (108, 192));
    }

    #[test]
    fn test_decode_failure_names_location() {
        let err = prepare_frame(b"not an image", "https://cdn/x.jpg", FrameSpec::new(10, 10)).unwrap_err();
        match err {
            MediaError::DecodeFailed { location, .. } => assert_eq!(location, "https://cdn/x.jpg"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mono_removes_color() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([200, 40, 40]));
        apply_preset(&mut img, TonalPreset::Mono);
        let p = img.get_pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }

    #[test]
    fn test_bright_lifts_and_clamps() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([100, 240, 0]));
        apply_preset(&mut img, TonalPreset::Bright);
        assert_eq!(img.get_pixel(0, 0), &Rgb([125, 255, 25]));
    }

    #[test]
    fn test_warm_and_cool_shift_channels() {
        let gray = Rgb([128, 128, 128]);
        let mut warm = RgbImage::from_pixel(1, 1, gray);
        apply_preset(&mut warm, TonalPreset::Warm);
        let w = warm.get_pixel(0, 0);
        assert!(w[0] > w[2]);

        let mut cool = RgbImage::from_pixel(1, 1, gray);
        apply_preset(&mut cool, TonalPreset::Cool);
        let c = cool.get_pixel(0, 0);
        assert!(c[2] > c[0]);
    }

    #[test]
    fn test_every_preset_keeps_dimensions() {
        for preset in TonalPreset::ALL {
            let bytes = png(30, 30, [90, 90, 200]);
            let frame = prepare_frame(&bytes, "p.png", FrameSpec::new(20, 10).with_preset(Some(*preset))).unwrap();
            assert_eq!(frame.dimensions(), (20, 10));
        }
    }

    #[tokio::test]
    async fn test_render_frame_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frame_000.png");
        let written = render_frame(png(64, 64, [1, 2, 3]), "a.png".into(), FrameSpec::new(32, 48), out.clone())
            .await
            .unwrap();
        assert_eq!(written, out);
        let reloaded = image::open(&out).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (32, 48));
    }
}
