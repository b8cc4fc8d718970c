//! Map → PNG rendering.
//!
//! Pixels are clipped to a percentile window, stretched by a [`Scale`] and
//! coloured by a [`Colormap`]. FITS row 0 is the bottom of the image, so
//! rows are flipped when written. NaN pixels are black. Titles are not
//! drawn; they are returned in [`RenderOutput`] and logged.

use image::{ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::colormap::{Colormap, Scale};
use crate::config::RenderConfig;
use crate::error::{HelioError, Result};
use crate::map::{MapSequence, SolarMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub colormap: Colormap,
    pub scale: Scale,
    /// Percentile window, `0 <= low < high <= 100`.
    pub clip: (f64, f64),
}

impl RenderOptions {
    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            colormap: Colormap::by_name(&config.colormap)?,
            scale: Scale::by_name(&config.scale)?,
            clip: (config.clip_low, config.clip_high),
        })
    }
}

/// What a render produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutput {
    pub path: PathBuf,
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Data values mapped to the bottom and top of the colormap.
    pub range: Option<(f64, f64)>,
}

/// Colour a map in memory.
pub fn render_image(map: &SolarMap, opts: &RenderOptions) -> (RgbImage, Option<(f64, f64)>) {
    let range = map.percentile_range(opts.clip.0, opts.clip.1);
    let (low, high) = range.unwrap_or((0.0, 0.0));
    let width = map.width() as u32;
    let height = map.height() as u32;

    let mut img = RgbImage::new(width, height);
    for (i, &v) in map.data().iter().enumerate() {
        let x = (i % map.width()) as u32;
        let y = (i / map.width()) as u32;
        let rgb = if v.is_finite() {
            opts.colormap.color(opts.scale.normalize(v, low, high))
        } else {
            [0, 0, 0]
        };
        img.put_pixel(x, height - 1 - y, Rgb(rgb));
    }
    (img, range)
}

pub(crate) fn save_png(img: &RgbImage, out: &Path) -> Result<()> {
    img.save_with_format(out, ImageFormat::Png).map_err(|e| match e {
        image::ImageError::IoError(io) => HelioError::io(out, io),
        other => HelioError::io(out, std::io::Error::other(other.to_string())),
    })
}

/// Render `map` to a PNG at `out`. The parent directory must exist.
pub fn render_map(map: &SolarMap, opts: &RenderOptions, out: &Path) -> Result<RenderOutput> {
    let (img, range) = render_image(map, opts);
    save_png(&img, out)?;
    let title = map.title();
    info!(
        path = %out.display(),
        title = %title,
        colormap = %opts.colormap,
        scale = opts.scale.name(),
        "rendered map"
    );
    Ok(RenderOutput {
        path: out.to_path_buf(),
        title,
        width: img.width(),
        height: img.height(),
        range,
    })
}

/// Render every frame to `dir/frame_000.png`, `frame_001.png`, ... in time
/// order. `dir` must exist.
pub fn render_sequence(
    seq: &MapSequence,
    opts: &RenderOptions,
    dir: &Path,
) -> Result<Vec<RenderOutput>> {
    seq.iter()
        .enumerate()
        .map(|(i, map)| render_map(map, opts, &dir.join(format!("frame_{:03}.png", i))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::sample_meta;

    fn opts(scale: Scale) -> RenderOptions {
        RenderOptions {
            colormap: Colormap::by_name("gray").unwrap(),
            scale,
            clip: (0.0, 100.0),
        }
    }

    #[test]
    fn bottom_row_is_drawn_last_and_nan_is_black() {
        // row 0 (bottom): 0, 1; row 1 (top): 2, NaN
        let map = SolarMap::new(2, 2, vec![0.0, 1.0, 2.0, f64::NAN], sample_meta()).unwrap();
        let (img, range) = render_image(&map, &opts(Scale::Linear));
        assert_eq!(range, Some((0.0, 2.0)));
        assert_eq!(img.get_pixel(0, 1).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(1, 1).0, [128, 128, 128]);
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn all_nan_map_renders_black() {
        let map = SolarMap::new(2, 1, vec![f64::NAN; 2], sample_meta()).unwrap();
        let (img, range) = render_image(&map, &opts(Scale::Log));
        assert!(range.is_none());
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn render_map_writes_png_and_reports_title() {
        let dir = tempfile::tempdir().unwrap();
        let map = SolarMap::new(3, 2, (0..6).map(f64::from).collect(), sample_meta()).unwrap();
        let out = dir.path().join("map.png");
        let output = render_map(&map, &opts(Scale::Sqrt), &out).unwrap();
        assert_eq!((output.width, output.height), (3, 2));
        assert!(output.title.contains("AIA"));
        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
    }

    #[test]
    fn missing_parent_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let map = SolarMap::new(1, 1, vec![1.0], sample_meta()).unwrap();
        let out = dir.path().join("no/such/dir/map.png");
        assert!(matches!(
            render_map(&map, &opts(Scale::Linear), &out),
            Err(HelioError::Io { .. })
        ));
    }

    #[test]
    fn sequence_frames_are_numbered_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut late = sample_meta();
        late.date_obs += chrono::Duration::hours(1);
        let seq = MapSequence::new(vec![
            SolarMap::new(1, 1, vec![2.0], late).unwrap(),
            SolarMap::new(1, 1, vec![1.0], sample_meta()).unwrap(),
        ])
        .unwrap();
        let outputs = render_sequence(&seq, &opts(Scale::Linear), dir.path()).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].path.ends_with("frame_000.png"));
        assert!(outputs[1].path.ends_with("frame_001.png"));
        assert!(outputs[0].title.contains("12:00:00"));
        assert!(outputs[1].title.contains("13:00:00"));
    }
}
