//! Solar maps: a 2-D image plus its observation metadata.
//!
//! A [`SolarMap`] is built in one step from a FITS file and never mutated;
//! if any required key is missing the load fails and no map is returned.
//! Several frames load into a [`MapSequence`] ordered by observation time.
//!
//! World coordinates are helioprojective arcseconds using the linear
//! (small-angle) approximation `world = CRVAL + CDELT * (pixel + 1 - CRPIX)`,
//! with `pixel` 0-based. Rotation matrices are ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{HelioError, Result};
use crate::fits::{self, FitsImage, Header, Value};
use crate::query::parse_time;
use crate::units::{Quantity, Unit};

const FITS_EXTENSIONS: &[&str] = &["fits", "fit", "fts"];

/// Pixel-to-world mapping for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub ctype: (String, String),
    /// Reference pixel, 1-based as in the header.
    pub crpix: (f64, f64),
    /// World coordinate of the reference pixel, arcsec.
    pub crval: (f64, f64),
    /// Plate scale, arcsec per pixel.
    pub cdelt: (f64, f64),
    /// Apparent solar radius, arcsec.
    pub rsun_obs: Option<f64>,
}

impl Frame {
    fn from_header(header: &Header, width: usize, height: usize) -> Frame {
        let axis = |n: u8, default_ctype: &str, default_crpix: f64| {
            let to_arcsec = match header
                .get_str(&format!("CUNIT{}", n))
                .map(|u| u.trim().to_ascii_lowercase())
                .as_deref()
            {
                Some("deg") => 3600.0,
                Some("arcmin") => 60.0,
                _ => 1.0,
            };
            (
                header
                    .get_str(&format!("CTYPE{}", n))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| default_ctype.to_string()),
                header
                    .get_f64(&format!("CRPIX{}", n))
                    .unwrap_or(default_crpix),
                header.get_f64(&format!("CRVAL{}", n)).unwrap_or(0.0) * to_arcsec,
                header.get_f64(&format!("CDELT{}", n)).unwrap_or(1.0) * to_arcsec,
            )
        };
        let (ctype1, crpix1, crval1, cdelt1) = axis(1, "HPLN-TAN", (width as f64 + 1.0) / 2.0);
        let (ctype2, crpix2, crval2, cdelt2) = axis(2, "HPLT-TAN", (height as f64 + 1.0) / 2.0);
        Frame {
            ctype: (ctype1, ctype2),
            crpix: (crpix1, crpix2),
            crval: (crval1, crval2),
            cdelt: (cdelt1, cdelt2),
            rsun_obs: header
                .get_f64("RSUN_OBS")
                .or_else(|| header.get_f64("RSUN")),
        }
    }
}

/// Observation metadata carried by every map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMeta {
    pub date_obs: DateTime<Utc>,
    pub instrument: String,
    pub observatory: Option<String>,
    #[serde(serialize_with = "serialize_quantity")]
    pub wavelength: Option<Quantity>,
    pub exposure_secs: Option<f64>,
    pub frame: Frame,
}

fn serialize_quantity<S: serde::Serializer>(
    q: &Option<Quantity>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match q {
        Some(q) => s.serialize_some(&q.to_string()),
        None => s.serialize_none(),
    }
}

impl MapMeta {
    fn from_header(header: &Header, width: usize, height: usize, path: &Path) -> Result<MapMeta> {
        let date_text = header
            .get_str("DATE-OBS")
            .or_else(|| header.get_str("DATE_OBS"))
            .ok_or_else(|| HelioError::corrupt(path, "missing DATE-OBS"))?;
        let date_obs = parse_time(date_text)
            .map_err(|_| HelioError::corrupt(path, format!("bad DATE-OBS '{}'", date_text)))?;

        let instrument = header
            .get_str("INSTRUME")
            .or_else(|| header.get_str("TELESCOP"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HelioError::corrupt(path, "missing INSTRUME/TELESCOP"))?;

        let observatory = header
            .get_str("TELESCOP")
            .or_else(|| header.get_str("OBSRVTRY"))
            .map(|s| s.trim().to_string());

        let wavelength = header.get_f64("WAVELNTH").map(|w| {
            let unit = header
                .get_str("WAVEUNIT")
                .and_then(|u| Unit::parse(u.trim()).ok())
                .filter(|u| u.dims() == crate::units::Dimensions::LENGTH)
                .unwrap_or_else(angstrom);
            Quantity::new(w, unit)
        });

        Ok(MapMeta {
            date_obs,
            instrument,
            observatory,
            wavelength,
            exposure_secs: header.get_f64("EXPTIME"),
            frame: Frame::from_header(header, width, height),
        })
    }

    fn to_header(&self) -> Header {
        let f = &self.frame;
        let mut header = Header::new()
            .with(
                "DATE-OBS",
                Value::Str(self.date_obs.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            )
            .with("INSTRUME", Value::Str(self.instrument.clone()))
            .with("CTYPE1", Value::Str(f.ctype.0.clone()))
            .with("CTYPE2", Value::Str(f.ctype.1.clone()))
            .with("CUNIT1", Value::Str("arcsec".into()))
            .with("CUNIT2", Value::Str("arcsec".into()))
            .with("CRPIX1", Value::Float(f.crpix.0))
            .with("CRPIX2", Value::Float(f.crpix.1))
            .with("CRVAL1", Value::Float(f.crval.0))
            .with("CRVAL2", Value::Float(f.crval.1))
            .with("CDELT1", Value::Float(f.cdelt.0))
            .with("CDELT2", Value::Float(f.cdelt.1));
        if let Some(obs) = &self.observatory {
            header.set("TELESCOP", Value::Str(obs.clone()));
        }
        if let Some(w) = &self.wavelength {
            header.set("WAVELNTH", Value::Float(w.value()));
            header.set("WAVEUNIT", Value::Str(w.unit().symbol().to_string()));
        }
        if let Some(e) = self.exposure_secs {
            header.set("EXPTIME", Value::Float(e));
        }
        if let Some(r) = f.rsun_obs {
            header.set("RSUN_OBS", Value::Float(r));
        }
        header
    }
}

fn angstrom() -> Unit {
    Unit::new("Angstrom", 1e-10, crate::units::Dimensions::LENGTH)
}

/// Finite-value summary of a map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Number of finite pixels.
    pub count: usize,
}

/// A loaded image. `data[y * width + x]`, `y = 0` is the bottom row.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarMap {
    width: usize,
    height: usize,
    data: Vec<f64>,
    meta: MapMeta,
}

impl SolarMap {
    pub fn new(width: usize, height: usize, data: Vec<f64>, meta: MapMeta) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(HelioError::InvalidQuery(format!(
                "{}x{} map cannot hold {} values",
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            meta,
        })
    }

    fn from_fits(image: FitsImage, path: &Path) -> Result<Self> {
        let meta = MapMeta::from_header(&image.header, image.width, image.height, path)?;
        Ok(Self {
            width: image.width,
            height: image.height,
            data: image.data,
            meta,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn meta(&self) -> &MapMeta {
        &self.meta
    }

    pub fn date_obs(&self) -> DateTime<Utc> {
        self.meta.date_obs
    }

    /// `"AIA 193 Angstrom 2024-05-10 00:00:05"`
    pub fn title(&self) -> String {
        let mut title = self.meta.instrument.clone();
        if let Some(w) = &self.meta.wavelength {
            title.push(' ');
            title.push_str(&w.to_string());
        }
        title.push(' ');
        title.push_str(&self.meta.date_obs.format("%Y-%m-%d %H:%M:%S").to_string());
        title
    }

    pub fn value_at(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    /// Helioprojective (Tx, Ty) in arcsec for a 0-based pixel position.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let f = &self.meta.frame;
        (
            f.crval.0 + f.cdelt.0 * (x + 1.0 - f.crpix.0),
            f.crval.1 + f.cdelt.1 * (y + 1.0 - f.crpix.1),
        )
    }

    /// Inverse of [`SolarMap::pixel_to_world`].
    pub fn world_to_pixel(&self, tx: f64, ty: f64) -> (f64, f64) {
        let f = &self.meta.frame;
        (
            (tx - f.crval.0) / f.cdelt.0 + f.crpix.0 - 1.0,
            (ty - f.crval.1) / f.cdelt.1 + f.crpix.1 - 1.0,
        )
    }

    /// Cut out the pixels whose centres fall inside the world-coordinate box
    /// spanned by `bottom_left` and `top_right` (arcsec).
    pub fn submap(&self, bottom_left: (f64, f64), top_right: (f64, f64)) -> Result<SolarMap> {
        let (ax, ay) = self.world_to_pixel(bottom_left.0, bottom_left.1);
        let (bx, by) = self.world_to_pixel(top_right.0, top_right.1);
        let span = |a: f64, b: f64, n: usize| -> Option<(usize, usize)> {
            let lo = a.min(b).ceil().max(0.0);
            let hi = a.max(b).floor().min(n as f64 - 1.0);
            (lo <= hi).then_some((lo as usize, hi as usize))
        };
        let x_range = span(ax, bx, self.width);
        let y_range = span(ay, by, self.height);
        let ((x0, x1), (y0, y1)) = match (x_range, y_range) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(HelioError::InvalidQuery(format!(
                    "submap box {:?}..{:?} does not overlap the image",
                    bottom_left, top_right
                )))
            }
        };

        let width = x1 - x0 + 1;
        let height = y1 - y0 + 1;
        let mut data = Vec::with_capacity(width * height);
        for y in y0..=y1 {
            let row = y * self.width;
            data.extend_from_slice(&self.data[row + x0..=row + x1]);
        }

        let mut meta = self.meta.clone();
        meta.frame.crpix.0 -= x0 as f64;
        meta.frame.crpix.1 -= y0 as f64;
        debug!(x0, y0, width, height, "submap");
        SolarMap::new(width, height, data, meta)
    }

    fn finite_sorted(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.data.iter().copied().filter(|v| v.is_finite()).collect();
        values.sort_by(f64::total_cmp);
        values
    }

    /// `None` when no pixel is finite.
    pub fn stats(&self) -> Option<MapStats> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in self.data.iter().filter(|v| v.is_finite()) {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| MapStats {
            min,
            max,
            mean: sum / count as f64,
            count,
        })
    }

    /// Linearly interpolated percentile (0-100) over finite pixels.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile_of(&self.finite_sorted(), p)
    }

    /// Two percentiles computed from one sort.
    pub fn percentile_range(&self, low: f64, high: f64) -> Option<(f64, f64)> {
        let sorted = self.finite_sorted();
        Some((percentile_of(&sorted, low)?, percentile_of(&sorted, high)?))
    }

    /// Save as a 2-D float FITS file.
    pub fn to_fits(&self, path: &Path) -> Result<()> {
        fits::write_image(path, &self.meta.to_header(), self.width, self.height, &self.data)
    }
}

impl fmt::Display for SolarMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}x{}]", self.title(), self.width, self.height)
    }
}

pub fn percentile_of(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Frames ordered by observation time sharing one coordinate frame type.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSequence {
    maps: Vec<SolarMap>,
}

impl MapSequence {
    pub fn new(mut maps: Vec<SolarMap>) -> Result<Self> {
        let first = maps
            .first()
            .ok_or_else(|| HelioError::InconsistentSequence("no frames to combine".into()))?;
        let ctype = first.meta.frame.ctype.clone();
        if let Some(odd) = maps.iter().find(|m| m.meta.frame.ctype != ctype) {
            return Err(HelioError::InconsistentSequence(format!(
                "frame at {} uses {:?}, expected {:?}",
                odd.meta.date_obs, odd.meta.frame.ctype, ctype
            )));
        }
        maps.sort_by_key(|m| m.meta.date_obs);
        Ok(Self { maps })
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn maps(&self) -> &[SolarMap] {
        &self.maps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SolarMap> {
        self.maps.iter()
    }

    pub fn first(&self) -> Option<&SolarMap> {
        self.maps.first()
    }

    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.maps.iter().map(|m| m.meta.date_obs).collect()
    }
}

/// Result of [`load`]: one map or a time-ordered sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Map(SolarMap),
    Sequence(MapSequence),
}

impl Loaded {
    /// The map for a single load, or the earliest frame of a sequence.
    pub fn first(&self) -> Option<&SolarMap> {
        match self {
            Loaded::Map(m) => Some(m),
            Loaded::Sequence(s) => s.first(),
        }
    }

    pub fn frame_count(&self) -> usize {
        match self {
            Loaded::Map(_) => 1,
            Loaded::Sequence(s) => s.len(),
        }
    }
}

fn has_fits_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FITS_EXTENSIONS.iter().any(|f| e.eq_ignore_ascii_case(f)))
        .unwrap_or(false)
}

/// Load a single image file.
pub fn load_map(path: &Path) -> Result<SolarMap> {
    let bytes = std::fs::read(path).map_err(|e| HelioError::io(path, e))?;
    if !has_fits_extension(path) && !fits::looks_like_fits(&bytes) {
        return Err(HelioError::unsupported(
            path,
            "not a FITS file (expected .fits, .fit or .fts)",
        ));
    }
    let image = fits::decode_image(&bytes, path)?;
    let map = SolarMap::from_fits(image, path)?;
    debug!(path = %path.display(), map = %map, "loaded map");
    Ok(map)
}

/// FITS files directly inside `dir`, sorted by name.
fn fits_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| HelioError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| HelioError::io(dir, e))?.path();
        if path.is_file() && has_fits_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load one file as a map, or several files (or a directory) as a sequence.
pub fn load(paths: &[PathBuf]) -> Result<Loaded> {
    if let [single] = paths {
        if !single.is_dir() {
            return load_map(single).map(Loaded::Map);
        }
    }

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(fits_in_dir(path)?);
        } else {
            files.push(path.clone());
        }
    }
    let maps = files
        .iter()
        .map(|p| load_map(p))
        .collect::<Result<Vec<_>>>()?;
    let sequence = MapSequence::new(maps)?;
    info!(frames = sequence.len(), "loaded map sequence");
    Ok(Loaded::Sequence(sequence))
}
