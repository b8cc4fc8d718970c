//! Colormaps and intensity scalings for rendering.
//!
//! Colormaps are piecewise-linear RGB ramps over `[0, 1]`. The `sdoaia*`
//! ramps approximate the channel colours used for AIA quick-look images.

use serde::Serialize;
use std::fmt;

use crate::error::{HelioError, Result};

type Stop = (f64, [u8; 3]);

const GRAY: &[Stop] = &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])];
const SDOAIA171: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.4, [160, 90, 10]),
    (0.75, [230, 190, 80]),
    (1.0, [255, 255, 255]),
];
const SDOAIA193: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.4, [150, 80, 40]),
    (0.75, [220, 170, 120]),
    (1.0, [255, 255, 255]),
];
const SDOAIA211: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.4, [140, 60, 120]),
    (0.75, [220, 150, 200]),
    (1.0, [255, 255, 255]),
];
const SDOAIA304: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.4, [180, 40, 0]),
    (0.75, [255, 150, 60]),
    (1.0, [255, 255, 255]),
];
const VIRIDIS: &[Stop] = &[
    (0.0, [68, 1, 84]),
    (0.25, [59, 82, 139]),
    (0.5, [33, 145, 140]),
    (0.75, [94, 201, 98]),
    (1.0, [253, 231, 37]),
];

const COLORMAPS: &[(&str, &[Stop])] = &[
    ("gray", GRAY),
    ("sdoaia171", SDOAIA171),
    ("sdoaia193", SDOAIA193),
    ("sdoaia211", SDOAIA211),
    ("sdoaia304", SDOAIA304),
    ("viridis", VIRIDIS),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Colormap {
    name: &'static str,
    stops: &'static [Stop],
}

impl Colormap {
    pub fn by_name(name: &str) -> Result<Colormap> {
        let wanted = name.trim().to_ascii_lowercase();
        COLORMAPS
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|(name, stops)| Colormap { name, stops })
            .ok_or_else(|| {
                HelioError::InvalidQuery(format!(
                    "unknown colormap '{}' (known: {})",
                    name,
                    Colormap::names().join(", ")
                ))
            })
    }

    pub fn names() -> Vec<&'static str> {
        COLORMAPS.iter().map(|(n, _)| *n).collect()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Colour for a normalized value. Out-of-range values clamp; NaN is black.
    pub fn color(&self, t: f64) -> [u8; 3] {
        if t.is_nan() {
            return [0, 0, 0];
        }
        let t = t.clamp(0.0, 1.0);
        for pair in self.stops.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
                return [lerp(c0[0], c1[0]), lerp(c0[1], c1[1]), lerp(c0[2], c1[2])];
            }
        }
        self.stops.last().map(|(_, c)| *c).unwrap_or([0, 0, 0])
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Stretch applied after clipping to the `[low, high]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Linear,
    Sqrt,
    Log,
}

/// Steepness of the log stretch: `ln(1 + a t) / ln(1 + a)`.
const LOG_A: f64 = 1000.0;

impl Scale {
    pub fn by_name(name: &str) -> Result<Scale> {
        match name.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Scale::Linear),
            "sqrt" => Ok(Scale::Sqrt),
            "log" => Ok(Scale::Log),
            other => Err(HelioError::InvalidQuery(format!(
                "unknown scale '{}' (known: linear, sqrt, log)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scale::Linear => "linear",
            Scale::Sqrt => "sqrt",
            Scale::Log => "log",
        }
    }

    /// Map `value` into `[0, 1]` given the clip window. NaN stays NaN.
    pub fn normalize(&self, value: f64, low: f64, high: f64) -> f64 {
        if value.is_nan() {
            return f64::NAN;
        }
        if high <= low {
            return 0.0;
        }
        let t = ((value - low) / (high - low)).clamp(0.0, 1.0);
        match self {
            Scale::Linear => t,
            Scale::Sqrt => t.sqrt(),
            Scale::Log => (1.0 + LOG_A * t).ln() / (1.0 + LOG_A).ln(),
        }
    }
}
