//! Stacked time-series figures.
//!
//! One panel per requested column, all sharing the table's time axis. Each
//! panel gets a frame, light grid lines at UTC day boundaries and its
//! series drawn as a polyline that breaks at NaN. Markers are vertical
//! lines across every panel. No text is drawn.

use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::PlotConfig;
use crate::error::{HelioError, Result};
use crate::render::save_png;
use crate::timeseries::TimeSeriesTable;

const MARGIN_LEFT: u32 = 60;
const MARGIN_RIGHT: u32 = 20;
const MARGIN_TOP: u32 = 20;
const MARGIN_BOTTOM: u32 = 30;
const PANEL_GAP: u32 = 10;

const BACKGROUND: [u8; 3] = [255, 255, 255];
const FRAME: [u8; 3] = [0, 0, 0];
const GRID: [u8; 3] = [220, 220, 220];

pub type Color = [u8; 3];

/// Named colours or `#rrggbb`.
pub fn parse_color(text: &str) -> Result<Color> {
    let text = text.trim();
    let named = match text.to_ascii_lowercase().as_str() {
        "black" => Some([0, 0, 0]),
        "red" => Some([214, 39, 40]),
        "blue" => Some([31, 119, 180]),
        "green" => Some([44, 160, 44]),
        "orange" => Some([255, 127, 14]),
        "purple" => Some([148, 103, 189]),
        "gray" | "grey" => Some([127, 127, 127]),
        _ => None,
    };
    if let Some(color) = named {
        return Ok(color);
    }
    let hex = text
        .strip_prefix('#')
        .filter(|h| h.len() == 6)
        .ok_or_else(|| HelioError::Parse(format!("unknown color '{}'", text)))?;
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| HelioError::Parse(format!("unknown color '{}'", text)))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub column: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub time: DateTime<Utc>,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotSpec {
    pub panels: Vec<Panel>,
    pub markers: Vec<Marker>,
    pub width: u32,
    pub height: u32,
}

impl PlotSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            panels: Vec::new(),
            markers: Vec::new(),
            width,
            height,
        }
    }

    pub fn from_config(config: &PlotConfig) -> Self {
        PlotSpec::new(config.width, config.height)
    }

    pub fn panel(mut self, column: impl Into<String>, color: Color) -> Self {
        self.panels.push(Panel {
            column: column.into(),
            color,
        });
        self
    }

    pub fn marker(mut self, time: DateTime<Utc>, color: Color) -> Self {
        self.markers.push(Marker { time, color });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotOutput {
    pub path: PathBuf,
    pub panels: usize,
    pub markers_drawn: usize,
    pub markers_skipped: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Pixel rectangle, inclusive on all sides.
#[derive(Debug, Clone, Copy)]
struct Rect {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

struct Canvas {
    img: RgbImage,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            img: RgbImage::from_pixel(width, height, Rgb(BACKGROUND)),
        }
    }

    fn put(&mut self, x: i64, y: i64, color: Color) {
        if x >= 0 && y >= 0 && (x as u32) < self.img.width() && (y as u32) < self.img.height() {
            self.img.put_pixel(x as u32, y as u32, Rgb(color));
        }
    }

    /// Bresenham line between two points.
    fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Color) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        loop {
            self.put(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn vline(&mut self, x: i64, top: u32, bottom: u32, color: Color) {
        self.line((x, top as i64), (x, bottom as i64), color);
    }

    fn hline(&mut self, y: i64, left: u32, right: u32, color: Color) {
        self.line((left as i64, y), (right as i64, y), color);
    }

    fn frame(&mut self, r: Rect) {
        self.hline(r.top as i64, r.left, r.right, FRAME);
        self.hline(r.bottom as i64, r.left, r.right, FRAME);
        self.vline(r.left as i64, r.top, r.bottom, FRAME);
        self.vline(r.right as i64, r.top, r.bottom, FRAME);
    }
}

struct TimeAxis {
    start: DateTime<Utc>,
    span_ms: f64,
    left: u32,
    width: u32,
}

impl TimeAxis {
    fn x(&self, t: DateTime<Utc>) -> i64 {
        let frac = (t - self.start).num_milliseconds() as f64 / self.span_ms;
        self.left as i64 + (frac * (self.width - 1) as f64).round() as i64
    }
}

/// Midnights strictly inside `(start, end]`.
fn day_boundaries(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let Some(mut day) = start.date_naive().succ_opt() else {
        return out;
    };
    loop {
        let Some(midnight) = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc()) else {
            break;
        };
        if midnight > end {
            break;
        }
        out.push(midnight);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

fn panel_rects(spec: &PlotSpec) -> Result<Vec<Rect>> {
    let n = spec.panels.len() as u32;
    let usable_h = spec
        .height
        .saturating_sub(MARGIN_TOP + MARGIN_BOTTOM + PANEL_GAP * n.saturating_sub(1));
    let panel_h = usable_h / n.max(1);
    let right = spec.width.saturating_sub(MARGIN_RIGHT + 1);
    if panel_h < 10 || right <= MARGIN_LEFT + 10 {
        return Err(HelioError::InvalidQuery(format!(
            "{}x{} px is too small for {} panels",
            spec.width, spec.height, n
        )));
    }
    Ok((0..n)
        .map(|i| {
            let top = MARGIN_TOP + i * (panel_h + PANEL_GAP);
            Rect {
                left: MARGIN_LEFT,
                top,
                right,
                bottom: top + panel_h - 1,
            }
        })
        .collect())
}

/// Draw the figure in memory.
pub fn draw(table: &TimeSeriesTable, spec: &PlotSpec) -> Result<(RgbImage, PlotOutput)> {
    if spec.panels.is_empty() {
        return Err(HelioError::Parse("plot needs at least one panel".into()));
    }
    let (Some(start), Some(end)) = (table.start(), table.end()) else {
        return Err(HelioError::Parse("cannot plot an empty table".into()));
    };
    for panel in &spec.panels {
        if table.column(&panel.column).is_none() {
            return Err(HelioError::Parse(format!(
                "no column '{}' (available: {})",
                panel.column,
                table.column_names().join(", ")
            )));
        }
    }

    let rects = panel_rects(spec)?;
    let mut canvas = Canvas::new(spec.width, spec.height);
    let span_ms = ((end - start).num_milliseconds() as f64).max(1.0);
    let axis = TimeAxis {
        start,
        span_ms,
        left: MARGIN_LEFT + 1,
        width: rects[0].right - rects[0].left - 1,
    };
    let midnights = day_boundaries(start, end);

    for (panel, rect) in spec.panels.iter().zip(&rects) {
        for quarter in 1..4 {
            let y = rect.top + (rect.bottom - rect.top) * quarter / 4;
            canvas.hline(y as i64, rect.left, rect.right, GRID);
        }
        for &midnight in &midnights {
            canvas.vline(axis.x(midnight), rect.top, rect.bottom, GRID);
        }

        let Some(column) = table.column(&panel.column) else {
            continue;
        };
        match table.finite_range(&panel.column) {
            Some((lo, hi)) => {
                let (lo, hi) = if hi > lo {
                    let pad = (hi - lo) * 0.05;
                    (lo - pad, hi + pad)
                } else {
                    (lo - 1.0, hi + 1.0)
                };
                let inner_top = (rect.top + 1) as f64;
                let inner_h = (rect.bottom - rect.top - 2) as f64;
                let y_of = |v: f64| (inner_top + (hi - v) / (hi - lo) * inner_h).round() as i64;

                let mut prev: Option<(i64, i64)> = None;
                for (t, &v) in table.index().iter().zip(&column.values) {
                    if !v.is_finite() {
                        prev = None;
                        continue;
                    }
                    let point = (axis.x(*t), y_of(v));
                    match prev {
                        Some(p) => canvas.line(p, point, panel.color),
                        None => canvas.put(point.0, point.1, panel.color),
                    }
                    prev = Some(point);
                }
            }
            None => warn!(column = %panel.column, "column has no finite values"),
        }
        canvas.frame(*rect);
    }

    let top = rects[0].top + 1;
    let bottom = rects[rects.len() - 1].bottom - 1;
    let mut drawn = 0;
    let mut skipped = 0;
    for marker in &spec.markers {
        if marker.time < start || marker.time > end {
            warn!(
                marker = %marker.time,
                start = %start,
                end = %end,
                "marker outside plotted range, skipped"
            );
            skipped += 1;
            continue;
        }
        let x = axis.x(marker.time);
        canvas.vline(x, top, bottom, marker.color);
        canvas.vline(x + 1, top, bottom, marker.color);
        drawn += 1;
    }

    let output = PlotOutput {
        path: PathBuf::new(),
        panels: rects.len(),
        markers_drawn: drawn,
        markers_skipped: skipped,
        start,
        end,
    };
    Ok((canvas.img, output))
}

/// Draw and save the figure as PNG. The parent directory must exist.
pub fn compose(table: &TimeSeriesTable, spec: &PlotSpec, path: &Path) -> Result<PlotOutput> {
    let (img, mut output) = draw(table, spec)?;
    save_png(&img, path)?;
    output.path = path.to_path_buf();
    info!(
        path = %path.display(),
        panels = output.panels,
        markers = output.markers_drawn,
        span_hours = (output.end - output.start).num_hours(),
        "plot written"
    );
    Ok(output)
}
