//! Search specifications.
//!
//! A [`SearchSpec`] bundles a time range, an instrument, an optional
//! wavelength filter and an optional cadence sample. It is validated once at
//! build time and never mutated afterwards.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::{HelioError, Result};
use crate::models::RemoteFile;
use crate::units::{Dimensions, Quantity};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parse a UTC timestamp in any of the usual observatory spellings.
///
/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS[.fff]]` and the
/// `T`-separated forms. Naive times are taken as UTC.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = text.trim_end_matches('Z');
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(dt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(naive, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc());
            }
        }
    }
    Err(HelioError::InvalidQuery(format!(
        "unrecognized timestamp '{}'",
        text
    )))
}

/// `time + by`, or [`HelioError::InvalidQuery`] naming `what` when the
/// result falls outside the representable calendar.
pub fn shift(time: DateTime<Utc>, by: Duration, what: &str) -> Result<DateTime<Utc>> {
    time.checked_add_signed(by).ok_or_else(|| {
        HelioError::InvalidQuery(format!("{} is out of range ({} + {})", what, time, by))
    })
}

/// Closed UTC interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(HelioError::InvalidQuery(format!(
                "end time {} is before start time {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        TimeRange::new(parse_time(start)?, parse_time(end)?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// True when `[start, end]` shares at least one instant with this range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && end >= self.start
    }
}

/// Wavelength window in angstrom. A single wavelength has `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WavelengthRange {
    min: f64,
    max: f64,
}

const WAVELENGTH_TOLERANCE: f64 = 1e-6;

impl WavelengthRange {
    pub fn new(min_angstrom: f64, max_angstrom: f64) -> Result<Self> {
        if !(min_angstrom.is_finite() && max_angstrom.is_finite()) || min_angstrom <= 0.0 {
            return Err(HelioError::InvalidQuery(format!(
                "wavelength bounds must be positive, got {}..{}",
                min_angstrom, max_angstrom
            )));
        }
        if max_angstrom < min_angstrom {
            return Err(HelioError::InvalidQuery(format!(
                "wavelength max {} is below min {}",
                max_angstrom, min_angstrom
            )));
        }
        Ok(Self {
            min: min_angstrom,
            max: max_angstrom,
        })
    }

    pub fn single(angstrom: f64) -> Result<Self> {
        WavelengthRange::new(angstrom, angstrom)
    }

    /// Build from length quantities in any unit (`193 Angstrom`, `30.4 nm`).
    pub fn between(min: &Quantity, max: &Quantity) -> Result<Self> {
        WavelengthRange::new(to_angstrom(min)?, to_angstrom(max)?)
    }

    pub fn from_quantity(q: &Quantity) -> Result<Self> {
        WavelengthRange::between(q, q)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, angstrom: f64) -> bool {
        angstrom >= self.min - WAVELENGTH_TOLERANCE && angstrom <= self.max + WAVELENGTH_TOLERANCE
    }
}

fn to_angstrom(q: &Quantity) -> Result<f64> {
    if q.dims() != Dimensions::LENGTH {
        return Err(HelioError::InvalidQuery(format!(
            "wavelength must be a length, got '{}'",
            q
        )));
    }
    q.value_in("Angstrom")
}

/// Immutable search specification handed to a catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSpec {
    range: TimeRange,
    instrument: String,
    wavelength: Option<WavelengthRange>,
    #[serde(skip)]
    sample: Option<Duration>,
}

impl SearchSpec {
    pub fn builder() -> SearchSpecBuilder {
        SearchSpecBuilder::default()
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn wavelength(&self) -> Option<&WavelengthRange> {
        self.wavelength.as_ref()
    }

    /// Minimum spacing between returned records, if any.
    pub fn sample(&self) -> Option<Duration> {
        self.sample
    }

    /// Instrument, wavelength and time check for one record.
    ///
    /// A record matches when its `[start, end]` interval shares any instant
    /// with the query range, so an exposure that begins before the range
    /// and ends inside it is included. Records with `end < start` never
    /// match.
    pub fn matches(&self, record: &RemoteFile) -> bool {
        if !record.instrument.eq_ignore_ascii_case(&self.instrument) {
            return false;
        }
        if let Some(filter) = &self.wavelength {
            match record.wavelength {
                Some(w) if filter.contains(w) => {}
                _ => return false,
            }
        }
        record.start <= record.end && self.range.overlaps(record.start, record.end)
    }
}

#[derive(Debug, Default)]
pub struct SearchSpecBuilder {
    range: Option<TimeRange>,
    instrument: Option<String>,
    wavelength: Option<WavelengthRange>,
    sample: Option<Duration>,
}

impl SearchSpecBuilder {
    pub fn range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn wavelength(mut self, wavelength: WavelengthRange) -> Self {
        self.wavelength = Some(wavelength);
        self
    }

    pub fn sample(mut self, every: Duration) -> Self {
        self.sample = Some(every);
        self
    }

    pub fn build(self) -> Result<SearchSpec> {
        let range = self
            .range
            .ok_or_else(|| HelioError::InvalidQuery("a time range is required".into()))?;
        let instrument = self.instrument.unwrap_or_default().trim().to_string();
        if instrument.is_empty() {
            return Err(HelioError::InvalidQuery("an instrument is required".into()));
        }
        if let Some(every) = self.sample {
            if every <= Duration::zero() {
                return Err(HelioError::InvalidQuery(
                    "sample interval must be positive".into(),
                ));
            }
        }
        Ok(SearchSpec {
            range,
            instrument,
            wavelength: self.wavelength,
            sample: self.sample,
        })
    }
}

/// Parse a cadence such as `"12 min"` or `"1 h"` into a duration.
pub fn parse_sample(text: &str) -> Result<Duration> {
    let q = Quantity::parse(text)?;
    if q.dims() != Dimensions::TIME {
        return Err(HelioError::InvalidQuery(format!(
            "sample '{}' is not a time interval",
            text
        )));
    }
    let every = q.to_duration()?;
    if every <= Duration::zero() {
        return Err(HelioError::InvalidQuery(format!(
            "sample '{}' must be positive",
            text
        )));
    }
    Ok(every)
}
