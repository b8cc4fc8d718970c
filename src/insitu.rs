//! In-situ solar wind time series.
//!
//! The [`InsituProvider`] trait is the seam between the pipeline and the
//! data service. [`HttpInsitu`] fetches mission datasets as CSV over HTTP
//! (`GET {url}/{dataset}?start=..&end=..`) or reads `{dir}/{dataset}.csv`
//! from a `file://` mirror.
//!
//! OMNI is served as the hourly merged dataset `omni2_h0_mrg1hr`. Its CSV
//! carries `time, flow_speed, by_gsm, bz_gsm` and optionally `bx_gse` and
//! `proton_density`; OMNI fill values become NaN and a `clock_angle` column
//! (degrees, `[0, 360)`) is derived from By and Bz.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::config::InsituConfig;
use crate::error::{HelioError, Result};
use crate::query::{parse_time, TimeRange};
use crate::timeseries::{parse_cell, split_header, Column, TimeSeriesTable};
use crate::transport;

/// Speeds at or above this are OMNI fill values.
const SPEED_FILL: f64 = 9999.0;
/// Field components and densities at or above this magnitude are fill values.
const FIELD_FILL: f64 = 999.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mission {
    Omni,
}

impl Mission {
    pub fn name(&self) -> &'static str {
        match self {
            Mission::Omni => "OMNI",
        }
    }

    pub fn dataset(&self) -> &'static str {
        match self {
            Mission::Omni => "omni2_h0_mrg1hr",
        }
    }

    /// Nominal sample spacing of the dataset.
    pub fn cadence(&self) -> Duration {
        match self {
            Mission::Omni => Duration::hours(1),
        }
    }
}

impl FromStr for Mission {
    type Err = HelioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OMNI" | "OMNI2" | "OMNIWEB" => Ok(Mission::Omni),
            other => Err(HelioError::InvalidQuery(format!(
                "unknown mission '{}' (supported: OMNI)",
                other
            ))),
        }
    }
}

impl fmt::Display for Mission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source of in-situ time series.
#[async_trait]
pub trait InsituProvider: Send + Sync {
    /// The mission's table restricted to `range`, ascending by time.
    async fn fetch(&self, mission: Mission, range: &TimeRange) -> Result<TimeSeriesTable>;
}

pub struct HttpInsitu {
    url: String,
    client: reqwest::Client,
}

impl HttpInsitu {
    pub fn new(url: impl Into<String>, timeout: StdDuration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: transport::build_client(timeout)?,
        })
    }

    pub fn from_config(config: &InsituConfig) -> Result<Self> {
        HttpInsitu::new(config.url.clone(), config.timeout())
    }

    async fn download(&self, mission: Mission, range: &TimeRange) -> Result<String> {
        if let Some(dir) = transport::file_url_path(&self.url) {
            let path = dir.join(format!("{}.csv", mission.dataset()));
            debug!(path = %path.display(), "reading local in-situ mirror");
            return std::fs::read_to_string(&path).map_err(|e| {
                HelioError::Network(format!("in-situ file {} unreadable: {}", path.display(), e))
            });
        }

        let endpoint = transport::join_url(&self.url, mission.dataset());
        let params = [
            ("start", range.start().to_rfc3339()),
            ("end", range.end().to_rfc3339()),
        ];
        debug!(endpoint = %endpoint, "requesting in-situ data");
        let resp = self
            .client
            .get(&endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| HelioError::from_transport("in-situ request", e))?;
        let resp = transport::check_status(resp, "in-situ request").await?;
        resp.text()
            .await
            .map_err(|e| HelioError::from_transport("in-situ request", e))
    }
}

#[async_trait]
impl InsituProvider for HttpInsitu {
    async fn fetch(&self, mission: Mission, range: &TimeRange) -> Result<TimeSeriesTable> {
        let body = self.download(mission, range).await?;
        let table = match mission {
            Mission::Omni => parse_omni_csv(&body)?,
        };
        let table = table.truncate(range);
        if table.is_empty() {
            warn!(mission = %mission, "no in-situ samples in requested range");
        }
        info!(
            mission = %mission,
            dataset = mission.dataset(),
            rows = table.len(),
            "in-situ data loaded"
        );
        Ok(table)
    }
}

/// Clock angle `atan2(By, Bz)` in degrees, normalized to `[0, 360)`.
pub fn clock_angle(by: f64, bz: f64) -> f64 {
    if by.is_nan() || bz.is_nan() {
        return f64::NAN;
    }
    let deg = by.atan2(bz).to_degrees().rem_euclid(360.0);
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

struct OmniColumn {
    key: &'static str,
    unit: &'static str,
    required: bool,
    fill: f64,
}

const OMNI_COLUMNS: &[OmniColumn] = &[
    OmniColumn {
        key: "flow_speed",
        unit: "km/s",
        required: true,
        fill: SPEED_FILL,
    },
    OmniColumn {
        key: "bx_gse",
        unit: "nT",
        required: false,
        fill: FIELD_FILL,
    },
    OmniColumn {
        key: "by_gsm",
        unit: "nT",
        required: true,
        fill: FIELD_FILL,
    },
    OmniColumn {
        key: "bz_gsm",
        unit: "nT",
        required: true,
        fill: FIELD_FILL,
    },
    OmniColumn {
        key: "proton_density",
        unit: "cm-3",
        required: false,
        fill: FIELD_FILL,
    },
];

/// Parse an OMNI CSV body into a table with a derived `clock_angle` column.
pub fn parse_omni_csv(body: &str) -> Result<TimeSeriesTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| HelioError::Parse(format!("OMNI header: {}", e)))?
        .clone();
    let positions: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (split_header(h).0.to_ascii_lowercase(), i))
        .collect();

    let time_at = *positions
        .get("time")
        .ok_or_else(|| HelioError::Parse("OMNI CSV has no 'time' column".into()))?;
    let mut present = Vec::new();
    for column in OMNI_COLUMNS {
        match positions.get(column.key) {
            Some(&at) => present.push((column, at)),
            None if column.required => {
                return Err(HelioError::Parse(format!(
                    "OMNI CSV has no '{}' column",
                    column.key
                )))
            }
            None => {}
        }
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| HelioError::Parse(format!("OMNI row: {}", e)))?;
        let time = record.get(time_at).unwrap_or_default();
        let t = parse_time(time).map_err(|_| {
            HelioError::Parse(format!("OMNI row {}: bad timestamp '{}'", line + 1, time))
        })?;
        let mut values = Vec::with_capacity(present.len());
        for (column, at) in &present {
            let cell = record.get(*at).unwrap_or_default();
            let v = parse_cell(cell).ok_or_else(|| {
                HelioError::Parse(format!(
                    "OMNI row {}: bad {} value '{}'",
                    line + 1,
                    column.key,
                    cell
                ))
            })?;
            values.push(if v.abs() >= column.fill { f64::NAN } else { v });
        }
        rows.push((t, values));
    }

    let names: Vec<(String, Option<String>)> = present
        .iter()
        .map(|(c, _)| (c.key.to_string(), Some(c.unit.to_string())))
        .collect();
    let table = TimeSeriesTable::from_rows(&names, rows)?;

    let by = table.column("by_gsm").map(|c| c.values.clone()).unwrap_or_default();
    let bz = table.column("bz_gsm").map(|c| c.values.clone()).unwrap_or_default();
    let angles = by.iter().zip(&bz).map(|(&y, &z)| clock_angle(y, z)).collect();
    table.with_column(Column::new("clock_angle", Some("deg"), angles))
}
