//! The end-to-end "first look" workflow.
//!
//! search → fetch → load → render → travel time → in-situ → plot.
//!
//! Stages run strictly in order and each consumes the previous stage's
//! output. The first error aborts the run; files already downloaded or
//! written stay on disk.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::catalog::{Catalog, HttpCatalog};
use crate::config::Config;
use crate::error::{HelioError, Result};
use crate::fetch::{Fetcher, HttpSource};
use crate::insitu::{HttpInsitu, InsituProvider, Mission};
use crate::map::{self, Loaded};
use crate::plot::{self, PlotOutput, PlotSpec};
use crate::progress::FetchProgressReporter;
use crate::query::{self, SearchSpec, TimeRange};
use crate::render::{self, RenderOptions, RenderOutput};
use crate::store::DirStore;
use crate::units::{self, Quantity};

const SPEED_COLOR: plot::Color = [31, 119, 180];
const ANGLE_COLOR: plot::Color = [255, 127, 14];
const ARRIVAL_COLOR: plot::Color = [214, 39, 40];

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub spec: SearchSpec,
    /// How many of the matching files to download (earliest first). Zero is
    /// rejected.
    pub max_files: usize,
    /// Assumed solar wind speed for the Sun → Earth travel time.
    pub speed: Quantity,
    pub mission: Mission,
    /// Length of the in-situ window, starting at the image time.
    pub insitu_window: Duration,
    /// Directory for rendered images, the in-situ CSV and the plot.
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub matched: usize,
    pub files: Vec<PathBuf>,
    pub downloaded: usize,
    pub skipped: usize,
    pub images: Vec<RenderOutput>,
    pub image_time: DateTime<Utc>,
    pub travel_time_days: f64,
    pub arrival: DateTime<Utc>,
    pub insitu_rows: usize,
    pub insitu_csv: PathBuf,
    pub plot: PlotOutput,
}

pub struct Pipeline {
    catalog: Box<dyn Catalog>,
    fetcher: Fetcher,
    insitu: Box<dyn InsituProvider>,
    render: RenderOptions,
    plot: PlotSpec,
}

impl Pipeline {
    pub fn new(
        catalog: Box<dyn Catalog>,
        fetcher: Fetcher,
        insitu: Box<dyn InsituProvider>,
        render: RenderOptions,
        plot: PlotSpec,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            insitu,
            render,
            plot,
        }
    }

    /// Wire up the HTTP catalog, on-disk store and HTTP in-situ provider.
    pub fn from_config(config: &Config, progress: Box<dyn FetchProgressReporter>) -> Result<Self> {
        let store = Arc::new(DirStore::open(&config.download.dir)?);
        let fetcher = Fetcher::new(Box::new(HttpSource::new(config.catalog.timeout())?), store)
            .overwrite(config.download.overwrite)
            .progress(progress);
        Ok(Pipeline::new(
            Box::new(HttpCatalog::from_config(&config.catalog)?),
            fetcher,
            Box::new(HttpInsitu::from_config(&config.insitu)?),
            RenderOptions::from_config(&config.render)?,
            PlotSpec::from_config(&config.plot),
        ))
    }

    pub async fn run(&self, req: &PipelineRequest) -> Result<PipelineSummary> {
        if req.max_files == 0 {
            return Err(HelioError::InvalidQuery(
                "at least one file must be selected".into(),
            ));
        }
        let distance = units::au().sub(&units::r_sun())?;
        let delay = units::travel_time(&distance, &req.speed)?;
        let delay_span = delay.to_duration()?;

        let records = self.catalog.search(&req.spec).await?;
        if records.is_empty() {
            return Err(HelioError::InvalidQuery(format!(
                "no {} files between {} and {}",
                req.spec.instrument(),
                req.spec.range().start(),
                req.spec.range().end()
            )));
        }
        let selected = &records[..req.max_files.min(records.len())];
        info!(
            matched = records.len(),
            selected = selected.len(),
            "stage 1/5: search"
        );

        let report = self.fetcher.fetch(selected).await;
        let (downloaded, skipped) = (report.downloaded(), report.skipped());
        let files = report.into_paths()?;
        info!(downloaded, skipped, "stage 2/5: fetch");

        let loaded = map::load(&files)?;
        std::fs::create_dir_all(&req.out_dir).map_err(|e| HelioError::io(&req.out_dir, e))?;
        let images = match &loaded {
            Loaded::Map(m) => vec![render::render_map(
                m,
                &self.render,
                &req.out_dir.join("map.png"),
            )?],
            Loaded::Sequence(seq) => render::render_sequence(seq, &self.render, &req.out_dir)?,
        };
        let image_time = loaded
            .first()
            .map(|m| m.date_obs())
            .ok_or_else(|| HelioError::InconsistentSequence("no frames loaded".into()))?;
        info!(frames = loaded.frame_count(), %image_time, "stage 3/5: load and render");

        let travel_time_days = delay.value_in("d")?;
        let arrival = query::shift(image_time, delay_span, "arrival time")?;
        info!(speed = %req.speed, travel_time_days, %arrival, "stage 4/5: travel time");

        let range = TimeRange::new(
            image_time,
            query::shift(image_time, req.insitu_window, "in-situ window end")?,
        )?;
        let table = self.insitu.fetch(req.mission, &range).await?;
        let insitu_csv = req.out_dir.join("insitu.csv");
        table.write_csv(&insitu_csv)?;

        let spec = self
            .plot
            .clone()
            .panel("flow_speed", SPEED_COLOR)
            .panel("clock_angle", ANGLE_COLOR)
            .marker(arrival, ARRIVAL_COLOR);
        let plot = plot::compose(&table, &spec, &req.out_dir.join("insitu.png"))?;
        info!(rows = table.len(), "stage 5/5: in-situ plot");

        Ok(PipelineSummary {
            matched: records.len(),
            files,
            downloaded,
            skipped,
            images,
            image_time,
            travel_time_days,
            arrival,
            insitu_rows: table.len(),
            insitu_csv,
            plot,
        })
    }
}
