//! # Helio Harness CLI (`helio`)
//!
//! The `helio` binary drives every stage of the heliophysics first-look
//! workflow: catalog search, downloads, FITS loading, rendering, unit
//! arithmetic, in-situ data and time-series plots.
//!
//! ## Usage
//!
//! ```bash
//! helio --config ./config/helio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `helio search` | List catalog records matching a time range, instrument and wavelength |
//! | `helio fetch` | Download matching records into the download directory |
//! | `helio info <file>` | Print the metadata and statistics of a FITS image |
//! | `helio show <files..> -o <png>` | Render a map (or a sequence) to PNG |
//! | `helio convert "<qty>" <unit>` | Convert a dimensioned quantity |
//! | `helio delay --speed "500 km/s"` | Sun → Earth travel time at a given speed |
//! | `helio insitu --mission OMNI` | Download an in-situ time series |
//! | `helio plot <table.csv> -o <png>` | Stacked time-series figure with markers |
//! | `helio inventory` | What is already in the download directory |
//! | `helio run` | The whole workflow, one stage after another |
//! | `helio completions <shell>` | Shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # AIA 193 Å images of one day, one every 12 minutes
//! helio search --start 2024-05-10 --end 2024-05-11 --instrument AIA \
//!     --wavelength 193 --sample "12 min"
//!
//! # Download the first one and render it
//! helio fetch --start 2024-05-10 --end 2024-05-11 --instrument AIA --wavelength 193 --limit 1
//! helio show data/raw/aia_193_20240510T000000.fits -o aia.png --colormap sdoaia193
//!
//! # How long does 500 km/s solar wind take to reach Earth?
//! helio delay --speed "500 km/s" --from 2024-05-10T00:00:00Z
//!
//! # OMNI solar wind for a month, plotted with the expected arrival
//! helio insitu --start 2024-05-10 --end 2024-06-10 -o omni.csv
//! helio plot omni.csv -o omni.png --panel flow_speed --panel clock_angle \
//!     --marker 2024-05-13T10:43:00Z
//! ```

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use helio_harness::catalog::{Catalog, HttpCatalog};
use helio_harness::colormap::{Colormap, Scale};
use helio_harness::config;
use helio_harness::fetch::{FetchStatus, Fetcher, HttpSource};
use helio_harness::insitu::{HttpInsitu, InsituProvider, Mission};
use helio_harness::inventory;
use helio_harness::map::{self, Loaded};
use helio_harness::pipeline::{Pipeline, PipelineRequest};
use helio_harness::plot::{self, PlotSpec};
use helio_harness::progress::ProgressMode;
use helio_harness::query::{self, SearchSpec, TimeRange, WavelengthRange};
use helio_harness::render::{self, RenderOptions};
use helio_harness::store::DirStore;
use helio_harness::timeseries::TimeSeriesTable;
use helio_harness::units::{self, Quantity};

/// Helio Harness CLI: search, fetch, load, render and plot solar data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/helio.example.toml` for a full example. A missing
/// config file means every setting takes its default.
#[derive(Parser)]
#[command(
    name = "helio",
    about = "Helio Harness: a heliophysics first-look toolkit",
    version,
    long_about = "Helio Harness searches a solar data catalog, downloads FITS images, \
    renders them as maps, estimates solar wind travel times with dimensioned units, and \
    lines the result up against OMNI in-situ measurements in a stacked time-series plot."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/helio.toml`. Catalog, download, in-situ,
    /// render and plot settings are read from this file.
    #[arg(long, global = true, default_value = "./config/helio.toml")]
    config: PathBuf,

    /// Download progress on stderr. Defaults to `human` when stderr is a
    /// terminal, otherwise `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Search the catalog.
    ///
    /// Prints one line per matching record, earliest first. Nothing is
    /// downloaded. An empty result is not an error.
    Search {
        #[command(flatten)]
        query: QueryArgs,

        /// Print the records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Download matching records.
    ///
    /// Files already present and verified in the download directory are
    /// skipped. Every per-file outcome is printed; the command fails if
    /// any file failed.
    Fetch {
        #[command(flatten)]
        query: QueryArgs,

        /// Download at most this many records (earliest first).
        #[arg(long)]
        limit: Option<usize>,

        /// Download again even if a verified copy exists.
        #[arg(long)]
        overwrite: bool,
    },

    /// Show the metadata and pixel statistics of a FITS image.
    Info {
        /// FITS file to inspect.
        file: PathBuf,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Render one map, or several files / a directory as a sequence.
    ///
    /// A single map is written to `--output`. A sequence is written as
    /// `frame_000.png`, `frame_001.png`, ... inside the `--output`
    /// directory, in time order.
    Show {
        /// FITS files or directories of FITS files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output PNG (single map) or directory (sequence).
        #[arg(short, long)]
        output: PathBuf,

        /// Colormap name; overrides `[render].colormap`.
        #[arg(long)]
        colormap: Option<String>,

        /// Intensity scaling (`linear`, `sqrt`, `log`); overrides `[render].scale`.
        #[arg(long)]
        scale: Option<String>,

        /// Crop a single map to a world-coordinate box, in arcsec:
        /// `x0,y0,x1,y1` (bottom-left then top-right).
        #[arg(long, allow_hyphen_values = true)]
        crop: Option<String>,
    },

    /// Convert a quantity to another unit.
    ///
    /// Example: `helio convert "1 AU" km`.
    Convert {
        /// Quantity such as `"500 km/s"` or `"19.3 nm"`.
        quantity: String,

        /// Target unit expression such as `AU/d` or `Angstrom`.
        unit: String,
    },

    /// Sun → Earth travel time at a constant speed.
    ///
    /// The default distance is 1 AU minus 1 solar radius, i.e. from the
    /// solar surface to Earth.
    Delay {
        /// Speed such as `"500 km/s"`.
        #[arg(long, default_value = "500 km/s")]
        speed: String,

        /// Distance to cover; defaults to `1 AU - 1 R_sun`.
        #[arg(long)]
        distance: Option<String>,

        /// Departure time; when given the arrival time is printed too.
        #[arg(long)]
        from: Option<String>,
    },

    /// Download an in-situ time series.
    ///
    /// Without `--output` the table is written to stdout as CSV (or JSON
    /// with `--json`).
    Insitu {
        /// Mission name.
        #[arg(long, default_value = "OMNI")]
        mission: String,

        /// Start of the range (RFC 3339 or `YYYY-MM-DD`).
        #[arg(long)]
        start: String,

        /// End of the range (RFC 3339 or `YYYY-MM-DD`).
        #[arg(long)]
        end: String,

        /// Write the table to this CSV file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print rows as JSON instead of CSV.
        #[arg(long)]
        json: bool,
    },

    /// Plot columns of a time-series CSV as stacked panels.
    Plot {
        /// CSV table with a `time` column (as written by `helio insitu`).
        table: PathBuf,

        /// Output PNG.
        #[arg(short, long)]
        output: PathBuf,

        /// Column to plot, optionally with a colour: `flow_speed` or
        /// `flow_speed:#1f77b4`. Repeatable; defaults to every column.
        #[arg(long = "panel")]
        panels: Vec<String>,

        /// Time of a vertical marker line. Repeatable.
        #[arg(long = "marker")]
        markers: Vec<String>,

        /// Colour of the marker lines.
        #[arg(long, default_value = "red")]
        marker_color: String,
    },

    /// List what is in the download directory.
    Inventory {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run the whole workflow.
    ///
    /// search → fetch → load → render → travel time → in-situ → plot.
    /// Stages run one after another; the first failure stops the run and
    /// leaves earlier results on disk.
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// Number of records to download (earliest first). More than one
        /// loads them as a sequence.
        #[arg(long, default_value_t = 1)]
        limit: usize,

        /// Assumed solar wind speed.
        #[arg(long, default_value = "500 km/s")]
        speed: String,

        /// In-situ mission.
        #[arg(long, default_value = "OMNI")]
        mission: String,

        /// Length of the in-situ window after the image time, in days.
        #[arg(long, default_value_t = 7)]
        window_days: i64,

        /// Directory for images, the in-situ CSV and the plot.
        #[arg(long, default_value = "./out")]
        out_dir: PathBuf,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a shell completion script.
    ///
    /// Example: `helio completions bash > /etc/bash_completion.d/helio`.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Search arguments shared by `search`, `fetch` and `run`.
#[derive(Args)]
struct QueryArgs {
    /// Start of the range (RFC 3339 or `YYYY-MM-DD`).
    #[arg(long)]
    start: String,

    /// End of the range (RFC 3339 or `YYYY-MM-DD`).
    #[arg(long)]
    end: String,

    /// Instrument name, e.g. `AIA`.
    #[arg(long)]
    instrument: String,

    /// Wavelength: `193` (angstrom), `"19.3 nm"`, or a range `171..211`.
    #[arg(long)]
    wavelength: Option<String>,

    /// Keep at most one record per interval, e.g. `"12 min"`.
    #[arg(long)]
    sample: Option<String>,
}

impl QueryArgs {
    fn to_spec(&self) -> anyhow::Result<SearchSpec> {
        let mut builder = SearchSpec::builder()
            .range(TimeRange::parse(&self.start, &self.end)?)
            .instrument(self.instrument.clone());
        if let Some(w) = &self.wavelength {
            builder = builder.wavelength(parse_wavelength(w)?);
        }
        if let Some(s) = &self.sample {
            builder = builder.sample(query::parse_sample(s)?);
        }
        Ok(builder.build()?)
    }
}

/// `193` and `193..211` are angstrom; anything else is parsed as a quantity.
fn parse_wavelength(text: &str) -> anyhow::Result<WavelengthRange> {
    fn bound(s: &str) -> anyhow::Result<Quantity> {
        let s = s.trim();
        match s.parse::<f64>() {
            Ok(v) => Ok(Quantity::with_unit(v, "Angstrom")?),
            Err(_) => Ok(Quantity::parse(s)?),
        }
    }
    let range = match text.split_once("..") {
        Some((lo, hi)) => WavelengthRange::between(&bound(lo)?, &bound(hi)?)?,
        None => WavelengthRange::from_quantity(&bound(text)?)?,
    };
    Ok(range)
}

/// Default panel colours, in order.
const PALETTE: &[&str] = &["#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("helio_harness=info")),
        )
        .init();

    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "helio", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Convert { quantity, unit } => {
            let converted = Quantity::parse(quantity)?.to_unit(unit)?;
            println!("{}", converted);
            return Ok(());
        }
        Commands::Delay {
            speed,
            distance,
            from,
        } => {
            run_delay(speed, distance.as_deref(), from.as_deref())?;
            return Ok(());
        }
        Commands::Info { file, json } => {
            run_info(file, *json)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Search { query, json } => {
            let spec = query.to_spec()?;
            let records = HttpCatalog::from_config(&cfg.catalog)?
                .search(&spec)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No matching records.");
            } else {
                for r in &records {
                    let wavelength = r
                        .wavelength
                        .map(|w| format!("{} Å", w))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {:<8} {:>8}  {}",
                        r.start.format("%Y-%m-%dT%H:%M:%SZ"),
                        r.instrument,
                        wavelength,
                        r.url
                    );
                }
                println!("{} record(s)", records.len());
            }
        }
        Commands::Fetch {
            query,
            limit,
            overwrite,
        } => {
            if limit == Some(0) {
                anyhow::bail!("--limit must be at least 1");
            }
            let spec = query.to_spec()?;
            let mut records = HttpCatalog::from_config(&cfg.catalog)?
                .search(&spec)
                .await?;
            if let Some(n) = limit {
                records.truncate(n);
            }
            let store = Arc::new(DirStore::open(&cfg.download.dir)?);
            let fetcher = Fetcher::new(Box::new(HttpSource::new(cfg.catalog.timeout())?), store)
                .overwrite(cfg.download.overwrite || overwrite)
                .progress(progress.reporter());
            let report = fetcher.fetch(&records).await;

            if report.is_empty() {
                println!("Nothing to fetch.");
            }
            for outcome in report.outcomes() {
                match &outcome.result {
                    Ok(f) => {
                        let status = match f.status {
                            FetchStatus::Downloaded => "downloaded",
                            FetchStatus::Skipped => "skipped",
                        };
                        println!("{:<10} {}", status, f.path.display());
                    }
                    Err(e) => println!("{:<10} {}: {}", "failed", outcome.record.file_name(), e),
                }
            }
            if !report.is_complete() {
                anyhow::bail!(
                    "{} of {} file(s) failed",
                    report.failed().len(),
                    report.len()
                );
            }
        }
        Commands::Show {
            files,
            output,
            colormap,
            scale,
            crop,
        } => {
            let mut opts = RenderOptions::from_config(&cfg.render)?;
            if let Some(name) = colormap {
                opts.colormap = Colormap::by_name(&name)?;
            }
            if let Some(name) = scale {
                opts.scale = Scale::by_name(&name)?;
            }
            run_show(&files, &output, &opts, crop.as_deref())?;
        }
        Commands::Insitu {
            mission,
            start,
            end,
            output,
            json,
        } => {
            let mission: Mission = mission.parse()?;
            let range = TimeRange::parse(&start, &end)?;
            let table = HttpInsitu::from_config(&cfg.insitu)?
                .fetch(mission, &range)
                .await?;
            if let Some(path) = output {
                table.write_csv(&path)?;
                println!(
                    "Wrote {} {} row(s) to {}",
                    table.len(),
                    mission,
                    path.display()
                );
            } else if json {
                println!("{}", serde_json::to_string_pretty(&table.to_json())?);
            } else {
                table.write_csv_to(std::io::stdout())?;
            }
        }
        Commands::Plot {
            table,
            output,
            panels,
            markers,
            marker_color,
        } => {
            run_plot(&cfg.plot, &table, &output, &panels, &markers, &marker_color)?;
        }
        Commands::Inventory { json } => {
            let store = DirStore::open(&cfg.download.dir)?;
            let inv = inventory::collect(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inv)?);
            } else {
                print!("{}", inventory::format_report(&inv, Utc::now()));
            }
        }
        Commands::Run {
            query,
            limit,
            speed,
            mission,
            window_days,
            out_dir,
            json,
        } => {
            let request = PipelineRequest {
                spec: query.to_spec()?,
                max_files: limit,
                speed: Quantity::parse(&speed)?,
                mission: mission.parse()?,
                insitu_window: Duration::try_days(window_days).ok_or_else(|| {
                    anyhow::anyhow!("--window-days {} is out of range", window_days)
                })?,
                out_dir,
            };
            let summary = Pipeline::from_config(&cfg, progress.reporter())?
                .run(&request)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Matched {} record(s); {} downloaded, {} skipped",
                    summary.matched, summary.downloaded, summary.skipped
                );
                for image in &summary.images {
                    println!("Image:       {}", image.path.display());
                }
                println!("Image time:  {}", summary.image_time.to_rfc3339());
                println!("Travel time: {:.3} d", summary.travel_time_days);
                println!("Arrival:     {}", summary.arrival.to_rfc3339());
                println!(
                    "In-situ:     {} row(s) in {}",
                    summary.insitu_rows,
                    summary.insitu_csv.display()
                );
                println!("Plot:        {}", summary.plot.path.display());
            }
        }
        // Handled above, before the config is loaded.
        Commands::Completions { .. }
        | Commands::Convert { .. }
        | Commands::Delay { .. }
        | Commands::Info { .. } => {}
    }

    Ok(())
}

fn run_delay(speed: &str, distance: Option<&str>, from: Option<&str>) -> anyhow::Result<()> {
    let speed = Quantity::parse(speed)?;
    let distance = match distance {
        Some(d) => Quantity::parse(d)?,
        None => units::au().sub(&units::r_sun())?,
    };
    let delay = units::travel_time(&distance, &speed)?;
    println!("Distance:    {}", distance.to_unit("km")?);
    println!("Speed:       {}", speed);
    println!(
        "Travel time: {:.3} d ({:.1} h)",
        delay.value_in("d")?,
        delay.value_in("h")?
    );
    if let Some(from) = from {
        let departure = query::parse_time(from)?;
        let arrival = query::shift(departure, delay.to_duration()?, "arrival time")?;
        println!("Arrival:     {}", arrival.to_rfc3339());
    }
    Ok(())
}

fn run_info(file: &Path, json: bool) -> anyhow::Result<()> {
    let map = map::load_map(file)?;
    let stats = map.stats();
    if json {
        let value = serde_json::json!({
            "path": file,
            "title": map.title(),
            "width": map.width(),
            "height": map.height(),
            "meta": map.meta(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let meta = map.meta();
    println!("{}", map.title());
    println!("  File:        {}", file.display());
    println!("  Size:        {} x {} px", map.width(), map.height());
    println!("  Observed:    {}", meta.date_obs.to_rfc3339());
    println!("  Instrument:  {}", meta.instrument);
    if let Some(obs) = &meta.observatory {
        println!("  Observatory: {}", obs);
    }
    if let Some(w) = &meta.wavelength {
        println!("  Wavelength:  {}", w);
    }
    if let Some(exp) = meta.exposure_secs {
        println!("  Exposure:    {} s", exp);
    }
    println!(
        "  Frame:       {} / {}, {} x {} arcsec/px",
        meta.frame.ctype.0, meta.frame.ctype.1, meta.frame.cdelt.0, meta.frame.cdelt.1
    );
    match stats {
        Some(s) => println!(
            "  Values:      min {:.3}, max {:.3}, mean {:.3} ({} finite)",
            s.min, s.max, s.mean, s.count
        ),
        None => println!("  Values:      no finite pixels"),
    }
    Ok(())
}

fn parse_crop(text: &str) -> anyhow::Result<((f64, f64), (f64, f64))> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid --crop '{}'", text))?;
    match values.as_slice() {
        [x0, y0, x1, y1] => Ok(((*x0, *y0), (*x1, *y1))),
        _ => anyhow::bail!("--crop expects x0,y0,x1,y1, got '{}'", text),
    }
}

fn run_show(
    files: &[PathBuf],
    output: &Path,
    opts: &RenderOptions,
    crop: Option<&str>,
) -> anyhow::Result<()> {
    match map::load(files)? {
        Loaded::Map(m) => {
            let m = match crop {
                Some(c) => {
                    let (bottom_left, top_right) = parse_crop(c)?;
                    m.submap(bottom_left, top_right)?
                }
                None => m,
            };
            let out = render::render_map(&m, opts, output)?;
            println!("{} -> {}", out.title, out.path.display());
        }
        Loaded::Sequence(seq) => {
            if crop.is_some() {
                anyhow::bail!("--crop applies to a single map only");
            }
            std::fs::create_dir_all(output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            for out in render::render_sequence(&seq, opts, output)? {
                println!("{} -> {}", out.title, out.path.display());
            }
        }
    }
    Ok(())
}

fn run_plot(
    plot_config: &config::PlotConfig,
    table: &Path,
    output: &Path,
    panels: &[String],
    markers: &[String],
    marker_color: &str,
) -> anyhow::Result<()> {
    let table = TimeSeriesTable::read_csv(table)?;
    let mut spec = PlotSpec::from_config(plot_config);

    let requested: Vec<String> = if panels.is_empty() {
        table.column_names().iter().map(|s| s.to_string()).collect()
    } else {
        panels.to_vec()
    };
    for (i, panel) in requested.iter().enumerate() {
        let (column, color) = match panel.split_once(':') {
            Some((column, color)) => (column, plot::parse_color(color)?),
            None => (
                panel.as_str(),
                plot::parse_color(PALETTE[i % PALETTE.len()])?,
            ),
        };
        spec = spec.panel(column, color);
    }

    let color = plot::parse_color(marker_color)?;
    for m in markers {
        spec = spec.marker(query::parse_time(m)?, color);
    }

    let out = plot::compose(&table, &spec, output)?;
    println!(
        "Plotted {} panel(s), {} marker(s) ({} outside the data) -> {}",
        out.panels,
        out.markers_drawn,
        out.markers_skipped,
        out.path.display()
    );
    Ok(())
}
