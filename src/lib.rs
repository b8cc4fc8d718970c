//! # Helio Harness
//!
//! A heliophysics "first look" toolkit: search a remote data catalog, fetch
//! solar images, load them as maps, render them, estimate the solar wind
//! travel time and line it up against in-situ OMNI measurements.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │  Query   │──▶│ Catalog  │──▶│  Fetch   │──▶│   Map    │──▶ render (PNG)
//! │ builder  │   │  search  │   │  store   │   │ (FITS)   │
//! └──────────┘   └──────────┘   └──────────┘   └────┬─────┘
//!                                                   │ image time
//!                       ┌──────────┐   ┌──────────┐ ▼
//!                       │  In-situ │──▶│   Plot   │◀── travel time (units)
//!                       │  (OMNI)  │   │ composer │
//!                       └──────────┘   └──────────┘
//! ```
//!
//! Every stage is a plain fallible call returning [`Result`]; stages run
//! one after another and nothing is retried.
//!
//! ## Quick Start
//!
//! ```bash
//! helio search --start 2024-05-10 --end 2024-05-11 --instrument AIA --wavelength 193
//! helio fetch  --start 2024-05-10 --end 2024-05-11 --instrument AIA --limit 1
//! helio show data/raw/aia_193.fits -o aia.png
//! helio delay --speed "500 km/s"
//! helio insitu --mission OMNI --start 2024-05-10 --end 2024-06-10 -o omni.csv
//! helio plot omni.csv -o omni.png --marker 2024-05-13T10:43:00Z
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy shared by all stages |
//! | [`models`] | Catalog records |
//! | [`query`] | Time ranges, wavelength filters, search specifications |
//! | [`catalog`] | Catalog search trait and HTTP / `file://` client |
//! | [`store`] | Local download directory abstraction |
//! | [`fetch`] | Per-file downloads with deduplication |
//! | [`progress`] | Fetch progress reporting on stderr |
//! | [`fits`] | FITS image codec |
//! | [`map`] | Solar maps and map sequences |
//! | [`colormap`] | Colormaps and intensity scalings |
//! | [`render`] | Map → PNG rendering |
//! | [`units`] | Dimensioned quantities |
//! | [`timeseries`] | Time-indexed tables |
//! | [`insitu`] | In-situ mission data (OMNI) |
//! | [`plot`] | Stacked time-series figures with markers |
//! | [`pipeline`] | The end-to-end workflow |
//! | [`inventory`] | Download directory overview |
//! | [`transport`] | Shared HTTP plumbing |

pub mod catalog;
pub mod colormap;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fits;
pub mod insitu;
pub mod inventory;
pub mod map;
pub mod models;
pub mod pipeline;
pub mod plot;
pub mod progress;
pub mod query;
pub mod render;
pub mod store;
pub mod timeseries;
pub mod transport;
pub mod units;

pub use error::{HelioError, Result};
