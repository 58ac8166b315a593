//! A Rust client for discovering, ordering and downloading satellite
//! altimetry granules (ICESat-2 `ATLnn` products) from NASA Earthdata.
//!
//! The flow is: validate a spatial extent and a date range once, render them
//! into the parameter dialect of each backend (metadata search, legacy
//! orders, async subsetting jobs), then place orders, poll them to
//! completion and download the results.
//!
//! ## Quick start
//! - Configure Earthdata credentials via environment variables
//!   (`EARTHDATA_TOKEN`, or `EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD`) or a
//!   `.netrc` entry for `urs.earthdata.nasa.gov`.
//! - Build a [`Query`] and drive it with a [`Client`].
//!
//! ```no_run
//! use altiquery::{Client, PollPolicy, Query, SpatialExtent, TemporalRange};
//!
//! fn main() -> altiquery::Result<()> {
//!     let client = Client::from_env()?;
//!     let spatial = SpatialExtent::from_bbox([-55.0, 68.0, -48.0, 71.0], None)?;
//!     let temporal = TemporalRange::from_string_pair("2019-02-20", "2019-02-28", None, None)?;
//!
//!     let mut query = Query::new("ATL06", spatial, Some(temporal))?;
//!     println!("{:?}", query.summary(&client)?);
//!     query.download_granules(&client, std::path::Path::new("data"), false, &PollPolicy::default())?;
//!     Ok(())
//! }
//! ```
//!
//! Lower-level pieces are public too: the parameter builders in [`params`],
//! and the [`OrderBackend`] implementations returned by [`Client::direct`],
//! [`Client::legacy`] and [`Client::harmony`], which can be polled by hand
//! or through a [`PollPolicy`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod direct;
mod download;
mod error;
mod geometry_file;
mod granules;
mod harmony;
mod legacy;
mod order;
pub mod params;
mod poll;
mod query;
mod session;
mod spatial;
mod temporal;
mod util;

pub use client::Client;
pub use config::{ClientConfig, Credentials};
pub use direct::DirectGranules;
pub use error::{Error, Result};
pub use geometry_file::{DefaultGeometryReader, GeometryFeatures, GeometryReader};
pub use granules::{Granule, GranuleId, GranuleLink, GranuleSummary};
pub use harmony::HarmonyJobs;
pub use legacy::LegacyOrders;
pub use order::{Order, OrderBackend, OrderKind, OrderStatus};
pub use params::{OrbitFilter, OrderParams, ParameterSet, SearchParams, SubsetOptions};
pub use poll::PollPolicy;
pub use query::{Query, SubsetService};
pub use session::{ByteStream, FilePart, HttpResponse, HttpSession, RequestBody, Session};
pub use spatial::{ExtentKind, SpatialExtent, SpatialInput};
pub use temporal::{DateInput, TemporalRange, parse_date, parse_time_of_day};
