//! The user-facing query: product, version and constraints, plus the
//! search → order → download orchestration.
//!
//! Parameter sets and search results are memoized in [`OnceCell`]s and
//! dropped by every setter that changes an input they were built from.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::client::Client;
use crate::error::Result;
use crate::granules::{self, Granule, GranuleSummary};
use crate::order::{Order, OrderBackend, OrderKind};
use crate::params::{
    OrbitFilter, OrderParams, SearchParams, SubsetOptions, build_harmony_request,
    build_order_params, build_search_params, normalize_product, normalize_version,
};
use crate::poll::PollPolicy;
use crate::session::Session;
use crate::spatial::SpatialExtent;
use crate::temporal::TemporalRange;

/// Which backend runs subsetting orders. Whole-granule orders never go
/// through a server-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubsetService {
    #[default]
    Legacy,
    Harmony,
}

fn cached<T>(cell: &OnceCell<T>, init: impl FnOnce() -> Result<T>) -> Result<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value))
}

#[derive(Debug, Clone)]
pub struct Query {
    product: String,
    version: Option<String>,
    spatial: SpatialExtent,
    temporal: Option<TemporalRange>,
    orbit: Option<OrbitFilter>,
    subset: Option<SubsetOptions>,
    service: SubsetService,

    latest_version: OnceCell<String>,
    search_params: OnceCell<SearchParams>,
    order_params: OnceCell<OrderParams>,
    granules: OnceCell<Vec<Granule>>,
    orders: Vec<Order>,
    // order index -> files it produced
    downloaded: HashMap<usize, Vec<PathBuf>>,
}

impl Query {
    /// `product` is a short name such as `ATL06` (case-insensitive). Without
    /// a temporal range, a cycle/track filter usually narrows the search.
    pub fn new(product: &str, spatial: SpatialExtent, temporal: Option<TemporalRange>) -> Result<Self> {
        Ok(Self {
            product: normalize_product(product)?,
            version: None,
            spatial,
            temporal,
            orbit: None,
            subset: None,
            service: SubsetService::default(),
            latest_version: OnceCell::new(),
            search_params: OnceCell::new(),
            order_params: OnceCell::new(),
            granules: OnceCell::new(),
            orders: Vec::new(),
            downloaded: HashMap::new(),
        })
    }

    /// Pins the product version; otherwise the latest published one is used.
    pub fn with_version(mut self, version: &str) -> Result<Self> {
        self.version = Some(normalize_version(version)?);
        self.invalidate();
        Ok(self)
    }

    pub fn with_orbit(mut self, orbit: OrbitFilter) -> Self {
        self.set_orbit(Some(orbit));
        self
    }

    pub fn with_subset(mut self, subset: SubsetOptions) -> Self {
        self.set_subset(Some(subset));
        self
    }

    pub fn with_service(mut self, service: SubsetService) -> Self {
        self.service = service;
        self
    }

    pub fn set_spatial(&mut self, spatial: SpatialExtent) {
        self.spatial = spatial;
        self.invalidate();
    }

    pub fn set_temporal(&mut self, temporal: Option<TemporalRange>) {
        self.temporal = temporal;
        self.invalidate();
    }

    pub fn set_orbit(&mut self, orbit: Option<OrbitFilter>) {
        self.orbit = orbit.filter(|o| !o.is_empty());
        self.invalidate();
    }

    /// `None` orders whole granules.
    pub fn set_subset(&mut self, subset: Option<SubsetOptions>) {
        self.subset = subset;
        self.order_params.take();
    }

    fn invalidate(&mut self) {
        self.search_params.take();
        self.order_params.take();
        self.granules.take();
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn spatial(&self) -> &SpatialExtent {
        &self.spatial
    }

    pub fn temporal(&self) -> Option<&TemporalRange> {
        self.temporal.as_ref()
    }

    pub fn orbit(&self) -> Option<&OrbitFilter> {
        self.orbit.as_ref()
    }

    pub fn subset(&self) -> Option<&SubsetOptions> {
        self.subset.as_ref()
    }

    pub fn service(&self) -> SubsetService {
        self.service
    }

    /// Orders placed so far, in placement order.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Mutable access for job control (`pause`, `resume`, `skip_preview`).
    pub fn orders_mut(&mut self) -> &mut [Order] {
        &mut self.orders
    }

    pub fn version<S: Session>(&self, client: &Client<S>) -> Result<&str> {
        if let Some(version) = &self.version {
            return Ok(version.as_str());
        }
        cached(&self.latest_version, || client.latest_version(&self.product)).map(String::as_str)
    }

    pub fn search_params<S: Session>(&self, client: &Client<S>) -> Result<&SearchParams> {
        cached(&self.search_params, || {
            Ok(build_search_params(
                &self.product,
                self.version(client)?,
                &self.spatial,
                self.temporal.as_ref(),
                self.orbit.as_ref(),
            ))
        })
    }

    pub fn order_params<S: Session>(&self, client: &Client<S>) -> Result<&OrderParams> {
        cached(&self.order_params, || {
            Ok(build_order_params(
                &self.product,
                self.version(client)?,
                &self.spatial,
                self.temporal.as_ref(),
                self.orbit.as_ref(),
                self.subset.as_ref(),
            ))
        })
    }

    /// Granules matching the query; searched once, then cached.
    pub fn avail_granules<S: Session>(&self, client: &Client<S>) -> Result<&[Granule]> {
        cached(&self.granules, || client.search_granules(self.search_params(client)?))
            .map(Vec::as_slice)
    }

    pub fn summary<S: Session>(&self, client: &Client<S>) -> Result<GranuleSummary> {
        Ok(GranuleSummary::from_granules(self.avail_granules(client)?))
    }

    /// Producer file names of the available granules.
    pub fn ids<S: Session>(&self, client: &Client<S>) -> Result<Vec<String>> {
        Ok(self
            .avail_granules(client)?
            .iter()
            .map(|g| g.file_name().to_string())
            .collect())
    }

    pub fn cycles<S: Session>(&self, client: &Client<S>) -> Result<Vec<String>> {
        Ok(granules::cycles(self.avail_granules(client)?))
    }

    pub fn tracks<S: Session>(&self, client: &Client<S>) -> Result<Vec<String>> {
        Ok(granules::tracks(self.avail_granules(client)?))
    }

    /// Places orders for every available granule and records them.
    ///
    /// Whole-granule queries yield a single direct order; legacy subsetting
    /// places one order per page of granules; the job backend gets a single
    /// job for the whole query.
    pub fn order_granules<S: Session>(&mut self, client: &Client<S>) -> Result<&[Order]> {
        let placed = self.place_orders(client)?;
        let first_new = self.orders.len();
        self.orders.extend(placed);
        Ok(&self.orders[first_new..])
    }

    fn place_orders<S: Session>(&self, client: &Client<S>) -> Result<Vec<Order>> {
        let found = self.avail_granules(client)?;
        if found.is_empty() {
            log::warn!("no {} granules match the query, nothing to order", self.product);
            return Ok(Vec::new());
        }

        let Some(subset) = &self.subset else {
            return Ok(vec![client.direct().place_order(found)?]);
        };

        match self.service {
            SubsetService::Legacy => {
                let params = self.order_params(client)?;
                let page_size = client.page_size();
                let backend = client.legacy();
                found
                    .chunks(page_size)
                    .enumerate()
                    .map(|(i, page)| {
                        let mut order = backend.place_order(&params.page(i + 1, page_size))?;
                        order.granule_refs = page.iter().map(|g| g.file_name().to_string()).collect();
                        Ok(order)
                    })
                    .collect()
            }
            SubsetService::Harmony => {
                let version = self.version(client)?;
                let collection = client.collection_id(&self.product, version)?;
                let mut request = build_harmony_request(
                    &collection,
                    &self.spatial,
                    self.temporal.as_ref(),
                    Some(subset),
                );
                if self.orbit.is_some() {
                    request.granule_ids = found.iter().map(|g| g.id.clone()).collect();
                }
                let mut order = client.harmony().place_order(&request)?;
                order.granule_refs = found.iter().map(|g| g.file_name().to_string()).collect();
                Ok(vec![order])
            }
        }
    }

    /// Orders the granules if that has not happened yet, waits on every
    /// server-side job with `policy` and downloads the results into
    /// `destination`.
    ///
    /// Orders downloaded by an earlier call are not fetched again; their
    /// files are returned as recorded. With `overwrite` every order is
    /// downloaded anew.
    ///
    /// A job that pauses makes this fail with [`crate::Error::OrderNotReady`];
    /// resume it through [`Query::orders_mut`] and call again.
    pub fn download_granules<S: Session>(
        &mut self,
        client: &Client<S>,
        destination: &Path,
        overwrite: bool,
        policy: &PollPolicy,
    ) -> Result<Vec<PathBuf>> {
        if self.orders.is_empty() {
            self.order_granules(client)?;
        }
        std::fs::create_dir_all(destination)?;
        if overwrite {
            self.downloaded.clear();
        }

        let mut files = Vec::new();
        for (index, order) in self.orders.iter_mut().enumerate() {
            if let Some(done) = self.downloaded.get(&index) {
                log::debug!("order {} already downloaded, skipping", order.job_id);
                files.extend(done.iter().cloned());
                continue;
            }
            let fetched = match (order.kind, self.service) {
                (OrderKind::WholeGranule, _) => {
                    fetch(&client.direct(), order, destination, overwrite, policy)?
                }
                (OrderKind::SubsetJob, SubsetService::Legacy) => {
                    fetch(&client.legacy(), order, destination, overwrite, policy)?
                }
                (OrderKind::SubsetJob, SubsetService::Harmony) => {
                    fetch(&client.harmony(), order, destination, overwrite, policy)?
                }
            };
            files.extend(fetched.iter().cloned());
            self.downloaded.insert(index, fetched);
        }
        Ok(files)
    }
}

fn fetch<B: OrderBackend>(
    backend: &B,
    order: &mut Order,
    destination: &Path,
    overwrite: bool,
    policy: &PollPolicy,
) -> Result<Vec<PathBuf>> {
    policy.wait(backend, order)?;
    backend.download(order, destination, overwrite)
}
