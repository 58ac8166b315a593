use serde::Deserialize;
use std::time::Duration;

use crate::config::{ClientConfig, Credentials, load_config};
use crate::direct::DirectGranules;
use crate::download::Transfer;
use crate::error::{Error, Result};
use crate::granules::{Granule, SearchResponse};
use crate::harmony::HarmonyJobs;
use crate::legacy::LegacyOrders;
use crate::params::{DEFAULT_PAGE_SIZE, SearchParams, normalize_version};
use crate::session::{HttpSession, Session};
use crate::util::{append_query, urljoin};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    feed: CollectionFeed,
}

#[derive(Debug, Deserialize)]
struct CollectionFeed {
    #[serde(default)]
    entry: Vec<Collection>,
}

#[derive(Debug, Deserialize)]
struct Collection {
    id: String,
    #[serde(default)]
    version_id: Option<String>,
    #[serde(default)]
    cloud_hosted: bool,
}

/// Endpoints, an authenticated session and transfer options.
///
/// The client itself is stateless between calls: it runs metadata searches
/// and hands out the order backends ([`Client::direct`], [`Client::legacy`],
/// [`Client::harmony`]) bound to its session.
#[derive(Debug, Clone)]
pub struct Client<S: Session = HttpSession> {
    cfg: ClientConfig,
    session: S,
    transfer: Transfer,
    page_size: usize,
}

impl Client<HttpSession> {
    /// Creates a client from environment variables and/or `.netrc`.
    ///
    /// This is equivalent to `Client::new(None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `credentials`/`verify` arguments
    /// - environment variables (`EARTHDATA_TOKEN`, `EARTHDATA_USERNAME`, ...)
    /// - an `urs.earthdata.nasa.gov` entry in `.netrc`
    pub fn new(credentials: Option<Credentials>, verify: Option<bool>) -> Result<Self> {
        Self::from_config(load_config(credentials, verify)?)
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let session = HttpSession::new(&cfg, DEFAULT_TIMEOUT)?;
        Ok(Self::with_session(cfg, session))
    }

    /// Rebuilds the HTTP session with a per-request timeout.
    pub fn with_timeout(self, timeout: Duration) -> Result<Self> {
        let session = HttpSession::new(&self.cfg, timeout)?;
        Ok(Self { session, ..self })
    }
}

impl<S: Session> Client<S> {
    pub fn with_session(cfg: ClientConfig, session: S) -> Self {
        Self {
            cfg,
            session,
            transfer: Transfer::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Attempts per downloaded file; interrupted transfers resume with a
    /// Range request. The default of 1 never retries.
    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.transfer.retry_max = retry_max.max(1);
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.transfer.sleep_max = sleep_max;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.transfer.progress = progress;
        self
    }

    /// Records per search page, and granules per legacy order.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Runs a granule search, requesting pages until one comes back empty.
    pub fn search_granules(&self, params: &SearchParams) -> Result<Vec<Granule>> {
        let url = urljoin(&self.cfg.cmr_url, "search/granules.json");
        let mut granules = Vec::new();
        for page_num in 1.. {
            let query = params.page(page_num, self.page_size).to_query_pairs();
            log::debug!("GET {}", append_query(&url, &query));
            let resp: SearchResponse = self
                .session
                .get(&url, &query)?
                .error_for_status(&url)?
                .json()?;
            if resp.feed.entry.is_empty() {
                break;
            }
            log::debug!("search page {}: {} granule(s)", page_num, resp.feed.entry.len());
            granules.extend(resp.feed.entry);
        }
        log::info!("search matched {} granule(s)", granules.len());
        Ok(granules)
    }

    fn collections(&self, query: &[(String, String)]) -> Result<Vec<Collection>> {
        let url = urljoin(&self.cfg.cmr_url, "search/collections.json");
        let resp: CollectionResponse = self.session.get(&url, query)?.error_for_status(&url)?.json()?;
        Ok(resp.feed.entry)
    }

    /// Highest published version of `product`, zero-padded (`"006"`).
    pub fn latest_version(&self, product: &str) -> Result<String> {
        let collections = self.collections(&[("short_name".to_string(), product.to_string())])?;
        let latest = collections
            .iter()
            .filter_map(|c| c.version_id.as_deref())
            .filter_map(|v| v.trim().parse::<u32>().ok())
            .max()
            .ok_or_else(|| Error::InvalidProduct(product.to_string()))?;
        normalize_version(&latest.to_string())
    }

    /// Concept id of `product`/`version`, preferring the cloud-hosted
    /// collection the subsetting-job backend works on.
    pub fn collection_id(&self, product: &str, version: &str) -> Result<String> {
        let collections = self.collections(&[
            ("short_name".to_string(), product.to_string()),
            ("version".to_string(), version.to_string()),
        ])?;
        collections
            .iter()
            .find(|c| c.cloud_hosted)
            .or_else(|| collections.first())
            .map(|c| c.id.clone())
            .ok_or_else(|| Error::InvalidVersion(format!("{} {}", product, version)))
    }

    pub fn direct(&self) -> DirectGranules<'_, S> {
        DirectGranules::new(&self.session, &self.transfer)
    }

    pub fn legacy(&self) -> LegacyOrders<'_, S> {
        LegacyOrders::new(
            &self.session,
            &self.cfg.egi_url,
            &self.cfg.egi_download_url,
            &self.transfer,
        )
    }

    pub fn harmony(&self) -> HarmonyJobs<'_, S> {
        HarmonyJobs::new(&self.session, &self.cfg.harmony_url, &self.transfer)
    }
}
