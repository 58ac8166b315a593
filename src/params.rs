//! Backend parameter dialects.
//!
//! Extents and ranges are validated once, in [`crate::spatial`] and
//! [`crate::temporal`]; this module only renders them. The search dialect
//! uses `temporal` (with `Z`) and `bounding_box` / `polygon`; legacy orders
//! carry those same keys to select granules, and subsetting orders add `time`
//! (no `Z`) and `bbox` / `Boundingshape` for the subsetter.

use std::collections::BTreeMap;
use std::ops::Deref;

use crate::error::{Error, Result};
use crate::spatial::{ExtentKind, SpatialExtent};
use crate::temporal::TemporalRange;
use crate::util::fmt_coord;

pub const DEFAULT_PAGE_SIZE: usize = 2000;
pub const CLIENT_STRING: &str = "altiquery";

/// Highest reference ground track number.
pub const MAX_TRACK: u32 = 1387;

/// Products whose file names carry a 2-character hemisphere id
/// (`ATL07-01_...`).
const HEMISPHERE_PRODUCTS: [&str; 4] = ["ATL07", "ATL10", "ATL20", "ATL21"];

/// Variables the read layer needs whatever the user selected.
pub const MANDATORY_VARIABLES: [&str; 11] = [
    "ancillary_data/atlas_sdp_gps_epoch",
    "ancillary_data/data_start_utc",
    "ancillary_data/data_end_utc",
    "ancillary_data/granule_start_utc",
    "ancillary_data/granule_end_utc",
    "ancillary_data/start_delta_time",
    "ancillary_data/end_delta_time",
    "orbit_info/sc_orient",
    "orbit_info/sc_orient_time",
    "orbit_info/cycle_number",
    "orbit_info/rgt",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Single(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Single(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::Multi(v)
    }
}

/// Key/value parameters for one backend request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Value of a single-valued key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ParamValue::Single(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Query-string pairs; multi-valued keys are repeated.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.values {
            match value {
                ParamValue::Single(v) => pairs.push((key.clone(), v.clone())),
                ParamValue::Multi(vs) => {
                    pairs.extend(vs.iter().map(|v| (key.clone(), v.clone())));
                }
            }
        }
        pairs
    }
}

/// Merges parameter sets left to right; later keys overwrite earlier ones.
pub fn combine(sets: &[&ParameterSet]) -> ParameterSet {
    let mut out = ParameterSet::new();
    for set in sets {
        for (key, value) in &set.values {
            out.values.insert(key.clone(), value.clone());
        }
    }
    out
}

/// Metadata search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams(ParameterSet);

impl Deref for SearchParams {
    type Target = ParameterSet;

    fn deref(&self) -> &ParameterSet {
        &self.0
    }
}

impl SearchParams {
    /// Copy of these parameters asking for page `page_num` of `page_size`
    /// records.
    pub fn page(&self, page_num: usize, page_size: usize) -> SearchParams {
        SearchParams(paged(&self.0, page_num, page_size))
    }
}

fn paged(set: &ParameterSet, page_num: usize, page_size: usize) -> ParameterSet {
    let mut set = set.clone();
    set.insert("page_size", page_size.to_string());
    set.insert("page_num", page_num.to_string());
    set
}

/// Legacy order/subset parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderParams(ParameterSet);

impl Deref for OrderParams {
    type Target = ParameterSet;

    fn deref(&self) -> &ParameterSet {
        &self.0
    }
}

impl OrderParams {
    pub fn is_subset(&self) -> bool {
        self.0.get_str("agent") != Some("NO")
    }

    /// Copy of these parameters for order page `page_num`; one order covers
    /// at most `page_size` granules.
    pub fn page(&self, page_num: usize, page_size: usize) -> OrderParams {
        OrderParams(paged(&self.0, page_num, page_size))
    }
}

/// Server-side subsetting directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsetOptions {
    pub format: Option<String>,
    pub projection: Option<String>,
    pub projection_parameters: Option<String>,
    /// Variable paths such as `gt1l/land_ice_segments/h_li`.
    pub variables: Option<Vec<String>>,
}

/// Cycle/track selection rendered as granule-name patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrbitFilter {
    cycles: Vec<String>,
    tracks: Vec<String>,
}

impl OrbitFilter {
    pub fn new(cycles: &[u32], tracks: &[u32]) -> Result<Self> {
        let cycles = cycles
            .iter()
            .map(|&c| {
                if (1..=99).contains(&c) {
                    Ok(format!("{:02}", c))
                } else {
                    Err(Error::InvalidOrbitId { kind: "cycle", value: c.to_string() })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let tracks = tracks
            .iter()
            .map(|&t| {
                if (1..=MAX_TRACK).contains(&t) {
                    Ok(format!("{:04}", t))
                } else {
                    Err(Error::InvalidOrbitId { kind: "track", value: t.to_string() })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { cycles, tracks })
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty() && self.tracks.is_empty()
    }

    pub fn cycles(&self) -> &[String] {
        &self.cycles
    }

    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    /// One wildcard pattern per (cycle, track) combination; a missing side
    /// matches any value.
    pub fn readable_granule_patterns(&self, product: &str) -> Vec<String> {
        if self.is_empty() {
            return Vec::new();
        }
        let any_cycle = ["??".to_string()];
        let any_track = ["????".to_string()];
        let cycles: &[String] = if self.cycles.is_empty() { &any_cycle } else { &self.cycles };
        let tracks: &[String] = if self.tracks.is_empty() { &any_track } else { &self.tracks };

        let prefix = if HEMISPHERE_PRODUCTS.contains(&product) {
            format!("{}-??", product)
        } else {
            product.to_string()
        };

        let mut patterns = Vec::with_capacity(cycles.len() * tracks.len());
        for cycle in cycles {
            for track in tracks {
                patterns.push(format!("{}_*_{}{}??_*", prefix, track, cycle));
            }
        }
        patterns
    }
}

/// Upper-cases and checks a product short name (`atl06` → `ATL06`).
pub fn normalize_product(product: &str) -> Result<String> {
    let upper = product.trim().to_ascii_uppercase();
    let digits = upper.strip_prefix("ATL").unwrap_or("");
    if digits.len() == 2 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(upper)
    } else {
        Err(Error::InvalidProduct(product.to_string()))
    }
}

/// Zero-pads a numeric version to 3 digits (`"6"` → `"006"`).
pub fn normalize_version(version: &str) -> Result<String> {
    let v: u32 = version
        .trim()
        .parse()
        .map_err(|_| Error::InvalidVersion(version.to_string()))?;
    if v == 0 || v > 999 {
        return Err(Error::InvalidVersion(version.to_string()));
    }
    Ok(format!("{:03}", v))
}

/// Adds the mandatory variables to a user selection, without duplicates.
pub fn merge_mandatory_variables(selected: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(selected.len() + MANDATORY_VARIABLES.len());
    for var in selected {
        let var = var.trim_start_matches('/').to_string();
        if !merged.contains(&var) {
            merged.push(var);
        }
    }

    let mut injected = Vec::new();
    for var in MANDATORY_VARIABLES {
        if !merged.iter().any(|m| m == var) {
            merged.push(var.to_string());
            injected.push(var);
        }
    }
    if !injected.is_empty() {
        log::warn!(
            "adding variables required for reading the files to the subset: {}",
            injected.join(", ")
        );
    }
    merged
}

fn coverage_string(variables: &[String]) -> String {
    variables
        .iter()
        .map(|v| format!("/{}", v))
        .collect::<Vec<_>>()
        .join(",")
}

fn base_params(product: &str, version: &str) -> ParameterSet {
    let mut set = ParameterSet::new();
    set.insert("short_name", product);
    set.insert("version", version);
    set
}

fn orbit_params(product: &str, orbit: Option<&OrbitFilter>) -> ParameterSet {
    let mut set = ParameterSet::new();
    if let Some(orbit) = orbit {
        let patterns = orbit.readable_granule_patterns(product);
        if !patterns.is_empty() {
            set.insert("readable_granule_name[]", patterns);
            set.insert("options[readable_granule_name][pattern]", "true");
        }
    }
    set
}

/// Metadata search parameters. With an orbit filter the temporal constraint
/// may be omitted.
pub fn build_search_params(
    product: &str,
    version: &str,
    spatial: &SpatialExtent,
    temporal: Option<&TemporalRange>,
    orbit: Option<&OrbitFilter>,
) -> SearchParams {
    let mut set = base_params(product, version);

    match spatial.kind() {
        ExtentKind::BoundingBox => set.insert("bounding_box", spatial.to_cmr_format()),
        ExtentKind::Polygon => set.insert("polygon", spatial.to_cmr_format()),
    }
    if let Some(temporal) = temporal {
        set.insert("temporal", temporal.to_cmr_format());
    }

    let mut paging = ParameterSet::new();
    paging.insert("page_size", DEFAULT_PAGE_SIZE.to_string());
    paging.insert("page_num", "1");

    SearchParams(combine(&[&set, &orbit_params(product, orbit), &paging]))
}

/// Legacy order parameters: the search constraints, so the order selects the
/// same granules the search found, plus the order directives. Without
/// `subset` the order is for whole granules (`agent=NO`); with it, the
/// subsetting directives are added.
pub fn build_order_params(
    product: &str,
    version: &str,
    spatial: &SpatialExtent,
    temporal: Option<&TemporalRange>,
    orbit: Option<&OrbitFilter>,
    subset: Option<&SubsetOptions>,
) -> OrderParams {
    let search = build_search_params(product, version, spatial, temporal, orbit);

    let mut request = ParameterSet::new();
    request.insert("request_mode", "async");
    request.insert("include_meta", "Y");
    request.insert("client_string", CLIENT_STRING);

    let mut subsetting = ParameterSet::new();
    match subset {
        None => subsetting.insert("agent", "NO"),
        Some(options) => {
            if let Some(temporal) = temporal {
                subsetting.insert("time", temporal.to_subsetter_format());
            }
            match spatial.kind() {
                ExtentKind::BoundingBox => subsetting.insert("bbox", spatial.to_subsetter_format()),
                ExtentKind::Polygon => {
                    subsetting.insert("Boundingshape", spatial.to_subsetter_format())
                }
            }
            if let Some(format) = &options.format {
                subsetting.insert("format", format.as_str());
            }
            if let Some(projection) = &options.projection {
                subsetting.insert("projection", projection.as_str());
            }
            if let Some(params) = &options.projection_parameters {
                subsetting.insert("projection_parameters", params.as_str());
            }
            if let Some(variables) = &options.variables {
                let merged = merge_mandatory_variables(variables);
                subsetting.insert("Coverage", coverage_string(&merged));
            }
        }
    }

    OrderParams(combine(&[&search.0, &request, &subsetting]))
}

/// Async subsetting-job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarmonyRequest {
    pub collection_id: String,
    /// OGC `subset` expressions, e.g. `lat(68:71)`.
    pub subsets: Vec<String>,
    /// GeoJSON shape, uploaded instead of lat/lon subsets.
    pub shape: Option<String>,
    pub variables: Vec<String>,
    pub format: Option<String>,
    /// Restricts the job to these granule concept ids (cycle/track queries).
    pub granule_ids: Vec<String>,
}

impl HarmonyRequest {
    /// Path segment naming the requested variables (`all` when none).
    pub fn coverage_path(&self) -> String {
        if self.variables.is_empty() {
            return "all".to_string();
        }
        self.variables
            .iter()
            .map(|v| v.replace('/', "%2F"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_form_fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .subsets
            .iter()
            .map(|s| ("subset".to_string(), s.clone()))
            .collect();
        if let Some(format) = &self.format {
            fields.push(("format".to_string(), format.clone()));
        }
        fields.extend(
            self.granule_ids
                .iter()
                .map(|id| ("granuleId".to_string(), id.clone())),
        );
        fields.push(("forceAsync".to_string(), "true".to_string()));
        fields
    }
}

pub fn build_harmony_request(
    collection_id: &str,
    spatial: &SpatialExtent,
    temporal: Option<&TemporalRange>,
    subset: Option<&SubsetOptions>,
) -> HarmonyRequest {
    let mut subsets = Vec::new();
    let mut shape = None;

    match spatial.bounds() {
        Some([minlon, minlat, maxlon, maxlat]) if !spatial.crosses_dateline() => {
            subsets.push(format!("lat({}:{})", fmt_coord(minlat), fmt_coord(maxlat)));
            subsets.push(format!("lon({}:{})", fmt_coord(minlon), fmt_coord(maxlon)));
        }
        _ => shape = Some(spatial.to_geojson()),
    }
    if let Some(temporal) = temporal {
        subsets.push(temporal.to_harmony_subset());
    }

    let variables = subset
        .and_then(|s| s.variables.as_deref())
        .map(merge_mandatory_variables)
        .map(|vars| vars.into_iter().map(|v| format!("/{}", v)).collect())
        .unwrap_or_default();

    HarmonyRequest {
        collection_id: collection_id.to_string(),
        subsets,
        shape,
        variables,
        format: subset.and_then(|s| s.format.clone()),
        granule_ids: Vec::new(),
    }
}
