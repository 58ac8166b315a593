use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const DATA_REL: &str = "http://esipfed.org/ns/fedsearch/1.1/data#";

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    pub(crate) feed: Feed,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Feed {
    #[serde(default)]
    pub(crate) entry: Vec<Granule>,
}

/// One granule record returned by the metadata search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Granule {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub producer_granule_id: Option<String>,
    /// Size in MB; the search backend reports it as a string.
    #[serde(default, rename = "granule_size", deserialize_with = "de_size")]
    pub size_mb: Option<f64>,
    #[serde(default)]
    pub time_start: Option<String>,
    #[serde(default)]
    pub time_end: Option<String>,
    #[serde(default)]
    pub links: Vec<GranuleLink>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GranuleLink {
    pub href: String,
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub inherited: Option<bool>,
}

fn de_size<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Size>::deserialize(deserializer)? {
        Some(Size::Number(n)) => Some(n),
        Some(Size::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

impl Granule {
    /// File name of the granule (producer id, falling back to the title).
    pub fn file_name(&self) -> &str {
        self.producer_granule_id.as_deref().unwrap_or(&self.title)
    }

    /// Direct HTTPS data link, skipping collection-level (inherited) links.
    pub fn data_url(&self) -> Option<&str> {
        self.links
            .iter()
            .filter(|l| l.inherited != Some(true))
            .filter(|l| l.rel.as_deref() == Some(DATA_REL))
            .map(|l| l.href.as_str())
            .find(|href| href.starts_with("https://"))
    }

    pub fn id_parts(&self) -> Option<GranuleId> {
        GranuleId::parse(self.file_name())
    }
}

/// Fields encoded in a product file name such as
/// `ATL06_20190221121851_08410203_005_01.h5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleId {
    pub product: String,
    /// Hemisphere id for sea-ice products (`ATL07-01_...`).
    pub hemisphere: Option<String>,
    pub acquired: NaiveDateTime,
    pub track: String,
    pub cycle: String,
    pub region: String,
    pub release: String,
    pub version: String,
}

fn granule_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<product>ATL\d{2})(?:-(?P<hemi>\d{2}))?_(?P<datetime>\d{14})_(?P<track>\d{4})(?P<cycle>\d{2})(?P<region>\d{2})_(?P<release>\d{3})_(?P<version>\d{2})",
        )
        .ok()
    })
    .as_ref()
}

impl GranuleId {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = granule_id_regex()?.captures(name)?;
        let acquired = NaiveDateTime::parse_from_str(&caps["datetime"], "%Y%m%d%H%M%S").ok()?;
        Some(Self {
            product: caps["product"].to_string(),
            hemisphere: caps.name("hemi").map(|m| m.as_str().to_string()),
            acquired,
            track: caps["track"].to_string(),
            cycle: caps["cycle"].to_string(),
            region: caps["region"].to_string(),
            release: caps["release"].to_string(),
            version: caps["version"].to_string(),
        })
    }
}

/// Count and size statistics over a granule list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GranuleSummary {
    pub count: usize,
    pub avg_size_mb: f64,
    pub total_size_mb: f64,
}

impl GranuleSummary {
    pub fn from_granules(granules: &[Granule]) -> Self {
        let total: f64 = granules.iter().filter_map(|g| g.size_mb).sum();
        let count = granules.len();
        Self {
            count,
            avg_size_mb: if count == 0 { 0.0 } else { total / count as f64 },
            total_size_mb: total,
        }
    }
}

/// Distinct cycles found in granule names, sorted.
pub fn cycles(granules: &[Granule]) -> Vec<String> {
    granules
        .iter()
        .filter_map(Granule::id_parts)
        .map(|id| id.cycle)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct reference ground tracks found in granule names, sorted.
pub fn tracks(granules: &[Granule]) -> Vec<String> {
    granules
        .iter()
        .filter_map(Granule::id_parts)
        .map(|id| id.track)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
