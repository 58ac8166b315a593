use std::path::PathBuf;
use std::time::Duration;

use crate::order::OrderStatus;

/// Errors produced by this crate.
///
/// Validation variants are raised while building a [`crate::SpatialExtent`] or
/// [`crate::TemporalRange`] and are never retried; backend and I/O variants are
/// propagated as-is so callers can apply their own retry policy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid latitude {value} at position {index}: must be within [-90, 90]")]
    InvalidLatitude { value: f64, index: usize },

    #[error("invalid longitude {value} at position {index}: must be within [-180, 180]")]
    InvalidLongitude { value: f64, index: usize },

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("polygon needs at least 4 vertices (first and last equal), got {0}")]
    TooFewVertices(usize),

    #[error("flat polygon coordinate list must have an even number of values, got {0}")]
    OddCoordinateCount(usize),

    #[error("unsupported geometry file format `{}`: expected .kml, .shp or .gpkg", .0.display())]
    UnsupportedFileFormat(PathBuf),

    #[error("geometry file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unrecognized spatial extent: {0}")]
    UnrecognizedExtentShape(String),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("invalid date `{0}`: expected YYYY-MM-DD or YYYY-DOY")]
    InvalidDateFormat(String),

    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("invalid product `{0}`: expected a short name such as ATL06")]
    InvalidProduct(String),

    #[error("invalid product version `{0}`: expected a number such as 006")]
    InvalidVersion(String),

    #[error("invalid {kind} `{value}`")]
    InvalidOrbitId { kind: &'static str, value: String },

    #[error("backend query failed (HTTP {status}) for url ({url})\n{message}")]
    BackendQuery {
        status: u16,
        url: String,
        message: String,
    },

    #[error("order {job_id} is not ready for download (status: {status})")]
    OrderNotReady { job_id: String, status: OrderStatus },

    #[error("order {job_id} failed: {}", .messages.join("; "))]
    OrderFailed {
        job_id: String,
        messages: Vec<String>,
    },

    #[error("unknown order status [{0}]")]
    UnknownStatus(String),

    #[error("gave up polling order {job_id} after {attempts} attempt(s) / {elapsed:?}")]
    PollTimeout {
        job_id: String,
        attempts: usize,
        elapsed: Duration,
    },

    #[error("polling order {0} was cancelled")]
    PollCancelled(String),

    #[error("missing `{0}` in backend response")]
    MissingField(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct BackendErrorBody {
    // CMR: {"errors": ["..."]}
    #[serde(default)]
    pub(crate) errors: Vec<String>,
    // Harmony: {"code": "harmony.RequestValidationError", "description": "..."}
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

/// Turns a non-2xx response into [`Error::BackendQuery`], keeping the backend's
/// own error text.
pub(crate) fn format_backend_error(status: u16, url: &str, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body);

    let mut lines: Vec<String> = Vec::new();
    if let Ok(parsed) = serde_json::from_slice::<BackendErrorBody>(body) {
        lines.extend(parsed.errors);
        lines.extend(parsed.code);
        lines.extend(parsed.description);
        lines.extend(parsed.message);
        lines.extend(parsed.detail);
    } else if text.trim_start().starts_with('<') {
        lines = crate::legacy::xml_error_messages(&text);
    }
    if lines.is_empty() && !text.trim().is_empty() {
        lines.push(text.trim().to_string());
    }

    if status == 401 || status == 403 {
        lines.push(
            "Check your Earthdata Login credentials (EARTHDATA_TOKEN, or EARTHDATA_USERNAME/EARTHDATA_PASSWORD, or an urs.earthdata.nasa.gov entry in ~/.netrc)"
                .to_string(),
        );
    }

    Error::BackendQuery {
        status,
        url: url.to_string(),
        message: lines.join("\n"),
    }
}
