use reqwest::Url;
use std::time::Duration;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = Duration::from_secs_f64((current.as_secs_f64() * 1.5).max(1.0));
    if next > max { max } else { next }
}

pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().and_then(|s| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    })
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Appends percent-encoded `key=value` pairs to `url`, keeping repeated keys.
pub(crate) fn append_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed
                .query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            parsed.to_string()
        }
        // Not an absolute URL (tests, relative links): keep it readable.
        Err(_) => {
            let mut out = url.to_string();
            let mut sep = if url.contains('?') { '&' } else { '?' };
            for (k, v) in params {
                out.push(sep);
                sep = '&';
                out.push_str(k);
                out.push('=');
                out.push_str(v);
            }
            out
        }
    }
}

/// Formats a float the way the backends expect: integral values without a
/// trailing `.0`.
pub(crate) fn fmt_coord(v: f64) -> String {
    if v == 0.0 {
        // avoid "-0"
        return "0".to_string();
    }
    format!("{}", v)
}
