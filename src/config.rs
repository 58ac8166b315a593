use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_CMR_URL: &str = "https://cmr.earthdata.nasa.gov";
pub const DEFAULT_EGI_URL: &str = "https://n5eil02u.ecs.nsidc.org/egi/request";
pub const DEFAULT_EGI_DOWNLOAD_URL: &str = "https://n5eil02u.ecs.nsidc.org/esir";
pub const DEFAULT_HARMONY_URL: &str = "https://harmony.earthdata.nasa.gov";
pub const EARTHDATA_HOST: &str = "urs.earthdata.nasa.gov";

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Earthdata Login bearer token.
    Token(String),
    Login { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Login { username, .. } => {
                write!(f, "Login {{ username: {:?}, password: *** }}", username)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Metadata search root, e.g. `https://cmr.earthdata.nasa.gov`.
    pub cmr_url: String,
    /// Legacy order endpoint.
    pub egi_url: String,
    /// Root under which legacy order archives (`{order_id}.zip`) are served.
    pub egi_download_url: String,
    /// Async subsetting-job root.
    pub harmony_url: String,
    pub credentials: Option<Credentials>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cmr_url: DEFAULT_CMR_URL.to_string(),
            egi_url: DEFAULT_EGI_URL.to_string(),
            egi_download_url: DEFAULT_EGI_DOWNLOAD_URL.to_string(),
            harmony_url: DEFAULT_HARMONY_URL.to_string(),
            credentials: None,
            verify: true,
        }
    }
}

/// Builds a configuration from (in order of precedence):
/// - explicit `credentials` / `verify` arguments
/// - environment variables (`EARTHDATA_TOKEN`, `EARTHDATA_USERNAME` /
///   `EARTHDATA_PASSWORD`, `ALTIQUERY_*_URL`, `ALTIQUERY_VERIFY`)
/// - an `urs.earthdata.nasa.gov` entry in `$NETRC`, `./.netrc` or `~/.netrc`
pub(crate) fn load_config(
    credentials: Option<Credentials>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    load_config_with(|name| std::env::var(name).ok(), credentials, verify)
}

pub(crate) fn load_config_with<F>(
    env: F,
    credentials: Option<Credentials>,
    verify: Option<bool>,
) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = ClientConfig::default();
    if let Some(url) = env("ALTIQUERY_CMR_URL") {
        cfg.cmr_url = url;
    }
    if let Some(url) = env("ALTIQUERY_EGI_URL") {
        cfg.egi_url = url;
    }
    if let Some(url) = env("ALTIQUERY_EGI_DOWNLOAD_URL") {
        cfg.egi_download_url = url;
    }
    if let Some(url) = env("ALTIQUERY_HARMONY_URL") {
        cfg.harmony_url = url;
    }

    let env_verify = match env("ALTIQUERY_VERIFY").as_deref().map(str::trim) {
        None | Some("") => None,
        Some("0") | Some("false") | Some("no") => Some(false),
        Some("1") | Some("true") | Some("yes") => Some(true),
        Some(other) => {
            return Err(Error::Config(format!(
                "ALTIQUERY_VERIFY must be a boolean, got `{}`",
                other
            )));
        }
    };
    cfg.verify = verify.or(env_verify).unwrap_or(true);

    cfg.credentials = match credentials {
        Some(c) => Some(c),
        None => credentials_from_env(&env).or_else(|| credentials_from_netrc(&env)),
    };

    if cfg.credentials.is_none() {
        log::debug!(
            "no Earthdata credentials configured; only anonymous search will work (checked: {})",
            netrc_candidates(&env)
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(cfg)
}

fn credentials_from_env<F>(env: &F) -> Option<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = env("EARTHDATA_TOKEN").filter(|t| !t.trim().is_empty()) {
        return Some(Credentials::Token(token));
    }
    match (env("EARTHDATA_USERNAME"), env("EARTHDATA_PASSWORD")) {
        (Some(username), Some(password)) => Some(Credentials::Login { username, password }),
        _ => None,
    }
}

fn credentials_from_netrc<F>(env: &F) -> Option<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    for path in netrc_candidates(env) {
        if !path.exists() {
            continue;
        }
        match read_netrc(&path, EARTHDATA_HOST) {
            Ok(Some(creds)) => return Some(creds),
            Ok(None) => continue,
            Err(e) => log::warn!("failed to read {}: {}", path.display(), e),
        }
    }
    None
}

fn read_netrc(path: &Path, host: &str) -> Result<Option<Credentials>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_netrc(&text, host))
}

/// Returns the login for `host` (or the `default` entry) from netrc text.
pub(crate) fn parse_netrc(text: &str, host: &str) -> Option<Credentials> {
    let mut tokens = text
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .flat_map(str::split_whitespace);

    let mut matched: Option<(Option<String>, Option<String>)> = None;
    let mut fallback: Option<(Option<String>, Option<String>)> = None;
    // Which entry the following login/password tokens belong to.
    let mut current: Option<bool> = None;

    while let Some(tok) = tokens.next() {
        match tok {
            "machine" => {
                let name = tokens.next().unwrap_or("");
                current = Some(name == host);
                if name == host && matched.is_none() {
                    matched = Some((None, None));
                }
            }
            "default" => {
                current = Some(false);
                if fallback.is_none() {
                    fallback = Some((None, None));
                }
            }
            "login" | "password" => {
                let value = tokens.next().map(str::to_string);
                let slot = match current {
                    Some(true) => matched.as_mut(),
                    Some(false) => fallback.as_mut(),
                    None => None,
                };
                if let Some(entry) = slot {
                    if tok == "login" {
                        entry.0 = value;
                    } else {
                        entry.1 = value;
                    }
                }
            }
            _ => {}
        }
    }

    match matched.or(fallback)? {
        (Some(username), Some(password)) => Some(Credentials::Login { username, password }),
        _ => None,
    }
}

fn netrc_candidates<F>(env: &F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    // 1) NETRC (explicit)
    // 2) ./.netrc
    // 3) ~/.netrc
    if let Some(p) = env("NETRC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".netrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".netrc"));
    }
    v
}
