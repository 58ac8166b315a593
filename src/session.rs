//! The authenticated HTTP collaborator.
//!
//! Backends only talk to the network through [`Session`], so lifecycle logic
//! can be exercised against an in-memory session. [`HttpSession`] is the
//! production implementation on top of `reqwest`'s blocking client.

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;

use crate::config::{ClientConfig, Credentials};
use crate::error::{Result, format_backend_error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Converts non-2xx responses into [`crate::Error::BackendQuery`].
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(format_backend_error(self.status, url, &self.body))
        }
    }
}

/// A streamed response body.
pub struct ByteStream {
    pub status: u16,
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        file: Option<FilePart>,
    },
}

pub trait Session: Send + Sync {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse>;

    fn post(&self, url: &str, body: RequestBody) -> Result<HttpResponse>;

    /// Streams `url`, optionally resuming from byte `range_from`.
    fn get_stream(&self, url: &str, range_from: Option<u64>) -> Result<ByteStream>;
}

#[derive(Debug, Clone)]
pub struct HttpSession {
    http: HttpClient,
    credentials: Option<Credentials>,
}

impl HttpSession {
    pub fn new(cfg: &ClientConfig, timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("altiquery/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("altiquery")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
            credentials: cfg.credentials.clone(),
        })
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(Credentials::Token(token)) => req.bearer_auth(token.trim()),
            Some(Credentials::Login { username, password }) => {
                req.basic_auth(username, Some(password))
            }
            None => req,
        }
    }
}

impl Session for HttpSession {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        let resp = self.apply_auth(self.http.get(url).query(query)).send()?;
        let status = resp.status().as_u16();
        Ok(HttpResponse { status, body: resp.bytes()?.to_vec() })
    }

    fn post(&self, url: &str, body: RequestBody) -> Result<HttpResponse> {
        let req = self.apply_auth(self.http.post(url));
        let req = match body {
            RequestBody::Empty => req,
            RequestBody::Form(fields) => req.form(&fields),
            RequestBody::Multipart { fields, file } => {
                let mut form = Form::new();
                for (k, v) in fields {
                    form = form.text(k, v);
                }
                if let Some(file) = file {
                    let part = Part::bytes(file.bytes)
                        .file_name(file.file_name)
                        .mime_str(&file.mime)?;
                    form = form.part(file.field, part);
                }
                req.multipart(form)
            }
        };
        let resp = req.send()?;
        let status = resp.status().as_u16();
        Ok(HttpResponse { status, body: resp.bytes()?.to_vec() })
    }

    fn get_stream(&self, url: &str, range_from: Option<u64>) -> Result<ByteStream> {
        let mut headers = HeaderMap::new();
        if let Some(from) = range_from {
            if let Ok(v) = HeaderValue::from_str(&format!("bytes={}-", from)) {
                headers.insert(RANGE, v);
            }
        }
        let resp = self.apply_auth(self.http.get(url).headers(headers)).send()?;
        Ok(ByteStream {
            status: resp.status().as_u16(),
            content_length: resp.content_length(),
            reader: Box::new(resp),
        })
    }
}
