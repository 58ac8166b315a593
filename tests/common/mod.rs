#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, ThreadId};

use log::{Level, LevelFilter, Log, Metadata, Record};

use altiquery::{ByteStream, ClientConfig, HttpResponse, RequestBody, Result, Session};

pub const CMR: &str = "https://cmr.test";
pub const EGI: &str = "https://egi.test/egi/request";
pub const EGI_DOWNLOAD: &str = "https://egi.test/esir";
pub const HARMONY: &str = "https://harmony.test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Stream,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

struct Route {
    method: Method,
    url: String,
    responses: VecDeque<(u16, Vec<u8>)>,
}

/// Scripted in-memory session. Each route answers with its queued responses
/// in order and keeps repeating the last one.
#[derive(Default)]
pub struct FakeSession {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<Recorded>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, url: &str, status: u16, body: impl Into<Vec<u8>>) -> &Self {
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|r| r.method == method && r.url == url) {
            Some(route) => route.responses.push_back((status, body.into())),
            None => routes.push(Route {
                method,
                url: url.to_string(),
                responses: VecDeque::from([(status, body.into())]),
            }),
        }
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn answer(&self, method: Method, url: &str) -> (u16, Vec<u8>) {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .find(|r| r.method == method && r.url == url)
            .unwrap_or_else(|| panic!("unexpected {:?} {}", method, url));
        if route.responses.len() > 1 {
            route.responses.pop_front().unwrap()
        } else {
            route.responses[0].clone()
        }
    }

    fn record(&self, method: Method, url: &str, query: &[(String, String)], body: Option<RequestBody>) {
        self.requests.lock().unwrap().push(Recorded {
            method,
            url: url.to_string(),
            query: query.to_vec(),
            body,
        });
    }
}

impl Session for FakeSession {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        self.record(Method::Get, url, query, None);
        let (status, body) = self.answer(Method::Get, url);
        Ok(HttpResponse { status, body })
    }

    fn post(&self, url: &str, body: RequestBody) -> Result<HttpResponse> {
        self.record(Method::Post, url, &[], Some(body));
        let (status, body) = self.answer(Method::Post, url);
        Ok(HttpResponse { status, body })
    }

    fn get_stream(&self, url: &str, _range_from: Option<u64>) -> Result<ByteStream> {
        self.record(Method::Stream, url, &[], None);
        let (status, body) = self.answer(Method::Stream, url);
        Ok(ByteStream {
            status,
            content_length: Some(body.len() as u64),
            reader: Box::new(Cursor::new(body)),
        })
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        cmr_url: CMR.to_string(),
        egi_url: EGI.to_string(),
        egi_download_url: EGI_DOWNLOAD.to_string(),
        harmony_url: HARMONY.to_string(),
        credentials: None,
        verify: true,
    }
}

pub fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

pub fn granule_entry(id: &str, name: &str, size_mb: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": format!("SC:ATL06.006:{}", name),
        "producer_granule_id": name,
        "granule_size": size_mb,
        "time_start": "2019-02-21T12:18:51.000Z",
        "time_end": "2019-02-21T12:21:30.000Z",
        "links": [
            {
                "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
                "type": "application/x-hdf5",
                "href": format!("https://data.test/ATLAS/ATL06/006/{}", name)
            },
            {
                "rel": "http://esipfed.org/ns/fedsearch/1.1/metadata#",
                "href": "https://cmr.test/collections/ATL06",
                "inherited": true
            }
        ]
    })
}

pub fn search_page(entries: Vec<serde_json::Value>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "feed": { "entry": entries } })).unwrap()
}

pub fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::FileOptions::default();
    for (name, bytes) in files {
        writer.start_file(*name, opts).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn legacy_status(status: &str, info: &[&str]) -> String {
    let info: String = info.iter().map(|m| format!("<info>{}</info>", m)).collect();
    format!(
        "<eesi:agentResponse xmlns:eesi=\"http://eosdis.nasa.gov/esi/rsp/e\">\
         <order><orderId>5000000123456</orderId></order>\
         <requestStatus><status>{}</status></requestStatus>\
         <processInfo>{}</processInfo>\
         </eesi:agentResponse>",
        status, info
    )
}

/// Records every log line with the emitting thread, and forwards to
/// `env_logger` so `RUST_LOG` still works in tests.
struct CaptureLogger {
    inner: env_logger::Logger,
    records: Mutex<Vec<(ThreadId, Level, String)>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((thread::current().id(), record.level(), record.args().to_string()));
        if self.inner.matches(record) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

static LOGGER: OnceLock<CaptureLogger> = OnceLock::new();

pub fn init_logging() {
    let logger = LOGGER.get_or_init(|| CaptureLogger {
        inner: env_logger::Builder::from_default_env().is_test(true).build(),
        records: Mutex::new(Vec::new()),
    });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}

/// Warnings logged so far by the current test's thread.
pub fn warnings() -> Vec<String> {
    let this = thread::current().id();
    LOGGER
        .get()
        .map(|logger| {
            logger
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, level, _)| *id == this && *level == Level::Warn)
                .map(|(_, _, msg)| msg.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Forgets the current thread's captured records.
pub fn clear_logs() {
    let this = thread::current().id();
    if let Some(logger) = LOGGER.get() {
        logger.records.lock().unwrap().retain(|(id, _, _)| *id != this);
    }
}

pub fn warned(fragment: &str) -> usize {
    warnings().iter().filter(|w| w.contains(fragment)).count()
}
