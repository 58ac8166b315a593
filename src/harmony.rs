//! Async subsetting-job backend.
//!
//! Jobs are submitted as a multipart POST to the OGC coverages endpoint of a
//! collection and followed through `{root}/jobs/{jobID}`. Besides polling, a
//! job can be paused, resumed or released from its preview gate.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::download::{Transfer, download_file};
use crate::error::{Error, Result};
use crate::order::{Order, OrderBackend, OrderKind, OrderStatus};
use crate::params::HarmonyRequest;
use crate::session::{FilePart, RequestBody, Session};
use crate::util::{guess_filename_from_url, urljoin};

#[derive(Debug, Deserialize)]
pub(crate) struct JobLink {
    #[serde(default)]
    rel: Option<String>,
    href: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobError {
    #[serde(default)]
    url: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Job {
    #[serde(rename = "jobID", alias = "job_id")]
    pub(crate) job_id: String,
    pub(crate) status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    links: Vec<JobLink>,
    #[serde(default)]
    errors: Vec<JobError>,
}

impl Job {
    pub(crate) fn data_links(&self) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(|l| l.rel.as_deref() == Some("data"))
            .map(|l| l.href.as_str())
    }

    /// Next page of result links, for jobs with many outputs.
    pub(crate) fn next_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref() == Some("next"))
            .map(|l| l.href.as_str())
    }

    fn messages(&self) -> Vec<String> {
        let mut out: Vec<String> = self.message.iter().cloned().collect();
        out.extend(self.errors.iter().map(|e| match &e.url {
            Some(url) => format!("{}: {}", url, e.message),
            None => e.message.clone(),
        }));
        out
    }

    /// Copies status, progress and messages onto `order`.
    fn apply(&self, order: &mut Order) -> Result<OrderStatus> {
        let status = map_status(&self.status)?;
        order.transition(status);
        order.progress = self.progress.map(|p| p.min(100));
        order.messages = self.messages();
        Ok(status)
    }
}

pub(crate) fn map_status(status: &str) -> Result<OrderStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "accepted" => Ok(OrderStatus::Pending),
        "running" | "running_with_errors" => Ok(OrderStatus::Processing),
        "paused" | "previewing" => Ok(OrderStatus::Paused),
        "successful" => Ok(OrderStatus::Complete),
        "complete_with_errors" => Ok(OrderStatus::CompleteWithErrors),
        "failed" | "canceled" => Ok(OrderStatus::Failed),
        other => Err(Error::UnknownStatus(other.to_string())),
    }
}

pub struct HarmonyJobs<'a, S: Session + ?Sized> {
    session: &'a S,
    root: &'a str,
    transfer: &'a Transfer,
}

impl<'a, S: Session + ?Sized> HarmonyJobs<'a, S> {
    pub(crate) fn new(session: &'a S, root: &'a str, transfer: &'a Transfer) -> Self {
        Self { session, root, transfer }
    }

    fn job_url(&self, job_id: &str) -> String {
        urljoin(self.root, &format!("jobs/{}", job_id))
    }

    fn fetch_job(&self, url: &str) -> Result<Job> {
        self.session.get(url, &[])?.error_for_status(url)?.json()
    }

    fn control(&self, order: &mut Order, action: &str) -> Result<Option<OrderStatus>> {
        if order.kind != OrderKind::SubsetJob {
            return Ok(None);
        }
        let url = format!("{}/{}", self.job_url(&order.job_id), action);
        self.session.get(&url, &[])?.error_for_status(&url)?;
        log::info!("job {}: {}", order.job_id, action);
        self.poll_status(order).map(Some)
    }
}

impl<S: Session + ?Sized> OrderBackend for HarmonyJobs<'_, S> {
    type Request = HarmonyRequest;

    fn place_order(&self, request: &HarmonyRequest) -> Result<Order> {
        let url = urljoin(
            self.root,
            &format!(
                "{}/ogc-api-coverages/1.0.0/collections/{}/coverage/rangeset",
                request.collection_id,
                request.coverage_path()
            ),
        );
        let file = request.shape.as_ref().map(|shape| FilePart {
            field: "shapefile".to_string(),
            file_name: "shape.geojson".to_string(),
            mime: "application/geo+json".to_string(),
            bytes: shape.as_bytes().to_vec(),
        });
        let body = RequestBody::Multipart { fields: request.to_form_fields(), file };

        let job: Job = self.session.post(&url, body)?.error_for_status(&url)?.json()?;
        let mut order = Order::new(job.job_id.clone(), OrderKind::SubsetJob, Vec::new());
        job.apply(&mut order)?;
        log::info!("submitted job {} ({})", order.job_id, order.status);
        Ok(order)
    }

    fn poll_status(&self, order: &mut Order) -> Result<OrderStatus> {
        let job = self.fetch_job(&self.job_url(&order.job_id))?;
        job.apply(order)
    }

    fn download(&self, order: &Order, destination: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
        order.ensure_ready()?;

        let mut links = Vec::new();
        let mut next = Some(self.job_url(&order.job_id));
        while let Some(url) = next.take() {
            let job = self.fetch_job(&url)?;
            links.extend(job.data_links().map(str::to_string));
            next = job.next_url().map(str::to_string);
        }
        if links.is_empty() {
            log::warn!("job {} finished without data links", order.job_id);
        }

        let mut files = Vec::with_capacity(links.len());
        for href in &links {
            let name = guess_filename_from_url(href).ok_or(Error::MissingField("links[].href"))?;
            files.push(download_file(
                self.session,
                href,
                &destination.join(name),
                overwrite,
                self.transfer,
            )?);
        }
        Ok(files)
    }

    fn pause(&self, order: &mut Order) -> Result<Option<OrderStatus>> {
        self.control(order, "pause")
    }

    fn resume(&self, order: &mut Order) -> Result<Option<OrderStatus>> {
        self.control(order, "resume")
    }

    fn skip_preview(&self, order: &mut Order) -> Result<Option<OrderStatus>> {
        self.control(order, "skip-preview")
    }
}
