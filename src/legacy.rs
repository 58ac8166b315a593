//! Legacy order backend.
//!
//! Orders are placed with a GET carrying [`OrderParams`] as query string; the
//! XML reply holds an `order/orderId`. Polling `{order_url}/{orderId}` returns
//! `requestStatus/status` and, on trouble, `processInfo` messages. Finished
//! orders are served as a zip archive at `{download_url}/{orderId}.zip`.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::path::{Path, PathBuf};

use crate::download::{Transfer, download_file, extract_zip};
use crate::error::{Error, Result};
use crate::order::{Order, OrderBackend, OrderKind, OrderStatus};
use crate::params::OrderParams;
use crate::session::Session;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct LegacyReply {
    pub(crate) order_id: Option<String>,
    pub(crate) status: Option<String>,
    pub(crate) messages: Vec<String>,
}

pub(crate) fn parse_reply(xml: &str) -> Result<LegacyReply> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut reply = LegacyReply::default();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => path.push(e.local_name().as_ref().to_vec()),
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let text = t.unescape()?.trim().to_string();
                let leaf = path.last().map(Vec::as_slice);
                let parent = path.len().checked_sub(2).map(|i| path[i].as_slice());
                match (parent, leaf) {
                    _ if text.is_empty() => {}
                    (Some(b"order"), Some(b"orderId")) if reply.order_id.is_none() => {
                        reply.order_id = Some(text)
                    }
                    (Some(b"requestStatus"), Some(b"status")) => reply.status = Some(text),
                    _ if path.iter().any(|p| p.as_slice() == b"processInfo") => {
                        reply.messages.push(text)
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(reply)
}

/// Text of `message` / `errorMessage` nodes in an XML error body.
pub(crate) fn xml_error_messages(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut in_message = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                in_message = matches!(e.local_name().as_ref(), b"message" | b"errorMessage");
            }
            Ok(Event::End(_)) => in_message = false,
            Ok(Event::Text(t)) if in_message => {
                if let Ok(text) = t.unescape() {
                    messages.push(text.trim().to_string());
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    messages
}

pub(crate) fn map_status(status: &str) -> Result<OrderStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "complete" => Ok(OrderStatus::Complete),
        "complete_with_errors" => Ok(OrderStatus::CompleteWithErrors),
        "failed" => Ok(OrderStatus::Failed),
        other => Err(Error::UnknownStatus(other.to_string())),
    }
}

/// The legacy order backend. Every order it places is a server-side job.
pub struct LegacyOrders<'a, S: Session + ?Sized> {
    session: &'a S,
    order_url: &'a str,
    download_url: &'a str,
    transfer: &'a Transfer,
}

impl<'a, S: Session + ?Sized> LegacyOrders<'a, S> {
    pub(crate) fn new(
        session: &'a S,
        order_url: &'a str,
        download_url: &'a str,
        transfer: &'a Transfer,
    ) -> Self {
        Self { session, order_url, download_url, transfer }
    }

    fn status_url(&self, order: &Order) -> String {
        format!("{}/{}", self.order_url.trim_end_matches('/'), order.job_id)
    }
}

impl<S: Session + ?Sized> OrderBackend for LegacyOrders<'_, S> {
    type Request = OrderParams;

    fn place_order(&self, params: &OrderParams) -> Result<Order> {
        let resp = self
            .session
            .get(self.order_url, &params.to_query_pairs())?
            .error_for_status(self.order_url)?;
        let reply = parse_reply(&resp.text())?;
        let job_id = reply.order_id.ok_or(Error::MissingField("order/orderId"))?;

        let mut order = Order::new(job_id, OrderKind::SubsetJob, Vec::new());
        if let Some(status) = reply.status.as_deref() {
            order.transition(map_status(status)?);
        }
        order.messages = reply.messages;
        log::info!("placed order {}", order.job_id);
        Ok(order)
    }

    fn poll_status(&self, order: &mut Order) -> Result<OrderStatus> {
        let url = self.status_url(order);
        let resp = self.session.get(&url, &[])?.error_for_status(&url)?;
        let reply = parse_reply(&resp.text())?;
        let status = reply
            .status
            .as_deref()
            .ok_or(Error::MissingField("requestStatus/status"))
            .and_then(map_status)?;

        order.messages = reply.messages;
        order.transition(status);
        Ok(status)
    }

    fn download(&self, order: &Order, destination: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
        order.ensure_ready()?;
        if order.status == OrderStatus::CompleteWithErrors {
            log::warn!(
                "order {} completed with errors: {}",
                order.job_id,
                order.messages.join("; ")
            );
        }

        let url = format!("{}/{}.zip", self.download_url.trim_end_matches('/'), order.job_id);
        let archive = destination.join(format!("{}.zip", order.job_id));
        download_file(self.session, &url, &archive, true, self.transfer)?;

        let files = extract_zip(&archive, destination, overwrite)?;
        std::fs::remove_file(&archive)?;
        log::info!("order {}: {} file(s) in {}", order.job_id, files.len(), destination.display());
        Ok(files)
    }
}
