//! Order lifecycle.
//!
//! ```text
//! Pending ──► Processing ──► Complete | CompleteWithErrors | Failed
//!    │            │
//!    └──► Paused ◄┘   (left again via resume / skip_preview)
//! ```
//!
//! Whole-granule orders have no server-side job and start out `Complete`.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    WholeGranule,
    SubsetJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Processing,
    Complete,
    CompleteWithErrors,
    Failed,
    Paused,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::CompleteWithErrors | OrderStatus::Failed
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, OrderStatus::Complete | OrderStatus::CompleteWithErrors)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Complete => "complete",
            OrderStatus::CompleteWithErrors => "complete_with_errors",
            OrderStatus::Failed => "failed",
            OrderStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub job_id: String,
    pub kind: OrderKind,
    /// Granule identifiers (whole-granule orders: their download URLs).
    pub granule_refs: Vec<String>,
    pub status: OrderStatus,
    /// Messages reported by the backend, kept verbatim.
    pub messages: Vec<String>,
    /// Percent complete, when the backend reports it.
    pub progress: Option<u8>,
}

impl Order {
    pub fn new(job_id: impl Into<String>, kind: OrderKind, granule_refs: Vec<String>) -> Self {
        let status = match kind {
            OrderKind::WholeGranule => OrderStatus::Complete,
            OrderKind::SubsetJob => OrderStatus::Pending,
        };
        Self {
            job_id: job_id.into(),
            kind,
            granule_refs,
            status,
            messages: Vec::new(),
            progress: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.kind == OrderKind::WholeGranule || self.status.is_success()
    }

    /// Fails with [`Error::OrderNotReady`] unless the order can be downloaded.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::OrderNotReady {
                job_id: self.job_id.clone(),
                status: self.status,
            })
        }
    }

    /// Records a polled status, logging transitions.
    pub(crate) fn transition(&mut self, status: OrderStatus) {
        if self.status != status {
            log::info!("order {}: {} -> {}", self.job_id, self.status, status);
            self.status = status;
        }
    }
}

/// One backend's implementation of the order lifecycle.
///
/// Each call issues at most one request per order (downloads aside) and never
/// sleeps; waiting is composed on top with [`crate::PollPolicy`].
pub trait OrderBackend {
    type Request: ?Sized;

    fn place_order(&self, request: &Self::Request) -> Result<Order>;

    /// Refreshes `order.status` from the backend and returns it.
    fn poll_status(&self, order: &mut Order) -> Result<OrderStatus>;

    fn download(&self, order: &Order, destination: &Path, overwrite: bool) -> Result<Vec<PathBuf>>;

    /// `None` when the backend or order kind has no pause gate.
    fn pause(&self, _order: &mut Order) -> Result<Option<OrderStatus>> {
        Ok(None)
    }

    fn resume(&self, _order: &mut Order) -> Result<Option<OrderStatus>> {
        Ok(None)
    }

    fn skip_preview(&self, _order: &mut Order) -> Result<Option<OrderStatus>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_granule_orders_are_always_ready() {
        let order = Order::new("direct", OrderKind::WholeGranule, vec![]);
        assert_eq!(order.status, OrderStatus::Complete);
        assert!(order.ensure_ready().is_ok());
    }

    #[test]
    fn subset_jobs_need_a_successful_status() {
        let mut order = Order::new("5000001", OrderKind::SubsetJob, vec![]);
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Paused,
            OrderStatus::Failed,
        ] {
            order.transition(status);
            assert!(matches!(
                order.ensure_ready(),
                Err(Error::OrderNotReady { status: s, .. }) if s == status
            ));
        }
        for status in [OrderStatus::Complete, OrderStatus::CompleteWithErrors] {
            order.transition(status);
            assert!(order.ensure_ready().is_ok());
        }
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Failed.is_success());
        assert!(!OrderStatus::Paused.is_terminal());
        assert_eq!(OrderStatus::CompleteWithErrors.to_string(), "complete_with_errors");
    }
}
