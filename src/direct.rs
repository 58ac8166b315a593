//! Whole-granule "orders": no server-side job, the granules' data links are
//! fetched directly and in parallel.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::download::{Transfer, download_file};
use crate::error::{Error, Result};
use crate::granules::Granule;
use crate::order::{Order, OrderBackend, OrderKind, OrderStatus};
use crate::session::Session;
use crate::util::guess_filename_from_url;

pub struct DirectGranules<'a, S: Session + ?Sized> {
    session: &'a S,
    transfer: &'a Transfer,
}

impl<'a, S: Session + ?Sized> DirectGranules<'a, S> {
    pub(crate) fn new(session: &'a S, transfer: &'a Transfer) -> Self {
        Self { session, transfer }
    }
}

impl<S: Session + ?Sized> OrderBackend for DirectGranules<'_, S> {
    type Request = [Granule];

    fn place_order(&self, granules: &[Granule]) -> Result<Order> {
        let refs: Vec<String> = granules
            .iter()
            .filter_map(|g| match g.data_url() {
                Some(url) => Some(url.to_string()),
                None => {
                    log::warn!("granule {} has no direct data link, skipped", g.file_name());
                    None
                }
            })
            .collect();
        let job_id = format!("direct-{}", refs.len());
        Ok(Order::new(job_id, OrderKind::WholeGranule, refs))
    }

    fn poll_status(&self, order: &mut Order) -> Result<OrderStatus> {
        Ok(order.status)
    }

    fn download(&self, order: &Order, destination: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
        order.ensure_ready()?;
        std::fs::create_dir_all(destination)?;

        let pb = self.transfer.progress.then(|| {
            let pb = ProgressBar::new(order.granule_refs.len() as u64);
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos}/{len} granules {wide_bar}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        });
        // per-file byte bars would interleave
        let transfer = Transfer { progress: false, ..self.transfer.clone() };

        let files = order
            .granule_refs
            .par_iter()
            .map(|url| {
                let name = guess_filename_from_url(url).ok_or(Error::MissingField("granule data link"))?;
                let path = download_file(self.session, url, &destination.join(name), overwrite, &transfer)?;
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        log::info!("downloaded {} granule(s) to {}", files.len(), destination.display());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granule(name: &str, href: Option<&str>) -> Granule {
        serde_json::from_value(serde_json::json!({
            "id": format!("G-{}", name),
            "title": name,
            "producer_granule_id": name,
            "links": href
                .map(|h| vec![serde_json::json!({
                    "href": h,
                    "rel": "http://esipfed.org/ns/fedsearch/1.1/data#"
                })])
                .unwrap_or_default(),
        }))
        .unwrap()
    }

    struct NoNetwork;

    impl Session for NoNetwork {
        fn get(&self, _: &str, _: &[(String, String)]) -> Result<crate::session::HttpResponse> {
            unreachable!()
        }
        fn post(&self, _: &str, _: crate::session::RequestBody) -> Result<crate::session::HttpResponse> {
            unreachable!()
        }
        fn get_stream(&self, _: &str, _: Option<u64>) -> Result<crate::session::ByteStream> {
            unreachable!()
        }
    }

    #[test]
    fn orders_are_complete_without_a_job() {
        let transfer = Transfer::default();
        let backend = DirectGranules::new(&NoNetwork, &transfer);
        let granules = vec![
            granule("ATL06_20190221121851_08410203_006_01.h5", Some("https://data.example/ATL06_a.h5")),
            granule("ATL06_20190222010344_08490205_006_01.h5", None),
        ];
        let mut order = backend.place_order(&granules).unwrap();
        assert_eq!(order.kind, OrderKind::WholeGranule);
        assert_eq!(order.granule_refs, vec!["https://data.example/ATL06_a.h5"]);
        assert_eq!(backend.poll_status(&mut order).unwrap(), OrderStatus::Complete);
        assert_eq!(backend.pause(&mut order).unwrap(), None);
    }
}
