//! Product payload fetching
//!
//! Replicates every package (and its metadata document) of one product.
//! Each download is independent: a failure is logged and reported, and the
//! remaining packages are still fetched. An interrupt ends the loop.

use std::path::PathBuf;
use log::{error, info};

use crate::error::{describe, FetchError, ReplicationError};
use crate::models::{Catalog, EventSink};
use crate::replicate::Replicator;

/// A single download that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub url: String,
    pub reason: String,
}

/// Outcome of fetching a product's packages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub replicated: Vec<PathBuf>,
    pub failed: Vec<FailedDownload>,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Download all packages listed for `product_id`
pub fn fetch_product(
    catalog: &Catalog,
    product_id: &str,
    replicator: &Replicator,
    events: &EventSink,
) -> Result<FetchReport, FetchError> {
    let product = catalog
        .product(product_id)
        .ok_or_else(|| FetchError::UnknownProduct(product_id.to_string()))?;

    let total = product.packages.len();
    let mut report = FetchReport::default();

    for (index, package) in product.packages.iter().enumerate() {
        if replicator.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if let Some(url) = &package.url {
            record(&mut report, events, url, replicator.replicate_sized(url, package.size))?;
        }
        if let Some(url) = &package.metadata_url {
            record(&mut report, events, url, replicator.replicate(url))?;
        }
        events.phase(format!("Downloaded {} of {}", index + 1, total));
    }

    info!(
        "Fetched product {}: {} files replicated, {} failed",
        product_id,
        report.replicated.len(),
        report.failed.len()
    );
    Ok(report)
}

fn record(
    report: &mut FetchReport,
    events: &EventSink,
    url: &str,
    result: Result<PathBuf, ReplicationError>,
) -> Result<(), FetchError> {
    match result {
        Ok(path) => report.replicated.push(path),
        Err(ReplicationError::Cancelled { .. }) => return Err(FetchError::Cancelled),
        Err(err) => {
            let reason = describe(&err);
            error!("Could not replicate {}: {}", url, reason);
            events.warning(format!("Could not replicate {}: {}", url, reason));
            report.failed.push(FailedDownload {
                url: url.to_string(),
                reason,
            });
        }
    }
    Ok(())
}
