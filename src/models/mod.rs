//! Data models module
//!
//! Defines core data structures:
//! - Catalog / Product / Package: a parsed software update catalog
//! - ServerMetadata / ProductInfo: per-product facts resolved from side documents
//! - ProgressEvent / EventSink: the progress stream consumed by the presentation layer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::SystemTime;

pub use crate::error::Stage;


/// One downloadable payload of a product
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub url: Option<String>,
    pub metadata_url: Option<String>,
    /// Size in bytes as published by the catalog
    pub size: Option<u64>,
}

/// One product entry of the catalog's `Products` dictionary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    pub server_metadata_url: Option<String>,
    /// Locale code -> distribution document URL
    pub distributions: BTreeMap<String, String>,
    pub packages: Vec<Package>,
    pub post_date: Option<PostDate>,
    /// Kept as a raw value; only one nested path of it is ever inspected
    pub extended_meta_info: Option<plist::Value>,
}

/// `PostDate` as found in the catalog
#[derive(Debug, Clone, PartialEq)]
pub enum PostDate {
    Date(SystemTime),
    Text(String),
}

impl PostDate {
    /// RFC 3339 rendering, or the text verbatim when the catalog used a string
    pub fn to_display_string(&self) -> String {
        match self {
            PostDate::Text(text) => text.clone(),
            PostDate::Date(time) => {
                let datetime = time::OffsetDateTime::from(*time);
                datetime
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_else(|_| format!("{:?}", time))
            }
        }
    }
}

/// Parsed catalog; products keep the document's enumeration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub products: Vec<(String, Product)>,
}

impl Catalog {
    pub fn product(&self, product_id: &str) -> Option<&Product> {
        self.products
            .iter()
            .find(|(id, _)| id == product_id)
            .map(|(_, product)| product)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Title and version from a server metadata document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub title: String,
    pub version: String,
}

/// Everything known about one installer product after resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: String,
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    pub post_date: String,
    /// Local path of the replicated distribution document
    pub distribution_path: PathBuf,
    /// Flat key/value pairs from the distribution's `auxinfo`
    pub auxiliary: BTreeMap<String, String>,
}

/// Progress stream emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A new pipeline stage started
    Stage(Stage),
    /// The product that will be installed
    Product(ProductInfo),
    /// Coarse description of the current step
    Phase(String),
    /// Fine-grained status text
    Status(String),
    /// Percent complete (0-100), or -1 when the tool printed something unparseable
    Percent(f64),
    /// Non-fatal failure the operator should know about
    Warning(String),
}

/// Sending half of the progress stream
///
/// Cloned into every component that reports progress. A closed receiver is
/// not an error; events are simply dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<ProgressEvent>>,
}

impl EventSink {
    /// Create a connected sink/receiver pair
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender: Some(sender) }, receiver)
    }

    /// Sink that discards everything
    pub fn silent() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn stage(&self, stage: Stage) {
        self.emit(ProgressEvent::Stage(stage));
    }

    pub fn phase(&self, phase: impl Into<String>) {
        self.emit(ProgressEvent::Phase(phase.into()));
    }

    pub fn status(&self, status: impl Into<String>) {
        self.emit(ProgressEvent::Status(status.into()));
    }

    pub fn percent(&self, percent: f64) {
        self.emit(ProgressEvent::Percent(percent));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Warning(message.into()));
    }
}
