//! Distribution document parsing
//!
//! A distribution is the XML description of a product's installer. The
//! only part of interest is the first `auxinfo` element, whose children
//! are alternating `key`/`string` elements, optionally wrapped in a `dict`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use log::warn;

use crate::error::{describe, MalformedDocument};

/// Parse a distribution file into its `auxinfo` pairs.
///
/// Malformed XML or an unreadable file yields an empty mapping.
pub fn parse_distribution(path: &Path) -> BTreeMap<String, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!("Error reading {}: {}", path.display(), err);
            return BTreeMap::new();
        }
    };

    match parse_distribution_str(&contents) {
        Ok(info) => info,
        Err(err) => {
            warn!("Invalid XML in {}: {}", path.display(), describe(&err));
            BTreeMap::new()
        }
    }
}

/// Parse distribution XML text into its `auxinfo` pairs
pub fn parse_distribution_str(xml: &str) -> Result<BTreeMap<String, String>, MalformedDocument> {
    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = true;
    let document = roxmltree::Document::parse_with_options(xml, options)?;

    let mut info = BTreeMap::new();
    let Some(auxinfo) = document
        .descendants()
        .find(|node| node.has_tag_name("auxinfo"))
    else {
        return Ok(info);
    };

    // Keys may be nested one level down inside a dict element
    let container = auxinfo
        .children()
        .find(|node| node.has_tag_name("dict"))
        .unwrap_or(auxinfo);

    let mut key: Option<String> = None;
    let mut value: Option<String> = None;
    for node in container.children().filter(|node| node.is_element()) {
        if node.has_tag_name("key") {
            key = non_empty_text(&node);
        } else if node.has_tag_name("string") {
            value = non_empty_text(&node);
        }
        if key.is_some() && value.is_some() {
            if let (Some(k), Some(v)) = (key.take(), value.take()) {
                info.insert(k, v);
            }
        }
    }

    Ok(info)
}

fn non_empty_text(node: &roxmltree::Node) -> Option<String> {
    node.text()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
