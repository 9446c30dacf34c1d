//! Document parsing module
//!
//! Handles:
//! - Decoding binary and XML property lists (catalogs, server metadata, hdiutil output)
//! - Best-effort extraction of title/version from server metadata
//! - Best-effort extraction of `auxinfo` pairs from distribution documents

use std::fs;
use std::path::Path;
use log::warn;

use crate::error::{describe, MalformedDocument};
use crate::models::ServerMetadata;

pub mod distribution;

pub use distribution::{parse_distribution, parse_distribution_str};

/// Decode a binary or XML property list
pub fn parse_property_list(bytes: &[u8]) -> Result<plist::Value, MalformedDocument> {
    Ok(plist::from_bytes::<plist::Value>(bytes)?)
}

/// Read and decode a property list file
pub fn read_property_list(path: &Path) -> Result<plist::Value, MalformedDocument> {
    let bytes = fs::read(path).map_err(|source| MalformedDocument::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_property_list(&bytes)
}

/// Extract title and version from a server metadata file.
///
/// Any read or parse failure yields an empty result.
pub fn parse_server_metadata(path: &Path) -> ServerMetadata {
    match read_property_list(path) {
        Ok(value) => server_metadata_from_plist(&value),
        Err(err) => {
            warn!("Error reading {}: {}", path.display(), describe(&err));
            ServerMetadata::default()
        }
    }
}

/// Extract title and version from an already decoded server metadata plist
pub fn server_metadata_from_plist(value: &plist::Value) -> ServerMetadata {
    let Some(dict) = value.as_dictionary() else {
        return ServerMetadata::default();
    };

    let version = dict
        .get("CFBundleShortVersionString")
        .and_then(plist::Value::as_string)
        .unwrap_or_default()
        .to_string();

    let localization = dict
        .get("localization")
        .and_then(plist::Value::as_dictionary);
    let title = localization
        .and_then(|loc| {
            // An empty English entry counts as missing
            loc.get("English")
                .and_then(plist::Value::as_dictionary)
                .filter(|english| !english.is_empty())
                .or_else(|| loc.get("en").and_then(plist::Value::as_dictionary))
        })
        .and_then(|preferred| preferred.get("title"))
        .and_then(plist::Value::as_string)
        .unwrap_or_default()
        .to_string();

    ServerMetadata { title, version }
}
