//! Software update catalog resolution
//!
//! Handles:
//! - Replicating and parsing the catalog
//! - Filtering products down to full OS installers
//! - Resolving each installer's server metadata and distribution into a [`ProductInfo`]
//! - Choosing the newest installer

use log::{info, warn};

use crate::constants::OS_INSTALL_MARKER;
use crate::error::{describe, FetchError, MalformedDocument};
use crate::models::{Catalog, Package, PostDate, Product, ProductInfo, ServerMetadata};
use crate::parsers::{parse_distribution, parse_server_metadata, read_property_list};
use crate::replicate::Replicator;

pub mod version;

pub use version::{compare_products, select_newest, sort_newest_first};

/// Download and parse the catalog. Any failure here is fatal.
pub fn resolve_catalog(replicator: &Replicator, catalog_url: &str) -> Result<Catalog, FetchError> {
    let local_path = replicator
        .replicate(catalog_url)
        .map_err(|source| FetchError::CatalogReplication {
            url: catalog_url.to_string(),
            source,
        })?;

    let value = read_property_list(&local_path).map_err(|source| FetchError::CatalogMalformed {
        path: local_path.clone(),
        source,
    })?;

    let catalog = parse_catalog(&value).map_err(|source| FetchError::CatalogMalformed {
        path: local_path.clone(),
        source,
    })?;

    info!("Catalog {} lists {} products", catalog_url, catalog.len());
    Ok(catalog)
}

/// Build a [`Catalog`] from a decoded catalog plist.
///
/// A catalog without `Products` is empty. Product entries that are not
/// dictionaries are skipped.
pub fn parse_catalog(value: &plist::Value) -> Result<Catalog, MalformedDocument> {
    let root = value.as_dictionary().ok_or(MalformedDocument::NotADictionary)?;

    let Some(products) = root.get("Products").and_then(plist::Value::as_dictionary) else {
        return Ok(Catalog::default());
    };

    let products = products
        .iter()
        .filter_map(|(id, value)| match product_from_plist(value) {
            Some(product) => Some((id.clone(), product)),
            None => {
                warn!("Skipping malformed catalog product {}", id);
                None
            }
        })
        .collect();

    Ok(Catalog { products })
}

fn product_from_plist(value: &plist::Value) -> Option<Product> {
    let dict = value.as_dictionary()?;

    let string = |key: &str| {
        dict.get(key)
            .and_then(plist::Value::as_string)
            .map(str::to_string)
    };

    let distributions = dict
        .get("Distributions")
        .and_then(plist::Value::as_dictionary)
        .map(|locales| {
            locales
                .iter()
                .filter_map(|(locale, url)| {
                    url.as_string().map(|url| (locale.clone(), url.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let packages = dict
        .get("Packages")
        .and_then(plist::Value::as_array)
        .map(|packages| packages.iter().filter_map(package_from_plist).collect())
        .unwrap_or_default();

    let post_date = match dict.get("PostDate") {
        Some(plist::Value::Date(date)) => Some(PostDate::Date((*date).into())),
        Some(plist::Value::String(text)) => Some(PostDate::Text(text.clone())),
        _ => None,
    };

    Some(Product {
        server_metadata_url: string("ServerMetadataURL"),
        distributions,
        packages,
        post_date,
        extended_meta_info: dict.get("ExtendedMetaInfo").cloned(),
    })
}

fn package_from_plist(value: &plist::Value) -> Option<Package> {
    let dict = value.as_dictionary()?;
    Some(Package {
        url: dict.get("URL").and_then(plist::Value::as_string).map(str::to_string),
        metadata_url: dict
            .get("MetadataURL")
            .and_then(plist::Value::as_string)
            .map(str::to_string),
        size: dict.get("Size").and_then(plist::Value::as_unsigned_integer),
    })
}

/// Whether a product is a full OS installer.
///
/// Requires `ExtendedMetaInfo.InstallAssistantPackageIdentifiers.OSInstall`
/// to be the marker string; any missing segment means "no".
pub fn is_os_installer(product: &Product) -> bool {
    product
        .extended_meta_info
        .as_ref()
        .and_then(plist::Value::as_dictionary)
        .and_then(|meta| meta.get("InstallAssistantPackageIdentifiers"))
        .and_then(plist::Value::as_dictionary)
        .and_then(|identifiers| identifiers.get("OSInstall"))
        .and_then(plist::Value::as_string)
        == Some(OS_INSTALL_MARKER)
}

/// Product ids of all OS installers, in catalog order
pub fn find_installer_products(catalog: &Catalog) -> Vec<String> {
    catalog
        .products
        .iter()
        .filter(|(_, product)| is_os_installer(product))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Distribution URL for the preferred locale: `English`, then `en`
pub fn preferred_distribution<'a>(product_id: &str, product: &'a Product) -> Result<&'a str, FetchError> {
    product
        .distributions
        .get("English")
        .or_else(|| product.distributions.get("en"))
        .map(String::as_str)
        .ok_or_else(|| FetchError::NoLocalizedDistribution {
            product: product_id.to_string(),
        })
}

/// Resolve one product's metadata.
///
/// Server metadata is best-effort; the distribution is required.
pub fn resolve_product_info(
    catalog: &Catalog,
    product_id: &str,
    replicator: &Replicator,
) -> Result<ProductInfo, FetchError> {
    let product = catalog
        .product(product_id)
        .ok_or_else(|| FetchError::UnknownProduct(product_id.to_string()))?;

    let metadata = fetch_server_metadata(product_id, product, replicator);

    let post_date = product
        .post_date
        .as_ref()
        .map(PostDate::to_display_string)
        .unwrap_or_default();

    let dist_url = preferred_distribution(product_id, product)?;
    let distribution_path =
        replicator
            .replicate(dist_url)
            .map_err(|source| FetchError::DistributionReplication {
                product: product_id.to_string(),
                source,
            })?;
    let auxiliary = parse_distribution(&distribution_path);

    let version = if metadata.version.is_empty() {
        auxiliary.get("VERSION").cloned().unwrap_or_default()
    } else {
        metadata.version
    };

    Ok(ProductInfo {
        product_id: product_id.to_string(),
        title: metadata.title,
        version,
        build: auxiliary.get("BUILD").cloned(),
        post_date,
        distribution_path,
        auxiliary,
    })
}

fn fetch_server_metadata(product_id: &str, product: &Product, replicator: &Replicator) -> ServerMetadata {
    let Some(url) = product.server_metadata_url.as_deref() else {
        warn!("Product {} has no ServerMetadataURL", product_id);
        return ServerMetadata::default();
    };

    match replicator.replicate(url) {
        Ok(path) => parse_server_metadata(&path),
        Err(err) => {
            warn!("Could not replicate {}: {}", url, describe(&err));
            ServerMetadata::default()
        }
    }
}

/// Resolve every installer product in the catalog.
///
/// Products whose resolution fails are dropped from candidacy. If none
/// survive, the last failure is returned.
pub fn resolve_all(catalog: &Catalog, replicator: &Replicator) -> Result<Vec<ProductInfo>, FetchError> {
    let installer_ids = find_installer_products(catalog);
    info!("Found {} OS installer products", installer_ids.len());

    let mut resolved = Vec::with_capacity(installer_ids.len());
    let mut last_error = None;
    for product_id in &installer_ids {
        match resolve_product_info(catalog, product_id, replicator) {
            Ok(info) => resolved.push(info),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!("Skipping product {}: {}", product_id, describe(&err));
                last_error = Some(err);
            }
        }
    }

    if resolved.is_empty() {
        return Err(last_error.unwrap_or(FetchError::NoInstallerProducts));
    }
    Ok(resolved)
}
