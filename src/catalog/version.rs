//! Ordering of installer products
//!
//! Catalog dictionaries carry no meaningful order, so "newest" is decided
//! here: dotted version first, then build number, then post date.

use std::cmp::Ordering;

use crate::models::ProductInfo;

/// Dotted numeric version such as `12.6.1`; trailing zero components are ignored
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProductVersion(Vec<u64>);

impl ProductVersion {
    pub fn parse(text: &str) -> Self {
        let mut parts: Vec<u64> = text
            .trim()
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap_or(0)
            })
            .collect();
        while parts.last() == Some(&0) {
            parts.pop();
        }
        Self(parts)
    }
}

/// Build number such as `21G217` or `22A5342f`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BuildNumber {
    major: u64,
    train: char,
    minor: u64,
    suffix: String,
}

impl BuildNumber {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let major_len = text.chars().take_while(char::is_ascii_digit).count();
        if major_len == 0 {
            return None;
        }
        let major = text[..major_len].parse().ok()?;

        let rest = &text[major_len..];
        let train = rest.chars().next().filter(char::is_ascii_alphabetic)?;
        let rest = &rest[train.len_utf8()..];

        let minor_len = rest.chars().take_while(char::is_ascii_digit).count();
        let minor = if minor_len == 0 {
            0
        } else {
            rest[..minor_len].parse().ok()?
        };

        Some(Self {
            major,
            train: train.to_ascii_uppercase(),
            minor,
            suffix: rest[minor_len..].to_string(),
        })
    }
}

/// Total order over resolved products, newest compares greatest
pub fn compare_products(a: &ProductInfo, b: &ProductInfo) -> Ordering {
    ProductVersion::parse(&a.version)
        .cmp(&ProductVersion::parse(&b.version))
        .then_with(|| {
            let build_a = a.build.as_deref().and_then(BuildNumber::parse);
            let build_b = b.build.as_deref().and_then(BuildNumber::parse);
            build_a.cmp(&build_b)
        })
        .then_with(|| a.post_date.cmp(&b.post_date))
        .then_with(|| a.product_id.cmp(&b.product_id))
}

/// Pick the newest product, if any
pub fn select_newest(products: &[ProductInfo]) -> Option<&ProductInfo> {
    products.iter().max_by(|a, b| compare_products(a, b))
}

/// Sort products newest first
pub fn sort_newest_first(products: &mut [ProductInfo]) {
    products.sort_by(|a, b| compare_products(b, a));
}
