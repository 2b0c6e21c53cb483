//! Listing page parsing.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use crate::models::DatasetReference;

/// Anchors pointing at dataset detail pages.
pub const REFERENCE_SELECTOR: &str = "a[href^=\"/datasets/view?index=\"]";

/// Page content that marks a transient upstream failure.
pub const TRANSIENT_MARKERS: &[&str] = &[
    "502 Bad Gateway",
    "503 Service Temporarily Unavailable",
    "504 Gateway Time-out",
];

/// Dataset references on a listing page, absolute and deduplicated in
/// page order.
pub fn extract_references(html: &str, base_url: &str) -> Vec<DatasetReference> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(REFERENCE_SELECTOR) else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut references = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let url = match base.as_ref().and_then(|b| b.join(href).ok()) {
            Some(url) => url.to_string(),
            None => format!("{}{}", base_url.trim_end_matches('/'), href),
        };
        if seen.insert(url.clone()) {
            references.push(DatasetReference::new(url));
        }
    }
    references
}

/// First transient failure marker present in `html`.
pub fn transient_marker(html: &str) -> Option<&'static str> {
    TRANSIENT_MARKERS
        .iter()
        .copied()
        .find(|marker| html.contains(marker))
}
