use crate::runner::UnitFailure;
use crate::store::{Location, ObjectStore};
use crate::EtlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// URL of one listing's detail page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingLink(String);

impl ListingLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Listing identifier: the text after the last `/annons/`, or else the final path
    /// segment, without any query string or fragment
    ///
    /// Returns `None` when nothing usable remains.
    pub fn listing_id(&self) -> Option<&str> {
        let url = self.0.split(['?', '#']).next().unwrap_or_default();
        let tail = match url.rfind("/annons/") {
            Some(pos) => &url[pos + "/annons/".len()..],
            None => url.trim_end_matches('/').rsplit('/').next().unwrap_or_default(),
        };
        let id = tail.trim_end_matches('/');
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}

impl fmt::Display for ListingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListingLink {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Numeric page index embedded in a `page_{n}.json` name
pub fn page_index(name: &str) -> Option<u64> {
    let file = name.rsplit('/').next()?;
    file.strip_prefix("page_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Links found in one page document (`cars[].link`)
///
/// A page without `cars` has no links; a `cars` value that is not an array is malformed.
pub fn links_in_page(name: &str, page: &Value) -> Result<Vec<ListingLink>, EtlError> {
    let cars = match page.get("cars") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(cars)) => cars,
        Some(_) => return Err(EtlError::malformed(name, "`cars` is not an array")),
    };

    Ok(cars
        .iter()
        .filter_map(|car| car.get("link").and_then(Value::as_str))
        .filter(|link| !link.is_empty())
        .map(ListingLink::from)
        .collect())
}

/// Links of one stored page
#[derive(Debug, Clone)]
pub struct PageLinks {
    pub name: String,
    pub links: Vec<ListingLink>,
}

/// Result of scanning every stored page
#[derive(Debug, Default)]
pub struct LinkExtraction {
    /// Pages that were read, in page-index order
    pub pages: Vec<PageLinks>,
    /// Pages that could not be read or decoded
    pub failed: Vec<UnitFailure>,
}

impl LinkExtraction {
    /// All links, in page order and then array order; duplicates across pages are kept
    pub fn links(&self) -> Vec<ListingLink> {
        self.pages
            .iter()
            .flat_map(|page| page.links.iter().cloned())
            .collect()
    }

    pub fn files_found(&self) -> usize {
        self.pages.len() + self.failed.len()
    }
}

/// Orders page names by their numeric index; names without one sort last, by name
pub fn sort_pages(names: &mut [String]) {
    names.sort_by(|a, b| match (page_index(a), page_index(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}

async fn read_page_links(
    store: &dyn ObjectStore,
    location: &Location,
    name: &str,
) -> Result<Vec<ListingLink>, EtlError> {
    let key = location.key(name);
    let body = location.get(store, name).await?;
    let page: Value =
        serde_json::from_slice(&body).map_err(|e| EtlError::malformed(&key, e.to_string()))?;
    links_in_page(&key, &page)
}

/// Link Extractor: reads every `.json` page in `location` in numeric page order
///
/// # Arguments
///
/// * `store` - Object store holding the pages
/// * `location` - Where the Page Lister wrote them
///
/// # Returns
///
/// * `Ok(LinkExtraction)` - Links per page; unreadable pages are listed as failures
/// * `Err(EtlError)` - The location itself could not be listed
pub async fn extract_links(
    store: &dyn ObjectStore,
    location: &Location,
) -> Result<LinkExtraction, EtlError> {
    let mut names: Vec<String> = location
        .list_names(store)
        .await?
        .into_iter()
        .filter(|name| name.ends_with(".json"))
        .collect();
    sort_pages(&mut names);

    tracing::info!("Found {} page files in {}", names.len(), location);

    let mut extraction = LinkExtraction::default();
    for name in names {
        match read_page_links(store, location, &name).await {
            Ok(links) => {
                tracing::debug!("{}: {} links", name, links.len());
                extraction.pages.push(PageLinks { name, links });
            }
            Err(e) => {
                tracing::error!("Skipping page {}: {}", name, e);
                extraction.failed.push(UnitFailure::from_error(&name, &e));
            }
        }
    }

    tracing::info!(
        "Extracted {} links from {} pages ({} failed)",
        extraction.pages.iter().map(|p| p.links.len()).sum::<usize>(),
        extraction.pages.len(),
        extraction.failed.len()
    );
    Ok(extraction)
}
