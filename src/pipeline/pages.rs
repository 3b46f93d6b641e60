use super::Pipeline;
use crate::fetch::fetch_json;
use crate::runner::{BatchReport, BatchRunner, WorkUnit};
use crate::store::Location;
use crate::EtlError;
use std::ops::RangeInclusive;

/// Object name of a stored search-result page
pub fn page_key(page: impl std::fmt::Display) -> String {
    format!("page_{}.json", page)
}

/// Fetches one page and stores the response body verbatim
///
/// # Arguments
///
/// * `pipeline` - Shared client, config and store
/// * `location` - Where pages are written
/// * `page` - Page index substituted into the page URL template
///
/// # Returns
///
/// The stored object name, e.g. `page_3.json`
pub async fn fetch_page(
    pipeline: &Pipeline,
    location: &Location,
    page: u32,
) -> Result<String, EtlError> {
    let url = pipeline.config.page_url(page);
    let payload = fetch_json(&pipeline.client, &url, None).await?;

    let name = page_key(page);
    location
        .put(pipeline.store.as_ref(), &name, payload.raw)
        .await?;
    tracing::debug!("Stored page {} as {}", page, location.key(&name));
    Ok(name)
}

/// Page Lister: fetches and stores every page in `range`
///
/// Re-running the same range overwrites each `page_{n}.json` in place.
pub async fn list_pages(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    range: RangeInclusive<u32>,
) -> Result<BatchReport<String>, EtlError> {
    let location = pipeline.config.pages_location()?;
    tracing::info!(
        "Listing pages {}..={} into {}",
        range.start(),
        range.end(),
        location
    );

    let units = range
        .map(|page| WorkUnit::new(page.to_string(), page))
        .collect();

    let shared = pipeline.clone();
    let report = runner
        .run("pages", units, move |page| {
            let pipeline = shared.clone();
            let location = location.clone();
            async move { fetch_page(&pipeline, &location, page).await }
        })
        .await;

    Ok(report)
}
