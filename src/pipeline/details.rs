use super::chunks::parse_chunk;
use super::links::ListingLink;
use super::Pipeline;
use crate::fetch::fetch_json;
use crate::runner::{BatchReport, BatchRunner, WorkUnit};
use crate::store::Location;
use crate::EtlError;
use std::time::Duration;

/// Object name of a stored listing detail
pub fn detail_key(listing_id: &str) -> String {
    format!("{}.json", listing_id)
}

/// Fetches one listing detail and stores the response body verbatim
///
/// # Returns
///
/// The listing identifier the detail was stored under
pub async fn fetch_detail(
    pipeline: &Pipeline,
    location: &Location,
    link: &ListingLink,
) -> Result<String, EtlError> {
    let id = link
        .listing_id()
        .ok_or_else(|| EtlError::malformed(link.as_str(), "no listing id in link"))?;

    let url = pipeline.config.detail_url(id);
    let timeout = Duration::from_secs(pipeline.config.details.timeout_secs);
    let payload = fetch_json(&pipeline.client, &url, Some(timeout)).await?;

    location
        .put(pipeline.store.as_ref(), &detail_key(id), payload.raw)
        .await?;
    Ok(id.to_string())
}

/// Detail Fetcher over a list of links
pub async fn fetch_details(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    label: &str,
    links: Vec<ListingLink>,
) -> Result<BatchReport<String>, EtlError> {
    let location = pipeline.config.details_location()?;

    let units = links
        .into_iter()
        .map(|link| {
            let id = link.listing_id().unwrap_or(link.as_str()).to_string();
            WorkUnit::new(id, link)
        })
        .collect();

    let shared = pipeline.clone();
    let report = runner
        .run(label, units, move |link| {
            let pipeline = shared.clone();
            let location = location.clone();
            async move { fetch_detail(&pipeline, &location, &link).await }
        })
        .await;

    Ok(report)
}

/// Reads the links of one chunk file from the chunks location
pub async fn read_chunk(pipeline: &Pipeline, chunk_name: &str) -> Result<Vec<ListingLink>, EtlError> {
    let location = pipeline.config.chunks_location()?;
    let body = location.get(pipeline.store.as_ref(), chunk_name).await?;
    parse_chunk(&body)
}

/// Detail Fetcher over every link of one chunk file
pub async fn fetch_chunk_details(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    chunk_name: &str,
) -> Result<BatchReport<String>, EtlError> {
    let links = read_chunk(pipeline, chunk_name).await?;
    tracing::info!("Processing {} with {} links", chunk_name, links.len());
    fetch_details(pipeline, runner, chunk_name, links).await
}
