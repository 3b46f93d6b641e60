use super::{LinkMessage, PageRequest, QueueEvent};
use crate::fetch::fetch_json;
use crate::output::format_success_rate;
use crate::pipeline::chunks::{fan_out, split_chunks, QueueSink};
use crate::pipeline::details::fetch_details;
use crate::pipeline::links::extract_links;
use crate::pipeline::pages::page_key;
use crate::pipeline::{ListingLink, Pipeline};
use crate::queue::OutgoingMessage;
use crate::runner::{BatchRunner, WorkUnit};
use crate::EtlError;
use chrono::Utc;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::ops::RangeInclusive;

/// Enqueues one page request per page index
///
/// # Returns
///
/// `{sent_messages, failed_messages, total_pages, success_rate}`
pub async fn handle_page_requests(
    pipeline: &Pipeline,
    range: RangeInclusive<u32>,
) -> Result<Value, EtlError> {
    let queue = pipeline.queue()?;
    let batch_size = NonZeroUsize::new(pipeline.config.queue.batch_size)
        .unwrap_or(NonZeroUsize::MIN);

    let timestamp = Utc::now().to_rfc3339();
    let requests: Vec<PageRequest> = range
        .map(|page| PageRequest {
            page: Some(json!(page)),
            url: Some(pipeline.config.page_url(page)),
            timestamp: Some(timestamp.clone()),
        })
        .collect();

    let mut sent = 0u64;
    let mut failed = 0u64;
    for batch in split_chunks(&requests, batch_size) {
        let mut entries = Vec::with_capacity(batch.len());
        for (i, request) in batch.iter().enumerate() {
            entries.push(OutgoingMessage::new(i.to_string(), serde_json::to_string(request)?));
        }

        match queue.send_batch(entries).await {
            Ok(result) => {
                sent += result.successful.len() as u64;
                failed += result.failed.len() as u64;
            }
            Err(e) => {
                tracing::error!("Failed to send batch of {} page requests: {}", batch.len(), e);
                failed += batch.len() as u64;
            }
        }
    }

    tracing::info!("Sent {} page requests ({} failed)", sent, failed);
    Ok(json!({
        "message": format!("Sent {} page requests to the queue", sent),
        "sent_messages": sent,
        "failed_messages": failed,
        "total_pages": requests.len(),
        "success_rate": format_success_rate(sent, failed),
    }))
}

/// Name a page request is stored under: its `page`, else the URL's `page` query
/// parameter, else `unknown`
fn page_label(request: &PageRequest, url: &str) -> String {
    let explicit = request.page.as_ref().and_then(|page| match page {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    });

    explicit
        .or_else(|| {
            url::Url::parse(url).ok().and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "page")
                    .map(|(_, v)| v.into_owned())
            })
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fetches and stores every page named in the event
///
/// # Returns
///
/// `{processed_messages, successful_downloads, failed_downloads, success_rate}`
pub async fn handle_page_event(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    event: &QueueEvent,
) -> Result<Value, EtlError> {
    let location = pipeline.config.pages_location()?;

    let mut units = Vec::new();
    let mut rejected = 0u64;
    for record in &event.records {
        let request: PageRequest = match serde_json::from_str(&record.body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Message {} has a malformed body: {}", record.message_id, e);
                rejected += 1;
                continue;
            }
        };
        let Some(url) = request.url.clone().filter(|u| !u.is_empty()) else {
            tracing::warn!("No URL found in message {}", record.message_id);
            continue;
        };
        let name = page_key(page_label(&request, &url));
        units.push(WorkUnit::new(record.message_id.clone(), (name, url)));
    }

    let processed = units.len() as u64;
    let shared = pipeline.clone();
    let report = runner
        .run("page messages", units, move |(name, url): (String, String)| {
            let pipeline = shared.clone();
            let location = location.clone();
            async move {
                let payload = fetch_json(&pipeline.client, &url, None).await?;
                location
                    .put(pipeline.store.as_ref(), &name, payload.raw)
                    .await?;
                Ok(name)
            }
        })
        .await;

    let successful = report.succeeded() as u64;
    let failed = report.failed() as u64 + rejected;
    Ok(json!({
        "message": format!("Processed {} queue messages", processed),
        "processed_messages": processed,
        "successful_downloads": successful,
        "failed_downloads": failed,
        "success_rate": format_success_rate(successful, failed),
    }))
}

/// Scans stored pages and enqueues one `{"link": url}` message per listing
///
/// # Returns
///
/// `{files_found, files_processed, files_failed, links_extracted, links_sent,
/// failed_sends, success_rate}`
pub async fn handle_link_scan(pipeline: &Pipeline) -> Result<Value, EtlError> {
    let queue = pipeline.queue()?;
    let location = pipeline.config.pages_location()?;

    let extraction = extract_links(pipeline.store.as_ref(), &location).await?;
    if extraction.files_found() == 0 {
        return Ok(json!({
            "message": format!("No JSON files found in {}", location),
            "files_found": 0,
            "files_processed": 0,
            "files_failed": 0,
            "links_extracted": 0,
            "links_sent": 0,
            "failed_sends": 0,
            "success_rate": "0%",
        }));
    }

    let links = extraction.links();
    let sink = QueueSink::new(queue);
    let report = fan_out(&links, pipeline.config.queue.batch_size, &sink).await?;

    Ok(json!({
        "message": format!(
            "Processed {} files ({} failed), extracted {} links, sent {} to the queue",
            extraction.pages.len(),
            extraction.failed.len(),
            links.len(),
            report.sent
        ),
        "files_found": extraction.files_found(),
        "files_processed": extraction.pages.len(),
        "files_failed": extraction.failed.len(),
        "links_extracted": links.len(),
        "links_sent": report.sent,
        "failed_sends": report.failed,
        "success_rate": format_success_rate(report.sent, report.failed),
    }))
}

/// Fetches and stores the detail of every link named in the event
///
/// A record whose body is neither `{"link": url}` nor a list of URLs counts as one
/// failure; it never stops the other records.
///
/// # Returns
///
/// `{processed, failed}`
pub async fn handle_detail_event(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    event: &QueueEvent,
) -> Result<Value, EtlError> {
    pipeline.config.details_location()?;

    let mut links = Vec::new();
    let mut rejected = 0u64;
    for record in &event.records {
        match serde_json::from_str::<LinkMessage>(&record.body) {
            Ok(message) => links.extend(message.into_links().into_iter().map(ListingLink::new)),
            Err(e) => {
                tracing::warn!("Message {} has a malformed body: {}", record.message_id, e);
                rejected += 1;
            }
        }
    }

    let report = fetch_details(pipeline, runner, "detail messages", links).await?;
    Ok(json!({
        "processed": report.succeeded(),
        "failed": report.failed() as u64 + rejected,
    }))
}
