//! Integration tests for the pipeline
//!
//! These tests use wiremock to create mock listing APIs and run the stages end-to-end
//! against in-memory and filesystem stores.

use listing_etl::config::{parse_config, Config};
use listing_etl::invoke::{self, handle_detail_event, handle_page_requests, DrainTarget, QueueEvent};
use listing_etl::pipeline::{
    extract_links, fan_out, flatten_details, list_pages, read_table, run_resumable, write_table,
    CsvChunkSink, ListingLink, PickOrder, Pipeline, QueueSink,
};
use listing_etl::queue::{MemoryQueue, MessageQueue};
use listing_etl::runner::BatchRunner;
use listing_etl::storage::{Ledger, SqliteLedger, Stage};
use listing_etl::store::{FsObjectStore, MemoryObjectStore, ObjectStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a configuration the same way the CLI does, from TOML text
fn create_test_config(base_url: &str, root: &str) -> Config {
    let text = format!(
        r#"
[http]
base-url = "{base_url}"
auth-token = "test-token"

[pages]
path-template = "/search/car?page={{page}}"
first = 1
last = 3

[details]
path-template = "/content/{{id}}"
timeout-secs = 1

[runner]
max-concurrency = 4

[storage]
root = "{root}"
bucket = "listings"

[queue]
batch-size = 10

[chunks]
size = 2

[output]
csv-path = "{root}/car_features.csv"
database-path = "{root}/ledger.db"
"#
    );
    parse_config(&text, |_| None).expect("valid test config")
}

fn detail_body(id: u32) -> String {
    json!({
        "data": {
            "ad_id": id,
            "subject": format!("Listing {}", id),
            "price": {"value": 100000 + id},
            "parameter_groups": [{"parameters": [{"id": "cx_make", "value": "Volvo"}]}]
        }
    })
    .to_string()
}

async fn mount_details(server: &MockServer, ids: &[u32]) {
    for id in ids {
        Mock::given(method("GET"))
            .and(path(format!("/content/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_body(*id)))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_page_lister_is_repeatable() {
    let server = MockServer::start().await;
    for page in [1, 2] {
        Mock::given(method("GET"))
            .and(path("/search/car"))
            .and(query_param("page", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"cars": [], "page": {}}}"#, page)),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/search/car"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::new(create_test_config(&server.uri(), "./unused"), store.clone())
        .expect("pipeline");
    let runner = BatchRunner::new(&pipeline.config.runner);

    let report = list_pages(&pipeline, &runner, 1..=3).await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);

    let first = store.get("listings", "pages/page_1.json").await.unwrap();
    assert_eq!(first, br#"{"cars": [], "page": 1}"#);
    assert!(!store.exists("listings", "pages/page_3.json").await.unwrap());

    // A second run overwrites with identical bytes
    let rerun = list_pages(&pipeline, &runner, 1..=3).await.unwrap();
    assert_eq!(rerun.succeeded(), 2);
    assert_eq!(store.get("listings", "pages/page_1.json").await.unwrap(), first);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_links_through_queue_to_details() {
    let server = MockServer::start().await;
    mount_details(&server, &[111]).await;
    Mock::given(method("GET"))
        .and(path("/content/222"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_body(222))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let pipeline = Pipeline::new(create_test_config(&server.uri(), "./unused"), store.clone())
        .expect("pipeline")
        .with_queue(queue.clone());
    let runner = BatchRunner::new(&pipeline.config.runner);

    for (page, id) in [(1, 111), (2, 222)] {
        let body = json!({"cars": [{"link": format!("https://www.example.se/annons/{}", id)}]});
        store
            .put("listings", &format!("pages/page_{}.json", page), body.to_string().into_bytes())
            .await
            .unwrap();
    }

    let location = pipeline.config.pages_location().unwrap();
    let extraction = extract_links(store.as_ref(), &location).await.unwrap();
    let links = extraction.links();
    assert_eq!(
        links,
        vec![
            ListingLink::from("https://www.example.se/annons/111"),
            ListingLink::from("https://www.example.se/annons/222"),
        ]
    );

    let fan = fan_out(&links, 1, &QueueSink::new(queue.clone())).await.unwrap();
    assert_eq!(fan.chunks, 2);
    assert_eq!(fan.sent, 2);

    let received = queue.receive(10).await.unwrap();
    assert_eq!(received.len(), 2);
    let body = handle_detail_event(&pipeline, &runner, &QueueEvent::from_messages(&received))
        .await
        .unwrap();

    assert_eq!(body, json!({"processed": 1, "failed": 1}));
    assert!(store.exists("listings", "details/111.json").await.unwrap());
    assert!(!store.exists("listings", "details/222.json").await.unwrap());
}

#[tokio::test]
async fn test_page_requests_drain_into_page_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/car"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"cars": []}"#))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let pipeline = Pipeline::new(create_test_config(&server.uri(), "./unused"), store.clone())
        .expect("pipeline")
        .with_queue(queue.clone());
    let runner = BatchRunner::new(&pipeline.config.runner);

    let summary = handle_page_requests(&pipeline, 1..=12).await.unwrap();
    assert_eq!(summary["sent_messages"], 12);

    let report = invoke::drain(&pipeline, &runner, DrainTarget::Page).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.messages, 12);
    assert_eq!(report.failed_invocations, 0);

    for page in 1..=12 {
        let key = format!("pages/page_{}.json", page);
        assert!(store.exists("listings", &key).await.unwrap(), "{} missing", key);
    }
}

#[tokio::test]
async fn test_resume_flatten_and_load_on_disk() {
    let server = MockServer::start().await;
    mount_details(&server, &[1, 2, 3, 4, 5]).await;

    let dir = TempDir::new().unwrap();
    let root = dir.path().to_string_lossy().to_string();
    let config = create_test_config(&server.uri(), &root);

    let store = Arc::new(FsObjectStore::new(&config.storage.root));
    let pipeline = Pipeline::new(config, store.clone()).expect("pipeline");
    let runner = BatchRunner::new(&pipeline.config.runner);

    let links: Vec<_> = (1..=5)
        .map(|id| ListingLink::new(format!("https://www.example.se/annons/{}", id)))
        .collect();
    let sink = CsvChunkSink::new(store.clone(), pipeline.config.chunks_location().unwrap());
    let fan = fan_out(&links, pipeline.config.chunks.size, &sink).await.unwrap();
    assert_eq!(fan.chunks, 3);

    let db_path = dir.path().join("ledger.db");
    {
        let mut ledger = SqliteLedger::new(&db_path).unwrap();
        let run_id = ledger.begin_run(Stage::Resume, "hash").unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let summary =
            run_resumable(&pipeline, &runner, &mut ledger, run_id, PickOrder::Random, &mut rng)
                .await
                .unwrap();
        assert_eq!(summary.processed_now.len(), 3);
        assert_eq!(summary.counts.succeeded, 5);
    }

    // The ProcessedSet survives a reopen
    let mut ledger = SqliteLedger::new(&db_path).unwrap();
    assert_eq!(ledger.processed_chunks().unwrap().len(), 3);

    let report = flatten_details(&pipeline, &runner).await.unwrap();
    assert_eq!(report.succeeded(), 5);

    let mut rows = report.successes;
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    let rows: Vec<_> = rows.into_iter().map(|(_, row)| row).collect();

    let csv_path = dir.path().join("car_features.csv");
    assert_eq!(write_table(&csv_path, &rows).unwrap(), 5);

    let table = read_table(&csv_path).unwrap();
    assert_eq!(table[0].ad_id.as_deref(), Some("1"));
    assert_eq!(table[0].brand.as_deref(), Some("Volvo"));
    assert_eq!(table[4].price, Some(100005));

    assert_eq!(ledger.replace_cars(&table).unwrap(), 5);
    assert_eq!(ledger.count_cars().unwrap(), 5);
}
