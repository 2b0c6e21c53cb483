//! End-to-end crawl behavior against a scripted portal.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use govharvest::browser::SessionPool;
use govharvest::catalog::{DatasetAction, InMemoryCatalog, PublishOptions, Publisher, ResourceAction};
use govharvest::challenge::ChallengeHandler;
use govharvest::crawler::{CrawlConfig, CrawlState, Crawler};
use govharvest::extract::Extractor;
use govharvest::models::ListingQuery;
use govharvest::reference::{Agency, ReferenceIndex};

use common::{
    dataset_html, listing_html, portal, Responder, ScriptedFactory, VecSink, PAGE_ERROR, PORTAL,
};

struct Harness {
    factory: Arc<ScriptedFactory>,
    pool: Arc<SessionPool>,
    crawler: Crawler,
}

fn harness(responder: Responder, config: CrawlConfig) -> Harness {
    let factory = Arc::new(ScriptedFactory::new(responder));
    let pool = Arc::new(SessionPool::new(factory.clone(), 1));
    let challenges = Arc::new(ChallengeHandler::new(None));
    let references = Arc::new(ReferenceIndex::from_agencies(vec![Agency {
        id: "A1".to_string(),
        name: Some("Министерство просвещения".to_string()),
        category: "central".to_string(),
    }]));
    let extractor = Arc::new(Extractor::new(challenges.clone(), references));
    let crawler = Crawler::new(pool.clone(), challenges, extractor, config, PORTAL);
    Harness {
        factory,
        pool,
        crawler,
    }
}

#[tokio::test(start_paused = true)]
async fn crawls_until_empty_page_and_publishes() {
    let h = harness(portal(vec![vec!["x1", "x2"], vec!["x3"]]), CrawlConfig::default());
    let mut session = h.pool.acquire().await.unwrap();
    let mut sink = VecSink::default();

    let report = h
        .crawler
        .crawl(&mut session, &ListingQuery::for_agency("A1"), &mut sink)
        .await;
    h.pool.release(session).await;

    assert_eq!(
        report.trace,
        vec![
            CrawlState::FetchingPage(1),
            CrawlState::ExtractingItems(1),
            CrawlState::AdvancingPage(1),
            CrawlState::FetchingPage(2),
            CrawlState::ExtractingItems(2),
            CrawlState::AdvancingPage(2),
            CrawlState::FetchingPage(3),
            CrawlState::ExtractingItems(3),
            CrawlState::Done(3),
        ]
    );
    assert!(report.is_done());
    assert_eq!(report.pages, 3);
    assert_eq!(report.records, 3);
    assert_eq!(report.item_failures, 0);
    assert!(report.backoffs.is_empty());

    let titles: Vec<&str> = sink.records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Набор x1", "Набор x2", "Набор x3"]);
    let first = &sink.records[0];
    assert_eq!(first.owner_organization_name, "Министерство просвещения");
    assert_eq!(first.keywords, vec!["образование", "x1"]);
    assert_eq!(
        first.data_link.as_deref(),
        Some("https://data.egov.kz/api/v4/x1/v1")
    );

    let catalog = Arc::new(InMemoryCatalog::new());
    let publisher = Publisher::new(catalog.clone(), PublishOptions::default());
    for record in &sink.records {
        let published = publisher.publish_record(record).await.unwrap();
        assert_eq!(published.action, DatasetAction::Created);
        assert_eq!(published.resource, ResourceAction::Created);
    }

    let datasets = catalog.datasets();
    assert_eq!(datasets.len(), 3);
    assert!(datasets.iter().all(|d| d.resources.len() == 1));
    let owners: HashSet<_> = datasets.iter().map(|d| d.owner_org.clone()).collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(catalog.call_count("organization_create"), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_page_is_abandoned_after_three_attempts() {
    let responder: Responder = Arc::new(|url: &str| Err(format!("net::ERR_TIMED_OUT {}", url)));
    let h = harness(responder, CrawlConfig::default());
    let mut session = h.pool.acquire().await.unwrap();
    let mut sink = VecSink::default();

    let started = tokio::time::Instant::now();
    let report = h
        .crawler
        .crawl(&mut session, &ListingQuery::for_agency("A1"), &mut sink)
        .await;

    assert_eq!(
        report.trace,
        vec![CrawlState::FetchingPage(1), CrawlState::Abandoned(1)]
    );
    assert!(report.is_abandoned());
    assert_eq!(
        report.backoffs,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8)
        ]
    );
    assert!(started.elapsed() >= Duration::from_secs(14));
    assert_eq!(report.records, 0);
    assert!(sink.records.is_empty());
    // One session up front plus a restart after every failed navigation.
    assert_eq!(h.factory.created(), 4);
}

#[tokio::test(start_paused = true)]
async fn transient_marker_is_retried() {
    let served = Arc::new(AtomicUsize::new(0));
    let listing = portal(vec![vec!["x1"]]);
    let responder: Responder = {
        let served = served.clone();
        Arc::new(move |url: &str| {
            if url.ends_with("page=1") && served.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok("<html><body><h1>502 Bad Gateway</h1></body></html>".to_string());
            }
            listing(url)
        })
    };
    let h = harness(responder, CrawlConfig::default());
    let mut session = h.pool.acquire().await.unwrap();
    let mut sink = VecSink::default();

    let report = h
        .crawler
        .crawl(&mut session, &ListingQuery::for_agency("A1"), &mut sink)
        .await;

    assert_eq!(report.backoffs, vec![Duration::from_secs(2)]);
    assert_eq!(report.outcome, CrawlState::Done(2));
    assert_eq!(report.records, 1);
}

#[tokio::test(start_paused = true)]
async fn failing_item_is_stored_as_placeholder() {
    let responder: Responder = Arc::new(|url: &str| {
        if url.contains("/datasets/search") {
            if url.ends_with("page=1") {
                return Ok(listing_html(&["x1", "broken", "x3"]));
            }
            return Ok(listing_html(&[]));
        }
        if url.ends_with("index=broken") {
            return Err("net::ERR_CONNECTION_RESET".to_string());
        }
        let index = url.rsplit('=').next().unwrap_or_default();
        Ok(dataset_html(index))
    });
    let h = harness(responder, CrawlConfig::default());
    let mut session = h.pool.acquire().await.unwrap();
    let mut sink = VecSink::default();

    let report = h
        .crawler
        .crawl(&mut session, &ListingQuery::for_agency("A1"), &mut sink)
        .await;

    assert!(report.is_done());
    assert_eq!(report.records, 2);
    assert_eq!(report.item_failures, 1);
    assert_eq!(sink.records.len(), 3);
    let failed = &sink.records[1];
    assert!(failed.is_placeholder());
    assert!(failed.source_url.ends_with("index=broken"));
    assert_eq!(failed.agency_id, "A1");
    assert!(!sink.records[0].is_placeholder());
    assert_eq!(sink.records[2].title, "Набор x3");
}

#[tokio::test(start_paused = true)]
async fn in_page_error_retries_without_restarting_the_session() {
    let served = Arc::new(AtomicUsize::new(0));
    let listing = portal(vec![vec!["x1"]]);
    let responder: Responder = {
        let served = served.clone();
        Arc::new(move |url: &str| {
            if url.ends_with("page=1") && served.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(format!("{} undefined is not a function", PAGE_ERROR));
            }
            listing(url)
        })
    };
    let h = harness(responder, CrawlConfig::default());
    let mut session = h.pool.acquire().await.unwrap();
    let mut sink = VecSink::default();

    let report = h
        .crawler
        .crawl(&mut session, &ListingQuery::for_agency("A1"), &mut sink)
        .await;

    assert_eq!(report.backoffs, vec![Duration::from_secs(2)]);
    assert!(report.is_done());
    assert_eq!(report.records, 1);
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn page_limit_stops_the_crawl() {
    let responder: Responder = Arc::new(|url: &str| {
        if url.contains("/datasets/search") {
            let page = url.rsplit("page=").next().unwrap_or("0");
            let index = format!("p{}", page);
            return Ok(listing_html(&[index.as_str()]));
        }
        let index = url.rsplit('=').next().unwrap_or_default();
        Ok(dataset_html(index))
    });
    let config = CrawlConfig {
        max_pages: Some(2),
        ..CrawlConfig::default()
    };
    let h = harness(responder, config);
    let mut session = h.pool.acquire().await.unwrap();
    let mut sink = VecSink::default();

    let report = h
        .crawler
        .crawl(&mut session, &ListingQuery::for_agency("A1"), &mut sink)
        .await;

    assert_eq!(report.outcome, CrawlState::Done(2));
    assert_eq!(report.pages, 2);
    assert_eq!(report.records, 2);
    let listing_visits = h
        .factory
        .visits()
        .iter()
        .filter(|u| u.contains("/datasets/search"))
        .count();
    assert_eq!(listing_visits, 2);
}
