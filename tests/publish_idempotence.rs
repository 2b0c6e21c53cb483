//! Re-publishing stored records must converge on the same catalog state.

use std::sync::Arc;
use std::time::Duration;

use govharvest::catalog::{EntityState, InMemoryCatalog, PublishOptions, Publisher};
use govharvest::config::PortalConfig;
use govharvest::models::DatasetRecord;
use govharvest::pipeline::{Harvester, UnitMode};
use govharvest::store::RecordStore;

fn record(title: &str) -> DatasetRecord {
    let mut record = DatasetRecord::new(
        "https://data.egov.kz/datasets/view?index=schools",
        "A1",
        title,
    );
    record.owner_organization_name = "Акимат города Алматы".to_string();
    record.set_keywords(vec!["школы".to_string(), "[образование]".to_string()]);
    record.data_link = Some("https://data.egov.kz/api/v4/schools/v1".to_string());
    record
}

async fn stored(store: &RecordStore, title: &str) {
    let mut record = record(title);
    let path = store
        .save_data(&record.agency_id, &record.file_stem(), b"[{\"id\": 1}]".to_vec())
        .await
        .unwrap();
    record.data_file = Some(path);
    store.save(&record).await.unwrap();
}

fn harvester(store: RecordStore, catalog: &Arc<InMemoryCatalog>) -> Harvester {
    let publisher = Arc::new(Publisher::new(catalog.clone(), PublishOptions::default()));
    Harvester::new(store, PortalConfig::default()).with_publisher(publisher, Duration::from_secs(30))
}

#[tokio::test]
async fn publishing_twice_creates_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    stored(&store, "Перечень школ").await;

    let catalog = Arc::new(InMemoryCatalog::new());
    let harvester = harvester(store, &catalog);

    let first = harvester.publish_agency("A1").await.unwrap();
    assert_eq!(first.created, 1);
    assert_eq!(first.resources_created, 1);

    let second = harvester.publish_agency("A1").await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.resources_created, 0);
    assert_eq!(second.resources_updated, 1);

    assert_eq!(catalog.organizations().len(), 1);
    let datasets = catalog.datasets();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].resources.len(), 1);
    assert_eq!(catalog.call_count("organization_create"), 1);
}

#[tokio::test]
async fn deleted_dataset_is_recreated_under_the_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    stored(&store, "Перечень школ").await;

    let catalog = Arc::new(InMemoryCatalog::new());
    let harvester = harvester(store, &catalog);
    harvester.publish_agency("A1").await.unwrap();
    let original = catalog.datasets()[0].name.clone();

    assert!(catalog.soft_delete_dataset(&original));
    let stats = harvester.publish_agency("A1").await.unwrap();
    assert_eq!(stats.recreated, 1);

    let datasets = catalog.datasets();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].name, original);
    assert_eq!(datasets[0].state, EntityState::Active);
    assert_eq!(catalog.call_count("dataset_purge"), 1);
}

#[tokio::test]
async fn unknown_remote_state_fails_only_that_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    stored(&store, "Больницы").await;
    stored(&store, "Перечень школ").await;

    let catalog = Arc::new(InMemoryCatalog::new());
    let harvester = harvester(store, &catalog);
    harvester.publish_agency("A1").await.unwrap();

    let names: Vec<String> = catalog.datasets().into_iter().map(|d| d.name).collect();
    catalog.fail_package_show(&names[0]);
    let creates_before = catalog.call_count("package_create");

    let stats = harvester.publish_agency("A1").await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(catalog.call_count("package_create"), creates_before);
    assert_eq!(catalog.datasets().len(), 2);
}

#[tokio::test]
async fn publish_unit_reports_stats() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    stored(&store, "Перечень школ").await;

    let catalog = Arc::new(InMemoryCatalog::new());
    let report = harvester(store, &catalog)
        .run_unit("A1", UnitMode::Publish)
        .await
        .unwrap();

    assert!(report.crawl.is_none());
    let stats = report.publish.unwrap();
    assert_eq!(stats.created, 1);
}

#[tokio::test]
async fn purge_removes_every_dataset_of_the_organization() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    stored(&store, "Больницы").await;
    stored(&store, "Перечень школ").await;

    let catalog = Arc::new(InMemoryCatalog::new());
    harvester(store, &catalog).publish_agency("A1").await.unwrap();
    assert_eq!(catalog.datasets().len(), 2);

    let publisher = Publisher::new(catalog.clone(), PublishOptions::default());
    let report = publisher
        .purge_organization("Акимат города Алматы")
        .await
        .unwrap();
    assert_eq!(report.found, 2);
    assert_eq!(report.purged, 2);
    assert_eq!(report.failed, 0);
    assert!(catalog.datasets().is_empty());
}

#[tokio::test]
async fn placeholder_records_are_stored_but_not_published() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    stored(&store, "Перечень школ").await;
    let placeholder =
        DatasetRecord::placeholder("https://data.egov.kz/datasets/view?index=broken", "A1");
    store.save(&placeholder).await.unwrap();
    assert_eq!(store.load_agency("A1").await.unwrap().len(), 2);

    let catalog = Arc::new(InMemoryCatalog::new());
    let stats = harvester(store, &catalog).publish_agency("A1").await.unwrap();

    assert_eq!(stats.created, 1);
    assert_eq!(stats.placeholders, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(catalog.datasets().len(), 1);
    assert_eq!(catalog.call_count("package_create"), 1);
}
