//! Dataset metadata extraction.
//!
//! [`Extractor::extract`] turns a dataset reference into a
//! [`DatasetRecord`]. Page fields come from a [`FieldTable`] of fallback
//! locators. When the page links to a meta JSON document it is fetched to
//! enrich the record; if that fetch fails the loaded page is read again
//! instead. Extraction never fails: any error yields a placeholder record.

mod locators;
mod meta;

pub use locators::{split_list, single_line, Field, FieldTable, Locator, PageFields};
pub use meta::{MetaDocument, MetaFetcher};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::browser::{Session, SessionError};
use crate::challenge::ChallengeHandler;
use crate::models::{DatasetRecord, DatasetReference, MetadataSource};
use crate::reference::ReferenceIndex;

pub struct Extractor {
    table: FieldTable,
    challenges: Arc<ChallengeHandler>,
    references: Arc<ReferenceIndex>,
    meta: Option<Arc<dyn MetaFetcher>>,
}

impl Extractor {
    pub fn new(challenges: Arc<ChallengeHandler>, references: Arc<ReferenceIndex>) -> Self {
        Self {
            table: FieldTable::default(),
            challenges,
            references,
            meta: None,
        }
    }

    /// Fetch meta JSON documents with `fetcher`.
    pub fn with_meta_fetcher(mut self, fetcher: Arc<dyn MetaFetcher>) -> Self {
        self.meta = Some(fetcher);
        self
    }

    pub fn with_table(mut self, table: FieldTable) -> Self {
        self.table = table;
        self
    }

    /// Extract a record for `reference`. Returns a placeholder on failure.
    pub async fn extract(
        &self,
        session: &mut dyn Session,
        reference: &DatasetReference,
        agency_id: &str,
    ) -> DatasetRecord {
        match self.try_extract(session, reference, agency_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Extraction failed for {}: {}", reference.url, e);
                DatasetRecord::placeholder(&reference.url, agency_id)
            }
        }
    }

    async fn try_extract(
        &self,
        session: &mut dyn Session,
        reference: &DatasetReference,
        agency_id: &str,
    ) -> Result<DatasetRecord, SessionError> {
        session.navigate(&reference.url).await?;
        self.challenges.resolve_if_present(session).await;

        let html = session.content().await?;
        let fields = self.table.apply(&html, &reference.url);
        let mut record = self.record_from_page(&fields, reference, agency_id);

        if let (Some(meta_link), Some(fetcher)) = (record.meta_link.clone(), self.meta.as_ref()) {
            match fetcher.fetch_meta(&meta_link).await {
                Ok(value) => {
                    apply_meta(&mut record, &MetaDocument::parse(&value));
                    debug!("Enriched {} from meta document", reference.url);
                }
                Err(e) => {
                    warn!(
                        "Meta document {} unavailable ({}), re-reading page",
                        meta_link, e
                    );
                    let html = session.content().await?;
                    let fields = self.table.apply(&html, &reference.url);
                    record = self.record_from_page(&fields, reference, agency_id);
                }
            }
        }

        Ok(record)
    }

    fn record_from_page(
        &self,
        fields: &PageFields,
        reference: &DatasetReference,
        agency_id: &str,
    ) -> DatasetRecord {
        let title = fields.title.as_deref().map(single_line).unwrap_or_default();
        let mut record = DatasetRecord::new(&reference.url, agency_id, &title);

        record.description = fields.description.clone().unwrap_or_default();
        record.set_keywords(fields.keywords.as_deref().map(split_list).unwrap_or_default());
        record.categories = fields
            .categories
            .as_deref()
            .map(split_list)
            .unwrap_or_default();
        record.owner_organization_name = fields
            .owner
            .as_deref()
            .map(single_line)
            .filter(|o| !o.is_empty())
            .or_else(|| self.references.agency_name(agency_id).map(str::to_string))
            .unwrap_or_default();
        record.data_link = fields.data_link.clone();
        record.meta_link = fields.meta_link.clone();
        record.metadata_source = MetadataSource::Page;
        record
    }
}

/// Overlay meta document fields onto a page-derived record.
fn apply_meta(record: &mut DatasetRecord, doc: &MetaDocument) {
    if let Some(ref title) = doc.title {
        record.set_title(title);
    }
    if let Some(ref description) = doc.description {
        record.description = description.clone();
    }
    if !doc.keywords.is_empty() {
        record.set_keywords(doc.keywords.clone());
    }
    if let Some(ref owner) = doc.owner {
        record.owner_organization_name = owner.clone();
    }
    record.author = doc.author.clone().or(record.author.take());
    record.author_email = doc.author_email.clone().or(record.author_email.take());
    record.metadata_source = MetadataSource::MetaLink;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::FetchError;
    use crate::reference::Agency;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    const PAGE: &str = r#"<html><body>
        <div id="versionName">Перечень школ</div>
        <div id="versionKeywordsBlock">школы, образование</div>
        <a href="/api/v4/schools/v1">data</a>
        <a href="/meta/schools/v1">meta</a>
    </body></html>"#;

    struct PageSession {
        html: String,
        fail_navigation: bool,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Session for PageSession {
        async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
            if self.fail_navigation {
                return Err(SessionError::Navigation {
                    url: url.to_string(),
                    message: "net::ERR_CONNECTION_RESET".to_string(),
                });
            }
            Ok(())
        }
        async fn content(&mut self) -> Result<String, SessionError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.html.clone())
        }
        async fn current_url(&mut self) -> Result<String, SessionError> {
            Ok("https://data.egov.kz/datasets/view?index=schools".to_string())
        }
        async fn click(&mut self, _selector: &str) -> Result<bool, SessionError> {
            Ok(false)
        }
        async fn evaluate(&mut self, _script: &str) -> Result<Value, SessionError> {
            Ok(Value::Null)
        }
        async fn probe(&mut self) -> bool {
            true
        }
        fn created_at(&self) -> Instant {
            Instant::now()
        }
        async fn close(&mut self) {}
    }

    struct StaticMeta(Option<Value>);

    #[async_trait]
    impl MetaFetcher for StaticMeta {
        async fn fetch_meta(&self, url: &str) -> Result<Value, FetchError> {
            assert_eq!(url, "https://data.egov.kz/meta/schools/v1");
            self.0.clone().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 403,
            })
        }
    }

    fn session(html: &str) -> (PageSession, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        (
            PageSession {
                html: html.to_string(),
                fail_navigation: false,
                reads: reads.clone(),
            },
            reads,
        )
    }

    fn extractor(meta: Option<Value>) -> Extractor {
        let challenges =
            Arc::new(ChallengeHandler::new(None).with_settle_delay(Duration::ZERO));
        let references = Arc::new(ReferenceIndex::from_agencies([Agency {
            id: "A1".to_string(),
            name: Some("Акимат города Алматы".to_string()),
            category: "local".to_string(),
        }]));
        Extractor::new(challenges, references).with_meta_fetcher(Arc::new(StaticMeta(meta)))
    }

    fn reference() -> DatasetReference {
        DatasetReference::new("https://data.egov.kz/datasets/view?index=schools")
    }

    #[tokio::test]
    async fn page_fields_with_owner_fallback() {
        let (mut page, _) = session(PAGE);
        let extractor = Extractor::new(
            Arc::new(ChallengeHandler::new(None).with_settle_delay(Duration::ZERO)),
            extractor(None).references.clone(),
        );
        let record = extractor.extract(&mut page, &reference(), "A1").await;

        assert_eq!(record.title, "Перечень школ");
        assert_eq!(record.keywords, vec!["школы", "образование"]);
        assert_eq!(record.owner_organization_name, "Акимат города Алматы");
        assert_eq!(
            record.data_link.as_deref(),
            Some("https://data.egov.kz/api/v4/schools/v1")
        );
        assert_eq!(record.metadata_source, MetadataSource::Page);
    }

    #[tokio::test]
    async fn meta_document_enriches_record() {
        let (mut page, _) = session(PAGE);
        let meta = json!({
            "title": "Перечень школ (мета)",
            "descriptionRu": "Описание",
            "owner": {"fullnameRu": "Управление образования"},
            "responsible": {"fullnameRu": "Иванов", "email": "ivanov@example.kz"}
        });
        let record = extractor(Some(meta))
            .extract(&mut page, &reference(), "A1")
            .await;

        assert_eq!(record.title, "Перечень школ (мета)");
        assert_eq!(record.description, "Описание");
        assert_eq!(record.owner_organization_name, "Управление образования");
        assert_eq!(record.author_email.as_deref(), Some("ivanov@example.kz"));
        assert_eq!(record.keywords, vec!["школы", "образование"]);
        assert_eq!(record.metadata_source, MetadataSource::MetaLink);
    }

    #[tokio::test]
    async fn failed_meta_fetch_rereads_page() {
        let (mut page, reads) = session(PAGE);
        let record = extractor(None).extract(&mut page, &reference(), "A1").await;

        assert_eq!(record.title, "Перечень школ");
        assert_eq!(record.metadata_source, MetadataSource::Page);
        // Challenge check, first parse, re-read.
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn navigation_failure_yields_placeholder() {
        let (mut page, _) = session(PAGE);
        page.fail_navigation = true;
        let record = extractor(None).extract(&mut page, &reference(), "A1").await;

        assert!(record.is_placeholder());
        assert!(record.title.starts_with("dataset-"));
        assert_eq!(record.keywords, vec![crate::models::SENTINEL_KEYWORD]);
    }
}
