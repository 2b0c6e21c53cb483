//! Idempotent publishing of dataset records into the catalog.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::slug::{dataset_id, organization_slug, transliterate, DatasetId};
use super::tags::clean_keywords;
use super::{
    CatalogApi, CatalogError, Dataset, DatasetState, EntityState, Extra, NewDataset,
    NewOrganization, Organization, ResourceUpload, Tag,
};
use crate::models::DatasetRecord;

/// Government body kinds that have a shared parent organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationCategory {
    Ministry,
    Agency,
    Department,
    Bureau,
    Committee,
}

impl OrganizationCategory {
    /// Word stems checked in order; the first match wins.
    const STEMS: &'static [(&'static str, OrganizationCategory)] = &[
        ("мин", OrganizationCategory::Ministry),
        ("агент", OrganizationCategory::Agency),
        ("деп", OrganizationCategory::Department),
        ("бюро", OrganizationCategory::Bureau),
        ("комитет", OrganizationCategory::Committee),
    ];

    /// Detect the category from a Russian organization name.
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        Self::STEMS
            .iter()
            .find(|(stem, _)| words.iter().any(|w| w.starts_with(stem)))
            .map(|(_, category)| *category)
    }

    /// Name of the shared parent organization.
    pub fn parent_slug(self) -> &'static str {
        match self {
            OrganizationCategory::Ministry => "government_ministry",
            OrganizationCategory::Agency => "government_agency",
            OrganizationCategory::Department => "government_department",
            OrganizationCategory::Bureau => "government_bureau",
            OrganizationCategory::Committee => "government_committee",
        }
    }

    pub fn parent_title(self) -> &'static str {
        match self {
            OrganizationCategory::Ministry => "Government Ministry",
            OrganizationCategory::Agency => "Government Agency",
            OrganizationCategory::Department => "Government Department",
            OrganizationCategory::Bureau => "Government Bureau",
            OrganizationCategory::Committee => "Government Committee",
        }
    }
}

/// Publishing behaviour switches.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub license_id: String,
    /// Upload local data files; otherwise resources link to the data URL.
    pub upload_files: bool,
    /// Page size for `organization_list` and `package_search`.
    pub page_size: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            license_id: "cc-by".to_string(),
            upload_files: true,
            page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetAction {
    Created,
    /// Soft-deleted remotely; purged and created again under the same id.
    Recreated,
    /// Already active; metadata left untouched.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Created,
    Updated,
    /// No data file or link to attach.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReport {
    pub dataset_id: String,
    pub organization_id: String,
    pub action: DatasetAction,
    pub resource: ResourceAction,
    pub hashed_id: bool,
}

/// Counters aggregated over many publish calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub created: usize,
    pub recreated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub resources_created: usize,
    pub resources_updated: usize,
    /// Placeholder records left unpublished.
    pub placeholders: usize,
}

impl PublishStats {
    pub fn record(&mut self, result: &Result<PublishReport, CatalogError>) {
        let report = match result {
            Ok(report) => report,
            Err(_) => {
                self.failed += 1;
                return;
            }
        };
        match report.action {
            DatasetAction::Created => self.created += 1,
            DatasetAction::Recreated => self.recreated += 1,
            DatasetAction::Skipped => self.skipped += 1,
        }
        match report.resource {
            ResourceAction::Created => self.resources_created += 1,
            ResourceAction::Updated => self.resources_updated += 1,
            ResourceAction::None => {}
        }
    }

    pub fn merge(&mut self, other: &PublishStats) {
        self.created += other.created;
        self.recreated += other.recreated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.resources_created += other.resources_created;
        self.resources_updated += other.resources_updated;
        self.placeholders += other.placeholders;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub organization_id: String,
    pub found: usize,
    pub purged: usize,
    pub failed: usize,
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Maps records onto catalog organizations, datasets and resources.
pub struct Publisher {
    api: Arc<dyn CatalogApi>,
    options: PublishOptions,
    /// Resolved organization ids by lowercased display name. Held for the
    /// whole resolution so concurrent units never race on creation.
    organizations: Mutex<HashMap<String, String>>,
}

impl Publisher {
    pub fn new(api: Arc<dyn CatalogApi>, options: PublishOptions) -> Self {
        Self {
            api,
            options,
            organizations: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an organization id for `name`, creating it if needed.
    ///
    /// Resolution order: slug lookup (reactivating a soft-deleted match),
    /// exact title match, creation, creation with a transliterated title,
    /// and finally the shared parent organization for the name's category.
    pub async fn get_or_create_organization(&self, name: &str) -> Result<String, CatalogError> {
        let display = collapse_whitespace(name);
        if display.is_empty() {
            return Err(CatalogError::Other("Organization name is empty".to_string()));
        }

        let key = display.to_lowercase();
        let mut cache = self.organizations.lock().await;
        if let Some(id) = cache.get(&key) {
            return Ok(id.clone());
        }

        let id = self.resolve_organization(&display).await?;
        cache.insert(key, id.clone());
        Ok(id)
    }

    async fn resolve_organization(&self, name: &str) -> Result<String, CatalogError> {
        let slug = organization_slug(name);
        debug!("Resolving organization '{}' as {}", name, slug);

        if let Some(id) = self.active_by_slug(&slug).await {
            return Ok(id);
        }

        if let Some(org) = self.find_by_title(name).await {
            debug!("Organization found by title: {}", org.name);
            return Ok(org.id);
        }

        let title = truncate_chars(name, 200);
        match self.create_organization(&slug, &title, name).await {
            Ok(id) => return Ok(id),
            Err(e) => warn!("Could not create organization {}: {}", slug, e),
        }

        let translit_title = truncate_chars(&transliterate(name), 200);
        let translit_slug = organization_slug(&translit_title);
        match self
            .create_organization(&translit_slug, &translit_title, name)
            .await
        {
            Ok(id) => return Ok(id),
            Err(e) => warn!(
                "Could not create organization {} with transliterated title: {}",
                translit_slug, e
            ),
        }

        if let Some(category) = OrganizationCategory::detect(name) {
            warn!(
                "Using parent organization {} for '{}'",
                category.parent_slug(),
                name
            );
            return self.ensure_parent(category).await;
        }

        Err(CatalogError::Other(format!(
            "Could not create or retrieve organization: {}",
            name
        )))
    }

    /// Active organization under `slug`, reactivating it when soft-deleted.
    async fn active_by_slug(&self, slug: &str) -> Option<String> {
        let org = match self.api.organization_show(slug).await {
            Ok(Some(org)) => org,
            Ok(None) => return None,
            Err(e) => {
                warn!("organization_show {} failed: {}", slug, e);
                return None;
            }
        };

        if org.state != EntityState::Deleted {
            return Some(org.id);
        }

        info!("Reactivating deleted organization {}", slug);
        match self
            .api
            .organization_patch_state(&org.id, EntityState::Active)
            .await
        {
            Ok(patched) => Some(patched.id),
            Err(e) => {
                warn!("Could not reactivate organization {}: {}", slug, e);
                None
            }
        }
    }

    /// First non-deleted organization titled `title`, paging through
    /// `organization_list` until an empty page. The server may return fewer
    /// rows than asked for, so a short page is not taken as the last.
    async fn find_by_title(&self, title: &str) -> Option<Organization> {
        let limit = self.options.page_size.max(1);
        let mut offset = 0;
        loop {
            let page = match self.api.organization_list(offset, limit).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("organization_list failed at offset {}: {}", offset, e);
                    return None;
                }
            };
            if page.is_empty() {
                return None;
            }
            offset += page.len();
            if let Some(org) = page
                .into_iter()
                .find(|o| o.state != EntityState::Deleted && collapse_whitespace(&o.title) == title)
            {
                return Some(org);
            }
        }
    }

    async fn create_organization(
        &self,
        slug: &str,
        title: &str,
        name: &str,
    ) -> Result<String, CatalogError> {
        let request = NewOrganization {
            name: slug.to_string(),
            title: title.to_string(),
            description: format!("Government organization: {}", truncate_chars(name, 300)),
            state: EntityState::Active,
        };

        match self.api.organization_create(&request).await {
            Ok(org) => {
                info!("Created organization {}", org.name);
                Ok(org.id)
            }
            // Another writer may have created it since the lookup.
            Err(e) => match self.api.organization_show(slug).await {
                Ok(Some(org)) if org.state == EntityState::Active => Ok(org.id),
                _ => Err(e),
            },
        }
    }

    async fn ensure_parent(&self, category: OrganizationCategory) -> Result<String, CatalogError> {
        let slug = category.parent_slug();
        if let Some(id) = self.active_by_slug(slug).await {
            return Ok(id);
        }
        let request = NewOrganization {
            name: slug.to_string(),
            title: category.parent_title().to_string(),
            description: format!("Parent organization: {}", category.parent_title()),
            state: EntityState::Active,
        };
        let org = self.api.organization_create(&request).await?;
        info!("Created parent organization {}", org.name);
        Ok(org.id)
    }

    /// Classify the remote state of a dataset id.
    pub async fn dataset_state(&self, id: &str) -> DatasetState {
        match self.api.package_show(id).await {
            Ok(None) => DatasetState::NotFound,
            Ok(Some(ds)) => match ds.state {
                EntityState::Active => DatasetState::Active(ds),
                EntityState::Deleted => DatasetState::Deleted(ds),
                other => DatasetState::Unknown(format!("dataset is in state {:?}", other)),
            },
            Err(e) => DatasetState::Unknown(e.to_string()),
        }
    }

    /// Resolve the record's organization, then publish it.
    pub async fn publish_record(
        &self,
        record: &DatasetRecord,
    ) -> Result<PublishReport, CatalogError> {
        let org_id = self
            .get_or_create_organization(record.organization_name())
            .await?;
        self.publish(record, &org_id).await
    }

    /// Publish a record under `org_id` and reconcile its data resource.
    ///
    /// Active datasets are left as they are; soft-deleted ones are purged
    /// and created again with the same id. An unknown remote state fails
    /// the record without writing anything.
    pub async fn publish(
        &self,
        record: &DatasetRecord,
        org_id: &str,
    ) -> Result<PublishReport, CatalogError> {
        let DatasetId { id, hashed } = dataset_id(&record.agency_id, &record.file_stem());
        if hashed {
            warn!(
                "Dataset id {} for '{}' comes from the hash fallback and may collide",
                id, record.title
            );
        }

        let (action, dataset) = match self.dataset_state(&id).await {
            DatasetState::NotFound => {
                let dataset = self
                    .api
                    .package_create(&self.dataset_payload(&id, record, org_id))
                    .await?;
                info!("Created dataset {}", id);
                (DatasetAction::Created, dataset)
            }
            DatasetState::Active(dataset) => {
                debug!("Dataset {} already active", id);
                (DatasetAction::Skipped, dataset)
            }
            DatasetState::Deleted(_) => {
                info!("Dataset {} is deleted, purging before re-creating", id);
                self.api.dataset_purge(&id).await?;
                let dataset = self
                    .api
                    .package_create(&self.dataset_payload(&id, record, org_id))
                    .await?;
                (DatasetAction::Recreated, dataset)
            }
            DatasetState::Unknown(message) => {
                return Err(CatalogError::UnknownState { id, message });
            }
        };

        let resource = self.reconcile_resource(&dataset, record).await?;

        Ok(PublishReport {
            dataset_id: dataset.name,
            organization_id: org_id.to_string(),
            action,
            resource,
            hashed_id: hashed,
        })
    }

    fn dataset_payload(&self, id: &str, record: &DatasetRecord, org_id: &str) -> NewDataset {
        let author_email = record.author_email.clone().unwrap_or_default();
        let mut extras = Vec::new();
        if let Some(ref meta_link) = record.meta_link {
            extras.push(Extra {
                key: "Ссылка на мета данные".to_string(),
                value: meta_link.clone(),
            });
        }
        if !author_email.is_empty() {
            extras.push(Extra {
                key: "Author Email".to_string(),
                value: author_email.clone(),
            });
        }
        extras.push(Extra {
            key: "Источник".to_string(),
            value: record.source_url.clone(),
        });

        NewDataset {
            name: id.to_string(),
            title: truncate_chars(&record.title, 200),
            owner_org: org_id.to_string(),
            author: record.author.clone().unwrap_or_default(),
            author_email,
            notes: record.description.clone(),
            tags: clean_keywords(&record.keywords)
                .into_iter()
                .map(|name| Tag { name })
                .collect(),
            license_id: self.options.license_id.clone(),
            state: EntityState::Active,
            url: Some(
                record
                    .data_link
                    .clone()
                    .unwrap_or_else(|| record.source_url.clone()),
            ),
            extras,
        }
    }

    /// Attach the record's data to the dataset, updating a same-named
    /// resource in place instead of adding another.
    async fn reconcile_resource(
        &self,
        dataset: &Dataset,
        record: &DatasetRecord,
    ) -> Result<ResourceAction, CatalogError> {
        let file = match record.data_file {
            Some(ref path) if self.options.upload_files => {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    Some(path.clone())
                } else {
                    warn!("Data file {} is missing, linking instead", path.display());
                    None
                }
            }
            _ => None,
        };

        if file.is_none() && record.data_link.is_none() {
            return Ok(ResourceAction::None);
        }

        let format = file
            .as_ref()
            .and_then(|p| p.extension())
            .map(|e| e.to_string_lossy().to_uppercase())
            .unwrap_or_else(|| "JSON".to_string());

        let upload = ResourceUpload {
            package_id: dataset.id.clone(),
            name: resource_name(record),
            description: resource_description(record),
            format,
            url: record.data_link.clone(),
            file,
        };

        let wanted = upload.name.to_lowercase();
        match dataset
            .resources
            .iter()
            .find(|r| r.name.to_lowercase() == wanted)
        {
            Some(existing) => {
                self.api.resource_update(&existing.id, &upload).await?;
                debug!("Updated resource {} on {}", upload.name, dataset.name);
                Ok(ResourceAction::Updated)
            }
            None => {
                self.api.resource_create(&upload).await?;
                debug!("Created resource {} on {}", upload.name, dataset.name);
                Ok(ResourceAction::Created)
            }
        }
    }

    /// Look up an organization without creating or reactivating it.
    pub async fn find_organization(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, CatalogError> {
        let display = collapse_whitespace(name);
        if let Some(org) = self.api.organization_show(&organization_slug(&display)).await? {
            return Ok(Some(org));
        }
        Ok(self.find_by_title(&display).await)
    }

    /// Purge every dataset owned by the named organization.
    pub async fn purge_organization(&self, name: &str) -> Result<PurgeReport, CatalogError> {
        let org = self
            .find_organization(name)
            .await?
            .ok_or_else(|| CatalogError::NotFound {
                action: format!("organization '{}'", name),
            })?;

        let datasets = self.datasets_of(&org.id).await?;

        let mut report = PurgeReport {
            organization_id: org.id.clone(),
            found: datasets.len(),
            purged: 0,
            failed: 0,
        };

        for dataset in datasets {
            match self.api.dataset_purge(&dataset.id).await {
                Ok(()) => {
                    info!("Purged dataset {}", dataset.name);
                    report.purged += 1;
                }
                Err(e) => {
                    warn!("Failed to purge dataset {}: {}", dataset.name, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Every active dataset of an organization. All pages are read before
    /// anything is purged so deletions cannot shift later pages.
    async fn datasets_of(&self, org_id: &str) -> Result<Vec<Dataset>, CatalogError> {
        let rows = self.options.page_size.max(1);
        let mut datasets = Vec::new();
        loop {
            let page = self
                .api
                .package_search_by_org(org_id, datasets.len(), rows)
                .await?;
            if page.is_empty() {
                return Ok(datasets);
            }
            datasets.extend(page);
        }
    }
}

/// Stable resource name for a record's data.
fn resource_name(record: &DatasetRecord) -> String {
    format!("{}.json", record.file_stem())
}

fn resource_description(record: &DatasetRecord) -> String {
    let source = record.data_link.as_deref().unwrap_or(&record.source_url);
    let author = record.author.as_deref().unwrap_or("Unknown");
    let email = record.author_email.as_deref().unwrap_or("");
    truncate_chars(
        &format!("Источник: {}\nАвтор: {} ({})", source, author, email),
        200,
    )
}
