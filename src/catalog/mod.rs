//! CKAN catalog publishing.
//!
//! [`CatalogApi`] is the seam to the remote catalog: [`CkanClient`] talks
//! to a real CKAN action API and [`InMemoryCatalog`] keeps everything in
//! process for dry runs and tests. [`Publisher`] implements idempotent
//! organization resolution and dataset reconciliation on top of it.

mod ckan;
mod error;
mod memory;
mod publisher;
pub mod slug;
pub mod tags;

pub use ckan::CkanClient;
pub use error::CatalogError;
pub use memory::InMemoryCatalog;
pub use publisher::{
    DatasetAction, OrganizationCategory, PublishOptions, PublishReport, PublishStats, Publisher,
    PurgeReport, ResourceAction,
};

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a CKAN organization or dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    #[default]
    Active,
    Deleted,
    Draft,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: EntityState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner_org: Option<String>,
    #[serde(default)]
    pub state: EntityState,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Remote state of a dataset id before publishing.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetState {
    NotFound,
    Active(Dataset),
    Deleted(Dataset),
    /// The state query failed, or the dataset is in a state (draft or
    /// unrecognized) the publisher does not reconcile.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOrganization {
    pub name: String,
    pub title: String,
    pub description: String,
    pub state: EntityState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extra {
    pub key: String,
    pub value: String,
}

/// `package_create` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDataset {
    pub name: String,
    pub title: String,
    pub owner_org: String,
    pub author: String,
    pub author_email: String,
    pub notes: String,
    pub tags: Vec<Tag>,
    pub license_id: String,
    pub state: EntityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<Extra>,
}

/// Resource to create or update: a file upload when `file` is set,
/// otherwise a link to `url`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUpload {
    pub package_id: String,
    pub name: String,
    pub description: String,
    pub format: String,
    pub url: Option<String>,
    pub file: Option<PathBuf>,
}

/// Remote catalog operations used by the publisher.
///
/// `*_show` calls return `Ok(None)` for missing entities; deleted entities
/// are returned with their state so callers can reconcile them.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn organization_show(&self, id: &str) -> Result<Option<Organization>, CatalogError>;

    /// One page of organizations with titles, in a stable order. The
    /// server may return fewer than `limit`; an empty page ends the listing.
    async fn organization_list(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Organization>, CatalogError>;

    async fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<Organization, CatalogError>;

    async fn organization_patch_state(
        &self,
        id: &str,
        state: EntityState,
    ) -> Result<Organization, CatalogError>;

    async fn package_show(&self, id: &str) -> Result<Option<Dataset>, CatalogError>;

    async fn package_create(&self, dataset: &NewDataset) -> Result<Dataset, CatalogError>;

    async fn dataset_purge(&self, id: &str) -> Result<(), CatalogError>;

    /// One page of the active datasets owned by an organization. The
    /// server may return fewer than `rows`; an empty page ends the listing.
    async fn package_search_by_org(
        &self,
        org_id: &str,
        start: usize,
        rows: usize,
    ) -> Result<Vec<Dataset>, CatalogError>;

    async fn resource_create(&self, resource: &ResourceUpload) -> Result<Resource, CatalogError>;

    async fn resource_update(
        &self,
        id: &str,
        resource: &ResourceUpload,
    ) -> Result<Resource, CatalogError>;
}
