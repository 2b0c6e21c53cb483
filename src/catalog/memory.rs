//! In-process catalog with CKAN-like semantics.
//!
//! Names stay reserved while an entity is soft-deleted, so re-creating a
//! deleted dataset requires a purge first, as on a real CKAN instance.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CatalogApi, CatalogError, Dataset, EntityState, NewDataset, NewOrganization, Organization,
    Resource, ResourceUpload,
};

#[derive(Default)]
struct State {
    organizations: BTreeMap<String, Organization>,
    datasets: BTreeMap<String, Dataset>,
    next_id: u64,
    calls: Vec<String>,
    rejected_org_names: HashSet<String>,
    failing_shows: HashSet<String>,
    fail_purges: bool,
    rejected_titles: Option<fn(&str) -> bool>,
    page_cap: Option<usize>,
}

impl State {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", kind, self.next_id)
    }

    fn find_org(&self, id_or_name: &str) -> Option<&Organization> {
        self.organizations
            .get(id_or_name)
            .or_else(|| self.organizations.values().find(|o| o.id == id_or_name))
    }

    fn find_org_key(&self, id_or_name: &str) -> Option<String> {
        self.find_org(id_or_name).map(|o| o.name.clone())
    }

    fn find_dataset_key(&self, id_or_name: &str) -> Option<String> {
        if self.datasets.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.datasets
            .values()
            .find(|d| d.id == id_or_name)
            .map(|d| d.name.clone())
    }

    /// Effective page size: the caller's limit, bounded like a server cap.
    fn page_size(&self, requested: usize) -> usize {
        self.page_cap.map_or(requested, |cap| requested.min(cap))
    }

    fn find_resource_owner(&self, resource_id: &str) -> Option<String> {
        self.datasets
            .values()
            .find(|d| d.resources.iter().any(|r| r.id == resource_id))
            .map(|d| d.name.clone())
    }
}

fn valid_name(name: &str) -> bool {
    (2..=100).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn validation(action: &str, message: &str) -> CatalogError {
    CatalogError::Validation {
        action: action.to_string(),
        message: message.to_string(),
    }
}

fn resource_from(id: String, upload: &ResourceUpload) -> Resource {
    let url = match (&upload.file, &upload.url) {
        (Some(path), _) => format!(
            "upload://{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| upload.name.clone())
        ),
        (None, Some(url)) => url.clone(),
        (None, None) => String::new(),
    };
    Resource {
        id,
        name: upload.name.clone(),
        url,
        format: upload.format.clone(),
    }
}

/// Catalog held entirely in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, CatalogError> {
        self.state
            .lock()
            .map_err(|_| CatalogError::Other("in-memory catalog lock poisoned".to_string()))
    }

    fn record(&self, call: &str) -> Result<std::sync::MutexGuard<'_, State>, CatalogError> {
        let mut state = self.lock()?;
        state.calls.push(call.to_string());
        Ok(state)
    }

    /// Snapshot of all organizations, including deleted ones.
    pub fn organizations(&self) -> Vec<Organization> {
        self.lock()
            .map(|s| s.organizations.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of all datasets, including deleted ones.
    pub fn datasets(&self) -> Vec<Dataset> {
        self.lock()
            .map(|s| s.datasets.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Action names called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of calls to `action`.
    pub fn call_count(&self, action: &str) -> usize {
        self.calls().iter().filter(|c| *c == action).count()
    }

    /// Seed an existing organization.
    pub fn insert_organization(&self, name: &str, title: &str, state: EntityState) -> String {
        let Ok(mut s) = self.lock() else {
            return String::new();
        };
        let id = s.next_id("org");
        s.organizations.insert(
            name.to_string(),
            Organization {
                id: id.clone(),
                name: name.to_string(),
                title: title.to_string(),
                state,
            },
        );
        id
    }

    /// Mark an entity deleted without removing it.
    pub fn soft_delete_dataset(&self, id_or_name: &str) -> bool {
        let Ok(mut s) = self.lock() else {
            return false;
        };
        match s.find_dataset_key(id_or_name) {
            Some(key) => {
                if let Some(ds) = s.datasets.get_mut(&key) {
                    ds.state = EntityState::Deleted;
                }
                true
            }
            None => false,
        }
    }

    pub fn soft_delete_organization(&self, id_or_name: &str) -> bool {
        let Ok(mut s) = self.lock() else {
            return false;
        };
        match s.find_org_key(id_or_name) {
            Some(key) => {
                if let Some(org) = s.organizations.get_mut(&key) {
                    org.state = EntityState::Deleted;
                }
                true
            }
            None => false,
        }
    }

    /// Make `organization_create` reject this name.
    pub fn reject_organization_name(&self, name: &str) {
        if let Ok(mut s) = self.lock() {
            s.rejected_org_names.insert(name.to_string());
        }
    }

    /// Make `package_show` fail for this id.
    pub fn fail_package_show(&self, id: &str) {
        if let Ok(mut s) = self.lock() {
            s.failing_shows.insert(id.to_string());
        }
    }

    /// Make `organization_create` reject titles matching `rule`.
    pub fn reject_organization_titles(&self, rule: fn(&str) -> bool) {
        if let Ok(mut s) = self.lock() {
            s.rejected_titles = Some(rule);
        }
    }

    /// Cap list and search pages, like CKAN's server-side row limit.
    pub fn cap_pages(&self, cap: usize) {
        if let Ok(mut s) = self.lock() {
            s.page_cap = Some(cap);
        }
    }

    /// Force a dataset into `new_state`.
    pub fn set_dataset_state(&self, id_or_name: &str, new_state: EntityState) -> bool {
        let Ok(mut s) = self.lock() else {
            return false;
        };
        match s.find_dataset_key(id_or_name) {
            Some(key) => {
                if let Some(ds) = s.datasets.get_mut(&key) {
                    ds.state = new_state;
                }
                true
            }
            None => false,
        }
    }

    /// Make every `dataset_purge` fail.
    pub fn fail_purges(&self, fail: bool) {
        if let Ok(mut s) = self.lock() {
            s.fail_purges = fail;
        }
    }
}

#[async_trait]
impl CatalogApi for InMemoryCatalog {
    async fn organization_show(&self, id: &str) -> Result<Option<Organization>, CatalogError> {
        let state = self.record("organization_show")?;
        Ok(state.find_org(id).cloned())
    }

    async fn organization_list(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Organization>, CatalogError> {
        let state = self.record("organization_list")?;
        Ok(state
            .organizations
            .values()
            .filter(|o| o.state != EntityState::Deleted)
            .skip(offset)
            .take(state.page_size(limit))
            .cloned()
            .collect())
    }

    async fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<Organization, CatalogError> {
        let mut state = self.record("organization_create")?;
        if !valid_name(&organization.name) {
            return Err(validation(
                "organization_create",
                "name: Must be purely lowercase alphanumeric (ascii) characters and these symbols: -_",
            ));
        }
        if state.rejected_org_names.contains(&organization.name) {
            return Err(validation("organization_create", "name: rejected"));
        }
        if state
            .rejected_titles
            .is_some_and(|rejects| rejects(&organization.title))
        {
            return Err(validation("organization_create", "title: rejected"));
        }
        if state.organizations.contains_key(&organization.name) {
            return Err(validation(
                "organization_create",
                "name: Group name already exists in database",
            ));
        }
        let org = Organization {
            id: state.next_id("org"),
            name: organization.name.clone(),
            title: organization.title.clone(),
            state: organization.state,
        };
        state
            .organizations
            .insert(organization.name.clone(), org.clone());
        Ok(org)
    }

    async fn organization_patch_state(
        &self,
        id: &str,
        new_state: EntityState,
    ) -> Result<Organization, CatalogError> {
        let mut state = self.record("organization_patch")?;
        let key = state
            .find_org_key(id)
            .ok_or_else(|| CatalogError::NotFound {
                action: "organization_patch".to_string(),
            })?;
        let org = state
            .organizations
            .get_mut(&key)
            .ok_or_else(|| CatalogError::NotFound {
                action: "organization_patch".to_string(),
            })?;
        org.state = new_state;
        Ok(org.clone())
    }

    async fn package_show(&self, id: &str) -> Result<Option<Dataset>, CatalogError> {
        let state = self.record("package_show")?;
        if state.failing_shows.contains(id) {
            return Err(CatalogError::Api {
                action: "package_show".to_string(),
                status: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(state
            .find_dataset_key(id)
            .and_then(|key| state.datasets.get(&key).cloned()))
    }

    async fn package_create(&self, dataset: &NewDataset) -> Result<Dataset, CatalogError> {
        let mut state = self.record("package_create")?;
        if !valid_name(&dataset.name) {
            return Err(validation("package_create", "name: Must be purely lowercase alphanumeric (ascii) characters and these symbols: -_"));
        }
        if state.datasets.contains_key(&dataset.name) {
            return Err(validation("package_create", "name: That URL is already in use."));
        }
        if state.find_org(&dataset.owner_org).is_none() {
            return Err(validation("package_create", "owner_org: Organization does not exist"));
        }
        let created = Dataset {
            id: state.next_id("ds"),
            name: dataset.name.clone(),
            title: dataset.title.clone(),
            owner_org: Some(dataset.owner_org.clone()),
            state: dataset.state,
            resources: Vec::new(),
        };
        state.datasets.insert(dataset.name.clone(), created.clone());
        Ok(created)
    }

    async fn dataset_purge(&self, id: &str) -> Result<(), CatalogError> {
        let mut state = self.record("dataset_purge")?;
        if state.fail_purges {
            return Err(CatalogError::Api {
                action: "dataset_purge".to_string(),
                status: 403,
                message: "Authorization Error".to_string(),
            });
        }
        let key = state
            .find_dataset_key(id)
            .ok_or_else(|| CatalogError::NotFound {
                action: "dataset_purge".to_string(),
            })?;
        state.datasets.remove(&key);
        Ok(())
    }

    async fn package_search_by_org(
        &self,
        org_id: &str,
        start: usize,
        rows: usize,
    ) -> Result<Vec<Dataset>, CatalogError> {
        let state = self.record("package_search")?;
        Ok(state
            .datasets
            .values()
            .filter(|d| d.owner_org.as_deref() == Some(org_id) && d.state == EntityState::Active)
            .skip(start)
            .take(state.page_size(rows))
            .cloned()
            .collect())
    }

    async fn resource_create(&self, resource: &ResourceUpload) -> Result<Resource, CatalogError> {
        let mut state = self.record("resource_create")?;
        let key = state
            .find_dataset_key(&resource.package_id)
            .ok_or_else(|| CatalogError::NotFound {
                action: "resource_create".to_string(),
            })?;
        let created = resource_from(state.next_id("res"), resource);
        if let Some(ds) = state.datasets.get_mut(&key) {
            ds.resources.push(created.clone());
        }
        Ok(created)
    }

    async fn resource_update(
        &self,
        id: &str,
        resource: &ResourceUpload,
    ) -> Result<Resource, CatalogError> {
        let mut state = self.record("resource_update")?;
        let key = state
            .find_resource_owner(id)
            .ok_or_else(|| CatalogError::NotFound {
                action: "resource_update".to_string(),
            })?;
        let updated = resource_from(id.to_string(), resource);
        if let Some(ds) = state.datasets.get_mut(&key) {
            for existing in ds.resources.iter_mut().filter(|r| r.id == id) {
                *existing = updated.clone();
            }
        }
        Ok(updated)
    }
}
