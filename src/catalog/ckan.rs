//! HTTP client for the CKAN action API (`/api/3/action/<action>`).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    CatalogApi, CatalogError, Dataset, EntityState, NewDataset, NewOrganization, Organization,
    Resource, ResourceUpload,
};
use crate::config::CatalogConfig;
use crate::http_client::USER_AGENT;

/// CKAN response envelope.
#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    results: Vec<Dataset>,
}

/// Human-readable message from a CKAN `error` object.
///
/// Validation errors carry per-field lists instead of `message`.
fn error_message(error: Option<&Value>) -> String {
    let Some(error) = error else {
        return "Unknown error".to_string();
    };
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return message.to_string();
    }
    if let Some(fields) = error.as_object() {
        let parts: Vec<String> = fields
            .iter()
            .filter(|(k, _)| k.as_str() != "__type")
            .map(|(k, v)| match v {
                Value::Array(items) => {
                    let joined: Vec<String> = items
                        .iter()
                        .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                        .collect();
                    format!("{}: {}", k, joined.join("; "))
                }
                Value::String(s) => format!("{}: {}", k, s),
                other => format!("{}: {}", k, other),
            })
            .collect();
        if !parts.is_empty() {
            return parts.join(", ");
        }
    }
    error.to_string()
}

/// Map an action response to a result.
///
/// 200 with `success` yields `result`; 404 is [`CatalogError::NotFound`];
/// 409 is [`CatalogError::Validation`]; anything else is an API failure.
pub(crate) fn parse_action_response<T: DeserializeOwned>(
    action: &str,
    status: u16,
    body: &str,
) -> Result<T, CatalogError> {
    let envelope: Option<ActionEnvelope> = serde_json::from_str(body).ok();

    match (status, envelope) {
        (200, Some(envelope)) if envelope.success => {
            serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| {
                CatalogError::InvalidResponse {
                    action: action.to_string(),
                    message: e.to_string(),
                }
            })
        }
        (404, _) => Err(CatalogError::NotFound {
            action: action.to_string(),
        }),
        (409, envelope) => Err(CatalogError::Validation {
            action: action.to_string(),
            message: error_message(envelope.as_ref().and_then(|e| e.error.as_ref())),
        }),
        (200, None) => Err(CatalogError::InvalidResponse {
            action: action.to_string(),
            message: "response is not a CKAN action envelope".to_string(),
        }),
        (status, envelope) => Err(CatalogError::Api {
            action: action.to_string(),
            status,
            message: error_message(envelope.as_ref().and_then(|e| e.error.as_ref())),
        }),
    }
}

fn mime_for_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "csv" => "text/csv",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// CKAN action API client.
#[derive(Clone)]
pub struct CkanClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    upload_timeout: Duration,
}

impl CkanClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        upload_timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            upload_timeout,
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout),
            Duration::from_secs(config.upload_timeout),
        )
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{}", self.base_url, action)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.header(AUTHORIZATION, key),
            None => request,
        }
    }

    async fn finish<T: DeserializeOwned>(
        action: &str,
        response: Response,
    ) -> Result<T, CatalogError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("{} -> {}", action, status);
        parse_action_response(action, status, &body)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        action: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let request = self.authorize(self.client.get(self.action_url(action)).query(query));
        Self::finish(action, request.send().await?).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<T, CatalogError> {
        let request = self.authorize(self.client.post(self.action_url(action)).json(body));
        Self::finish(action, request.send().await?).await
    }

    async fn show<T: DeserializeOwned>(
        &self,
        action: &str,
        id: &str,
    ) -> Result<Option<T>, CatalogError> {
        match self.get(action, &[("id", id.to_string())]).await {
            Ok(entity) => Ok(Some(entity)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or update a resource by multipart upload of a local file.
    async fn upload(
        &self,
        action: &str,
        id: Option<&str>,
        resource: &ResourceUpload,
        path: &Path,
    ) -> Result<Resource, CatalogError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| resource.name.clone());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for_format(&resource.format))?;

        let mut form = Form::new()
            .text("package_id", resource.package_id.clone())
            .text("name", resource.name.clone())
            .text("description", resource.description.clone())
            .text("format", resource.format.clone())
            .part("upload", part);
        if let Some(id) = id {
            form = form.text("id", id.to_string());
        }

        let request = self.authorize(
            self.client
                .post(self.action_url(action))
                .timeout(self.upload_timeout)
                .multipart(form),
        );
        Self::finish(action, request.send().await?).await
    }

    fn link_payload(id: Option<&str>, resource: &ResourceUpload) -> Value {
        let mut payload = json!({
            "package_id": resource.package_id,
            "name": resource.name,
            "description": resource.description,
            "format": resource.format,
            "url": resource.url.clone().unwrap_or_default(),
        });
        if let Some(id) = id {
            payload["id"] = Value::String(id.to_string());
        }
        payload
    }
}

/// Query for one `organization_list` page. CKAN caps `limit` server-side
/// (1000 by default), so callers page with `offset`.
fn organization_list_query(offset: usize, limit: usize) -> Vec<(&'static str, String)> {
    vec![
        ("all_fields", "true".to_string()),
        ("sort", "name asc".to_string()),
        ("limit", limit.to_string()),
        ("offset", offset.to_string()),
    ]
}

fn package_search_query(org_id: &str, start: usize, rows: usize) -> Vec<(&'static str, String)> {
    vec![
        ("fq", format!("owner_org:\"{}\"", org_id)),
        ("sort", "name asc".to_string()),
        ("rows", rows.to_string()),
        ("start", start.to_string()),
        ("include_private", "true".to_string()),
    ]
}

#[async_trait]
impl CatalogApi for CkanClient {
    async fn organization_show(&self, id: &str) -> Result<Option<Organization>, CatalogError> {
        self.show("organization_show", id).await
    }

    async fn organization_list(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Organization>, CatalogError> {
        self.get("organization_list", &organization_list_query(offset, limit))
            .await
    }

    async fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<Organization, CatalogError> {
        self.post("organization_create", organization).await
    }

    async fn organization_patch_state(
        &self,
        id: &str,
        state: EntityState,
    ) -> Result<Organization, CatalogError> {
        self.post("organization_patch", &json!({ "id": id, "state": state }))
            .await
    }

    async fn package_show(&self, id: &str) -> Result<Option<Dataset>, CatalogError> {
        self.show("package_show", id).await
    }

    async fn package_create(&self, dataset: &NewDataset) -> Result<Dataset, CatalogError> {
        self.post("package_create", dataset).await
    }

    async fn dataset_purge(&self, id: &str) -> Result<(), CatalogError> {
        let _: Value = self.post("dataset_purge", &json!({ "id": id })).await?;
        Ok(())
    }

    async fn package_search_by_org(
        &self,
        org_id: &str,
        start: usize,
        rows: usize,
    ) -> Result<Vec<Dataset>, CatalogError> {
        let result: SearchResult = self
            .get("package_search", &package_search_query(org_id, start, rows))
            .await?;
        Ok(result.results)
    }

    async fn resource_create(&self, resource: &ResourceUpload) -> Result<Resource, CatalogError> {
        match resource.file {
            Some(ref path) => self.upload("resource_create", None, resource, path).await,
            None => {
                self.post("resource_create", &Self::link_payload(None, resource))
                    .await
            }
        }
    }

    async fn resource_update(
        &self,
        id: &str,
        resource: &ResourceUpload,
    ) -> Result<Resource, CatalogError> {
        match resource.file {
            Some(ref path) => {
                self.upload("resource_update", Some(id), resource, path)
                    .await
            }
            None => {
                self.post("resource_update", &Self::link_payload(Some(id), resource))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_yields_result() {
        let body = r#"{"success": true, "result": {"id": "1", "name": "org", "title": "Org", "state": "deleted"}}"#;
        let org: Organization = parse_action_response("organization_show", 200, body).unwrap();
        assert_eq!(org.name, "org");
        assert_eq!(org.state, EntityState::Deleted);
    }

    #[test]
    fn not_found_maps_to_error_kind() {
        let body = r#"{"success": false, "error": {"__type": "Not Found Error", "message": "Not found"}}"#;
        let err = parse_action_response::<Organization>("organization_show", 404, body).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn validation_error_lists_fields() {
        let body = r#"{"success": false, "error": {"__type": "Validation Error", "name": ["That URL is already in use."]}}"#;
        let err = parse_action_response::<Dataset>("package_create", 409, body).unwrap_err();
        match err {
            CatalogError::Validation { message, .. } => {
                assert_eq!(message, "name: That URL is already in use.")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn server_error_keeps_status() {
        let err = parse_action_response::<Dataset>("package_show", 502, "<html>Bad Gateway</html>")
            .unwrap_err();
        assert!(matches!(err, CatalogError::Api { status: 502, .. }));
    }

    #[test]
    fn non_envelope_success_is_invalid() {
        let err = parse_action_response::<Dataset>("package_show", 200, "ok").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidResponse { .. }));
    }

    #[test]
    fn unknown_state_strings_are_tolerated() {
        let body = r#"{"success": true, "result": {"id": "1", "name": "d", "state": "pending"}}"#;
        let ds: Dataset = parse_action_response("package_show", 200, body).unwrap();
        assert_eq!(ds.state, EntityState::Unrecognized);
        assert!(ds.resources.is_empty());
    }

    #[test]
    fn list_and_search_queries_carry_paging() {
        let list = organization_list_query(1000, 1000);
        assert!(list.contains(&("limit", "1000".to_string())));
        assert!(list.contains(&("offset", "1000".to_string())));

        let search = package_search_query("org-1", 2000, 1000);
        assert!(search.contains(&("fq", "owner_org:\"org-1\"".to_string())));
        assert!(search.contains(&("rows", "1000".to_string())));
        assert!(search.contains(&("start", "2000".to_string())));
    }

    #[test]
    fn action_urls() {
        let client = CkanClient::new(
            "https://catalog.example/",
            Some(String::new()),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(
            client.action_url("package_show"),
            "https://catalog.example/api/3/action/package_show"
        );
        assert!(client.api_key.is_none());
    }
}
