//! Agency reference index.
//!
//! Reference files are JSON arrays of objects carrying a `govAgency` id and
//! optionally a display name (`nameRu` or `name`). Each file holds one
//! agency category. The index is built once per run and shared read-only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Failed to read reference file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid reference data in {origin}: {message}")]
    Parse { origin: String, message: String },
}

/// One government agency known to the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agency {
    pub id: String,
    pub name: Option<String>,
    pub category: String,
}

/// Immutable lookup of agencies by id and category.
#[derive(Debug, Default, Clone)]
pub struct ReferenceIndex {
    agencies: Vec<Agency>,
    by_id: HashMap<String, usize>,
}

/// Scalar `govAgency` values may be numbers or strings.
fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn display_name(entry: &Value) -> Option<String> {
    ["nameRu", "name"]
        .iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

impl ReferenceIndex {
    /// Parse one category's JSON array.
    pub fn parse_category(
        category: &str,
        origin: &str,
        json: &str,
    ) -> Result<Vec<Agency>, ReferenceError> {
        let value: Value = serde_json::from_str(json).map_err(|e| ReferenceError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        let entries = value.as_array().ok_or_else(|| ReferenceError::Parse {
            origin: origin.to_string(),
            message: "expected a JSON array".to_string(),
        })?;

        let mut agencies = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(id) = entry.get("govAgency").and_then(scalar_id) else {
                debug!("Skipping reference entry without govAgency in {}", origin);
                continue;
            };
            agencies.push(Agency {
                id,
                name: display_name(entry),
                category: category.to_string(),
            });
        }
        Ok(agencies)
    }

    /// Build the index from `(category, path)` pairs. Ids seen in an
    /// earlier file keep their first entry.
    pub async fn load(sources: &[(String, PathBuf)]) -> Result<Self, ReferenceError> {
        let mut index = Self::default();
        for (category, path) in sources {
            let json = read(path).await?;
            let agencies = Self::parse_category(category, &path.display().to_string(), &json)?;
            info!(
                "Loaded {} {} agencies from {}",
                agencies.len(),
                category,
                path.display()
            );
            index.extend(agencies);
        }
        Ok(index)
    }

    pub fn from_agencies(agencies: impl IntoIterator<Item = Agency>) -> Self {
        let mut index = Self::default();
        index.extend(agencies);
        index
    }

    fn extend(&mut self, agencies: impl IntoIterator<Item = Agency>) {
        for agency in agencies {
            if self.by_id.contains_key(&agency.id) {
                continue;
            }
            self.by_id.insert(agency.id.clone(), self.agencies.len());
            self.agencies.push(agency);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Agency> {
        self.by_id.get(id).map(|&i| &self.agencies[i])
    }

    /// Display name for an agency id, if known.
    pub fn agency_name(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(|a| a.name.as_deref())
    }

    /// Agencies in load order, optionally restricted to one category.
    pub fn agencies<'a>(
        &'a self,
        category: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Agency> + 'a {
        self.agencies
            .iter()
            .filter(move |a| category.map(|c| a.category == c).unwrap_or(true))
    }

    pub fn agency_ids(&self, category: Option<&str>) -> Vec<String> {
        self.agencies(category).map(|a| a.id.clone()).collect()
    }

    /// Distinct categories in load order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for agency in &self.agencies {
            if !seen.contains(&agency.category.as_str()) {
                seen.push(&agency.category);
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.agencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty()
    }
}

async fn read(path: &Path) -> Result<String, ReferenceError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTRAL: &str = r#"[
        {"govAgency": 101, "nameRu": "Министерство финансов"},
        {"govAgency": "102", "name": "Агентство по статистике"},
        {"nameRu": "без идентификатора"},
        {"govAgency": 103}
    ]"#;

    #[test]
    fn parses_numeric_and_string_ids() {
        let agencies = ReferenceIndex::parse_category("central", "inline", CENTRAL).unwrap();
        let ids: Vec<&str> = agencies.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "102", "103"]);
        assert_eq!(agencies[1].name.as_deref(), Some("Агентство по статистике"));
        assert_eq!(agencies[2].name, None);
    }

    #[test]
    fn rejects_non_array() {
        let err = ReferenceIndex::parse_category("central", "inline", r#"{"a": 1}"#).unwrap_err();
        assert!(matches!(err, ReferenceError::Parse { .. }));
    }

    #[test]
    fn lookups_by_id_and_category() {
        let mut agencies = ReferenceIndex::parse_category("central", "c", CENTRAL).unwrap();
        agencies.extend(
            ReferenceIndex::parse_category(
                "local",
                "l",
                r#"[{"govAgency": 201, "nameRu": "Акимат"}, {"govAgency": 101}]"#,
            )
            .unwrap(),
        );
        let index = ReferenceIndex::from_agencies(agencies);

        assert_eq!(index.len(), 4);
        assert_eq!(index.agency_name("101"), Some("Министерство финансов"));
        assert_eq!(index.get("101").unwrap().category, "central");
        assert_eq!(index.agency_ids(Some("local")), vec!["201"]);
        assert_eq!(index.categories(), vec!["central", "local"]);
        assert_eq!(index.agency_name("999"), None);
    }

    #[test]
    fn filters_agencies_by_borrowed_category() {
        let index = ReferenceIndex::from_agencies(
            ReferenceIndex::parse_category("central", "c", CENTRAL).unwrap(),
        );
        let category = String::from("central");
        let ids: Vec<&str> = index
            .agencies(Some(category.as_str()))
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids.len(), index.len());
        assert_eq!(index.agencies(Some("local")).count(), 0);
        assert_eq!(index.agencies(None).count(), index.len());
    }

    #[tokio::test]
    async fn loads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quasi.json");
        std::fs::write(&path, r#"[{"govAgency": 7, "nameRu": "Фонд"}]"#).unwrap();

        let index = ReferenceIndex::load(&[("quasi".to_string(), path)])
            .await
            .unwrap();
        assert_eq!(index.agency_name("7"), Some("Фонд"));

        let missing = ReferenceIndex::load(&[("x".to_string(), dir.path().join("nope.json"))]).await;
        assert!(matches!(missing, Err(ReferenceError::Io { .. })));
    }
}
