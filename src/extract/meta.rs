//! Portal meta JSON documents.

use async_trait::async_trait;
use serde_json::Value;

use crate::http_client::{FetchError, HttpClient};

/// Owner name keys in priority order.
const OWNER_NAME_KEYS: &[&str] = &[
    "fullnameRu",
    "nameRu",
    "shortNameRu",
    "nameEn",
    "shortNameEn",
];

/// Fetches the JSON document behind a dataset's meta link.
#[async_trait]
pub trait MetaFetcher: Send + Sync {
    async fn fetch_meta(&self, url: &str) -> Result<Value, FetchError>;
}

#[async_trait]
impl MetaFetcher for HttpClient {
    async fn fetch_meta(&self, url: &str) -> Result<Value, FetchError> {
        self.get_json(url).await
    }
}

/// Descriptive fields read from a meta document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetaDocument {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub owner: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn keywords(value: &Value) -> Vec<String> {
    match value.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => super::locators::split_list(s),
        _ => Vec::new(),
    }
}

impl MetaDocument {
    pub fn parse(value: &Value) -> Self {
        let title = str_field(value, "title")
            .or_else(|| str_field(value, "nameRu"))
            .or_else(|| str_field(value, "nameKk"));

        let localized: Vec<String> = ["descriptionRu", "descriptionKk"]
            .iter()
            .filter_map(|key| str_field(value, key))
            .collect();
        let description = if localized.is_empty() {
            str_field(value, "description")
        } else {
            Some(localized.join("\n"))
        };

        let owner = value.get("owner").and_then(|owner| {
            OWNER_NAME_KEYS
                .iter()
                .find_map(|key| str_field(owner, key))
        });

        let responsible = value.get("responsible");
        Self {
            title,
            description,
            keywords: keywords(value),
            owner,
            author: responsible.and_then(|r| str_field(r, "fullnameRu")),
            author_email: responsible.and_then(|r| str_field(r, "email")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_document() {
        let doc = MetaDocument::parse(&json!({
            "title": "Перечень школ",
            "descriptionRu": "Список",
            "descriptionKk": "Тізім",
            "keywords": ["школы", "образование"],
            "owner": {"nameRu": "Акимат", "nameEn": "Akimat"},
            "responsible": {"fullnameRu": "Иванов И.", "email": "i@example.kz"}
        }));

        assert_eq!(doc.title.as_deref(), Some("Перечень школ"));
        assert_eq!(doc.description.as_deref(), Some("Список\nТізім"));
        assert_eq!(doc.keywords, vec!["школы", "образование"]);
        assert_eq!(doc.owner.as_deref(), Some("Акимат"));
        assert_eq!(doc.author.as_deref(), Some("Иванов И."));
        assert_eq!(doc.author_email.as_deref(), Some("i@example.kz"));
    }

    #[test]
    fn owner_priority_skips_blank_names() {
        let doc = MetaDocument::parse(&json!({
            "owner": {"fullnameRu": " ", "shortNameRu": "МФ", "nameEn": "Ministry"}
        }));
        assert_eq!(doc.owner.as_deref(), Some("МФ"));
    }

    #[test]
    fn tolerates_sparse_documents() {
        let doc = MetaDocument::parse(&json!({"keywords": "a, b", "description": "d"}));
        assert_eq!(doc.title, None);
        assert_eq!(doc.description.as_deref(), Some("d"));
        assert_eq!(doc.keywords, vec!["a", "b"]);
        assert_eq!(MetaDocument::parse(&json!([])), MetaDocument::default());
    }
}
