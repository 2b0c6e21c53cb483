//! Dataset record model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel keyword for records without any usable keywords.
pub const SENTINEL_KEYWORD: &str = "government-data";

/// Upper bound on keywords kept per record.
pub const MAX_RECORD_KEYWORDS: usize = 30;

/// Where a record's descriptive fields came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    /// Parsed from the rendered dataset page.
    #[default]
    Page,
    /// Read from the JSON document behind the meta link.
    MetaLink,
    /// Extraction failed; only identity fields are meaningful.
    Placeholder,
}

/// Reference to a dataset detail page found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetReference {
    pub url: String,
}

impl DatasetReference {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Value of the `index` query parameter, if any.
    pub fn index(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        parsed
            .query_pairs()
            .find(|(k, _)| k == "index")
            .map(|(_, v)| v.into_owned())
    }
}

/// Structured metadata for one dataset on the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub source_url: String,
    pub agency_id: String,
    /// Portal "Version Name". Never empty.
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Deduplicated and capped. Never empty.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub owner_organization_name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub data_link: Option<String>,
    #[serde(default)]
    pub meta_link: Option<String>,
    /// Local copy of the payload behind `data_link`.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub metadata_source: MetadataSource,
    pub extracted_at: DateTime<Utc>,
}

impl DatasetRecord {
    /// Record with only identity fields set.
    pub fn new(source_url: &str, agency_id: &str, title: &str) -> Self {
        let mut record = Self {
            source_url: source_url.to_string(),
            agency_id: agency_id.to_string(),
            title: String::new(),
            description: String::new(),
            keywords: Vec::new(),
            categories: Vec::new(),
            owner_organization_name: String::new(),
            author: None,
            author_email: None,
            data_link: None,
            meta_link: None,
            data_file: None,
            metadata_source: MetadataSource::Page,
            extracted_at: Utc::now(),
        };
        record.set_title(title);
        record.set_keywords(Vec::new());
        record
    }

    /// Placeholder returned when extraction fails.
    pub fn placeholder(source_url: &str, agency_id: &str) -> Self {
        let mut record = Self::new(source_url, agency_id, "");
        record.metadata_source = MetadataSource::Placeholder;
        record
    }

    pub fn is_placeholder(&self) -> bool {
        self.metadata_source == MetadataSource::Placeholder
    }

    /// Set the title, generating one when `title` is blank.
    pub fn set_title(&mut self, title: &str) {
        let title = title.trim();
        self.title = if title.is_empty() {
            format!("dataset-{}", Utc::now().timestamp_millis())
        } else {
            title.to_string()
        };
    }

    /// Set keywords: trimmed, deduplicated, capped, sentinel when empty.
    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        let mut kept: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !kept.iter().any(|k| k == keyword) {
                kept.push(keyword.to_string());
            }
        }
        kept.truncate(MAX_RECORD_KEYWORDS);
        if kept.is_empty() {
            kept.push(SENTINEL_KEYWORD.to_string());
        }
        self.keywords = kept;
    }

    /// Filesystem-safe stem derived from the title.
    ///
    /// Used as the record's file name and as the basis of its catalog id.
    pub fn file_stem(&self) -> String {
        let kept: String = self
            .title
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
            .take(100)
            .collect();
        let stem = kept.trim().replace(' ', "_");
        let stem = stem.trim_matches('.').to_string();
        if stem.is_empty() {
            "unnamed_dataset".to_string()
        } else {
            stem
        }
    }

    /// Organization name to publish under, falling back to the agency id.
    pub fn organization_name(&self) -> &str {
        let owner = self.owner_organization_name.trim();
        if owner.is_empty() {
            self.agency_id.trim()
        } else {
            owner
        }
    }
}
