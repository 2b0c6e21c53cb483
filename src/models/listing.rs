//! Listing page queries.

use serde::{Deserialize, Serialize};

/// Filter parameters for the portal's dataset search listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingQuery {
    pub agency_id: String,
    /// 1-based page number.
    pub page: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_exp_type")]
    pub exp_type: u8,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub date_begin: String,
    #[serde(default)]
    pub date_end: String,
    #[serde(default = "default_status_type")]
    pub status_type: u8,
    #[serde(default)]
    pub actual_type: String,
    #[serde(default = "default_sort")]
    pub sort: String,
}

fn default_exp_type() -> u8 {
    1
}

fn default_status_type() -> u8 {
    1
}

pub fn default_sort() -> String {
    "createdDateDesc".to_string()
}

impl ListingQuery {
    /// First page of an agency's published datasets, newest first.
    pub fn for_agency(agency_id: &str) -> Self {
        Self {
            agency_id: agency_id.to_string(),
            page: 1,
            text: String::new(),
            exp_type: default_exp_type(),
            category: String::new(),
            date_begin: String::new(),
            date_end: String::new(),
            status_type: default_status_type(),
            actual_type: String::new(),
            sort: default_sort(),
        }
    }

    /// Same filters at another page.
    pub fn at_page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    /// Absolute listing URL under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/datasets/search?text={}&expType={}&category={}&pDateBeg={}&pDateEnd={}&statusType={}&actualType={}&datasetSortSelect={}&govAgencyId={}&page={}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&self.text),
            self.exp_type,
            urlencoding::encode(&self.category),
            urlencoding::encode(&self.date_begin),
            urlencoding::encode(&self.date_end),
            self.status_type,
            urlencoding::encode(&self.actual_type),
            urlencoding::encode(&self.sort),
            urlencoding::encode(&self.agency_id),
            self.page,
        )
    }
}
