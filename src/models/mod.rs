//! Data models shared across the harvest pipeline.

mod listing;
mod record;

pub use listing::{default_sort, ListingQuery};
pub use record::{
    DatasetRecord, DatasetReference, MetadataSource, MAX_RECORD_KEYWORDS, SENTINEL_KEYWORD,
};
