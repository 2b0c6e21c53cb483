//! govharvest - open-data portal harvester.
//!
//! Crawls the dataset listings of a government open-data portal agency by
//! agency, extracts per-dataset metadata, and republishes it into a CKAN
//! catalog.

pub mod browser;
pub mod catalog;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod http_client;
pub mod models;
pub mod pipeline;
pub mod reference;
pub mod store;
