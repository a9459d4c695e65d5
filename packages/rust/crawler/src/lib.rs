//! Retrieval and reassembly of statute documents.
//!
//! This crate provides:
//! - [`selector`]: parse-and-query layer over `scraper`
//! - [`http`]: the HTTP fetch collaborator ([`Fetcher`])
//! - [`catalog`]: paginated table-of-contents traversal ([`CatalogCrawler`])
//! - [`fragments`]: fragment plan resolution ([`fragments::resolve`])
//! - [`assembler`]: concurrent fragment fetch and ordered stitching ([`DocumentAssembler`])
//! - [`subsidiary`]: subsidiary index parsing and instrument retrieval ([`SubsidiaryResolver`])

pub mod abort;
pub mod assembler;
pub mod catalog;
pub mod fragments;
pub mod http;
pub mod selector;
pub mod subsidiary;

pub use abort::AbortSignal;
pub use assembler::{Assembly, AssemblyWarning, DocumentAssembler, FRAGMENT_CONTAINER_MARKER, stitch};
pub use catalog::{CatalogCrawler, CatalogSummary, ListingPage, parse_listing, parse_statute_page};
pub use fragments::{ContentRoot, resolve};
pub use http::{FetchResponse, Fetcher};
pub use selector::Page;
pub use subsidiary::{SubsidiaryResolver, list_subsidiaries};
