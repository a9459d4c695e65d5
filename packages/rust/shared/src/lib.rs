//! Shared types, error model, and configuration for the statute scraper.
//!
//! This crate is the foundation depended on by all other `sso-*` crates.
//! It provides:
//! - [`SsoError`]: the unified error type
//! - Domain types ([`CatalogEntry`], [`SubsidiaryEntry`], [`FragmentPlan`],
//!   [`AssembledDocument`])
//! - Remote site URL shapes ([`site`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod site;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, Retrieve, RunConfig, SiteConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{Result, SsoError};
pub use types::{
    AssembledDocument, CatalogEntry, DocumentKind, FragmentParams, FragmentPlan, SubsidiaryEntry,
    normalize_order_number, sanitize_shorthand, shorthand_from_link,
};
