//! Error types for the statute scraper.
//!
//! Library crates use [`SsoError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all scraper operations.
#[derive(Debug, thiserror::Error)]
pub enum SsoError {
    /// Network or HTTP status failure on a page or fragment.
    #[error("fetch error for {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Fragment configuration blob absent or unparsable on a page that needs it.
    #[error("missing fragment config for {context}: {reason}")]
    MissingConfig { context: String, reason: String },

    /// A catalog or subsidiary table row lacked an expected field.
    #[error("row {row} of {table} could not be parsed: {reason}")]
    RowParse {
        table: String,
        row: usize,
        reason: String,
    },

    /// The operator declined the destination confirmation.
    #[error("aborted by user: {0}")]
    UserAbort(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Selector, URL, or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SsoError>;

impl SsoError {
    /// Network-level failure with no HTTP status.
    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            status: None,
            message: msg.into(),
        }
    }

    /// Non-success HTTP status.
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self::Fetch {
            url: url.into(),
            status: Some(status),
            message: format!("HTTP {status}"),
        }
    }

    pub fn missing_config(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingConfig {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn row_parse(table: impl Into<String>, row: usize, reason: impl Into<String>) -> Self {
        Self::RowParse {
            table: table.into(),
            row,
            reason: reason.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that cost one item (a statute, an instrument, a row) but not the run.
    pub fn is_item_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::MissingConfig { .. } | Self::RowParse { .. }
        )
    }

    /// Errors after which no further fetches may be dispatched.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::UserAbort(_))
    }
}
