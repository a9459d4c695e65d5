//! Core domain types for statute retrieval and reassembly.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// CatalogEntry
// ---------------------------------------------------------------------------

/// One statute discovered on the table-of-contents listing (or requested directly).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Display title of the Act.
    pub title: String,
    /// Last path segment of `canonical_link`; the output key for the run.
    pub shorthand: String,
    /// Absolute link to the statute page.
    pub canonical_link: Url,
    /// Whether the listing advertised a PDF download.
    pub has_pdf: bool,
    /// Absolute link to the subsidiary legislation index, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidiary_index_link: Option<Url>,
}

impl CatalogEntry {
    /// Build an entry, deriving the shorthand from the link's final path segment.
    /// Returns `None` when the link has no usable path segment.
    pub fn new(title: impl Into<String>, canonical_link: Url) -> Option<Self> {
        let shorthand = shorthand_from_link(&canonical_link)?;
        Some(Self {
            title: title.into(),
            shorthand,
            canonical_link,
            has_pdf: false,
            subsidiary_index_link: None,
        })
    }

    pub fn with_pdf(mut self, has_pdf: bool) -> Self {
        self.has_pdf = has_pdf;
        self
    }

    pub fn with_subsidiary_index(mut self, link: Option<Url>) -> Self {
        self.subsidiary_index_link = link;
        self
    }
}

/// Derive a shorthand from a link: its last non-empty path segment.
///
/// `".../Act/1985-revised/PC1871"` → `"PC1871"`. A link with no path
/// segments (the site root) has no shorthand.
pub fn shorthand_from_link(link: &Url) -> Option<String> {
    link.path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// SubsidiaryEntry
// ---------------------------------------------------------------------------

/// One row of a statute's subsidiary legislation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsidiaryEntry {
    pub short_title: String,
    /// Order number with `/` replaced by `-`.
    pub order_number: String,
    /// `"{short_title} {order_number}"`.
    pub shorthand: String,
    /// Link as it appears in the index (possibly relative).
    pub link: String,
}

impl SubsidiaryEntry {
    pub fn new(
        short_title: impl Into<String>,
        raw_order_number: &str,
        link: impl Into<String>,
    ) -> Self {
        let short_title = short_title.into();
        let order_number = normalize_order_number(raw_order_number);
        let shorthand = format!("{short_title} {order_number}");
        Self {
            short_title,
            order_number,
            shorthand,
            link: link.into(),
        }
    }
}

/// Trim an order number and replace its path-unsafe `/` separators with `-`.
pub fn normalize_order_number(raw: &str) -> String {
    raw.trim().replace('/', "-")
}

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).expect("valid filename regex"));

/// Make a shorthand safe to use as a file stem.
pub fn sanitize_shorthand(shorthand: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(shorthand.trim(), "-");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

// ---------------------------------------------------------------------------
// FragmentPlan
// ---------------------------------------------------------------------------

/// Request parameters for one lazy-loaded fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentParams {
    pub frag_sys_id: String,
    pub dt_id: String,
}

/// Everything needed to rebuild one document from its page and fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentPlan {
    /// Already-rendered portion of the document, concatenated verbatim.
    pub non_lazy_html: String,
    /// Table-of-contents system identifier. Empty when there are no fragments.
    pub toc_sys_id: String,
    /// Fragment ids in the order their markers appear in the page.
    pub fragment_order: Vec<String>,
    pub fragment_params: HashMap<String, FragmentParams>,
}

impl FragmentPlan {
    /// A plan for a page whose non-lazy HTML is already the complete document.
    pub fn complete(non_lazy_html: impl Into<String>) -> Self {
        Self {
            non_lazy_html: non_lazy_html.into(),
            ..Self::default()
        }
    }

    pub fn is_lazy(&self) -> bool {
        !self.fragment_order.is_empty()
    }

    pub fn params_for(&self, fragment_id: &str) -> Option<&FragmentParams> {
        self.fragment_params.get(fragment_id)
    }
}

// ---------------------------------------------------------------------------
// AssembledDocument
// ---------------------------------------------------------------------------

/// Whether a document is a principal statute or a subsidiary instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Statute,
    Subsidiary,
}

/// A fully reassembled document, ready for the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledDocument {
    pub kind: DocumentKind,
    pub shorthand: String,
    pub title: String,
    pub html: String,
    /// Link to the statute's subsidiary legislation index, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidiary_link: Option<String>,
}
