//! URL shapes of the remote legislation site.
//!
//! These are reproduced exactly; the site's endpoints reject variations.

use url::Url;

use crate::error::{Result, SsoError};

/// Default origin of the legislation site.
pub const DEFAULT_BASE_URL: &str = "https://sso.agc.gov.sg";

/// Query parameters the lazy-load endpoint requires, in order, between
/// `SeriesId` and `FragSysId`. All are empty except the view version.
const LAZY_LOAD_FIXED_PARAMS: &[(&str, &str)] = &[
    ("ValidTime", ""),
    ("TransactionTime", ""),
    ("ViewType", ""),
    ("V", "25"),
    ("Phrase", ""),
    ("Exact", ""),
    ("Any", ""),
    ("Without", ""),
    ("WiAl", ""),
    ("WiPr", ""),
    ("WiLT", ""),
    ("WiSc", ""),
    ("WiDT", ""),
    ("WiDH", ""),
    ("WiES", ""),
    ("WiPH", ""),
    ("RefinePhrase", ""),
    ("RefineWithin", ""),
    ("CustomSearchId", ""),
];

fn join(base: &Url, path_and_query: &str) -> Result<Url> {
    base.join(path_and_query)
        .map_err(|e| SsoError::parse(format!("invalid URL {path_and_query:?}: {e}")))
}

/// Table-of-contents listing of all current Acts.
pub fn listing_url(base: &Url, page_size: u32) -> Result<Url> {
    join(
        base,
        &format!("/Browse/Act/Current/All?PageSize={page_size}&SortBy=Title&SortOrder=ASC"),
    )
}

/// A single statute page.
pub fn act_url(base: &Url, shorthand: &str) -> Result<Url> {
    join(base, &format!("/Act/{shorthand}"))
}

/// A statute's subsidiary legislation index.
pub fn subsidiary_index_url(base: &Url, shorthand: &str, page_size: u32) -> Result<Url> {
    join(
        base,
        &format!("/Act/{shorthand}?DocType=Act&ViewType=Sl&PageIndex=0&PageSize={page_size}"),
    )
}

/// One lazy-loaded fragment of a document.
///
/// The ids come from the page and are encoded as query values.
pub fn fragment_url(
    base: &Url,
    toc_sys_id: &str,
    series_id: &str,
    frag_sys_id: &str,
    dt_id: &str,
) -> Result<Url> {
    let mut url = join(base, "/Details/GetLazyLoadContent")?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("TocSysId", toc_sys_id)
            .append_pair("SeriesId", series_id);
        for (name, value) in LAZY_LOAD_FIXED_PARAMS {
            query.append_pair(name, value);
        }
        query
            .append_pair("FragSysId", frag_sys_id)
            .append_pair("_", dt_id);
    }
    Ok(url)
}
