//! Fragment plan resolution.
//!
//! A statute page carries part of its body inline and defers the rest to
//! lazy-loaded fragments. Each deferred section is marked by a
//! `div.dms[data-term]` node; the request parameters for every marker live
//! in one of the page's `div.global-vars[data-json]` configuration blobs.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use sso_shared::{FragmentParams, FragmentPlan, Result, SsoError};

use crate::selector::Page;

const CONFIG_BLOB_SELECTOR: &str = "div.global-vars";
const CONFIG_BLOB_ATTR: &str = "data-json";
const FRAGMENT_MARKER_SELECTOR: &str = "div.dms";
const FRAGMENT_ID_ATTR: &str = "data-term";

/// Which node holds the already-rendered body of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRoot {
    /// Principal statute: every `div.prov1` provision block.
    Statute,
    /// Subsidiary instrument: the `#legis` container.
    Subsidiary,
}

impl ContentRoot {
    pub fn selector(self) -> &'static str {
        match self {
            Self::Statute => "div.prov1",
            Self::Subsidiary => "#legis",
        }
    }
}

/// Build the fragment plan for a fetched page.
///
/// `context` names the page in errors (usually its URL or shorthand).
pub fn resolve(page_html: &str, root: ContentRoot, context: &str) -> Result<FragmentPlan> {
    let page = Page::parse(page_html);

    let non_lazy_html = page.outer_html_all(root.selector())?.concat();
    let fragment_order = fragment_ids(&page)?;

    if fragment_order.is_empty() {
        if non_lazy_html.is_empty() {
            return Err(SsoError::missing_config(
                context,
                format!(
                    "no `{}` content and no fragment markers; unrecognised page layout",
                    root.selector()
                ),
            ));
        }
        debug!(context, "no fragment markers, page content is complete");
        return Ok(FragmentPlan::complete(non_lazy_html));
    }

    let blobs = page.attr_all(CONFIG_BLOB_SELECTOR, CONFIG_BLOB_ATTR)?;
    let config = find_fragment_config(&blobs).ok_or_else(|| {
        SsoError::missing_config(
            context,
            format!(
                "{} fragment markers but none of {} configuration blobs carries tocSysId and fragments",
                fragment_order.len(),
                blobs.len()
            ),
        )
    })?;

    debug!(
        context,
        fragments = fragment_order.len(),
        params = config.params.len(),
        "fragment plan resolved"
    );

    Ok(FragmentPlan {
        non_lazy_html,
        toc_sys_id: config.toc_sys_id,
        fragment_order,
        fragment_params: config.params,
    })
}

/// Fragment ids in marker order, first occurrence wins.
fn fragment_ids(page: &Page) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    Ok(page
        .attr_all(FRAGMENT_MARKER_SELECTOR, FRAGMENT_ID_ATTR)?
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect())
}

struct FragmentConfig {
    toc_sys_id: String,
    params: HashMap<String, FragmentParams>,
}

/// Pick the blob that actually carries fragment configuration, wherever it sits.
fn find_fragment_config(blobs: &[String]) -> Option<FragmentConfig> {
    blobs.iter().find_map(|raw| {
        let value: Value = serde_json::from_str(raw).ok()?;
        let toc_sys_id = scalar_to_string(value.get("tocSysId")?)?;
        let fragments = value.get("fragments")?.as_object()?;

        let params = fragments
            .iter()
            .filter_map(|(id, pair)| {
                let frag_sys_id = scalar_to_string(pair.get("Item1")?)?;
                let dt_id = scalar_to_string(pair.get("Item2")?)?;
                Some((id.clone(), FragmentParams { frag_sys_id, dt_id }))
            })
            .collect();

        Some(FragmentConfig { toc_sys_id, params })
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
