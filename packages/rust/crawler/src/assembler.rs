//! Document reassembly from a [`FragmentPlan`].
//!
//! Fragments are fetched concurrently under a semaphore, written into a
//! buffer indexed by their position in `fragment_order`, and only read out
//! once every fetch has settled. A failed fragment leaves an empty slot.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use url::Url;

use sso_shared::{FragmentPlan, Result, site};

use crate::fragments::{self, ContentRoot};
use crate::http::Fetcher;

/// Start of the first lazy-load placeholder; fragment bodies go right before it.
pub const FRAGMENT_CONTAINER_MARKER: &str = r#"<div class="dms""#;

/// A non-fatal problem met while assembling one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyWarning {
    /// The fragment request failed or returned a non-success status.
    FragmentFailed {
        fragment_id: String,
        url: String,
        reason: String,
    },
    /// A marker had no request parameters in the page configuration.
    FragmentUnresolved { fragment_id: String },
    /// The non-lazy HTML had no insertion marker; fragments were appended.
    MarkerMissing,
}

impl std::fmt::Display for AssemblyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FragmentFailed {
                fragment_id,
                url,
                reason,
            } => write!(f, "fragment {fragment_id} failed ({reason}): {url}"),
            Self::FragmentUnresolved { fragment_id } => {
                write!(f, "fragment {fragment_id} has no request parameters")
            }
            Self::MarkerMissing => write!(f, "fragment container marker missing"),
        }
    }
}

/// Assembled HTML plus whatever degraded along the way.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub html: String,
    pub warnings: Vec<AssemblyWarning>,
}

impl Assembly {
    /// Fragments whose slot was left empty.
    pub fn degraded_fragments(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| !matches!(w, AssemblyWarning::MarkerMissing))
            .count()
    }
}

/// Insert fragment bodies, in order, before the first fragment marker.
///
/// Returns the document and whether the marker was found. Without a marker
/// the bodies are appended after all non-lazy content.
pub fn stitch(non_lazy_html: &str, bodies: &[String]) -> (String, bool) {
    let fragments = bodies.concat();
    match non_lazy_html.find(FRAGMENT_CONTAINER_MARKER) {
        Some(idx) => {
            let mut out = String::with_capacity(non_lazy_html.len() + fragments.len());
            out.push_str(&non_lazy_html[..idx]);
            out.push_str(&fragments);
            out.push_str(&non_lazy_html[idx..]);
            (out, true)
        }
        None => (format!("{non_lazy_html}{fragments}"), false),
    }
}

/// Fetches fragments and stitches them into their page.
#[derive(Clone)]
pub struct DocumentAssembler {
    fetcher: Fetcher,
    concurrency: usize,
}

impl DocumentAssembler {
    /// `concurrency` bounds the fragment fetches in flight per document.
    pub fn new(fetcher: Fetcher, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch a page and assemble it.
    pub async fn fetch_document(&self, url: &Url, root: ContentRoot) -> Result<Assembly> {
        let html = self.fetcher.get_page(url).await?;
        self.assemble_page(&html, root, url.as_str()).await
    }

    /// Resolve an already-fetched page and assemble it.
    pub async fn assemble_page(
        &self,
        page_html: &str,
        root: ContentRoot,
        context: &str,
    ) -> Result<Assembly> {
        let plan = fragments::resolve(page_html, root, context)?;
        Ok(self.assemble(&plan).await)
    }

    /// Fetch every fragment in `plan` and build the complete HTML.
    #[instrument(skip_all, fields(toc = %plan.toc_sys_id, fragments = plan.fragment_order.len()))]
    pub async fn assemble(&self, plan: &FragmentPlan) -> Assembly {
        let count = plan.fragment_order.len();
        let mut slots: Vec<Option<String>> = vec![None; count];
        let mut warnings: Vec<(usize, AssemblyWarning)> = Vec::new();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, fragment_id) in plan.fragment_order.iter().enumerate() {
            let Some(params) = plan.params_for(fragment_id) else {
                warn!(%fragment_id, "no request parameters for fragment, leaving slot empty");
                warnings.push((
                    index,
                    AssemblyWarning::FragmentUnresolved {
                        fragment_id: fragment_id.clone(),
                    },
                ));
                slots[index] = Some(String::new());
                continue;
            };

            let url = match site::fragment_url(
                self.fetcher.base_url(),
                &plan.toc_sys_id,
                fragment_id,
                &params.frag_sys_id,
                &params.dt_id,
            ) {
                Ok(url) => url,
                Err(e) => {
                    warn!(%fragment_id, error = %e, "cannot build fragment URL");
                    warnings.push((
                        index,
                        AssemblyWarning::FragmentFailed {
                            fragment_id: fragment_id.clone(),
                            url: String::new(),
                            reason: e.to_string(),
                        },
                    ));
                    slots[index] = Some(String::new());
                    continue;
                }
            };

            let fetcher = self.fetcher.clone();
            let semaphore = semaphore.clone();
            let fragment_id = fragment_id.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = fetch_fragment(&fetcher, &url).await;
                (index, fragment_id, url, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, fragment_id, _url, Ok(body))) => {
                    debug!(%fragment_id, bytes = body.len(), "fragment fetched");
                    slots[index] = Some(body);
                }
                Ok((index, fragment_id, url, Err(reason))) => {
                    warn!(%url, %fragment_id, %reason, "fragment fetch failed, substituting empty body");
                    warnings.push((
                        index,
                        AssemblyWarning::FragmentFailed {
                            fragment_id,
                            url: url.to_string(),
                            reason,
                        },
                    ));
                    slots[index] = Some(String::new());
                }
                Err(e) => warn!(error = %e, "fragment task failed"),
            }
        }

        // A slot still empty here belongs to a task that panicked.
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                warnings.push((
                    index,
                    AssemblyWarning::FragmentFailed {
                        fragment_id: plan.fragment_order[index].clone(),
                        url: String::new(),
                        reason: "fetch task did not complete".into(),
                    },
                ));
                *slot = Some(String::new());
            }
        }
        warnings.sort_by_key(|(index, _)| *index);

        let bodies: Vec<String> = slots.into_iter().map(Option::unwrap_or_default).collect();
        let (html, marker_found) = stitch(&plan.non_lazy_html, &bodies);

        let mut warnings: Vec<AssemblyWarning> = warnings.into_iter().map(|(_, w)| w).collect();
        if plan.is_lazy() && !marker_found {
            warn!("fragment container marker missing, appending fragments after page content");
            warnings.push(AssemblyWarning::MarkerMissing);
        }

        Assembly { html, warnings }
    }
}

async fn fetch_fragment(fetcher: &Fetcher, url: &Url) -> std::result::Result<String, String> {
    let response = fetcher.get(url).await.map_err(|e| e.to_string())?;
    if !response.is_success() {
        return Err(format!("HTTP {}", response.status));
    }
    Ok(response.body)
}
