//! Subsidiary legislation expansion.
//!
//! A statute's subsidiary index is a table with one instrument per row.
//! Each instrument is then fetched and assembled like any other document,
//! rooted at `#legis` instead of the statute provision blocks.

use scraper::{ElementRef, Selector};
use tracing::{debug, instrument};
use url::Url;

use sso_shared::{AssembledDocument, DocumentKind, Result, SsoError, SubsidiaryEntry};

use crate::assembler::{Assembly, DocumentAssembler};
use crate::fragments::ContentRoot;
use crate::selector::{Page, element_text, selector};

const SUBSIDIARY_TABLE: &str = "subsidiary index";
const ROW_SELECTOR: &str = "table.browse-list tbody tr";
const LINK_SELECTOR: &str = "td a[href]";

/// Position of the order number among a row's cell text nodes. Whitespace
/// nodes around the title anchor count, as they do in the site's markup.
const ORDER_NUMBER_TEXT_NODE: usize = 3;

/// Parse a subsidiary index page. Each row yields an entry or its own error;
/// a bad row never affects its neighbours.
pub fn list_subsidiaries(index_html: &str, base_url: &Url) -> Result<Vec<Result<SubsidiaryEntry>>> {
    let page = Page::parse(index_html);
    let rows = selector(ROW_SELECTOR)?;
    let link = selector(LINK_SELECTOR)?;

    Ok(page
        .html()
        .select(&rows)
        .enumerate()
        .map(|(index, row)| parse_row(row, index, &link, base_url))
        .collect())
}

fn parse_row(
    row: ElementRef<'_>,
    index: usize,
    link_sel: &Selector,
    base_url: &Url,
) -> Result<SubsidiaryEntry> {
    let anchor = row
        .select(link_sel)
        .next()
        .ok_or_else(|| SsoError::row_parse(SUBSIDIARY_TABLE, index, "missing link"))?;

    let short_title = element_text(anchor);
    if short_title.is_empty() {
        return Err(SsoError::row_parse(SUBSIDIARY_TABLE, index, "missing short title"));
    }

    let href = anchor.value().attr("href").unwrap_or_default();
    base_url.join(href).map_err(|e| {
        SsoError::row_parse(SUBSIDIARY_TABLE, index, format!("unresolvable link {href:?}: {e}"))
    })?;

    let texts = cell_text_nodes(row);
    let order_number = texts
        .get(ORDER_NUMBER_TEXT_NODE)
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            SsoError::row_parse(
                SUBSIDIARY_TABLE,
                index,
                format!(
                    "expected order number at text node {ORDER_NUMBER_TEXT_NODE}, row has {} text nodes",
                    texts.len()
                ),
            )
        })?;

    Ok(SubsidiaryEntry::new(short_title, order_number, href))
}

/// Text nodes that are direct children of the row's cells, in document order.
fn cell_text_nodes(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| cell.value().name() == "td")
        .flat_map(|cell| {
            cell.children().filter_map(|node| {
                node.value().as_text().map(|text| {
                    let text: &str = text;
                    text.to_string()
                })
            })
        })
        .collect()
}

/// Fetches subsidiary indexes and the instruments they list.
#[derive(Clone)]
pub struct SubsidiaryResolver {
    assembler: DocumentAssembler,
}

impl SubsidiaryResolver {
    pub fn new(assembler: DocumentAssembler) -> Self {
        Self { assembler }
    }

    /// Fetch a statute's subsidiary index and parse its rows.
    #[instrument(skip_all, fields(index = %index_url))]
    pub async fn fetch_index(&self, index_url: &Url) -> Result<Vec<Result<SubsidiaryEntry>>> {
        let html = self.assembler.fetcher().get_page(index_url).await?;
        let rows = list_subsidiaries(&html, index_url)?;
        debug!(rows = rows.len(), "subsidiary index parsed");
        Ok(rows)
    }

    /// Fetch one instrument, resolving its link against `base_url`, and assemble it.
    #[instrument(skip_all, fields(shorthand = %entry.shorthand))]
    pub async fn fetch_subsidiary_document(
        &self,
        entry: &SubsidiaryEntry,
        base_url: &Url,
    ) -> Result<(AssembledDocument, Assembly)> {
        let url = base_url
            .join(&entry.link)
            .map_err(|e| SsoError::parse(format!("invalid subsidiary link {:?}: {e}", entry.link)))?;

        let assembly = self
            .assembler
            .fetch_document(&url, ContentRoot::Subsidiary)
            .await?;

        let document = AssembledDocument {
            kind: DocumentKind::Subsidiary,
            shorthand: entry.shorthand.clone(),
            title: entry.short_title.clone(),
            html: assembly.html.clone(),
            subsidiary_link: None,
        };

        Ok((document, assembly))
    }
}
