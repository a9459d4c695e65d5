//! Table-of-contents traversal.
//!
//! The listing is paginated; each page is fetched, its rows turned into
//! [`CatalogEntry`] values, and the "Next Page" link followed until it is
//! absent or points somewhere already visited.

use std::collections::HashSet;

use scraper::{ElementRef, Selector};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sso_shared::{CatalogEntry, Result, SsoError};

use crate::abort::AbortSignal;
use crate::http::Fetcher;
use crate::selector::{Page, element_text, selector};

const CATALOG_TABLE: &str = "catalog listing";
const ROW_SELECTOR: &str = "table.browse-list tbody tr";
const TITLE_SELECTOR: &str = "td:first-child a.non-ajax";
const NAV_ANCHOR_SELECTOR: &str = "ul.nav-pills li a";
const NEXT_PAGE_SELECTOR: &str = r#"a[aria-label="Next Page"]"#;

const STATUTE_TITLE_SELECTOR: &str = "div.legis-title > div";
const STATUTE_PDF_SELECTOR: &str = "div.legis-title a[href]";

// ---------------------------------------------------------------------------
// Listing page parsing
// ---------------------------------------------------------------------------

/// One parsed page of the table of contents.
#[derive(Debug)]
pub struct ListingPage {
    pub entries: Vec<CatalogEntry>,
    /// Rows that were missing a title or link.
    pub skipped: Vec<SsoError>,
    /// Absolute "Next Page" link, when it leads somewhere other than this page.
    pub next_page: Option<Url>,
}

struct RowSelectors {
    title: Selector,
    nav: Selector,
}

/// Parse a listing page fetched from `page_url`.
pub fn parse_listing(html: &str, page_url: &Url) -> Result<ListingPage> {
    let page = Page::parse(html);
    let rows = selector(ROW_SELECTOR)?;
    let sels = RowSelectors {
        title: selector(TITLE_SELECTOR)?,
        nav: selector(NAV_ANCHOR_SELECTOR)?,
    };

    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for (index, row) in page.html().select(&rows).enumerate() {
        match parse_row(row, index, page_url, &sels) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                debug!(error = %e, "skipping catalog row");
                skipped.push(e);
            }
        }
    }

    let next_page = page
        .first_attr(NEXT_PAGE_SELECTOR, "href")?
        .filter(|href| !is_placeholder(href))
        .and_then(|href| page_url.join(&href).ok())
        .filter(|next| next != page_url);

    Ok(ListingPage {
        entries,
        skipped,
        next_page,
    })
}

fn parse_row(
    row: ElementRef<'_>,
    index: usize,
    page_url: &Url,
    sels: &RowSelectors,
) -> Result<CatalogEntry> {
    let title_el = row.select(&sels.title).next();
    let title = title_el
        .map(element_text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SsoError::row_parse(CATALOG_TABLE, index, "missing title"))?;

    let href = title_el
        .and_then(|el| el.value().attr("href"))
        .filter(|h| !is_placeholder(h))
        .ok_or_else(|| SsoError::row_parse(CATALOG_TABLE, index, "missing link"))?;

    let link = page_url.join(href).map_err(|e| {
        SsoError::row_parse(CATALOG_TABLE, index, format!("unresolvable link {href:?}: {e}"))
    })?;

    let nav_hrefs: Vec<&str> = row
        .select(&sels.nav)
        .filter_map(|a| a.value().attr("href"))
        .collect();
    let has_pdf = nav_hrefs.iter().any(|h| is_pdf_link(h));
    let subsidiary = first_subsidiary_href(&nav_hrefs).and_then(|h| page_url.join(h).ok());

    let entry = CatalogEntry::new(title, link)
        .ok_or_else(|| SsoError::row_parse(CATALOG_TABLE, index, "link has no path segment"))?;

    Ok(entry.with_pdf(has_pdf).with_subsidiary_index(subsidiary))
}

fn is_placeholder(href: &str) -> bool {
    let href = href.trim();
    href.is_empty() || href == "#"
}

fn is_pdf_link(href: &str) -> bool {
    href.to_ascii_lowercase().contains("pdf")
}

/// The subsidiary anchor is the first navigation anchor that is neither a
/// `#` placeholder nor the PDF download; its position varies with the row.
fn first_subsidiary_href<'a>(hrefs: &[&'a str]) -> Option<&'a str> {
    hrefs
        .iter()
        .copied()
        .find(|h| !is_placeholder(h) && !is_pdf_link(h))
}

/// Build the catalog entry for a statute page fetched directly by shorthand.
pub fn parse_statute_page(html: &str, link: Url) -> Result<CatalogEntry> {
    let page = Page::parse(html);
    let title = page.first_text(STATUTE_TITLE_SELECTOR)?.filter(|t| !t.is_empty());
    let has_pdf = page.exists(STATUTE_PDF_SELECTOR)?;

    let entry = CatalogEntry::new(String::new(), link.clone())
        .ok_or_else(|| SsoError::parse(format!("no shorthand in {link}")))?;
    let title = title.unwrap_or_else(|| entry.shorthand.clone());

    Ok(CatalogEntry { title, ..entry }.with_pdf(has_pdf))
}

// ---------------------------------------------------------------------------
// CatalogCrawler
// ---------------------------------------------------------------------------

/// Totals for one catalog traversal.
#[derive(Debug, Default)]
pub struct CatalogSummary {
    pub pages_fetched: usize,
    pub entries_emitted: usize,
    pub skipped_rows: usize,
    /// Listing pages that could not be fetched or parsed.
    pub failures: Vec<SsoError>,
    pub aborted: bool,
}

/// Sequential walker over the paginated listing.
///
/// Construct it with any listing URL to restart from that page.
pub struct CatalogCrawler {
    fetcher: Fetcher,
    next: Option<Url>,
    visited: HashSet<Url>,
    pages_fetched: usize,
    skipped_rows: usize,
}

impl CatalogCrawler {
    pub fn new(fetcher: Fetcher, start_url: Url) -> Self {
        Self {
            fetcher,
            next: Some(start_url),
            visited: HashSet::new(),
            pages_fetched: 0,
            skipped_rows: 0,
        }
    }

    /// The page the next call to [`next_page`](Self::next_page) will fetch.
    pub fn resume_url(&self) -> Option<&Url> {
        self.next.as_ref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Fetch and parse the next listing page. `None` once the listing is exhausted.
    /// A failed page ends the traversal, since its "Next Page" link is unknown.
    pub async fn next_page(&mut self) -> Option<Result<ListingPage>> {
        let url = self.next.take()?;
        self.visited.insert(url.clone());

        let html = match self.fetcher.get_page(&url).await {
            Ok(html) => html,
            Err(e) => return Some(Err(e)),
        };
        self.pages_fetched += 1;

        let listing = match parse_listing(&html, &url) {
            Ok(listing) => listing,
            Err(e) => return Some(Err(e)),
        };

        self.skipped_rows += listing.skipped.len();
        self.next = listing
            .next_page
            .clone()
            .filter(|next| !self.visited.contains(next));

        debug!(
            %url,
            entries = listing.entries.len(),
            skipped = listing.skipped.len(),
            has_next = self.next.is_some(),
            "listing page parsed"
        );

        Some(Ok(listing))
    }

    /// Walk every page, sending entries as soon as each page is parsed.
    ///
    /// Stops early when `abort` is triggered or the receiver is dropped.
    #[instrument(skip_all)]
    pub async fn crawl(
        mut self,
        tx: mpsc::Sender<CatalogEntry>,
        abort: AbortSignal,
    ) -> CatalogSummary {
        let mut summary = CatalogSummary::default();

        'pages: loop {
            if abort.is_triggered() {
                summary.aborted = true;
                break;
            }

            let Some(result) = self.next_page().await else {
                break;
            };

            match result {
                Ok(listing) => {
                    if !listing.skipped.is_empty() {
                        warn!(
                            skipped = listing.skipped.len(),
                            "skipped malformed catalog rows"
                        );
                    }
                    for entry in listing.entries {
                        if tx.send(entry).await.is_err() {
                            debug!("entry receiver dropped, stopping catalog crawl");
                            break 'pages;
                        }
                        summary.entries_emitted += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "catalog page failed, traversal stops here");
                    summary.failures.push(e);
                }
            }
        }

        summary.pages_fetched = self.pages_fetched;
        summary.skipped_rows = self.skipped_rows;

        info!(
            pages = summary.pages_fetched,
            entries = summary.entries_emitted,
            skipped_rows = summary.skipped_rows,
            failures = summary.failures.len(),
            "catalog crawl finished"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::fetcher;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    fn listing_url() -> Url {
        Url::parse(
            "https://sso.agc.gov.sg/Browse/Act/Current/All?PageSize=500&SortBy=Title&SortOrder=ASC",
        )
        .unwrap()
    }

    #[test]
    fn parses_listing_fixture() {
        let listing = parse_listing(&load_fixture("listing.html"), &listing_url()).unwrap();

        assert_eq!(listing.entries.len(), 3);
        assert_eq!(listing.skipped.len(), 1);

        let penal = &listing.entries[0];
        assert_eq!(penal.title, "Penal Code 1871");
        assert_eq!(penal.shorthand, "PC1871");
        assert_eq!(
            penal.canonical_link.as_str(),
            "https://sso.agc.gov.sg/Act/1985-revised/PC1871"
        );
        assert!(penal.has_pdf);
        // Placeholder first anchor, real subsidiary anchor second.
        assert_eq!(
            penal.subsidiary_index_link.as_ref().map(Url::as_str),
            Some("https://sso.agc.gov.sg/Act/PC1871?DocType=Act&ViewType=Sl&PageIndex=0&PageSize=500")
        );

        let weights = &listing.entries[1];
        assert_eq!(weights.shorthand, "WMA1975");
        assert!(!weights.has_pdf);
        assert!(weights.subsidiary_index_link.is_some());

        let interp = &listing.entries[2];
        assert_eq!(interp.shorthand, "IA1965");
        assert!(interp.subsidiary_index_link.is_none());

        assert_eq!(
            listing.next_page.as_ref().map(Url::as_str),
            Some("https://sso.agc.gov.sg/Browse/Act/Current/All?PageIndex=1&PageSize=500&SortBy=Title&SortOrder=ASC")
        );
    }

    #[test]
    fn malformed_row_is_row_parse_error() {
        let listing = parse_listing(&load_fixture("listing.html"), &listing_url()).unwrap();
        assert!(matches!(
            listing.skipped[0],
            SsoError::RowParse { row: 2, .. }
        ));
    }

    #[test]
    fn placeholder_title_link_skips_row() {
        let html = r##"<html><body><table class="table browse-list"><tbody>
            <tr>
              <td><a class="non-ajax" href="#">Penal Code 1871</a></td>
              <td><ul class="nav nav-pills">
                <li><a href="/Act/PC1871?DocType=Act&amp;ViewType=Sl">Subsidiary Legislation</a></li>
                <li><a href="/Act/PC1871/Pdf?Date=20240101">PDF</a></li>
              </ul></td>
            </tr>
        </tbody></table></body></html>"##;
        let listing = parse_listing(html, &listing_url()).unwrap();

        assert!(listing.entries.is_empty());
        match &listing.skipped[..] {
            [SsoError::RowParse { row: 0, reason, .. }] => assert!(reason.contains("missing link")),
            other => panic!("expected one skipped row, got {other:?}"),
        }
    }

    #[test]
    fn subsidiary_anchor_skips_placeholder_and_pdf() {
        assert_eq!(
            first_subsidiary_href(&["#", "/Act/X?ViewType=Sl"]),
            Some("/Act/X?ViewType=Sl")
        );
        assert_eq!(
            first_subsidiary_href(&["/Act/X/Pdf", "/Act/X?ViewType=Sl"]),
            Some("/Act/X?ViewType=Sl")
        );
        assert_eq!(first_subsidiary_href(&["#", "#"]), None);
    }

    #[test]
    fn self_referencing_next_link_is_ignored() {
        let html = r#"<html><body>
            <table class="table browse-list"><tbody></tbody></table>
            <a aria-label="Next Page" href="/list">Next</a>
        </body></html>"#;
        let url = Url::parse("https://sso.agc.gov.sg/list").unwrap();
        let listing = parse_listing(html, &url).unwrap();
        assert!(listing.next_page.is_none());
    }

    #[test]
    fn statute_page_title_and_pdf() {
        let link = Url::parse("https://sso.agc.gov.sg/Act/PC1871").unwrap();
        let entry = parse_statute_page(&load_fixture("statute_lazy.html"), link).unwrap();
        assert_eq!(entry.shorthand, "PC1871");
        assert_eq!(entry.title, "Penal Code 1871");
        assert!(entry.has_pdf);
    }

    fn listing_page(rows: &[(&str, &str)], next: Option<&str>) -> String {
        let rows: String = rows
            .iter()
            .map(|(title, href)| {
                format!(r#"<tr><td><a class="non-ajax" href="{href}">{title}</a></td></tr>"#)
            })
            .collect();
        let next = next
            .map(|href| format!(r#"<a aria-label="Next Page" href="{href}">Next</a>"#))
            .unwrap_or_default();
        format!(
            r#"<html><body><table class="table browse-list"><tbody>{rows}</tbody></table>{next}</body></html>"#
        )
    }

    #[tokio::test]
    async fn pagination_terminates_after_last_page() {
        let server = MockServer::start().await;

        let pages = [
            ("/list/1", listing_page(&[("A Act", "/Act/AA1")], Some("/list/2"))),
            ("/list/2", listing_page(&[("B Act", "/Act/BB2")], Some("/list/3"))),
            ("/list/3", listing_page(&[("C Act", "/Act/CC3")], None)),
        ];
        for (p, body) in pages {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .expect(1)
                .mount(&server)
                .await;
        }

        let fetcher = fetcher(&server.uri());
        let start = fetcher.base_url().join("/list/1").unwrap();
        let crawler = CatalogCrawler::new(fetcher, start);

        let (tx, mut rx) = mpsc::channel(16);
        let summary = crawler.crawl(tx, AbortSignal::new()).await;

        let mut shorthands = Vec::new();
        while let Some(entry) = rx.recv().await {
            shorthands.push(entry.shorthand);
        }

        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.entries_emitted, 3);
        assert!(summary.failures.is_empty());
        assert_eq!(shorthands, vec!["AA1", "BB2", "CC3"]);
    }

    #[tokio::test]
    async fn next_page_is_restartable() {
        let server = MockServer::start().await;
        Mock::given(path("/list/2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(listing_page(&[("B Act", "/Act/BB2")], None)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(&server.uri());
        let resume = fetcher.base_url().join("/list/2").unwrap();
        let mut crawler = CatalogCrawler::new(fetcher, resume.clone());
        assert_eq!(crawler.resume_url(), Some(&resume));

        let page = crawler.next_page().await.unwrap().unwrap();
        assert_eq!(page.entries[0].shorthand, "BB2");
        assert!(crawler.resume_url().is_none());
        assert!(crawler.next_page().await.is_none());
    }

    #[tokio::test]
    async fn failed_listing_page_is_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/list/1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server.uri());
        let start = fetcher.base_url().join("/list/1").unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let summary = CatalogCrawler::new(fetcher, start)
            .crawl(tx, AbortSignal::new())
            .await;

        assert_eq!(summary.pages_fetched, 0);
        assert_eq!(summary.failures.len(), 1);
        assert!(matches!(
            summary.failures[0],
            SsoError::Fetch { status: Some(503), .. }
        ));
    }

    #[tokio::test]
    async fn abort_stops_before_first_fetch() {
        let fetcher = fetcher("http://127.0.0.1:9");
        let start = fetcher.base_url().join("/list/1").unwrap();
        let abort = AbortSignal::new();
        abort.trigger();

        let (tx, _rx) = mpsc::channel(4);
        let summary = CatalogCrawler::new(fetcher, start).crawl(tx, abort).await;
        assert!(summary.aborted);
        assert_eq!(summary.pages_fetched, 0);
    }
}
