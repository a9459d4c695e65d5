//! End-to-end retrieval run: destination → catalog → assemble → subsidiaries → sink.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};
use url::Url;

use sso_crawler::{
    AbortSignal, Assembly, AssemblyWarning, CatalogCrawler, ContentRoot, DocumentAssembler,
    Fetcher, SubsidiaryResolver, parse_statute_page,
};
use sso_shared::{
    AssembledDocument, CatalogEntry, DocumentKind, FetchConfig, Result, Retrieve, RunConfig,
    SsoError, sanitize_shorthand, site,
};

use crate::destination::{ConfirmationPolicy, DirectorySink, DocumentSink, prepare_destination};

/// Catalog entries buffered between the crawler and the document workers.
const CATALOG_CHANNEL_CAPACITY: usize = 64;

/// An item that could not be retrieved, kept for the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    /// Shorthand, or a description such as `"PC1871 subsidiary index"`.
    pub item: String,
    pub error: String,
}

impl FailedItem {
    fn new(item: impl Into<String>, error: &SsoError) -> Self {
        Self {
            item: item.into(),
            error: error.to_string(),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub statutes_written: usize,
    pub subsidiaries_written: usize,
    /// Documents whose shorthand had already been written in this run.
    pub duplicates_skipped: usize,
    /// Catalog rows that could not be parsed.
    pub skipped_rows: usize,
    /// Fragments left empty in otherwise written documents.
    pub degraded_fragments: usize,
    /// Documents whose fragments were appended because no insertion marker was found.
    pub missing_markers: usize,
    /// Statutes advertising a PDF download.
    pub pdf_available: usize,
    pub catalog_pages: usize,
    pub failures: Vec<FailedItem>,
    pub aborted: bool,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn documents_written(&self) -> usize {
        self.statutes_written + self.subsidiaries_written
    }

    fn absorb(&mut self, report: ItemReport) {
        self.statutes_written += report.statutes_written;
        self.subsidiaries_written += report.subsidiaries_written;
        self.duplicates_skipped += report.duplicates_skipped;
        self.degraded_fragments += report.degraded_fragments;
        self.missing_markers += report.missing_markers;
        self.failures.extend(report.failures);
    }

    fn absorb_joined(&mut self, joined: std::result::Result<ItemReport, JoinError>) {
        match joined {
            Ok(report) => self.absorb(report),
            Err(e) => {
                warn!(error = %e, "document task panicked or was cancelled");
                self.failures.push(FailedItem {
                    item: "document task".into(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a document page has been fetched and assembled.
    fn document_fetched(&self, shorthand: &str, kind: DocumentKind);
    /// Called when a document has been written.
    fn document_written(&self, shorthand: &str, kind: DocumentKind, written: usize);
    /// Called when an item is given up on.
    fn item_failed(&self, item: &str, error: &SsoError);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_fetched(&self, _shorthand: &str, _kind: DocumentKind) {}
    fn document_written(&self, _shorthand: &str, _kind: DocumentKind, _written: usize) {}
    fn item_failed(&self, _item: &str, _error: &SsoError) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Drives one retrieval run.
pub struct Runner {
    fetch: FetchConfig,
    fetcher: Fetcher,
    sink: Option<Arc<dyn DocumentSink>>,
    progress: Arc<dyn ProgressReporter>,
    abort: AbortSignal,
}

impl Runner {
    /// Fails only when the HTTP client cannot be built from `fetch`.
    pub fn new(fetch: FetchConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&fetch)?;
        Ok(Self {
            fetch,
            fetcher,
            sink: None,
            progress: Arc::new(SilentProgress),
            abort: AbortSignal::new(),
        })
    }

    /// Send documents somewhere other than `RunConfig::save_to`.
    pub fn with_sink(mut self, sink: Arc<dyn DocumentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// The client every request of a run goes through.
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Handle that stops the run from dispatching further fetches.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Execute a run.
    ///
    /// Only destination refusal and invalid configuration fail the run as a
    /// whole; every per-document problem lands in [`RunSummary::failures`].
    #[instrument(skip_all, fields(retrieve = %config.retrieve))]
    pub async fn run(
        &self,
        config: &RunConfig,
        policy: &dyn ConfirmationPolicy,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        self.progress.phase("Checking destination");
        prepare_destination(&config.save_to, policy)?;
        debug!(date = %config.date, "point-in-time date is reserved; current versions are retrieved");

        let fetcher = self.fetcher.clone();
        let assembler = DocumentAssembler::new(fetcher.clone(), self.fetch.fragment_concurrency);
        let sink: Arc<dyn DocumentSink> = match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(DirectorySink::new(&config.save_to)),
        };

        let ctx = Arc::new(RunContext {
            subsidiaries: SubsidiaryResolver::new(assembler.clone()),
            assembler,
            sink,
            progress: Arc::clone(&self.progress),
            abort: self.abort.clone(),
            include_subsidiary: config.include_subsidiary,
            written: Mutex::new(HashSet::new()),
        });

        let mut summary = match &config.retrieve {
            Retrieve::One(shorthand) => self.run_one(&ctx, &fetcher, shorthand).await?,
            Retrieve::All => self.run_all(&ctx, &fetcher).await?,
        };

        summary.aborted |= self.abort.is_triggered();
        summary.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if config.include_pdf && summary.pdf_available > 0 {
            warn!(
                available = summary.pdf_available,
                "PDF retrieval is not supported; availability is reported only"
            );
        }

        info!(
            statutes = summary.statutes_written,
            subsidiaries = summary.subsidiaries_written,
            duplicates = summary.duplicates_skipped,
            skipped_rows = summary.skipped_rows,
            degraded_fragments = summary.degraded_fragments,
            failures = summary.failures.len(),
            aborted = summary.aborted,
            elapsed_ms = summary.elapsed_ms,
            "run complete"
        );

        self.progress.done(&summary);
        Ok(summary)
    }

    async fn run_one(
        &self,
        ctx: &Arc<RunContext>,
        fetcher: &Fetcher,
        shorthand: &str,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let base = fetcher.base_url();
        let url = site::act_url(base, shorthand)?;

        self.progress.phase("Fetching statute");
        let html = match fetcher.get_page(&url).await {
            Ok(html) => html,
            Err(e) => {
                ctx.fail_into(&mut summary.failures, shorthand, &e);
                return Ok(summary);
            }
        };

        let mut entry = match parse_statute_page(&html, url) {
            Ok(entry) => entry,
            Err(e) => {
                ctx.fail_into(&mut summary.failures, shorthand, &e);
                return Ok(summary);
            }
        };
        if ctx.include_subsidiary {
            let index = site::subsidiary_index_url(base, shorthand, self.fetch.listing_page_size)?;
            entry = entry.with_subsidiary_index(Some(index));
        }
        if entry.has_pdf {
            summary.pdf_available += 1;
        }

        self.progress.phase("Assembling");
        let report = process_statute(Arc::clone(ctx), entry, Some(html)).await;
        summary.absorb(report);
        Ok(summary)
    }

    async fn run_all(&self, ctx: &Arc<RunContext>, fetcher: &Fetcher) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let start_url = site::listing_url(fetcher.base_url(), self.fetch.listing_page_size)?;

        self.progress.phase("Crawling catalog");
        let (tx, mut rx) = mpsc::channel(CATALOG_CHANNEL_CAPACITY);
        let crawler = CatalogCrawler::new(fetcher.clone(), start_url);
        let crawl = tokio::spawn(crawler.crawl(tx, self.abort.clone()));

        let permits = Arc::new(Semaphore::new(self.fetch.document_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut dispatched = HashSet::new();

        while let Some(entry) = rx.recv().await {
            if self.abort.is_triggered() {
                info!("abort requested, no further documents dispatched");
                break;
            }
            if !dispatched.insert(entry.shorthand.clone()) {
                warn!(shorthand = %entry.shorthand, "duplicate shorthand in catalog, skipping");
                summary.duplicates_skipped += 1;
                continue;
            }
            if entry.has_pdf {
                summary.pdf_available += 1;
            }

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let ctx = Arc::clone(ctx);
            tasks.spawn(async move {
                let _permit = permit;
                process_statute(ctx, entry, None).await
            });

            while let Some(joined) = tasks.try_join_next() {
                summary.absorb_joined(joined);
            }
        }
        drop(rx);

        while let Some(joined) = tasks.join_next().await {
            summary.absorb_joined(joined);
        }

        match crawl.await {
            Ok(catalog) => {
                summary.catalog_pages = catalog.pages_fetched;
                summary.skipped_rows += catalog.skipped_rows;
                summary.aborted |= catalog.aborted;
                summary.failures.extend(
                    catalog
                        .failures
                        .iter()
                        .map(|e| FailedItem::new("catalog page", e)),
                );
            }
            Err(e) => {
                warn!(error = %e, "catalog task panicked or was cancelled");
                summary.failures.push(FailedItem {
                    item: "catalog crawl".into(),
                    error: e.to_string(),
                });
            }
        }

        Ok(summary)
    }
}

/// Per-run state shared by document tasks.
struct RunContext {
    assembler: DocumentAssembler,
    subsidiaries: SubsidiaryResolver,
    sink: Arc<dyn DocumentSink>,
    progress: Arc<dyn ProgressReporter>,
    abort: AbortSignal,
    include_subsidiary: bool,
    written: Mutex<HashSet<String>>,
}

impl RunContext {
    /// Reserve an output name; false if it was already taken this run.
    fn claim(&self, shorthand: &str) -> bool {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sanitize_shorthand(shorthand))
    }

    fn fail_into(&self, failures: &mut Vec<FailedItem>, item: &str, error: &SsoError) {
        warn!(item, error = %error, "item failed");
        self.progress.item_failed(item, error);
        failures.push(FailedItem::new(item, error));
    }

    fn store(&self, document: AssembledDocument, report: &mut ItemReport) {
        if !self.claim(&document.shorthand) {
            warn!(shorthand = %document.shorthand, "shorthand already written this run, skipping");
            report.duplicates_skipped += 1;
            return;
        }

        match self.sink.write(&document) {
            Ok(path) => {
                debug!(shorthand = %document.shorthand, path = %path.display(), "written");
                let written = match document.kind {
                    DocumentKind::Statute => {
                        report.statutes_written += 1;
                        report.statutes_written
                    }
                    DocumentKind::Subsidiary => {
                        report.subsidiaries_written += 1;
                        report.subsidiaries_written
                    }
                };
                self.progress
                    .document_written(&document.shorthand, document.kind, written);
            }
            Err(e) => self.fail_into(&mut report.failures, &document.shorthand, &e),
        }
    }
}

/// What one statute task (and its subsidiaries) contributed.
#[derive(Default)]
struct ItemReport {
    statutes_written: usize,
    subsidiaries_written: usize,
    duplicates_skipped: usize,
    degraded_fragments: usize,
    missing_markers: usize,
    failures: Vec<FailedItem>,
}

impl ItemReport {
    fn note(&mut self, shorthand: &str, assembly: &Assembly) {
        for warning in &assembly.warnings {
            debug!(shorthand, %warning, "document assembled with a gap");
            if matches!(warning, AssemblyWarning::MarkerMissing) {
                self.missing_markers += 1;
            }
        }
        self.degraded_fragments += assembly.degraded_fragments();
    }
}

/// Assemble and store one statute, then its subsidiaries if requested.
///
/// `page` is the statute page when it has already been fetched.
async fn process_statute(
    ctx: Arc<RunContext>,
    entry: CatalogEntry,
    page: Option<String>,
) -> ItemReport {
    let mut report = ItemReport::default();
    if ctx.abort.is_triggered() {
        return report;
    }

    let assembled = match page {
        Some(html) => {
            ctx.assembler
                .assemble_page(&html, ContentRoot::Statute, &entry.shorthand)
                .await
        }
        None => {
            ctx.assembler
                .fetch_document(&entry.canonical_link, ContentRoot::Statute)
                .await
        }
    };
    let assembly = match assembled {
        Ok(assembly) => assembly,
        Err(e) => {
            ctx.fail_into(&mut report.failures, &entry.shorthand, &e);
            return report;
        }
    };

    ctx.progress
        .document_fetched(&entry.shorthand, DocumentKind::Statute);
    report.note(&entry.shorthand, &assembly);

    ctx.store(
        AssembledDocument {
            kind: DocumentKind::Statute,
            shorthand: entry.shorthand.clone(),
            title: entry.title.clone(),
            html: assembly.html,
            subsidiary_link: entry.subsidiary_index_link.as_ref().map(Url::to_string),
        },
        &mut report,
    );

    if ctx.include_subsidiary {
        if let Some(index) = &entry.subsidiary_index_link {
            expand_subsidiaries(&ctx, &entry.shorthand, index, &mut report).await;
        }
    }

    report
}

async fn expand_subsidiaries(
    ctx: &RunContext,
    parent: &str,
    index: &Url,
    report: &mut ItemReport,
) {
    let rows = match ctx.subsidiaries.fetch_index(index).await {
        Ok(rows) => rows,
        Err(e) => {
            ctx.fail_into(&mut report.failures, &format!("{parent} subsidiary index"), &e);
            return;
        }
    };

    for row in rows {
        if ctx.abort.is_triggered() {
            debug!(parent, "abort requested, remaining subsidiaries skipped");
            return;
        }

        let entry = match row {
            Ok(entry) => entry,
            Err(e) => {
                ctx.fail_into(&mut report.failures, &format!("{parent} subsidiary row"), &e);
                continue;
            }
        };

        match ctx.subsidiaries.fetch_subsidiary_document(&entry, index).await {
            Ok((document, assembly)) => {
                ctx.progress
                    .document_fetched(&document.shorthand, DocumentKind::Subsidiary);
                report.note(&document.shorthand, &assembly);
                ctx.store(document, report);
            }
            Err(e) => ctx.fail_into(&mut report.failures, &entry.shorthand, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::destination::{AutoAccept, AutoReject};
    use sso_shared::AppConfig;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use uuid::Uuid;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_INDEX: &str =
        "<html><body><table class=\"browse-list\"><tbody></tbody></table></body></html>";

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sso-run-{label}-{}", Uuid::now_v7()))
    }

    fn fetch_config(server: &MockServer) -> FetchConfig {
        let mut config = FetchConfig::try_from(&AppConfig::default()).unwrap();
        config.timeout = Duration::from_secs(5);
        config.with_base_url(Url::parse(&server.uri()).unwrap())
    }

    fn run_config(retrieve: Retrieve, save_to: &PathBuf, include_subsidiary: bool) -> RunConfig {
        let mut config = RunConfig::new(retrieve, &AppConfig::default());
        config.save_to = save_to.clone();
        config.include_subsidiary = include_subsidiary;
        config
    }

    async fn mount_html(server: &MockServer, at: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_fragment(server: &MockServer, series: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/Details/GetLazyLoadContent"))
            .and(query_param("SeriesId", series))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    #[derive(Default)]
    struct CountingProgress {
        written: AtomicUsize,
        failed: AtomicUsize,
    }

    impl ProgressReporter for CountingProgress {
        fn phase(&self, _name: &str) {}
        fn document_fetched(&self, _shorthand: &str, _kind: DocumentKind) {}
        fn document_written(&self, _shorthand: &str, _kind: DocumentKind, _written: usize) {
            self.written.fetch_add(1, Ordering::SeqCst);
        }
        fn item_failed(&self, _item: &str, _error: &SsoError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _summary: &RunSummary) {}
    }

    #[tokio::test]
    async fn declined_destination_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = temp_dir("declined");
        let runner = Runner::new(fetch_config(&server)).unwrap();
        let err = runner
            .run(&run_config(Retrieve::All, &dir, true), &AutoReject)
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::UserAbort(_)));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn single_statute_with_degraded_fragment() {
        let server = MockServer::start().await;
        mount_html(&server, "/Act/PC1871", load_fixture("statute_lazy.html")).await;
        mount_fragment(&server, "s1", 200, "<p>one</p>").await;
        mount_fragment(&server, "s2", 500, "boom").await;
        mount_fragment(&server, "s3", 200, "<p>three</p>").await;

        let dir = temp_dir("one");
        let progress = Arc::new(CountingProgress::default());
        let runner = Runner::new(fetch_config(&server))
            .unwrap()
            .with_progress(progress.clone());
        let summary = runner
            .run(&run_config(Retrieve::One("PC1871".into()), &dir, false), &AutoAccept)
            .await
            .unwrap();

        assert_eq!(summary.statutes_written, 1);
        assert_eq!(summary.degraded_fragments, 1);
        assert!(summary.failures.is_empty(), "{:?}", summary.failures);
        assert_eq!(summary.pdf_available, 1);
        assert_eq!(progress.written.load(Ordering::SeqCst), 1);

        let html = std::fs::read_to_string(dir.join("PC1871.html")).unwrap();
        assert!(!html.starts_with("Subsidiary Legislation Link"));
        let one = html.find("<p>one</p>").unwrap();
        let three = html.find("<p>three</p>").unwrap();
        assert!(one < three);
        assert!(!html.contains("boom"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Counts WARN events emitted by the workspace crates.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            if *meta.level() == Level::WARN && meta.target().starts_with("sso_") {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn run_counting_warnings(runner: &Runner, config: &RunConfig) -> (RunSummary, usize) {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));
        let _guard = tracing::subscriber::set_default(subscriber);
        let summary = runner.run(config, &AutoAccept).await.unwrap();
        (summary, warnings.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn failed_fragment_warns_once() {
        let server = MockServer::start().await;
        mount_html(&server, "/Act/PC1871", load_fixture("statute_lazy.html")).await;
        mount_fragment(&server, "s1", 200, "<p>one</p>").await;
        mount_fragment(&server, "s2", 500, "boom").await;
        mount_fragment(&server, "s3", 200, "<p>three</p>").await;

        let dir = temp_dir("warn-once");
        let runner = Runner::new(fetch_config(&server)).unwrap();
        let config = run_config(Retrieve::One("PC1871".into()), &dir, false);
        let (summary, warnings) = run_counting_warnings(&runner, &config).await;

        assert_eq!(summary.degraded_fragments, 1);
        assert!(summary.failures.is_empty());
        assert_eq!(warnings, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_marker_warns_once() {
        let server = MockServer::start().await;
        // The marker sits outside the provision blocks, so the kept HTML has none.
        let page = r#"<html><body>
            <div class="global-vars" data-json='{"tocSysId":"t1","fragments":{"s1":{"Item1":"f1","Item2":"d1"}}}'></div>
            <div class="legis-title"><div>Marker Act</div></div>
            <div class="prov1">body</div>
            <div class="dms" data-term="s1"></div>
        </body></html>"#;
        mount_html(&server, "/Act/MA2000", page.to_string()).await;
        mount_fragment(&server, "s1", 200, "<p>late</p>").await;

        let dir = temp_dir("marker");
        let runner = Runner::new(fetch_config(&server)).unwrap();
        let config = run_config(Retrieve::One("MA2000".into()), &dir, false);
        let (summary, warnings) = run_counting_warnings(&runner, &config).await;

        assert_eq!(summary.statutes_written, 1);
        assert_eq!(summary.missing_markers, 1);
        assert_eq!(warnings, 1);
        let html = std::fs::read_to_string(dir.join("MA2000.html")).unwrap();
        assert!(html.ends_with("<p>late</p>"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn document_concurrency_is_bounded() {
        let server = MockServer::start().await;
        let rows: String = (1..=6)
            .map(|i| {
                format!(r#"<tr><td><a class="non-ajax" href="/Act/CA{i}">Act {i}</a></td></tr>"#)
            })
            .collect();
        let listing = format!(
            r#"<html><body><table class="table browse-list"><tbody>{rows}</tbody></table></body></html>"#
        );
        mount_html(&server, "/Browse/Act/Current/All", listing).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/Act/CA\d$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(load_fixture("statute_inline.html"))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(6)
            .mount(&server)
            .await;

        let mut fetch = fetch_config(&server);
        fetch.document_concurrency = 2;
        let runner = Runner::new(fetch).unwrap();

        let watched = runner.fetcher().clone();
        let finished = Arc::new(AtomicBool::new(false));
        let sampler = tokio::spawn({
            let finished = Arc::clone(&finished);
            async move {
                let mut peak = 0;
                while !finished.load(Ordering::SeqCst) {
                    peak = peak.max(watched.in_flight());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                peak
            }
        });

        let dir = temp_dir("bounded");
        let summary = runner
            .run(&run_config(Retrieve::All, &dir, false), &AutoAccept)
            .await
            .unwrap();
        finished.store(true, Ordering::SeqCst);
        let peak = sampler.await.unwrap();

        assert_eq!(summary.statutes_written, 6);
        assert_eq!(peak, 2, "at most two statute pages in flight");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn single_statute_missing_is_item_failure() {
        let server = MockServer::start().await;
        Mock::given(path("/Act/NOPE1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = temp_dir("missing");
        let summary = Runner::new(fetch_config(&server))
            .unwrap()
            .run(&run_config(Retrieve::One("NOPE1".into()), &dir, false), &AutoAccept)
            .await
            .unwrap();

        assert_eq!(summary.documents_written(), 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].item, "NOPE1");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn all_mode_with_subsidiaries() {
        let server = MockServer::start().await;

        // Second listing page: no rows, no next link.
        Mock::given(method("GET"))
            .and(path("/Browse/Act/Current/All"))
            .and(query_param("PageIndex", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_INDEX))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Browse/Act/Current/All"))
            .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("listing.html")))
            .expect(1)
            .mount(&server)
            .await;

        mount_html(&server, "/Act/1985-revised/PC1871", load_fixture("statute_lazy.html")).await;
        for series in ["s1", "s2", "s3"] {
            mount_fragment(&server, series, 200, &format!("<p>{series}</p>")).await;
        }
        mount_fragment(&server, "sl1", 200, "<p>Schedule</p>").await;

        mount_html(&server, "/Act/PC1871", load_fixture("subsidiary_index.html")).await;
        mount_html(&server, "/SL/WMA1975-S5-2020", load_fixture("subsidiary_doc.html")).await;
        mount_html(&server, "/SL/WMA1975-RG1", load_fixture("subsidiary_doc.html")).await;

        Mock::given(method("GET"))
            .and(path("/Act/WMA1975"))
            .and(query_param("ViewType", "Sl"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_INDEX))
            .mount(&server)
            .await;
        mount_html(&server, "/Act/WMA1975", load_fixture("statute_inline.html")).await;
        mount_html(&server, "/Act/IA1965", load_fixture("statute_inline.html")).await;

        let dir = temp_dir("all");
        let summary = Runner::new(fetch_config(&server))
            .unwrap()
            .run(&run_config(Retrieve::All, &dir, true), &AutoAccept)
            .await
            .unwrap();

        assert_eq!(summary.catalog_pages, 2);
        assert_eq!(summary.statutes_written, 3);
        assert_eq!(summary.subsidiaries_written, 2);
        assert_eq!(summary.skipped_rows, 1);
        assert_eq!(summary.pdf_available, 1);
        assert_eq!(summary.degraded_fragments, 0);
        assert!(!summary.aborted);
        // The index row without an order number.
        assert_eq!(summary.failures.len(), 1, "{:?}", summary.failures);
        assert_eq!(summary.failures[0].item, "PC1871 subsidiary row");

        let penal = std::fs::read_to_string(dir.join("PC1871.html")).unwrap();
        let expected_link = format!(
            "Subsidiary Legislation Link: {}/Act/PC1871?DocType=Act&ViewType=Sl&PageIndex=0&PageSize=500\n",
            server.uri()
        );
        assert!(penal.starts_with(&expected_link));
        assert!(penal.contains("<p>s1</p><p>s2</p><p>s3</p><div class=\"dms\""));

        let interpretation = std::fs::read_to_string(dir.join("IA1965.html")).unwrap();
        assert!(interpretation.contains("Interpretation Act"));
        assert!(dir.join("Weights and Measures 5-2020.html").exists());
        assert!(
            dir.join("Weights and Measures (Fees) Regulations G.N. No. S 12-1999.html")
                .exists()
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn aborted_run_dispatches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("listing.html")))
            .expect(0)
            .mount(&server)
            .await;

        let dir = temp_dir("abort");
        let runner = Runner::new(fetch_config(&server)).unwrap();
        runner.abort_signal().trigger();
        let summary = runner
            .run(&run_config(Retrieve::All, &dir, false), &AutoAccept)
            .await
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.documents_written(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_claims_are_refused() {
        struct NullSink;
        impl DocumentSink for NullSink {
            fn write(&self, _document: &AssembledDocument) -> Result<PathBuf> {
                Ok(PathBuf::from("/dev/null"))
            }
        }

        let fetch = FetchConfig::try_from(&AppConfig::default()).unwrap();
        let fetcher = Fetcher::new(&fetch).unwrap();
        let assembler = DocumentAssembler::new(fetcher, 1);
        let ctx = RunContext {
            subsidiaries: SubsidiaryResolver::new(assembler.clone()),
            assembler,
            sink: Arc::new(NullSink),
            progress: Arc::new(SilentProgress),
            abort: AbortSignal::new(),
            include_subsidiary: false,
            written: Mutex::new(HashSet::new()),
        };

        let doc = AssembledDocument {
            kind: DocumentKind::Statute,
            shorthand: "PC1871".into(),
            title: "Penal Code 1871".into(),
            html: String::new(),
            subsidiary_link: None,
        };
        let mut report = ItemReport::default();
        ctx.store(doc.clone(), &mut report);
        ctx.store(doc, &mut report);
        assert_eq!(report.statutes_written, 1);
        assert_eq!(report.duplicates_skipped, 1);
    }
}
