//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use sso_core::{
    AutoAccept, CallbackPolicy, ConfirmationPolicy, DestinationPrompt, ProgressReporter,
    RunSummary, Runner,
};
use sso_shared::{
    AppConfig, DocumentKind, FetchConfig, Retrieve, RunConfig, SsoError, init_config, load_config,
};
use tracing::{info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sso-scrape: download current statutes as complete HTML documents.
#[derive(Parser)]
#[command(
    name = "sso-scrape",
    version,
    about = "Retrieve current Acts and their subsidiary legislation as self-contained HTML files.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Retrieve one Act by shorthand, or every current Act with ALL.
    Retrieve {
        /// Act shorthand (e.g. PC1871) or ALL.
        #[arg(default_value = "ALL")]
        target: Retrieve,

        /// Also retrieve each Act's subsidiary legislation.
        #[arg(long = "sl")]
        include_subsidiary: bool,

        /// Report PDF availability (downloads are not performed).
        #[arg(long)]
        pdf: bool,

        /// Point-in-time date, YYYYMMDD. Reserved; current versions are retrieved.
        #[arg(long)]
        date: Option<String>,

        /// Destination folder (defaults to the configured save_to).
        #[arg(long)]
        save_to: Option<PathBuf>,

        /// Proceed without asking about the destination folder.
        #[arg(short, long)]
        yes: bool,

        /// Documents assembled concurrently.
        #[arg(long)]
        concurrency: Option<u32>,

        /// Alternative site origin.
        #[arg(long, env = "SSO_BASE_URL")]
        base_url: Option<String>,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Options for `retrieve`, gathered from flags.
struct RetrieveArgs {
    target: Retrieve,
    include_subsidiary: bool,
    pdf: bool,
    date: Option<String>,
    save_to: Option<PathBuf>,
    yes: bool,
    concurrency: Option<u32>,
    base_url: Option<String>,
    json: bool,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sso=info",
        1 => "sso=debug",
        _ => "sso=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Retrieve {
            target,
            include_subsidiary,
            pdf,
            date,
            save_to,
            yes,
            concurrency,
            base_url,
            json,
        } => {
            cmd_retrieve(RetrieveArgs {
                target,
                include_subsidiary,
                pdf,
                date,
                save_to,
                yes,
                concurrency,
                base_url,
                json,
            })
            .await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_retrieve(args: RetrieveArgs) -> Result<()> {
    let mut config = load_config()?;
    if let Some(concurrency) = args.concurrency {
        config.defaults.document_concurrency = concurrency;
    }
    if let Some(base_url) = &args.base_url {
        Url::parse(base_url).map_err(|e| eyre!("invalid base URL '{base_url}': {e}"))?;
        config.site.base_url = base_url.clone();
    }

    let run_config = build_run_config(&args, &config)?;
    let fetch_config = FetchConfig::try_from(&config)?;

    info!(
        retrieve = %run_config.retrieve,
        subsidiary = run_config.include_subsidiary,
        save_to = %run_config.save_to.display(),
        "starting retrieval"
    );

    let progress = Arc::new(CliProgress::new());
    let runner = Runner::new(fetch_config)?.with_progress(progress.clone());

    let abort = runner.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight documents");
            abort.trigger();
        }
    });

    let policy: Box<dyn ConfirmationPolicy> = if args.yes {
        Box::new(AutoAccept)
    } else {
        let spinner = progress.clone();
        Box::new(CallbackPolicy::new(move |prompt: &DestinationPrompt<'_>| {
            spinner.suspend(|| ask(prompt))
        }))
    };

    let summary = match runner.run(&run_config, policy.as_ref()).await {
        Ok(summary) => summary,
        Err(SsoError::UserAbort(reason)) => {
            progress.finish();
            println!("Aborted: {reason}");
            return Ok(());
        }
        Err(e) => {
            progress.finish();
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &run_config);
    }

    Ok(())
}

fn build_run_config(args: &RetrieveArgs, config: &AppConfig) -> Result<RunConfig> {
    let mut run_config = RunConfig::new(args.target.clone(), config);
    run_config.include_subsidiary = args.include_subsidiary;
    run_config.include_pdf = args.pdf;
    if let Some(date) = &args.date {
        chrono::NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|e| eyre!("invalid date '{date}', expected YYYYMMDD: {e}"))?;
        run_config.date = date.clone();
    }
    if let Some(save_to) = &args.save_to {
        run_config.save_to = save_to.clone();
    }
    Ok(run_config)
}

/// Ask on the terminal; anything but y/yes declines.
fn ask(prompt: &DestinationPrompt<'_>) -> bool {
    print!("{prompt} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn print_summary(summary: &RunSummary, run_config: &RunConfig) {
    println!();
    if summary.aborted {
        println!("  Run interrupted; partial results kept.");
    } else {
        println!("  Retrieval complete.");
    }
    println!("  Statutes:      {}", summary.statutes_written);
    if run_config.include_subsidiary {
        println!("  Subsidiary:    {}", summary.subsidiaries_written);
    }
    if summary.duplicates_skipped > 0 {
        println!("  Duplicates:    {}", summary.duplicates_skipped);
    }
    if summary.skipped_rows > 0 {
        println!("  Skipped rows:  {}", summary.skipped_rows);
    }
    if summary.degraded_fragments > 0 {
        println!("  Gaps:          {} fragment(s) missing", summary.degraded_fragments);
    }
    if run_config.include_pdf {
        println!("  PDF available: {} (not downloaded)", summary.pdf_available);
    }
    println!("  Path:          {}", run_config.save_to.display());
    println!(
        "  Time:          {:.1}s",
        summary.elapsed_ms as f64 / 1000.0
    );
    if !summary.failures.is_empty() {
        println!();
        println!("  Failed ({}):", summary.failures.len());
        for failure in &summary.failures {
            println!("    {}: {}", failure.item, failure.error);
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    /// Hide the spinner while `f` talks to the terminal.
    fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.spinner.suspend(f)
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_fetched(&self, shorthand: &str, _kind: DocumentKind) {
        self.spinner.set_message(format!("Assembled {shorthand}"));
    }

    fn document_written(&self, shorthand: &str, kind: DocumentKind, _written: usize) {
        let label = match kind {
            DocumentKind::Statute => "statute",
            DocumentKind::Subsidiary => "subsidiary",
        };
        self.spinner.set_message(format!("Saved {label} {shorthand}"));
    }

    fn item_failed(&self, item: &str, error: &SsoError) {
        self.spinner.suspend(|| eprintln!("  failed {item}: {error}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.finish();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
