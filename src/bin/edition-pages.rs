//! CLI binary for edition-pages.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one operation and prints its tally.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edition_pages::{
    create_pool, AuditOptions, AuditReport, Auditor, BacklogReport, BacklogScanner,
    BatchProgressCallback, EditionLocks, Ingestor, PipelineConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders a bar over the editions of a batch run, with one log line per
/// finished edition. Editions may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}/{len} editions  {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(100));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
    }

    fn on_edition_start(&self, edition_id: i64) {
        self.bar.set_message(format!("edition {edition_id}"));
    }

    fn on_edition_complete(&self, edition_id: i64, pages: usize) {
        self.bar.println(format!(
            "  {} Edition {:>6}  {}",
            green("✓"),
            edition_id,
            dim(&format!("{pages} pages")),
        ));
        self.bar.inc(1);
    }

    fn on_edition_error(&self, edition_id: i64, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or(error);
        let msg = if first_line.chars().count() > 90 {
            let cut: String = first_line.chars().take(89).collect();
            format!("{cut}\u{2026}")
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} Edition {:>6}  {}",
            red("✗"),
            edition_id,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!(
                "{} {} editions processed",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} editions processed  ({} failed)",
                if succeeded == 0 { red("✘") } else { yellow("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one edition now
  edition-pages process 42

  # Convert everything that has a PDF but no pages yet
  edition-pages --web-root /var/www/html backlog

  # List what the backlog would pick up
  edition-pages pending

  # Fix paths and counts, re-run broken editions, every 10 minutes
  edition-pages audit --reprocess --every 600

  # Homepage readiness as JSON
  edition-pages --json ready

ENVIRONMENT VARIABLES:
  EDITION_DATABASE_URL     sqlx SQLite URL (default sqlite:./editions.db)
  EDITION_WEB_ROOT         Public web root that contains uploads/
  EDITION_RASTERIZER_PATH  Ghostscript executable, skips discovery
  RUST_LOG                 Overrides the log filter

CONCURRENT RUNS:
  Separate invocations may share one database. Each edition is claimed in
  the edition_claims table while it is written; a second process touching
  the same edition fails with a "busy" error for that edition and moves on.
  Claims left by a killed process expire after the worst-case conversion
  time (tier timeout x tiers) plus two minutes.

RASTERISER:
  Ghostscript (gs, gswin64c) must be installed. Each edition is tried at
  premium (300 dpi), then high (250 dpi), then standard (200 dpi JPEG).
"#;

/// Convert uploaded PDF editions to page images and keep them consistent.
#[derive(Parser, Debug)]
#[command(
    name = "edition-pages",
    version,
    about = "Convert PDF editions to page images and audit their consistency",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// sqlx SQLite connection URL.
    #[arg(long, global = true, env = "EDITION_DATABASE_URL", default_value = "sqlite:./editions.db")]
    database_url: String,

    /// Public web root; canonical `uploads/...` paths resolve against it.
    #[arg(long, global = true, env = "EDITION_WEB_ROOT", default_value = ".")]
    web_root: PathBuf,

    /// Name of the per-edition output directory beside the source PDF.
    #[arg(long, global = true, env = "EDITION_PAGES_DIR", default_value = "pages")]
    pages_dir: String,

    /// Hard timeout for one quality tier, in seconds.
    #[arg(long, global = true, env = "EDITION_TIER_TIMEOUT", default_value_t = 180)]
    tier_timeout: u64,

    /// Editions converted at once during backlog runs.
    #[arg(short, long, global = true, env = "EDITION_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Ghostscript executable. Discovered automatically when unset.
    #[arg(long, global = true, env = "EDITION_RASTERIZER_PATH")]
    rasterizer: Option<PathBuf>,

    /// Print the structured result as JSON on stdout.
    #[arg(long, global = true, env = "EDITION_JSON")]
    json: bool,

    /// Exit non-zero when any edition failed or an unrepaired defect is left.
    #[arg(long, global = true, env = "EDITION_STRICT")]
    strict: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "EDITION_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EDITION_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, global = true, env = "EDITION_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Convert one edition and replace its pages.
    Process {
        /// Edition id.
        edition_id: i64,
    },
    /// Convert every edition that has a document but no pages.
    Backlog,
    /// List the editions the backlog would convert.
    Pending,
    /// Rewrite non-canonical paths, report missing files, fix page counts.
    Audit {
        /// Report only; change nothing.
        #[arg(long, conflicts_with = "reprocess")]
        dry_run: bool,

        /// Re-convert editions that have no pages or missing files.
        #[arg(long)]
        reprocess: bool,

        /// Repeat the audit every N seconds until interrupted.
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        every: Option<u64>,
    },
    /// Report homepage readiness of every live edition.
    Ready,
}

impl Command {
    fn shows_progress(&self) -> bool {
        matches!(
            self,
            Command::Backlog
                | Command::Audit {
                    reprocess: true,
                    ..
                }
        )
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && cli.command.shows_progress();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let pool = create_pool(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    let locks = EditionLocks::new();
    let ingestor = || -> Result<Ingestor> {
        Ingestor::from_config(pool.clone(), &config, locks.clone())
            .context("Cannot start the rasteriser")
    };
    let scanner = || -> Result<BacklogScanner> {
        Ok(BacklogScanner::from_config(ingestor()?, &config))
    };

    let clean = match cli.command.clone() {
        Command::Process { edition_id } => {
            let ingestor = ingestor()?;
            let done = ingestor
                .process_edition(edition_id)
                .await
                .with_context(|| format!("Processing edition {edition_id} failed"))?;
            if cli.json {
                print_json(&done)?;
            } else if !cli.quiet {
                eprintln!(
                    "{} Edition {}: {} pages via '{}' in {}ms",
                    green("✔"),
                    done.edition_id,
                    bold(&done.pages.len().to_string()),
                    done.profile,
                    done.duration_ms
                );
            }
            true
        }
        Command::Backlog => {
            let report = scanner()?
                .run_backlog()
                .await
                .context("Backlog run failed")?;
            if cli.json {
                print_json(&report)?;
            } else if !cli.quiet && !show_progress {
                print_backlog(&report);
            }
            report.failed == 0
        }
        Command::Pending => {
            let ids = edition_pages::EditionRepository::new(&pool)
                .find_unprocessed()
                .await
                .context("Failed to list unprocessed editions")?;
            if cli.json {
                print_json(&ids)?;
            } else {
                for id in &ids {
                    println!("{id}");
                }
                if !cli.quiet {
                    eprintln!("{} editions pending", bold(&ids.len().to_string()));
                }
            }
            true
        }
        Command::Audit {
            dry_run,
            reprocess,
            every,
        } => {
            let auditor = Auditor::new(
                scanner()?,
                AuditOptions {
                    dry_run,
                    reprocess_broken: reprocess,
                },
            );
            match every {
                None => {
                    let report = auditor.run_audit().await.context("Audit failed")?;
                    emit_audit(&cli, &report)?;
                    report.is_settled()
                }
                Some(secs) => {
                    run_scheduled(&cli, &auditor, Duration::from_secs(secs)).await?;
                    true
                }
            }
        }
        Command::Ready => {
            let auditor = Auditor::new(scanner()?, AuditOptions::default());
            let readiness = auditor
                .ready_editions()
                .await
                .context("Readiness check failed")?;
            if cli.json {
                print_json(&readiness)?;
            } else {
                for r in &readiness {
                    match r.reason {
                        None => println!("{}  {} ready ({} pages)", green("✓"), r.edition_id, r.pages),
                        Some(reason) => println!("{}  {} {}", red("✗"), r.edition_id, reason),
                    }
                }
            }
            readiness.iter().all(|r| r.ready)
        }
    };

    if cli.strict && !clean {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Repeat the audit on a fixed interval until Ctrl-C.
async fn run_scheduled(cli: &Cli, auditor: &Auditor, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Auditing every {}s", every.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match auditor.run_audit().await {
                    Ok(report) => emit_audit(cli, &report)?,
                    // A lost database connection may come back; keep the schedule.
                    Err(e) => warn!("Scheduled audit failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping scheduled audits");
                return Ok(());
            }
        }
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .database_url(&cli.database_url)
        .web_root(&cli.web_root)
        .pages_dir(&cli.pages_dir)
        .tier_timeout_secs(cli.tier_timeout)
        .concurrency(cli.concurrency);

    if let Some(ref path) = cli.rasterizer {
        builder = builder.rasterizer_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

fn print_backlog(report: &BacklogReport) {
    for o in &report.outcomes {
        match (&o.error, &o.profile) {
            (None, profile) => eprintln!(
                "  {} Edition {:>6}  {} pages  {}",
                green("✓"),
                o.edition_id,
                o.pages,
                dim(profile.as_deref().unwrap_or("-"))
            ),
            (Some(err), _) => eprintln!("  {} Edition {:>6}  {}", red("✗"), o.edition_id, red(err)),
        }
    }
    eprintln!(
        "Backlog: {} succeeded, {} failed",
        bold(&report.succeeded.to_string()),
        report.failed
    );
}

fn emit_audit(cli: &Cli, report: &AuditReport) -> Result<()> {
    if cli.json {
        return print_json(report);
    }
    if cli.quiet {
        return Ok(());
    }

    let verb = if report.dry_run { "would rewrite" } else { "rewrote" };
    eprintln!(
        "Audited {} editions: {} {} paths, {} unanchored, {} missing files, {} counts corrected",
        bold(&report.editions_checked.to_string()),
        verb,
        report.paths_rewritten,
        report.unanchored,
        report.missing_files,
        report.counts_corrected
    );
    for r in report.readiness.iter().filter(|r| !r.ready) {
        if let Some(reason) = r.reason {
            eprintln!("  {} Edition {:>6}  {}", yellow("⚠"), r.edition_id, reason);
        }
    }
    for e in &report.errors {
        eprintln!("  {} Edition {:>6}  {}", red("✗"), e.edition_id, red(&e.error));
    }
    if !report.reprocessed.is_empty() {
        let ok = report.reprocessed.iter().filter(|o| o.is_success()).count();
        eprintln!(
            "Reprocessed {}/{} broken editions",
            bold(&ok.to_string()),
            report.reprocessed.len()
        );
    }
    eprintln!(
        "{} {}/{} editions ready",
        if report.is_clean() { green("✔") } else { yellow("⚠") },
        report.ready_count(),
        report.readiness.len()
    );
    Ok(())
}
