//! CLI binary for docshift.
//!
//! A thin shim over the library crate: maps flags onto `ServiceConfig` and
//! `PageGeometry`, drives a conversion, and prints the result.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docshift::{
    convert_file, output_file_name, paginate, reflow_with, BatchRequest, Format, HelveticaMetrics,
    JobDispatcher, OutputKind, PageGeometry, ProgressEvent, ProgressReporter, ProgressSink,
    ReflowOptions, ServiceConfig, Upload,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Progress bar ─────────────────────────────────────────────────────────────

/// Terminal progress sink: one bar from 0 to 100 with the current label.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(prefix: &str) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressSink for CliProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_position(event.percent.round() as u64);
        self.bar.set_message(event.label.clone());
        if event.percent >= 100.0 {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text to PDF (in-process, A4)
  docshift convert notes.txt -o notes.pdf

  # PDF to text with page markers, or to HTML
  docshift convert report.pdf -o report.txt
  docshift convert report.pdf -o report.html

  # Word / spreadsheet to PDF through LibreOffice
  docshift convert budget.xlsx -o budget.pdf --deadline 90

  # PDF to Word through the remote service
  CLOUDMERSIVE_API_KEY=... docshift convert scan.pdf -o scan.docx

  # Many documents at once
  docshift batch *.docx --to pdf --out-dir out/ -j 4

  # Preview pagination
  docshift paginate chapter.txt --page-size letter

  # What can this machine convert?
  docshift probe

ENVIRONMENT VARIABLES:
  DOCSHIFT_ARTIFACT_DIR     Directory for temporary job files
  DOCSHIFT_SOFFICE          LibreOffice `soffice` executable
  DOCSHIFT_DEADLINE_SECS    Local toolchain deadline (default 60)
  DOCSHIFT_REMOTE_ENDPOINT  Remote conversion service base URL
  CLOUDMERSIVE_API_KEY      Remote conversion service API key
  PDFIUM_LIB_PATH           Directory (or file) of the PDFium library
  RUST_LOG                  Log filter, e.g. docshift=debug
"#;

/// Convert documents between text, HTML, PDF, word-processor and spreadsheet formats.
#[derive(Parser, Debug)]
#[command(
    name = "docshift",
    version,
    about = "Convert documents between text, HTML, PDF, word-processor and spreadsheet formats",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSHIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSHIFT_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "DOCSHIFT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one file.
    Convert {
        /// Input document.
        input: PathBuf,

        /// Output file. Its extension picks the target format unless --to is given.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target format: pdf, text, html, word, spreadsheet (or an extension).
        #[arg(long)]
        to: Option<Format>,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        service: ServiceArgs,
    },

    /// Convert many files through the conversion service.
    Batch {
        /// Input documents.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Target format for every input.
        #[arg(long)]
        to: Format,

        /// Directory for the converted files.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Jobs in flight at once (default 4).
        #[arg(short = 'j', long, env = "DOCSHIFT_JOBS")]
        jobs: Option<usize>,

        #[command(flatten)]
        service: ServiceArgs,
    },

    /// Lay a text file out into pages and print the result.
    Paginate {
        /// UTF-8 text file.
        input: PathBuf,

        /// Output shape.
        #[arg(long, value_enum, default_value = "text")]
        format: ReflowArg,

        /// Print the pages as JSON instead.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Report which conversions are available, as JSON.
    Probe {
        #[command(flatten)]
        service: ServiceArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct LayoutArgs {
    /// Page size for text → PDF.
    #[arg(long, value_enum, default_value = "a4", env = "DOCSHIFT_PAGE_SIZE")]
    page_size: PageSizeArg,

    /// Font size in points.
    #[arg(long, env = "DOCSHIFT_FONT_SIZE")]
    font_size: Option<f32>,

    /// Line pitch in points.
    #[arg(long, env = "DOCSHIFT_LINE_HEIGHT")]
    line_height: Option<f32>,

    /// Page margin in points.
    #[arg(long, env = "DOCSHIFT_MARGIN")]
    margin: Option<f32>,
}

#[derive(Args, Debug, Clone)]
struct ServiceArgs {
    /// Directory for temporary job files.
    #[arg(long, env = "DOCSHIFT_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// LibreOffice `soffice` executable.
    #[arg(long, env = "DOCSHIFT_SOFFICE")]
    soffice: Option<PathBuf>,

    /// Local toolchain deadline in seconds.
    #[arg(long, env = "DOCSHIFT_DEADLINE_SECS")]
    deadline: Option<u64>,

    /// Remote conversion service base URL.
    #[arg(long, env = "DOCSHIFT_REMOTE_ENDPOINT")]
    endpoint: Option<String>,

    /// Remote conversion service API key.
    #[arg(long, env = "CLOUDMERSIVE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PageSizeArg {
    A4,
    Letter,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReflowArg {
    Text,
    Html,
}

impl From<ReflowArg> for OutputKind {
    fn from(v: ReflowArg) -> Self {
        match v {
            ReflowArg::Text => OutputKind::PlainText,
            ReflowArg::Html => OutputKind::Html,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO lines would fight with the progress bar; keep them for -v or
    // --no-progress runs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let reporter = |prefix: &str| {
        if show_progress {
            ProgressReporter::new(Arc::new(CliProgress::new(prefix)))
        } else {
            ProgressReporter::noop()
        }
    };

    match cli.command {
        Command::Convert {
            input,
            output,
            to,
            layout,
            service,
        } => {
            let target = match (to, &output) {
                (Some(f), _) => f,
                (None, Some(out)) => Format::from_file_name(&out.to_string_lossy())
                    .with_context(|| format!("Cannot tell the target format of {out:?}; pass --to"))?,
                (None, None) => bail!("Pass --to or an output file with a known extension"),
            };
            let output = output.unwrap_or_else(|| {
                PathBuf::from(output_file_name(&input.to_string_lossy(), target))
            });
            if output == input {
                bail!("Output would overwrite the input ({})", input.display());
            }

            let geometry = build_geometry(&layout)?;
            let dispatcher = build_dispatcher(&service)?;
            let started = Instant::now();
            let written = convert_file(
                &input,
                &output,
                target,
                &geometry,
                Some(&dispatcher),
                &reporter("Converting"),
            )
            .await
            .with_context(|| format!("Failed to convert {}", input.display()))?;

            if !cli.quiet {
                eprintln!(
                    "{}  {}  {}  →  {}",
                    green("✔"),
                    dim(&format!("{written} bytes")),
                    dim(&format!("{}ms", started.elapsed().as_millis())),
                    bold(&output.display().to_string()),
                );
            }
        }

        Command::Batch {
            inputs,
            to,
            out_dir,
            jobs,
            service,
        } => {
            let config = build_config(&service)?;
            let jobs = jobs.unwrap_or(config.batch_concurrency);
            let dispatcher =
                JobDispatcher::new(config).context("Failed to start the conversion service")?;
            tokio::fs::create_dir_all(&out_dir)
                .await
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;

            let mut requests = Vec::with_capacity(inputs.len());
            for input in &inputs {
                requests.push(batch_request(input, to).await?);
            }

            let results = dispatcher.submit_batch(requests, jobs).await;
            let mut taken = HashSet::new();
            let mut failed = 0;
            for (input, result) in inputs.iter().zip(results) {
                let outcome = match result {
                    Ok(document) => {
                        let path = unique_output_path(&out_dir, document.file_name(), &mut taken);
                        write_document(document, &path).await.map(|_| path)
                    }
                    Err(e) => Err(anyhow::Error::new(e)),
                };
                match outcome {
                    Ok(path) if !cli.quiet => {
                        eprintln!("  {} {}  →  {}", green("✓"), input.display(), path.display())
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failed += 1;
                        eprintln!("  {} {}  {}", red("✗"), input.display(), red(&format!("{e:#}")));
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} conversions failed", inputs.len());
            }
        }

        Command::Paginate {
            input,
            format,
            json,
            layout,
        } => {
            let geometry = build_geometry(&layout)?;
            let text = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let pages = paginate(&text, &geometry, &HelveticaMetrics, &reporter("Paginating"))
                .context("Pagination failed")?;

            let rendered = if json {
                serde_json::to_string_pretty(&pages).context("Failed to serialise pages")?
            } else {
                let options = ReflowOptions::for_source(&input.to_string_lossy());
                reflow_with(&pages, format.into(), &options)
            };
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !rendered.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            if !cli.quiet {
                eprintln!("{} pages", bold(&pages.total_pages().to_string()));
            }
        }

        Command::Probe { service } => {
            let dispatcher = build_dispatcher(&service)?;
            let capabilities = dispatcher.capabilities();
            println!(
                "{}",
                serde_json::to_string_pretty(&capabilities)
                    .context("Failed to serialise capabilities")?
            );
        }
    }

    Ok(())
}

fn build_dispatcher(args: &ServiceArgs) -> Result<JobDispatcher> {
    let config = build_config(args)?;
    JobDispatcher::new(config).context("Failed to start the conversion service")
}

/// Map CLI args onto `ServiceConfig` (environment first, flags override).
fn build_config(args: &ServiceArgs) -> Result<ServiceConfig> {
    let env = ServiceConfig::from_env().context("Invalid environment configuration")?;
    let mut builder = ServiceConfig::builder()
        .artifact_dir(args.artifact_dir.clone().unwrap_or(env.artifact_dir))
        .local_deadline(
            args.deadline
                .map(Duration::from_secs)
                .unwrap_or(env.local_deadline),
        )
        .remote_endpoint(args.endpoint.clone().unwrap_or(env.remote_endpoint));
    if let Some(exe) = args.soffice.clone().or(env.toolchain_path) {
        builder = builder.toolchain_path(exe);
    }
    if let Some(key) = args.api_key.clone().or(env.remote_api_key) {
        builder = builder.remote_api_key(key);
    }
    let config = builder.build().context("Invalid configuration")?;
    tracing::debug!(?config, "Service configuration");
    Ok(config)
}

fn build_geometry(args: &LayoutArgs) -> Result<PageGeometry> {
    let mut geometry = match args.page_size {
        PageSizeArg::A4 => PageGeometry::a4(),
        PageSizeArg::Letter => PageGeometry::letter(),
    };
    if let Some(size) = args.font_size {
        geometry.font_size = size;
    }
    if let Some(lh) = args.line_height {
        geometry.line_height = lh;
    }
    if let Some(m) = args.margin {
        geometry.margin = m;
    }
    geometry.validate().context("Invalid page layout")?;
    Ok(geometry)
}

async fn batch_request(input: &Path, target: Format) -> Result<BatchRequest> {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let source = Format::from_file_name(&name)
        .with_context(|| format!("Cannot tell the format of {}", input.display()))?;
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    Ok(BatchRequest {
        upload: Upload::new(name, source.mime_type(), bytes),
        source,
        target,
    })
}

/// `dir/name`, or `dir/stem-N.ext` when an earlier output of this batch
/// already took that name.
fn unique_output_path(dir: &Path, name: &str, taken: &mut HashSet<String>) -> PathBuf {
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = name.to_string();
    let mut n = 2;
    while !taken.insert(candidate.to_lowercase()) {
        candidate = format!("{stem}-{n}{ext}");
        n += 1;
    }
    dir.join(candidate)
}

async fn write_document(document: docshift::ConvertedDocument, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    document
        .deliver(&mut file)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_outputs_get_numbered() {
        let dir = Path::new("out");
        let mut taken = HashSet::new();
        let names: Vec<PathBuf> = ["report.pdf", "report.pdf", "notes.pdf", "Report.pdf"]
            .iter()
            .map(|n| unique_output_path(dir, n, &mut taken))
            .collect();
        assert_eq!(
            names,
            vec![
                dir.join("report.pdf"),
                dir.join("report-2.pdf"),
                dir.join("notes.pdf"),
                dir.join("Report-3.pdf"),
            ]
        );
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let dir = Path::new("out");
        let mut taken = HashSet::new();
        unique_output_path(dir, "a-2.pdf", &mut taken);
        unique_output_path(dir, "a.pdf", &mut taken);
        assert_eq!(unique_output_path(dir, "a.pdf", &mut taken), dir.join("a-3.pdf"));
    }
}
