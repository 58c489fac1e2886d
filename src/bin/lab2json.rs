//! CLI binary for labreport-digitizer.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `DigitizeConfig` and prints reports as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use labreport_digitizer::{
    digitize, digitize_text, evaluate_dir, save_annotations, CorrectionStore, DigitizeConfig,
    DigitizeProgressCallback, DigitizedDocument, Evaluation, ProgressCallback, Recognizer,
    ReportStore, TokenDumpRecognizer, VisionRecognizer,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_document_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading inputs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Reading");
    }

    fn page_seconds(&self, page_num: usize) -> f64 {
        let started = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num));
        started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }
}

impl DigitizeProgressCallback for CliProgressCallback {
    fn on_document_start(&self, document_id: &str, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Digitizing {document_id} ({total_pages} pages)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, token_count: usize) {
        let secs = self.page_seconds(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{token_count:>5} words")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.page_seconds(page_num);

        // Keep the log line on one row.
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.abandon();
    }

    fn on_document_complete(&self, document_id: &str, test_count: usize, corrected: bool) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}  {} tests{}",
            green("✔"),
            bold(document_id),
            test_count,
            if corrected {
                format!("  {}", cyan("(stored correction)"))
            } else {
                String::new()
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Digitize a scan (stdout)
  lab2json digitize cbc_scan.png

  # Two photographed pages of one report, saved for evaluation
  lab2json digitize lipid_p1.jpg lipid_p2.jpg --save

  # Replay recorded vision output instead of calling a model
  lab2json digitize cbc_scan.png --tokens cbc_tokens.json --annotate out/

  # Store an operator correction, served from then on
  lab2json correct cbc_scan fixed.json

  # Score confirmed reports against hand-labelled ones
  lab2json evaluate --expected-dir data/samples --results-dir data/final_reports

  # Run extraction over plain text (no vision engine needed)
  lab2json extract-text report.txt

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  LAB2JSON_CORRECTION_DIR Where operator corrections live
  LAB2JSON_REPORT_DIR     Where confirmed reports are saved
  RUST_LOG                Log filter (overrides --verbose / --quiet)

PDF input needs a PDFium shared library on the loader path.
"#;

/// Turn scanned lab reports into structured JSON.
#[derive(Parser, Debug)]
#[command(
    name = "lab2json",
    version,
    about = "Turn scanned lab reports into structured JSON",
    long_about = "Digitize laboratory reports (photos, scans, PDFs or recorded word lists) into \
a fixed patient + tests JSON record. Words are read by a vision language model, put back into \
reading order, cleaned of letterhead noise and matched against deterministic extraction rules. \
Operator corrections stored per document replace the computed report.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of operator corrections.
    #[arg(
        long,
        global = true,
        env = "LAB2JSON_CORRECTION_DIR",
        default_value = "data/corrections"
    )]
    correction_dir: PathBuf,

    /// Directory of confirmed reports.
    #[arg(
        long,
        global = true,
        env = "LAB2JSON_REPORT_DIR",
        default_value = "data/final_reports"
    )]
    report_dir: PathBuf,

    /// Vision model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(
        long,
        global = true,
        env = "LAB2JSON_DPI",
        default_value_t = 200,
        value_parser = clap::value_parser!(u32).range(72..=400)
    )]
    dpi: u32,

    /// Max LLM output tokens per page.
    #[arg(long, global = true, env = "LAB2JSON_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "LAB2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-page recognition timeout in seconds.
    #[arg(long, global = true, env = "LAB2JSON_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "LAB2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to a text file replacing the word-detection prompt.
    #[arg(long, global = true, env = "LAB2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Drop words occurring more often than this in a document.
    #[arg(long, global = true, env = "LAB2JSON_MAX_WORD_FREQUENCY", default_value_t = 5)]
    max_word_frequency: usize,

    /// Comma-separated boilerplate words to drop (replaces the default list).
    #[arg(long, global = true, env = "LAB2JSON_BOILERPLATE", value_delimiter = ',')]
    boilerplate: Option<Vec<String>>,

    /// Disable progress bar.
    #[arg(long, global = true, env = "LAB2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LAB2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LAB2JSON_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Digitize one report made of one or more files or URLs.
    Digitize {
        /// Scans (PNG/JPEG), PDFs, token dumps (JSON) or HTTP/HTTPS URLs, in page order.
        #[arg(required = true)]
        files: Vec<String>,

        /// Recorded word list to replay instead of calling a vision model.
        #[arg(long)]
        tokens: Option<PathBuf>,

        /// Write the report to this file instead of stdout.
        #[arg(short, long, env = "LAB2JSON_OUTPUT")]
        output: Option<PathBuf>,

        /// Also save the report to the report directory.
        #[arg(long)]
        save: bool,

        /// Write page images with the source words boxed to this directory.
        #[arg(long)]
        annotate: Option<PathBuf>,

        /// Print the full result (ordered text, stats) instead of the report only.
        #[arg(long)]
        full: bool,
    },

    /// Store an operator correction for a document.
    Correct {
        /// Document identifier (file stem of the digitized input).
        document_id: String,
        /// Report-shaped JSON; missing fields become defaults when served.
        json_file: PathBuf,
    },

    /// Score confirmed reports against expected ones.
    Evaluate {
        /// Directory of `<base>_expected.json` files.
        #[arg(long, default_value = "data/samples")]
        expected_dir: PathBuf,
        /// Directory of `<base>.json` results (defaults to the report directory).
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },

    /// Run extraction over plain text.
    ExtractText {
        /// Text file; use `-` for stdin.
        text_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs while it is active.
    let is_digitize = matches!(cli.command, Command::Digitize { .. });
    let show_progress = is_digitize && !cli.quiet && !cli.no_progress;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn DigitizeProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    match &cli.command {
        Command::Digitize {
            files,
            tokens,
            output,
            save,
            annotate,
            full,
        } => {
            let document = match tokens {
                Some(path) => {
                    let recognizer = TokenDumpRecognizer::from_file(path)
                        .with_context(|| format!("Failed to load tokens from {:?}", path))?;
                    run_digitize(files, &recognizer, &config).await?
                }
                None => {
                    let recognizer = VisionRecognizer::from_config(&config)
                        .context("No vision engine available")?;
                    run_digitize(files, &recognizer, &config).await?
                }
            };

            let json = if *full {
                serde_json::to_string_pretty(&document)
            } else {
                serde_json::to_string_pretty(&document.report)
            }
            .context("Failed to serialise report")?;

            match output {
                Some(path) => {
                    tokio::fs::write(path, format!("{json}\n"))
                        .await
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    if !cli.quiet {
                        eprintln!(
                            "{}  {} pages  {}ms  →  {}",
                            green("✔"),
                            document.stats.pages,
                            document.stats.total_ms,
                            bold(&path.display().to_string()),
                        );
                    }
                }
                None => println!("{json}"),
            }

            if *save {
                let path = ReportStore::new(&config.report_dir)
                    .save(&document.document_id, &document.report)
                    .await
                    .context("Failed to save report")?;
                if !cli.quiet {
                    eprintln!("   saved  {}", dim(&path.display().to_string()));
                }
            }

            if let Some(dir) = annotate {
                let written =
                    save_annotations(&document, dir).context("Failed to write annotations")?;
                if !cli.quiet {
                    if written.is_empty() {
                        eprintln!("   {}", dim("no page images to annotate"));
                    }
                    for path in written {
                        eprintln!("   annotated  {}", dim(&path.display().to_string()));
                    }
                }
            }
        }

        Command::Correct {
            document_id,
            json_file,
        } => {
            let raw = tokio::fs::read(json_file)
                .await
                .with_context(|| format!("Failed to read {:?}", json_file))?;
            let correction: serde_json::Value = serde_json::from_slice(&raw)
                .with_context(|| format!("{:?} is not valid JSON", json_file))?;

            let path = CorrectionStore::new(&config.correction_dir)
                .save(document_id, &correction)
                .await
                .context("Failed to store correction")?;
            if !cli.quiet {
                eprintln!(
                    "{} correction for {} stored at {}",
                    green("✔"),
                    bold(document_id),
                    path.display()
                );
            }
        }

        Command::Evaluate {
            expected_dir,
            results_dir,
        } => {
            let results_dir = results_dir.as_deref().unwrap_or(config.report_dir.as_path());
            let summary = evaluate_dir(expected_dir, results_dir)
                .with_context(|| format!("Failed to evaluate {:?}", expected_dir))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialise evaluation")?
            );
            if !cli.quiet {
                print_evaluation_summary(&summary);
            }
        }

        Command::ExtractText { text_file } => {
            let text = read_text(text_file).await?;
            let report = digitize_text(&text, &config);
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        }
    }

    Ok(())
}

async fn run_digitize<R: Recognizer>(
    files: &[String],
    recognizer: &R,
    config: &DigitizeConfig,
) -> Result<DigitizedDocument> {
    digitize(files, recognizer, config)
        .await
        .context("Digitization failed")
}

async fn read_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let text = tokio::task::spawn_blocking(|| io::read_to_string(io::stdin()))
            .await
            .context("stdin reader panicked")?
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

fn print_evaluation_summary(summary: &std::collections::BTreeMap<String, Evaluation>) {
    for (base, evaluation) in summary {
        match evaluation {
            Evaluation::Scored(s) => eprintln!(
                "  {} {:<24} patient {:>6.2}%  tests {:>6.2}%",
                if s.patient_accuracy == 100.0 && s.test_accuracy == 100.0 {
                    green("✓")
                } else {
                    cyan("~")
                },
                base,
                s.patient_accuracy,
                s.test_accuracy,
            ),
            Evaluation::Missing { .. } => {
                eprintln!("  {} {:<24} {}", red("✗"), base, dim("missing"))
            }
        }
    }
}

/// Map CLI args to `DigitizeConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DigitizeConfig> {
    let mut builder = DigitizeConfig::builder()
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_word_frequency(cli.max_word_frequency)
        .correction_dir(&cli.correction_dir)
        .report_dir(&cli.report_dir);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        if prompt.trim().is_empty() {
            bail!("System prompt file {:?} is empty", path);
        }
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref words) = cli.boilerplate {
        builder = builder.boilerplate(words.iter().map(|w| w.trim().to_string()));
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
