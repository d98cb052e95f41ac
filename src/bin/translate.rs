//! CLI binary for edgequake-translate.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `TranslationConfig` and writes the resulting artifact.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_translate::pipeline::input::default_output_path;
use edgequake_translate::{
    inspect, translate_document, translate_text, translate_text_stream, translate_to_file, Artifact,
    ExtractionRule, Language, PageOutput, PageSeparator, ProgressCallback, RunOutcome, StorageConfig,
    TranslationConfig, TranslationOutput, TranslationProgressCallback, TransportConfig,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let head: String = msg.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        msg.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per settled page. Pages may settle
/// out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner only; the bar length is set by `on_run_start`.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Translating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TranslationProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Translating {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  retry {}  {}",
            yellow("↻"),
            page_num,
            attempt,
            dim(&truncate(error, 70)),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, output: &PageOutput) {
        let what = match output {
            PageOutput::Text(t) => format!("{:>5} chars", t.chars().count()),
            PageOutput::Url(_) => "artifact".to_string(),
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<11}  {}",
            green("✓"),
            page_num,
            total,
            dim(&what),
            dim(&format!("{:.1}s", self.elapsed_secs(page_num))),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{:.1}s", self.elapsed_secs(page_num))),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        if failed == 0 {
            self.bar.println(format!(
                "{} {} page(s) translated",
                green("✔"),
                bold(&success_count.to_string())
            ));
        } else {
            self.bar.println(format!(
                "{} {}/{} page(s) translated  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            ));
        }
        self.bar.set_prefix("Merging");
    }

    fn on_merge_progress(&self, percent: u8) {
        self.bar.set_message(format!("merge {percent}%"));
        if percent >= 100 {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Translate a Word document (writes report_translated.* next to it)
  translate report.docx --target en

  # Chinese PDF to French, explicit output path
  translate paper.pdf --source zh --target fr -o paper_fr.txt

  # Free text, fragments printed as they stream in
  translate --text "你好，世界" --target en --stream

  # Hand the whole file to the workflow instead of paging it
  translate contract.docx --relay

  # See how a document would be paged (no endpoint needed)
  translate --inspect-only book.pdf --page-chars 1500

LANGUAGES:
  zh 中文   en English   fr Français   de Deutsch   es Español
  it Italiano   ja 日本語   ko 한국어   pt Português   ru Русский

ENVIRONMENT VARIABLES:
  TRANSLATE_API_URL        Workflow run endpoint
  TRANSLATE_API_TOKEN      Bearer token for the endpoint
  TRANSLATE_WORKFLOW_ID    Workflow identifier
  TRANSLATE_USER_ID        Caller identity (default: edgequake)
  STORAGE_URL              Object storage base URL (relay mode, artifact downloads)
  STORAGE_API_KEY          Object storage API key
  STORAGE_BUCKET           Object storage bucket
  RUST_LOG                 Override log filter (e.g. edgequake_translate=debug)
"#;

/// Translate documents and free text through a streaming translation workflow.
#[derive(Parser, Debug)]
#[command(
    name = "translate",
    version,
    about = "Translate documents and free text through a streaming translation workflow",
    long_about = "Translate free text or .txt/.doc/.docx/.pdf documents (local files or URLs). \
Long documents are split into bounded pages, translated concurrently with retry, and merged \
back into a single text file, a single translated file, or a zip archive of per-page files.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local document path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "text", conflicts_with = "text")]
    input: Option<String>,

    /// Translate this text instead of a document.
    #[arg(long)]
    text: Option<String>,

    /// Source language (code or native name).
    #[arg(short, long, env = "TRANSLATE_SOURCE", default_value = "zh", value_parser = parse_language)]
    source: Language,

    /// Target language (code or native name).
    #[arg(short, long, env = "TRANSLATE_TARGET", default_value = "en", value_parser = parse_language)]
    target: Language,

    /// Write the artifact to this file. Text results default to stdout;
    /// binary results default to `<name>_translated.*` next to the input.
    #[arg(short, long, env = "TRANSLATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Pages translated at once.
    #[arg(short, long, env = "TRANSLATE_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Retries per page after the first failed attempt.
    #[arg(long, env = "TRANSLATE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Delay between attempts of the same page, in milliseconds.
    #[arg(long, env = "TRANSLATE_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Character budget per page.
    #[arg(long, env = "TRANSLATE_PAGE_CHARS", default_value_t = 2000)]
    page_chars: usize,

    /// Page separator in merged text: marker, none, hr, or a custom string.
    #[arg(long, env = "TRANSLATE_SEPARATOR", default_value = "marker")]
    separator: String,

    /// How workflow payloads become results.
    #[arg(long, env = "TRANSLATE_RULE", value_enum, default_value = "url")]
    rule: RuleArg,

    /// Path to a prompt template file containing `{text}`.
    #[arg(long, env = "TRANSLATE_PROMPT_TEMPLATE")]
    prompt_template: Option<PathBuf>,

    /// Upload the whole file and translate it in one request.
    #[arg(long, env = "TRANSLATE_RELAY")]
    relay: bool,

    /// Print fragments as they arrive (free text only).
    #[arg(long, requires = "text")]
    stream: bool,

    /// Ask the endpoint for a single JSON answer instead of a chunked stream.
    #[arg(long, env = "TRANSLATE_NO_STREAM")]
    no_stream: bool,

    /// Exit non-zero when any page failed.
    #[arg(long)]
    strict: bool,

    /// Workflow endpoint URL.
    #[arg(long, env = "TRANSLATE_API_URL")]
    api_url: Option<String>,

    /// Workflow bearer token.
    #[arg(long, env = "TRANSLATE_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Workflow identifier.
    #[arg(long, env = "TRANSLATE_WORKFLOW_ID")]
    workflow_id: Option<String>,

    /// Caller identity sent with each request.
    #[arg(long, env = "TRANSLATE_USER_ID", default_value = "edgequake")]
    user_id: String,

    /// Output a JSON run summary instead of the artifact text.
    #[arg(long, env = "TRANSLATE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "TRANSLATE_NO_PROGRESS")]
    no_progress: bool,

    /// Print how the document would be paged, no translation.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TRANSLATE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TRANSLATE_QUIET")]
    quiet: bool,

    /// Download timeout for URL inputs and artifacts, in seconds.
    #[arg(long, env = "TRANSLATE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-request workflow timeout in seconds.
    #[arg(long, env = "TRANSLATE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RuleArg {
    /// First URL becomes an artifact, otherwise the payload is text.
    Url,
    /// Only the text after the `译文：` marker.
    Marker,
}

impl From<RuleArg> for ExtractionRule {
    fn from(v: RuleArg) -> Self {
        match v {
            RuleArg::Url => ExtractionRule::UrlSniffing,
            RuleArg::Marker => ExtractionRule::TranslationMarker,
        }
    }
}

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse().map_err(|e: edgequake_translate::TranslateError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.text.is_none();
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

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.inspect_only {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn TranslationProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Free text ────────────────────────────────────────────────────────
    if let Some(ref text) = cli.text {
        return run_text(&cli, text, &config).await;
    }

    let input = cli
        .input
        .as_deref()
        .context("An input document or --text is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(input, &config).await.context("Failed to inspect document")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
            );
        } else {
            println!("File:         {}", info.name);
            println!("Kind:         {}", info.kind);
            println!("Size:         {} bytes", info.size_bytes);
            println!("Pages:        {} (≤{} chars each)", info.page_count, cli.page_chars);
            println!("Characters:   {}", info.char_count);
            println!("Output name:  {}", info.translated_name);
        }
        return Ok(());
    }

    // ── Run translation ──────────────────────────────────────────────────
    let (output, written) = if let Some(ref path) = cli.output {
        let output = translate_to_file(input, path, &config)
            .await
            .context("Translation failed")?;
        (output, Some(path.clone()))
    } else {
        let output = translate_document(input, &config)
            .await
            .context("Translation failed")?;
        let written = match &output.artifact {
            Artifact::Text { content, .. } => {
                if !cli.json {
                    io::stdout()
                        .lock()
                        .write_all(content.as_bytes())
                        .context("Failed to write to stdout")?;
                }
                None
            }
            Artifact::Binary { file_name, bytes } | Artifact::Archive { file_name, bytes } => {
                let path = default_output_path(input, file_name);
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                Some(path)
            }
        };
        (output, written)
    };

    if cli.json {
        print_json_summary(&output, written.as_ref())?;
    } else if !cli.quiet {
        print_summary(&output, written.as_ref());
    }

    if cli.strict {
        output.into_result().context("Translation incomplete")?;
    }
    Ok(())
}

async fn run_text(cli: &Cli, text: &str, config: &TranslationConfig) -> Result<()> {
    if cli.stream {
        let mut events = translate_text_stream(text, config)
            .await
            .context("Translation failed")?;
        let stdout = io::stdout();
        while let Some(event) = events.next().await {
            let event = event.context("Translation stream failed")?;
            let mut handle = stdout.lock();
            handle.write_all(event.payload.as_bytes())?;
            handle.flush()?;
        }
        println!();
        return Ok(());
    }

    let output = translate_text(text, config)
        .await
        .context("Translation failed")?;
    if cli.json {
        return print_json_summary(&output, None);
    }
    if let Some(ref path) = cli.output {
        tokio::fs::write(path, output.artifact.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        io::stdout()
            .lock()
            .write_all(output.artifact.as_bytes())
            .context("Failed to write to stdout")?;
    }
    Ok(())
}

fn print_summary(output: &TranslationOutput, written: Option<&PathBuf>) {
    let stats = &output.stats;
    eprintln!(
        "{}  {}/{} pages  {}ms  {} → {}{}",
        match output.outcome {
            RunOutcome::FullySucceeded => green("✔"),
            RunOutcome::PartiallySucceeded { .. } => cyan("⚠"),
        },
        stats.translated_pages,
        stats.total_pages,
        stats.total_duration_ms,
        output.source_language,
        output.target_language,
        written
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    if stats.total_retries > 0 {
        eprintln!("   {}", dim(&format!("{} retries", stats.total_retries)));
    }
}

fn print_json_summary(output: &TranslationOutput, written: Option<&PathBuf>) -> Result<()> {
    let mut summary = serde_json::json!({
        "artifact": output.artifact.file_name(),
        "source_language": output.source_language,
        "target_language": output.target_language,
        "outcome": output.outcome,
        "stats": output.stats,
        "failures": output.result.failures,
    });
    if let Some(path) = written {
        summary["written_to"] = serde_json::Value::String(path.display().to_string());
    }
    if let Artifact::Text { ref content, .. } = output.artifact {
        summary["content"] = serde_json::Value::String(content.clone());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialise output")?
    );
    Ok(())
}

/// Map CLI args to `TranslationConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TranslationConfig> {
    let mut builder = TranslationConfig::builder()
        .source_language(cli.source)
        .target_language(cli.target)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .page_chars(cli.page_chars)
        .page_separator(parse_separator(&cli.separator))
        .extraction_rule(cli.rule.into())
        .relay_whole_file(cli.relay)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.prompt_template {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }

    // Partial endpoint flags fall through to the library's env lookup, which
    // reports exactly which variable is missing.
    if let (Some(url), Some(token), Some(workflow)) =
        (cli.api_url.as_ref(), cli.api_token.as_ref(), cli.workflow_id.as_ref())
    {
        builder = builder.transport_config(TransportConfig {
            endpoint: url.clone(),
            token: token.clone(),
            workflow_id: workflow.clone(),
            user_id: cli.user_id.clone(),
            stream: !cli.no_stream,
        });
    } else if cli.no_stream {
        if let Ok(mut tc) = TransportConfig::from_env() {
            tc.stream = false;
            builder = builder.transport_config(tc);
        }
    }

    if let Some(storage) = StorageConfig::from_env() {
        builder = builder.storage(storage);
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "marker" | "page" => PageSeparator::PageMarker,
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
