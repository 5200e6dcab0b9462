//! CLI binary for edgequake-img2docx.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `convert` runs one conversion from the terminal, and `render` turns an
//! existing HTML file into a `.docx` without calling any model.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_img2docx::pipeline::input::resolve_input;
use edgequake_img2docx::{
    converted_filename, render_markup, save_docx, start_server, AppState, ConversionOutput,
    MarginSource, Pipeline, PromptOptions, RenderOptions, RenderOptionsBuilder, ServiceConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  img2docx serve --bind 0.0.0.0:8000

  # Convert a scan (writes invoice_converted.docx)
  img2docx convert invoice.png

  # Staged pipeline, narrow margins, one correction pass
  img2docx convert scan.jpg --pipeline staged --margins 0.5 \
      --correct "Use DD/MM/YYYY for every date" -o out.docx

  # Copy margins from an existing document
  img2docx convert scan.png --reference letterhead.docx

  # Render HTML you already have (no model call, no credentials)
  img2docx render page.html -o page.docx

MODELS:
  gemini-2.5-flash (default)   $0.075 / $0.30 per 1M tokens
  gemini-2.5-pro               $7.00 / $21.00 per 1M tokens

ENVIRONMENT VARIABLES:
  GOOGLE_CLOUD_PROJECT    Cloud project id (required by serve/convert)
  GOOGLE_CLOUD_REGION     Cloud region (required by serve/convert)
  DOCAI_PROCESSOR_NAME    Layout-parser processor (layout_parser pipeline only)
  DOCAI_ACCESS_TOKEN      Bearer token for the layout-parser API
  GEMINI_API_KEY          API key used by the gemini provider
  IMG2DOCX_PROVIDER       edgequake-llm provider name (default: gemini)
  IMG2DOCX_PROMPTS_DIR    Prompt template directory (default: prompts)
"#;

/// Convert scanned document images to Word documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "img2docx",
    version,
    about = "Convert scanned document images to Word documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "IMG2DOCX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "IMG2DOCX_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Convert one image (local path or URL) into a .docx.
    Convert(ConvertArgs),
    /// Render an HTML file into a .docx without calling a model.
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "IMG2DOCX_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Prompt template directory.
    #[arg(long, env = "IMG2DOCX_PROMPTS_DIR")]
    prompts_dir: Option<PathBuf>,

    /// edgequake-llm provider name.
    #[arg(long, env = "IMG2DOCX_PROVIDER")]
    provider: Option<String>,
}

/// Page-layout flags shared by `convert` and `render`.
#[derive(Args, Debug)]
struct LayoutArgs {
    /// Set all four margins (inches); individual flags override it.
    #[arg(long, env = "IMG2DOCX_MARGINS")]
    margins: Option<f64>,

    #[arg(long, env = "IMG2DOCX_MARGIN_TOP")]
    margin_top: Option<f64>,

    #[arg(long, env = "IMG2DOCX_MARGIN_BOTTOM")]
    margin_bottom: Option<f64>,

    #[arg(long, env = "IMG2DOCX_MARGIN_LEFT")]
    margin_left: Option<f64>,

    #[arg(long, env = "IMG2DOCX_MARGIN_RIGHT")]
    margin_right: Option<f64>,

    /// Existing .docx whose page margins are copied.
    #[arg(long, env = "IMG2DOCX_REFERENCE")]
    reference: Option<PathBuf>,

    /// Output path. Default: `<input stem>_converted.docx`.
    #[arg(short, long, env = "IMG2DOCX_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the conversion summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local image path or HTTP/HTTPS URL.
    input: String,

    /// Model id.
    #[arg(long, env = "IMG2DOCX_MODEL", default_value = "gemini-2.5-flash")]
    model: String,

    /// edgequake-llm provider name.
    #[arg(long, env = "IMG2DOCX_PROVIDER")]
    provider: Option<String>,

    /// Pipeline: direct, staged or layout_parser.
    #[arg(long, env = "IMG2DOCX_PIPELINE", default_value = "direct")]
    pipeline: String,

    /// Instructions sent with the image. Empty uses the base template.
    #[arg(long, env = "IMG2DOCX_INSTRUCTIONS", default_value = "")]
    instructions: String,

    /// Read the instructions from a file instead.
    #[arg(long, conflicts_with = "instructions")]
    instructions_file: Option<PathBuf>,

    /// Run one correction pass with these instructions.
    #[arg(long, env = "IMG2DOCX_CORRECT")]
    correct: Option<String>,

    /// Base template field: how to write signatures.
    #[arg(long, default_value = "")]
    signature_handling: String,

    /// Base template field: how to write seals and stamps.
    #[arg(long, default_value = "")]
    seal_handling: String,

    /// Base template field: currency format.
    #[arg(long, default_value = "")]
    currency_format: String,

    /// Base template field: number format.
    #[arg(long, default_value = "")]
    numbers_format: String,

    /// Base template field: anything else.
    #[arg(long, default_value = "")]
    general_instructions: String,

    /// HTTP download timeout in seconds (URL input).
    #[arg(long, env = "IMG2DOCX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable the spinner.
    #[arg(long, env = "IMG2DOCX_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    layout: LayoutArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// HTML file (a fenced model answer is fine).
    input: PathBuf,

    #[command(flatten)]
    layout: LayoutArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Convert(args) => convert(args, cli.quiet).await,
        Command::Render(args) => render(args, cli.quiet).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = ServiceConfig::from_env().context("Invalid service configuration")?;
    if let Some(dir) = args.prompts_dir {
        config.prompts_dir = dir;
    }
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    let state = AppState::from_config(&config).context("Failed to initialise the service")?;
    start_server(&args.bind, state)
        .await
        .with_context(|| format!("Server on {} stopped", args.bind))
}

async fn convert(args: ConvertArgs, quiet: bool) -> Result<()> {
    let mut config = ServiceConfig::from_env().context("Invalid service configuration")?;
    if let Some(provider) = args.provider.clone() {
        config.provider = provider;
    }
    let state = AppState::from_config(&config).context("Failed to initialise the converter")?;

    let instructions = match &args.instructions_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?,
        None => args.instructions.clone(),
    };
    let pipeline: Pipeline = args.pipeline.parse().context("Invalid --pipeline")?;

    let mut builder = RenderOptions::builder()
        .model(&args.model)
        .pipeline(pipeline)
        .instructions(instructions)
        .prompt_options(PromptOptions {
            signature_handling: args.signature_handling.clone(),
            seal_handling: args.seal_handling.clone(),
            currency_format: args.currency_format.clone(),
            numbers_format: args.numbers_format.clone(),
            general_instructions: args.general_instructions.clone(),
        });
    if let Some(correction) = &args.correct {
        builder = builder.correction(true, correction);
    }
    let options = apply_layout(builder, &args.layout).await?;

    let upload = resolve_input(&args.input, args.download_timeout)
        .await
        .context("Failed to read input")?;

    let spinner = (!quiet && !args.no_progress && !args.layout.json).then(|| {
        spinner(format!("{} via {:?}", options.model, options.pipeline))
    });
    let result = state.converter.convert(&upload, &options).await;
    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }
    let output = result.context("Conversion failed")?;

    let target = output_path(&args.layout, &upload.filename);
    finish(&output, &target, &args.layout, quiet).await
}

async fn render(args: RenderArgs, quiet: bool) -> Result<()> {
    let markup = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {:?}", args.input))?;
    let options = apply_layout(RenderOptions::builder(), &args.layout).await?;

    let output = render_markup(&markup, &options);

    let target = output_path(&args.layout, &args.input.to_string_lossy());
    finish(&output, &target, &args.layout, quiet).await
}

/// Apply margin and reference flags, then validate.
async fn apply_layout(mut builder: RenderOptionsBuilder, layout: &LayoutArgs) -> Result<RenderOptions> {
    if let Some(all) = layout.margins {
        builder = builder.margins(all, all, all, all);
    }
    if let Some(v) = layout.margin_top {
        builder = builder.margin_top(v);
    }
    if let Some(v) = layout.margin_bottom {
        builder = builder.margin_bottom(v);
    }
    if let Some(v) = layout.margin_left {
        builder = builder.margin_left(v);
    }
    if let Some(v) = layout.margin_right {
        builder = builder.margin_right(v);
    }
    if let Some(path) = &layout.reference {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read reference document {:?}", path))?;
        builder = builder.reference_docx(bytes);
    }
    builder.build().context("Invalid options")
}

fn output_path(layout: &LayoutArgs, input_name: &str) -> PathBuf {
    layout
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(converted_filename(input_name)))
}

async fn finish(output: &ConversionOutput, target: &Path, layout: &LayoutArgs, quiet: bool) -> Result<()> {
    let written = save_docx(&output.document, target)
        .await
        .context("Failed to save document")?;

    if layout.json {
        let summary = serde_json::json!({
            "output": target,
            "bytes": written,
            "pipeline": output.pipeline,
            "model": output.model,
            "margins": output.margins,
            "stats": output.stats,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
        return Ok(());
    }

    if !quiet {
        let margins = match &output.margins {
            MarginSource::Explicit => "explicit margins".to_string(),
            MarginSource::Reference => "margins from reference".to_string(),
            MarginSource::Fallback { reason } => format!("explicit margins ({reason})"),
        };
        eprintln!(
            "{}  {} blocks, {} tables  {}  →  {}",
            green("✔"),
            output.stats.blocks,
            output.stats.tables,
            dim(&margins),
            bold(&target.display().to_string()),
        );
        if output.stats.model_calls > 0 {
            eprintln!(
                "   {} call(s)  {} tokens in  /  {} tokens out  {}ms",
                output.stats.model_calls,
                dim(&output.stats.input_tokens.to_string()),
                dim(&output.stats.output_tokens.to_string()),
                output.stats.duration_ms,
            );
        }
    }
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("Converting");
    bar.set_message(cyan(&message));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}
