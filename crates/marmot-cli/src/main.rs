//! Marmot CLI - blockwise 4-bit quantization for graph models
//!
//! Reads a graph-model file, rewrites every eligible constant-weight MatMul
//! into the fused 4-bit operator, and writes the compressed model back out.

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod utils;

use config::Config;
use utils::{create_spinner, format_bytes, print_success};

#[derive(Parser)]
#[command(
    name = "marmot",
    version = env!("CARGO_PKG_VERSION"),
    about = "Blockwise 4-bit quantization for MatMul weights in graph models",
    long_about = "Compresses a graph model by replacing constant 2-D MatMul weights with \
packed 4-bit blocks plus per-block scales, substituting the fused MatMulQ4 operator in place."
)]
struct Cli {
    /// Path to the input model file
    #[arg(short, long)]
    input_model: PathBuf,

    /// Path to the output model file
    #[arg(short, long)]
    output_model: PathBuf,

    /// Store tensor payloads in an external data file next to the output model
    #[arg(short = 'e', long)]
    use_external_data_format: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "MARMOT_CONFIG")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    init_logging(cli)?;
    debug!("Marmot CLI v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(cli.config.as_deref())?;
    debug!("Configuration loaded: {:?}", config);

    if let Some(threads) = config.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker thread pool")?;
    }

    let spinner = create_spinner("Loading model...");
    let mut model = marmot_graph::load_model(&cli.input_model)
        .with_context(|| format!("Failed to load model: {}", cli.input_model.display()))?;
    spinner.finish_with_message("Model loaded");

    let qtype = config.quant_type.into();
    info!(?qtype, "quantizing MatMul weights");
    let spinner = create_spinner("Quantizing weights...");
    let rewritten = marmot_quant::quantize_model(&mut model, qtype)
        .context("Quantization failed, no output written")?;
    spinner.finish_with_message(format!("Quantized {rewritten} MatMul weight(s)"));

    marmot_graph::save_model(&cli.output_model, &model, cli.use_external_data_format)
        .with_context(|| format!("Failed to save model: {}", cli.output_model.display()))?;

    if !cli.quiet {
        let before = std::fs::metadata(&cli.input_model).map(|m| m.len()).unwrap_or(0);
        let after = output_size(&cli.output_model, cli.use_external_data_format);
        print_success(&format!(
            "{} node(s) rewritten, {} -> {}",
            rewritten,
            format_bytes(before),
            format_bytes(after)
        ));
    }
    Ok(())
}

/// Total on-disk size of the saved model, sidecar included
fn output_size(path: &PathBuf, external: bool) -> u64 {
    let mut size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if external {
        let sidecar = path.with_extension("tensors");
        size += std::fs::metadata(sidecar).map(|m| m.len()).unwrap_or(0);
    }
    size
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
