use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use docrag::cli::commands::{
    handle_config, handle_context, handle_ingest, handle_search, handle_status,
};
use docrag::cli::output::get_formatter;
use docrag::cli::{Cli, Commands};
use docrag::logging;
use docrag::models::{Config, OutputFormat};

/// Detect ONNX Runtime library path and set ORT_DYLIB_PATH if not already set.
/// Must be called before any ort code runs.
fn detect_and_set_ort_path() {
    if std::env::var("ORT_DYLIB_PATH")
        .map(|p| Path::new(&p).exists())
        .unwrap_or(false)
    {
        return;
    }

    let home = std::env::var("HOME").unwrap_or_default();

    let found = if cfg!(target_os = "macos") {
        [
            format!("{home}/.local/lib/docrag/libonnxruntime.dylib"),
            "/opt/homebrew/opt/onnxruntime/lib/libonnxruntime.dylib".into(),
            "/usr/local/opt/onnxruntime/lib/libonnxruntime.dylib".into(),
        ]
        .into_iter()
        .find(|p| Path::new(p).exists())
    } else if cfg!(target_os = "linux") {
        [
            format!("{home}/.local/lib/docrag/libonnxruntime.so"),
            "/usr/lib/libonnxruntime.so".into(),
            "/usr/local/lib/libonnxruntime.so".into(),
            "/usr/lib/x86_64-linux-gnu/libonnxruntime.so".into(),
            "/usr/lib/aarch64-linux-gnu/libonnxruntime.so".into(),
        ]
        .into_iter()
        .find(|p| Path::new(p).exists())
    } else {
        None
    };

    if let Some(path) = found {
        // SAFETY: runs before the async runtime starts, so no other thread exists.
        unsafe {
            std::env::set_var("ORT_DYLIB_PATH", path);
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    detect_and_set_ort_path();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let config = match (&cli.command, Config::load(cli.config.as_deref())) {
        (_, Ok(config)) => config,
        // Config commands must work even when the file is missing or invalid
        (Commands::Config(_), Err(_)) => Config::default(),
        (_, Err(e)) => {
            let error = anyhow::Error::new(e).context("failed to load configuration");
            return report(Err(error), cli.format.unwrap_or_default());
        }
    };

    logging::init(&config.logging.level, cli.verbose);
    let format = cli.format.unwrap_or(config.search.default_format);
    report(run_command(cli, config, format).await, format)
}

async fn run_command(cli: Cli, config: Config, format: OutputFormat) -> Result<()> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Ingest(args) => handle_ingest(args, config, format, verbose).await,
        Commands::Search(args) => handle_search(args, config, format, verbose).await,
        Commands::Context(args) => handle_context(args, config, format, verbose).await,
        Commands::Status => handle_status(config, format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, cli.config.as_deref(), format).await,
    }
}

fn report(result: Result<()>, format: OutputFormat) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let formatter = get_formatter(format);
            eprintln!("{}", formatter.format_error(&format!("{e:#}")).trim_end());
            ExitCode::FAILURE
        }
    }
}
