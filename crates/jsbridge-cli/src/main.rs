use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::filter::EnvFilter;

mod config;
mod driver;
mod flags;

#[derive(Parser)]
#[command(name = "jsbridge", version, about = "Run JavaScript through the jsbridge C API")]
struct Cli {
    /// Engine configuration file (TOML with an `[engine]` table)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JavaScript source to run
    #[arg(allow_hyphen_values = true)]
    source: Option<String>,
}

fn main() -> ExitCode {
    // stdout belongs to the script
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .cloned()
        .unwrap_or_else(|| "jsbridge".to_string());

    // Engine flags are consumed first; whatever is left is the driver's.
    let (driver_args, engine_args) = config::split_driver_args(&args);
    let engine = flags::apply_from_command_line(&engine_args)?;
    debug!(target: "jsbridge::cli", flags = ?engine.consumed, "engine flags applied");
    let cli = Cli::parse_from(
        driver_args
            .into_iter()
            .chain(engine.remaining.into_iter().skip(1)),
    );

    if let Some(path) = &cli.config {
        let config = config::load_config(path)?;
        let file_flags = config.engine.to_flags();
        debug!(target: "jsbridge::cli", path = %path.display(), flags = ?file_flags, "config loaded");
        flags::apply(&program, &file_flags)?;
        // Command-line flags win over the file.
        flags::apply(&program, &engine.consumed)?;
    }

    let Some(source) = cli.source else {
        println!("usage: {program} <javascript>");
        return Ok(ExitCode::from(1));
    };

    driver::run(&source)?;
    Ok(ExitCode::SUCCESS)
}
