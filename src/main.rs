#![forbid(unsafe_code)]

mod cli;

use anyhow::{anyhow, bail, Result};
use log::info;
use std::process::Child;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use cli::{CliArgs, CliCommand};
use osreinstaller::logging::{init_logger, level_for};
use osreinstaller::models::{EventSink, ProductInfo};
use osreinstaller::output::{self, OutputFormat};
use osreinstaller::pipeline::{Pipeline, PipelineOutcome};
use osreinstaller::PipelineError;

/// What the worker thread hands back to the console
enum Finished {
    Products(Vec<ProductInfo>),
    Outcome(PipelineOutcome),
}

fn main() -> Result<()> {
    let args = cli::parse_args()?;
    init_logger(level_for(args.quiet, args.verbose))?;

    // Set up interrupt handling
    let interrupted = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone());

    if args.command.requires_root() && !nix::unistd::Uid::effective().is_root() {
        bail!("This command installs software and must be run as root (try sudo)");
    }

    let mut caffeinate = prevent_sleep(&args.command);
    let result = run_command(args, interrupted);
    if let Some(child) = caffeinate.as_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
    result
}

fn run_command(args: CliArgs, interrupted: Arc<AtomicBool>) -> Result<()> {
    let CliArgs {
        command,
        config,
        format,
        quiet,
        ..
    } = args;

    let (sink, receiver) = EventSink::channel();
    // A JSON listing is the only thing on stdout
    let events = if command == CliCommand::List && format == OutputFormat::Json {
        drop(sink);
        EventSink::silent()
    } else {
        sink
    };

    let worker = {
        let command = command.clone();
        thread::spawn(move || -> Result<Finished, PipelineError> {
            let pipeline = Pipeline::new(config, events, interrupted)?;
            match command {
                CliCommand::List => pipeline.list_products().map(Finished::Products),
                CliCommand::Run => pipeline.run().map(Finished::Outcome),
                CliCommand::Download { dmg } => pipeline.download(dmg.as_deref()).map(Finished::Outcome),
            }
        })
    };

    // The console owns the main thread until the worker drops its sender
    output::render_events(receiver, format, quiet)?;

    let finished = worker
        .join()
        .map_err(|_| anyhow!("Pipeline worker thread panicked"))?;

    match finished {
        Ok(Finished::Products(products)) => {
            match format {
                OutputFormat::Json => println!("{}", output::format_products_json(&products)?),
                OutputFormat::Human => print!("{}", output::format_products_human(&products)),
            }
            Ok(())
        }
        Ok(Finished::Outcome(outcome)) => {
            info!("Pipeline finished for product {}", outcome.product.product_id);
            match format {
                OutputFormat::Json => println!("{}", output::format_outcome_json(&outcome)?),
                OutputFormat::Human if !quiet => print!("{}", output::format_outcome_human(&outcome)),
                OutputFormat::Human => {}
            }
            Ok(())
        }
        Err(err) => Err(anyhow::Error::new(err).context(format!("osreinstaller {} failed", command_name(&command)))),
    }
}

fn command_name(command: &CliCommand) -> &'static str {
    match command {
        CliCommand::Run => "run",
        CliCommand::List => "list",
        CliCommand::Download { .. } => "download",
    }
}

/// Keep the Mac awake while we download and install
#[cfg(target_os = "macos")]
fn prevent_sleep(command: &CliCommand) -> Option<Child> {
    if !command.requires_root() {
        return None;
    }
    std::process::Command::new(osreinstaller::constants::CAFFEINATE_PATH)
        .args(["-d", "-i", "-w"])
        .arg(std::process::id().to_string())
        .spawn()
        .map_err(|e| log::warn!("Could not start caffeinate: {}", e))
        .ok()
}

#[cfg(not(target_os = "macos"))]
fn prevent_sleep(_command: &CliCommand) -> Option<Child> {
    None
}
