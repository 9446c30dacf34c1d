//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - Command selection (run / list / download)
//! - Configuration file loading and per-flag overrides
//! - Output format selection (human/JSON)
//! - Verbosity and quiet modes

use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use osreinstaller::config::PipelineConfig;
use osreinstaller::install::TerminalMode;
use osreinstaller::output::OutputFormat;

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Download, install into a sparse image, then erase-install
    Run,
    /// Print the installer products in the catalog
    List,
    /// Stop before erase-install, optionally exporting a compressed image
    Download { dmg: Option<PathBuf> },
}

impl CliCommand {
    /// Commands that call installer or hdiutil need root
    pub fn requires_root(&self) -> bool {
        !matches!(self, CliCommand::List)
    }
}

/// Parsed command line, with the configuration already resolved
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: CliCommand,
    pub config: PipelineConfig,
    pub format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
}

fn build_command() -> Command {
    Command::new("osreinstaller")
        .version(concat!(env!("OSREINSTALLER_VERSION"), " (", env!("GIT_HASH"), ")"))
        .about("Reinstall macOS from a software update catalog")
        .long_about(
            "Downloads the newest macOS installer listed in a software update catalog, \
             installs it into a scratch disk image and starts an erase-and-install of this Mac.",
        )
        .subcommand(Command::new("run").about("Download the newest installer and erase-install this Mac (default)"))
        .subcommand(Command::new("list").about("List the OS installer products in the catalog"))
        .subcommand(
            Command::new("download")
                .about("Download and prepare the installer without erasing anything")
                .arg(
                    Arg::new("dmg")
                        .long("dmg")
                        .value_name("PATH")
                        .help("Also pack the installer application into a compressed disk image")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default: <config dir>/osreinstaller/config.toml)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("catalog-url")
                .long("catalog-url")
                .value_name("URL")
                .help("Software update catalog to use")
                .global(true),
        )
        .arg(
            Arg::new("workdir")
                .short('w')
                .long("workdir")
                .value_name("DIR")
                .help("Working directory for downloads and the disk image")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("reuse-packages")
                .long("reuse-packages")
                .help("Skip packages already downloaded with the expected size")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("line-timeout")
                .long("line-timeout")
                .value_name("SECONDS")
                .help("Abort an installer tool that prints nothing for this long")
                .value_parser(value_parser!(u64).range(1..))
                .global(true),
        )
        .arg(
            Arg::new("terminal")
                .long("terminal")
                .value_name("MODE")
                .help("How startosinstall gets a terminal")
                .value_parser(["auto", "pty", "script"])
                .global(true),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .help("Output in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only show warnings and errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log debug details")
                .action(ArgAction::SetTrue)
                .global(true),
        )
}

/// Parse command line arguments and return configuration
pub fn parse_args() -> Result<CliArgs> {
    args_from_matches(&build_command().get_matches())
}

fn args_from_matches(matches: &ArgMatches) -> Result<CliArgs> {
    let command = match matches.subcommand() {
        None | Some(("run", _)) => CliCommand::Run,
        Some(("list", _)) => CliCommand::List,
        Some(("download", sub)) => CliCommand::Download {
            dmg: sub.get_one::<PathBuf>("dmg").cloned(),
        },
        Some((other, _)) => return Err(anyhow!("Unknown command: {}", other)),
    };

    let mut config = PipelineConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    apply_overrides(&mut config, matches)?;
    config.validate()?;

    Ok(CliArgs {
        command,
        config,
        format: if matches.get_flag("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: matches.get_flag("quiet"),
        verbose: matches.get_flag("verbose"),
    })
}

fn apply_overrides(config: &mut PipelineConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(url) = matches.get_one::<String>("catalog-url") {
        config.catalog.url = url.clone();
    }
    if let Some(workdir) = matches.get_one::<PathBuf>("workdir") {
        config.paths.workdir = workdir.clone();
    }
    if matches.get_flag("reuse-packages") {
        config.behavior.reuse_packages = true;
    }
    if let Some(seconds) = matches.get_one::<u64>("line-timeout") {
        config.behavior.line_timeout_secs = Some(*seconds);
    }
    if let Some(mode) = matches.get_one::<String>("terminal") {
        config.behavior.terminal = mode.parse::<TerminalMode>().map_err(|e| anyhow!(e))?;
    }
    Ok(())
}
