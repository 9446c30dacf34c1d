//! Process spawning behind a terminal
//!
//! startosinstall only prints progress when its output is a terminal. Two
//! strategies provide one: a native pseudo-terminal, or `/usr/bin/script`
//! wrapping the command. `script` works everywhere but busy-polls its
//! stdin, so it costs noticeably more CPU.

use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use log::{debug, info, warn};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::openpty;
use serde::{Deserialize, Serialize};

use crate::constants::UNBUFFERED_IO_ENV;

/// A started child and the stream its terminal output arrives on
pub struct SpawnedProcess {
    pub child: Child,
    pub output: Box<dyn Read + Send>,
}

/// Strategy for running a command with a terminal as its output
pub trait ProcessSpawner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start `program` with `args`; the child inherits the environment plus
    /// `NSUnbufferedIO=YES`
    fn spawn(&self, program: &Path, args: &[&OsStr]) -> io::Result<SpawnedProcess>;
}

/// Child attached to a freshly opened pseudo-terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl PtySpawner {
    /// Whether this host can open a pseudo-terminal at all
    pub fn probe() -> bool {
        match openpty(None, None) {
            Ok(_) => true,
            Err(err) => {
                debug!("openpty unavailable: {}", err);
                false
            }
        }
    }
}

impl ProcessSpawner for PtySpawner {
    fn name(&self) -> &'static str {
        "pty"
    }

    fn spawn(&self, program: &Path, args: &[&OsStr]) -> io::Result<SpawnedProcess> {
        let pty = openpty(None, None)?;
        let master = File::from(pty.master);
        let slave = File::from(pty.slave);

        // The child must not hold the master open, or reads never see EOF
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env(UNBUFFERED_IO_ENV.0, UNBUFFERED_IO_ENV.1)
            .stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave));

        let child = command.spawn()?;
        // Closes the parent's copies of the slave side
        drop(command);

        Ok(SpawnedProcess {
            child,
            output: Box::new(master),
        })
    }
}

/// Child wrapped in `script -q -t 1 /dev/null`
#[derive(Debug, Clone)]
pub struct ScriptSpawner {
    script: PathBuf,
}

impl ScriptSpawner {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self { script: script.into() }
    }
}

impl ProcessSpawner for ScriptSpawner {
    fn name(&self) -> &'static str {
        "script"
    }

    fn spawn(&self, program: &Path, args: &[&OsStr]) -> io::Result<SpawnedProcess> {
        // stdin stays piped and open for the child's lifetime; script exits
        // early when its input hits EOF
        let mut child = Command::new(&self.script)
            .args(["-q", "-t", "1", "/dev/null"])
            .arg(program)
            .args(args)
            .env(UNBUFFERED_IO_ENV.0, UNBUFFERED_IO_ENV.1)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let output = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "script stdout not captured"))?;

        Ok(SpawnedProcess {
            child,
            output: Box::new(output),
        })
    }
}

/// Configured terminal strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalMode {
    /// Native pty when available, `script` otherwise
    #[default]
    Auto,
    Pty,
    Script,
}

impl FromStr for TerminalMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(TerminalMode::Auto),
            "pty" => Ok(TerminalMode::Pty),
            "script" => Ok(TerminalMode::Script),
            other => Err(format!("unknown terminal mode '{}' (expected auto, pty or script)", other)),
        }
    }
}

impl fmt::Display for TerminalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminalMode::Auto => "auto",
            TerminalMode::Pty => "pty",
            TerminalMode::Script => "script",
        };
        f.write_str(name)
    }
}

/// Pick the spawner once, at startup
pub fn select_spawner(mode: TerminalMode, script: &Path) -> Box<dyn ProcessSpawner> {
    let spawner: Box<dyn ProcessSpawner> = match mode {
        TerminalMode::Pty => Box::new(PtySpawner),
        TerminalMode::Script => Box::new(ScriptSpawner::new(script)),
        TerminalMode::Auto if PtySpawner::probe() => Box::new(PtySpawner),
        TerminalMode::Auto => {
            warn!("No pseudo-terminal available, falling back to {}", script.display());
            Box::new(ScriptSpawner::new(script))
        }
    };
    info!("Using {} terminal strategy", spawner.name());
    spawner
}
