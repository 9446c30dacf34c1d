//! Error taxonomy
//!
//! Each stage of the pipeline has its own error type. Failures for
//! best-effort documents never reach these types; they are logged and
//! downgraded to empty data where they happen. Everything that does reach
//! them propagates to the pipeline controller, which is the only place an
//! operator-facing message is produced.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// A single URL could not be replicated into the working directory
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to create HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("request for {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("download of {url} cancelled")]
    Cancelled { url: String },

    #[error("transfer of {url} failed")]
    Transfer {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A property list or XML document could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum MalformedDocument {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid property list")]
    PropertyList(#[from] plist::Error),

    #[error("invalid XML")]
    Xml(#[from] roxmltree::Error),

    #[error("expected a dictionary at the top level")]
    NotADictionary,
}

/// The catalog or a required per-product document could not be obtained
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("could not replicate catalog {url}")]
    CatalogReplication {
        url: String,
        #[source]
        source: ReplicationError,
    },

    #[error("error reading catalog {}", path.display())]
    CatalogMalformed {
        path: PathBuf,
        #[source]
        source: MalformedDocument,
    },

    #[error("product {0} is not listed in the catalog")]
    UnknownProduct(String),

    #[error("product {product} has neither an English nor an en distribution")]
    NoLocalizedDistribution { product: String },

    #[error("could not replicate distribution for {product}")]
    DistributionReplication {
        product: String,
        #[source]
        source: ReplicationError,
    },

    #[error("no OS installer products found in catalog")]
    NoInstallerProducts,

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// True when the operator interrupted a download rather than it failing
    pub fn is_cancelled(&self) -> bool {
        match self {
            FetchError::Cancelled => true,
            FetchError::CatalogReplication { source, .. }
            | FetchError::DistributionReplication { source, .. } => {
                matches!(source, ReplicationError::Cancelled { .. })
            }
            _ => false,
        }
    }
}

/// hdiutil failed or printed something we could not make sense of
#[derive(Debug, thiserror::Error)]
pub enum DiskToolError {
    #[error("failed to run {tool}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("hdiutil {operation} failed ({status}): {stderr}")]
    Failed {
        operation: &'static str,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from hdiutil {operation}: {output}")]
    Unexpected {
        operation: &'static str,
        output: String,
    },

    #[error("malformed output from hdiutil {operation}")]
    Malformed {
        operation: &'static str,
        #[source]
        source: plist::Error,
    },

    #[error("could not remove stale image {}", path.display())]
    StaleImage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A streaming read from a child process did not produce a line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("no output for {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// One of the two installer processes failed
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("product installation failed ({status})")]
    InstallFailure { status: String, log: Vec<String> },

    #[error("startosinstall failed ({status})")]
    EraseInstallFailed { status: String, log: Vec<String> },

    #[error("reading output of {program}")]
    Stream {
        program: String,
        #[source]
        source: StreamError,
        log: Vec<String>,
    },

    #[error("waiting for {program}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    /// Raw output retained for postmortem diagnostics, if any
    pub fn log(&self) -> &[String] {
        match self {
            InstallError::InstallFailure { log, .. }
            | InstallError::EraseInstallFailed { log, .. }
            | InstallError::Stream { log, .. } => log,
            InstallError::Spawn { .. } | InstallError::Wait { .. } => &[],
        }
    }
}

/// `err` and each of its causes, joined with `: `
pub fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    anyhow::Chain::new(err)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

/// Pipeline stage, used to tag progress and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Catalog,
    Resolve,
    Fetch,
    Image,
    Install,
    LocateApp,
    EraseInstall,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Catalog => "catalog",
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Image => "image",
            Stage::Install => "install",
            Stage::LocateApp => "locate app",
            Stage::EraseInstall => "erase install",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a pipeline run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} stage failed")]
    Fetch {
        stage: Stage,
        #[source]
        source: FetchError,
    },

    #[error("{stage} stage failed")]
    Replication {
        stage: Stage,
        #[source]
        source: ReplicationError,
    },

    #[error("{stage} stage failed")]
    DiskTool {
        stage: Stage,
        #[source]
        source: DiskToolError,
    },

    #[error("could not mount {}", image.display())]
    MountFailed { image: PathBuf },

    #[error("{stage} stage failed")]
    Install {
        stage: Stage,
        #[source]
        source: InstallError,
    },

    #[error("startosinstall not found in {}", dir.display())]
    InstallerAppNotFound { dir: PathBuf },

    #[error("interrupted before {0}")]
    Interrupted(Stage),
}
