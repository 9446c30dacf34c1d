//! osreinstaller - catalog-driven macOS reinstallation
//!
//! This library exposes the pipeline that resolves a software update
//! catalog, replicates the newest OS installer, installs it into a sparse
//! disk image and hands over to `startosinstall` for an erase-install.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod diskimage;
pub mod error;
pub mod fetch;
pub mod install;
pub mod logging;
pub mod models;
pub mod output;
pub mod parsers;
pub mod pipeline;
pub mod replicate;

pub use error::{
    DiskToolError, FetchError, InstallError, MalformedDocument, PipelineError, ReplicationError, Stage,
    StreamError,
};
