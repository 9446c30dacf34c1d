//! URL replication module
//!
//! Every network fetch funnels through [`Replicator`]: a URL is downloaded to
//! `<root>/<path component of the URL>`, so the working directory mirrors
//! the server's layout.
//!
//! Responsible for:
//! - Deterministic local path derivation
//! - Streaming downloads through a `.part` file and an atomic rename
//! - Percent progress when the server reports a length
//! - The reuse policy for payloads whose size is known from the catalog
//! - Abandoning a transfer as soon as the interrupt flag is raised

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info};
use reqwest::blocking::Client;
use url::Url;

use crate::error::ReplicationError;
use crate::models::EventSink;

/// Connect timeout; transfers themselves are unbounded since payloads run to gigabytes
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer size for streaming downloads
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Whether an existing local copy may stand in for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationPolicy {
    /// Always download, overwriting whatever is on disk
    #[default]
    Always,
    /// Skip the download when the local file's length equals the size the
    /// catalog published for it
    ReuseMatchingSize,
}

/// Downloads URLs into a mirrored directory tree
pub struct Replicator {
    client: Client,
    root: PathBuf,
    policy: ReplicationPolicy,
    events: EventSink,
    cancel: Arc<AtomicBool>,
}

impl Replicator {
    /// Create a replicator rooted at `root`
    pub fn new(
        root: impl Into<PathBuf>,
        policy: ReplicationPolicy,
        events: EventSink,
    ) -> Result<Self, ReplicationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(ReplicationError::Client)?;

        Ok(Self::with_client(client, root, policy, events))
    }

    /// Create a replicator around an existing HTTP client
    pub fn with_client(
        client: Client,
        root: impl Into<PathBuf>,
        policy: ReplicationPolicy,
        events: EventSink,
    ) -> Self {
        Self {
            client,
            root: root.into(),
            policy,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abandon transfers once `cancel` is set
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Local path `url` replicates to
    pub fn local_path(&self, url: &str) -> Result<PathBuf, ReplicationError> {
        local_path_for(url, &self.root)
    }

    /// Download `url` into the mirror, always fetching
    pub fn replicate(&self, url: &str) -> Result<PathBuf, ReplicationError> {
        let local_path = self.local_path(url)?;
        self.fetch(url, &local_path)?;
        Ok(local_path)
    }

    /// Download `url` into the mirror, honouring the reuse policy when the
    /// expected size is known
    pub fn replicate_sized(
        &self,
        url: &str,
        expected_size: Option<u64>,
    ) -> Result<PathBuf, ReplicationError> {
        let local_path = self.local_path(url)?;

        if self.policy == ReplicationPolicy::ReuseMatchingSize {
            if let (Some(expected), Ok(metadata)) = (expected_size, fs::metadata(&local_path)) {
                if metadata.is_file() && metadata.len() == expected {
                    info!("Reusing {} ({} bytes)", local_path.display(), expected);
                    self.events.status(format!("{} (cached)", display_name(url)));
                    return Ok(local_path);
                }
            }
        }

        self.fetch(url, &local_path)?;
        Ok(local_path)
    }

    fn fetch(&self, url: &str, local_path: &Path) -> Result<(), ReplicationError> {
        self.check_cancel(url)?;
        info!("Downloading {}...", url);
        self.events.status(format!("{}...", display_name(url)));

        if let Some(parent) = local_path.parent() {
            // create_dir_all already treats a concurrent creation as success
            fs::create_dir_all(parent).map_err(|source| ReplicationError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| ReplicationError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ReplicationError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length();
        self.store(url, response, local_path, total)?;

        debug!("Replicated {} to {}", url, local_path.display());
        Ok(())
    }

    /// Stream `body` into `<local_path>.part`, renaming it into place only
    /// once complete
    fn store(
        &self,
        url: &str,
        body: impl Read,
        local_path: &Path,
        total: Option<u64>,
    ) -> Result<(), ReplicationError> {
        let part_path = part_path(local_path);
        if let Err(err) = self.stream_to_file(url, body, &part_path, total) {
            let _ = fs::remove_file(&part_path);
            return Err(err);
        }

        fs::rename(&part_path, local_path).map_err(|source| ReplicationError::Io {
            path: local_path.to_path_buf(),
            source,
        })
    }

    fn stream_to_file(
        &self,
        url: &str,
        mut response: impl Read,
        part_path: &Path,
        total: Option<u64>,
    ) -> Result<u64, ReplicationError> {
        let io_error = |source: std::io::Error| ReplicationError::Io {
            path: part_path.to_path_buf(),
            source,
        };

        let mut writer = BufWriter::new(File::create(part_path).map_err(io_error)?);
        let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
        let mut downloaded: u64 = 0;
        let mut last_percent: Option<u64> = None;

        loop {
            self.check_cancel(url)?;
            let bytes_read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ReplicationError::Transfer {
                        url: url.to_string(),
                        source,
                    })
                }
            };

            writer.write_all(&buffer[..bytes_read]).map_err(io_error)?;
            downloaded += bytes_read as u64;

            if let Some(percent) = percent_complete(downloaded, total) {
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    self.events.percent(percent as f64);
                }
            }
        }

        writer.flush().map_err(io_error)?;
        Ok(downloaded)
    }

    fn check_cancel(&self, url: &str) -> Result<(), ReplicationError> {
        if self.is_cancelled() {
            info!("Download of {} cancelled", url);
            return Err(ReplicationError::Cancelled { url: url.to_string() });
        }
        Ok(())
    }
}

/// Map a URL to `<root>/<normalized URL path>`.
///
/// Pure: the same URL and root always give the same path, whether or not a
/// download ever succeeds. `..` segments cannot climb above `root`.
pub fn local_path_for(url: &str, root: &Path) -> Result<PathBuf, ReplicationError> {
    let parsed = Url::parse(url).map_err(|err| ReplicationError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    let mut relative = PathBuf::new();
    for segment in parsed.path().split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                relative.pop();
            }
            segment => relative.push(segment),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(ReplicationError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no path component".to_string(),
        });
    }

    Ok(root.join(relative))
}

/// Integer percent complete; `None` when the total is unknown or zero
pub fn percent_complete(downloaded: u64, total: Option<u64>) -> Option<u64> {
    match total {
        Some(total) if total > 0 => Some(downloaded.saturating_mul(100) / total),
        _ => None,
    }
}

fn part_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    local_path.with_file_name(name)
}

/// Last path segment of a URL, for status lines
fn display_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
