//! Disk image management through hdiutil
//!
//! Creates the sparse scratch volume the installer package is installed
//! into, attaches and detaches it, and optionally packs the resulting
//! installer application into a compressed read-only image.

use std::fs;
use std::io;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use log::{error, info, warn};

use crate::error::DiskToolError;
use crate::parsers::parse_property_list;

/// Wrapper around the hdiutil command-line tool
#[derive(Debug, Clone)]
pub struct DiskImageManager {
    hdiutil: PathBuf,
    mount_root: PathBuf,
}

impl DiskImageManager {
    pub fn new(hdiutil: impl Into<PathBuf>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            hdiutil: hdiutil.into(),
            mount_root: mount_root.into(),
        }
    }

    /// Create an empty HFS+ sparse image of `size` at `output_path`.
    ///
    /// A stale image already sitting at `output_path` is deleted first, so
    /// repeated runs always start from a single fresh image.
    pub fn create_sparse_volume(
        &self,
        volume_name: &str,
        output_path: &Path,
        size: &str,
    ) -> Result<PathBuf, DiskToolError> {
        remove_stale_image(output_path)?;

        info!("Making empty sparseimage {}...", output_path.display());
        let output = self.run(&[
            OsStr::new("create"),
            OsStr::new("-size"),
            OsStr::new(size),
            OsStr::new("-fs"),
            OsStr::new("HFS+"),
            OsStr::new("-volname"),
            OsStr::new(volume_name),
            OsStr::new("-type"),
            OsStr::new("SPARSE"),
            OsStr::new("-plist"),
            output_path.as_os_str(),
        ])?;

        if !output.status.success() {
            return Err(failed("create", &output));
        }
        parse_created_image(&output.stdout)
    }

    /// Attach an image without browsing it, returning its first mountpoint.
    ///
    /// `Ok(None)` means hdiutil refused or reported nothing mounted.
    pub fn mount(&self, image_path: &Path) -> Result<Option<PathBuf>, DiskToolError> {
        let output = self.run(&[
            OsStr::new("attach"),
            image_path.as_os_str(),
            OsStr::new("-mountRandom"),
            self.mount_root.as_os_str(),
            OsStr::new("-nobrowse"),
            OsStr::new("-plist"),
            OsStr::new("-owners"),
            OsStr::new("on"),
        ])?;

        if !output.status.success() {
            error!(
                "Error: \"{}\" while mounting {}.",
                String::from_utf8_lossy(&output.stderr).trim(),
                image_path.display()
            );
            return Ok(None);
        }

        let mountpoint = parse_mount_point(&output.stdout)?;
        if let Some(ref mountpoint) = mountpoint {
            info!("Mounted {} at {}", image_path.display(), mountpoint.display());
        }
        Ok(mountpoint)
    }

    /// Detach a mounted volume, forcing it if the polite attempt fails.
    ///
    /// A failed forced detach is logged and otherwise ignored.
    pub fn unmount(&self, mountpoint: &Path) {
        match self.run(&[OsStr::new("detach"), mountpoint.as_os_str()]) {
            Ok(output) if output.status.success() => {
                info!("Unmounted {}", mountpoint.display());
                return;
            }
            Ok(output) => warn!(
                "Polite unmount failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(err) => warn!("Polite unmount failed: {}", err),
        }

        warn!("Attempting to force unmount {}", mountpoint.display());
        let forced = self.run(&[OsStr::new("detach"), mountpoint.as_os_str(), OsStr::new("-force")]);
        match forced {
            Ok(output) if output.status.success() => info!("Force unmounted {}", mountpoint.display()),
            _ => error!("Failed to unmount {}", mountpoint.display()),
        }
    }

    /// Pack `app_path` into a compressed read-only image at `dmg_path`
    pub fn create_compressed_image(&self, app_path: &Path, dmg_path: &Path) -> Result<(), DiskToolError> {
        remove_stale_image(dmg_path)?;

        info!(
            "Making read-only compressed disk image containing {}...",
            app_path.file_name().unwrap_or(app_path.as_os_str()).to_string_lossy()
        );
        let output = self.run(&[
            OsStr::new("create"),
            OsStr::new("-fs"),
            OsStr::new("HFS+"),
            OsStr::new("-srcfolder"),
            app_path.as_os_str(),
            dmg_path.as_os_str(),
        ])?;

        if !output.status.success() {
            return Err(failed("create", &output));
        }
        info!("Disk image created at: {}", dmg_path.display());
        Ok(())
    }

    fn run(&self, args: &[&OsStr]) -> Result<Output, DiskToolError> {
        Command::new(&self.hdiutil)
            .args(args)
            .output()
            .map_err(|source| DiskToolError::Spawn {
                tool: self.hdiutil.display().to_string(),
                source,
            })
    }
}

fn remove_stale_image(path: &Path) -> Result<(), DiskToolError> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => Err(err),
    };
    result.map_err(|source| DiskToolError::StaleImage {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Removed stale image {}", path.display());
    Ok(())
}

fn failed(operation: &'static str, output: &Output) -> DiskToolError {
    DiskToolError::Failed {
        operation,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Image path from `hdiutil create -plist` output: the first string of the top-level array
pub fn parse_created_image(stdout: &[u8]) -> Result<PathBuf, DiskToolError> {
    let value = parse_property_list(stdout).map_err(|err| match err {
        crate::error::MalformedDocument::PropertyList(source) => DiskToolError::Malformed {
            operation: "create",
            source,
        },
        other => DiskToolError::Unexpected {
            operation: "create",
            output: other.to_string(),
        },
    })?;

    value
        .as_array()
        .and_then(|items| items.first())
        .and_then(plist::Value::as_string)
        .map(PathBuf::from)
        .ok_or_else(|| DiskToolError::Unexpected {
            operation: "create",
            output: String::from_utf8_lossy(stdout).trim().to_string(),
        })
}

/// First `mount-point` among the `system-entities` of `hdiutil attach -plist` output
pub fn parse_mount_point(stdout: &[u8]) -> Result<Option<PathBuf>, DiskToolError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value = parse_property_list(stdout).map_err(|err| match err {
        crate::error::MalformedDocument::PropertyList(source) => DiskToolError::Malformed {
            operation: "attach",
            source,
        },
        other => DiskToolError::Unexpected {
            operation: "attach",
            output: other.to_string(),
        },
    })?;

    let mountpoint = value
        .as_dictionary()
        .and_then(|dict| dict.get("system-entities"))
        .and_then(plist::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(plist::Value::as_dictionary)
        .find_map(|entity| entity.get("mount-point").and_then(plist::Value::as_string))
        .map(PathBuf::from);

    Ok(mountpoint)
}
