//! Pipeline controller
//!
//! Drives one session from catalog to erase-install:
//!
//! 1. replicate and parse the catalog
//! 2. resolve every OS installer product and pick the newest
//! 3. replicate the chosen product's packages
//! 4. create and mount a sparse volume named after version and build
//! 5. install the product into it
//! 6. locate the installer application inside the volume
//! 7. run its erase-install tool (or, for `download`, export it)
//!
//! There is no retry across stages. The interrupt flag is checked between
//! stages, inside every download and inside the installer output loops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use glob::Pattern;
use log::{error, info, warn};
use serde::Serialize;

use crate::catalog::{resolve_all, resolve_catalog, select_newest, sort_newest_first};
use crate::config::PipelineConfig;
use crate::constants::{STARTOSINSTALL_RELATIVE_PATH, VOLUME_NAME_PREFIX};
use crate::diskimage::DiskImageManager;
use crate::error::{describe, FetchError, PipelineError, Stage};
use crate::fetch::fetch_product;
use crate::install::{select_spawner, InstallOrchestrator, ProcessSpawner};
use crate::models::{EventSink, ProductInfo, ProgressEvent};
use crate::replicate::Replicator;

/// What a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub product: ProductInfo,
    pub image: PathBuf,
    pub mountpoint: PathBuf,
    pub installer_app: PathBuf,
    /// Packages that could not be replicated; the install went ahead anyway
    pub failed_downloads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_image: Option<PathBuf>,
}

/// One configured session of the reinstall pipeline
pub struct Pipeline {
    config: PipelineConfig,
    replicator: Replicator,
    disks: DiskImageManager,
    orchestrator: InstallOrchestrator,
    events: EventSink,
    interrupted: Arc<AtomicBool>,
}

impl Pipeline {
    /// Build a pipeline, choosing the terminal strategy from the config
    pub fn new(
        config: PipelineConfig,
        events: EventSink,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        let spawner = select_spawner(config.behavior.terminal, &config.tools.script);
        Self::with_spawner(config, spawner, events, interrupted)
    }

    pub fn with_spawner(
        config: PipelineConfig,
        spawner: Box<dyn ProcessSpawner>,
        events: EventSink,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        let replicator = Replicator::new(
            config.paths.workdir.clone(),
            config.replication_policy(),
            events.clone(),
        )
        .map_err(|source| PipelineError::Replication {
            stage: Stage::Catalog,
            source,
        })?
        .with_cancel(interrupted.clone());

        let disks = DiskImageManager::new(config.tools.hdiutil.clone(), config.paths.mount_root.clone());
        let orchestrator = InstallOrchestrator::new(
            config.tools.installer.clone(),
            spawner,
            config.line_timeout(),
            interrupted.clone(),
        );

        Ok(Self {
            config,
            replicator,
            disks,
            orchestrator,
            events,
            interrupted,
        })
    }

    /// Every OS installer product in the catalog, newest first
    pub fn list_products(&self) -> Result<Vec<ProductInfo>, PipelineError> {
        let catalog = self.load_catalog()?;

        self.begin(Stage::Resolve)?;
        let mut products =
            resolve_all(&catalog, &self.replicator).map_err(|source| fetch_error(Stage::Resolve, source))?;
        sort_newest_first(&mut products);
        Ok(products)
    }

    /// Full reinstall: ends in startosinstall, which reboots the machine
    pub fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        let prepared = self.prepare()?;

        if let Err(err) = self.begin(Stage::EraseInstall) {
            self.disks.unmount(&prepared.mountpoint);
            return Err(err);
        }
        let startosinstall = prepared.installer_app.join(STARTOSINSTALL_RELATIVE_PATH);
        if let Err(source) =
            self.orchestrator
                .run_erase_install(&startosinstall, &prepared.installer_app, &self.events)
        {
            error!("Erase-install failed: {}", describe(&source));
            self.disks.unmount(&prepared.mountpoint);
            return Err(PipelineError::Install {
                stage: Stage::EraseInstall,
                source,
            });
        }

        Ok(prepared)
    }

    /// Stop after the product install; optionally pack the installer app
    /// into a compressed image, then unmount
    pub fn download(&self, dmg_path: Option<&Path>) -> Result<PipelineOutcome, PipelineError> {
        let mut prepared = self.prepare()?;

        if let Some(dmg_path) = dmg_path {
            let exported = self
                .begin(Stage::Export)
                .and_then(|()| {
                    self.disks
                        .create_compressed_image(&prepared.installer_app, dmg_path)
                        .map_err(|source| PipelineError::DiskTool {
                            stage: Stage::Export,
                            source,
                        })
                });
            if let Err(err) = exported {
                self.disks.unmount(&prepared.mountpoint);
                return Err(err);
            }
            prepared.compressed_image = Some(dmg_path.to_path_buf());
        }

        self.disks.unmount(&prepared.mountpoint);
        Ok(prepared)
    }

    /// Stages shared by `run` and `download`, up to a located installer app
    fn prepare(&self) -> Result<PipelineOutcome, PipelineError> {
        let catalog = self.load_catalog()?;

        self.begin(Stage::Resolve)?;
        let products =
            resolve_all(&catalog, &self.replicator).map_err(|source| fetch_error(Stage::Resolve, source))?;
        let product = select_newest(&products)
            .cloned()
            .ok_or_else(|| fetch_error(Stage::Resolve, FetchError::NoInstallerProducts))?;
        info!(
            "Selected product {}: {} {} ({})",
            product.product_id,
            product.title,
            product.version,
            product.build.as_deref().unwrap_or("unknown build")
        );
        self.events.emit(ProgressEvent::Product(product.clone()));

        self.begin(Stage::Fetch)?;
        let report = fetch_product(&catalog, &product.product_id, &self.replicator, &self.events)
            .map_err(|source| fetch_error(Stage::Fetch, source))?;
        if !report.is_complete() {
            warn!(
                "{} package downloads failed; continuing with the install",
                report.failed.len()
            );
        }

        self.begin(Stage::Image)?;
        let name = volume_name(&product);
        let image_path = self.config.paths.workdir.join(format!("{}.sparseimage", name));
        self.events.phase("Making empty sparseimage...");
        let image = self
            .disks
            .create_sparse_volume(&name, &image_path, &self.config.image.size)
            .map_err(|source| PipelineError::DiskTool {
                stage: Stage::Image,
                source,
            })?;
        let mountpoint = self
            .disks
            .mount(&image)
            .map_err(|source| PipelineError::DiskTool {
                stage: Stage::Image,
                source,
            })?
            .ok_or_else(|| PipelineError::MountFailed { image: image.clone() })?;

        // From here on every failure unmounts before returning
        let unmount_on_error = |err: PipelineError| {
            self.disks.unmount(&mountpoint);
            err
        };

        self.begin(Stage::Install).map_err(unmount_on_error)?;
        self.events.phase("Installing product to disk image...");
        self.orchestrator
            .run_installer(&product.distribution_path, &mountpoint, &self.events)
            .map_err(|source| PipelineError::Install {
                stage: Stage::Install,
                source,
            })
            .map_err(unmount_on_error)?;

        self.begin(Stage::LocateApp).map_err(unmount_on_error)?;
        let applications = mountpoint.join("Applications");
        let installer_app = find_installer_app(&applications)
            .ok_or_else(|| PipelineError::InstallerAppNotFound { dir: applications.clone() })
            .map_err(unmount_on_error)?;
        info!("Found installer application {}", installer_app.display());

        Ok(PipelineOutcome {
            product,
            image,
            mountpoint,
            installer_app,
            failed_downloads: report.failed.len(),
            compressed_image: None,
        })
    }

    fn load_catalog(&self) -> Result<crate::models::Catalog, PipelineError> {
        self.begin(Stage::Catalog)?;
        self.events.phase("Downloading and parsing catalog...");
        resolve_catalog(&self.replicator, &self.config.catalog.url)
            .map_err(|source| fetch_error(Stage::Catalog, source))
    }

    /// Announce `stage`, unless the operator interrupted us
    fn begin(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted before {}", stage);
            return Err(PipelineError::Interrupted(stage));
        }
        self.events.stage(stage);
        Ok(())
    }
}

fn fetch_error(stage: Stage, source: FetchError) -> PipelineError {
    if source.is_cancelled() {
        warn!("Interrupted during {}", stage);
        return PipelineError::Interrupted(stage);
    }
    PipelineError::Fetch { stage, source }
}

/// `Install_macOS_<version>-<build>`, with `unknown` standing in for missing parts
pub fn volume_name(product: &ProductInfo) -> String {
    let version = if product.version.is_empty() {
        "unknown"
    } else {
        product.version.as_str()
    };
    let build = product.build.as_deref().filter(|build| !build.is_empty()).unwrap_or("unknown");
    format!("{}_{}-{}", VOLUME_NAME_PREFIX, version, build).replace('/', "_")
}

/// First top-level entry of `dir` (in name order) that contains the
/// erase-install executable
pub fn find_installer_app(dir: &Path) -> Option<PathBuf> {
    let Some(dir_str) = dir.to_str() else {
        warn!("Cannot search non UTF-8 path {}", dir.display());
        return None;
    };
    let pattern = format!("{}/*", Pattern::escape(dir_str));

    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Invalid search pattern {}: {}", pattern, err);
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .find(|entry| entry.join(STARTOSINSTALL_RELATIVE_PATH).is_file())
}
