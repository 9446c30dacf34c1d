//! Global constants for osreinstaller
//!
//! Centralized location for application-wide constants

/// Application subsystem identifier for macOS Unified Logging System
pub const APP_SUBSYSTEM: &str = "ch.srgssr.osreinstaller";

/// Catalog used when neither the config file nor the command line names one
pub const DEFAULT_CATALOG_URL: &str = "https://reposado.srgssr.ch/content/catalogs/others/\
index-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1_3_Fast.sucatalog";

/// Working directory holding the replicated catalog, payloads and the sparse image
pub const DEFAULT_WORKDIR: &str = "/tmp/OSReinstaller";

/// Directory under which hdiutil picks a random mount location
pub const DEFAULT_MOUNT_ROOT: &str = "/tmp";

/// Size of the scratch sparse image
pub const DEFAULT_IMAGE_SIZE: &str = "8g";

pub const HDIUTIL_PATH: &str = "/usr/bin/hdiutil";
pub const INSTALLER_PATH: &str = "/usr/sbin/installer";
pub const SCRIPT_PATH: &str = "/usr/bin/script";
pub const CAFFEINATE_PATH: &str = "/usr/bin/caffeinate";

/// Value of `ExtendedMetaInfo.InstallAssistantPackageIdentifiers.OSInstall`
/// that marks a catalog product as a full OS installer
pub const OS_INSTALL_MARKER: &str = "com.apple.mpkg.OSInstall";

/// Erase-install executable, relative to the installer application bundle
pub const STARTOSINSTALL_RELATIVE_PATH: &str = "Contents/Resources/startosinstall";

/// Prefix for the sparse image volume name
pub const VOLUME_NAME_PREFIX: &str = "Install_macOS";

/// Phase text shown once startosinstall announces the restart
pub const RESTART_MESSAGE: &str = "System will restart and begin install of macOS.";

/// Status text shown once startosinstall announces the restart
pub const RESTART_STATUS: &str = "done";

/// Percent value reported when a progress numeral cannot be parsed
pub const UNKNOWN_PERCENT: f64 = -1.0;

/// Environment variable that keeps startosinstall from buffering its output
pub const UNBUFFERED_IO_ENV: (&str, &str) = ("NSUnbufferedIO", "YES");

/// Config file location, relative to the user's config directory
pub const CONFIG_DIR_NAME: &str = "osreinstaller";
pub const CONFIG_FILE_NAME: &str = "config.toml";
