//! Line classification for installer tool output
//!
//! Both tools print free-form text. These functions turn one line into a
//! typed value; acting on it is left to [`super::session::InstallSession`].

use crate::constants::UNKNOWN_PERCENT;

const INSTALLER_PREFIX: &str = "installer:";

/// One line of `installer -verboseR` output
#[derive(Debug, Clone, PartialEq)]
pub enum InstallerLine {
    Phase(String),
    Status(String),
    Percent(f64),
    /// Anything else, including `installer:` lines with an empty payload
    Other,
}

/// Classify a line printed by the package installer
pub fn classify_installer_line(line: &str) -> InstallerLine {
    let Some(message) = line.trim().strip_prefix(INSTALLER_PREFIX) else {
        return InstallerLine::Other;
    };

    if let Some(phase) = message.strip_prefix("PHASE:") {
        if !phase.is_empty() {
            return InstallerLine::Phase(phase.to_string());
        }
    } else if let Some(status) = message.strip_prefix("STATUS:") {
        if !status.is_empty() {
            return InstallerLine::Status(status.to_string());
        }
    } else if let Some(percent) = message.strip_prefix('%') {
        if let Ok(value) = percent.trim().parse::<f64>() {
            if value.is_finite() {
                return InstallerLine::Percent(value);
            }
        }
    }
    InstallerLine::Other
}

/// One line of `startosinstall` output
#[derive(Debug, Clone, PartialEq)]
pub enum EraseInstallLine {
    /// `Preparing to ...`; shown verbatim as the phase
    Phase(String),
    /// `Preparing <n>.`; whole percent, or -1 when the numeral is garbage
    Percent(f64),
    /// License boilerplate and blank lines: neither logged nor shown
    Suppressed,
    /// Helper-tool and reboot signalling chatter: logged only
    LogOnly(String),
    /// The tool is about to restart the machine
    Restarting,
    /// Anything else; shown verbatim as the status
    Status(String),
}

const SUPPRESSED_PREFIXES: &[&str] = &["By using the agreetolicense option", "If you do not agree,"];

// "Helper tool cr" also covers the "creashed" typo older releases print
const LOG_ONLY_PREFIXES: &[&str] = &[
    "Helper tool cr",
    "Signaling PID:",
    "Waiting to reboot",
    "Process signaled okay",
];

const RESTART_PREFIX: &str = "System going down for install";

/// Classify a line printed by startosinstall
pub fn classify_erase_install_line(line: &str) -> EraseInstallLine {
    // Only line terminators go; `Preparing ` with nothing after it is still a percent line
    let message = line.trim_end_matches(&['\n', '\r'][..]);

    if message.trim().is_empty() {
        EraseInstallLine::Suppressed
    } else if message.starts_with("Preparing to ") {
        EraseInstallLine::Phase(message.to_string())
    } else if let Some(numeral) = message.strip_prefix("Preparing ") {
        EraseInstallLine::Percent(parse_preparing_percent(numeral))
    } else if SUPPRESSED_PREFIXES.iter().any(|prefix| message.starts_with(prefix)) {
        EraseInstallLine::Suppressed
    } else if LOG_ONLY_PREFIXES.iter().any(|prefix| message.starts_with(prefix)) {
        EraseInstallLine::LogOnly(message.to_string())
    } else if message.starts_with(RESTART_PREFIX) {
        EraseInstallLine::Restarting
    } else {
        EraseInstallLine::Status(message.to_string())
    }
}

/// `"42.0."` -> 42, anything unparseable -> -1
fn parse_preparing_percent(numeral: &str) -> f64 {
    numeral
        .trim()
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(f64::trunc)
        .unwrap_or(UNKNOWN_PERCENT)
}
