//! Progress state of one installer invocation

use log::info;

use super::classify::{EraseInstallLine, InstallerLine};
use crate::constants::{RESTART_MESSAGE, RESTART_STATUS};
use crate::models::EventSink;

/// Current phase/status/percent of a running tool, plus its raw output
#[derive(Debug)]
pub struct InstallSession {
    events: EventSink,
    pub phase: String,
    pub status: String,
    pub percent: Option<f64>,
    /// Every raw line, in order, whatever its classification
    pub log: Vec<String>,
    /// startosinstall announced the restart
    pub restart_pending: bool,
}

impl InstallSession {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            phase: String::new(),
            status: String::new(),
            percent: None,
            log: Vec::new(),
            restart_pending: false,
        }
    }

    pub fn record(&mut self, line: &str) {
        self.log.push(line.to_string());
    }

    pub fn apply_installer(&mut self, line: InstallerLine) {
        match line {
            InstallerLine::Phase(phase) => self.set_phase(phase),
            InstallerLine::Status(status) => self.set_status(status),
            InstallerLine::Percent(percent) => self.set_percent(percent),
            InstallerLine::Other => {}
        }
    }

    pub fn apply_erase_install(&mut self, line: EraseInstallLine) {
        match line {
            EraseInstallLine::Phase(phase) => self.set_phase(phase),
            EraseInstallLine::Percent(percent) => self.set_percent(percent),
            EraseInstallLine::Suppressed => {}
            EraseInstallLine::LogOnly(message) => info!("{}", message),
            EraseInstallLine::Restarting => {
                self.restart_pending = true;
                self.set_phase(RESTART_MESSAGE.to_string());
                self.set_percent(100.0);
                self.set_status(RESTART_STATUS.to_string());
            }
            EraseInstallLine::Status(status) => self.set_status(status),
        }
    }

    fn set_phase(&mut self, phase: String) {
        info!("{}", phase);
        self.events.phase(phase.clone());
        self.phase = phase;
    }

    fn set_status(&mut self, status: String) {
        info!("{}", status);
        self.events.status(status.clone());
        self.status = status;
    }

    fn set_percent(&mut self, percent: f64) {
        self.events.percent(percent);
        self.percent = Some(percent);
    }
}
