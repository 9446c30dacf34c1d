//! Console progress display for install runs
//!
//! Phases and stages print as ordinary lines on stdout. Status text and
//! percent share one line on stderr that is rewritten in place.

use std::io::{self, Write};

use crate::models::{ProgressEvent, Stage};

/// Width of the textual progress bar
const BAR_WIDTH: usize = 30;

/// Human-readable renderer for [`ProgressEvent`]s
pub struct InstallProgress {
    quiet_mode: bool,
    status: String,
    percent: Option<f64>,
    /// A rewritable line is currently on screen
    line_active: bool,
}

impl InstallProgress {
    pub fn new(quiet_mode: bool) -> Self {
        Self {
            quiet_mode,
            status: String::new(),
            percent: None,
            line_active: false,
        }
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Stage(stage) => {
                self.percent = None;
                self.status.clear();
                self.println(&format!("==> {}", stage_title(*stage)));
            }
            ProgressEvent::Product(product) => {
                let build = product.build.as_deref().unwrap_or("unknown build");
                self.println(&format!(
                    "Selected {} {} ({}) [{}]",
                    display_title(&product.title),
                    product.version,
                    build,
                    product.product_id
                ));
            }
            ProgressEvent::Phase(phase) => self.println(phase),
            ProgressEvent::Status(status) => {
                self.status = status.clone();
                self.update_line();
            }
            ProgressEvent::Percent(percent) => {
                self.percent = Some(*percent);
                self.update_line();
            }
            ProgressEvent::Warning(message) => {
                // Warnings show even in quiet mode
                self.clear_line();
                eprintln!("warning: {}", message);
            }
        }
    }

    /// End with a clean line
    pub fn finish(&mut self) {
        if self.line_active {
            eprintln!();
            self.line_active = false;
        }
        io::stderr().flush().unwrap_or(());
    }

    fn println(&mut self, message: &str) {
        if self.quiet_mode {
            return;
        }
        self.clear_line();
        println!("{}", message);
        io::stdout().flush().unwrap_or(());
    }

    fn update_line(&mut self) {
        if self.quiet_mode {
            return;
        }
        eprint!("\r\x1b[2K{}", render_line(&self.status, self.percent));
        io::stderr().flush().unwrap_or(());
        self.line_active = true;
    }

    fn clear_line(&mut self) {
        if self.line_active {
            eprint!("\r\x1b[2K");
            io::stderr().flush().unwrap_or(());
            self.line_active = false;
        }
    }
}

impl Drop for InstallProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

/// `[#####-----]  42% status`; an unknown percent (-1) renders as `  ?%`
pub fn render_line(status: &str, percent: Option<f64>) -> String {
    let Some(percent) = percent else {
        return status.to_string();
    };

    if percent < 0.0 {
        return format!("[{}]   ?% {}", "?".repeat(BAR_WIDTH), status).trim_end().to_string();
    }

    let clamped = percent.min(100.0);
    let filled = ((clamped / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}% {}",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        clamped,
        status
    )
    .trim_end()
    .to_string()
}

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Catalog => "Fetching catalog",
        Stage::Resolve => "Resolving installer products",
        Stage::Fetch => "Downloading packages",
        Stage::Image => "Preparing disk image",
        Stage::Install => "Installing product to disk image",
        Stage::LocateApp => "Locating installer application",
        Stage::EraseInstall => "Erasing and reinstalling macOS",
        Stage::Export => "Creating compressed disk image",
    }
}

fn display_title(title: &str) -> &str {
    if title.is_empty() {
        "<untitled>"
    } else {
        title
    }
}
