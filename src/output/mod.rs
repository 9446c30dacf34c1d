//! Output formatting module
//!
//! Handles:
//! - Rendering the progress event stream (human or JSON lines)
//! - Product listings for the `list` command
//! - The final summary of a run

pub mod progress;

use anyhow::Result;
use serde::Serialize;
use std::sync::mpsc::Receiver;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::models::{ProductInfo, ProgressEvent};
use crate::pipeline::PipelineOutcome;
use progress::InstallProgress;

/// Console presentation style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// One JSON line of the event stream
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    time: String,
    #[serde(flatten)]
    event: &'a ProgressEvent,
}

/// RFC 3339 timestamp in UTC
pub fn timestamp(now: OffsetDateTime) -> String {
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Serialize one event as a JSON line stamped with `now`
pub fn format_event_json(event: &ProgressEvent, now: OffsetDateTime) -> Result<String> {
    let record = EventRecord {
        time: timestamp(now),
        event,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Render events until every sender is gone
pub fn render_events(receiver: Receiver<ProgressEvent>, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            for event in receiver {
                if quiet && !matches!(event, ProgressEvent::Warning(_)) {
                    continue;
                }
                println!("{}", format_event_json(&event, OffsetDateTime::now_utc())?);
            }
        }
        OutputFormat::Human => {
            let mut progress = InstallProgress::new(quiet);
            for event in receiver {
                progress.handle(&event);
            }
            progress.finish();
        }
    }
    Ok(())
}

/// Human-readable product table, newest first
pub fn format_products_human(products: &[ProductInfo]) -> String {
    if products.is_empty() {
        return "No OS installer products found.\n".to_string();
    }

    let mut text = format!("Found {} OS installer products:\n\n", products.len());
    for product in products {
        text.push_str(&format!("{}:\n", product.product_id));
        text.push_str(&format!("  Title:     {}\n", product.title));
        text.push_str(&format!("  Version:   {}\n", product.version));
        text.push_str(&format!("  Build:     {}\n", product.build.as_deref().unwrap_or("-")));
        text.push_str(&format!("  Posted:    {}\n", product.post_date));
        text.push('\n');
    }
    text
}

pub fn format_products_json(products: &[ProductInfo]) -> Result<String> {
    Ok(serde_json::to_string_pretty(products)?)
}

pub fn format_outcome_human(outcome: &PipelineOutcome) -> String {
    let mut text = String::from("Summary:\n");
    text.push_str(&format!(
        "  Product:   {} {} ({})\n",
        outcome.product.product_id,
        outcome.product.version,
        outcome.product.build.as_deref().unwrap_or("unknown build")
    ));
    text.push_str(&format!("  Image:     {}\n", outcome.image.display()));
    text.push_str(&format!("  Installer: {}\n", outcome.installer_app.display()));
    if let Some(dmg) = &outcome.compressed_image {
        text.push_str(&format!("  Exported:  {}\n", dmg.display()));
    }
    if outcome.failed_downloads > 0 {
        text.push_str(&format!("  Failed downloads: {}\n", outcome.failed_downloads));
    }
    text
}

pub fn format_outcome_json(outcome: &PipelineOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(outcome)?)
}
