//! Terminal output utilities.

use crate::models::OnlineStatus;
use colored::Colorize;

/// Format a value as a quoted, right-aligned field.
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let quoted = format!("\"{}\"", value.to_string());
    format!("{quoted:>width$}")
}

/// Percentage with two decimals, or `-` when unknown.
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}%"),
        None => "-".to_string(),
    }
}

/// Scan status highlighted for terminals.
pub fn status_label(status: OnlineStatus) -> String {
    match status {
        OnlineStatus::Active => status.to_string().green().to_string(),
        OnlineStatus::Inactive => status.to_string().yellow().to_string(),
        OnlineStatus::Unknown => status.to_string().dimmed().to_string(),
    }
}
