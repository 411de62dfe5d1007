//! User-facing failure notification

use colored::Colorize;
use tracing::{debug, error};

/// Message shown when no modal surface is configured
pub const GENERIC_ERROR_MESSAGE: &str = "A server error occurred. We apologize for the inconvenience.";

/// Presents request failures to the user
pub trait Notifier: Send + Sync {
    /// Show a generic error the user has to acknowledge
    fn show_blocking_error(&self, message: &str);

    /// Open the named error surface with the failure details
    fn show_in_modal(&self, surface_id: &str, details: &str);
}

/// Prints failures to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show_blocking_error(&self, message: &str) {
        debug!("ConsoleNotifier::show_blocking_error: called");
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    fn show_in_modal(&self, surface_id: &str, details: &str) {
        debug!(%surface_id, "ConsoleNotifier::show_in_modal: called");
        eprintln!("{} {}", format!("[{}]", surface_id).yellow().bold(), details);
    }
}

/// Routes failures to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_blocking_error(&self, message: &str) {
        error!("{}", message);
    }

    fn show_in_modal(&self, surface_id: &str, details: &str) {
        error!(%surface_id, "{}", details);
    }
}
