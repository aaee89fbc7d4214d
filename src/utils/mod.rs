//! Utilities: error types, logging setup, metric accumulators, formatting helpers

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{LeafGuardError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{ConfusionMatrix, EpochAccumulator};

use indicatif::{ProgressBar, ProgressStyle};

/// Batch progress bar in the CLI's house style
pub fn batch_progress_bar(batches: usize, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(batches as u64);
    let style = ProgressStyle::default_bar()
        .template("  {prefix:>10} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a count with thousands separators
pub fn format_number(n: usize) -> String {
    let digits: Vec<char> = n.to_string().chars().collect();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*c);
    }
    out
}
