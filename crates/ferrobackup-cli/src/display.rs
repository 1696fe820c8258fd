//! Terminal output helpers for the FerroBackup CLI

use console::style;
use ferrobackup_sync::SyncReport;
use std::time::Duration;

/// Print the counters of a finished run
pub fn display_summary(report: &SyncReport) {
    let summary = &report.summary;
    println!();
    println!("{}", style("Backup Summary:").bold().underlined());
    println!(
        "  Directories: {} synchronized, {} created, {} deleted",
        style(summary.directories).cyan(),
        style(summary.directories_created).green(),
        style(summary.directories_deleted).yellow()
    );
    println!(
        "  Files: {} unchanged, {} created, {} updated, {} deleted",
        style(summary.files).cyan(),
        style(summary.files_created).green(),
        style(summary.files_updated).green(),
        style(summary.files_deleted).yellow()
    );
    println!(
        "  Errors: {}",
        if summary.errors > 0 {
            style(summary.errors).red()
        } else {
            style(summary.errors).green()
        }
    );
    println!(
        "  Duration: {}",
        style(format_duration(report.elapsed)).blue()
    );
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Display a warning message with proper formatting
pub fn display_warning(message: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
}

/// Display an error message with proper formatting
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), style(message).red());
}

/// Display a success message with proper formatting
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), style(message).green());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0 B")]
    #[case(1023, "1023 B")]
    #[case(1536, "1.50 KB")]
    #[case(5 * 1024 * 1024, "5.00 MB")]
    fn test_format_bytes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[rstest]
    #[case(Duration::from_millis(1500), "1.50s")]
    #[case(Duration::from_secs(125), "2m 5s")]
    #[case(Duration::from_secs(3725), "1h 2m 5s")]
    fn test_format_duration(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }
}
