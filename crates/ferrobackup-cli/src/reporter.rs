//! Console reporting of backup notifications

use crate::display::format_bytes;
use console::style;
use ferrobackup_sync::events::display_name;
use ferrobackup_sync::{ActionEvent, BackupAction, BackupObserver, CopyProgress, Decision, ErrorEvent};
use ferrobackup_types::Entry;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::time::Duration;

/// Set of notifications printed to the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleLevel(u32);

impl ConsoleLevel {
    /// Nothing is printed
    pub const NONE: Self = Self(0);
    /// Failed attempts
    pub const ERROR: Self = Self(0x1);
    /// Progress of the file being copied
    pub const FILE_COPY_PROGRESS: Self = Self(0x2);
    /// Files about to be created
    pub const FILE_CREATING: Self = Self(0x4);
    /// Files about to be updated
    pub const FILE_UPDATING: Self = Self(0x8);
    /// Files about to be deleted
    pub const FILE_DELETING: Self = Self(0x10);
    /// Directories about to be created
    pub const DIRECTORY_CREATING: Self = Self(0x20);
    /// Directories about to be deleted
    pub const DIRECTORY_DELETING: Self = Self(0x40);
    /// Directory pairs about to be compared
    pub const DIRECTORY_SYNCHRONIZING: Self = Self(0x80);
    /// Show backend locations instead of relative names
    pub const FULL_PATH: Self = Self(0x100);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::ERROR, "Error"),
        (Self::FILE_COPY_PROGRESS, "FileCopyProgress"),
        (Self::FILE_CREATING, "FileCreating"),
        (Self::FILE_UPDATING, "FileUpdating"),
        (Self::FILE_DELETING, "FileDeleting"),
        (Self::DIRECTORY_CREATING, "DirectoryCreating"),
        (Self::DIRECTORY_DELETING, "DirectoryDeleting"),
        (Self::DIRECTORY_SYNCHRONIZING, "DirectorySynchronizing"),
        (Self::FULL_PATH, "FullPath"),
    ];

    /// True when every bit of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ConsoleLevel {
    fn default() -> Self {
        Self::ERROR
            | Self::FILE_CREATING
            | Self::FILE_UPDATING
            | Self::FILE_DELETING
            | Self::DIRECTORY_CREATING
            | Self::DIRECTORY_DELETING
    }
}

impl BitOr for ConsoleLevel {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

impl FromStr for ConsoleLevel {
    type Err = String;

    /// Parses `Error|FileCreating`, `error, fullpath`, `Default` or `None`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(['|', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::NONE, |level, part| {
                if part.eq_ignore_ascii_case("none") {
                    return Ok(level);
                }
                if part.eq_ignore_ascii_case("default") {
                    return Ok(level | Self::default());
                }
                Self::NAMES
                    .iter()
                    .find(|(_, name)| name.eq_ignore_ascii_case(part))
                    .map(|(flag, _)| level | *flag)
                    .ok_or_else(|| format!("Unknown console level '{}'", part))
            })
    }
}

/// Prints "about to" notifications, failed attempts and copy progress
pub struct ConsoleReporter {
    level: ConsoleLevel,
    progress: Option<ProgressBar>,
}

impl ConsoleReporter {
    /// Create a reporter printing what `level` selects
    pub fn new(level: ConsoleLevel) -> Self {
        let progress = level.contains(ConsoleLevel::FILE_COPY_PROGRESS).then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        Self { level, progress }
    }

    /// Remove the progress line
    pub fn finish(&self) {
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
    }

    fn emit(&self, line: &str) {
        match &self.progress {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    /// Line printed for `event`, `None` when the level filters it out
    pub fn describe_action(&self, event: &ActionEvent) -> Option<String> {
        let subject = event.subject()?;
        let directory = subject.is_directory();
        let (flag, verb) = match (event.action, directory) {
            (BackupAction::Creating, false) => (ConsoleLevel::FILE_CREATING, "Creating file"),
            (BackupAction::Creating, true) => (ConsoleLevel::DIRECTORY_CREATING, "Creating directory"),
            (BackupAction::Updating, _) => (ConsoleLevel::FILE_UPDATING, "Updating file"),
            (BackupAction::Deleting, false) => (ConsoleLevel::FILE_DELETING, "Deleting file"),
            (BackupAction::Deleting, true) => (ConsoleLevel::DIRECTORY_DELETING, "Deleting directory"),
            (BackupAction::Synchronizing, _) => {
                (ConsoleLevel::DIRECTORY_SYNCHRONIZING, "Synchronizing")
            }
            _ => return None,
        };
        if !self.level.contains(flag) {
            return None;
        }

        let mut line = format!("{} {}", verb, self.label(event, subject));
        if event.action == BackupAction::Updating {
            line.push_str(&format!(" ({})", event.method));
        }
        Some(line)
    }

    fn label(&self, event: &ActionEvent, subject: &Entry) -> String {
        if self.level.contains(ConsoleLevel::FULL_PATH) {
            if let Some(label) = full_path_label(event, subject) {
                return label;
            }
        }
        if event.action == BackupAction::Synchronizing {
            display_name(&event.path, None)
        } else if subject.is_directory() {
            format!("{}/", display_name(&event.path, Some(subject.name())))
        } else {
            display_name(&event.path, Some(subject.name()))
        }
    }

    /// Progress line for a copy, `None` when progress is not shown
    pub fn describe_progress(&self, progress: &CopyProgress) -> Option<String> {
        if !self.level.contains(ConsoleLevel::FILE_COPY_PROGRESS) {
            return None;
        }
        let name = display_name(&progress.path, Some(progress.source.name()));
        Some(match u64::try_from(progress.length) {
            Ok(length) if length > 0 => format!(
                "{} {:>3}% of {}",
                name,
                progress.position.min(length) * 100 / length,
                format_bytes(length)
            ),
            _ => format!("{} {}", name, format_bytes(progress.position)),
        })
    }
}

/// `"source" -> "target"` when both sides expose a location
fn full_path_label(event: &ActionEvent, subject: &Entry) -> Option<String> {
    match event.action {
        BackupAction::Deleting => Some(format!("\"{}\"", subject.full_path()?)),
        BackupAction::Creating => {
            let source = event.source.as_ref()?.full_path()?;
            let parent = event.target.as_ref()?.full_path()?;
            let target = format!("{}/{}", parent.trim_end_matches(['/', '\\']), subject.name());
            Some(format!("\"{}\" -> \"{}\"", source, target))
        }
        _ => {
            let source = event.source.as_ref()?.full_path()?;
            let target = event.target.as_ref()?.full_path()?;
            Some(format!("\"{}\" -> \"{}\"", source, target))
        }
    }
}

impl fmt::Debug for ConsoleReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleReporter")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl BackupObserver for ConsoleReporter {
    fn on_action(&self, event: &ActionEvent) -> Decision {
        if let Some(line) = self.describe_action(event) {
            self.emit(&line);
        }
        Decision::Proceed
    }

    fn on_error(&self, event: &ErrorEvent<'_>) -> Decision {
        if self.level.contains(ConsoleLevel::ERROR) {
            let retry = if event.will_retry { ", retrying" } else { "" };
            let line = format!(
                "{} {} failed (attempt {}{}): {}",
                style("✗").red().bold(),
                event.operation,
                event.attempt,
                retry,
                event.error
            );
            self.emit(&style(line).red().to_string());
        }
        if event.error.is_cancelled() {
            Decision::Skip
        } else {
            Decision::Proceed
        }
    }

    fn on_copying(&self, progress: &CopyProgress) {
        if let (Some(bar), Some(line)) = (&self.progress, self.describe_progress(progress)) {
            bar.set_message(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrobackup_storage::MemoryProvider;
    use ferrobackup_sync::EntryPath;
    use ferrobackup_types::{DirectoryEntry, EqualityMethods, Error, StorageProvider};
    use rstest::rstest;

    #[rstest]
    #[case("Error|FileCreating", ConsoleLevel::ERROR | ConsoleLevel::FILE_CREATING)]
    #[case("error, fullpath", ConsoleLevel::ERROR | ConsoleLevel::FULL_PATH)]
    #[case("None", ConsoleLevel::NONE)]
    #[case("Default", ConsoleLevel::default())]
    fn test_parse_console_level(#[case] input: &str, #[case] expected: ConsoleLevel) {
        assert_eq!(input.parse::<ConsoleLevel>().unwrap(), expected);
    }

    #[test]
    fn test_console_level_display() {
        assert_eq!(
            ConsoleLevel::default().to_string(),
            "Error|FileCreating|FileUpdating|FileDeleting|DirectoryCreating|DirectoryDeleting"
        );
        assert!("Verbose".parse::<ConsoleLevel>().is_err());
    }

    fn path(parts: &[&str]) -> EntryPath {
        parts.iter().map(|part| part.to_string()).collect()
    }

    fn sample() -> (MemoryProvider, Entry, Entry) {
        let provider = MemoryProvider::new();
        provider.add_file("docs/a.txt", b"abc".to_vec());
        let file = Entry::File(provider.file("docs/a.txt").unwrap());
        let directory = Entry::Directory(provider.directory("docs").unwrap());
        (provider, file, directory)
    }

    #[test]
    fn test_describes_about_to_actions_only() {
        let (_provider, file, directory) = sample();
        let reporter = ConsoleReporter::new(ConsoleLevel::default());

        let creating = ActionEvent::new(
            BackupAction::Creating,
            path(&["docs"]),
            Some(file.clone()),
            Some(directory.clone()),
        );
        assert_eq!(
            reporter.describe_action(&creating).as_deref(),
            Some("Creating file /docs/a.txt")
        );

        let created = ActionEvent::new(BackupAction::Created, path(&["docs"]), Some(file.clone()), None);
        assert!(reporter.describe_action(&created).is_none());

        let synchronizing = ActionEvent::new(
            BackupAction::Synchronizing,
            path(&["docs"]),
            Some(directory.clone()),
            Some(directory),
        );
        assert!(reporter.describe_action(&synchronizing).is_none());
    }

    #[test]
    fn test_update_shows_method_and_directories_get_a_slash() {
        let (_provider, file, directory) = sample();
        let reporter = ConsoleReporter::new(ConsoleLevel::default());

        let updating = ActionEvent::new(
            BackupAction::Updating,
            path(&[]),
            Some(file.clone()),
            Some(file),
        )
        .with_method(EqualityMethods::LENGTH);
        assert_eq!(
            reporter.describe_action(&updating).as_deref(),
            Some("Updating file /a.txt (Length)")
        );

        let deleting = ActionEvent::new(
            BackupAction::Deleting,
            path(&[]),
            Some(directory.clone()),
            Some(directory),
        );
        assert_eq!(
            reporter.describe_action(&deleting).as_deref(),
            Some("Deleting directory /docs/")
        );
    }

    #[tokio::test]
    async fn test_full_path_uses_backend_locations() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"abc").unwrap();
        let ct = ferrobackup_types::CancellationToken::new();
        let provider = ferrobackup_storage::LocalProvider::new();
        let source_root = provider
            .get_or_create_root(&source.path().to_string_lossy(), &ct)
            .await
            .unwrap();
        let target_root = provider
            .get_or_create_root(&target.path().to_string_lossy(), &ct)
            .await
            .unwrap();
        let file = source_root.list_children(&ct).await.unwrap().remove(0);

        let reporter = ConsoleReporter::new(ConsoleLevel::default() | ConsoleLevel::FULL_PATH);
        let event = ActionEvent::new(
            BackupAction::Creating,
            path(&[]),
            Some(file.clone()),
            Some(Entry::Directory(target_root)),
        );
        let line = reporter.describe_action(&event).unwrap();
        assert!(line.contains(&file.full_path().unwrap()));
        assert!(line.contains(" -> "));
        assert!(line.ends_with("a.txt\""));
    }

    #[test]
    fn test_progress_line() {
        let (_provider, file, directory) = sample();
        let reporter = ConsoleReporter::new(ConsoleLevel::FILE_COPY_PROGRESS);
        let mut progress = CopyProgress {
            path: path(&["docs"]),
            source: file,
            target: directory,
            position: 512,
            length: 2048,
        };
        assert_eq!(
            reporter.describe_progress(&progress).as_deref(),
            Some("/docs/a.txt  25% of 2.00 KB")
        );

        progress.length = -1;
        assert_eq!(
            reporter.describe_progress(&progress).as_deref(),
            Some("/docs/a.txt 512 B")
        );
        reporter.finish();
    }

    #[test]
    fn test_cancellation_stops_retrying() {
        let reporter = ConsoleReporter::new(ConsoleLevel::NONE);
        let cancelled = Error::Cancelled;
        let event = ErrorEvent {
            operation: "copy",
            error: &cancelled,
            attempt: 1,
            will_retry: true,
        };
        assert_eq!(reporter.on_error(&event), Decision::Skip);

        let failure = Error::io("disk on fire");
        let event = ErrorEvent {
            error: &failure,
            ..event
        };
        assert_eq!(reporter.on_error(&event), Decision::Proceed);
    }
}
