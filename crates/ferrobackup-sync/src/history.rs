//! History versions of target files
//!
//! A history version is an ordinary file named
//! `<name>.<yyyyMMddHHmmss>.backuphistory` stored next to the live file.
//! Nothing else is persisted: versions are discovered by listing the
//! directory again.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use ferrobackup_types::{names_equal, Entry, FileEntry};
use std::cmp::Ordering;
use std::sync::Arc;

/// File name extension of history versions
pub const HISTORY_EXTENSION: &str = ".backuphistory";

/// Timestamp layout, 24-hour clock
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;

/// A parsed history version
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// The version's file handle
    pub file: Arc<dyn FileEntry>,
    /// Name of the live file this version belongs to
    pub base_name: String,
    /// When the version was written
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Parse a file handle, `None` when its name is not a history name
    pub fn parse(file: &Arc<dyn FileEntry>) -> Option<Self> {
        let (base_name, timestamp) = parse_name(file.name())?;
        Some(Self {
            file: Arc::clone(file),
            base_name,
            timestamp,
        })
    }

    /// Chronological order, ties broken by case-insensitive name
    pub fn chronological(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp).then_with(|| {
            self.file
                .name()
                .to_lowercase()
                .cmp(&other.file.name().to_lowercase())
        })
    }
}

/// History file name for `base_name` written at `timestamp`
pub fn compute_name(base_name: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}.{}{}",
        base_name,
        timestamp.format(TIMESTAMP_FORMAT),
        HISTORY_EXTENSION
    )
}

/// History file name for a new version of `base_name` written at `now`
///
/// The timestamp is moved past the newest existing version of `base_name`
/// and past any sibling already carrying the name, so a new version never
/// replaces an older one even when several are written within one second.
pub fn fresh_name(siblings: &[Entry], base_name: &str, now: DateTime<Utc>) -> String {
    let mut timestamp = now;
    if let Some(latest) = newest(siblings, base_name) {
        if latest.timestamp.timestamp() >= timestamp.timestamp() {
            timestamp = latest.timestamp + Duration::seconds(1);
        }
    }

    loop {
        let name = compute_name(base_name, timestamp);
        if !siblings.iter().any(|sibling| names_equal(sibling.name(), &name)) {
            return name;
        }
        timestamp += Duration::seconds(1);
    }
}

/// Split a history file name into base name and timestamp
pub fn parse_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let split = name.len().checked_sub(HISTORY_EXTENSION.len())?;
    let stem = name.get(..split)?;
    if !name.get(split..)?.eq_ignore_ascii_case(HISTORY_EXTENSION) {
        return None;
    }

    let (base_name, stamp) = stem.rsplit_once('.')?;
    if base_name.is_empty()
        || stamp.len() != TIMESTAMP_LEN
        || !stamp.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((base_name.to_string(), timestamp.and_utc()))
}

/// True when `name` parses as a history file name
pub fn is_history_name(name: &str) -> bool {
    parse_name(name).is_some()
}

/// History versions among `siblings` belonging to `name`, oldest first
pub fn find_matching(siblings: &[Entry], name: &str) -> Vec<HistoryEntry> {
    let mut versions: Vec<HistoryEntry> = siblings
        .iter()
        .filter_map(Entry::as_file)
        .filter_map(HistoryEntry::parse)
        .filter(|version| names_equal(&version.base_name, name))
        .collect();
    versions.sort_by(HistoryEntry::chronological);
    versions
}

/// Newest history version of `name`, if any
pub fn newest(siblings: &[Entry], name: &str) -> Option<HistoryEntry> {
    find_matching(siblings, name).pop()
}
