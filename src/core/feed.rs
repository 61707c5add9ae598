use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::service::protocol::AttendanceEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub subject_id: String,
    pub timestamp: DateTime<Local>,
    pub status: ActivityStatus,
}

impl ActivityRecord {
    pub fn new(subject_id: impl Into<String>, status: ActivityStatus) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp: Local::now(),
            status,
        }
    }

    /// Converts a backend attendance entry. Entries with a timestamp that
    /// cannot be parsed are skipped.
    pub fn from_entry(entry: &AttendanceEntry) -> Option<Self> {
        let timestamp = parse_timestamp(&entry.timestamp)?;
        let status = match entry.status.as_deref() {
            None | Some("present") | Some("success") => ActivityStatus::Success,
            Some(_) => ActivityStatus::Failure,
        };
        Some(Self {
            subject_id: entry.user_id.clone(),
            timestamp,
            status,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Local));
    }
    // The service writes naive local ISO timestamps
    let naive = raw.parse::<NaiveDateTime>().ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Append-only history of capture outcomes, oldest first.
#[derive(Debug, Default, Clone)]
pub struct ActivityFeed {
    records: Vec<ActivityRecord>,
}

impl ActivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: ActivityRecord) -> &ActivityRecord {
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Seeds the feed from the service's attendance history. Returns how
    /// many entries were accepted.
    pub fn extend_history<'a>(&mut self, entries: impl IntoIterator<Item = &'a AttendanceEntry>) -> usize {
        let mut history: Vec<ActivityRecord> = entries
            .into_iter()
            .filter_map(ActivityRecord::from_entry)
            .collect();
        history.sort_by_key(|r| r.timestamp);
        let accepted = history.len();
        self.records.extend(history);
        accepted
    }

    /// All records in insertion order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ActivityRecord> + ExactSizeIterator + '_ {
        self.records.iter()
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &ActivityRecord> + '_ {
        self.records.iter().rev().take(limit)
    }

    pub fn last(&self) -> Option<&ActivityRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
