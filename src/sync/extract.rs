//! Turns a timetable document into a clean, ordered set of weekly events.
//!
//! Reading the document format is delegated to a [`DocumentParser`]; this
//! module owns everything after that: day/time parsing, the division filter,
//! and merging rows that land on the same `(day, start_time)` slot. The input
//! file is only ever read.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::json::decode;
use crate::sync::UserInfo;
use crate::sync::outcome::{StepOutcome, SyncError};

/// Accepted clock formats, tried in order.
const TIME_FORMATS: &[&str] = &[
    "%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p", "%H.%M", "%I.%M %p", "%I.%M%p",
];

const DAY_NAMES: [(Weekday, &str); 7] = [
    (Weekday::Mon, "monday"),
    (Weekday::Tue, "tuesday"),
    (Weekday::Wed, "wednesday"),
    (Weekday::Thu, "thursday"),
    (Weekday::Fri, "friday"),
    (Weekday::Sat, "saturday"),
    (Weekday::Sun, "sunday"),
];

#[derive(Debug, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("timetable document is malformed: {0}")]
    Malformed(String),
    #[error("no schedule found in timetable document")]
    NoSchedule,
}

/// One weekly class slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub day: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub subject: String,
    pub location: Option<String>,
}

/// A row as emitted by a document parser, before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub day: String,
    #[serde(alias = "start_time")]
    pub start: String,
    #[serde(alias = "end_time")]
    pub end: String,
    pub subject: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Rows tagged with a division only apply to users of that division.
    #[serde(default, alias = "div")]
    pub division: Option<String>,
}

/// Normalized extraction result: sorted by day then start time, with at most
/// one event per `(day, start_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedSchedule {
    events: Vec<ScheduleEvent>,
}

impl ExtractedSchedule {
    pub fn normalize(
        raw: Vec<RawEvent>,
        division: Option<&str>,
    ) -> Result<Self, ExtractionFailure> {
        let total = raw.len();
        let mut events = Vec::with_capacity(total);

        for (index, row) in raw.into_iter().enumerate() {
            if let (Some(wanted), Some(tagged)) = (division, row.division.as_deref())
                && !wanted.trim().eq_ignore_ascii_case(tagged.trim())
            {
                continue;
            }

            match normalize_row(row) {
                Ok(event) => events.push(event),
                Err(reason) => warn!(index, reason = %reason, "Skipping unusable timetable row"),
            }
        }

        if events.is_empty() {
            return Err(ExtractionFailure::NoSchedule);
        }

        events.sort_by(|a, b| {
            (a.day.num_days_from_monday(), a.start_time, a.end_time)
                .cmp(&(b.day.num_days_from_monday(), b.start_time, b.end_time))
                .then_with(|| a.subject.cmp(&b.subject))
                .then_with(|| a.location.cmp(&b.location))
        });

        let mut merged: Vec<ScheduleEvent> = Vec::with_capacity(events.len());
        for event in events {
            match merged.last_mut() {
                Some(last) if last.day == event.day && last.start_time == event.start_time => {
                    merge_slot(last, event)
                }
                _ => merged.push(event),
            }
        }

        debug!(rows = total, events = merged.len(), "Normalized timetable");
        Ok(Self { events: merged })
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Fold `other` into `slot`; both start at the same day and time.
fn merge_slot(slot: &mut ScheduleEvent, other: ScheduleEvent) {
    slot.end_time = slot.end_time.max(other.end_time);

    if !slot.subject.split(" / ").any(|s| s == other.subject) {
        slot.subject = format!("{} / {}", slot.subject, other.subject);
    }

    slot.location = match (slot.location.take(), other.location) {
        (Some(a), Some(b)) if a.split(" / ").any(|l| l == b) => Some(a),
        (Some(a), Some(b)) => Some(format!("{a} / {b}")),
        (a, b) => a.or(b),
    };
}

fn normalize_row(row: RawEvent) -> Result<ScheduleEvent, String> {
    let day = parse_day(&row.day).ok_or_else(|| format!("unknown day '{}'", row.day))?;
    let start_time =
        parse_time(&row.start).ok_or_else(|| format!("bad start time '{}'", row.start))?;
    let end_time = parse_time(&row.end).ok_or_else(|| format!("bad end time '{}'", row.end))?;
    if end_time <= start_time {
        return Err(format!("ends ({end_time}) before it starts ({start_time})"));
    }

    let subject = collapse_whitespace(&row.subject);
    if subject.is_empty() {
        return Err("empty subject".to_string());
    }

    let location = row
        .location
        .map(|l| collapse_whitespace(&l))
        .filter(|l| !l.is_empty());

    Ok(ScheduleEvent {
        day,
        start_time,
        end_time,
        subject,
        location,
    })
}

/// Accepts any prefix of a weekday name that is at least three letters long
/// ("mon", "Tues", "THURSDAY").
fn parse_day(raw: &str) -> Option<Weekday> {
    let lower = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    DAY_NAMES
        .iter()
        .find(|(_, name)| name.starts_with(lower.as_str()))
        .map(|(day, _)| *day)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads a timetable document and emits its rows.
///
/// A document that is readable but not a timetable should be reported by
/// returning an [`ExtractionFailure`] (wrapped in `anyhow`); any other error is
/// treated as the parser being unavailable.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &Path, info: &UserInfo) -> anyhow::Result<Vec<RawEvent>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParserOutput {
    Rows(Vec<RawEvent>),
    Wrapped { events: Vec<RawEvent> },
}

/// Runs an external extraction program: `<program> <path> [--department D]
/// [--year Y] [--division V]`, expecting JSON rows on stdout.
pub struct CommandParser {
    program: PathBuf,
}

impl CommandParser {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DocumentParser for CommandParser {
    async fn parse(&self, path: &Path, info: &UserInfo) -> anyhow::Result<Vec<RawEvent>> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let profile = [
            ("--department", info.user.department.as_deref()),
            ("--year", info.user.year.as_deref()),
            ("--division", info.user.division.as_deref()),
        ];
        for (flag, value) in profile {
            if let Some(value) = value {
                cmd.arg(flag).arg(value);
            }
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run extractor {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionFailure::Malformed(format!(
                "extractor exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: ParserOutput = decode(&stdout)
            .map_err(|e| ExtractionFailure::Malformed(e.to_string()))?;

        Ok(match parsed {
            ParserOutput::Rows(rows) => rows,
            ParserOutput::Wrapped { events } => events,
        })
    }
}

pub struct ScheduleExtractor {
    parser: Arc<dyn DocumentParser>,
    timeout: Duration,
}

impl ScheduleExtractor {
    pub fn new(parser: Arc<dyn DocumentParser>, timeout: Duration) -> Self {
        Self { parser, timeout }
    }

    pub async fn extract(&self, path: &Path, info: &UserInfo) -> StepOutcome<ExtractedSchedule> {
        let raw = match tokio::time::timeout(self.timeout, self.parser.parse(path, info)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                return match e.downcast::<ExtractionFailure>() {
                    Ok(failure) => StepOutcome::Error(failure.into()),
                    Err(e) => StepOutcome::Error(SyncError::transport("extraction", e)),
                };
            }
            Err(_elapsed) => {
                return StepOutcome::Error(SyncError::Timeout {
                    step: "extraction",
                    after: self.timeout,
                });
            }
        };

        match ExtractedSchedule::normalize(raw, info.user.division.as_deref()) {
            Ok(schedule) => StepOutcome::Success(schedule),
            Err(failure) => StepOutcome::Error(failure.into()),
        }
    }
}
