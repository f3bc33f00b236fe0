//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use ttsync::config::SyncSettings;
use ttsync::data::models::{User, UserProfile};
use ttsync::sync::UserInfo;
use ttsync::sync::cache::CachePolicy;
use ttsync::sync::extract::{DocumentParser, ExtractedSchedule, ExtractionFailure, RawEvent, ScheduleEvent};
use ttsync::sync::gate::{AccessChecker, AccessStatus, CredentialRejected};
use ttsync::sync::mail::{AttachmentRef, MailSource, MessageSummary};
use ttsync::sync::store::{CalendarSink, ReplaceCounts, TimetableStore, UserDirectory};
use ttsync::sync::{Collaborators, SyncPipeline};

pub fn user(id: i32, username: &str) -> User {
    let now = Utc::now();
    User {
        id,
        username: username.to_owned(),
        department: None,
        year: None,
        division: None,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

/// `count` distinct weekday classes as extractor JSON.
pub fn timetable_json(count: usize) -> Vec<u8> {
    const DAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];
    let rows: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "day": DAYS[i % DAYS.len()],
                "start": format!("{:02}:00", 8 + i / DAYS.len()),
                "end": format!("{:02}:50", 8 + i / DAYS.len()),
                "subject": format!("Course {i}"),
                "location": format!("Room {}", 100 + i),
            })
        })
        .collect();
    serde_json::to_vec(&rows).unwrap()
}

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<BTreeMap<String, User>>,
    entries: Mutex<HashMap<String, Vec<ScheduleEvent>>>,
    pub fail_writes: AtomicBool,
    pub fail_list_active: AtomicBool,
}

impl MemoryStore {
    pub fn add_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.username.clone(), user);
    }

    pub fn user(&self, username: &str) -> Option<User> {
        self.users.lock().unwrap().get(username).cloned()
    }

    pub fn seed(&self, username: &str, events: Vec<ScheduleEvent>) {
        self.entries
            .lock()
            .unwrap()
            .insert(username.to_owned(), events);
    }

    pub fn events(&self, username: &str) -> Vec<ScheduleEvent> {
        self.entries
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TimetableStore for MemoryStore {
    async fn delete_all(&self, user_id: &str) -> anyhow::Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        let removed = self.entries.lock().unwrap().remove(user_id);
        Ok(removed.map_or(0, |e| e.len() as u64))
    }

    async fn write_all(&self, user_id: &str, schedule: &ExtractedSchedule) -> anyhow::Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(user_id.to_owned())
            .or_default()
            .extend(schedule.events().iter().cloned());
        Ok(schedule.len() as u64)
    }

    async fn replace(
        &self,
        user_id: &str,
        schedule: &ExtractedSchedule,
    ) -> anyhow::Result<ReplaceCounts> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        let previous = self
            .entries
            .lock()
            .unwrap()
            .insert(user_id.to_owned(), schedule.events().to_vec());
        Ok(ReplaceCounts {
            removed: previous.map_or(0, |e| e.len() as u64),
            inserted: schedule.len() as u64,
        })
    }

    async fn list(&self, user_id: &str) -> anyhow::Result<Vec<ScheduleEvent>> {
        Ok(self.events(user_id))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn upsert(&self, profile: &UserProfile) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        let next_id = users.len() as i32 + 1;
        let user = users
            .entry(profile.username.clone())
            .or_insert_with(|| user(next_id, &profile.username));
        user.department = profile.department.clone().or(user.department.take());
        user.year = profile.year.clone().or(user.year.take());
        user.division = profile.division.clone().or(user.division.take());
        user.active = true;
        Ok(user.clone())
    }

    async fn find(&self, username: &str) -> anyhow::Result<Option<User>> {
        Ok(self.user(username))
    }

    async fn list_active(&self) -> anyhow::Result<Vec<User>> {
        if self.fail_list_active.load(Ordering::SeqCst) {
            anyhow::bail!("database unavailable");
        }
        let mut active: Vec<User> = self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.active)
            .cloned()
            .collect();
        active.sort_by_key(|u| u.id);
        Ok(active)
    }

    async fn deactivate(&self, username: &str) -> anyhow::Result<bool> {
        Ok(match self.users.lock().unwrap().get_mut(username) {
            Some(user) => {
                user.active = false;
                true
            }
            None => false,
        })
    }
}

#[derive(Default)]
pub struct FakeMail {
    messages: Mutex<HashMap<String, Vec<MessageSummary>>>,
    attachments: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    rejecting: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    pub list_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl FakeMail {
    /// Deliver a message with one attachment to `username`'s mailbox, newest first.
    pub fn deliver(&self, username: &str, message_id: &str, filename: &str, bytes: Vec<u8>) {
        let attachment_id = format!("{message_id}-att");
        self.messages
            .lock()
            .unwrap()
            .entry(username.to_owned())
            .or_default()
            .insert(
                0,
                MessageSummary {
                    message_id: message_id.to_owned(),
                    attachments: vec![AttachmentRef {
                        message_id: message_id.to_owned(),
                        attachment_id: attachment_id.clone(),
                        filename: filename.to_owned(),
                    }],
                },
            );
        self.attachments
            .lock()
            .unwrap()
            .insert((message_id.to_owned(), attachment_id), bytes);
    }

    /// A message with no attachments.
    pub fn deliver_plain(&self, username: &str, message_id: &str) {
        self.messages
            .lock()
            .unwrap()
            .entry(username.to_owned())
            .or_default()
            .insert(
                0,
                MessageSummary {
                    message_id: message_id.to_owned(),
                    attachments: Vec::new(),
                },
            );
    }

    pub fn fail_for(&self, username: &str) {
        self.failing.lock().unwrap().insert(username.to_owned());
    }

    /// The provider refuses `username`'s credential, as it does for a token
    /// revoked before its recorded expiry.
    pub fn reject_credentials_for(&self, username: &str) {
        self.rejecting.lock().unwrap().insert(username.to_owned());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailSource for FakeMail {
    async fn list_recent(
        &self,
        user_id: &str,
        max_results: u32,
    ) -> anyhow::Result<Vec<MessageSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(user_id) {
            anyhow::bail!("mailbox unreachable");
        }
        if self.rejecting.lock().unwrap().contains(user_id) {
            return Err(CredentialRejected {
                user_id: user_id.to_owned(),
            }
            .into());
        }
        let mut messages = self
            .messages
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        messages.truncate(max_results as usize);
        Ok(messages)
    }

    async fn download_attachment(
        &self,
        _user_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.attachments
            .lock()
            .unwrap()
            .get(&(message_id.to_owned(), attachment_id.to_owned()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such attachment"))
    }
}

#[derive(Default)]
pub struct FakeAccess {
    needs_consent: Mutex<HashSet<String>>,
    pub checks: AtomicUsize,
    pub rejected: Mutex<Vec<String>>,
}

impl FakeAccess {
    pub fn require_consent(&self, username: &str) {
        self.needs_consent
            .lock()
            .unwrap()
            .insert(username.to_owned());
    }

    pub fn consent_url(username: &str) -> String {
        format!("https://consent.test/authorize?state={username}")
    }
}

#[async_trait]
impl AccessChecker for FakeAccess {
    async fn check_access(&self, user_id: &str) -> anyhow::Result<AccessStatus> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.needs_consent.lock().unwrap().contains(user_id) {
            Ok(AccessStatus::AuthRequired {
                redirect_url: Self::consent_url(user_id),
            })
        } else {
            Ok(AccessStatus::Granted)
        }
    }

    async fn credential_rejected(&self, user_id: &str) -> anyhow::Result<String> {
        self.rejected.lock().unwrap().push(user_id.to_owned());
        self.require_consent(user_id);
        Ok(Self::consent_url(user_id))
    }
}

/// Treats the cached attachment as extractor JSON output.
#[derive(Default)]
pub struct JsonFileParser {
    pub calls: AtomicUsize,
    panicking: Mutex<HashSet<String>>,
}

impl JsonFileParser {
    /// Parsing a document for `username` panics.
    pub fn panic_for(&self, username: &str) {
        self.panicking.lock().unwrap().insert(username.to_owned());
    }
}

#[async_trait]
impl DocumentParser for JsonFileParser {
    async fn parse(&self, path: &Path, info: &UserInfo) -> anyhow::Result<Vec<RawEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.lock().unwrap().contains(&info.user.username) {
            panic!("parser crashed on {}", path.display());
        }
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ExtractionFailure::Malformed(e.to_string()).into())
    }
}

#[derive(Default)]
pub struct RecordingCalendar {
    events: Mutex<HashMap<String, Vec<ScheduleEvent>>>,
    delay: Mutex<Option<Duration>>,
    pub fail: AtomicBool,
    pub reject: AtomicBool,
    pub calls: AtomicUsize,
}

impl RecordingCalendar {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn events(&self, username: &str) -> Option<Vec<ScheduleEvent>> {
        self.events.lock().unwrap().get(username).cloned()
    }
}

#[async_trait]
impl CalendarSink for RecordingCalendar {
    async fn replace_events(&self, user_id: &str, events: &[ScheduleEvent]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("calendar unavailable");
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(CredentialRejected {
                user_id: user_id.to_owned(),
            }
            .into());
        }
        self.events
            .lock()
            .unwrap()
            .insert(user_id.to_owned(), events.to_vec());
        Ok(())
    }
}

/// A pipeline wired to in-memory collaborators and a temporary cache dir.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub mail: Arc<FakeMail>,
    pub access: Arc<FakeAccess>,
    pub parser: Arc<JsonFileParser>,
    pub calendar: Arc<RecordingCalendar>,
    pub settings: SyncSettings,
    pub pipeline: Arc<SyncPipeline>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(CachePolicy::Filename)
    }

    pub fn with_policy(cache_policy: CachePolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = SyncSettings {
            max_results: 10,
            attachment_dir: dir.path().to_path_buf(),
            cache_policy,
            request_timeout: Duration::from_secs(5),
            extract_timeout: Duration::from_secs(5),
            calendar_timeout: Duration::from_secs(60),
        };
        let store = Arc::new(MemoryStore::default());
        let mail = Arc::new(FakeMail::default());
        let access = Arc::new(FakeAccess::default());
        let parser = Arc::new(JsonFileParser::default());
        let calendar = Arc::new(RecordingCalendar::default());

        let pipeline = Arc::new(SyncPipeline::new(
            &settings,
            Collaborators {
                access: access.clone(),
                mail: mail.clone(),
                parser: parser.clone(),
                store: store.clone(),
                calendar: calendar.clone(),
            },
        ));

        Self {
            store,
            mail,
            access,
            parser,
            calendar,
            settings,
            pipeline,
            _dir: dir,
        }
    }

    /// Register an active user with the store and return it.
    pub fn add_user(&self, username: &str) -> User {
        let id = self.store.users.lock().unwrap().len() as i32 + 1;
        let user = user(id, username);
        self.store.add_user(user.clone());
        user
    }
}
