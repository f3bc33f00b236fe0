//! On-disk cache of downloaded timetable attachments, and the download
//! fallback used on a cache miss.
//!
//! Files live at `<root>/<username>/<original filename>`, each component
//! form-urlencoded so distinct names never share a path. Under
//! [`CachePolicy::Message`] a `<filename>~source` sidecar records which
//! message the bytes came from.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};
use url::form_urlencoded::byte_serialize;

use crate::sync::UserInfo;
use crate::sync::mail::MailSource;
use crate::sync::outcome::{StepOutcome, SyncError, call_with_timeout};

// `~` is always escaped by `path_component`, so these suffixes cannot clash
// with an encoded filename.
const SOURCE_SUFFIX: &str = "~source";
const PARTIAL_SUFFIX: &str = "~partial";

/// How a cached file is matched to the user's current attachment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Same username and original filename is a hit. A new attachment that
    /// reuses an old filename is served from cache.
    #[default]
    #[serde(alias = "filename_only")]
    Filename,
    /// The cached file must also come from the same message id.
    #[serde(alias = "message_bound")]
    Message,
}

#[derive(Debug, Clone)]
pub struct ScheduleCache {
    root: PathBuf,
    policy: CachePolicy,
}

impl ScheduleCache {
    pub fn new(root: impl Into<PathBuf>, policy: CachePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Where the attachment for this user and filename is (or would be) stored.
    pub fn location(&self, username: &str, filename: &str) -> PathBuf {
        self.root
            .join(path_component(username))
            .join(path_component(filename))
    }

    fn source_marker(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(SOURCE_SUFFIX);
        path.with_file_name(name)
    }

    /// Cache hit returns the stored file location; a miss is `NotFound`.
    ///
    /// Unreadable cache state counts as a miss so the caller falls back to a
    /// fresh download.
    pub async fn get_schedule(&self, info: &UserInfo) -> StepOutcome<PathBuf> {
        let path = self.location(&info.user.username, &info.attachment.filename);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return StepOutcome::NotFound,
            Err(e) if e.kind() == ErrorKind::NotFound => return StepOutcome::NotFound,
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "Cached schedule unreadable, treating as miss");
                return StepOutcome::NotFound;
            }
        }

        if self.policy == CachePolicy::Message {
            let marker = Self::source_marker(&path);
            match tokio::fs::read_to_string(&marker).await {
                Ok(recorded) if recorded.trim() == info.attachment.message_id => {}
                Ok(recorded) => {
                    debug!(
                        username = %info.user.username,
                        cached_message = recorded.trim(),
                        current_message = %info.attachment.message_id,
                        "Cached schedule belongs to an older message"
                    );
                    return StepOutcome::NotFound;
                }
                Err(_) => return StepOutcome::NotFound,
            }
        }

        StepOutcome::Success(path)
    }

    /// Write attachment bytes to their cache location.
    ///
    /// Writes go to a temporary sibling first and are renamed into place, so a
    /// reader never sees a half-written file.
    pub async fn store(&self, info: &UserInfo, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.location(&info.user.username, &info.attachment.filename);
        let dir = path
            .parent()
            .context("cache location has no parent directory")?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(PARTIAL_SUFFIX);
        let tmp = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move attachment into {}", path.display()))?;

        tokio::fs::write(Self::source_marker(&path), &info.attachment.message_id)
            .await
            .context("Failed to record attachment source")?;

        Ok(path)
    }
}

/// Downloads the attachment when the cache misses.
pub struct AttachmentResolver {
    mail: Arc<dyn MailSource>,
    cache: ScheduleCache,
    timeout: Duration,
}

impl AttachmentResolver {
    pub fn new(mail: Arc<dyn MailSource>, cache: ScheduleCache, timeout: Duration) -> Self {
        Self {
            mail,
            cache,
            timeout,
        }
    }

    pub async fn fetch(
        &self,
        user_id: &str,
        message_id: &str,
        attachment_id: &str,
        info: &UserInfo,
    ) -> StepOutcome<PathBuf> {
        let bytes = match call_with_timeout(
            "attachment_download",
            self.timeout,
            self.mail
                .download_attachment(user_id, message_id, attachment_id),
        )
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => return StepOutcome::Error(e),
        };

        match self.cache.store(info, &bytes).await {
            Ok(path) => {
                debug!(
                    username = user_id,
                    path = %path.display(),
                    bytes = bytes.len(),
                    "Attachment saved"
                );
                StepOutcome::Success(path)
            }
            Err(e) => StepOutcome::Error(SyncError::persistence("attachment_write", e)),
        }
    }
}

/// Encode a user- or mail-supplied name as a single path component.
///
/// Distinct inputs always give distinct outputs. Separators and `%` are
/// escaped; a leading `.` is escaped too so the result is never `.`, `..`, or
/// hidden.
fn path_component(raw: &str) -> String {
    if raw.is_empty() {
        // A bare `%` is never produced for a non-empty name.
        return "%".to_owned();
    }
    let encoded: String = byte_serialize(raw.as_bytes()).collect();
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::User;
    use crate::sync::mail::AttachmentRef;

    fn info(username: &str, message_id: &str, filename: &str) -> UserInfo {
        let now = chrono::Utc::now();
        UserInfo::new(
            User {
                id: 1,
                username: username.to_owned(),
                department: None,
                year: None,
                division: None,
                active: true,
                created_at: now,
                updated_at: now,
            },
            AttachmentRef {
                message_id: message_id.to_owned(),
                attachment_id: "att".to_owned(),
                filename: filename.to_owned(),
            },
        )
    }

    #[test]
    fn path_component_blocks_traversal() {
        assert_eq!(path_component("../../etc/passwd"), "%2E.%2F..%2Fetc%2Fpasswd");
        assert_eq!(path_component(".."), "%2E.");
        assert_eq!(path_component(".hidden"), "%2Ehidden");
        assert_eq!(path_component(""), "%");
        assert_eq!(path_component("TT Sem 5.pdf"), "TT+Sem+5.pdf");
    }

    #[test]
    fn path_component_keeps_similar_names_apart() {
        let names = ["u/1", "u:1", "u_1", "u 1", "u+1", "u%2F1", "u~1", "%", ""];
        let encoded: std::collections::HashSet<String> =
            names.iter().map(|n| path_component(n)).collect();
        assert_eq!(encoded.len(), names.len());
    }

    #[test]
    fn location_is_keyed_by_user_and_filename() {
        let cache = ScheduleCache::new("/var/cache/tt", CachePolicy::Filename);
        assert_eq!(
            cache.location("alice@example.com", "tt.pdf"),
            PathBuf::from("/var/cache/tt/alice%40example.com/tt.pdf")
        );
        assert_ne!(cache.location("u/1", "tt.pdf"), cache.location("u_1", "tt.pdf"));
    }

    #[tokio::test]
    async fn lookalike_usernames_do_not_share_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path(), CachePolicy::Filename);
        cache.store(&info("u/1", "m1", "tt.pdf"), b"first").await.unwrap();

        assert!(matches!(
            cache.get_schedule(&info("u_1", "m2", "tt.pdf")).await,
            StepOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn filename_that_looks_like_a_sidecar_is_its_own_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path(), CachePolicy::Message);
        let pdf = cache.store(&info("u5", "m1", "tt.pdf"), b"pdf").await.unwrap();
        let lookalike = cache
            .store(&info("u5", "m1", "tt.pdf~source"), b"other")
            .await
            .unwrap();

        assert_ne!(pdf, lookalike);
        assert_eq!(std::fs::read(&pdf).unwrap(), b"pdf");
        assert!(cache.get_schedule(&info("u5", "m1", "tt.pdf")).await.is_success());
    }

    #[tokio::test]
    async fn miss_then_hit_after_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path(), CachePolicy::Filename);
        let info = info("u2", "m1", "tt.pdf");

        assert!(matches!(cache.get_schedule(&info).await, StepOutcome::NotFound));

        let stored = cache.store(&info, b"timetable").await.unwrap();
        assert_eq!(std::fs::read(&stored).unwrap(), b"timetable");

        match cache.get_schedule(&info).await {
            StepOutcome::Success(path) => assert_eq!(path, stored),
            other => panic!("expected hit, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn filename_policy_serves_same_name_from_new_message() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path(), CachePolicy::Filename);
        cache.store(&info("u3", "m1", "tt.pdf"), b"old").await.unwrap();

        let newer = info("u3", "m2", "tt.pdf");
        assert!(cache.get_schedule(&newer).await.is_success());
    }

    #[tokio::test]
    async fn message_policy_misses_on_new_message() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScheduleCache::new(dir.path(), CachePolicy::Message);
        cache.store(&info("u3", "m1", "tt.pdf"), b"old").await.unwrap();

        assert!(cache.get_schedule(&info("u3", "m1", "tt.pdf")).await.is_success());
        assert!(matches!(
            cache.get_schedule(&info("u3", "m2", "tt.pdf")).await,
            StepOutcome::NotFound
        ));
    }

    #[test]
    fn policy_deserializes_from_config_strings() {
        let p: CachePolicy = serde_json::from_str("\"message\"").unwrap();
        assert_eq!(p, CachePolicy::Message);
        let p: CachePolicy = serde_json::from_str("\"filename_only\"").unwrap();
        assert_eq!(p, CachePolicy::Filename);
    }
}
