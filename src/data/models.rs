//! Row types for the application's tables.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

/// A registered mailbox owner. `username` is the external identity used by
/// every other component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub department: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration details supplied by the user. Missing fields keep whatever is
/// already stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub department: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
}

impl UserProfile {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

/// One stored timetable row. `day` is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimetableEntry {
    pub id: i64,
    pub username: String,
    pub day: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub subject: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored Google credentials for one user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OAuthToken {
    pub username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthToken {
    /// True if the access token expires within `margin` of now.
    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        self.expires_at - margin <= Utc::now()
    }
}
