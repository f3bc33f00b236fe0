//! Google Calendar backend: mirrors a stored timetable as weekly events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::form_urlencoded::byte_serialize;

use crate::google::auth::TokenSource;
use crate::google::{GoogleApiError, send_empty, send_json};
use crate::sync::extract::ScheduleEvent;
use crate::sync::store::CalendarSink;

/// Private extended property marking events this service owns.
pub const OWNER_PROPERTY: &str = "ttsync_owner";

const LIST_PAGE_SIZE: &str = "250";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<EventId>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventId {
    id: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: String,
    time_zone: String,
}

#[derive(Debug, Serialize)]
struct PrivateProperties<'a> {
    private: std::collections::BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewEvent<'a> {
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    start: EventTime,
    end: EventTime,
    recurrence: Vec<String>,
    extended_properties: PrivateProperties<'a>,
}

/// First date on or after `today` that falls on `day`.
pub fn next_occurrence(today: NaiveDate, day: Weekday) -> NaiveDate {
    let ahead = (7 + day.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    today + chrono::Days::new(u64::from(ahead))
}

fn event_time(date: NaiveDate, time: chrono::NaiveTime, tz: Tz) -> EventTime {
    EventTime {
        date_time: NaiveDateTime::new(date, time)
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string(),
        time_zone: tz.name().to_owned(),
    }
}

fn project<'a>(event: &'a ScheduleEvent, username: &'a str, today: NaiveDate, tz: Tz) -> NewEvent<'a> {
    let date = next_occurrence(today, event.day);
    NewEvent {
        summary: &event.subject,
        location: event.location.as_deref(),
        start: event_time(date, event.start_time, tz),
        end: event_time(date, event.end_time, tz),
        recurrence: vec!["RRULE:FREQ=WEEKLY".to_owned()],
        extended_properties: PrivateProperties {
            private: [(OWNER_PROPERTY, username)].into_iter().collect(),
        },
    }
}

pub struct GoogleCalendar {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    calendar_id: String,
    tz: Tz,
}

impl GoogleCalendar {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        base_url: impl Into<String>,
        calendar_id: &str,
        tz: Tz,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Calendar HTTP client")?;
        Ok(Self {
            http,
            tokens,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            calendar_id: byte_serialize(calendar_id.as_bytes()).collect(),
            tz,
        })
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }

    async fn owned_event_ids(&self, token: &str, username: &str) -> Result<Vec<String>, GoogleApiError> {
        let filter = format!("{OWNER_PROPERTY}={username}");
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("privateExtendedProperty", filter.as_str()),
                ("maxResults", LIST_PAGE_SIZE),
            ];
            if let Some(page) = page_token.as_deref() {
                query.push(("pageToken", page));
            }
            let page: EventList = send_json(
                self.http.get(self.events_url()).bearer_auth(token).query(&query),
                username,
            )
            .await?;
            ids.extend(page.items.into_iter().map(|e| e.id));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl CalendarSink for GoogleCalendar {
    async fn replace_events(&self, user_id: &str, events: &[ScheduleEvent]) -> anyhow::Result<()> {
        self.replace_owned(user_id, events)
            .await
            .map_err(GoogleApiError::into_sync)
    }
}

impl GoogleCalendar {
    async fn replace_owned(
        &self,
        user_id: &str,
        events: &[ScheduleEvent],
    ) -> Result<(), GoogleApiError> {
        let token = self.tokens.access_token(user_id).await?;

        let stale = self.owned_event_ids(&token, user_id).await?;
        for id in &stale {
            let url = format!("{}/{}", self.events_url(), id);
            send_empty(self.http.delete(url).bearer_auth(&token), user_id).await?;
        }

        let today = Utc::now().with_timezone(&self.tz).date_naive();
        for event in events {
            let body = project(event, user_id, today, self.tz);
            let _: EventId = send_json(
                self.http.post(self.events_url()).bearer_auth(&token).json(&body),
                user_id,
            )
            .await?;
        }

        debug!(
            username = user_id,
            removed = stale.len(),
            inserted = events.len(),
            "Calendar events replaced"
        );
        Ok(())
    }
}
