mod helpers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::{FakeAccess, Harness, timetable_json};
use serde_json::Value;
use tower::ServiceExt;
use ttsync::google::{CredentialExchange, GoogleApiError};
use ttsync::state::{AppState, LastCycle};
use ttsync::web::create_router;

#[derive(Default)]
struct FakeCredentials {
    states: Mutex<HashMap<String, String>>,
    exchanged: Mutex<Vec<(String, String)>>,
    revoked: Mutex<Vec<String>>,
}

impl FakeCredentials {
    fn issue(&self, username: &str) -> String {
        let mut states = self.states.lock().unwrap();
        let state = format!("state-{}", states.len() + 1);
        states.insert(state.clone(), username.to_owned());
        state
    }
}

#[async_trait]
impl CredentialExchange for FakeCredentials {
    async fn consent_url(&self, username: &str) -> anyhow::Result<String> {
        let state = self.issue(username);
        Ok(format!("https://consent.test/authorize?state={state}"))
    }

    async fn claim_state(&self, state: &str) -> anyhow::Result<Option<String>> {
        Ok(self.states.lock().unwrap().remove(state))
    }

    async fn exchange_code(&self, username: &str, code: &str) -> Result<(), GoogleApiError> {
        if code == "expired" {
            return Err(GoogleApiError::Unauthorized(username.to_owned()));
        }
        self.exchanged
            .lock()
            .unwrap()
            .push((username.to_owned(), code.to_owned()));
        Ok(())
    }

    async fn revoke(&self, username: &str) -> anyhow::Result<()> {
        self.revoked.lock().unwrap().push(username.to_owned());
        Ok(())
    }
}

fn app(h: &Harness, credentials: Arc<FakeCredentials>) -> Router {
    let state = AppState::new(
        h.store.clone(),
        h.pipeline.clone(),
        credentials,
        LastCycle::default(),
    );
    create_router(state)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn register_creates_active_user() {
    let h = Harness::new();
    let router = app(&h, Arc::default());

    let (status, body) = get(router, "/?user_id=alice&department=CS&division=B").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["username"], "alice");
    let stored = h.store.user("alice").unwrap();
    assert!(stored.active);
    assert_eq!(stored.department.as_deref(), Some("CS"));
    assert_eq!(stored.division.as_deref(), Some("B"));
}

#[tokio::test]
async fn register_without_consent_returns_511() {
    let h = Harness::new();
    h.access.require_consent("bob");
    let router = app(&h, Arc::default());

    let (status, body) = get(router, "/?user_id=bob").await;

    assert_eq!(status, StatusCode::NETWORK_AUTHENTICATION_REQUIRED);
    assert_eq!(body["status"], "auth_required");
    assert_eq!(body["redirect_url"], FakeAccess::consent_url("bob"));
    // Registration still happened.
    assert!(h.store.user("bob").is_some());
}

#[tokio::test]
async fn register_rejects_blank_username() {
    let h = Harness::new();
    let (status, body) = get(app(&h, Arc::default()), "/?user_id=%20%20").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");
}

#[tokio::test]
async fn home_syncs_known_user() {
    let h = Harness::new();
    h.add_user("carol");
    h.mail.deliver("carol", "m1", "tt.pdf", timetable_json(5));

    let (status, body) = get(app(&h, Arc::default()), "/home?user_id=carol").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["events"], 5);
    assert_eq!(body["data"]["source"], "download");
    assert_eq!(h.store.events("carol").len(), 5);
}

#[tokio::test]
async fn home_without_mail_is_no_content() {
    let h = Harness::new();
    h.add_user("dave");

    let (status, body) = get(app(&h, Arc::default()), "/home?user_id=dave").await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn home_unknown_user_is_404() {
    let h = Harness::new();

    let (status, body) = get(app(&h, Arc::default()), "/home?user_id=ghost").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "unknown_user");
    assert_eq!(h.mail.lists(), 0);
}

#[tokio::test]
async fn home_extraction_failure_is_bad_gateway() {
    let h = Harness::new();
    h.add_user("erin");
    h.mail.deliver("erin", "m1", "tt.pdf", b"not a timetable".to_vec());

    let (status, body) = get(app(&h, Arc::default()), "/home?user_id=erin").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "extraction_failure");
}

#[tokio::test]
async fn delete_clears_and_deactivates() {
    let h = Harness::new();
    let credentials = Arc::new(FakeCredentials::default());
    h.add_user("frank");
    h.mail.deliver("frank", "m1", "tt.pdf", timetable_json(3));
    get(app(&h, credentials.clone()), "/home?user_id=frank").await;
    assert_eq!(h.store.events("frank").len(), 3);

    let (status, body) = get(app(&h, credentials.clone()), "/delete?user_id=frank").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 3);
    assert_eq!(body["data"]["calendar_cleared"], true);
    assert!(h.store.events("frank").is_empty());
    assert_eq!(h.calendar.events("frank"), Some(vec![]));
    assert!(!h.store.user("frank").unwrap().active);
    assert_eq!(*credentials.revoked.lock().unwrap(), vec!["frank".to_owned()]);

    // Deleted users are gone from the user-facing routes.
    let (status, _) = get(app(&h, credentials), "/home?user_id=frank").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_unknown_user_is_404() {
    let h = Harness::new();
    let (status, _) = get(app(&h, Arc::default()), "/delete?user_id=nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn callback_stores_credentials_for_issued_state() {
    let h = Harness::new();
    let credentials = Arc::new(FakeCredentials::default());
    h.add_user("gina");
    let state = credentials.issue("gina");

    let (status, body) = get(
        app(&h, credentials.clone()),
        &format!("/auth/callback?code=abc123&state={state}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "gina");
    assert_eq!(
        *credentials.exchanged.lock().unwrap(),
        vec![("gina".to_owned(), "abc123".to_owned())]
    );
}

#[tokio::test]
async fn callback_state_is_single_use() {
    let h = Harness::new();
    let credentials = Arc::new(FakeCredentials::default());
    h.add_user("gina");
    let state = credentials.issue("gina");
    let uri = format!("/auth/callback?code=abc123&state={state}");

    let (status, _) = get(app(&h, credentials.clone()), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app(&h, credentials.clone()), &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_state");
    assert_eq!(credentials.exchanged.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn callback_rejects_username_as_state() {
    let h = Harness::new();
    let credentials = Arc::new(FakeCredentials::default());
    h.add_user("ivy");

    let (status, body) = get(
        app(&h, credentials.clone()),
        "/auth/callback?code=attacker-code&state=ivy",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_state");
    assert!(credentials.exchanged.lock().unwrap().is_empty());
}

#[tokio::test]
async fn callback_errors() {
    let h = Harness::new();
    let credentials = Arc::new(FakeCredentials::default());
    h.add_user("hank");

    let (status, body) = get(app(&h, credentials.clone()), "/auth/callback?state=hank").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");

    let (status, body) = get(
        app(&h, credentials.clone()),
        "/auth/callback?error=access_denied&state=hank",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "consent_denied");

    let state = credentials.issue("hank");
    let (status, body) = get(
        app(&h, credentials.clone()),
        &format!("/auth/callback?code=expired&state={state}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_grant");

    // Issued for a user that no longer exists.
    let state = credentials.issue("stranger");
    let (status, _) = get(
        app(&h, credentials),
        &format!("/auth/callback?code=x&state={state}"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_status() {
    let h = Harness::new();

    let (status, body) = get(app(&h, Arc::default()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = get(app(&h, Arc::default()), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disabled");
    assert_eq!(body["last_cycle"], Value::Null);
    assert!(body["version"].is_string());
}
