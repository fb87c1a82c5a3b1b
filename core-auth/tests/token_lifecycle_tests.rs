use async_trait::async_trait;
use bridge_traits::audit::{AuditEntry, AuditLog};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::SessionStore;
use bridge_traits::time::{Clock, ManualClock};
use bridge_traits::TokenCipher;
use core_auth::{
    AuthError, AuthResponse, GuardOutcome, RefreshedTokens, RequestInfo, Session, SessionTokenSet,
    TokenLifecycleManager, TokenRefresher, SESSION_EXPIRED_CODE,
};
use core_runtime::config::TokenRefreshConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mock! {
    Refresher {}

    #[async_trait]
    impl TokenRefresher for Refresher {
        async fn refresh(&self, refresh_token: &str) -> core_auth::Result<RefreshedTokens>;
    }
}

/// In-memory session store
#[derive(Default)]
struct MemoryStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    fn session(&self, id: &str) -> Option<Session> {
        self.data
            .lock()
            .unwrap()
            .get(id)
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
    }

    fn put(&self, session: &Session) {
        self.data
            .lock()
            .unwrap()
            .insert(session.id.clone(), serde_json::to_vec(session).unwrap());
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, session_id: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap().get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, data: &[u8]) -> BridgeResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BridgeError::StorageError("database is locked".to_string()));
        }
        self.data
            .lock()
            .unwrap()
            .insert(session_id.to_string(), data.to_vec());
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> BridgeResult<()> {
        self.data.lock().unwrap().remove(session_id);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditLog for RecordingAudit {
    async fn record(&self, entry: AuditEntry) -> BridgeResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Reversible stand-in for real encryption
struct PrefixCipher;

impl TokenCipher for PrefixCipher {
    fn encrypt(&self, plaintext: &str) -> BridgeResult<String> {
        Ok(format!("enc:{}", plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> BridgeResult<String> {
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| BridgeError::CipherError("bad ciphertext".to_string()))
    }
}

/// Refresher that takes a while and counts its calls
struct SlowRefresher {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl TokenRefresher for SlowRefresher {
    async fn refresh(&self, _refresh_token: &str) -> core_auth::Result<RefreshedTokens> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(RefreshedTokens {
            access_token: format!("access-{}", call),
            refresh_token: Some(format!("refresh-{}", call)),
            expires_in: Some(3600),
            ..Default::default()
        })
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    audit: Arc<RecordingAudit>,
    clock: Arc<ManualClock>,
    bus: EventBus,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            audit: Arc::new(RecordingAudit::default()),
            clock: Arc::new(ManualClock::starting_now()),
            bus: EventBus::new(32),
        }
    }

    fn manager(&self, refresher: Arc<dyn TokenRefresher>) -> TokenLifecycleManager {
        TokenLifecycleManager::new(
            TokenRefreshConfig::default(),
            self.store.clone(),
            Arc::new(PrefixCipher),
        )
        .with_refresher(refresher)
        .with_audit_log(self.audit.clone())
        .with_clock(self.clock.clone())
        .with_event_bus(self.bus.clone())
    }

    /// An OIDC session expiring in `secs`, already persisted.
    fn stored_session(&self, secs: i64) -> Session {
        let session = Session::oidc(
            "sess-1",
            SessionTokenSet::new("enc:access-0")
                .with_refresh_token("enc:refresh-0")
                .with_id_token("enc:id-0")
                .expiring_at(self.clock.now() + chrono::Duration::seconds(secs)),
        )
        .with_identity("digger");
        self.store.put(&session);
        session
    }
}

fn rotated_tokens() -> RefreshedTokens {
    RefreshedTokens {
        access_token: "access-1".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_in: Some(3600),
        ..Default::default()
    }
}

fn page_request() -> RequestInfo {
    RequestInfo::new("/requests?page=2")
        .accept("text/html")
        .ip("203.0.113.9")
        .user_agent("Mozilla/5.0")
}

fn api_request() -> RequestInfo {
    RequestInfo::new("/api/v1/search")
        .ip("203.0.113.9")
        .user_agent("curl/8.4")
}

#[tokio::test]
async fn test_token_outside_lead_window_is_left_alone() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher.expect_refresh().times(0);
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(301);
    let before = session.clone();

    let outcome = manager.ensure_fresh(&mut session, &page_request()).await;

    assert_eq!(outcome, GuardOutcome::Proceed);
    assert_eq!(session, before);
}

#[tokio::test]
async fn test_local_sessions_pass_through() {
    let harness = Harness::new();
    let manager = harness.manager(Arc::new(MockRefresher::new()));
    let mut session = Session::local("sess-2", "bob");

    let outcome = manager.ensure_fresh(&mut session, &page_request()).await;

    assert_eq!(outcome, GuardOutcome::Proceed);
}

#[tokio::test]
async fn test_token_inside_lead_window_is_refreshed_and_persisted() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher.expect_refresh().times(1).returning(|token| {
        assert_eq!(token, "refresh-0");
        Ok(rotated_tokens())
    });
    let manager = harness.manager(Arc::new(refresher));
    let mut events = harness.bus.subscribe();

    let mut session = harness.stored_session(300);
    let outcome = manager.ensure_fresh(&mut session, &page_request()).await;

    assert_eq!(outcome, GuardOutcome::Refreshed);
    let tokens = session.tokens.as_ref().unwrap();
    assert_eq!(tokens.access_token, "enc:access-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("enc:refresh-1"));
    assert_eq!(tokens.id_token.as_deref(), Some("enc:id-0"));
    assert_eq!(
        tokens.expires_at,
        Some(harness.clock.now() + chrono::Duration::seconds(3600))
    );
    assert_eq!(harness.store.session("sess-1"), Some(session.clone()));
    assert_eq!(manager.get_access_token(&session).as_deref(), Some("access-1"));

    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Auth(AuthEvent::TokenRefreshing { .. })
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Auth(AuthEvent::TokenRefreshed { .. })
    ));
    assert_eq!(manager.active_refreshes(), 0);
}

#[tokio::test]
async fn test_omitted_refresh_token_keeps_the_previous_one() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher.expect_refresh().times(1).returning(|_| {
        Ok(RefreshedTokens {
            access_token: "access-1".to_string(),
            expires_in: Some(600),
            ..Default::default()
        })
    });
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(10);
    manager.ensure_fresh(&mut session, &page_request()).await;

    assert_eq!(
        session.tokens.unwrap().refresh_token.as_deref(),
        Some("enc:refresh-0")
    );
}

#[tokio::test]
async fn test_rejected_refresh_on_api_request_returns_structured_error() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher.expect_refresh().times(1).returning(|_| {
        Err(AuthError::RefreshRejected {
            status: 400,
            error: "invalid_grant".to_string(),
        })
    });
    let manager = harness.manager(Arc::new(refresher));
    let mut events = harness.bus.subscribe();

    let mut session = harness.stored_session(-30);
    let outcome = manager.ensure_fresh(&mut session, &api_request()).await;

    let Some(AuthResponse::Json { status, body }) = outcome.response() else {
        panic!("expected JSON response, got {:?}", outcome);
    };
    assert_eq!(*status, 401);
    assert_eq!(body["code"], SESSION_EXPIRED_CODE);
    assert_eq!(body["reason"], "REFRESH_REJECTED");
    assert_eq!(body["loginUrl"], "/auth/login");

    assert_eq!(harness.store.session("sess-1"), None);
    assert!(session.tokens.is_none());

    let entries = harness.audit.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event, "session_expired");
    assert_eq!(entries[0].identity.as_deref(), Some("digger"));
    assert_eq!(entries[0].ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(entries[0].user_agent.as_deref(), Some("curl/8.4"));
    assert!(entries[0].reason.starts_with("REFRESH_REJECTED"));
    drop(entries);

    let mut saw_expired = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Auth(AuthEvent::SessionExpired { code, .. }) = event {
            assert_eq!(code, "REFRESH_REJECTED");
            saw_expired = true;
        }
    }
    assert!(saw_expired);
}

#[tokio::test]
async fn test_rejected_refresh_on_page_navigation_redirects_to_login() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher
        .expect_refresh()
        .returning(|_| Err(AuthError::RefreshUnavailable("connection reset".to_string())));
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(60);
    let outcome = manager.ensure_fresh(&mut session, &page_request()).await;

    assert_eq!(
        outcome,
        GuardOutcome::Respond(AuthResponse::Redirect {
            location: "/auth/login?returnTo=%2Frequests%3Fpage%3D2".to_string()
        })
    );
    assert!(!outcome.should_run_handler());
    assert_eq!(harness.store.session("sess-1"), None);
}

#[tokio::test]
async fn test_save_failure_after_refresh_is_a_distinct_error() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher
        .expect_refresh()
        .times(1)
        .returning(|_| Ok(rotated_tokens()));
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(60);
    harness.store.fail_saves.store(true, Ordering::SeqCst);

    let outcome = manager.ensure_fresh(&mut session, &page_request()).await;

    let Some(AuthResponse::Json { status, body }) = outcome.response() else {
        panic!("expected JSON response, got {:?}", outcome);
    };
    assert_eq!(*status, 500);
    assert_eq!(body["code"], "SESSION_SAVE_FAILED");

    // The stored session is untouched and nothing was audited.
    let stored = harness.store.session("sess-1").unwrap();
    assert_eq!(stored.tokens.unwrap().access_token, "enc:access-0");
    assert!(harness.audit.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_undecryptable_refresh_token_is_terminal() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher.expect_refresh().times(0);
    let manager = harness.manager(Arc::new(refresher));

    let mut session = Session::oidc(
        "sess-1",
        SessionTokenSet::new("enc:access-0")
            .with_refresh_token("plaintext-leak")
            .expiring_at(harness.clock.now()),
    );
    harness.store.put(&session);

    let outcome = manager.ensure_fresh(&mut session, &api_request()).await;

    let Some(AuthResponse::Json { body, .. }) = outcome.response() else {
        panic!("expected JSON response, got {:?}", outcome);
    };
    assert_eq!(body["reason"], "TOKEN_DECRYPTION_FAILED");
    assert_eq!(harness.store.session("sess-1"), None);
}

#[tokio::test]
async fn test_missing_refresh_token_skips_until_expired() {
    let harness = Harness::new();
    let manager = harness.manager(Arc::new(MockRefresher::new()));

    let mut session = Session::oidc(
        "sess-1",
        SessionTokenSet::new("enc:access-0")
            .expiring_at(harness.clock.now() + chrono::Duration::seconds(60)),
    );
    harness.store.put(&session);

    let outcome = manager.ensure_fresh(&mut session, &page_request()).await;
    assert_eq!(outcome, GuardOutcome::Proceed);

    harness.clock.advance(chrono::Duration::seconds(60));
    let outcome = manager.ensure_fresh(&mut session, &api_request()).await;

    let Some(AuthResponse::Json { body, .. }) = outcome.response() else {
        panic!("expected JSON response, got {:?}", outcome);
    };
    assert_eq!(body["reason"], "NO_REFRESH_TOKEN");
}

#[tokio::test]
async fn test_session_destroyed_elsewhere_is_terminal() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher.expect_refresh().times(0);
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(60);
    harness.store.destroy("sess-1").await.unwrap();

    let outcome = manager.ensure_fresh(&mut session, &api_request()).await;

    let Some(AuthResponse::Json { body, .. }) = outcome.response() else {
        panic!("expected JSON response, got {:?}", outcome);
    };
    assert_eq!(body["reason"], "SESSION_NOT_FOUND");
}

#[tokio::test(start_paused = true)]
async fn test_slow_token_endpoint_times_out() {
    let harness = Harness::new();
    let refresher = Arc::new(SlowRefresher {
        calls: AtomicUsize::new(0),
        delay: Duration::from_secs(120),
    });
    let manager = harness.manager(refresher.clone());

    let mut session = harness.stored_session(60);
    let outcome = manager.ensure_fresh(&mut session, &api_request()).await;

    let Some(AuthResponse::Json { body, .. }) = outcome.response() else {
        panic!("expected JSON response, got {:?}", outcome);
    };
    assert_eq!(body["reason"], "REFRESH_TIMEOUT");
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_requests_refresh_once() {
    let harness = Harness::new();
    let refresher = Arc::new(SlowRefresher {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(50),
    });
    let manager = harness.manager(refresher.clone());

    let stored = harness.stored_session(30);
    let mut first = stored.clone();
    let mut second = stored.clone();
    let request = page_request();

    let (a, b) = tokio::join!(
        manager.ensure_fresh(&mut first, &request),
        manager.ensure_fresh(&mut second, &request),
    );

    assert_eq!(a, GuardOutcome::Refreshed);
    assert_eq!(b, GuardOutcome::Refreshed);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(
        manager.get_access_token(&second).as_deref(),
        Some("access-1")
    );
    assert_eq!(manager.active_refreshes(), 0);
}

#[tokio::test]
async fn test_force_refresh_ignores_lead_window() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher
        .expect_refresh()
        .times(1)
        .returning(|_| Ok(rotated_tokens()));
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(86_400);
    manager.force_token_refresh(&mut session).await.unwrap();

    assert_eq!(manager.get_access_token(&session).as_deref(), Some("access-1"));
    assert_eq!(harness.store.session("sess-1"), Some(session));
}

#[tokio::test]
async fn test_force_refresh_reports_save_failure_without_destroying() {
    let harness = Harness::new();
    let mut refresher = MockRefresher::new();
    refresher
        .expect_refresh()
        .times(1)
        .returning(|_| Ok(rotated_tokens()));
    let manager = harness.manager(Arc::new(refresher));

    let mut session = harness.stored_session(86_400);
    harness.store.fail_saves.store(true, Ordering::SeqCst);

    let err = manager.force_token_refresh(&mut session).await.unwrap_err();

    assert!(matches!(err, AuthError::SessionSaveFailed { .. }));
    assert!(harness.store.session("sess-1").is_some());
}

#[tokio::test]
async fn test_missing_refresh_client_is_reported_by_force_refresh() {
    let harness = Harness::new();
    let manager = TokenLifecycleManager::new(
        TokenRefreshConfig::default(),
        harness.store.clone(),
        Arc::new(PrefixCipher),
    );

    let mut session = harness.stored_session(60);
    let err = manager.force_token_refresh(&mut session).await.unwrap_err();

    assert!(matches!(err, AuthError::RefreshClientUnavailable));
    assert_eq!(err.failure_code(), "REFRESH_CLIENT_UNAVAILABLE");
}
