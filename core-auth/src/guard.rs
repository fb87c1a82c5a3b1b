//! Request-side types for the token refresh check.
//!
//! The web layer describes the incoming request with [`RequestInfo`], asks
//! the [`TokenLifecycleManager`](crate::TokenLifecycleManager) for a
//! [`GuardOutcome`], and either runs its handler or renders the
//! [`AuthResponse`] it was given.

use serde_json::{json, Value};
use tracing::warn;

/// Machine code sent to API clients whose session was destroyed.
pub const SESSION_EXPIRED_CODE: &str = "SESSION_EXPIRED";

/// What the guard needs to know about the incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Path and query of the original request, e.g. `/requests?page=2`
    pub path: String,
    pub accept: Option<String>,
    /// Value of the `X-Requested-With` header
    pub requested_with: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn requested_with(mut self, value: impl Into<String>) -> Self {
        self.requested_with = Some(value.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Whether the caller expects JSON rather than an HTML page.
    pub fn is_api(&self) -> bool {
        self.path.starts_with("/api/")
            || self
                .accept
                .as_deref()
                .is_some_and(|accept| accept.contains("application/json"))
            || self
                .requested_with
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"))
    }
}

/// A response the web layer must send instead of running the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResponse {
    Json { status: u16, body: Value },
    Redirect { location: String },
}

impl AuthResponse {
    pub fn status(&self) -> u16 {
        match self {
            AuthResponse::Json { status, .. } => *status,
            AuthResponse::Redirect { .. } => 302,
        }
    }

    /// 401 telling an API client its session is gone.
    pub(crate) fn session_expired(reason: &str, login_path: &str) -> Self {
        AuthResponse::Json {
            status: 401,
            body: json!({
                "error": "Session expired",
                "code": SESSION_EXPIRED_CODE,
                "reason": reason,
                "loginUrl": login_path,
            }),
        }
    }

    /// Redirect a page navigation to the login page, remembering where it was going.
    pub(crate) fn login_redirect(login_path: &str, return_to: &str) -> Self {
        AuthResponse::Redirect {
            location: login_location(login_path, return_to),
        }
    }

    pub(crate) fn server_error(message: &str, code: &str) -> Self {
        AuthResponse::Json {
            status: 500,
            body: json!({
                "error": message,
                "code": code,
            }),
        }
    }
}

/// What to do with the request after the token check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    /// Nothing needed doing; run the handler.
    Proceed,
    /// Tokens were refreshed (or adopted from a concurrent refresh) and the
    /// session persisted; run the handler.
    Refreshed,
    /// Do not run the handler; send this instead.
    Respond(AuthResponse),
}

impl GuardOutcome {
    pub fn should_run_handler(&self) -> bool {
        !matches!(self, GuardOutcome::Respond(_))
    }

    pub fn response(&self) -> Option<&AuthResponse> {
        match self {
            GuardOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }
}

/// `login_path` with `returnTo` appended when the destination is a local path.
fn login_location(login_path: &str, return_to: &str) -> String {
    // Only same-origin paths; `//host` would be an open redirect.
    if !return_to.starts_with('/') || return_to.starts_with("//") || return_to == login_path {
        return login_path.to_string();
    }

    match serde_urlencoded::to_string([("returnTo", return_to)]) {
        Ok(query) => {
            let separator = if login_path.contains('?') { '&' } else { '?' };
            format!("{}{}{}", login_path, separator, query)
        }
        Err(e) => {
            warn!(error = %e, "Failed to encode returnTo");
            login_path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_api_detection() {
        assert!(RequestInfo::new("/api/v1/search").is_api());
        assert!(RequestInfo::new("/search")
            .accept("application/json, text/plain")
            .is_api());
        assert!(RequestInfo::new("/search")
            .requested_with("xmlhttprequest")
            .is_api());
        assert!(!RequestInfo::new("/search").accept("text/html").is_api());
        assert!(!RequestInfo::new("/apiary").is_api());
    }

    #[test]
    fn test_redirect_carries_return_to() {
        let response = AuthResponse::login_redirect("/auth/login", "/requests?page=2");
        assert_eq!(
            response,
            AuthResponse::Redirect {
                location: "/auth/login?returnTo=%2Frequests%3Fpage%3D2".to_string()
            }
        );
        assert_eq!(response.status(), 302);
    }

    #[test]
    fn test_redirect_refuses_foreign_destinations() {
        assert_eq!(
            login_location("/auth/login", "//evil.example.com/x"),
            "/auth/login"
        );
        assert_eq!(
            login_location("/auth/login", "https://evil.example.com"),
            "/auth/login"
        );
        assert_eq!(login_location("/auth/login", "/auth/login"), "/auth/login");
    }

    #[test]
    fn test_redirect_appends_to_existing_query() {
        assert_eq!(
            login_location("/login?provider=oidc", "/"),
            "/login?provider=oidc&returnTo=%2F"
        );
    }

    #[test]
    fn test_session_expired_body() {
        let response = AuthResponse::session_expired("REFRESH_REJECTED", "/auth/login");
        let AuthResponse::Json { status, body } = response else {
            panic!("expected JSON response");
        };

        assert_eq!(status, 401);
        assert_eq!(body["code"], SESSION_EXPIRED_CODE);
        assert_eq!(body["reason"], "REFRESH_REJECTED");
        assert_eq!(body["loginUrl"], "/auth/login");
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(GuardOutcome::Proceed.should_run_handler());
        assert!(GuardOutcome::Refreshed.should_run_handler());

        let respond = GuardOutcome::Respond(AuthResponse::server_error("boom", "X"));
        assert!(!respond.should_run_handler());
        assert_eq!(respond.response().map(AuthResponse::status), Some(500));
    }
}
