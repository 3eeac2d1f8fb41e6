//! Cookie session routes and the authentication guard.

use axum::extract::{Form, FromRequestParts, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use metrics::counter;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use stratus_core::{AuthOutcome, Credentials, Session, SessionId};
use stratus_rpc::RpcError;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::metrics::{AUTH_LOGINS_TOTAL, AUTH_REJECTIONS_TOTAL};
use crate::server::AppState;

/// Query string of `GET <login_path>`.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Where to go after logging in.
    pub path: Option<String>,
}

/// Form posted to `<login_path>`.
#[derive(Deserialize)]
pub struct LoginForm {
    /// User name.
    #[serde(default)]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Where to go after logging in.
    pub path: Option<String>,
}

/// The authenticated session of the current request.
///
/// Only available behind [`require_auth`]; elsewhere extraction fails
/// with `401`.
#[derive(Clone, Debug)]
pub struct CurrentSession(pub Session);

impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Session id carried by the request's cookie, if any.
pub fn session_id_from_jar(jar: &CookieJar, cookie_name: &str) -> Option<SessionId> {
    jar.get(cookie_name)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .map(SessionId::from_raw)
}

fn session_cookie(config: &ServerConfig, session_id: &SessionId) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session_id.as_str().to_owned()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(config.cookie_secure)
        .build()
}

fn cleared_cookie(config: &ServerConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), "")).path("/").build()
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    let value = HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(header::LOCATION, value)]).into_response()
}

/// Keep only same-site absolute paths, so the login form cannot be used
/// as an open redirect.
fn safe_return_path(path: Option<&str>) -> &str {
    match path {
        Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => p,
        _ => "/",
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `GET <login_path>`: the login form.
pub async fn login_form(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Html<String> {
    let path = safe_return_path(query.path.as_deref());
    Html(state.config.login_page.replace("{path}", &escape_html(path)))
}

/// `POST <login_path>`: check credentials and set the session cookie.
pub async fn login_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let existing = session_id_from_jar(&jar, &state.config.cookie_name);
    let credentials = Credentials::new(form.username, form.password);

    match state.auth.authenticate(existing.as_ref(), &credentials).await {
        AuthOutcome::Accepted(session) => {
            counter!(AUTH_LOGINS_TOTAL).increment(1);
            info!(
                session_id = session.id.redacted(),
                username = %credentials.username,
                "login accepted"
            );
            let jar = jar.add(session_cookie(&state.config, &session.id));
            let target = safe_return_path(form.path.as_deref());
            (jar, found(target)).into_response()
        }
        AuthOutcome::Rejected => {
            counter!(AUTH_REJECTIONS_TOTAL).increment(1);
            info!(username = %credentials.username, "login rejected");
            let jar = jar.remove(cleared_cookie(&state.config));
            (jar, found(&state.config.login_path)).into_response()
        }
    }
}

/// `POST <logout_path>`: destroy the session and close its connections.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(session_id) = session_id_from_jar(&jar, &state.config.cookie_name) {
        let closed = state.connections.close_session(&session_id);
        let existed = state.auth.logout(&session_id);
        info!(
            session_id = session_id.redacted(),
            existed, closed, "logged out"
        );
    }
    let jar = jar.remove(cleared_cookie(&state.config));
    (jar, found(&state.config.login_path)).into_response()
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

/// JSON body for a request that needs a session.
pub(crate) fn unauthorized_json() -> Response {
    let body = serde_json::json!({ "error": RpcError::AuthenticationRequired.to_error_body() });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Guard for routes that require an authenticated session.
///
/// Unauthenticated requests never reach the inner handler: browsers are
/// redirected to the login form with the original path, JSON clients get
/// `401`. Authenticated requests carry the [`Session`] as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session_id = session_id_from_jar(&jar, &state.config.cookie_name);
    match state.auth.require(session_id.as_ref()) {
        Ok(session) => {
            let _ = state.sessions.touch(&session.id);
            let _ = request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(error) => {
            debug!(%error, path = %request.uri().path(), "unauthenticated request");
            if wants_json(request.headers()) {
                return unauthorized_json();
            }
            let original = request
                .uri()
                .path_and_query()
                .map_or("/", |pq| pq.as_str());
            let location = format!(
                "{}?path={}",
                state.config.login_path,
                utf8_percent_encode(original, NON_ALPHANUMERIC)
            );
            found(&location)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_path_must_be_local() {
        assert_eq!(safe_return_path(Some("/app?x=1")), "/app?x=1");
        assert_eq!(safe_return_path(Some("https://evil.example")), "/");
        assert_eq!(safe_return_path(Some("//evil.example")), "/");
        assert_eq!(safe_return_path(Some("/\\evil.example")), "/");
        assert_eq!(safe_return_path(None), "/");
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(
            escape_html(r#"/a"><script>&'"#),
            "/a&quot;&gt;&lt;script&gt;&amp;&#x27;"
        );
    }

    #[test]
    fn session_cookie_attributes() {
        let config = ServerConfig {
            cookie_secure: true,
            ..ServerConfig::default()
        };
        let id = SessionId::from_raw("tok");
        let cookie = session_cookie(&config, &id);
        assert_eq!(cookie.name(), "stratus_session");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn jar_lookup_ignores_empty_value() {
        let jar = CookieJar::new().add(Cookie::new("stratus_session", ""));
        assert!(session_id_from_jar(&jar, "stratus_session").is_none());

        let jar = CookieJar::new().add(Cookie::new("stratus_session", "abc"));
        assert_eq!(
            session_id_from_jar(&jar, "stratus_session").unwrap().as_str(),
            "abc"
        );
        assert!(session_id_from_jar(&jar, "other").is_none());
    }

    #[test]
    fn found_sets_location() {
        let resp = found("/login");
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
    }

    #[test]
    fn json_accept_detection() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));
        let _ = headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(wants_json(&headers));
    }
}
