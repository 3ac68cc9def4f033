use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use oauth_keycloak_auth::{AccessPolicy, InMemorySessionStore, KeycloakClient, SessionStore};
use tokio::task::JoinHandle;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::{config::AppConfig, error::AppError, handlers, login, middleware as app_middleware};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// External base URL without a trailing slash.
    pub base_url: Arc<str>,
    pub client: Arc<KeycloakClient>,
    pub policy: Arc<AccessPolicy>,
    pub sessions: Arc<dyn SessionStore>,
    /// `/oauth2/authorization/{registrationId}`
    pub login_path: Arc<str>,
    /// `/login/oauth2/code/{registrationId}`
    pub callback_path: Arc<str>,
}

impl AppState {
    /// Builds the state with an in-memory session store.
    pub fn from_config(cfg: AppConfig) -> Result<Self, AppError> {
        let base_url = cfg.base_url();
        let client = KeycloakClient::new(cfg.provider.clone(), &base_url)?;
        let policy = AccessPolicy::from_config(&cfg.security)?;
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(cfg.session.idle_timeout));

        let registration_id = client.registration_id().to_string();

        Ok(Self {
            config: Arc::new(cfg),
            base_url: base_url.into(),
            client: Arc::new(client),
            policy: Arc::new(policy),
            sessions,
            login_path: format!("/oauth2/authorization/{registration_id}").into(),
            callback_path: format!("/login/oauth2/code/{registration_id}").into(),
        })
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Login, callback and logout are reachable whatever the route table says.
    pub fn is_login_route(&self, path: &str) -> bool {
        path == &*self.login_path || path == &*self.callback_path || path == login::LOGOUT_PATH
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        .route("/", get(handlers::home))
        .route("/favicon.ico", get(handlers::favicon))
        .route("/nice", get(handlers::nice))
        .route(handlers::TOKEN_PATH, get(handlers::keycloak_token))
        .route(&state.login_path, get(login::authorize))
        .route(&state.callback_path, get(login::callback))
        .route(login::LOGOUT_PATH, post(login::logout))
        .fallback(handlers::not_found)
        // Middleware stack (inner to outer: access control -> compression -> trace -> request id -> body limit)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::access_control,
        ))
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // favicon requests are too noisy to log
                    if req.uri().path() == "/favicon.ico" {
                        return tracing::span!(tracing::Level::TRACE, "noop");
                    }
                    let req_id = req
                        .extensions()
                        .get::<app_middleware::RequestId>()
                        .map(|id| id.0.clone())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        if span.metadata().is_some_and(|meta| meta.name() != "noop") {
                            tracing::info!(
                                http.status = %res.status().as_u16(),
                                elapsed_ms = %latency.as_millis(),
                                "request handled"
                            );
                        }
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct KeycloakServer {
    addr: SocketAddr,
    state: AppState,
    app: Router,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> Result<KeycloakServer, AppError> {
        let state = AppState::from_config(self.config)?;
        let app = build_app(state.clone());

        Ok(KeycloakServer {
            addr: self.addr,
            state,
            app,
        })
    }
}

impl KeycloakServer {
    pub async fn run(self) -> anyhow::Result<()> {
        // A provider that is down at startup only delays the first login
        match self.state.client.discover().await {
            Ok(doc) => tracing::info!(
                issuer = %doc.issuer,
                end_session = doc.end_session_endpoint.is_some(),
                "identity provider discovered"
            ),
            Err(e) => tracing::warn!(
                issuer = %self.state.client.issuer(),
                error = %e,
                "identity provider discovery failed, retrying on first login"
            ),
        }

        let purge = match self.state.config.server.session_purge_interval_secs {
            0 => None,
            secs => Some(spawn_session_purge(
                self.state.sessions.clone(),
                Duration::from_secs(secs),
            )),
        };

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(base_url = %self.state.base_url, "listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(purge) = purge {
            purge.abort();
        }
        served?;
        Ok(())
    }
}

/// Periodically drops idle sessions from the store.
pub fn spawn_session_purge(sessions: Arc<dyn SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.purge_expired().await {
                tracing::warn!(error = %e, "session purge failed");
            }
        }
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use oauth_keycloak_auth::{Authority, Session, SessionPrincipal};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut cfg = AppConfig::default();
        cfg.provider.allow_http = true;
        cfg.server.base_url = Some("http://app.test".into());
        AppState::from_config(cfg).unwrap()
    }

    async fn session_with_roles(state: &AppState, roles: &[&str]) -> Session {
        let mut session = Session::new();
        session.principal = Some(SessionPrincipal {
            subject: "user-1".into(),
            preferred_username: Some("alice".into()),
            authorities: roles.iter().copied().map(Authority::from).collect(),
            id_token: String::new(),
            authenticated_at: OffsetDateTime::now_utc(),
        });
        state.sessions.save(&session).await.unwrap();
        session
    }

    fn get(path: &str, session: Option<&Session>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("OAK_SESSION={}", session.id));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_login_paths() {
        let state = test_state();
        assert_eq!(&*state.login_path, "/oauth2/authorization/keycloak");
        assert_eq!(&*state.callback_path, "/login/oauth2/code/keycloak");
        assert!(state.is_login_route("/logout"));
        assert!(!state.is_login_route("/nice"));
    }

    #[tokio::test]
    async fn test_home_is_public() {
        let app = build_app(test_state());
        let response = app.oneshot(get("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("<dd id=\"isAuthenticated\">false</dd>"));
    }

    #[tokio::test]
    async fn test_favicon_no_content() {
        let app = build_app(test_state());
        let response = app.oneshot(get("/favicon.ico", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_nice_requires_login() {
        let app = build_app(test_state());
        let response = app.oneshot(get("/nice", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/oauth2/authorization/keycloak"
        );
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn test_nice_forbidden_without_role() {
        let state = test_state();
        let session = session_with_roles(&state, &["ADMIN"]).await;
        let app = build_app(state);
        let response = app.oneshot(get("/nice", Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_nice_granted_with_role() {
        let state = test_state();
        let session = session_with_roles(&state, &["NICE"]).await;
        let app = build_app(state);

        let mut request = get("/nice", Some(&session));
        request
            .headers_mut()
            .insert(header::ACCEPT, "application/json".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["isNice"], true);
        assert_eq!(view["name"], "alice");
    }

    #[tokio::test]
    async fn test_unlisted_paths_login_for_anonymous_forbidden_otherwise() {
        let state = test_state();
        let session = session_with_roles(&state, &["NICE", "ADMIN"]).await;
        let app = build_app(state);

        for path in ["/admin", "/keycloak/token", "/nice/more"] {
            let response = app.clone().oneshot(get(path, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::FOUND, "anonymous {path}");
            assert_eq!(
                response.headers()[header::LOCATION],
                "/oauth2/authorization/keycloak"
            );

            let response = app.clone().oneshot(get(path, Some(&session))).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "authenticated {path}");
        }
    }

    #[tokio::test]
    async fn test_deny_all_rule_sends_anonymous_to_login() {
        use oauth_keycloak_auth::{RouteRuleConfig, RuleKind};

        let mut cfg = AppConfig::default();
        cfg.provider.allow_http = true;
        cfg.security
            .rules
            .push(RouteRuleConfig::new("/closed", RuleKind::DenyAll));
        let state = AppState::from_config(cfg).unwrap();
        let session = session_with_roles(&state, &["NICE"]).await;
        let app = build_app(state.clone());

        let response = app.clone().oneshot(get("/closed?x=1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        // the denied target is remembered for after login
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        let id = cookie
            .strip_prefix("OAK_SESSION=")
            .and_then(|v| v.split(';').next())
            .and_then(oauth_keycloak_auth::SessionId::parse)
            .unwrap();
        let saved = state.sessions.load(&id).await.unwrap().unwrap();
        assert_eq!(saved.saved_request.as_deref(), Some("/closed?x=1"));

        let response = app.oneshot(get("/closed", Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_logout_requires_post() {
        let state = test_state();
        // no principal, so logout never contacts the provider
        let session = Session::new();
        state.sessions.save(&session).await.unwrap();
        let app = build_app(state.clone());

        let response = app.clone().oneshot(get("/logout", Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(state.sessions.load(&session.id).await.unwrap().is_some());

        let request = Request::builder()
            .method("POST")
            .uri("/logout")
            .header(header::COOKIE, format!("OAK_SESSION={}", session.id))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(state.sessions.load(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_cookie_is_anonymous() {
        let app = build_app(test_state());
        let request = Request::builder()
            .uri("/")
            .header(header::COOKIE, "OAK_SESSION=not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_session_purge_task() {
        let store = Arc::new(InMemorySessionStore::new(Duration::from_millis(10)));
        let mut idle = Session::new();
        idle.last_accessed_at -= Duration::from_secs(1);
        store.save(&idle).await.unwrap();

        let handle = spawn_session_purge(store.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
