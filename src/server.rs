//! Legacy HTTP backend
//!
//! Serves the exercise list of one fixed spreadsheet to browser clients.
//! The OAuth callback creates a server-side session keyed by a random id in
//! the `session` cookie; sessions live in the router state.

use crate::config::Config;
use crate::error::PipelineError;
use crate::extract::ExerciseExtractor;
use crate::identity::OAuthClient;
use crate::model::{Movement, SessionToken, WorkoutProgram};
use crate::picker::{DocumentPicker, DrivePicker, PickOutcome, TitleChooser};
use crate::sheets::{GoogleSheetsClient, GridFetcher, SheetsApi};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use uuid::Uuid;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// Name of the cookie binding an OAuth redirect to the browser that started it
pub const STATE_COOKIE: &str = "oauth_state";

/// Server-side sessions, keyed by the id stored in the session cookie
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionToken>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` under a fresh random id and return the id
    ///
    /// Sessions whose token has expired are evicted first.
    pub fn create(&self, token: SessionToken) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        sessions.retain(|_, token| !token.is_expired(now));
        sessions.insert(id.clone(), token);
        id
    }

    /// The live token for `id`; an expired one is evicted and reads as absent
    pub fn get(&self, id: &str) -> Option<SessionToken> {
        let token = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()?;
        if token.is_expired(Utc::now()) {
            debug!("session expired; evicting");
            self.remove(id);
            return None;
        }
        Some(token)
    }

    pub fn remove(&self, id: &str) -> Option<SessionToken> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared state of the router
pub struct AppState<P, A> {
    oauth: OAuthClient,
    picker: P,
    fetcher: GridFetcher<A>,
    extractor: ExerciseExtractor,
    sessions: SessionRegistry,
}

impl<P: DocumentPicker, A: SheetsApi> AppState<P, A> {
    pub fn new(
        oauth: OAuthClient,
        picker: P,
        fetcher: GridFetcher<A>,
        extractor: ExerciseExtractor,
    ) -> Self {
        AppState {
            oauth,
            picker,
            fetcher,
            extractor,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn session_token(&self, jar: &CookieJar) -> Option<SessionToken> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| self.sessions.get(cookie.value()))
    }
}

/// Production state: Drive lookup by title and the Sheets v4 client
pub type GoogleAppState = AppState<DrivePicker<TitleChooser>, GoogleSheetsClient>;

impl GoogleAppState {
    /// Build the state from configuration
    ///
    /// # Errors
    /// * `ConfigFailure` if no client id is configured or an HTTP client cannot be built
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        config.require_client_id()?;
        Ok(AppState::new(
            OAuthClient::new(config.identity.clone())?,
            DrivePicker::new(&config.api, TitleChooser::new(&config.server.document_title))?,
            GridFetcher::new(GoogleSheetsClient::new(&config.api)?),
            ExerciseExtractor::new(config.coercion),
        ))
    }
}

/// Exercise as served to legacy clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyExercise {
    pub name: String,
    /// Always empty; kept for client compatibility
    pub features: Vec<String>,
    pub movements: Vec<Movement>,
}

impl LegacyExercise {
    fn from_program(program: WorkoutProgram) -> Vec<LegacyExercise> {
        program
            .exercises
            .into_iter()
            .map(|exercise| LegacyExercise {
                name: exercise.name,
                features: Vec::new(),
                movements: exercise.movements,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Build the router over `state`
pub fn router<P, A>(state: Arc<AppState<P, A>>) -> Router
where
    P: DocumentPicker + 'static,
    A: SheetsApi + 'static,
{
    Router::new()
        .route("/", get(index::<P, A>))
        .route("/oauth", get(oauth_callback::<P, A>))
        .route("/api/exercises", get(exercises::<P, A>))
        .route("/logout", get(logout::<P, A>))
        .with_state(state)
}

/// Bind to `config.server.bind` and serve until the process exits
pub async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(GoogleAppState::from_config(config)?);
    let app = router(state);

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!("server running at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// `"OK"` for a signed-in browser, otherwise off to the consent screen
async fn index<P: DocumentPicker, A: SheetsApi>(
    State(state): State<Arc<AppState<P, A>>>,
    jar: CookieJar,
) -> Response {
    if state.session_token(&jar).is_some() {
        return "OK".into_response();
    }
    let csrf = Uuid::new_v4().to_string();
    let uri = state.oauth.authorization_uri(Some(&csrf));
    let cookie = Cookie::build((STATE_COOKIE, csrf))
        .path("/")
        .http_only(true)
        .build();
    (jar.add(cookie), Redirect::to(&uri)).into_response()
}

/// OAuth redirect target: exchange the code and open a session
async fn oauth_callback<P: DocumentPicker, A: SheetsApi>(
    State(state): State<Arc<AppState<P, A>>>,
    jar: CookieJar,
    Query(params): Query<OAuthCallback>,
) -> Response {
    if let Some(error) = params.error {
        return (StatusCode::BAD_REQUEST, format!("Sign-in refused: {}", error)).into_response();
    }
    let expected = jar.get(STATE_COOKIE).map(|cookie| cookie.value().to_string());
    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));
    if expected.is_none() || params.state != expected {
        warn!("OAuth callback with missing or mismatched state");
        return (jar, (StatusCode::BAD_REQUEST, "Sign-in state mismatch")).into_response();
    }
    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code").into_response();
    };

    match state.oauth.exchange_code(&code).await {
        Ok(token) => {
            let id = state.sessions.create(token);
            info!("opened session ({} active)", state.sessions.len());
            let cookie = Cookie::build((SESSION_COOKIE, id))
                .path("/")
                .http_only(true)
                .build();
            (jar.add(cookie), Redirect::to("/")).into_response()
        }
        Err(e) => {
            warn!("code exchange failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// The exercise list of the configured spreadsheet
async fn exercises<P: DocumentPicker, A: SheetsApi>(
    State(state): State<Arc<AppState<P, A>>>,
    jar: CookieJar,
) -> Response {
    let Some(token) = state.session_token(&jar) else {
        return (StatusCode::UNAUTHORIZED, "Not signed in").into_response();
    };

    let document = match state.picker.pick(&token).await {
        Ok(PickOutcome::Picked(document)) => document,
        Ok(PickOutcome::Cancelled) => {
            return (StatusCode::NOT_FOUND, "Spreadsheet not found").into_response();
        }
        Err(e) => return error_response(e),
    };

    let result = match state.fetcher.fetch(&document, &token).await {
        Ok(sheets) => state.extractor.extract(&document.title, &sheets),
        Err(e) => Err(e),
    };
    match result {
        Ok(program) => Json(LegacyExercise::from_program(program)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn logout<P: DocumentPicker, A: SheetsApi>(
    State(state): State<Arc<AppState<P, A>>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }
    let cleared = Cookie::build(SESSION_COOKIE).path("/");
    (jar.remove(cleared), Redirect::to("/"))
}

fn error_response(error: PipelineError) -> Response {
    warn!("request failed: {}", error);
    let status = match &error {
        PipelineError::Auth(_) | PipelineError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        PipelineError::Picker(_) | PipelineError::Fetch(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Persistence(_) | PipelineError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, error.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::error::Result;
    use crate::extract::CoercionPolicy;
    use crate::model::{Document, SpreadsheetMetadata};
    use crate::sheets::Grid;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    struct FixedPicker(Option<Document>);

    impl DocumentPicker for FixedPicker {
        async fn pick(&self, _token: &SessionToken) -> Result<PickOutcome> {
            Ok(match &self.0 {
                Some(document) => PickOutcome::Picked(document.clone()),
                None => PickOutcome::Cancelled,
            })
        }
    }

    struct FixedSheets {
        titles: Vec<&'static str>,
        grids: Vec<Grid>,
        fail: bool,
    }

    impl SheetsApi for FixedSheets {
        async fn metadata(&self, _id: &str, _token: &SessionToken) -> Result<SpreadsheetMetadata> {
            Ok(SpreadsheetMetadata {
                title: "Exercises".into(),
                sheet_titles: self.titles.iter().map(|t| t.to_string()).collect(),
            })
        }

        async fn batch_get(
            &self,
            _id: &str,
            _ranges: &[String],
            _token: &SessionToken,
        ) -> Result<Vec<Grid>> {
            if self.fail {
                return Err(PipelineError::Fetch("HTTP 500: backend error".into()));
            }
            Ok(self.grids.clone())
        }
    }

    fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn state(
        document: Option<Document>,
        sheets: FixedSheets,
        policy: CoercionPolicy,
    ) -> Arc<AppState<FixedPicker, FixedSheets>> {
        let mut identity = Config::defaults(Environment::Development).identity;
        identity.client_id = "client-123".into();
        Arc::new(AppState::new(
            OAuthClient::new(identity).unwrap(),
            FixedPicker(document),
            GridFetcher::new(sheets),
            ExerciseExtractor::new(policy),
        ))
    }

    fn exercises_doc() -> Option<Document> {
        Some(Document {
            id: "sheet-1".into(),
            title: "Exercises".into(),
        })
    }

    fn day1() -> FixedSheets {
        FixedSheets {
            titles: vec!["_Notes", "Day1"],
            grids: vec![grid(&[
                &["Movement", "Sets", "Reps", "Load", "Rest", "Progression"],
                &["Bench", "3", "10", "60kg", "60", "5"],
            ])],
            fail: false,
        }
    }

    fn get(uri: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(id) = session {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, id));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_index_redirects_without_session() {
        let app = router(state(exercises_doc(), day1(), CoercionPolicy::default()));
        let response = app.oneshot(get("/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(location.contains("client_id=client-123"));
    }

    #[tokio::test]
    async fn test_index_binds_state_cookie_to_redirect() {
        let app = router(state(exercises_doc(), day1(), CoercionPolicy::default()));
        let response = app.oneshot(get("/", None)).await.unwrap();

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        let csrf = set_cookie
            .strip_prefix("oauth_state=")
            .and_then(|rest| rest.split(';').next())
            .unwrap();
        assert!(!csrf.is_empty());
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.ends_with(&format!("&state={}", csrf)));
    }

    #[tokio::test]
    async fn test_oauth_rejects_mismatched_state() {
        let app = router(state(exercises_doc(), day1(), CoercionPolicy::default()));
        let request = Request::builder()
            .uri("/oauth?code=abc&state=forged")
            .header(header::COOKIE, format!("{}=expected", STATE_COOKIE))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let app = router(state(exercises_doc(), day1(), CoercionPolicy::default()));
        let response = app
            .oneshot(get("/oauth?code=abc&state=forged", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_expired_session_is_evicted() {
        let state = state(exercises_doc(), day1(), CoercionPolicy::default());
        let mut token = SessionToken::new("tok");
        token.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        let id = state.sessions().create(token);
        assert_eq!(state.sessions().len(), 1);

        let response = router(state.clone())
            .oneshot(get("/api/exercises", Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.sessions().is_empty());
    }

    #[test]
    fn test_create_prunes_expired_sessions() {
        let registry = SessionRegistry::new();
        let mut stale = SessionToken::new("old");
        stale.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        registry.create(stale);
        let live = registry.create(SessionToken::new("new"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&live), Some(SessionToken::new("new")));
    }

    #[tokio::test]
    async fn test_index_ok_with_session() {
        let state = state(exercises_doc(), day1(), CoercionPolicy::default());
        let id = state.sessions().create(SessionToken::new("tok"));
        let response = router(state).oneshot(get("/", Some(&id))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_exercises_requires_session() {
        let app = router(state(exercises_doc(), day1(), CoercionPolicy::default()));
        let response = app
            .oneshot(get("/api/exercises", Some("unknown-id")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_exercises_legacy_shape() {
        let state = state(exercises_doc(), day1(), CoercionPolicy::default());
        let id = state.sessions().create(SessionToken::new("tok"));
        let response = router(state)
            .oneshot(get("/api/exercises", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "name": "Day1",
                "features": [],
                "movements": [{
                    "name": "Bench",
                    "sets": 3,
                    "reps": 10,
                    "load": "60kg",
                    "rest": 60,
                    "progression_rate": 5
                }]
            }])
        );
    }

    #[tokio::test]
    async fn test_exercises_error_statuses() {
        let missing = state(None, day1(), CoercionPolicy::default());
        let id = missing.sessions().create(SessionToken::new("tok"));
        let response = router(missing)
            .oneshot(get("/api/exercises", Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut broken = day1();
        broken.fail = true;
        let failing = state(exercises_doc(), broken, CoercionPolicy::default());
        let id = failing.sessions().create(SessionToken::new("tok"));
        let response = router(failing)
            .oneshot(get("/api/exercises", Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let mut sloppy = day1();
        sloppy.grids = vec![grid(&[&["Movement"], &["Bench", "three"]])];
        let strict = state(exercises_doc(), sloppy, CoercionPolicy::Strict);
        let id = strict.sessions().create(SessionToken::new("tok"));
        let response = router(strict)
            .oneshot(get("/api/exercises", Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_oauth_without_code() {
        let app = router(state(exercises_doc(), day1(), CoercionPolicy::default()));
        let response = app.oneshot(get("/oauth", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_destroys_session() {
        let state = state(exercises_doc(), day1(), CoercionPolicy::default());
        let id = state.sessions().create(SessionToken::new("tok"));
        let app = router(state.clone());

        let response = app.oneshot(get("/logout", Some(&id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert!(state.sessions().get(&id).is_none());
        assert!(state.sessions().is_empty());
    }
}
