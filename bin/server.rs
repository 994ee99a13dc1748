// Recetario - Web Server
// Session-authenticated front end over the recetas store.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use recetario::{
    category_totals, count_recetas, daily_breakdown, date_bounds, delete_lote,
    distinct_sucursales, fetch_raw_numbers, list_lotes, purge_expired, reassign_lote,
    sample_recetas, sessions, setup_database, ExportKind, LoteSummary, RecetaFilter,
};

const SESSION_COOKIE: &str = "recetario_session";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

// ============================================================================
// Request / Response bodies
// ============================================================================

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

/// Date range plus optional branch; the shape every export and count
/// request uses. `sucursal` may be a branch number, `"all"`, or absent.
#[derive(Deserialize)]
struct FilterRequest {
    #[serde(rename = "startDate")]
    start_date: String,
    #[serde(rename = "endDate")]
    end_date: String,
    #[serde(default)]
    sucursal: Option<String>,
}

/// Same fields, all optional, for the lote listing.
#[derive(Deserialize)]
struct OptionalFilterRequest {
    #[serde(rename = "startDate", default)]
    start_date: Option<String>,
    #[serde(rename = "endDate", default)]
    end_date: Option<String>,
    #[serde(default)]
    sucursal: Option<String>,
}

#[derive(Deserialize)]
struct UpdateLoteForm {
    #[serde(rename = "sucursalActual")]
    sucursal_actual: i64,
    fecha: String,
    #[serde(rename = "nuevaSucursal")]
    nueva_sucursal: i64,
}

#[derive(Deserialize)]
struct DeleteLoteForm {
    sucursal: i64,
    fecha: String,
}

#[derive(Serialize)]
struct CountResponse {
    count: i64,
}

#[derive(Serialize)]
struct DashboardResponse {
    data: Vec<recetario::DailyCount>,
    totals: recetario::CategoryTotals,
}

// ============================================================================
// Helpers
// ============================================================================

fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Resolve the caller's session. Anything short of a live session (no
/// cookie, unknown token, expired, store hiccup) counts as unauthenticated.
fn authed_user(state: &AppState, headers: &HeaderMap) -> Option<sessions::User> {
    let token = session_token(headers)?;
    let conn = state.db.lock().unwrap();
    sessions::session_user(&conn, &token).ok().flatten()
}

fn login_redirect() -> Response {
    Redirect::to("/login").into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

/// Request-level failure: the detail goes to the log, the caller only gets
/// a generic message.
fn store_failure(what: &str, err: anyhow::Error) -> Response {
    tracing::error!("{}: {:#}", what, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error: {}", what),
    )
        .into_response()
}

fn parse_request_date(text: &str) -> Result<NaiveDate, Response> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| bad_request(&format!("Invalid date: {}", text)))
}

/// `"all"`, empty, or absent means no branch predicate.
fn parse_branch(value: Option<&str>) -> Result<Option<i64>, Response> {
    match value {
        None | Some("") | Some("all") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| bad_request(&format!("Invalid sucursal: {}", text))),
    }
}

fn parse_filter(req: &FilterRequest) -> Result<RecetaFilter, Response> {
    let start = parse_request_date(&req.start_date)?;
    let end = parse_request_date(&req.end_date)?;
    let branch = parse_branch(req.sucursal.as_deref())?;

    Ok(RecetaFilter::date_range(start, end).with_branch(branch))
}

fn parse_optional_filter(req: &OptionalFilterRequest) -> Result<RecetaFilter, Response> {
    let mut filter = RecetaFilter::default();

    if let Some(start) = req.start_date.as_deref().filter(|s| !s.is_empty()) {
        filter.start_date = Some(parse_request_date(start)?);
    }
    if let Some(end) = req.end_date.as_deref().filter(|s| !s.is_empty()) {
        filter.end_date = Some(parse_request_date(end)?);
    }
    filter.branch = parse_branch(req.sucursal.as_deref())?;

    Ok(filter)
}

// ============================================================================
// Auth routes
// ============================================================================

async fn root() -> impl IntoResponse {
    Redirect::to("/login")
}

async fn login_page() -> impl IntoResponse {
    Html(include_str!("../web/login.html"))
}

async fn login_post(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let conn = state.db.lock().unwrap();

    let user = match sessions::verify_login(&conn, &form.username, &form.password) {
        Ok(user) => user,
        Err(e) => return store_failure("login failed", e),
    };

    let Some(user) = user else {
        // Plain rejection, not a structured error.
        return "Username or password incorrect".into_response();
    };

    match sessions::create_session(&conn, user.id) {
        Ok(token) => {
            tracing::info!(username = %user.username, "login");
            let cookie = format!(
                "{}={}; Path=/; HttpOnly; Max-Age={}",
                SESSION_COOKIE,
                token,
                sessions::SESSION_TTL_DAYS * 24 * 60 * 60
            );
            ([(header::SET_COOKIE, cookie)], Redirect::to("/recetas")).into_response()
        }
        Err(e) => store_failure("could not open session", e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        let conn = state.db.lock().unwrap();
        if let Err(e) = sessions::destroy_session(&conn, &token) {
            tracing::error!("logout: {:#}", e);
        }
    }

    let cleared = format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE);
    ([(header::SET_COOKIE, cleared)], Redirect::to("/login")).into_response()
}

// ============================================================================
// Pages
// ============================================================================

async fn recetas_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }
    Html(include_str!("../web/recetas.html")).into_response()
}

async fn listado_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }
    Html(include_str!("../web/listado.html")).into_response()
}

async fn dashboard_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }
    Html(include_str!("../web/dashboard.html")).into_response()
}

// ============================================================================
// Data routes
// ============================================================================

/// GET /sucursales - distinct branches, parsed and sorted ascending
async fn sucursales(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }

    let conn = state.db.lock().unwrap();
    match distinct_sucursales(&conn) {
        Ok(branches) => Json(branches).into_response(),
        Err(e) => store_failure("could not list sucursales", e),
    }
}

fn export_response(
    state: &AppState,
    headers: &HeaderMap,
    req: &FilterRequest,
    kind: ExportKind,
) -> Response {
    if authed_user(state, headers).is_none() {
        return login_redirect();
    }

    // Store-level selection by raw prefix; the pipeline re-checks the
    // leading digit on the normalized value.
    let filter = match parse_filter(req) {
        Ok(filter) => filter.with_category(kind.category()),
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let raws = match fetch_raw_numbers(&conn, &filter) {
        Ok(raws) => raws,
        Err(e) => return store_failure("could not fetch recetas", e),
    };

    let export = recetario::build_export(raws, kind);
    tracing::info!(filename = export.filename, codes = export.body.lines().count(), "export");

    (
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", export.filename),
            ),
        ],
        export.body,
    )
        .into_response()
}

/// POST /recetas - download Codigos.txt for the filtered range
async fn export_todos(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<FilterRequest>,
) -> Response {
    export_response(&state, &headers, &req, ExportKind::Todos)
}

/// POST /recetas-apross - download Codigos_APROSS.txt (codes starting with 9)
async fn export_apross(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<FilterRequest>,
) -> Response {
    export_response(&state, &headers, &req, ExportKind::Apross)
}

/// POST /recetas-pami - download Codigos_PAMI.txt (codes starting with 8)
async fn export_pami(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<FilterRequest>,
) -> Response {
    export_response(&state, &headers, &req, ExportKind::Pami)
}

fn count_response(
    state: &AppState,
    headers: &HeaderMap,
    req: &FilterRequest,
    kind: ExportKind,
) -> Response {
    if authed_user(state, headers).is_none() {
        return login_redirect();
    }

    let filter = match parse_filter(req) {
        Ok(filter) => filter.with_category(kind.category()),
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match count_recetas(&conn, &filter) {
        // Raw matching rows, pre-normalization and pre-dedup.
        Ok(count) => Json(CountResponse { count }).into_response(),
        Err(e) => store_failure("could not count recetas", e),
    }
}

/// POST /recetas-count
async fn count_todos(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FilterRequest>,
) -> Response {
    count_response(&state, &headers, &req, ExportKind::Todos)
}

/// POST /recetas-apross-count
async fn count_apross(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FilterRequest>,
) -> Response {
    count_response(&state, &headers, &req, ExportKind::Apross)
}

/// POST /recetas-pami-count
async fn count_pami(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FilterRequest>,
) -> Response {
    count_response(&state, &headers, &req, ExportKind::Pami)
}

/// POST /filter-recetas - lote groups, every filter field optional,
/// always date-descending
async fn filter_recetas(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OptionalFilterRequest>,
) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }

    let filter = match parse_optional_filter(&req) {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match list_lotes(&conn, &filter) {
        Ok(lotes) => Json::<Vec<LoteSummary>>(lotes).into_response(),
        Err(e) => store_failure("could not list lotes", e),
    }
}

/// POST /update-lote - reassign every record of an exact (branch, date) pair
async fn update_lote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<UpdateLoteForm>,
) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }

    let fecha = match parse_request_date(&form.fecha) {
        Ok(fecha) => fecha,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match reassign_lote(&conn, form.sucursal_actual, fecha, form.nueva_sucursal) {
        Ok(moved) => {
            tracing::info!(
                from = form.sucursal_actual,
                to = form.nueva_sucursal,
                fecha = %fecha,
                moved,
                "lote reassigned"
            );
            Redirect::to("/listado").into_response()
        }
        Err(e) => store_failure("could not update lote", e),
    }
}

/// POST /delete-lote - remove every record of an exact (branch, date) pair
async fn remove_lote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<DeleteLoteForm>,
) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }

    let fecha = match parse_request_date(&form.fecha) {
        Ok(fecha) => fecha,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match delete_lote(&conn, form.sucursal, fecha) {
        Ok(deleted) => {
            tracing::info!(sucursal = form.sucursal, fecha = %fecha, deleted, "lote deleted");
            Redirect::to("/listado").into_response()
        }
        Err(e) => store_failure("could not delete lote", e),
    }
}

/// POST /dashboard-data - per-day series plus category totals
async fn dashboard_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FilterRequest>,
) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }

    let filter = match parse_filter(&req) {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let data = match daily_breakdown(&conn, &filter) {
        Ok(data) => data,
        Err(e) => return store_failure("could not build dashboard series", e),
    };
    let totals = match category_totals(&conn, &filter) {
        Ok(totals) => totals,
        Err(e) => return store_failure("could not build dashboard totals", e),
    };

    Json(DashboardResponse { data, totals }).into_response()
}

/// GET /test-data - diagnostic snapshot. Unlike the report endpoints this
/// one may expose failure detail.
async fn test_data(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if authed_user(&state, &headers).is_none() {
        return login_redirect();
    }

    let conn = state.db.lock().unwrap();

    let snapshot = sample_recetas(&conn, 5).and_then(|sample| {
        let totals = category_totals(&conn, &RecetaFilter::default())?;
        let bounds = date_bounds(&conn)?;
        Ok(serde_json::json!({
            "sampleData": sample,
            "statistics": totals,
            "minDate": bounds.map(|(min, _)| min),
            "maxDate": bounds.map(|(_, max)| max),
        }))
    });

    match snapshot {
        Ok(body) => Json(body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("RECETARIO_DB").unwrap_or_else(|_| "recetas.db".to_string());
    let conn = Connection::open(&db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to set up database schema");

    match purge_expired(&conn) {
        Ok(purged) if purged > 0 => tracing::info!(purged, "purged expired sessions"),
        Ok(_) => {}
        Err(e) => tracing::warn!("session purge failed: {:#}", e),
    }

    tracing::info!(db = %db_path, "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/login", get(login_page).post(login_post))
        .route("/logout", get(logout))
        .route("/sucursales", get(sucursales))
        .route("/recetas", get(recetas_page).post(export_todos))
        .route("/recetas-apross", post(export_apross))
        .route("/recetas-pami", post(export_pami))
        .route("/recetas-count", post(count_todos))
        .route("/recetas-apross-count", post(count_apross))
        .route("/recetas-pami-count", post(count_pami))
        .route("/listado", get(listado_page))
        .route("/filter-recetas", post(filter_recetas))
        .route("/update-lote", post(update_lote))
        .route("/delete-lote", post(remove_lote))
        .route("/dashboard", get(dashboard_page))
        .route("/dashboard-data", post(dashboard_data))
        .route("/test-data", get(test_data))
        .nest_service("/static", ServeDir::new("web"))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("server running on http://localhost:{}", port);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
