use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Datelike, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{self, CurrentUser};
use crate::calendar;
use crate::config::Config;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::html::{self, FormMode};
use crate::journal::{self, EntryView};
use crate::markdown;
use crate::timezone::DisplayZone;
use crate::types::{entry_url, EntryForm};

/// Cookie carrying a confirmation to the next page
const FLASH_COOKIE: &str = "taccuino_flash";
const FLASH_DELETED: &str = "deleted";

/// Application state shared across requests
pub struct AppState {
    pub db: Mutex<Connection>,
    pub zone: DisplayZone,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(conn: Connection, zone: DisplayZone, bcrypt_cost: u32) -> Self {
        Self {
            db: Mutex::new(conn),
            zone,
            bcrypt_cost,
        }
    }
}

/// Open the database, bring it up to date and start the web server
pub async fn serve(port: u16, config: Config) -> anyhow::Result<()> {
    let conn = db::init_db(&config.database_path, &config.migrations_dir)?;
    db::normalize_legacy_rows(&conn, &config.display_zone)?;

    let state = Arc::new(AppState::new(
        conn,
        config.display_zone,
        config.bcrypt_cost,
    ));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!(
        addr = %addr,
        timezone = config.display_zone.name(),
        db = %config.database_path.display(),
        "Server running"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(month_handler))
        .route("/day/{date}", get(day_handler))
        .route("/entries/{date}/{id}", get(entry_handler))
        .route(
            "/entries/{date}/{id}/edit",
            get(edit_form_handler).post(edit_handler),
        )
        .route("/new", get(new_form_handler).post(create_handler))
        .route("/delete/{id}", post(delete_handler))
        .route("/preview", post(preview_handler))
        .route("/login", get(login_form_handler).post(login_handler))
        .route("/register", get(register_form_handler).post(register_handler))
        .route("/logout", get(logout_handler))
        .route("/static/highlight.css", get(highlight_css_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `?year=&month=` of the calendar page. Kept as strings so that malformed
/// values surface as `InvalidDate` rather than a query rejection.
#[derive(Debug, Default, Deserialize)]
struct MonthQuery {
    year: Option<String>,
    month: Option<String>,
}

impl MonthQuery {
    /// Year and month to show. Both must be given, otherwise the current
    /// month is shown.
    fn resolve(&self, zone: &DisplayZone) -> AppResult<(i32, u32)> {
        let (Some(year), Some(month)) = (self.year.as_deref(), self.month.as_deref()) else {
            let today = zone.today();
            return Ok((today.year(), today.month()));
        };
        let year = year
            .trim()
            .parse::<i32>()
            .map_err(|_| AppError::InvalidDate(format!("year {year}")))?;
        let month = month
            .trim()
            .parse::<u32>()
            .map_err(|_| AppError::InvalidDate(format!("month {month}")))?;
        Ok((year, month))
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

fn page(markup: maud::Markup) -> Html<String> {
    Html(markup.into_string())
}

/// Month calendar for the signed-in user
async fn month_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    jar: CookieJar,
    Query(query): Query<MonthQuery>,
) -> AppResult<(CookieJar, Html<String>)> {
    let (year, month) = query.resolve(&state.zone)?;
    let grid = calendar::build_month_grid(year, month)?;

    let conn = state.db.lock().await;
    let by_date = journal::entries_for_month(&conn, &state.zone, &user, year, month)?;
    let recent = journal::recent_entries(&conn, &user)?;
    drop(conn);

    let (jar, notice) = take_flash(jar);
    Ok((
        jar,
        page(html::render_month(
            &user,
            &state.zone,
            &grid,
            &by_date,
            &recent,
            state.zone.today(),
            notice,
        )),
    ))
}

async fn day_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(date): Path<String>,
) -> AppResult<Html<String>> {
    let date = journal::parse_date_segment(&date)?;
    let entries = {
        let conn = state.db.lock().await;
        journal::entries_for_day(&conn, &state.zone, &user, date)?
    };
    Ok(page(html::render_day(&user, &state.zone, date, &entries)))
}

/// Show an entry, or redirect permanently when the date segment is stale
async fn entry_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((date, id)): Path<(String, String)>,
) -> AppResult<Response> {
    let date = journal::parse_date_segment(&date)?;
    let id = journal::parse_entry_id(&id)?;
    let view = {
        let conn = state.db.lock().await;
        journal::resolve_for_view(&conn, &state.zone, &user, date, id)?
    };

    match view {
        EntryView::Show(entry) => {
            let body_html = markdown::render(&entry.body);
            Ok(page(html::render_entry(&user, &state.zone, &entry, &body_html)).into_response())
        }
        EntryView::Redirect(url) => Ok(Redirect::permanent(&url).into_response()),
    }
}

async fn new_form_handler(user: CurrentUser) -> Html<String> {
    page(html::render_entry_form(
        &user,
        &FormMode::New,
        &EntryForm::default(),
        None,
    ))
}

async fn create_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<EntryForm>,
) -> AppResult<Response> {
    let draft = match form.validate() {
        Ok(draft) => draft,
        Err(AppError::Validation(msg)) => {
            return Ok(form_error(&user, &FormMode::New, &form, &msg));
        }
        Err(e) => return Err(e),
    };

    let entry = {
        let conn = state.db.lock().await;
        journal::create_entry(&conn, &state.zone, &user, &draft, Utc::now())?
    };
    Ok(Redirect::to(&entry.url(&state.zone)).into_response())
}

async fn edit_form_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((date, id)): Path<(String, String)>,
) -> AppResult<Html<String>> {
    let date = journal::parse_date_segment(&date)?;
    let id = journal::parse_entry_id(&id)?;
    let entry = {
        let conn = state.db.lock().await;
        journal::resolve_for_edit(&conn, &state.zone, &user, date, id)?
    };

    let form = EntryForm {
        title: entry.title.clone().unwrap_or_default(),
        body: entry.body.clone(),
    };
    Ok(page(html::render_entry_form(
        &user,
        &edit_mode(date, id),
        &form,
        None,
    )))
}

async fn edit_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((date, id)): Path<(String, String)>,
    Form(form): Form<EntryForm>,
) -> AppResult<Response> {
    let date = journal::parse_date_segment(&date)?;
    let id = journal::parse_entry_id(&id)?;
    let conn = state.db.lock().await;
    // Stale or foreign URLs are rejected before the input is looked at
    journal::resolve_for_edit(&conn, &state.zone, &user, date, id)?;

    let draft = match form.validate() {
        Ok(draft) => draft,
        Err(AppError::Validation(msg)) => {
            return Ok(form_error(&user, &edit_mode(date, id), &form, &msg));
        }
        Err(e) => return Err(e),
    };

    let entry = journal::update_entry(&conn, &state.zone, &user, date, id, &draft, Utc::now())?;
    Ok(Redirect::to(&entry.url(&state.zone)).into_response())
}

fn edit_mode(date: chrono::NaiveDate, id: i64) -> FormMode {
    let url = entry_url(date, id);
    FormMode::Edit {
        action: format!("{url}/edit"),
        cancel: url,
    }
}

fn form_error(user: &CurrentUser, mode: &FormMode, form: &EntryForm, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        page(html::render_entry_form(user, mode, form, Some(message))),
    )
        .into_response()
}

/// Delete an entry and go back to the month it was in
async fn delete_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    jar: CookieJar,
    Path(id): Path<String>,
) -> AppResult<(CookieJar, Redirect)> {
    let id = journal::parse_entry_id(&id)?;
    let entry = {
        let conn = state.db.lock().await;
        journal::delete_entry(&conn, &user, id)?
    };
    let date = entry.local_date(&state.zone);
    let flash = Cookie::build((FLASH_COOKIE, FLASH_DELETED))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    Ok((
        jar.add(flash),
        Redirect::to(&html::month_url(date.year(), date.month())),
    ))
}

/// Read and clear the one-shot confirmation cookie
fn take_flash(jar: CookieJar) -> (CookieJar, Option<&'static str>) {
    let notice = match jar.get(FLASH_COOKIE).map(|cookie| cookie.value()) {
        None => return (jar, None),
        Some(FLASH_DELETED) => Some("Entry deleted."),
        Some(_) => None,
    };
    (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), notice)
}

/// Render a Markdown body for the editor preview
async fn preview_handler(_user: CurrentUser, body: String) -> Json<serde_json::Value> {
    Json(json!({ "html": markdown::render(&body) }))
}

async fn login_form_handler() -> Html<String> {
    page(html::render_login(None, ""))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> AppResult<Response> {
    let user = auth::authenticate(&state, &credentials.username, credentials.password).await?;
    let Some(user) = user else {
        return Ok((
            StatusCode::UNAUTHORIZED,
            page(html::render_login(
                Some("Invalid username or password."),
                &credentials.username,
            )),
        )
            .into_response());
    };

    let cookie = {
        let conn = state.db.lock().await;
        auth::start_session(&conn, &user)?
    };
    Ok((jar.add(cookie), Redirect::to("/")).into_response())
}

async fn register_form_handler() -> Html<String> {
    page(html::render_register(None, ""))
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> AppResult<Response> {
    let username = credentials.username.clone();
    let rejected = |status: StatusCode, msg: &str| {
        (status, page(html::render_register(Some(msg), &username))).into_response()
    };

    let user = match auth::register(&state, &credentials.username, credentials.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(rejected(
                StatusCode::CONFLICT,
                "That username is already taken.",
            ))
        }
        Err(AppError::Validation(msg)) => return Ok(rejected(StatusCode::BAD_REQUEST, &msg)),
        Err(e) => return Err(e),
    };

    let cookie = {
        let conn = state.db.lock().await;
        auth::start_session(&conn, &user)?
    };
    Ok((jar.add(cookie), Redirect::to("/")).into_response())
}

async fn logout_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> AppResult<Response> {
    let jar = {
        let conn = state.db.lock().await;
        auth::end_session(&conn, jar)?
    };
    Ok((jar, Redirect::to("/login")).into_response())
}

async fn highlight_css_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        markdown::highlight_css(),
    )
}
