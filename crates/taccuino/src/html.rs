use axum::http::StatusCode;
use chrono::{Datelike, NaiveDate};
use maud::{html, Markup, PreEscaped, DOCTYPE};

use crate::auth::CurrentUser;
use crate::calendar::MonthGrid;
use crate::timezone::DisplayZone;
use crate::types::{entry_url, DayEntries, EntriesByDate, Entry, EntryForm};

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Where an entry form posts to and what it is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    New,
    Edit { action: String, cancel: String },
}

impl FormMode {
    fn action(&self) -> &str {
        match self {
            FormMode::New => "/new",
            FormMode::Edit { action, .. } => action,
        }
    }

    fn cancel(&self) -> &str {
        match self {
            FormMode::New => "/",
            FormMode::Edit { cancel, .. } => cancel,
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            FormMode::New => "New entry",
            FormMode::Edit { .. } => "Edit entry",
        }
    }
}

fn layout(title: &str, user: Option<&CurrentUser>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) " · Taccuino" }
                link rel="stylesheet" href="/static/highlight.css";
                style { (PreEscaped(CSS)) }
            }
            body {
                nav.topbar {
                    a.brand href="/" { "Taccuino" }
                    @if let Some(user) = user {
                        div.nav-links {
                            a href="/new" { "New entry" }
                            span.username { (user.username) }
                            a href="/logout" { "Log out" }
                        }
                    }
                }
                div.container {
                    (content)
                }
            }
        }
    }
}

pub fn render_error(status: StatusCode, message: &str) -> Markup {
    let title = status.canonical_reason().unwrap_or("Error");
    layout(
        title,
        None,
        html! {
            div.error-page {
                h1 { (status.as_u16()) " " (title) }
                p { (message) }
                a href="/" { "Back to the calendar" }
            }
        },
    )
}

pub fn render_login(error: Option<&str>, username: &str) -> Markup {
    auth_page("Log in", "/login", error, username, html! {
        p.hint { "No account yet? " a href="/register" { "Register" } }
    })
}

pub fn render_register(error: Option<&str>, username: &str) -> Markup {
    auth_page("Register", "/register", error, username, html! {
        p.hint { "Already registered? " a href="/login" { "Log in" } }
    })
}

fn auth_page(
    title: &str,
    action: &str,
    error: Option<&str>,
    username: &str,
    footer: Markup,
) -> Markup {
    layout(
        title,
        None,
        html! {
            div.auth-box {
                h1 { (title) }
                (error_banner(error))
                form method="post" action=(action) {
                    label for="username" { "Username" }
                    input #username type="text" name="username" value=(username) required autofocus;
                    label for="password" { "Password" }
                    input #password type="password" name="password" required;
                    button type="submit" { (title) }
                }
                (footer)
            }
        },
    )
}

fn error_banner(error: Option<&str>) -> Markup {
    html! {
        @if let Some(message) = error {
            div.flash role="alert" { (message) }
        }
    }
}

/// Month calendar with the user's entries and the most recent ones below.
///
/// `notice` is a one-off confirmation shown above the calendar.
pub fn render_month(
    user: &CurrentUser,
    zone: &DisplayZone,
    grid: &MonthGrid,
    by_date: &EntriesByDate,
    recent: &[Entry],
    today: NaiveDate,
    notice: Option<&str>,
) -> Markup {
    let label = month_label(grid);
    let (prev_year, prev_month) = grid.previous();
    let (next_year, next_month) = grid.next();

    layout(
        &label,
        Some(user),
        html! {
            @if let Some(message) = notice {
                div.flash.notice role="status" { (message) }
            }
            div.month-header {
                a.month-nav href=(month_url(prev_year, prev_month)) { "‹ Previous" }
                h1 { (label) }
                a.month-nav href=(month_url(next_year, next_month)) { "Next ›" }
            }
            table.calendar {
                thead {
                    tr {
                        @for name in WEEKDAYS {
                            th { (name) }
                        }
                    }
                }
                tbody {
                    @for week in &grid.weeks {
                        tr {
                            @for day in week {
                                (render_day_cell(zone, grid, *day, by_date, today))
                            }
                        }
                    }
                }
            }
            section.recent {
                h2 { "Recent entries" }
                @if recent.is_empty() {
                    p.empty-state { "Nothing written yet. " a href="/new" { "Start an entry." } }
                } @else {
                    ul.entry-list {
                        @for entry in recent {
                            li {
                                a href=(entry.url(zone)) { (entry.display_title()) }
                                span.entry-meta { (format_timestamp(zone, entry)) }
                            }
                        }
                    }
                }
            }
        },
    )
}

fn render_day_cell(
    zone: &DisplayZone,
    grid: &MonthGrid,
    day: NaiveDate,
    by_date: &EntriesByDate,
    today: NaiveDate,
) -> Markup {
    let entries = by_date.get(&day).map(Vec::as_slice).unwrap_or_default();
    html! {
        td.day.outside[!grid.in_month(day)].today[day == today] {
            a.day-number href=(day_url(day)) { (day.format("%-d").to_string()) }
            @for entry in entries {
                a.day-entry href=(entry.url(zone)) { (entry.display_title()) }
            }
        }
    }
}

/// Entries of a single local day, oldest first
pub fn render_day(
    user: &CurrentUser,
    zone: &DisplayZone,
    date: NaiveDate,
    entries: &DayEntries,
) -> Markup {
    let label = date.format("%A, %B %-d, %Y").to_string();
    layout(
        &label,
        Some(user),
        html! {
            p.crumbs {
                a href=(month_url(date.year(), date.month())) { "Back to month" }
            }
            h1 { (label) }
            @if entries.is_empty() {
                p.empty-state { "No entries on this day." }
            } @else {
                ul.entry-list {
                    @for entry in entries {
                        li {
                            span.entry-meta { (zone.to_display(entry.created_at).format("%H:%M").to_string()) }
                            a href=(entry.url(zone)) { (entry.display_title()) }
                        }
                    }
                }
            }
        },
    )
}

/// A single entry. `body_html` must come from the Markdown pipeline.
pub fn render_entry(
    user: &CurrentUser,
    zone: &DisplayZone,
    entry: &Entry,
    body_html: &str,
) -> Markup {
    let date = entry.local_date(zone);
    layout(
        entry.display_title(),
        Some(user),
        html! {
            p.crumbs {
                a href=(day_url(date)) { (date.format("%Y-%m-%d").to_string()) }
            }
            article.entry {
                h1 { (entry.display_title()) }
                p.entry-meta {
                    (format_timestamp(zone, entry))
                    @if entry.was_edited() {
                        " · edited " (zone.to_display(entry.updated_at).format("%Y-%m-%d %H:%M").to_string())
                    }
                }
                div.entry-body { (PreEscaped(body_html)) }
            }
            div.entry-actions {
                a.button href={ (entry_url(date, entry.id)) "/edit" } { "Edit" }
                form method="post" action={ "/delete/" (entry.id) }
                    onsubmit="return confirm('Delete this entry?');" {
                    button.danger type="submit" { "Delete" }
                }
            }
        },
    )
}

/// Entry editor with a live preview pane
pub fn render_entry_form(
    user: &CurrentUser,
    mode: &FormMode,
    form: &EntryForm,
    error: Option<&str>,
) -> Markup {
    layout(
        mode.heading(),
        Some(user),
        html! {
            h1 { (mode.heading()) }
            (error_banner(error))
            form.entry-form method="post" action=(mode.action()) {
                label for="title" { "Title" }
                input #title type="text" name="title" value=(form.title) maxlength="200";
                label for="body" { "Body (Markdown)" }
                textarea #body name="body" rows="16" required { (form.body) }
                div.form-actions {
                    button type="submit" { "Save" }
                    button #"preview-button" type="button" { "Preview" }
                    a href=(mode.cancel()) { "Cancel" }
                }
            }
            div.entry-body #preview {}
            script { (PreEscaped(JAVASCRIPT)) }
        },
    )
}

fn format_timestamp(zone: &DisplayZone, entry: &Entry) -> String {
    zone.to_display(entry.created_at)
        .format("%Y-%m-%d %H:%M %Z")
        .to_string()
}

fn month_label(grid: &MonthGrid) -> String {
    grid.days()
        .find(|day| grid.in_month(*day))
        .map(|day| day.format("%B %Y").to_string())
        .unwrap_or_else(|| format!("{}-{:02}", grid.year, grid.month))
}

pub fn month_url(year: i32, month: u32) -> String {
    format!("/?year={year}&month={month}")
}

pub fn day_url(date: NaiveDate) -> String {
    format!("/day/{}", date.format("%Y-%m-%d"))
}

const CSS: &str = r#"
* {
    margin: 0;
    padding: 0;
    box-sizing: border-box;
}

body {
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif;
    background: #faf8f5;
    color: #222;
    line-height: 1.5;
}

a {
    color: #8a3b12;
}

.topbar {
    display: flex;
    justify-content: space-between;
    align-items: center;
    padding: 12px 24px;
    border-bottom: 1px solid #e4ddd3;
    background: #fff;
}

.brand {
    font-weight: 700;
    text-decoration: none;
    letter-spacing: 0.05em;
}

.nav-links {
    display: flex;
    gap: 16px;
    align-items: center;
}

.username {
    color: #777;
}

.container {
    max-width: 960px;
    margin: 0 auto;
    padding: 32px 24px 60px;
}

h1 {
    font-size: 1.8em;
    margin-bottom: 16px;
}

h2 {
    font-size: 1.2em;
    margin: 32px 0 12px;
}

.month-header {
    display: flex;
    justify-content: space-between;
    align-items: baseline;
}

.calendar {
    width: 100%;
    border-collapse: collapse;
    table-layout: fixed;
}

.calendar th {
    font-size: 0.8em;
    color: #777;
    padding: 4px;
}

.calendar td.day {
    vertical-align: top;
    height: 96px;
    padding: 4px;
    border: 1px solid #e4ddd3;
    background: #fff;
}

.calendar td.outside {
    background: #f3efe9;
    color: #aaa;
}

.calendar td.today {
    outline: 2px solid #8a3b12;
}

.day-number {
    display: block;
    font-size: 0.8em;
    text-decoration: none;
    color: inherit;
}

.day-entry {
    display: block;
    font-size: 0.8em;
    white-space: nowrap;
    overflow: hidden;
    text-overflow: ellipsis;
}

.entry-list {
    list-style: none;
}

.entry-list li {
    padding: 6px 0;
    border-bottom: 1px solid #eee;
    display: flex;
    gap: 12px;
}

.entry-meta {
    color: #888;
    font-size: 0.85em;
}

.entry-body {
    margin-top: 16px;
}

.entry-body p,
.entry-body ul,
.entry-body ol,
.entry-body pre,
.entry-body blockquote,
.entry-body table {
    margin-bottom: 12px;
}

.entry-body blockquote {
    border-left: 3px solid #ddd;
    padding-left: 12px;
    color: #555;
}

.codehilite {
    display: flex;
    background: #fff;
    border: 1px solid #eee;
    overflow-x: auto;
}

.codehilite pre {
    padding: 8px;
}

.codehilite pre.linenos {
    color: #bbb;
    text-align: right;
    border-right: 1px solid #eee;
    user-select: none;
}

.entry-actions {
    display: flex;
    gap: 12px;
    margin-top: 24px;
}

.entry-form label,
.auth-box label {
    display: block;
    margin: 12px 0 4px;
    font-weight: 600;
}

.entry-form input,
.entry-form textarea,
.auth-box input {
    width: 100%;
    padding: 8px;
    border: 1px solid #ccc;
    font: inherit;
}

.form-actions {
    display: flex;
    gap: 12px;
    align-items: center;
    margin-top: 12px;
}

button,
.button {
    padding: 6px 14px;
    border: 1px solid #8a3b12;
    background: #fff;
    color: #8a3b12;
    cursor: pointer;
    text-decoration: none;
    font: inherit;
}

button.danger {
    border-color: #b00020;
    color: #b00020;
}

.auth-box {
    max-width: 360px;
    margin: 40px auto;
}

.auth-box button {
    margin-top: 16px;
}

.flash {
    padding: 10px 12px;
    margin-bottom: 12px;
    background: #fdecea;
    border: 1px solid #f5c2bd;
    color: #8a1c12;
}

.flash.notice {
    background: #e8f5e9;
    border-color: #b7dfb9;
    color: #1e5b22;
}

.empty-state,
.hint {
    color: #777;
    margin-top: 12px;
}

@media (max-width: 768px) {
    .calendar td.day {
        height: 64px;
    }
}
"#;

const JAVASCRIPT: &str = r#"
// Render the current body through the server-side pipeline
document.getElementById('preview-button').addEventListener('click', async () => {
    const body = document.getElementById('body').value;
    const target = document.getElementById('preview');
    try {
        const response = await fetch('/preview', {
            method: 'POST',
            headers: { 'Content-Type': 'text/plain; charset=utf-8' },
            body,
        });
        if (!response.ok) {
            target.textContent = 'Preview failed.';
            return;
        }
        const data = await response.json();
        target.innerHTML = data.html;
    } catch (e) {
        target.textContent = 'Preview failed.';
    }
});
"#;
