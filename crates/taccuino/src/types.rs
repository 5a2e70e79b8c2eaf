use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::timezone::DisplayZone;

pub type UserId = i64;
pub type EntryId = i64;

/// Longest title accepted from the entry form
pub const MAX_TITLE_CHARS: usize = 200;

/// A single journal entry
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub user_id: UserId,
    pub title: Option<String>,

    /// Markdown source, never shown without going through the render pipeline
    pub body: String,

    /// Authoritative creation instant, immutable
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Persisted local date of `created_at`; `None` only for rows that predate
    /// the column and have not been backfilled yet
    pub entry_date: Option<NaiveDate>,
}

impl Entry {
    /// Calendar date of the entry in the display zone, derived from `created_at`
    pub fn local_date(&self, zone: &DisplayZone) -> NaiveDate {
        zone.local_date(self.created_at)
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => "(untitled)",
        }
    }

    /// Canonical URL of the entry
    pub fn url(&self, zone: &DisplayZone) -> String {
        entry_url(self.local_date(zone), self.id)
    }

    pub fn was_edited(&self) -> bool {
        self.updated_at > self.created_at
    }
}

pub fn entry_url(date: NaiveDate, id: EntryId) -> String {
    format!("/entries/{}/{}", date.format("%Y-%m-%d"), id)
}

/// Entries grouped by local calendar date, each group oldest first
pub type EntriesByDate = BTreeMap<NaiveDate, Vec<Entry>>;

/// Entries of one local date, oldest first
pub type DayEntries = Vec<Entry>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
}

/// Title and body as submitted through the entry form
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct EntryForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Entry input that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub title: Option<String>,
    pub body: String,
}

impl EntryForm {
    pub fn validate(&self) -> AppResult<EntryDraft> {
        if self.body.trim().is_empty() {
            return Err(AppError::Validation("Body is required.".to_string()));
        }
        let title = self.title.trim();
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(AppError::Validation(format!(
                "Title must be at most {MAX_TITLE_CHARS} characters."
            )));
        }
        Ok(EntryDraft {
            title: (!title.is_empty()).then(|| title.to_string()),
            body: self.body.clone(),
        })
    }
}
