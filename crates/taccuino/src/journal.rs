//! Journal operations on behalf of a signed-in user.
//!
//! Every function takes the storage connection and the request's
//! [`CurrentUser`] explicitly. Reads bucket entries by their local calendar
//! date; single-entry lookups check ownership and that the date carried in the
//! URL is the entry's true local date.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::auth::CurrentUser;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::timezone::DisplayZone;
use crate::types::{DayEntries, EntriesByDate, Entry, EntryDraft, EntryId};

/// How many entries the home page lists under "Recent"
pub const RECENT_LIMIT: usize = 10;

/// Outcome of comparing a URL date segment with an entry's local date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateCheck {
    Canonical,
    Moved(NaiveDate),
}

/// What a view request for an entry should produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryView {
    Show(Entry),
    Redirect(String),
}

/// Parse a `YYYY-MM-DD` path segment
pub fn parse_date_segment(segment: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(segment, "%Y-%m-%d")
        .map_err(|_| AppError::InvalidDate(segment.to_string()))
}

pub fn parse_entry_id(segment: &str) -> AppResult<EntryId> {
    segment
        .parse::<EntryId>()
        .map_err(|_| AppError::NotFound(format!("entry {segment}")))
}

/// Group entries under the display-zone date of their creation instant.
/// Input order is kept within each bucket.
pub fn bucket_by_local_date(zone: &DisplayZone, entries: Vec<Entry>) -> EntriesByDate {
    let mut by_date = EntriesByDate::new();
    for entry in entries {
        by_date
            .entry(entry.local_date(zone))
            .or_default()
            .push(entry);
    }
    by_date
}

/// The user's entries for one local month, keyed by local date, oldest first
pub fn entries_for_month(
    conn: &Connection,
    zone: &DisplayZone,
    user: &CurrentUser,
    year: i32,
    month: u32,
) -> AppResult<EntriesByDate> {
    let (start, end) = zone.month_range_utc(year, month)?;
    let entries = db::find_entries_by_user_and_range(conn, user.id, start, end)?;
    debug!(
        user = user.id,
        year = year,
        month = month,
        count = entries.len(),
        "Loaded month"
    );
    Ok(bucket_by_local_date(zone, entries))
}

/// The user's entries for one local day, oldest first
pub fn entries_for_day(
    conn: &Connection,
    zone: &DisplayZone,
    user: &CurrentUser,
    date: NaiveDate,
) -> AppResult<DayEntries> {
    let (start, end) = zone.day_range_utc(date)?;
    Ok(db::find_entries_by_user_and_range(conn, user.id, start, end)?)
}

/// The user's latest entries, newest first
pub fn recent_entries(conn: &Connection, user: &CurrentUser) -> AppResult<Vec<Entry>> {
    Ok(db::recent_entries(conn, user.id, RECENT_LIMIT)?)
}

pub fn check_date_segment(zone: &DisplayZone, entry: &Entry, url_date: NaiveDate) -> DateCheck {
    let actual = entry.local_date(zone);
    if actual == url_date {
        DateCheck::Canonical
    } else {
        DateCheck::Moved(actual)
    }
}

/// Load an entry the user owns
fn load_owned(conn: &Connection, user: &CurrentUser, id: EntryId) -> AppResult<Entry> {
    let entry = db::find_entry_by_id(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("entry {id}")))?;
    if entry.user_id != user.id {
        return Err(AppError::Forbidden(format!("entry {id}")));
    }
    Ok(entry)
}

/// Resolve `/entries/{date}/{id}` for display, redirecting stale dates
pub fn resolve_for_view(
    conn: &Connection,
    zone: &DisplayZone,
    user: &CurrentUser,
    url_date: NaiveDate,
    id: EntryId,
) -> AppResult<EntryView> {
    let entry = load_owned(conn, user, id)?;
    match check_date_segment(zone, &entry, url_date) {
        DateCheck::Canonical => Ok(EntryView::Show(entry)),
        DateCheck::Moved(actual) => {
            debug!(id = id, requested = %url_date, actual = %actual, "Redirecting stale entry URL");
            Ok(EntryView::Redirect(entry.url(zone)))
        }
    }
}

/// Resolve an entry for editing; the URL must already be canonical
pub fn resolve_for_edit(
    conn: &Connection,
    zone: &DisplayZone,
    user: &CurrentUser,
    url_date: NaiveDate,
    id: EntryId,
) -> AppResult<Entry> {
    let entry = load_owned(conn, user, id)?;
    match check_date_segment(zone, &entry, url_date) {
        DateCheck::Canonical => Ok(entry),
        DateCheck::Moved(_) => Err(AppError::NotFound(format!(
            "entry {id} is not dated {url_date}"
        ))),
    }
}

pub fn create_entry(
    conn: &Connection,
    zone: &DisplayZone,
    user: &CurrentUser,
    draft: &EntryDraft,
    now: DateTime<Utc>,
) -> AppResult<Entry> {
    let entry = db::insert_entry(conn, zone, user.id, draft, now)?;
    info!(id = entry.id, user = user.id, date = %entry.local_date(zone), "Entry created");
    Ok(entry)
}

pub fn update_entry(
    conn: &Connection,
    zone: &DisplayZone,
    user: &CurrentUser,
    url_date: NaiveDate,
    id: EntryId,
    draft: &EntryDraft,
    now: DateTime<Utc>,
) -> AppResult<Entry> {
    resolve_for_edit(conn, zone, user, url_date, id)?;
    let entry = db::update_entry(conn, id, draft, now)?
        .ok_or_else(|| AppError::NotFound(format!("entry {id}")))?;
    info!(id = id, user = user.id, "Entry updated");
    Ok(entry)
}

/// Delete an entry the user owns. Returns the deleted entry.
pub fn delete_entry(conn: &Connection, user: &CurrentUser, id: EntryId) -> AppResult<Entry> {
    let entry = load_owned(conn, user, id)?;
    db::delete_entry(conn, id)?;
    info!(id = id, user = user.id, "Entry deleted");
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tokyo() -> DisplayZone {
        DisplayZone::parse("Asia/Tokyo").unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(body: &str) -> EntryDraft {
        EntryDraft {
            title: None,
            body: body.to_string(),
        }
    }

    fn make_user(conn: &Connection, name: &str) -> CurrentUser {
        let user = db::insert_user(conn, name, "hash").unwrap().unwrap();
        CurrentUser {
            id: user.id,
            username: user.username,
        }
    }

    #[test]
    fn test_parse_date_segment() {
        assert_eq!(parse_date_segment("2025-12-31").unwrap(), date(2025, 12, 31));
        for bad in ["2025-13-01", "2025-02-30", "yesterday", "", "2025/12/31"] {
            assert!(matches!(parse_date_segment(bad), Err(AppError::InvalidDate(_))), "{bad}");
        }
    }

    #[test]
    fn test_parse_entry_id() {
        assert_eq!(parse_entry_id("5").unwrap(), 5);
        assert!(matches!(parse_entry_id("five"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_new_year_entry_buckets_under_local_date() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");

        let entry = create_entry(&conn, &zone, &alice, &draft("Happy new year"), utc(2025, 12, 31, 16, 0)).unwrap();

        let january = entries_for_month(&conn, &zone, &alice, 2026, 1).unwrap();
        assert_eq!(january.keys().copied().collect::<Vec<_>>(), vec![date(2026, 1, 1)]);
        assert_eq!(january[&date(2026, 1, 1)][0].id, entry.id);

        let december = entries_for_month(&conn, &zone, &alice, 2025, 12).unwrap();
        assert!(december.is_empty());
    }

    #[test]
    fn test_entries_near_local_midnight() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");

        // 23:30 and 00:30 local around the start of December 2nd
        let late = create_entry(&conn, &zone, &alice, &draft("late"), utc(2025, 12, 1, 14, 30)).unwrap();
        let early = create_entry(&conn, &zone, &alice, &draft("early"), utc(2025, 12, 1, 15, 30)).unwrap();

        let month = entries_for_month(&conn, &zone, &alice, 2025, 12).unwrap();
        assert_eq!(month[&date(2025, 12, 1)].iter().map(|e| e.id).collect::<Vec<_>>(), vec![late.id]);
        assert_eq!(month[&date(2025, 12, 2)].iter().map(|e| e.id).collect::<Vec<_>>(), vec![early.id]);

        for (key, bucket) in &month {
            for entry in bucket {
                assert_eq!(zone.to_display(entry.created_at).date_naive(), *key);
            }
        }
    }

    #[test]
    fn test_every_entry_in_exactly_one_bucket() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");

        let mut created = Vec::new();
        for hour in (0..24 * 5).step_by(7) {
            let instant = utc(2025, 11, 29, 0, 0) + chrono::Duration::hours(hour);
            created.push(create_entry(&conn, &zone, &alice, &draft("x"), instant).unwrap());
        }

        let month = entries_for_month(&conn, &zone, &alice, 2025, 12).unwrap();
        let in_december: Vec<&Entry> = created
            .iter()
            .filter(|e| e.local_date(&zone) >= date(2025, 12, 1))
            .collect();
        let bucketed: usize = month.values().map(Vec::len).sum();
        assert_eq!(bucketed, in_december.len());
        for entry in in_december {
            let hits = month
                .values()
                .flatten()
                .filter(|candidate| candidate.id == entry.id)
                .count();
            assert_eq!(hits, 1);
            assert!(month[&entry.local_date(&zone)].iter().any(|e| e.id == entry.id));
        }
    }

    #[test]
    fn test_month_excludes_other_users() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");
        let bob = make_user(&conn, "bob");

        create_entry(&conn, &zone, &bob, &draft("bob's"), utc(2025, 12, 10, 3, 0)).unwrap();
        assert!(entries_for_month(&conn, &zone, &alice, 2025, 12).unwrap().is_empty());
    }

    #[test]
    fn test_entries_for_day_oldest_first() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");

        let second = create_entry(&conn, &zone, &alice, &draft("2"), utc(2025, 12, 1, 10, 0)).unwrap();
        let first = create_entry(&conn, &zone, &alice, &draft("1"), utc(2025, 11, 30, 15, 0)).unwrap();
        create_entry(&conn, &zone, &alice, &draft("next day"), utc(2025, 12, 1, 15, 0)).unwrap();

        let day = entries_for_day(&conn, &zone, &alice, date(2025, 12, 1)).unwrap();
        assert_eq!(day.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    #[test]
    fn test_month_rejects_invalid_month() {
        let (_temp_dir, conn) = db::setup_test_db();
        let alice = make_user(&conn, "alice");
        assert!(matches!(
            entries_for_month(&conn, &tokyo(), &alice, 2025, 13),
            Err(AppError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_stale_view_redirects_stale_edit_is_not_found() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");

        // Local date 2025-12-31 in Tokyo
        let entry = create_entry(&conn, &zone, &alice, &draft("x"), utc(2025, 12, 31, 3, 0)).unwrap();

        let view = resolve_for_view(&conn, &zone, &alice, date(2025, 12, 30), entry.id).unwrap();
        assert_eq!(view, EntryView::Redirect(format!("/entries/2025-12-31/{}", entry.id)));

        let canonical = resolve_for_view(&conn, &zone, &alice, date(2025, 12, 31), entry.id).unwrap();
        assert!(matches!(canonical, EntryView::Show(ref e) if e.id == entry.id));

        assert!(matches!(
            resolve_for_edit(&conn, &zone, &alice, date(2025, 12, 30), entry.id),
            Err(AppError::NotFound(_))
        ));
        assert!(resolve_for_edit(&conn, &zone, &alice, date(2025, 12, 31), entry.id).is_ok());
    }

    #[test]
    fn test_update_at_stale_date_leaves_entry() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");
        let entry = create_entry(&conn, &zone, &alice, &draft("before"), utc(2025, 12, 31, 3, 0)).unwrap();

        let stale = update_entry(&conn, &zone, &alice, date(2025, 12, 30), entry.id, &draft("after"), Utc::now());
        assert!(matches!(stale, Err(AppError::NotFound(_))));
        assert_eq!(db::find_entry_by_id(&conn, entry.id).unwrap().unwrap().body, "before");

        let now = utc(2026, 1, 2, 0, 0);
        let updated = update_entry(&conn, &zone, &alice, date(2025, 12, 31), entry.id, &draft("after"), now).unwrap();
        assert_eq!(updated.body, "after");
        assert_eq!(updated.updated_at, now);
        assert_eq!(updated.created_at, entry.created_at);
    }

    #[test]
    fn test_other_users_entries_are_forbidden() {
        let (_temp_dir, conn) = db::setup_test_db();
        let zone = tokyo();
        let alice = make_user(&conn, "alice");
        let bob = make_user(&conn, "bob");
        let entry = create_entry(&conn, &zone, &alice, &draft("private"), utc(2025, 12, 31, 3, 0)).unwrap();

        assert!(matches!(delete_entry(&conn, &bob, entry.id), Err(AppError::Forbidden(_))));
        assert!(db::find_entry_by_id(&conn, entry.id).unwrap().is_some());

        assert!(matches!(
            resolve_for_view(&conn, &zone, &bob, date(2025, 12, 30), entry.id),
            Err(AppError::Forbidden(_))
        ));

        let deleted = delete_entry(&conn, &alice, entry.id).unwrap();
        assert_eq!(deleted.id, entry.id);
        assert!(db::find_entry_by_id(&conn, entry.id).unwrap().is_none());
    }

    #[test]
    fn test_unknown_entry_is_not_found() {
        let (_temp_dir, conn) = db::setup_test_db();
        let alice = make_user(&conn, "alice");
        assert!(matches!(
            resolve_for_view(&conn, &tokyo(), &alice, date(2025, 12, 31), 404),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(delete_entry(&conn, &alice, 404), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_bucket_by_local_date_keeps_order() {
        let zone = tokyo();
        let make = |id: EntryId, at: DateTime<Utc>| Entry {
            id,
            user_id: 1,
            title: None,
            body: String::new(),
            created_at: at,
            updated_at: at,
            entry_date: None,
        };
        let buckets = bucket_by_local_date(
            &zone,
            vec![
                make(1, utc(2025, 12, 1, 1, 0)),
                make(2, utc(2025, 12, 1, 2, 0)),
                make(3, utc(2025, 12, 1, 16, 0)),
            ],
        );
        assert_eq!(buckets[&date(2025, 12, 1)].iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(buckets[&date(2025, 12, 2)][0].id, 3);
    }
}
