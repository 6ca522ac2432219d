use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{pluck_str, value_as_i64};

// ─── Metadata records (search output) ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetaSourceInfo {
    pub id: String,
    pub description: String,
    pub link: String,
}

/// Normalized search result handed to the host's import pipeline. Everything
/// beyond id/title/authors/url/source is best-effort and defaults to empty.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetaRecord {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub url: String,
    pub source: MetaSourceInfo,
    pub series: String,
    pub series_index: f64,
    pub cover: String,
    pub description: String,
    pub publisher: String,
    pub published_date: String,
    pub rating: f64,
    pub languages: Vec<String>,
    pub tags: Vec<String>,
    pub format: String,
    pub identifiers: HashMap<String, String>,
}

// ─── User books & read sessions (sync state) ──────────────────────────────────

/// Hardcover's user-book status ids. The remote API documents no exhaustive
/// set; these three are the ones the sync flow drives. Unknown ids parse to
/// `None` and are treated as "not Reading".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingStatus {
    WantToRead = 1,
    Reading = 2,
    Read = 3,
}

impl ReadingStatus {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::WantToRead),
            2 => Some(Self::Reading),
            3 => Some(Self::Read),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookRef {
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Edition {
    pub id: Option<i64>,
    pub pages: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadSession {
    pub id: i64,
    pub started_at: Option<NaiveDate>,
    pub finished_at: Option<NaiveDate>,
    pub edition_id: Option<i64>,
    pub progress_pages: i64,
}

impl ReadSession {
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Self {
            id: v.get("id").and_then(value_as_i64)?,
            started_at: parse_date(v.get("started_at")),
            finished_at: parse_date(v.get("finished_at")),
            edition_id: v.get("edition_id").and_then(value_as_i64),
            progress_pages: v.get("progress_pages").and_then(value_as_i64).unwrap_or(0),
        })
    }
}

/// A user's relationship to one title, as returned by the user-book fragment:
/// status, the chosen edition, and any still-open read sessions (most recent
/// first).
#[derive(Debug, Clone, PartialEq)]
pub struct UserBook {
    pub id: i64,
    pub status_id: i64,
    pub book: BookRef,
    pub edition: Option<Edition>,
    pub reads: Vec<ReadSession>,
}

impl UserBook {
    pub fn from_json(v: &Value) -> Option<Self> {
        let id = v.get("id").and_then(value_as_i64)?;

        let edition = v
            .get("edition")
            .filter(|e| e.is_object())
            .map(|e| Edition {
                id: e.get("id").and_then(value_as_i64),
                pages: e.get("pages").and_then(value_as_i64).unwrap_or(0),
            });

        let reads = v
            .get("user_book_reads")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(ReadSession::from_json).collect())
            .unwrap_or_default();

        Some(Self {
            id,
            status_id: v.get("status_id").and_then(value_as_i64).unwrap_or(0),
            book: BookRef {
                slug: pluck_str(v, &["book", "slug"]),
                title: pluck_str(v, &["book", "title"]),
            },
            edition,
            reads,
        })
    }

    pub fn status(&self) -> Option<ReadingStatus> {
        ReadingStatus::from_id(self.status_id)
    }

    /// The read session progress updates are applied to, if one is open.
    pub fn open_read(&self) -> Option<&ReadSession> {
        self.reads.first()
    }
}

// ─── Authors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AuthorInfo {
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

impl AuthorInfo {
    pub fn from_json(v: &Value) -> Self {
        // cached_image arrives either as a bare url string or as {"url": ...}.
        let image = v.get("cached_image").and_then(|img| {
            img.as_str()
                .map(ToOwned::to_owned)
                .or_else(|| img.get("url").and_then(Value::as_str).map(ToOwned::to_owned))
        });

        Self {
            slug: pluck_str(v, &["slug"]),
            name: pluck_str(v, &["name"]),
            bio: v.get("bio").and_then(Value::as_str).map(ToOwned::to_owned),
            image,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AuthorBook {
    pub title: String,
    pub slug: String,
    pub cover: Option<String>,
}

impl AuthorBook {
    pub fn from_json(v: &Value) -> Option<Self> {
        let slug = pluck_str(v, &["slug"]);
        if slug.is_empty() {
            return None;
        }
        Some(Self {
            title: pluck_str(v, &["title"]),
            slug,
            cover: v
                .get("image")
                .and_then(|img| img.get("url"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        })
    }
}

fn parse_date(v: Option<&Value>) -> Option<NaiveDate> {
    v.and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}
