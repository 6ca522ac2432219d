use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{HardcoverError, Result};
use crate::http::{ENDPOINT, GraphqlClient, TtlCache, pluck, value_as_i64};
use crate::identifiers::IdentifierSet;
use crate::types::{AuthorBook, AuthorInfo, ReadSession, ReadingStatus, UserBook};

pub(crate) const AUTHOR_CACHE_TTL: Duration = Duration::from_secs(167 * 60 * 60);

const USER_BOOK_FRAGMENT: &str = r#"
fragment userBookFragment on user_books {
    id
    status_id
    book_id
    book {
        slug
        title
    }
    edition {
        id
        pages
    }
    user_book_reads(order_by: {started_at: desc}, where: {finished_at: {_is_null: true}}) {
        id
        started_at
        finished_at
        edition_id
        progress_pages
    }
}"#;

const USER_BOOK_BY_EDITION: &str = r#"
query UserBookByEdition($query: Int!) {
    me {
        user_books(where: {edition_id: {_eq: $query}}) {
            ...userBookFragment
        }
    }
}"#;

const USER_BOOK_BY_ID: &str = r#"
query UserBookById($query: Int!) {
    me {
        user_books(where: {book: {id: {_eq: $query}}}) {
            ...userBookFragment
        }
    }
}"#;

const USER_BOOK_BY_SLUG: &str = r#"
query UserBookBySlug($slug: String!) {
    me {
        user_books(where: {book: {slug: {_eq: $slug}}}) {
            ...userBookFragment
        }
    }
}"#;

const ADD_BOOK: &str = r#"
mutation AddBook($object: UserBookCreateInput!) {
    insert_user_book(object: $object) {
        error
        user_book {
            ...userBookFragment
        }
    }
}"#;

const SET_BOOK_STATUS: &str = r#"
mutation SetBookStatus($id: Int!, $statusId: Int!) {
    update_user_book(id: $id, object: {status_id: $statusId}) {
        error
        user_book {
            ...userBookFragment
        }
    }
}"#;

const ADD_READ: &str = r#"
mutation AddRead($id: Int!, $pages: Int, $editionId: Int, $startedAt: date) {
    insert_user_book_read(user_book_id: $id, user_book_read: {
        progress_pages: $pages,
        edition_id: $editionId,
        started_at: $startedAt,
    }) {
        error
        user_book_read {
            id
            started_at
            finished_at
            edition_id
            progress_pages
        }
    }
}"#;

const UPDATE_READ: &str = r#"
mutation UpdateRead($readId: Int!, $pages: Int, $editionId: Int, $startedAt: date, $finishedAt: date) {
    update_user_book_read(id: $readId, object: {
        progress_pages: $pages,
        edition_id: $editionId,
        started_at: $startedAt,
        finished_at: $finishedAt
    }) {
        id
    }
}"#;

const BOOK_ID_FOR_SLUG: &str = r#"
query BookIdForSlug($slug: String!) {
    books(where: {slug: {_eq: $slug}}) {
        id
    }
}"#;

const BOOK_ID_FOR_SLUG_AND_ISBN: &str = r#"
query BookIdForSlug($slug: String!, $isbn: String!) {
    books(where: {slug: {_eq: $slug}}) {
        id
        editions(where: {isbn_13: {_eq: $isbn}}) {
            id
        }
    }
}"#;

const PRIVACY_SETTING: &str = r#"
query PrivacySetting {
    me {
        account_privacy_setting_id
    }
}"#;

/// Authenticated client for a single user's Hardcover account: user-book
/// lookups and mutations, reading-progress reconciliation, author lookups.
///
/// Remote mutations are issued strictly one at a time; there is no
/// transactional bracket around the lookup → create/transition → session
/// update sequence, so an interruption can leave the remote record in an
/// intermediate state.
pub struct HardcoverClient {
    gql: GraphqlClient,
    token: String,
    privacy: Mutex<Option<i64>>,
    pub(crate) authors: TtlCache<AuthorInfo>,
    pub(crate) author_books: TtlCache<Vec<AuthorBook>>,
}

impl HardcoverClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_endpoint(ENDPOINT, token)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            gql: GraphqlClient::new(endpoint),
            token: token.into(),
            privacy: Mutex::new(None),
            authors: TtlCache::new(AUTHOR_CACHE_TTL),
            author_books: TtlCache::new(AUTHOR_CACHE_TTL),
        }
    }

    pub(crate) async fn execute(&self, query: &str, variables: Value) -> Result<Value> {
        self.gql.execute(&self.token, query, variables).await
    }

    /// Reconcile the remote user-book with a local reading position.
    ///
    /// Unusable identifier sets (nothing Hardcover can resolve) make this a
    /// logged no-op; everything past resolution is a state-changing write
    /// path and errors out loud.
    pub async fn update_reading_progress(
        &self,
        identifiers: &IdentifierSet,
        progress_percent: u8,
    ) -> Result<()> {
        if identifiers.is_empty() {
            debug!("no hardcover identifiers present, skipping progress update");
            return Ok(());
        }

        let ids = match self.resolve_identifiers(identifiers).await {
            Ok(ids) => ids,
            Err(HardcoverError::MissingIdentifier(what)) => {
                warn!("cannot resolve identifiers for progress update, missing {what}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut book = match self.get_user_book(&ids).await? {
            Some(book) => book,
            None => match self.add_book(&ids, ReadingStatus::Reading).await? {
                Some(book) => {
                    info!("added book {} to Hardcover in 'Reading' status", book.book.title);
                    book
                }
                None => {
                    warn!("could not create a user book for {ids:?}, skipping progress update");
                    return Ok(());
                }
            },
        };

        if book.status() != Some(ReadingStatus::Reading) && progress_percent != 100 {
            if let Some(updated) = self.set_book_status(book.id, ReadingStatus::Reading).await? {
                info!("changed book status to 'Reading' for {}", updated.book.title);
                book = updated;
            }
        }

        if book.status() == Some(ReadingStatus::Read) && progress_percent == 100 {
            info!("book {} is already marked as 'Read', no update needed", book.book.title);
            return Ok(());
        }

        let Some(edition) = book.edition.clone() else {
            return Ok(());
        };
        if edition.pages <= 0 {
            return Ok(());
        }

        let pages_read = pages_read(edition.pages, progress_percent);
        match book.open_read().cloned() {
            None => {
                self.add_read(&book, pages_read).await?;
                info!(
                    "started a read session at {pages_read} pages for {}",
                    book.book.title
                );
            }
            Some(read) => {
                let finished = progress_percent == 100;
                if finished {
                    if let Some(updated) = self.set_book_status(book.id, ReadingStatus::Read).await? {
                        info!("changed book status to 'Read' for {}", updated.book.title);
                    }
                }
                let variables = read_update_variables(
                    &read,
                    edition.id,
                    pages_read,
                    finished,
                    Utc::now().date_naive(),
                );
                self.execute(UPDATE_READ, variables).await?;
                info!(
                    "updated reading progress to {progress_percent}% for {}",
                    book.book.title
                );
            }
        }

        Ok(())
    }

    /// Fetch the user-book for an identifier set: by edition id when known,
    /// else by book id, else by slug. One query per call.
    pub async fn get_user_book(&self, ids: &IdentifierSet) -> Result<Option<UserBook>> {
        let (query, variables) = if let Some(edition_id) = ids.edition_id {
            (USER_BOOK_BY_EDITION, json!({ "query": edition_id }))
        } else if let Some(book_id) = ids.book_id {
            (USER_BOOK_BY_ID, json!({ "query": book_id }))
        } else if let Some(slug) = &ids.slug {
            (USER_BOOK_BY_SLUG, json!({ "slug": slug }))
        } else {
            return Err(HardcoverError::MissingIdentifier(
                "hardcover-id or hardcover slug".to_string(),
            ));
        };

        let document = format!("{query}{USER_BOOK_FRAGMENT}");
        let data = self.execute(&document, variables).await?;
        Ok(first_user_book(&data))
    }

    /// Create a user-book for an already-resolved identifier set.
    pub async fn add_book(
        &self,
        ids: &IdentifierSet,
        status: ReadingStatus,
    ) -> Result<Option<UserBook>> {
        let book_id = ids
            .book_id
            .ok_or_else(|| HardcoverError::MissingIdentifier("hardcover-id".to_string()))?;
        let privacy = self.privacy_setting().await?;

        let document = format!("{ADD_BOOK}{USER_BOOK_FRAGMENT}");
        let variables = json!({
            "object": {
                "book_id": book_id,
                "edition_id": ids.edition_id,
                "status_id": status.id(),
                "privacy_setting_id": privacy,
            }
        });
        let data = self.execute(&document, variables).await?;
        Ok(data
            .get("insert_user_book")
            .and_then(|v| v.get("user_book"))
            .and_then(UserBook::from_json))
    }

    pub async fn set_book_status(
        &self,
        user_book_id: i64,
        status: ReadingStatus,
    ) -> Result<Option<UserBook>> {
        let document = format!("{SET_BOOK_STATUS}{USER_BOOK_FRAGMENT}");
        let variables = json!({ "id": user_book_id, "statusId": status.id() });
        let data = self.execute(&document, variables).await?;
        Ok(data
            .get("update_user_book")
            .and_then(|v| v.get("user_book"))
            .and_then(UserBook::from_json))
    }

    pub async fn add_read(&self, book: &UserBook, pages: i64) -> Result<Option<ReadSession>> {
        let variables = json!({
            "id": book.id,
            "editionId": book.edition.as_ref().and_then(|e| e.id),
            "pages": pages,
            "startedAt": format_date(Utc::now().date_naive()),
        });
        let data = self.execute(ADD_READ, variables).await?;
        Ok(data
            .get("insert_user_book_read")
            .and_then(|v| v.get("user_book_read"))
            .and_then(ReadSession::from_json))
    }

    /// Ensure the set carries a numeric book id, enriching a slug-only set
    /// with one remote lookup. Idempotent: a set that already has a book id
    /// is returned as-is without touching the network.
    pub async fn resolve_identifiers(&self, identifiers: &IdentifierSet) -> Result<IdentifierSet> {
        let mut ids = identifiers.clone();
        if ids.has_book_id() {
            debug!("identifiers already resolved: {ids:?}");
            return Ok(ids);
        }

        let Some(slug) = ids.slug.clone() else {
            return Err(HardcoverError::MissingIdentifier("hardcover slug".to_string()));
        };

        let (book_id, edition_id) = self.get_book_id(&slug, ids.isbn13()).await?;
        ids.book_id = Some(book_id);
        if edition_id.is_some() {
            ids.edition_id = edition_id;
        }
        debug!("resolved identifiers: {ids:?}");
        Ok(ids)
    }

    /// Look up the numeric book id for a slug, plus the edition matching a
    /// 13-digit ISBN when one is supplied.
    pub async fn get_book_id(
        &self,
        slug: &str,
        isbn13: Option<&str>,
    ) -> Result<(i64, Option<i64>)> {
        let (query, variables) = match isbn13 {
            Some(isbn) => (
                BOOK_ID_FOR_SLUG_AND_ISBN,
                json!({ "slug": slug, "isbn": isbn }),
            ),
            None => (BOOK_ID_FOR_SLUG, json!({ "slug": slug })),
        };

        let data = self.execute(query, variables).await?;
        let Some(book) = pluck(&data, &["books"])
            .and_then(Value::as_array)
            .and_then(|books| books.first())
        else {
            return Err(HardcoverError::BookNotFound(slug.to_string()));
        };

        let book_id = book
            .get("id")
            .and_then(value_as_i64)
            .ok_or_else(|| HardcoverError::BookNotFound(slug.to_string()))?;
        let edition_id = book
            .get("editions")
            .and_then(Value::as_array)
            .and_then(|editions| editions.first())
            .and_then(|e| e.get("id"))
            .and_then(value_as_i64);

        Ok((book_id, edition_id))
    }

    /// Account privacy setting used when inserting user-books; fetched once
    /// per client and held for its lifetime.
    async fn privacy_setting(&self) -> Result<i64> {
        let mut privacy = self.privacy.lock().await;
        if let Some(value) = *privacy {
            return Ok(value);
        }

        let data = self.execute(PRIVACY_SETTING, json!({})).await?;
        let value = pluck(&data, &["me"])
            .and_then(Value::as_array)
            .and_then(|me| me.first())
            .and_then(|me| me.get("account_privacy_setting_id"))
            .and_then(value_as_i64)
            .unwrap_or(1);

        *privacy = Some(value);
        Ok(value)
    }
}

fn first_user_book(data: &Value) -> Option<UserBook> {
    pluck(data, &["me"])
        .and_then(Value::as_array)
        .and_then(|me| me.first())
        .and_then(|me| me.get("user_books"))
        .and_then(Value::as_array)
        .and_then(|books| books.first())
        .and_then(UserBook::from_json)
}

fn pages_read(total_pages: i64, progress_percent: u8) -> i64 {
    (total_pages as f64 * f64::from(progress_percent) / 100.0).round() as i64
}

/// Variables for the session update: pages and edition move forward, the
/// original start date is preserved (today when the remote never recorded
/// one), and the finish date is only set once the book is complete.
fn read_update_variables(
    read: &ReadSession,
    edition_id: Option<i64>,
    pages: i64,
    finished: bool,
    today: NaiveDate,
) -> Value {
    json!({
        "readId": read.id,
        "pages": pages,
        "editionId": edition_id,
        "startedAt": format_date(read.started_at.unwrap_or(today)),
        "finishedAt": finished.then(|| format_date(today)),
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
