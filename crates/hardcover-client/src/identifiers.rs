use std::collections::HashSet;

use tracing::debug;

pub const KIND_BOOK_ID: &str = "hardcover-id";
pub const KIND_EDITION: &str = "hardcover-edition";
pub const KIND_SLUG: &str = "hardcover";
pub const KIND_ISBN: &str = "isbn";

/// The cross-referenced identifiers a host record may carry for one title.
/// Only kinds prefixed `hardcover` or exactly `isbn` are recognized;
/// everything else is discarded on the way in. A numeric book id is required
/// before any mutation — `HardcoverClient::resolve_identifiers` enriches a
/// slug-only set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSet {
    pub book_id: Option<i64>,
    pub edition_id: Option<i64>,
    pub slug: Option<String>,
    pub isbn: Option<String>,
}

impl IdentifierSet {
    /// Build a set from `(kind, value)` pairs, e.g. a host identifier table
    /// or the `identifiers` map of a search result.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::default();
        for (kind, value) in pairs {
            set.insert(kind.as_ref(), value.as_ref());
        }
        set
    }

    pub fn insert(&mut self, kind: &str, value: &str) {
        match kind {
            KIND_BOOK_ID => match value.trim().parse() {
                Ok(id) => self.book_id = Some(id),
                Err(_) => debug!("discarding non-numeric {KIND_BOOK_ID} value: {value}"),
            },
            KIND_EDITION => match value.trim().parse() {
                Ok(id) => self.edition_id = Some(id),
                Err(_) => debug!("discarding non-numeric {KIND_EDITION} value: {value}"),
            },
            KIND_SLUG => self.slug = Some(value.to_string()),
            KIND_ISBN => self.isbn = Some(value.to_string()),
            _ => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.book_id.is_none()
            && self.edition_id.is_none()
            && self.slug.is_none()
            && self.isbn.is_none()
    }

    pub fn has_book_id(&self) -> bool {
        self.book_id.is_some()
    }

    /// Only a 13-digit ISBN can narrow the slug lookup to one edition.
    pub fn isbn13(&self) -> Option<&str> {
        self.isbn.as_deref().filter(|s| s.len() == 13)
    }
}

/// Collect the Hardcover slugs a library already holds, for excluding owned
/// titles from an author's bibliography.
pub fn owned_slugs<'a, I>(sets: I) -> HashSet<String>
where
    I: IntoIterator<Item = &'a IdentifierSet>,
{
    sets.into_iter()
        .filter_map(|set| set.slug.clone())
        .collect()
}
