use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tracing::warn;

use crate::config::TokenSources;
use crate::error::{HardcoverError, Result};
use crate::http::{ENDPOINT, GraphqlClient, pluck, pluck_str, value_as_i64};
use crate::identifiers::{KIND_BOOK_ID, KIND_EDITION, KIND_ISBN, KIND_SLUG};
use crate::types::{MetaRecord, MetaSourceInfo};

pub const PROVIDER_ID: &str = "hardcover";
pub const DESCRIPTION: &str = "Hardcover Books";
pub const META_URL: &str = "https://hardcover.app";

/// Queries with this prefix are numeric book-id lookups instead of title
/// searches.
const ID_QUERY_PREFIX: &str = "hardcover-id:";

const AUDIO_FORMAT_ID: i64 = 2;

/// reading_format_id → import format label. Unknown ids map to empty.
const FORMATS: [&str; 5] = ["", "Physical Book", "", "", "E-Book"];

const SEARCH_QUERY: &str = r#"
query Search($query: String!) {
    search(query: $query, query_type: "Book", per_page: 50) {
        results
    }
}"#;

const EDITION_QUERY: &str = r#"
query getEditions($query: Int!) {
    books(
        where: { id: { _eq: $query } }
        order_by: { users_read_count: desc_nulls_last }
    ) {
        title
        slug
        id
        book_series {
            series {
                name
            }
            position
        }
        rating
        editions(
            where: {
                _or: [{ reading_format_id: { _neq: 2 } }, { edition_format: { _is_null: true } }]
            }
            order_by: [{ reading_format_id: desc_nulls_last }, { users_count: desc_nulls_last }]
        ) {
            id
            isbn_13
            isbn_10
            title
            edition_format
            reading_format_id
            contributions {
                author {
                    name
                }
            }
            image {
                url
            }
            language {
                code3
            }
            publisher {
                name
            }
            release_date
        }
        description
        cached_tags(path: "Genre")
    }
}"#;

/// Maps a 3-letter ISO language code to a display name under a locale. The
/// host owns the actual translation tables; the default just echoes the code.
pub trait LanguageNames: Send + Sync {
    fn display_name(&self, code3: &str, locale: &str) -> Option<String>;
}

pub struct IsoCodeNames;

impl LanguageNames for IsoCodeNames {
    fn display_name(&self, code3: &str, _locale: &str) -> Option<String> {
        (!code3.is_empty()).then(|| code3.to_string())
    }
}

/// Metadata search provider against the Hardcover GraphQL API.
///
/// Read-only and deliberately infallible at the surface: every failure mode
/// degrades to an empty result list. A missing token flips the provider
/// inactive for its lifetime and all later calls are refused offline.
pub struct HardcoverProvider {
    gql: GraphqlClient,
    tokens: TokenSources,
    languages: Arc<dyn LanguageNames>,
    active: AtomicBool,
}

impl HardcoverProvider {
    pub fn new(tokens: TokenSources) -> Self {
        Self::with_endpoint(ENDPOINT, tokens)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, tokens: TokenSources) -> Self {
        Self {
            gql: GraphqlClient::new(endpoint),
            tokens,
            languages: Arc::new(IsoCodeNames),
            active: AtomicBool::new(true),
        }
    }

    pub fn with_language_names(mut self, languages: Arc<dyn LanguageNames>) -> Self {
        self.languages = languages;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Search by free text, or by book id with a `hardcover-id:` prefix.
    /// Returns an empty list on any failure; errors never reach the caller.
    pub async fn search(&self, query: &str, generic_cover: &str, locale: &str) -> Vec<MetaRecord> {
        if !self.is_active() {
            return Vec::new();
        }

        match self.try_search(query, generic_cover, locale).await {
            Ok(records) => records,
            Err(HardcoverError::MissingToken) => {
                warn!("no Hardcover token for user and no instance token set, disabling provider");
                self.active.store(false, Ordering::Relaxed);
                Vec::new()
            }
            Err(e) => {
                warn!("hardcover search for '{query}' failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query: &str,
        generic_cover: &str,
        locale: &str,
    ) -> Result<Vec<MetaRecord>> {
        let token = self.tokens.resolve().ok_or(HardcoverError::MissingToken)?;

        if let Some(raw_id) = query.strip_prefix(ID_QUERY_PREFIX) {
            let book_id: i64 = raw_id.trim().parse().map_err(|_| {
                HardcoverError::Parse(format!("invalid {ID_QUERY_PREFIX} query: {raw_id}"))
            })?;
            let data = self
                .gql
                .execute(&token, EDITION_QUERY, json!({ "query": book_id }))
                .await?;
            let Some(book) = pluck(&data, &["books"])
                .and_then(Value::as_array)
                .and_then(|books| books.first())
            else {
                return Ok(Vec::new());
            };
            Ok(self.map_editions(book, generic_cover, locale))
        } else {
            let data = self
                .gql
                .execute(&token, SEARCH_QUERY, json!({ "query": query }))
                .await?;
            Ok(map_hits(&data, generic_cover))
        }
    }

    fn map_editions(&self, book: &Value, generic_cover: &str, locale: &str) -> Vec<MetaRecord> {
        let book_id = book.get("id").and_then(value_as_i64);
        let id = book_id.map(|id| id.to_string()).unwrap_or_default();
        let slug = pluck_str(book, &["slug"]);
        let description = pluck_str(book, &["description"]);
        let tags = parse_tags(book);

        let first_series = book
            .get("book_series")
            .and_then(Value::as_array)
            .and_then(|series| series.first());
        let series = first_series
            .map(|s| pluck_str(s, &["series", "name"]))
            .unwrap_or_default();
        let series_index = first_series
            .and_then(|s| s.get("position"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let rating = book.get("rating").and_then(Value::as_f64).unwrap_or(0.0);

        book.get("editions")
            .and_then(Value::as_array)
            .map(|editions| {
                editions
                    .iter()
                    .filter(|edition| keep_edition(edition))
                    .map(|edition| {
                        let edition_id = edition.get("id").and_then(value_as_i64);
                        let mut identifiers = HashMap::from([
                            (KIND_BOOK_ID.to_string(), id.clone()),
                            (KIND_SLUG.to_string(), slug.clone()),
                        ]);
                        if let Some(edition_id) = edition_id {
                            identifiers
                                .insert(KIND_EDITION.to_string(), edition_id.to_string());
                        }
                        if let Some(isbn) = best_isbn(edition) {
                            identifiers.insert(KIND_ISBN.to_string(), isbn);
                        }

                        let languages = pluck(edition, &["language", "code3"])
                            .and_then(Value::as_str)
                            .and_then(|code3| self.languages.display_name(code3, locale))
                            .into_iter()
                            .collect();

                        MetaRecord {
                            id: id.clone(),
                            title: pluck_str(edition, &["title"]),
                            authors: edition_authors(edition),
                            url: edition_id
                                .map(|eid| format!("{META_URL}/books/{slug}/editions/{eid}"))
                                .unwrap_or_default(),
                            source: source_info(),
                            series: series.clone(),
                            series_index,
                            cover: cover_or(edition, generic_cover),
                            description: description.clone(),
                            publisher: pluck_str(edition, &["publisher", "name"]),
                            published_date: pluck_str(edition, &["release_date"]),
                            rating,
                            languages,
                            tags: tags.clone(),
                            format: format_label(
                                edition.get("reading_format_id").and_then(Value::as_i64),
                            ),
                            identifiers,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn source_info() -> MetaSourceInfo {
    MetaSourceInfo {
        id: PROVIDER_ID.to_string(),
        description: DESCRIPTION.to_string(),
        link: META_URL.to_string(),
    }
}

/// The search endpoint has been observed returning `results` (or its `hits`)
/// as a quoted JSON string instead of a structured value; parse either shape
/// and treat anything unparseable as an empty batch.
fn extract_hits(data: &Value) -> Vec<Value> {
    let results = match pluck(data, &["search", "results"]) {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("unparseable search results payload: {e}");
                return Vec::new();
            }
        },
        Some(value) => value.clone(),
        None => return Vec::new(),
    };

    match results.get("hits") {
        Some(Value::Array(hits)) => hits.clone(),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_else(|| {
                warn!("unparseable search hits payload");
                Vec::new()
            }),
        _ => Vec::new(),
    }
}

fn map_hits(data: &Value, generic_cover: &str) -> Vec<MetaRecord> {
    extract_hits(data)
        .iter()
        .filter_map(|hit| {
            let record = map_title_hit(hit, generic_cover);
            if record.is_none() {
                warn!("skipping malformed search hit: {hit}");
            }
            record
        })
        .collect()
}

/// One hit of a title search. `None` (skipped, batch survives) when the hit
/// carries no usable document.
fn map_title_hit(hit: &Value, generic_cover: &str) -> Option<MetaRecord> {
    let document = hit
        .get("document")
        .filter(|d| d.as_object().is_some_and(|o| !o.is_empty()))?;

    let id = document.get("id").map(id_text).unwrap_or_default();
    let slug = pluck_str(document, &["slug"]);

    let mut identifiers = HashMap::from([(KIND_BOOK_ID.to_string(), id.clone())]);
    identifiers.insert(KIND_SLUG.to_string(), slug.clone());

    Some(MetaRecord {
        id,
        title: pluck_str(document, &["title"]),
        authors: string_list(document.get("author_names")),
        url: (!slug.is_empty())
            .then(|| format!("{META_URL}/books/{slug}"))
            .unwrap_or_default(),
        source: source_info(),
        series: pluck_str(document, &["featured_series", "series_name"]),
        series_index: pluck(document, &["featured_series", "position"])
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        cover: pluck(document, &["image", "url"])
            .and_then(Value::as_str)
            .unwrap_or(generic_cover)
            .to_string(),
        description: pluck_str(document, &["description"]),
        published_date: pluck_str(document, &["release_date"]),
        tags: string_list(document.get("genres")),
        identifiers,
        ..MetaRecord::default()
    })
}

/// An edition stays in the result set unless it is classified and the
/// classification says audio.
fn keep_edition(edition: &Value) -> bool {
    let classified = edition
        .get("edition_format")
        .is_some_and(|format| !format.is_null());
    let is_audio =
        edition.get("reading_format_id").and_then(Value::as_i64) == Some(AUDIO_FORMAT_ID);
    !(classified && is_audio)
}

fn format_label(reading_format_id: Option<i64>) -> String {
    reading_format_id
        .and_then(|id| usize::try_from(id).ok())
        .and_then(|id| FORMATS.get(id))
        .copied()
        .unwrap_or_default()
        .to_string()
}

fn best_isbn(edition: &Value) -> Option<String> {
    ["isbn_13", "isbn_10"]
        .iter()
        .find_map(|key| edition.get(*key).and_then(Value::as_str))
        .filter(|isbn| !isbn.is_empty())
        .map(ToOwned::to_owned)
}

fn edition_authors(edition: &Value) -> Vec<String> {
    edition
        .get("contributions")
        .and_then(Value::as_array)
        .map(|contributions| {
            contributions
                .iter()
                .filter_map(|c| pluck(c, &["author", "name"]))
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn cover_or(edition: &Value, generic_cover: &str) -> String {
    pluck(edition, &["image", "url"])
        .and_then(Value::as_str)
        .unwrap_or(generic_cover)
        .to_string()
}

/// cached_tags arrives either as plain strings or as `{"tag": ...}` objects.
fn parse_tags(book: &Value) -> Vec<String> {
    book.get("cached_tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|item| {
                    item.as_str()
                        .or_else(|| item.get("tag").and_then(Value::as_str))
                })
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    use super::*;

    fn provider_for(server: &ServerGuard) -> HardcoverProvider {
        let tokens = TokenSources {
            user_token: Some("test-token".to_string()),
            config_token: None,
            env_token: None,
        };
        HardcoverProvider::with_endpoint(server.url(), tokens)
    }

    fn sample_hits() -> Value {
        json!([
            {
                "document": {
                    "id": "440",
                    "title": "The Hobbit",
                    "author_names": ["J.R.R. Tolkien"],
                    "slug": "the-hobbit",
                    "featured_series": {"series_name": "Middle-earth", "position": 1.0},
                    "image": {"url": "https://img.example/hobbit.jpg"},
                    "description": "A hole in the ground.",
                    "release_date": "1937-09-21",
                    "genres": ["Fantasy", "Classics"]
                }
            },
            {"document": "not an object"},
            {
                "document": {
                    "id": 441,
                    "title": "The Fellowship of the Ring",
                    "author_names": ["J.R.R. Tolkien"],
                    "slug": "the-fellowship-of-the-ring"
                }
            }
        ])
    }

    #[tokio::test]
    async fn title_search_maps_hits_and_skips_malformed_ones() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("Search".to_string()))
            .with_status(200)
            .with_body(
                json!({"data": {"search": {"results": {"hits": sample_hits()}}}}).to_string(),
            )
            .create_async()
            .await;

        let provider = provider_for(&server);
        let records = provider.search("the hobbit", "generic.jpg", "en").await;

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.id, "440");
        assert_eq!(first.title, "The Hobbit");
        assert_eq!(first.authors, vec!["J.R.R. Tolkien"]);
        assert_eq!(first.url, "https://hardcover.app/books/the-hobbit");
        assert_eq!(first.series, "Middle-earth");
        assert_eq!(first.series_index, 1.0);
        assert_eq!(first.cover, "https://img.example/hobbit.jpg");
        assert_eq!(first.tags, vec!["Fantasy", "Classics"]);
        assert_eq!(first.identifiers["hardcover-id"], "440");
        assert_eq!(first.identifiers["hardcover"], "the-hobbit");
        assert_eq!(first.source.id, PROVIDER_ID);

        // Numeric document ids normalize to text, missing cover falls back.
        assert_eq!(records[1].id, "441");
        assert_eq!(records[1].cover, "generic.jpg");
    }

    #[tokio::test]
    async fn stringified_results_payload_is_parsed() {
        let mut server = Server::new_async().await;
        let results = json!({"hits": sample_hits()}).to_string();
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({"data": {"search": {"results": results}}}).to_string())
            .create_async()
            .await;

        let provider = provider_for(&server);
        let records = provider.search("the hobbit", "", "en").await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn unparseable_results_string_yields_empty() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({"data": {"search": {"results": "{not json"}}}).to_string())
            .create_async()
            .await;

        let provider = provider_for(&server);
        assert!(provider.search("anything", "", "en").await.is_empty());
        assert!(provider.is_active());
    }

    #[tokio::test]
    async fn edition_search_expands_editions_and_filters_audio() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("getEditions".to_string()),
                Matcher::Regex(r#""query":440"#.to_string()),
            ]))
            .with_status(200)
            .with_body(
                json!({"data": {"books": [{
                    "id": 440,
                    "title": "The Hobbit",
                    "slug": "the-hobbit",
                    "rating": 4.3,
                    "book_series": [{"series": {"name": "Middle-earth"}, "position": 1.0}],
                    "description": "A hole in the ground.",
                    "cached_tags": [{"tag": "Fantasy"}],
                    "editions": [
                        {
                            "id": 9001,
                            "title": "The Hobbit",
                            "isbn_13": "9780261103283",
                            "isbn_10": "0261103288",
                            "edition_format": "Hardcover",
                            "reading_format_id": 1,
                            "contributions": [{"author": {"name": "J.R.R. Tolkien"}}],
                            "image": {"url": "https://img.example/hobbit-hc.jpg"},
                            "language": {"code3": "eng"},
                            "publisher": {"name": "HarperCollins"},
                            "release_date": "1997-06-01"
                        },
                        {
                            "id": 9002,
                            "title": "The Hobbit (audio)",
                            "edition_format": "Audible Audio",
                            "reading_format_id": 2
                        },
                        {
                            "id": 9003,
                            "title": "The Hobbit (format unknown)",
                            "edition_format": null,
                            "reading_format_id": 2,
                            "isbn_10": "0261103288"
                        },
                        {
                            "id": 9004,
                            "title": "The Hobbit (ebook)",
                            "edition_format": "Kindle",
                            "reading_format_id": 4
                        }
                    ]
                }]}})
                .to_string(),
            )
            .create_async()
            .await;

        let provider = provider_for(&server);
        let records = provider
            .search("hardcover-id:440", "generic.jpg", "en")
            .await;

        assert_eq!(records.len(), 3);

        let hardcover = &records[0];
        assert_eq!(hardcover.id, "440");
        assert_eq!(hardcover.title, "The Hobbit");
        assert_eq!(hardcover.format, "Physical Book");
        assert_eq!(hardcover.authors, vec!["J.R.R. Tolkien"]);
        assert_eq!(hardcover.publisher, "HarperCollins");
        assert_eq!(hardcover.series, "Middle-earth");
        assert_eq!(hardcover.rating, 4.3);
        assert_eq!(hardcover.tags, vec!["Fantasy"]);
        assert_eq!(hardcover.languages, vec!["eng"]);
        assert_eq!(
            hardcover.url,
            "https://hardcover.app/books/the-hobbit/editions/9001"
        );
        assert_eq!(hardcover.identifiers["hardcover-edition"], "9001");
        assert_eq!(hardcover.identifiers["isbn"], "9780261103283");

        // The unclassified reading_format_id=2 edition survives the filter
        // and falls back to the 10-digit ISBN; the classified audio one is
        // gone.
        let unknown = &records[1];
        assert_eq!(unknown.identifiers["hardcover-edition"], "9003");
        assert_eq!(unknown.format, "");
        assert_eq!(unknown.identifiers["isbn"], "0261103288");
        assert_eq!(unknown.cover, "generic.jpg");

        assert_eq!(records[2].format, "E-Book");
    }

    #[tokio::test]
    async fn missing_token_disables_provider_permanently() {
        let mut server = Server::new_async().await;
        let m = server.mock("POST", "/").expect(0).create_async().await;

        let provider = HardcoverProvider::with_endpoint(server.url(), TokenSources::default());
        assert!(provider.search("the hobbit", "", "en").await.is_empty());
        assert!(!provider.is_active());

        // Still refused, still offline.
        assert!(provider.search("the hobbit", "", "en").await.is_empty());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn graphql_errors_yield_empty_results() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"errors": [{"message": "rate limited"}]}"#)
            .create_async()
            .await;

        let provider = provider_for(&server);
        assert!(provider.search("the hobbit", "", "en").await.is_empty());
        // Transient failures do not flip the provider off.
        assert!(provider.is_active());
    }

    #[tokio::test]
    async fn transport_errors_yield_empty_results() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let provider = provider_for(&server);
        assert!(provider.search("the hobbit", "", "en").await.is_empty());
    }

    #[tokio::test]
    async fn locale_resolver_is_consulted_for_languages() {
        struct EnglishNames;
        impl LanguageNames for EnglishNames {
            fn display_name(&self, code3: &str, locale: &str) -> Option<String> {
                (code3 == "eng" && locale == "en").then(|| "English".to_string())
            }
        }

        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                json!({"data": {"books": [{
                    "id": 440,
                    "slug": "the-hobbit",
                    "editions": [{"id": 9001, "title": "The Hobbit", "language": {"code3": "eng"}}]
                }]}})
                .to_string(),
            )
            .create_async()
            .await;

        let provider = provider_for(&server).with_language_names(Arc::new(EnglishNames));
        let records = provider.search("hardcover-id:440", "", "en").await;

        assert_eq!(records[0].languages, vec!["English"]);
    }

    #[test]
    fn format_table_maps_known_ids_only() {
        assert_eq!(format_label(Some(1)), "Physical Book");
        assert_eq!(format_label(Some(4)), "E-Book");
        assert_eq!(format_label(Some(0)), "");
        assert_eq!(format_label(Some(2)), "");
        assert_eq!(format_label(Some(99)), "");
        assert_eq!(format_label(Some(-1)), "");
        assert_eq!(format_label(None), "");
    }

    #[test]
    fn audio_filter_requires_a_classification() {
        let classified_audio = json!({"edition_format": "Audible Audio", "reading_format_id": 2});
        let unclassified_audio = json!({"edition_format": null, "reading_format_id": 2});
        let physical = json!({"edition_format": "Hardcover", "reading_format_id": 1});
        let bare = json!({});

        assert!(!keep_edition(&classified_audio));
        assert!(keep_edition(&unclassified_audio));
        assert!(keep_edition(&physical));
        assert!(keep_edition(&bare));
    }

    #[test]
    fn best_isbn_prefers_thirteen_digits() {
        let both = json!({"isbn_13": "9780261103283", "isbn_10": "0261103288"});
        assert_eq!(best_isbn(&both).as_deref(), Some("9780261103283"));

        let null_13 = json!({"isbn_13": null, "isbn_10": "0261103288"});
        assert_eq!(best_isbn(&null_13).as_deref(), Some("0261103288"));

        assert_eq!(best_isbn(&json!({})), None);
    }
}
