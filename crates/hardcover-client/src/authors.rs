use std::collections::HashSet;

use serde_json::{Value, json};

use crate::client::HardcoverClient;
use crate::error::Result;
use crate::http::pluck;
use crate::types::{AuthorBook, AuthorInfo};

const AUTHOR_INFO: &str = r#"
query GetAuthorInfo($author: String!) {
    authors(where: {slug: {_eq: $author}}) {
        bio
        name
        cached_image
        slug
    }
}"#;

const OTHER_AUTHOR_BOOKS: &str = r#"
query OtherBooksFromAuthor($author: String!) {
    authors(where: {slug: {_eq: $author}}) {
        contributions(where: {contributable_type: {_eq: "Book"}}, order_by: {book: {title: asc}}) {
            book {
                title
                slug
                image {
                    url
                }
            }
        }
    }
}"#;

impl HardcoverClient {
    /// Author bio/name/image by slug, cached for 167 hours per client.
    pub async fn get_author_info(&self, author_slug: &str) -> Result<Option<AuthorInfo>> {
        if let Some(cached) = self.authors.get(author_slug).await {
            return Ok(Some(cached));
        }

        let data = self
            .execute(AUTHOR_INFO, json!({ "author": author_slug }))
            .await?;
        let info = pluck(&data, &["authors"])
            .and_then(Value::as_array)
            .and_then(|authors| authors.first())
            .map(AuthorInfo::from_json);

        if let Some(info) = &info {
            self.authors.set(author_slug, info.clone()).await;
        }
        Ok(info)
    }

    /// The author's other books, title-ascending, minus anything in
    /// `owned_slugs`. The filtered list is cached keyed by author alone, so a
    /// library change is not reflected until the entry expires.
    pub async fn get_other_author_books(
        &self,
        author_slug: &str,
        owned_slugs: &HashSet<String>,
    ) -> Result<Vec<AuthorBook>> {
        if let Some(cached) = self.author_books.get(author_slug).await {
            return Ok(cached);
        }

        let data = self
            .execute(OTHER_AUTHOR_BOOKS, json!({ "author": author_slug }))
            .await?;
        let Some(author) = pluck(&data, &["authors"])
            .and_then(Value::as_array)
            .and_then(|authors| authors.first())
        else {
            return Ok(Vec::new());
        };

        let books: Vec<AuthorBook> = author
            .get("contributions")
            .and_then(Value::as_array)
            .map(|contributions| {
                contributions
                    .iter()
                    .filter_map(|c| c.get("book"))
                    .filter_map(AuthorBook::from_json)
                    .filter(|book| !owned_slugs.contains(&book.slug))
                    .collect()
            })
            .unwrap_or_default();

        self.author_books.set(author_slug, books.clone()).await;
        Ok(books)
    }
}
