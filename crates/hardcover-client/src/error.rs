use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardcoverError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error from {0}: {1}")]
    Api(String, String),

    #[error("GraphQL error: {0}")]
    Graphql(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no Hardcover token configured")]
    MissingToken,

    #[error("missing identifier: {0}")]
    MissingIdentifier(String),

    #[error("book with slug '{0}' not found")]
    BookNotFound(String),
}

pub type Result<T> = std::result::Result<T, HardcoverError>;
