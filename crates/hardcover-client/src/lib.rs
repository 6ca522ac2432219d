//! Hardcover.app GraphQL client — metadata search/import and reading-progress sync.

pub mod authors;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod identifiers;
pub mod search;
pub mod types;

pub use client::HardcoverClient;
pub use config::{HardcoverConfig, TokenSources};
pub use error::{HardcoverError, Result};
pub use identifiers::IdentifierSet;
pub use search::{HardcoverProvider, LanguageNames};
pub use types::{MetaRecord, MetaSourceInfo, ReadingStatus, UserBook};
