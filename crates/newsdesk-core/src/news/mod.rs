mod cache;
pub(crate) mod client;
pub mod corpus;
mod models;

pub use cache::{CategoryCache, CategoryKey, EntryState};
pub use client::{
    date_range, parse_news_response, NewsCatcherClient, NewsSource, SearchQuery, DEFAULT_COUNTRY,
    DEFAULT_LANGUAGE,
};
pub use corpus::NewsCorpus;
pub use models::{
    Article, NewsApiResponse, CATEGORIES, UNKNOWN_ACCOUNT, UNKNOWN_AUTHOR, UNKNOWN_AUTHORS,
};
