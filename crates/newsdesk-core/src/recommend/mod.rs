mod client;
mod merge;

pub use client::{RecommendationClient, RecommendationSource, SearchClient};
pub use merge::{dedup_by_title, paginate_latest, RecommendationMerge};
