pub mod categories;
pub mod corpus;
pub mod daemon;
pub mod jobs;
pub mod latest;
pub mod news;
pub mod search;
