mod category_repo;
mod database;
mod models;
mod notification_repo;
mod user_repo;

pub use category_repo::CategoryRepository;
pub use database::Database;
pub use models::{
    DeletionOutcome, DeletionRequest, Notification, User, NO_ARTICLE_ID, NO_EXCERPT, NO_TITLE,
    NO_TOPIC, NO_URL,
};
pub use notification_repo::{NotificationRepository, NotificationStore};
pub use user_repo::{UserDirectory, UserRepository};
