pub mod config;
pub mod error;
pub mod ipc;
pub mod mail;
pub mod news;
pub mod recommend;
pub mod scheduler;
pub mod storage;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use ipc::{DaemonClient, DaemonServer, DaemonState};
