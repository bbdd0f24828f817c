pub mod config;
pub mod error;
pub mod notification;
pub mod types;

pub use config::Config;
pub use error::{Result, SyncError};
pub use notification::{decode_object_key, Notification, NotificationRecord};
pub use types::*;
