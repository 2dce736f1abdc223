//! User notifications: derived from domain events, persisted, and pushed.

pub mod feed;
pub mod notification;
pub mod pipeline;
pub mod repository;

pub use feed::HubFeed;
pub use notification::{Notification, NotificationKind};
pub use pipeline::NotificationPipeline;
pub use repository::{
    InMemoryNotificationRepository, NotificationError, NotificationRepository,
    PostgresNotificationRepository,
};
