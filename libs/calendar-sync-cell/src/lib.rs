pub mod feed;
pub mod handlers;
pub mod ical;
pub mod models;
pub mod router;
pub mod scheduler;
pub mod services;

pub use feed::{CalendarFeedSource, HttpCalendarFeed};
pub use models::*;
pub use services::CalendarSyncService;
