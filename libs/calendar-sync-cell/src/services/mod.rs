pub mod reconcile;
pub mod settings;
pub mod sync;

pub use sync::CalendarSyncService;
