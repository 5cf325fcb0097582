pub mod booking;
pub mod conflict;
pub mod store;

pub use booking::AppointmentBookingService;
pub use conflict::ConflictDetectionService;
