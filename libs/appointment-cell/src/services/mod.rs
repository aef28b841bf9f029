pub mod lifecycle;
pub mod booking;
pub mod reconciliation;
pub mod scheduler;
