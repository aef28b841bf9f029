pub mod models;
pub mod services;
pub mod handlers;
pub mod router;
