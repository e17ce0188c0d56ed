pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod observability;
pub mod orders;
pub mod reliability;
pub mod store;
pub mod tasks;
