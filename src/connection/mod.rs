//! Connection module - listener lifecycle

pub mod manager;

pub use manager::ConnectionManager;
