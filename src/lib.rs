pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod notifications;
pub mod platform;
pub mod stream;
