pub mod classify;
pub mod dispatcher;
pub mod intent;
pub mod listeners;
pub mod permission;
pub mod router;
