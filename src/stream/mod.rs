pub mod backend;
pub mod memory;
pub mod record;
pub mod subscription;
