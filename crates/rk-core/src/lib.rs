pub mod cache;
pub mod clock;
pub mod config;
pub mod interval;
pub mod memory;
pub mod store;
pub mod types;
