//! Background services for routerkeep.
//!
//! - Scheduled command execution with recurrence
//! - Automatic device backups and tiered backup retention
//! - Periodic pool sweeps and graceful shutdown

pub mod backup;
pub mod daemon;
pub mod retention;
pub mod scheduler;
pub mod shutdown;
