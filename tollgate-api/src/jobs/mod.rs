//! Background Jobs for the Tollgate gateway
//!
//! - `maintenance`: deactivates expired API keys and drops revocations whose
//!   tokens have expired anyway
//!
//! # Usage
//!
//! ```ignore
//! use tollgate_api::jobs::{maintenance_task, MaintenanceConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(maintenance_task(
//!     Arc::clone(&state.credentials),
//!     Arc::clone(&state.revocations),
//!     MaintenanceConfig::from_env(),
//!     shutdown_rx,
//! ));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod maintenance;

pub use maintenance::{
    maintenance_task, run_maintenance_cycle, MaintenanceConfig, MaintenanceMetrics,
    MaintenanceSnapshot,
};
