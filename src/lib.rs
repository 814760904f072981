//! Transmutation lifecycle engine.
//!
//! Prices requests, admits at most one active transmutation per alchemist,
//! completes approved work after its estimated duration and runs a daily
//! sweep for low-stock materials and stale missions.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod repository;
pub mod scheduler;
pub mod simulation;
pub mod state_machine;
pub mod sweep;

pub use config::TransmuteConfig;
pub use error::{ErrorKind, TransmuteError};
pub use notify::{Notification, NotificationHub, Notifier, Topic};
pub use orchestrator::TransmutationService;
pub use repository::{MemoryStore, Repositories};
pub use scheduler::{SchedulerError, TaskScheduler};
pub use simulation::{Breakdown, MaterialLine, SimulationRequest};
pub use state_machine::{AuditRecord, Transmutation, TransmutationStatus};
pub use sweep::{DailySweep, SweepHandle, SweepSettings};
