pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::Orchestrator;
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
