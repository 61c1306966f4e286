pub mod engine;
pub mod scheduler;

pub use engine::{CycleReport, DetectionEngine};
pub use scheduler::{CycleScheduler, SchedulerStats};
