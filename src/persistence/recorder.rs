use crate::domain::{CycleLog, LogLevel};
use chrono::Utc;
use tracing::{error, info, warn};

/// Mirrors engine decisions to `tracing` and keeps them for persistence.
///
/// Entries are flushed to the store once, at the end of the cycle.
#[derive(Debug)]
pub struct CycleRecorder {
    cycle_id: i64,
    entries: Vec<CycleLog>,
}

impl CycleRecorder {
    pub fn new(cycle_id: i64) -> Self {
        Self {
            cycle_id,
            entries: Vec::new(),
        }
    }

    pub fn cycle_id(&self) -> i64 {
        self.cycle_id
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(cycle_id = self.cycle_id, "{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(cycle_id = self.cycle_id, "{}", message);
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(cycle_id = self.cycle_id, "{}", message);
        self.push(LogLevel::Error, message);
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.entries.push(CycleLog {
            cycle_id: self.cycle_id,
            level,
            message,
            created_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[CycleLog] {
        &self.entries
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// Drain the buffered entries for persistence
    pub fn take(&mut self) -> Vec<CycleLog> {
        std::mem::take(&mut self.entries)
    }
}
