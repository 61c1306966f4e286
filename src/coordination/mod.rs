//! Coordination for long-running operation
//!
//! - Graceful shutdown: OS signals become a cancellation token observed by
//!   the scheduler and the running cycle

pub mod shutdown;

pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownSignal, ShutdownToken};
