//! Telewatch daemon library - exposes modules for testing.

pub mod analyzer;
pub mod backend;
pub mod monitor_loop;
pub mod notifier;
pub mod progress_tracker;
pub mod sources;

pub use analyzer::EventAnalyzer;
pub use backend::{create_backend, AnalysisBackend, BackendError};
pub use monitor_loop::{MonitorLoop, TickSummary};
pub use notifier::{LogNotifier, Notifier};
pub use progress_tracker::ProgressTracker;
pub use sources::{EventSource, LineProducer, QueueSource};
