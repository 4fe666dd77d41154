pub mod completion;
pub mod executors;
pub mod httpstat;
pub mod service;

#[cfg(test)]
mod executors_test;

pub use completion::{all_regions_started, region_window_closed, total_runs, CompletionTracker};
pub use executors::{CommandExecutor, ProbeExecutor, ProbeRegistry};
pub use httpstat::{HttpStatExecutor, HttpStatTimings};
pub use service::{AgentOutcome, AgentSettings, BenchmarkRecord, BenchmarkTag, MeasurementAgent};
