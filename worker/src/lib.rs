pub mod processor;
pub mod runner;
pub mod scheduler;
pub mod sink;

pub use processor::{CommandProcessor, Processor};
pub use runner::{run_batch, run_with_plan, RunConfig, DEFAULT_THREADS, DEFAULT_TIMEOUT_MS};
pub use scheduler::Scheduler;
pub use sink::SinkHandle;
