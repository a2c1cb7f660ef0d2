pub mod error;
pub mod job;
pub mod paths;
pub mod results;
pub mod source;

pub use error::{ConfigError, DomainError, EngineError};
pub use job::{FileJob, IdAllocator, Record, RecordId};
pub use paths::{InputMode, OutputMode, PathPlan};
pub use results::{
    ErrorKind, ErrorLogEntry, FileSummary, Outcome, OutcomeStatus, RunReport, RunSummary,
};
pub use source::{CgdSource, RecordSource};
