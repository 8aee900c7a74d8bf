pub mod config;
pub mod mask;
pub mod metric;
pub mod moments;
pub mod optimizer;
mod pipeline;
mod types;

pub use pipeline::{register_all, BatchResult, MultiViewRegistration};
pub use types::{
    IterationReport, JobInfo, JobState, RegistrationObserver, RegistrationOutcome,
    RegistrationSummary, StopCondition,
};
