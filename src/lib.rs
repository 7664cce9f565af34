//! Build, run and classify solutions to competitive programming problems.
//!
//! An [`Executor`] is resolved from the [`ExecutorRegistry`] by language tag,
//! built once, run against any number of test inputs and cleaned up. Each run
//! is sampled for time and memory and classified into an [`ExecutionResult`],
//! which a [`Checker`] can compare with an expected answer.

pub mod checker;
pub mod config;
pub mod error;
pub mod resources;
pub mod runtime;
pub mod runtimes;
pub mod verdict;

pub use checker::{CheckVerdict, Checker};
pub use config::{ExecutorConfig, RunnerConfig};
pub use error::{ExecutorError, Result};
pub use runtime::{ExecutorFactory, ExecutorRegistry, LanguageExecutor, ProcessOutcome, RunTarget};
pub use runtimes::{init_registry, Executor};
pub use verdict::{classify, ExecutionResult, ExitType};
