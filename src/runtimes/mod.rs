mod cpp;
mod python;

pub use cpp::CppExecutor;
pub use python::PythonExecutor;

use async_trait::async_trait;
use std::path::Path;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::runtime::{ExecutorRegistry, LanguageExecutor, RunTarget};

/// Every supported language. Adding a language means adding a variant here
/// and registering it in [`init_registry`].
#[derive(Debug, Clone)]
pub enum Executor {
    Cpp(CppExecutor),
    Python(PythonExecutor),
}

macro_rules! delegate {
    ($self:ident, $executor:ident => $body:expr) => {
        match $self {
            Executor::Cpp($executor) => $body,
            Executor::Python($executor) => $body,
        }
    };
}

#[async_trait]
impl LanguageExecutor for Executor {
    fn language(&self) -> &'static str {
        delegate!(self, e => e.language())
    }

    fn src_file(&self) -> &Path {
        delegate!(self, e => e.src_file())
    }

    fn exec_file(&self) -> Option<&Path> {
        delegate!(self, e => e.exec_file())
    }

    fn config(&self) -> &ExecutorConfig {
        delegate!(self, e => e.config())
    }

    async fn build(&mut self) -> Result<RunTarget> {
        delegate!(self, e => e.build().await)
    }

    fn run_target(&self) -> Result<RunTarget> {
        delegate!(self, e => e.run_target())
    }

    async fn cleanup(&mut self) -> Result<()> {
        delegate!(self, e => e.cleanup().await)
    }
}

/// Initialize the executor registry with every supported language
pub fn init_registry() -> Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();

    registry.register(CppExecutor::TAG, |src, config| {
        Executor::Cpp(CppExecutor::new(src, config))
    })?;
    registry.register(PythonExecutor::TAG, |src, config| {
        Executor::Python(PythonExecutor::new(src, config))
    })?;

    Ok(registry)
}
