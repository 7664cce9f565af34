use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::runtime::{LanguageExecutor, Lifecycle, RunTarget};

const DEFAULT_INTERPRETER: &str = "python3";

/// Python executor. The source itself is the run target; nothing is built
/// and nothing is cleaned up.
#[derive(Debug, Clone)]
pub struct PythonExecutor {
    src_file: PathBuf,
    lifecycle: Lifecycle,
    config: ExecutorConfig,
}

impl PythonExecutor {
    pub const TAG: &'static str = "py";

    pub fn new(src_file: impl Into<PathBuf>, config: ExecutorConfig) -> Self {
        Self {
            src_file: src_file.into(),
            lifecycle: Lifecycle::Fresh,
            config,
        }
    }

    fn target(&self) -> RunTarget {
        let interpreter = self
            .config
            .toolchain
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INTERPRETER));

        let mut args: Vec<OsString> = self.config.compiler_args.iter().map(OsString::from).collect();
        args.push(self.src_file.clone().into_os_string());
        RunTarget { program: interpreter, args }
    }
}

#[async_trait]
impl LanguageExecutor for PythonExecutor {
    fn language(&self) -> &'static str {
        Self::TAG
    }

    fn src_file(&self) -> &Path {
        &self.src_file
    }

    fn exec_file(&self) -> Option<&Path> {
        None
    }

    fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    async fn build(&mut self) -> Result<RunTarget> {
        if self.lifecycle != Lifecycle::Fresh {
            return Err(ExecutorError::AlreadyBuilt {
                src: self.src_file.clone(),
            });
        }

        info!("Using {:?} as its own run target", self.src_file);
        self.lifecycle = Lifecycle::Built;
        Ok(self.target())
    }

    fn run_target(&self) -> Result<RunTarget> {
        match self.lifecycle {
            Lifecycle::Built => Ok(self.target()),
            Lifecycle::Fresh => Err(ExecutorError::NotBuilt {
                src: self.src_file.clone(),
            }),
            Lifecycle::CleanedUp => Err(ExecutorError::CleanedUp {
                src: self.src_file.clone(),
            }),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Fresh {
            return Err(ExecutorError::NotBuilt {
                src: self.src_file.clone(),
            });
        }
        self.lifecycle = Lifecycle::CleanedUp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::ExitType;
    use std::time::Duration;
    use tempfile::TempDir;

    fn python_available() -> bool {
        std::process::Command::new(DEFAULT_INTERPRETER)
            .arg("--version")
            .output()
            .is_ok()
    }

    fn write_script(dir: &TempDir, code: &str) -> PathBuf {
        let path = dir.path().join("solution.py");
        std::fs::write(&path, code).unwrap();
        path
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig::default().with_sample_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_build_is_identity() {
        let mut executor = PythonExecutor::new("/tmp/solution.py", config().with_compiler_args(["-u"]));

        let target = executor.build().await.unwrap();
        assert_eq!(target.program, PathBuf::from("python3"));
        assert_eq!(
            target.args,
            vec![OsString::from("-u"), OsString::from("/tmp/solution.py")]
        );
        assert_eq!(executor.exec_file(), None);
        assert_eq!(executor.run_target().unwrap(), target);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse() {
        let mut executor = PythonExecutor::new("/tmp/solution.py", config());

        assert!(matches!(executor.run("").await, Err(ExecutorError::NotBuilt { .. })));
        assert!(matches!(executor.cleanup().await, Err(ExecutorError::NotBuilt { .. })));

        executor.build().await.unwrap();
        assert!(matches!(executor.build().await, Err(ExecutorError::AlreadyBuilt { .. })));

        executor.cleanup().await.unwrap();
        executor.cleanup().await.unwrap();
        assert!(matches!(executor.run("").await, Err(ExecutorError::CleanedUp { .. })));
    }

    #[tokio::test]
    async fn test_python_echo() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_script(&dir, "print(input())\n");

        let mut executor = PythonExecutor::new(&src, config());
        executor.build().await.unwrap();

        let result = executor.evaluate("5\n").await.unwrap();
        assert_eq!(result.exit_type, ExitType::Success);
        assert_eq!(result.output.as_deref(), Some("5\n"));

        executor.cleanup().await.unwrap();
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_python_runtime_error() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_script(&dir, "import sys\nprint('partial')\nsys.exit(3)\n");

        let mut executor = PythonExecutor::new(&src, config());
        executor.build().await.unwrap();

        let result = executor.evaluate("").await.unwrap();
        assert_eq!(result.exit_type, ExitType::RuntimeError);
        assert_eq!(result.exit_detail, "Exit code: 3");
        assert_eq!(result.output.as_deref(), Some("partial\n"));
    }

    #[tokio::test]
    async fn test_python_timeout() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_script(&dir, "while True:\n    pass\n");

        let mut executor = PythonExecutor::new(&src, config().with_timeout(Duration::from_millis(100)));
        executor.build().await.unwrap();

        let result = executor.evaluate("").await.unwrap();
        assert_eq!(result.exit_type, ExitType::Timeout);
        assert_eq!(result.output, None);
        assert!(result.exec_time_ms >= 100);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_internal_error() {
        let mut executor = PythonExecutor::new(
            "/tmp/solution.py",
            config().with_toolchain("/nonexistent/python3"),
        );
        executor.build().await.unwrap();

        let result = executor.evaluate("").await.unwrap();
        assert_eq!(result.exit_type, ExitType::InternalError);
        assert!(result.exit_detail.starts_with("spawn() call failed: NotFound"));
        assert_eq!(result.output, None);
        assert_eq!(result.error, None);
    }
}
