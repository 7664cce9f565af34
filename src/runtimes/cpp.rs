use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::runtime::{LanguageExecutor, Lifecycle, RunTarget};

const DEFAULT_COMPILER: &str = "g++";
const ARTIFACT_EXTENSION: &str = "out";

/// C++ executor. Compiles the source into an executable next to it and
/// removes that executable on cleanup.
#[derive(Debug, Clone)]
pub struct CppExecutor {
    src_file: PathBuf,
    exec_file: Option<PathBuf>,
    lifecycle: Lifecycle,
    config: ExecutorConfig,
}

impl CppExecutor {
    pub const TAG: &'static str = "cpp";

    pub fn new(src_file: impl Into<PathBuf>, config: ExecutorConfig) -> Self {
        Self {
            src_file: src_file.into(),
            exec_file: None,
            lifecycle: Lifecycle::Fresh,
            config,
        }
    }

    fn compiler(&self) -> PathBuf {
        self.config
            .toolchain
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPILER))
    }

    fn artifact_path(&self) -> PathBuf {
        self.src_file.with_extension(ARTIFACT_EXTENSION)
    }

    fn not_built(&self) -> ExecutorError {
        ExecutorError::NotBuilt {
            src: self.src_file.clone(),
        }
    }
}

#[async_trait]
impl LanguageExecutor for CppExecutor {
    fn language(&self) -> &'static str {
        Self::TAG
    }

    fn src_file(&self) -> &Path {
        &self.src_file
    }

    fn exec_file(&self) -> Option<&Path> {
        self.exec_file.as_deref()
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

        let compiler = self.compiler();
        let exec_file = self.artifact_path();
        info!("Compiling {:?} into {:?} with {:?}", self.src_file, exec_file, compiler);

        let output = Command::new(&compiler)
            .arg("-o")
            .arg(&exec_file)
            .arg(&self.src_file)
            .args(&self.config.compiler_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExecutorError::Build {
                toolchain: compiler.clone(),
                source,
            })?;

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ExecutorError::Compilation {
                src: self.src_file.clone(),
                status: output.status,
                diagnostics,
            });
        }
        if !diagnostics.is_empty() {
            debug!("Compiler diagnostics for {:?}:\n{}", self.src_file, diagnostics);
        }

        // A compiler wrapper can exit cleanly without writing anything
        if fs::metadata(&exec_file).await.is_err() {
            return Err(ExecutorError::Compilation {
                src: self.src_file.clone(),
                status: output.status,
                diagnostics: format!("no executable was produced at {:?}", exec_file),
            });
        }

        self.exec_file = Some(exec_file.clone());
        self.lifecycle = Lifecycle::Built;
        Ok(RunTarget::executable(exec_file))
    }

    fn run_target(&self) -> Result<RunTarget> {
        match (self.lifecycle, &self.exec_file) {
            (Lifecycle::Built, Some(exec_file)) => Ok(RunTarget::executable(exec_file.clone())),
            (Lifecycle::CleanedUp, _) => Err(ExecutorError::CleanedUp {
                src: self.src_file.clone(),
            }),
            _ => Err(self.not_built()),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        let exec_file = match (self.lifecycle, &self.exec_file) {
            (Lifecycle::Fresh, _) | (_, None) => return Err(self.not_built()),
            (_, Some(exec_file)) => exec_file.clone(),
        };

        self.lifecycle = Lifecycle::CleanedUp;
        info!("Removing build artifact {:?}", exec_file);
        fs::remove_file(&exec_file)
            .await
            .map_err(|source| ExecutorError::Cleanup {
                path: exec_file,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{ExitType, SEGFAULT_HINT};
    use std::time::Duration;
    use tempfile::TempDir;

    const ECHO: &str = r#"
        #include <iostream>
        int main() {
            int n;
            std::cin >> n;
            std::cout << n << std::endl;
            return 0;
        }
    "#;

    fn gpp_available() -> bool {
        std::process::Command::new(DEFAULT_COMPILER)
            .arg("--version")
            .output()
            .is_ok()
    }

    fn write_source(dir: &TempDir, name: &str, code: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, code).unwrap();
        path
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig::default().with_sample_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_cpp_echo() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "echo.cpp", ECHO);

        let mut executor = CppExecutor::new(&src, config());
        let target = executor.build().await.unwrap();
        assert_eq!(target, RunTarget::executable(dir.path().join("echo.out")));
        assert_eq!(executor.exec_file(), Some(dir.path().join("echo.out").as_path()));

        let result = executor.evaluate("5\n").await.unwrap();
        assert_eq!(result.exit_type, ExitType::Success);
        assert_eq!(result.output.as_deref(), Some("5\n"));

        // A built executable can be run once per test case
        let result = executor.evaluate("-17\n").await.unwrap();
        assert_eq!(result.output.as_deref(), Some("-17\n"));

        executor.cleanup().await.unwrap();
        assert!(!dir.path().join("echo.out").exists());
    }

    #[tokio::test]
    async fn test_cpp_timeout() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(
            &dir,
            "spin.cpp",
            "int main() { volatile unsigned long n = 0; while (true) { n = n + 1; } }",
        );

        let mut executor = CppExecutor::new(&src, config().with_timeout(Duration::from_millis(100)));
        executor.build().await.unwrap();

        let result = executor.evaluate("").await.unwrap();
        assert_eq!(result.exit_type, ExitType::Timeout);
        assert_eq!(result.output, None);
        assert!(result.exec_time_ms >= 100, "exec time {}", result.exec_time_ms);

        executor.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cpp_missing_compiler() {
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "echo.cpp", ECHO);

        let mut executor = CppExecutor::new(&src, config().with_toolchain("/nonexistent/g++"));
        let err = executor.build().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Build { .. }));
        assert_eq!(executor.exec_file(), None);

        assert!(matches!(executor.run("5\n").await, Err(ExecutorError::NotBuilt { .. })));
        assert!(matches!(executor.cleanup().await, Err(ExecutorError::NotBuilt { .. })));
    }

    #[tokio::test]
    async fn test_cpp_exit_139_hints_segfault() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "exit.cpp", "int main() { return 139; }");

        let mut executor = CppExecutor::new(&src, config());
        executor.build().await.unwrap();

        let result = executor.evaluate("").await.unwrap();
        assert_eq!(result.exit_type, ExitType::RuntimeError);
        assert_eq!(result.exit_detail, format!("Exit code: 139{}", SEGFAULT_HINT));

        executor.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cpp_segfault_signal() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(
            &dir,
            "null.cpp",
            "int main() { volatile int *p = nullptr; *p = 1; return 0; }",
        );

        let mut executor = CppExecutor::new(&src, config());
        executor.build().await.unwrap();

        let outcome = executor.run("").await.unwrap();
        assert_eq!(outcome.signal, Some(nix::sys::signal::Signal::SIGSEGV));
        let result = crate::verdict::classify(&outcome);
        assert_eq!(result.exit_type, ExitType::RuntimeError);
        assert!(result.exit_detail.starts_with("Killed by Signal: SIGSEGV"));

        executor.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cpp_compile_error() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "broken.cpp", "int main() { return 0 }");

        let mut executor = CppExecutor::new(&src, config());
        match executor.build().await {
            Err(ExecutorError::Compilation { diagnostics, .. }) => assert!(!diagnostics.is_empty()),
            other => panic!("expected a compilation error, got {:?}", other),
        }
        assert_eq!(executor.exec_file(), None);
        assert!(matches!(executor.run("").await, Err(ExecutorError::NotBuilt { .. })));
    }

    #[tokio::test]
    async fn test_cpp_compiler_args() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(
            &dir,
            "local.cpp",
            r#"
            #include <cstdio>
            int main() {
            #ifdef LOCAL
                std::puts("local");
            #else
                std::puts("judge");
            #endif
            }
            "#,
        );

        let mut executor = CppExecutor::new(&src, config().with_compiler_args(["-Wall", "-O0", "-DLOCAL"]));
        executor.build().await.unwrap();
        let result = executor.evaluate("").await.unwrap();
        assert_eq!(result.output.as_deref(), Some("local\n"));
        executor.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cpp_cleanup_twice() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "echo.cpp", ECHO);

        let mut executor = CppExecutor::new(&src, config());
        executor.build().await.unwrap();
        executor.cleanup().await.unwrap();

        let err = executor.cleanup().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Cleanup { .. }));
        assert!(matches!(executor.run("5\n").await, Err(ExecutorError::CleanedUp { .. })));
        // Still inspectable after a failed cleanup
        assert_eq!(executor.exec_file(), Some(dir.path().join("echo.out").as_path()));

        let mut fresh = CppExecutor::new(&src, config());
        fresh.build().await.unwrap();
        let result = fresh.evaluate("5\n").await.unwrap();
        assert_eq!(result.exit_type, ExitType::Success);
        fresh.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cpp_build_twice() {
        if !gpp_available() {
            eprintln!("g++ not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "echo.cpp", ECHO);

        let mut executor = CppExecutor::new(&src, config());
        executor.build().await.unwrap();
        assert!(matches!(executor.build().await, Err(ExecutorError::AlreadyBuilt { .. })));
        executor.cleanup().await.unwrap();
    }
}
