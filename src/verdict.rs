use nix::sys::signal::Signal;
use serde::Serialize;
use std::fmt;

use crate::runtime::{ProcessOutcome, TIMEOUT_SIGNAL};

pub const TIMEOUT_HINT: &str = " (Possible timeout?)";
pub const SEGFAULT_HINT: &str = " (Possible Segmentation Fault?)";
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Closed set of run classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitType {
    Success,
    Timeout,
    RuntimeError,
    InternalError,
}

impl fmt::Display for ExitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitType::Success => "Success",
            ExitType::Timeout => "Timeout",
            ExitType::RuntimeError => "Runtime Error",
            ExitType::InternalError => "Internal Error (spawn() call failed)",
        };
        f.write_str(name)
    }
}

/// Classified result of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub exit_type: ExitType,
    pub exit_detail: String,
    /// Captured stderr; absent when the process never ran
    pub error: Option<String>,
    /// Captured stdout; absent on timeout or when the process never ran
    pub output: Option<String>,
    pub exec_time_ms: u64,
    pub memory_kb: u64,
}

impl ExecutionResult {
    /// Copy with output and error cut down to `char_limit` characters
    pub fn truncated(&self, char_limit: usize) -> Self {
        Self {
            error: self.error.as_deref().map(|s| truncate_chars(s, char_limit)),
            output: self.output.as_deref().map(|s| truncate_chars(s, char_limit)),
            ..self.clone()
        }
    }
}

fn truncate_chars(text: &str, char_limit: usize) -> String {
    match text.char_indices().nth(char_limit) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Map a finished run to its [`ExecutionResult`]. First matching rule wins:
/// launch failure, then terminating signal, then exit status.
pub fn classify(outcome: &ProcessOutcome) -> ExecutionResult {
    let exec_time_ms = outcome.usage.elapsed_ms;
    let memory_kb = outcome.usage.memory_kb;

    if let Some(err) = &outcome.launch_error {
        return ExecutionResult {
            exit_type: ExitType::InternalError,
            exit_detail: format!("spawn() call failed: {}: {}", err.name(), err.message),
            error: None,
            output: None,
            exec_time_ms,
            memory_kb,
        };
    }

    let output = String::from_utf8_lossy(&outcome.stdout).into_owned();
    let error = String::from_utf8_lossy(&outcome.stderr).into_owned();

    if let Some(signal) = outcome.signal {
        let mut exit_detail = format!("Killed by Signal: {}", signal);

        if signal == TIMEOUT_SIGNAL {
            exit_detail.push_str(TIMEOUT_HINT);
            return ExecutionResult {
                exit_type: ExitType::Timeout,
                exit_detail,
                error: Some(error),
                output: None,
                exec_time_ms,
                memory_kb,
            };
        }

        if signal == Signal::SIGSEGV {
            exit_detail.push_str(SEGFAULT_HINT);
        }
        return ExecutionResult {
            exit_type: ExitType::RuntimeError,
            exit_detail,
            error: Some(error),
            output: Some(output),
            exec_time_ms,
            memory_kb,
        };
    }

    let (exit_type, exit_detail) = match outcome.status {
        Some(0) => (ExitType::Success, "Exit code: 0".to_string()),
        Some(code) => {
            let mut detail = format!("Exit code: {}", code);
            if looks_like_segfault(code) {
                detail.push_str(SEGFAULT_HINT);
            }
            (ExitType::RuntimeError, detail)
        }
        None => (ExitType::RuntimeError, "Exit code: unknown".to_string()),
    };

    ExecutionResult {
        exit_type,
        exit_detail,
        error: Some(error),
        output: Some(output),
        exec_time_ms,
        memory_kb,
    }
}

/// Codes above 255 are wrapped abnormal-termination values. 139 is the shell
/// convention for a child that died of SIGSEGV.
fn looks_like_segfault(code: i32) -> bool {
    code as u32 > 255 || code == 128 + Signal::SIGSEGV as i32
}
