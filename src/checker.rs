use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ExecutorError;
use crate::verdict::{ExecutionResult, ExitType};

/// How a run's output is compared with the expected answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checker {
    /// Byte-for-byte
    Exact,
    /// Line by line, ignoring trailing spaces and trailing blank lines
    Line,
    /// Whitespace-separated tokens
    #[default]
    Token,
}

/// Outcome of comparing a successful run with its expected output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckVerdict {
    Accepted,
    WrongAnswer,
    /// Same tokens, different layout
    PresentationError,
}

impl fmt::Display for CheckVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckVerdict::Accepted => "Accepted",
            CheckVerdict::WrongAnswer => "Wrong Answer",
            CheckVerdict::PresentationError => "Presentation Error",
        };
        f.write_str(name)
    }
}

impl Checker {
    pub fn name(&self) -> &'static str {
        match self {
            Checker::Exact => "exact",
            Checker::Line => "line",
            Checker::Token => "token",
        }
    }

    /// Compare `actual` with `expected`
    pub fn check(&self, expected: &str, actual: &str) -> CheckVerdict {
        let same = match self {
            Checker::Exact => expected == actual,
            Checker::Line => lines(expected).eq(lines(actual)),
            Checker::Token => tokens_match(expected, actual),
        };

        if same {
            CheckVerdict::Accepted
        } else if tokens_match(expected, actual) {
            CheckVerdict::PresentationError
        } else {
            CheckVerdict::WrongAnswer
        }
    }

    /// Check a classified run. Only successful runs have an answer to judge.
    pub fn judge(&self, result: &ExecutionResult, expected: &str) -> Option<CheckVerdict> {
        match (result.exit_type, &result.output) {
            (ExitType::Success, Some(output)) => Some(self.check(expected, output)),
            _ => None,
        }
    }
}

fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim_end().lines().map(str::trim_end)
}

fn tokens_match(expected: &str, actual: &str) -> bool {
    expected.split_whitespace().eq(actual.split_whitespace())
}

impl fmt::Display for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Checker {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Checker::Exact),
            "line" => Ok(Checker::Line),
            "token" => Ok(Checker::Token),
            other => Err(ExecutorError::UnknownChecker(other.to_string())),
        }
    }
}
