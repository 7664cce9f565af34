use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use case_runner::runtime::language_tag;
use case_runner::{
    init_registry, CheckVerdict, Checker, ExecutionResult, ExecutorRegistry, LanguageExecutor, RunnerConfig,
};
use serde::Serialize;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a solution and run it against test inputs
    Run {
        /// Path to the solution source
        #[arg(required = true)]
        file: PathBuf,

        /// Language tag (defaults to the file extension)
        #[arg(short, long)]
        language: Option<String>,

        /// Test input files, one run each. Reads a single input from stdin if omitted.
        #[arg(short, long)]
        input: Vec<PathBuf>,

        /// Expected output files, paired with the inputs in order
        #[arg(short, long)]
        expected: Vec<PathBuf>,

        /// Output checker: exact, line or token (overrides config)
        #[arg(long)]
        checker: Option<Checker>,

        /// Execution timeout in milliseconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List supported language tags
    ListSupported,

    /// Print one configuration option
    Get {
        /// Option category, e.g. build_and_run
        category: String,

        /// Option key, e.g. timeout
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_json);

    let config_path = cli.config.clone().unwrap_or_else(RunnerConfig::default_path);
    let mut config = RunnerConfig::load(&config_path)?;

    let registry = init_registry()?;

    match cli.command {
        Commands::Run {
            file,
            language,
            input,
            expected,
            checker,
            timeout,
            json,
        } => {
            if let Some(timeout) = timeout {
                info!("Timeout: {} ms (from CLI)", timeout);
                config.build_and_run.timeout = timeout;
            }
            if let Some(checker) = checker {
                config.build_and_run.default_checker = checker;
            }
            let request = RunRequest {
                file: &file,
                language: language.as_deref(),
                inputs: &input,
                expected: &expected,
                json,
            };
            run_file(&config, &registry, &request).await?;
        }

        Commands::ListSupported => {
            println!("Supported languages:");
            for tag in registry.language_tags() {
                println!("- .{}", tag);
            }
        }

        Commands::Get { category, key } => match config.get(&category, &key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown option {}.{}", category, key),
        },
    }

    Ok(())
}

struct RunRequest<'a> {
    file: &'a Path,
    language: Option<&'a str>,
    inputs: &'a [PathBuf],
    expected: &'a [PathBuf],
    json: bool,
}

struct TestCase {
    name: String,
    input: String,
    expected: Option<String>,
}

#[derive(Serialize)]
struct CaseReport {
    case: String,
    result: ExecutionResult,
    verdict: Option<CheckVerdict>,
}

async fn run_file(config: &RunnerConfig, registry: &ExecutorRegistry, request: &RunRequest<'_>) -> Result<()> {
    let file = request.file;
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let tag = match request.language.or_else(|| language_tag(file)) {
        Some(tag) => tag,
        None => anyhow::bail!("Cannot tell the language of {:?}, pass --language", file),
    };
    let factory = registry.resolve(tag)?;

    // Everything that can fail goes before the build, which leaves an artifact behind
    let cases = read_cases(request.inputs, request.expected).await?;

    let mut executor = factory(file.to_path_buf(), config.executor_config(tag));
    info!("Using executor: {}", executor.language());

    executor
        .build()
        .await
        .with_context(|| format!("Failed to build {:?}", file))?;

    let checker = config.build_and_run.default_checker;
    let mut reports = Vec::with_capacity(cases.len());
    for case in cases {
        match executor.evaluate(&case.input).await {
            Ok(result) => {
                let verdict = case
                    .expected
                    .as_deref()
                    .and_then(|expected| checker.judge(&result, expected));
                reports.push(CaseReport {
                    case: case.name,
                    result: result.truncated(config.build_and_run.char_limit),
                    verdict,
                });
            }
            Err(e) => error!("Failed to run test case {}: {}", case.name, e),
        }
    }

    if let Err(e) = executor.cleanup().await {
        warn!("Cleanup failed: {}", e);
    }

    if request.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    Ok(())
}

async fn read_cases(inputs: &[PathBuf], expected: &[PathBuf]) -> Result<Vec<TestCase>> {
    let mut cases = Vec::with_capacity(inputs.len().max(1));
    if inputs.is_empty() {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("Failed to read input from stdin")?;
        cases.push(TestCase {
            name: "stdin".to_string(),
            input,
            expected: None,
        });
    } else {
        for path in inputs {
            cases.push(TestCase {
                name: path.display().to_string(),
                input: read_text(path, "input").await?,
                expected: None,
            });
        }
    }

    if expected.is_empty() {
        return Ok(cases);
    }
    if expected.len() != cases.len() {
        anyhow::bail!(
            "Got {} expected output files for {} test inputs",
            expected.len(),
            cases.len()
        );
    }
    for (case, path) in cases.iter_mut().zip(expected) {
        case.expected = Some(read_text(path, "expected output").await?);
    }
    Ok(cases)
}

async fn read_text(path: &Path, what: &str) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {} file: {:?}", what, path))
}

fn print_report(report: &CaseReport) {
    let result = &report.result;
    println!("== {}: {}", report.case, result.exit_type);
    println!("{}", result.exit_detail);
    println!("Time: {} ms, Memory: {} KB", result.exec_time_ms, result.memory_kb);
    if let Some(verdict) = report.verdict {
        println!("Verdict: {}", verdict);
    }
    if let Some(output) = &result.output {
        println!("Stdout:\n{}", output);
    }
    if let Some(error) = result.error.as_ref().filter(|e| !e.is_empty()) {
        println!("Stderr:\n{}", error);
    }
}

fn setup_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request<'a>(file: &'a Path, inputs: &'a [PathBuf], expected: &'a [PathBuf]) -> RunRequest<'a> {
        RunRequest {
            file,
            language: None,
            inputs,
            expected,
            json: true,
        }
    }

    #[tokio::test]
    async fn test_unreadable_input_leaves_no_artifact() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.cpp");
        std::fs::write(&src, "int main() { return 0; }\n").unwrap();
        let inputs = vec![dir.path().join("missing.txt")];

        let registry = init_registry().unwrap();
        let err = run_file(&RunnerConfig::default(), &registry, &request(&src, &inputs, &[]))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("missing.txt"), "{}", err);
        assert!(!dir.path().join("a.out").exists());
    }

    #[tokio::test]
    async fn test_expected_outputs_pair_with_inputs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("1.in");
        let answer = dir.path().join("1.ans");
        std::fs::write(&input, "3 4\n").unwrap();
        std::fs::write(&answer, "7\n").unwrap();

        let cases = read_cases(&[input.clone()], &[answer.clone()]).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].input, "3 4\n");
        assert_eq!(cases[0].expected.as_deref(), Some("7\n"));

        let err = read_cases(&[input.clone(), input], &[answer]).await.err().unwrap();
        assert!(err.to_string().contains("2 test inputs"), "{}", err);
    }
}
