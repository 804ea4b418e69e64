//! Binary entry point for the whence CLI.
//!
//! All output is JSON on stdout; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Resolve every instruction of every file under a directory
//! whence check tests/samples
//!
//! # Disassemble one file with the node behind each instruction
//! whence --runtime 3.11 dis tests/samples/classes.py
//!
//! # Write a baseline for later comparison
//! whence record tests/samples --out tests/sample_results/3.8.json
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use whence::error::{OutputErrorCode, SourceError, WhenceError};
use whence::output::{
    emit_response, CheckResponse, DisCode, DisInstruction, DisResponse, ErrorResponse,
    RecordResponse,
};
use whence::{all_codes, check_paths, ExecutionPoint, Resolver, RuntimeVersion, SourceRegistry};

// ============================================================================
// CLI Structure
// ============================================================================

/// Find the syntax node behind a bytecode instruction.
#[derive(Parser, Debug)]
#[command(name = "whence", version, about = "Map bytecode instructions to source nodes")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Runtime version to compile for (default: $WHENCE_RUNTIME_VERSION, else 3.8).
    #[arg(long, global = true, value_parser = parse_runtime)]
    runtime: Option<RuntimeVersion>,

    /// Log level. `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve every resolvable instruction of every Python file under the
    /// given paths and report anything suspicious.
    Check {
        /// Files or directories to check.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Disassemble a file, annotating each resolvable instruction.
    Dis {
        file: PathBuf,
    },
    /// Record resolved instructions per file as a JSON baseline.
    Record {
        dir: PathBuf,
        /// Where to write the baseline.
        #[arg(long)]
        out: PathBuf,
    },
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn parse_runtime(value: &str) -> Result<RuntimeVersion, String> {
    value.parse().map_err(|err: whence::UnsupportedVersion| err.to_string())
}

// ============================================================================
// Entry
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level);

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors are JSON on stdout like every other response.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn build_resolver(global: &GlobalArgs) -> Result<Resolver, WhenceError> {
    let registry = Arc::new(SourceRegistry::new());
    match global.runtime {
        Some(version) => Ok(Resolver::new(registry, version)),
        None => Ok(Resolver::detect(registry)?),
    }
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<ExitCode, WhenceError> {
    let resolver = build_resolver(&cli.global)?;
    info!("resolving for runtime {}", resolver.version());
    match cli.command {
        Command::Check { paths } => execute_check(&resolver, &paths),
        Command::Dis { file } => execute_dis(&resolver, &file),
        Command::Record { dir, out } => execute_record(&resolver, &dir, &out),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn emit<T: serde::Serialize>(response: &T) -> Result<(), WhenceError> {
    emit_response(response, &mut io::stdout())
        .map_err(|e| WhenceError::internal(format!("cannot write output: {}", e)))
}

fn execute_check(resolver: &Resolver, paths: &[PathBuf]) -> Result<ExitCode, WhenceError> {
    let report = check_paths(resolver, paths)?;
    let response = CheckResponse::new(report);
    let failed = response.failure_count > 0;
    emit(&response)?;
    Ok(if failed {
        ExitCode::from(OutputErrorCode::CheckFailed.code())
    } else {
        ExitCode::SUCCESS
    })
}

fn execute_dis(resolver: &Resolver, file: &Path) -> Result<ExitCode, WhenceError> {
    let filename = file.to_string_lossy();
    let source = resolver.registry().for_filename(&filename)?;
    if let Some(err) = source.syntax_error() {
        return Err(SourceError::from_parser(&filename, err).into());
    }
    let module = source.module_code(resolver.version())?;

    let mut codes = Vec::new();
    for code in all_codes(&module) {
        let mut instructions = Vec::new();
        for instruction in &code.instructions {
            let mut entry = DisInstruction {
                offset: instruction.offset,
                line: instruction.line,
                opname: instruction.opname().to_string(),
                arg: instruction.arg,
                node: None,
                unresolved: None,
            };
            if resolver.classifier().classify(instruction).is_some() {
                let point = ExecutionPoint::at_offset(Arc::clone(&code), instruction.offset)?;
                let executing = resolver.executing(point)?;
                entry.node = executing.text().map(str::to_string);
                entry.unresolved = executing.unresolved().map(ToString::to_string);
            }
            instructions.push(entry);
        }
        codes.push(DisCode {
            qualname: source.code_qualname(&code),
            first_line: code.first_line,
            instructions,
        });
    }
    emit(&DisResponse::new(resolver.version(), filename, codes))?;
    Ok(ExitCode::SUCCESS)
}

fn execute_record(resolver: &Resolver, dir: &Path, out: &Path) -> Result<ExitCode, WhenceError> {
    let report = check_paths(resolver, &[dir.to_path_buf()])?;
    let json = serde_json::to_string_pretty(&report.baseline())?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| WhenceError::internal(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    fs::write(out, json + "\n")
        .map_err(|e| WhenceError::internal(format!("cannot write {}: {}", out.display(), e)))?;
    info!("recorded {} file(s) to {}", report.files.len(), out.display());
    emit(&RecordResponse::new(&report, out))?;
    Ok(ExitCode::SUCCESS)
}
