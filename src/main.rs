//! The `tjs` command line: compile TJS to JavaScript, check sources, run
//! agent programs in the VM, and export the atom table as tool descriptors.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tjs::compiler::{tjs, transpile, CompileOptions, RunTestsMode};
use tjs::vm::capabilities::{Capabilities, UreqFetch};
use tjs::vm::{AgentVM, RunOptions};

#[derive(Parser)]
#[command(name = "tjs", version, about = "TJS compiler and agent VM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a TJS file and print the emitted JavaScript
    Compile {
        file: PathBuf,
        /// Include source locations in emitted metadata
        #[arg(long)]
        debug: bool,
        /// Report test failures instead of failing the build
        #[arg(long)]
        report: bool,
        /// Skip signature tests and test blocks
        #[arg(long)]
        skip_tests: bool,
    },
    /// Parse a TJS file and run its tests without emitting code
    Check { file: PathBuf },
    /// Compile a single-function TJS file and execute it in the VM
    Run {
        file: PathBuf,
        /// JSON object of named arguments
        #[arg(long, default_value = "{}")]
        args: String,
        /// Fuel budget
        #[arg(long)]
        fuel: Option<f64>,
        /// Wall-clock timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Record and print the executed-atom trace
        #[arg(long)]
        trace: bool,
    },
    /// Print the atom table as OpenAI-style tool descriptors
    Tools {
        /// Restrict to the named atoms
        #[arg(long)]
        filter: Vec<String>,
    },
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr);
    let _ = subscriber.try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Compile {
            file,
            debug,
            report,
            skip_tests,
        } => compile_command(&file, debug, report, skip_tests),
        Command::Check { file } => check_command(&file),
        Command::Run {
            file,
            args,
            fuel,
            timeout_ms,
            trace,
        } => run_command(&file, &args, fuel, timeout_ms, trace),
        Command::Tools { filter } => {
            let vm = AgentVM::new();
            let names: Vec<&str> = filter.iter().map(String::as_str).collect();
            let filter = if names.is_empty() {
                None
            } else {
                Some(names.as_slice())
            };
            let tools = vm.get_tools(filter);
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(0)
        }
    }
}

fn read_source(file: &PathBuf) -> Result<String> {
    std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))
}

fn compile_options(file: &PathBuf, debug: bool, report: bool, skip_tests: bool) -> CompileOptions {
    CompileOptions {
        filename: Some(file.display().to_string()),
        debug,
        run_tests: if skip_tests {
            RunTestsMode::Skip
        } else if report {
            RunTestsMode::Report
        } else {
            RunTestsMode::Run
        },
        dangerously_skip_tests: false,
    }
}

fn compile_command(file: &PathBuf, debug: bool, report: bool, skip_tests: bool) -> Result<i32> {
    let source = read_source(file)?;
    let opts = compile_options(file, debug, report, skip_tests);
    match tjs(&source, &opts) {
        Ok(out) => {
            println!("{}", out.code);
            if let Some(tests) = &out.test_results {
                if tests.failed > 0 {
                    eprintln!("{} test(s) failed", tests.failed);
                }
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", e.annotate(&source));
            Ok(1)
        }
    }
}

fn check_command(file: &PathBuf) -> Result<i32> {
    let source = read_source(file)?;
    let opts = compile_options(file, false, true, false);
    match tjs(&source, &opts) {
        Ok(out) => {
            let report = out.test_results.unwrap_or_default();
            for result in &report.results {
                let mark = if result.passed { "ok" } else { "FAIL" };
                match &result.error {
                    Some(error) => println!("{:>4}  {} — {}", mark, result.description, error),
                    None => println!("{:>4}  {}", mark, result.description),
                }
            }
            println!(
                "{} passed, {} failed ({} function(s))",
                report.passed,
                report.failed,
                out.types.len()
            );
            Ok(if report.failed > 0 { 1 } else { 0 })
        }
        Err(e) => {
            eprintln!("{}", e.annotate(&source));
            Ok(1)
        }
    }
}

fn run_command(
    file: &PathBuf,
    args: &str,
    fuel: Option<f64>,
    timeout_ms: Option<u64>,
    trace: bool,
) -> Result<i32> {
    let source = read_source(file)?;
    let args: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if !args.is_object() {
        return Err(anyhow!("--args must be a JSON object"));
    }

    let compiled = match transpile(&source) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("{}", e.annotate(&source));
            return Ok(1);
        }
    };

    let capabilities = Capabilities::default().with_fetch(Arc::new(UreqFetch::default()));
    let opts = RunOptions {
        fuel,
        timeout_ms,
        capabilities,
        signal: None,
        trace,
        cost_overrides: Default::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    let vm = AgentVM::new();
    let result = runtime.block_on(vm.run(compiled.ast, args, opts));

    if let Some(trace) = &result.trace {
        for entry in trace {
            eprintln!("{:>10.2}  {}", entry.fuel_before, entry.op);
        }
    }
    eprintln!("fuel used: {:.2}", result.fuel_used);
    println!("{}", serde_json::to_string_pretty(&result.result)?);
    Ok(if result.error.is_some() { 2 } else { 0 })
}
