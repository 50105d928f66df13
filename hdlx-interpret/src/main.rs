#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, NamedSource, Report};
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hdlx_core::{FileResolver, ImportData, ParametricEnv, typecheck_text};
use hdlx_interpret::{InterpreterOptions, TestOptions, TestResult, bytecode_for, run_tests};

#[derive(Parser, Debug)]
#[command(name = "hdlx", version, about = "Front end and interpreter for the hdlx hardware description language")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Typecheck files and run their tests
    Test {
        files: Vec<PathBuf>,

        /// Only run tests whose name contains this string
        #[arg(long)]
        filter: Option<String>,

        /// Tick limit for each test proc network
        #[arg(long, default_value_t = 100_000)]
        max_ticks: u64,

        /// Additional import search directories
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print a file in canonical form
    Fmt { file: PathBuf },

    /// Print the bytecode of a function
    Disasm {
        file: PathBuf,
        function: String,

        /// Prefix every instruction with its source location
        #[arg(long, default_value_t = false)]
        locations: bool,

        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
    },

    /// Parse and typecheck files without running anything
    Typecheck {
        files: Vec<PathBuf>,

        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct JsonOut<'a> {
    file: String,
    passed: bool,
    tests: &'a [TestResult],
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Test {
            files,
            filter,
            max_ticks,
            include,
            json,
        } => {
            let options = TestOptions {
                filter,
                max_ticks,
                interpreter: InterpreterOptions::default(),
            };
            let outcomes: Vec<(PathBuf, miette::Result<Vec<TestResult>>)> = files
                .par_iter()
                .map(|path| (path.clone(), test_file(path, &include, &options)))
                .collect();

            let mut failed = 0usize;
            let mut total = 0usize;
            for (path, outcome) in outcomes {
                let results = outcome?;
                total += results.len();
                failed += results.iter().filter(|r| !r.passed).count();
                if json {
                    let out = JsonOut {
                        file: path.display().to_string(),
                        passed: results.iter().all(|r| r.passed),
                        tests: &results,
                    };
                    println!("{}", serde_json::to_string(&out).into_diagnostic()?);
                } else {
                    print_results(&path, &results);
                }
            }
            if failed > 0 {
                return Err(miette::miette!("{failed} of {total} test(s) failed"));
            }
            Ok(())
        }
        Cmd::Fmt { file } => {
            let (text, name) = read(&file)?;
            let module = hdlx_parse::parse_module(&text, &file.display().to_string(), &name)
                .map_err(|e| with_source(Report::new(e), &file, &text))?;
            print!("{}", hdlx_parse::format_module(&module));
            Ok(())
        }
        Cmd::Disasm {
            file,
            function,
            locations,
            include,
        } => {
            let (data, name) = check_file(&file, &include)?;
            let f = bytecode_for(&data, &name, &function, &ParametricEnv::new())?;
            if locations {
                println!("{}", f.to_string_with_locations());
            } else {
                println!("{f}");
            }
            Ok(())
        }
        Cmd::Typecheck { files, include } => {
            let outcomes: Vec<miette::Result<()>> = files
                .par_iter()
                .map(|path| check_file(path, &include).map(|_| ()))
                .collect();
            for outcome in outcomes {
                outcome?;
            }
            Ok(())
        }
    }
}

fn read(path: &Path) -> miette::Result<(String, String)> {
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("reading {}", path.display())))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| miette::miette!("{} has no usable module name", path.display()))?
        .to_string();
    Ok((text, name))
}

fn with_source(report: Report, path: &Path, text: &str) -> Report {
    report.with_source_code(NamedSource::new(path.display().to_string(), text.to_string()))
}

/// Typechecks one file with its directory and `include` as import roots.
fn check_file(path: &Path, include: &[PathBuf]) -> miette::Result<(ImportData, String)> {
    let (text, name) = read(path)?;
    let mut search_paths = include.to_vec();
    if let Some(parent) = path.parent() {
        search_paths.push(parent.to_path_buf());
    }
    let mut data = ImportData::new(FileResolver::new(search_paths));
    typecheck_text(&mut data, &text, &path.display().to_string(), &name)
        .map_err(|e| with_source(Report::new(e), path, &text))?;
    Ok((data, name))
}

fn test_file(path: &Path, include: &[PathBuf], options: &TestOptions) -> miette::Result<Vec<TestResult>> {
    let (data, name) = check_file(path, include)?;
    Ok(run_tests(&data, &name, options)?)
}

fn print_results(path: &Path, results: &[TestResult]) {
    for r in results {
        let status = if r.passed { "ok" } else { "FAILED" };
        println!("[ {status:>6} ] {}::{}", path.display(), r.name);
        for line in &r.trace {
            println!("    trace: {line}");
        }
        if let Some(message) = &r.message {
            println!("    {message}");
        }
    }
    let passed = results.iter().filter(|r| r.passed).count();
    println!("{}: {passed}/{} passed", path.display(), results.len());
}
