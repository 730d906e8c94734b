use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use narrow_cli::eval::{run_checked, Output, RunConfig, RunOutcome, Value};
use narrow_cli::report::{stderr_color, CheckReport, Diagnostic};
use narrow_cli::{check_source, read_source, Checked, EVAL_STACK_SIZE};
use narrow_types::flatten::{flatten, render};
use narrow_types::{LintConfig, LintKind, LintLevel};

#[derive(Parser, Debug)]
#[command(name = "narrow", version)]
#[command(about = "narrow: discriminated unions with checked exhaustiveness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Type-check a program and report lints
    Check {
        /// Path to the source file
        file: PathBuf,

        /// Fail when this lint fires (repeatable)
        #[arg(long, value_name = "LINT")]
        deny: Vec<LintKind>,

        /// Silence this lint (repeatable)
        #[arg(long, value_name = "LINT")]
        allow: Vec<LintKind>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Pretty)]
        format: Format,
    },

    /// Type-check and execute a program
    Run {
        /// Path to the source file
        file: PathBuf,

        /// Write a JSONL effect trace to this file
        #[arg(long)]
        trace: Option<PathBuf>,

        /// How many times to invoke a deferred effect returned by main()
        #[arg(long, default_value_t = 1)]
        invoke: u32,
    },

    /// Parse a source file and dump the AST
    Parse {
        /// Path to the source file
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Pretty)]
        format: Format,
    },

    /// Print one union holding every combination of the named unions
    Flatten {
        /// Path to the source file declaring the unions
        file: PathBuf,

        /// Unions to combine, in tag order
        #[arg(required = true)]
        unions: Vec<String>,

        /// Name of the combined union
        #[arg(long, default_value = "Flat")]
        name: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Pretty,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            file,
            deny,
            allow,
            format,
        } => cmd_check(&file, &deny, &allow, format),
        Commands::Run {
            file,
            trace,
            invoke,
        } => cmd_run(&file, trace.as_deref(), invoke),
        Commands::Parse { file, format } => cmd_parse(&file, format),
        Commands::Flatten { file, unions, name } => cmd_flatten(&file, &unions, &name),
    }
}

/// Render a diagnostic to stderr.
fn emit(diag: &Diagnostic, name: &str, src: &str) {
    eprint!("{}", diag.render(name, src, stderr_color()));
}

/// Read, parse and check; on failure report and exit 1.
fn load_and_typecheck(path: &Path) -> Result<(String, String, Checked)> {
    let src = read_source(path)?;
    let name = path.display().to_string();
    match check_source(&name, &src) {
        Ok(checked) => Ok((name, src, checked)),
        Err(e) => {
            emit(&Diagnostic::from_error(&e), &name, &src);
            std::process::exit(1);
        }
    }
}

fn cmd_check(file: &Path, deny: &[LintKind], allow: &[LintKind], format: Format) -> Result<()> {
    let src = read_source(file)?;
    let name = file.display().to_string();

    let mut lints = LintConfig::new();
    for &kind in allow {
        lints.set(kind, LintLevel::Allow);
    }
    for &kind in deny {
        lints.set(kind, LintLevel::Deny);
    }

    let diagnostics: Vec<Diagnostic> = match check_source(&name, &src) {
        Ok(checked) => lints
            .reported(checked.checker.lints())
            .map(|(lint, level)| Diagnostic::from_lint(lint, level))
            .collect(),
        Err(e) => vec![Diagnostic::from_error(&e)],
    };
    let ok = !diagnostics.iter().any(Diagnostic::is_error);

    match format {
        Format::Pretty => {
            for diag in &diagnostics {
                emit(diag, &name, &src);
            }
            if ok {
                println!("{}: ok", name);
            }
        }
        Format::Json => {
            let report = CheckReport {
                file: name,
                ok,
                diagnostics,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_run(file: &Path, trace: Option<&Path>, invoke: u32) -> Result<()> {
    let (name, src, checked) = load_and_typecheck(file)?;

    let config = LintConfig::new();
    for (lint, level) in config.reported(checked.checker.lints()) {
        emit(&Diagnostic::from_lint(lint, level), &name, &src);
    }

    let writer: Option<Box<dyn std::io::Write + Send>> = match trace {
        Some(path) => Some(Box::new(std::fs::File::create(path)?)),
        None => None,
    };
    let config = RunConfig {
        output: Output::Stdout,
        trace: writer,
        program: name.clone(),
        invoke,
    };

    let result = std::thread::Builder::new()
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run_checked(&checked, config))?
        .join()
        .map_err(|_| anyhow!("evaluator thread panicked"))?;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            emit(&Diagnostic::from_error(&e), &name, &src);
            std::process::exit(1);
        }
    };
    print_result(&outcome);
    if let Some(path) = trace {
        eprintln!("Trace written to {}", path.display());
    }
    Ok(())
}

fn print_result(outcome: &RunOutcome) {
    match &outcome.main {
        None => {
            for (name, value) in &outcome.lets {
                println!("{} = {}", name, value);
            }
        }
        Some(Value::Unit) => println!("Program completed successfully."),
        Some(value) if outcome.effects_invoked > 0 => println!(
            "main() = {} (invoked {} time{})",
            value,
            outcome.effects_invoked,
            if outcome.effects_invoked == 1 { "" } else { "s" }
        ),
        Some(value) => println!("main() = {}", value),
    }
}

fn cmd_parse(file: &Path, format: Format) -> Result<()> {
    let (_, _, checked) = load_and_typecheck(file)?;
    match format {
        Format::Pretty => println!("{:#?}", checked.module),
        Format::Json => println!("{}", serde_json::to_string_pretty(&checked.module)?),
    }
    Ok(())
}

fn cmd_flatten(file: &Path, unions: &[String], name: &str) -> Result<()> {
    let (_, _, checked) = load_and_typecheck(file)?;
    let unions: Vec<&str> = unions.iter().map(String::as_str).collect();
    let def = flatten(checked.checker.registry(), &unions, name)?;
    println!("{}", render(&def));
    Ok(())
}
