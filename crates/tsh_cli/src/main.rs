//! tsh - a tiny shell with job control.
//!
//! Usage:
//!   tsh [-hvp] [--config <path>]

mod builtins;
mod config;
mod parse;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tsh_jobs::{JobControl, JobError};

use crate::builtins::{launch_notice, Builtin, Flow};
use crate::config::{Options, ShellConfig};
use crate::parse::{parse_line, ParsedLine};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match Options::parse(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("tsh: {}", e);
            usage();
            std::process::exit(1);
        }
    };
    if opts.help {
        usage();
        std::process::exit(1);
    }

    let mut config = ShellConfig::resolve(opts.config.as_deref())?;
    opts.apply(&mut config);
    init_tracing(config.verbose);

    let jobs = JobControl::start(config.jobs.clone()).context("starting job control")?;
    let result = repl(&jobs, &config);
    jobs.shutdown();
    result
}

fn usage() {
    eprintln!("Usage: tsh [-hvp] [--config <path>]");
    eprintln!("   -h              print this message");
    eprintln!("   -v              print additional diagnostic information");
    eprintln!("   -p              do not emit a command prompt");
    eprintln!("   --config <path> read settings from a TOML file (default: $TSH_CONFIG)");
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("TSH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(io::stderr)
        .init();
}

fn repl(jobs: &JobControl, config: &ShellConfig) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();

    loop {
        let mut out = io::stdout().lock();
        for notice in jobs.take_notices() {
            writeln!(out, "{}", notice)?;
        }
        if config.emit_prompt {
            write!(out, "{}", config.prompt)?;
        }
        out.flush()?;
        drop(out);

        line.clear();
        if input.read_line(&mut line).context("reading command line")? == 0 {
            debug!("end of input");
            return Ok(());
        }

        match eval(jobs, &line) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => return Ok(()),
            Err(e) => eprintln!("{:#}", e),
        }
    }
}

/// Run one command line: a builtin, a single command or a pipeline.
fn eval(jobs: &JobControl, line: &str) -> Result<Flow> {
    let Some(parsed) = parse_line(line)? else {
        return Ok(Flow::Continue);
    };

    if !parsed.is_pipeline() {
        if let Some(builtin) = Builtin::recognize(&parsed.stages[0]) {
            return builtin.run(jobs, &mut io::stdout().lock());
        }
    }

    launch(jobs, &parsed)?;
    Ok(Flow::Continue)
}

fn launch(jobs: &JobControl, parsed: &ParsedLine) -> Result<(), JobError> {
    let jid = if parsed.is_pipeline() {
        jobs.launch_pipeline(&parsed.stages, parsed.background, &parsed.text)?
    } else {
        jobs.launch_single(&parsed.stages[0], parsed.background, &parsed.text)?
    };

    if parsed.background {
        if let Some(job) = jobs.job_for_id(jid) {
            println!("{}", launch_notice(&job));
        }
    }
    Ok(())
}
