use std::path::PathBuf;

use clap::Args;

use kelpie::api::{run_session, SessionOptions, Verdict};
use kelpie::report::{format_session, session_to_json};

#[derive(Args)]
pub struct TestArgs {
    /// Input .kvl file
    pub input: PathBuf,
    /// Entry procedure (defaults to the only procedure)
    #[arg(long = "proc", short = 'p')]
    pub procedure: Option<String>,
    /// Maximum number of test cases to generate
    #[arg(long, default_value_t = 64)]
    pub max_cases: usize,
    /// Magnitude bound for solver-chosen values
    #[arg(long, default_value_t = 8)]
    pub bound: i64,
    /// Bound for enumerated integer choices
    #[arg(long, default_value_t = 4)]
    pub integer_bound: i64,
    /// Emit a machine-readable JSON report
    #[arg(long)]
    pub json: bool,
}

pub fn cmd_test(args: TestArgs) {
    let (_, program) = super::prepare_file(&args.input);
    let entry = super::resolve_entry(&program, args.procedure.as_deref());
    let options = SessionOptions {
        max_cases: args.max_cases,
        solver_bound: args.bound,
        integer_bound: args.integer_bound,
        solve_passing: true,
    };
    let cases = run_session(&program, &entry, &options);
    if args.json {
        print!("{}", session_to_json(&entry, &cases));
    } else {
        print!("{}", format_session(&entry, &cases));
    }
    if cases.iter().any(|c| c.verdict() == Verdict::Fail) {
        std::process::exit(1);
    }
}
