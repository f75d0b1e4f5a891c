use std::path::PathBuf;

use clap::Args;

use kelpie::api::execute_random;
use kelpie::report::format_case;

#[derive(Args)]
pub struct ExecArgs {
    /// Input .kvl file
    pub input: PathBuf,
    /// Entry procedure (defaults to the only procedure)
    #[arg(long = "proc", short = 'p')]
    pub procedure: Option<String>,
    /// Seed for the random choice generator
    #[arg(long, default_value_t = 0x5EED)]
    pub seed: u64,
    /// Magnitude bound for solver-chosen values
    #[arg(long, default_value_t = 8)]
    pub bound: i64,
}

pub fn cmd_exec(args: ExecArgs) {
    let (source, program) = super::prepare_file(&args.input);
    let entry = super::resolve_entry(&program, args.procedure.as_deref());
    let case = execute_random(&program, &entry, args.seed, args.bound);
    print!("{}", format_case(0, &case));
    if let Some(failure) = &case.failure {
        // Point at the offending source, with the call stack as labels
        if !failure.position.is_synthetic() {
            failure
                .to_diagnostic()
                .render(&args.input.display().to_string(), &source);
        }
        std::process::exit(1);
    }
}
