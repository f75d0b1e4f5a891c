use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct CheckArgs {
    /// Input .kvl file
    pub input: PathBuf,
}

pub fn cmd_check(args: CheckArgs) {
    let (_, program) = super::prepare_file(&args.input);
    let procedures = program.procedures.len();
    let implementations: usize = program.procedures.values().map(Vec::len).sum();
    println!(
        "ok: {} procedure(s), {} definition(s), {} function(s), {} axiom(s)",
        procedures,
        implementations,
        program.functions.len(),
        program.axioms.len(),
    );
}
