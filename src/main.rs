mod cli;

use clap::{Parser, Subcommand};

use cli::check::CheckArgs;
use cli::exec::ExecArgs;
use cli::test::TestArgs;

#[derive(Parser)]
#[command(
    name = "kelpie",
    version,
    about = "Symbolic interpreter and test generator for the Kelpie verification language"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and preprocess a .kvl file
    Check(CheckArgs),
    /// Run one symbolic execution of an entry procedure
    Exec(ExecArgs),
    /// Generate test cases by exhaustive choice enumeration
    Test(TestArgs),
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => cli::check::cmd_check(args),
        Command::Exec(args) => cli::exec::cmd_exec(args),
        Command::Test(args) => cli::test::cmd_test(args),
    }
}
