//! The driver-facing API: run one symbolic execution, or enumerate
//! executions exhaustively up to a bounded number of test cases.

use std::collections::VecDeque;

use crate::diagnostic::Diagnostic;
use crate::engine::constraints::ConstraintStore;
use crate::engine::error::Failure;
use crate::engine::exec::Engine;
use crate::engine::generator::{ChoicePoint, ExhaustiveGenerator, Generator, RandomGenerator};
use crate::engine::memory::Memory;
use crate::engine::preprocess::{preprocess, Preprocessed};
use crate::solver::enumerative::EnumerativeSolver;
use crate::solver::Solver;
use crate::syntax::ast::IdTypeWhere;
use crate::syntax::parse_source;

/// The declared interface of the executed entry point.
#[derive(Clone, Debug)]
pub struct EntrySignature {
    pub name: String,
    pub params: Vec<IdTypeWhere>,
    pub returns: Vec<IdTypeWhere>,
}

/// One finished execution: the final symbolic state and, when the run
/// did not pass, the failure that ended it.
#[derive(Debug)]
pub struct TestCase {
    pub signature: EntrySignature,
    pub memory: Memory,
    pub constraints: ConstraintStore,
    pub failure: Option<Failure>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// No failure: a concrete passing run.
    Pass,
    /// The path's assumptions were refuted: not a real execution.
    Invalid,
    /// The engine cannot model a construct on this path.
    Nonexecutable,
    /// A concrete failing run with witness values.
    Fail,
}

impl TestCase {
    pub fn verdict(&self) -> Verdict {
        match &self.failure {
            None => Verdict::Pass,
            Some(f) if f.is_unreachable() => Verdict::Invalid,
            Some(f) if f.is_unsupported() => Verdict::Nonexecutable,
            Some(_) => Verdict::Fail,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Invalid => write!(f, "invalid"),
            Verdict::Nonexecutable => write!(f, "nonexecutable"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Parse and preprocess a source string: the front half of the pipeline.
pub fn prepare_source(source: &str) -> Result<Preprocessed, Vec<Diagnostic>> {
    let program = parse_source(source, 0)?;
    preprocess(&program)
}

fn entry_signature(program: &Preprocessed, entry: &str) -> EntrySignature {
    match program.context.procedures.get(entry) {
        Some(sig) => EntrySignature {
            name: entry.to_string(),
            params: sig.params.clone(),
            returns: sig.returns.clone(),
        },
        None => EntrySignature {
            name: entry.to_string(),
            params: Vec::new(),
            returns: Vec::new(),
        },
    }
}

/// Execute `entry` once under the given solver and generator. All
/// failures, including initialization failures from inconsistent axioms,
/// land in the returned test case.
pub fn execute_program<S: Solver, G: Generator>(
    program: &Preprocessed,
    solver: S,
    solve_passing: bool,
    generator: G,
    entry: &str,
    solver_bound: Option<i64>,
) -> TestCase {
    let mut engine = Engine::new(program, solver, generator, solve_passing, solver_bound);
    let outcome = engine.initialize().and_then(|_| engine.exec_entry(entry));
    let (memory, constraints) = engine.into_state();
    TestCase {
        signature: entry_signature(program, entry),
        memory,
        constraints,
        failure: outcome.err(),
    }
}

/// One execution with a random generator; convenience for the CLI.
pub fn execute_random(
    program: &Preprocessed,
    entry: &str,
    seed: u64,
    solver_bound: i64,
) -> TestCase {
    execute_program(
        program,
        EnumerativeSolver::with_bound(solver_bound),
        true,
        RandomGenerator::new(seed),
        entry,
        Some(solver_bound),
    )
}

// ─── Exhaustive sessions ───────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Hard cap on produced test cases; the session always terminates
    /// within this many executions.
    pub max_cases: usize,
    /// Value bound for the solver's models.
    pub solver_bound: i64,
    /// Bound for unbounded integer choices of the generator.
    pub integer_bound: i64,
    /// Concretize passing runs too (not just failing ones).
    pub solve_passing: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_cases: 64,
            solver_bound: 8,
            integer_bound: 4,
            solve_passing: true,
        }
    }
}

/// Depth-first enumeration of executions by generator choice prefixes.
///
/// Each finished run reports its choice log; every position after the
/// replayed prefix spawns sibling prefixes with the untried
/// alternatives. The search stops at `max_cases` regardless of the
/// program, so a bounded session always terminates.
pub fn run_session(program: &Preprocessed, entry: &str, options: &SessionOptions) -> Vec<TestCase> {
    let mut cases = Vec::new();
    let mut worklist: VecDeque<Vec<u64>> = VecDeque::new();
    worklist.push_back(Vec::new());

    while cases.len() < options.max_cases {
        let prefix = match worklist.pop_front() {
            Some(p) => p,
            None => break,
        };
        let (case, log) = run_with_prefix(program, entry, &prefix, options);
        cases.push(case);

        // Spawn siblings only past the replayed prefix so each choice
        // sequence is visited once
        let mut siblings: Vec<Vec<u64>> = Vec::new();
        for position in (prefix.len()..log.len()).rev() {
            let ChoicePoint {
                chosen,
                alternatives,
            } = log[position];
            let mut base: Vec<u64> = log[..position].iter().map(|c| c.chosen).collect();
            for alternative in (chosen + 1)..alternatives {
                base.push(alternative);
                siblings.push(base.clone());
                base.pop();
            }
        }
        for sibling in siblings.into_iter().rev() {
            worklist.push_front(sibling);
        }
    }
    cases
}

fn run_with_prefix(
    program: &Preprocessed,
    entry: &str,
    prefix: &[u64],
    options: &SessionOptions,
) -> (TestCase, Vec<ChoicePoint>) {
    let generator = ExhaustiveGenerator::new(prefix.to_vec(), options.integer_bound);
    let solver = EnumerativeSolver::with_bound(options.solver_bound);
    let mut engine = Engine::new(
        program,
        solver,
        generator,
        options.solve_passing,
        Some(options.solver_bound),
    );
    let outcome = engine.initialize().and_then(|_| engine.exec_entry(entry));
    let log = engine.generator().log().to_vec();
    let (memory, constraints) = engine.into_state();
    (
        TestCase {
            signature: entry_signature(program, entry),
            memory,
            constraints,
            failure: outcome.err(),
        },
        log,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(source: &str, entry: &str, max_cases: usize) -> Vec<TestCase> {
        let program = prepare_source(source).expect("program should prepare");
        run_session(
            &program,
            entry,
            &SessionOptions {
                max_cases,
                ..SessionOptions::default()
            },
        )
    }

    #[test]
    fn session_is_bounded() {
        // An if(*) fork doubles paths; the cap still holds
        let cases = session(
            "procedure p() { if (*) { assert true; } else { assert true; } }",
            "p",
            5,
        );
        assert!(!cases.is_empty());
        assert!(cases.len() <= 5);
    }

    #[test]
    fn straight_line_pass_is_single_case() {
        let cases = session("procedure p() { assert 1 + 1 == 2; }", "p", 16);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].verdict(), Verdict::Pass);
    }

    #[test]
    fn unknown_entry_is_nonexecutable() {
        let program = prepare_source("procedure p() { }").unwrap();
        let case = execute_random(&program, "missing", 1, 4);
        assert_eq!(case.verdict(), Verdict::Nonexecutable);
    }

    #[test]
    fn signature_is_reported() {
        let program =
            prepare_source("procedure q(x: int) returns (r: int) { r := x; }").unwrap();
        let case = execute_random(&program, "q", 1, 4);
        assert_eq!(case.signature.name, "q");
        assert_eq!(case.signature.params.len(), 1);
        assert_eq!(case.signature.returns.len(), 1);
    }
}
