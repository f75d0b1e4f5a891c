//! End-to-end engine scenarios: parse a program, enumerate executions,
//! and check the verdicts.

use crate::api::{execute_random, prepare_source, run_session, SessionOptions, TestCase, Verdict};
use crate::engine::exec::Engine;
use crate::engine::expr::lit;
use crate::engine::generator::RandomGenerator;
use crate::engine::memory::Region;
use crate::engine::value::Value;
use crate::solver::enumerative::EnumerativeSolver;
use crate::syntax::span::Span;

fn session(source: &str, entry: &str) -> Vec<TestCase> {
    let program = prepare_source(source).expect("program should prepare");
    run_session(&program, entry, &SessionOptions::default())
}

fn verdicts(cases: &[TestCase]) -> Vec<Verdict> {
    cases.iter().map(|c| c.verdict()).collect()
}

fn has(cases: &[TestCase], verdict: Verdict) -> bool {
    cases.iter().any(|c| c.verdict() == verdict)
}

// ─── Scenarios ─────────────────────────────────────────────────────

#[test]
fn havoc_and_assert_never_fails() {
    // x*x >= 0 holds for every integer: no generator choice can produce
    // a concrete failing run
    let cases = session(
        "procedure p() { var x: int; havoc x; assert x * x >= 0; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn division_by_zero_is_not_a_failure() {
    let cases = session(
        "procedure p() returns (r: int) {\n\
           var a, b: int;\n\
           havoc a; havoc b;\n\
           r := a div b;\n\
         }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
    // Passing runs come out fully concretized, r included
    let pass = cases.iter().find(|c| c.verdict() == Verdict::Pass).unwrap();
    let r = pass.memory.get_var(Region::Locals, "r").expect("r published");
    assert!(
        matches!(r.node.as_literal(), Some(Value::Int(_))),
        "r = {:?}",
        r
    );
}

#[test]
fn violated_precondition_fails_at_the_call() {
    let cases = session(
        "procedure q(x: int) requires x > 0; { }\n\
         procedure main() { call q(-1); }",
        "main",
    );
    let failing = cases
        .iter()
        .find(|c| c.verdict() == Verdict::Fail)
        .expect("a failing case");
    let failure = failing.failure.as_ref().unwrap();
    let text = failure.to_string();
    assert!(text.contains("precondition"), "got: {}", text);
    assert!(
        failure.trace.iter().any(|f| f.procedure == "q"),
        "missing stack frame: {}",
        text
    );
}

#[test]
fn contradictory_uniqueness_axiom_is_invalid() {
    let cases = session(
        "type T;\n\
         const unique a, b: T;\n\
         axiom a == b;\n\
         procedure p() { }",
        "p",
    );
    assert!(!cases.is_empty());
    assert!(
        cases.iter().all(|c| c.verdict() == Verdict::Invalid),
        "verdicts: {:?}",
        verdicts(&cases)
    );
}

#[test]
fn believed_map_axiom_carries_to_points() {
    let cases = session(
        "var m: [int]int;\n\
         axiom (forall i: int :: m[i] >= 0);\n\
         procedure p() { assert m[7] >= 0; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn map_axiom_counterexample_branches_are_well_defined() {
    // Asserting m[7] < 0 against the axiom: depending on how the
    // universal and the assertion were sampled the case is invalid or a
    // concrete failure; every case must reach one of those two verdicts
    let cases = session(
        "var m: [int]int;\n\
         axiom (forall i: int :: m[i] >= 0);\n\
         procedure p() { assert m[7] < 0; }",
        "p",
    );
    assert!(!cases.is_empty());
    assert!(
        cases
            .iter()
            .all(|c| matches!(c.verdict(), Verdict::Invalid | Verdict::Fail)),
        "verdicts: {:?}",
        verdicts(&cases)
    );
    assert!(has(&cases, Verdict::Fail) || has(&cases, Verdict::Invalid));
}

// ─── Properties ────────────────────────────────────────────────────

#[test]
fn literal_evaluation_is_idempotent() {
    let program = prepare_source("procedure p() { }").unwrap();
    let solver = EnumerativeSolver::default();
    let gen = RandomGenerator::new(11);
    let mut engine = Engine::new(&program, solver, gen, false, None);
    for value in [Value::int(42), Value::int(-3), Value::Bool(true)] {
        let thunk = lit(value, Span::synthetic());
        let before_refs = engine.memory().ref_types().len();
        let result = engine.eval(&thunk).unwrap();
        assert_eq!(result, thunk);
        assert_eq!(engine.memory().ref_types().len(), before_refs);
    }
}

#[test]
fn conflicting_equalities_are_unreachable() {
    let cases = session(
        "procedure p() { var x: int; assume x == 1; assume x == 2; }",
        "p",
    );
    assert!(
        cases.iter().all(|c| c.verdict() == Verdict::Invalid),
        "verdicts: {:?}",
        verdicts(&cases)
    );
}

#[test]
fn update_reads_back_and_preserves_other_points() {
    let cases = session(
        "var m: [int]int;\n\
         procedure p() {\n\
           var m2: [int]int;\n\
           m2 := m[3 := 42];\n\
           assert m2[3] == 42;\n\
           assert m2[1] == m[1];\n\
         }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn falsified_universal_produces_a_witness() {
    // forall i :: i >= 0 is false; a sampled counterexample must end in
    // a concrete failing run whose solution holds a negative witness
    let cases = session("procedure p() { assert (forall i: int :: i >= 0); }", "p");
    let failing = cases
        .iter()
        .find(|c| c.verdict() == Verdict::Fail)
        .expect("a failing case with a counterexample");
    let negative = failing
        .memory
        .solution
        .values()
        .any(|v| matches!(v, Value::Int(n) if n < &num_bigint::BigInt::from(0)));
    assert!(negative, "solution: {:?}", failing.memory.solution);
}

#[test]
fn concretized_pass_leaves_only_literals() {
    let program = prepare_source(
        "var g: int;\n\
         procedure p() returns (r: int) {\n\
           var x: int;\n\
           havoc x;\n\
           g := g + x;\n\
           r := x * 2;\n\
         }",
    )
    .unwrap();
    let case = execute_random(&program, "p", 3, 8);
    assert_eq!(case.verdict(), Verdict::Pass);
    for region in [Region::Locals, Region::Globals, Region::Old, Region::Constants] {
        for (name, thunk) in case.memory.store(region) {
            assert!(
                thunk.node.is_literal(),
                "{:?} entry {} is not literal: {:?}",
                region,
                name,
                thunk
            );
        }
    }
}

// ─── Engine behaviors beyond the numbered scenarios ────────────────

#[test]
fn postcondition_violation_is_a_failure() {
    let cases = session(
        "procedure p() returns (r: int) ensures r > 0; { r := 0; }",
        "p",
    );
    let failing = cases
        .iter()
        .find(|c| c.verdict() == Verdict::Fail)
        .expect("postcondition failure");
    let text = failing.failure.as_ref().unwrap().to_string();
    assert!(text.contains("postcondition"), "got: {}", text);
}

#[test]
fn entry_preconditions_constrain_generated_inputs() {
    // The entry's requires is assumed: x > 0 must hold in every passing
    // run's witness
    let cases = session(
        "procedure p(x: int) returns (r: int) requires x > 0; { r := x; assert r > 0; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass));
    assert!(!has(&cases, Verdict::Fail));
    for case in cases.iter().filter(|c| c.verdict() == Verdict::Pass) {
        let x = case.memory.get_var(Region::Locals, "x").expect("x published");
        match x.node.as_literal() {
            Some(Value::Int(n)) => assert!(n > &num_bigint::BigInt::from(0)),
            other => panic!("x not concretized: {:?}", other),
        }
    }
}

#[test]
fn declarative_procedure_defines_outputs_by_contract() {
    // No body: the callee's assumed postcondition still pins the result
    let cases = session(
        "procedure magic() returns (r: int); ensures r == 7;\n\
         procedure main() returns (out: int) {\n\
           call out := magic();\n\
           assert out == 7;\n\
         }",
        "main",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn old_values_survive_modification() {
    let cases = session(
        "var g: int;\n\
         procedure p() modifies g; ensures g == old(g) + 1; { g := g + 1; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn broken_old_contract_fails() {
    let cases = session(
        "var g: int;\n\
         procedure p() modifies g; ensures g == old(g) + 1; { g := g + 2; }",
        "p",
    );
    assert!(has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn where_clauses_bind_on_materialization() {
    let cases = session(
        "var g: int where g >= 10;\n\
         procedure p() { assert g >= 10; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn loop_with_invariant_terminates_and_passes() {
    let cases = session(
        "procedure p() returns (s: int) {\n\
           var i: int;\n\
           s := 0; i := 0;\n\
           while (i < 3) invariant s >= 0; { s := s + i; i := i + 1; }\n\
           assert s == 3;\n\
         }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn function_macros_unfold_at_call_sites() {
    let cases = session(
        "function double(x: int): int { x + x }\n\
         procedure p() { assert double(4) == 8; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass));
    assert!(!has(&cases, Verdict::Fail));
}

#[test]
fn lambda_defines_a_usable_map() {
    let cases = session(
        "procedure p() {\n\
           var f: [int]int;\n\
           f := (lambda x: int :: x + 1);\n\
           assert f[4] == 5;\n\
         }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}

#[test]
fn nondeterministic_if_explores_both_arms() {
    let cases = session(
        "procedure p() returns (r: int) {\n\
           if (*) { r := 1; } else { r := 2; }\n\
         }",
        "p",
    );
    let outcomes: std::collections::BTreeSet<String> = cases
        .iter()
        .filter(|c| c.verdict() == Verdict::Pass)
        .filter_map(|c| c.memory.get_var(Region::Locals, "r"))
        .map(crate::engine::expr::format_thunk)
        .collect();
    assert!(
        outcomes.contains("1") && outcomes.contains("2"),
        "outcomes: {:?}",
        outcomes
    );
}

#[test]
fn assert_after_assume_false_is_unreachable_not_fail() {
    let cases = session("procedure p() { assume false; assert false; }", "p");
    assert!(
        cases.iter().all(|c| c.verdict() == Verdict::Invalid),
        "verdicts: {:?}",
        verdicts(&cases)
    );
}

#[test]
fn map_equality_of_identical_refs_is_true() {
    let cases = session(
        "var m: [int]int;\n\
         procedure p() { assert m == m; }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass));
    assert!(!has(&cases, Verdict::Fail));
}

#[test]
fn goto_retries_infeasible_successors() {
    // One successor assumes false; the executor must fall over to the
    // feasible sibling instead of reporting the whole run invalid
    let cases = session(
        "procedure p() returns (r: int) {\n\
           goto a, b;\n\
           a: assume false; r := 1; return;\n\
           b: r := 2; return;\n\
         }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    let pass = cases.iter().find(|c| c.verdict() == Verdict::Pass).unwrap();
    let r = pass.memory.get_var(Region::Locals, "r").unwrap();
    assert_eq!(crate::engine::expr::format_thunk(r), "2");
}

#[test]
fn modulo_follows_euclidean_convention() {
    let cases = session(
        "procedure p() {\n\
           assert 7 mod 2 == 1;\n\
           assert -7 mod 2 == 1;\n\
           assert 7 div -2 == -3;\n\
           assert -7 div -2 == 4;\n\
         }",
        "p",
    );
    assert!(has(&cases, Verdict::Pass), "verdicts: {:?}", verdicts(&cases));
    assert!(!has(&cases, Verdict::Fail), "verdicts: {:?}", verdicts(&cases));
}
