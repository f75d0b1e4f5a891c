//! Bounded model finding by systematic enumeration.
//!
//! Assigns every logical reference and every ground selection atom a
//! value from its type's candidate stream (integers in the order 0, 1,
//! -1, 2, -2, …), walking the combination space odometer-style. A model
//! within the bound proves SAT; exhausting the space (or the step cap) is
//! reported as UNSAT, which is the same conservative reading the engine
//! applies to backend timeouts.

use std::collections::BTreeSet;

use num_bigint::BigInt;

use crate::engine::generator::integer_at;
use crate::engine::value::{Ref, Value};
use crate::syntax::ast::{Expr, Thunk, Type};

use super::{
    blocking_clause, collect_atoms, eval_ground, Assignment, SatResult, SelectKey, Solution,
    Solutions, Solver, SolverContext,
};

#[derive(Clone, Debug)]
pub struct EnumerativeSolver {
    /// Per-atom value bound: integers range over `[-bound, bound]`,
    /// opaque tags over `[0, bound]`.
    pub bound: i64,
    /// Cap on enumerated combinations per query.
    pub max_steps: usize,
}

impl Default for EnumerativeSolver {
    fn default() -> Self {
        Self {
            bound: 8,
            max_steps: 200_000,
        }
    }
}

impl EnumerativeSolver {
    pub fn with_bound(bound: i64) -> Self {
        Self {
            bound,
            ..Self::default()
        }
    }
}

/// Candidate values for one atom of the given type, smallest magnitude
/// first. Integer streams additionally carry the constants harvested
/// from the constraint set (and their neighbors), so bounds written in
/// the program stay reachable. Map-typed atoms are not enumerable;
/// constraints over them stay unrefuted.
fn candidates(ty: &Type, bound: i64, interesting: &BTreeSet<BigInt>) -> Vec<Value> {
    match ty {
        Type::Int => {
            let mut values: Vec<BigInt> = (0..=(2 * bound.max(0)) as u64)
                .map(integer_at)
                .collect();
            for c in interesting {
                for candidate in [c - 1, c.clone(), c + 1, -c] {
                    if !values.contains(&candidate) {
                        values.push(candidate);
                    }
                }
            }
            values.into_iter().map(Value::Int).collect()
        }
        Type::Bool => vec![Value::Bool(false), Value::Bool(true)],
        Type::Custom(name) => (0..=bound.max(0))
            .map(|tag| Value::Custom(name.clone(), BigInt::from(tag)))
            .collect(),
        Type::Map(_, _) => Vec::new(),
    }
}

/// Integer literals mentioned anywhere in the constraints.
fn harvest_constants(constraints: &[Thunk]) -> BTreeSet<BigInt> {
    let mut out = BTreeSet::new();
    for c in constraints {
        harvest_from(c, &mut out);
    }
    out
}

fn harvest_from(thunk: &Thunk, out: &mut BTreeSet<BigInt>) {
    match &thunk.node {
        Expr::Literal(Value::Int(n)) => {
            out.insert(n.clone());
        }
        Expr::Literal(_) | Expr::Var(_) | Expr::Logical(_, _) => {}
        Expr::Old(inner) | Expr::Unary(_, inner) => harvest_from(inner, out),
        Expr::Apply(callee, args) => {
            harvest_from(callee, out);
            for a in args {
                harvest_from(a, out);
            }
        }
        Expr::Update(m, args, new) => {
            harvest_from(m, out);
            for a in args {
                harvest_from(a, out);
            }
            harvest_from(new, out);
        }
        Expr::Binary(_, a, b) => {
            harvest_from(a, out);
            harvest_from(b, out);
        }
        Expr::IfElse(c, t, e) => {
            harvest_from(c, out);
            harvest_from(t, out);
            harvest_from(e, out);
        }
        Expr::Quantified(_, _, body) => harvest_from(body, out),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum AtomKey {
    Logical(Ref),
    Select(SelectKey),
}

struct Atoms {
    keys: Vec<AtomKey>,
    candidates: Vec<Vec<Value>>,
}

fn gather_atoms(constraints: &[Thunk], ctx: &SolverContext, bound: i64, all_ctx_refs: bool) -> Atoms {
    let (mut refs, selects) = collect_atoms(constraints, ctx);
    if all_ctx_refs {
        for (&r, ty) in &ctx.ref_types {
            refs.entry(r).or_insert_with(|| ty.clone());
        }
    }
    let interesting = harvest_constants(constraints);
    let mut keys = Vec::new();
    let mut cands = Vec::new();
    for (r, ty) in refs {
        let values = candidates(&ty, bound, &interesting);
        if !values.is_empty() {
            keys.push(AtomKey::Logical(r));
            cands.push(values);
        }
    }
    for (key, ty) in selects {
        let values = candidates(&ty, bound, &interesting);
        if !values.is_empty() {
            keys.push(AtomKey::Select(key));
            cands.push(values);
        }
    }
    Atoms {
        keys,
        candidates: cands,
    }
}

/// Odometer-style walk over the candidate streams.
struct Odometer {
    indices: Vec<usize>,
    fresh: bool,
    done: bool,
}

impl Odometer {
    fn new(len: usize) -> Self {
        Self {
            indices: vec![0; len],
            fresh: true,
            done: false,
        }
    }

    fn next(&mut self, widths: &[Vec<Value>]) -> Option<&[usize]> {
        if self.done {
            return None;
        }
        if self.fresh {
            self.fresh = false;
            return Some(&self.indices);
        }
        let mut carry = true;
        for i in (0..self.indices.len()).rev() {
            if carry {
                self.indices[i] += 1;
                if self.indices[i] >= widths[i].len() {
                    self.indices[i] = 0;
                } else {
                    carry = false;
                }
            }
        }
        if carry {
            self.done = true;
            return None;
        }
        Some(&self.indices)
    }
}

fn assignment_at(atoms: &Atoms, indices: &[usize]) -> Assignment {
    let mut assignment = Assignment::default();
    for (slot, key) in atoms.keys.iter().enumerate() {
        let value = atoms.candidates[slot][indices[slot]].clone();
        match key {
            AtomKey::Logical(r) => {
                assignment.refs.insert(*r, value);
            }
            AtomKey::Select(sel) => {
                assignment.selects.insert(sel.clone(), value);
            }
        }
    }
    assignment
}

/// True unless some constraint concretely evaluates to false. A thunk the
/// assignment cannot decide does not refute the model.
fn satisfies(constraints: &[Thunk], assignment: &Assignment) -> bool {
    constraints
        .iter()
        .all(|c| eval_ground(c, assignment) != Some(Value::Bool(false)))
}

impl Solver for EnumerativeSolver {
    fn check(
        &mut self,
        constraints: &[Thunk],
        _scopes: usize,
        ctx: &SolverContext,
    ) -> (SatResult, usize) {
        let new_scopes = constraints.len();
        if constraints.is_empty() {
            return (SatResult::Sat, new_scopes);
        }
        let atoms = gather_atoms(constraints, ctx, self.bound, false);
        let mut odo = Odometer::new(atoms.keys.len());
        let mut steps = 0;
        while let Some(indices) = odo.next(&atoms.candidates) {
            steps += 1;
            if steps > self.max_steps {
                break;
            }
            let assignment = assignment_at(&atoms, indices);
            if satisfies(constraints, &assignment) {
                return (SatResult::Sat, new_scopes);
            }
        }
        (SatResult::Unsat, new_scopes)
    }

    fn pick(
        &mut self,
        constraints: &[Thunk],
        _scopes: usize,
        ctx: &SolverContext,
        bound: Option<i64>,
        _minimal: bool,
    ) -> Solutions {
        // Enumeration order is smallest-magnitude-first already, so the
        // `minimal` request needs no separate strategy
        let bound = bound.unwrap_or(self.bound);
        let atoms = gather_atoms(constraints, ctx, bound, true);
        let len = atoms.keys.len();
        Box::new(ModelIter {
            atoms,
            odometer: Odometer::new(len),
            constraints: constraints.to_vec(),
            ctx: ctx.clone(),
            steps: 0,
            max_steps: self.max_steps,
        })
    }
}

struct ModelIter {
    atoms: Atoms,
    odometer: Odometer,
    /// Grows by one blocking clause per yielded model.
    constraints: Vec<Thunk>,
    ctx: SolverContext,
    steps: usize,
    max_steps: usize,
}

impl Iterator for ModelIter {
    type Item = Solution;

    fn next(&mut self) -> Option<Solution> {
        loop {
            let indices = self.odometer.next(&self.atoms.candidates)?.to_vec();
            self.steps += 1;
            if self.steps > self.max_steps {
                return None;
            }
            let assignment = assignment_at(&self.atoms, &indices);
            if !satisfies(&self.constraints, &assignment) {
                continue;
            }
            let solution: Solution = assignment.refs.clone();
            if let Some(clause) = blocking_clause(&solution, &self.ctx) {
                self.constraints.push(clause);
            }
            return Some(solution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{binary, lit};
    use crate::syntax::ast::{BinOp, Expr};
    use crate::syntax::span::{Span, Spanned};

    fn logical(ty: Type, r: Ref) -> Thunk {
        Spanned::synthetic(Expr::Logical(ty, r))
    }

    fn int_ctx(refs: &[Ref]) -> SolverContext {
        let mut ctx = SolverContext::default();
        for &r in refs {
            ctx.ref_types.insert(r, Type::Int);
        }
        ctx
    }

    #[test]
    fn empty_constraints_are_sat() {
        let mut solver = EnumerativeSolver::default();
        let (res, _) = solver.check(&[], 0, &SolverContext::default());
        assert_eq!(res, SatResult::Sat);
    }

    #[test]
    fn contradiction_is_unsat() {
        // ?0 == 1 && ?0 == 2
        let c1 = binary(BinOp::Eq, logical(Type::Int, 0), lit(Value::int(1), Span::synthetic()));
        let c2 = binary(BinOp::Eq, logical(Type::Int, 0), lit(Value::int(2), Span::synthetic()));
        let mut solver = EnumerativeSolver::default();
        let (res, _) = solver.check(&[c1, c2], 0, &int_ctx(&[0]));
        assert_eq!(res, SatResult::Unsat);
    }

    #[test]
    fn pick_finds_smallest_model_first() {
        // ?0 > 2 → first model should be 3
        let c = binary(BinOp::Gt, logical(Type::Int, 0), lit(Value::int(2), Span::synthetic()));
        let mut solver = EnumerativeSolver::default();
        let ctx = int_ctx(&[0]);
        let mut models = solver.pick(&[c], 0, &ctx, None, true);
        let first = models.next().unwrap();
        assert_eq!(first[&0], Value::int(3));
    }

    #[test]
    fn pick_enumerates_distinct_models() {
        // ?0 >= 0 && ?0 <= 2 → exactly {0, 1, 2}
        let lo = binary(BinOp::Ge, logical(Type::Int, 0), lit(Value::int(0), Span::synthetic()));
        let hi = binary(BinOp::Le, logical(Type::Int, 0), lit(Value::int(2), Span::synthetic()));
        let mut solver = EnumerativeSolver::default();
        let ctx = int_ctx(&[0]);
        let models: Vec<Solution> = solver.pick(&[lo, hi], 0, &ctx, None, false).collect();
        assert_eq!(models.len(), 3);
        let mut seen: Vec<i64> = models
            .iter()
            .map(|m| i64::try_from(m[&0].as_int().unwrap()).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn pick_assigns_unconstrained_refs_from_context() {
        let mut solver = EnumerativeSolver::default();
        let mut ctx = int_ctx(&[4]);
        ctx.ref_types.insert(5, Type::Bool);
        let mut models = solver.pick(&[], 0, &ctx, None, false);
        let model = models.next().unwrap();
        assert_eq!(model[&4], Value::int(0));
        assert_eq!(model[&5], Value::Bool(false));
    }

    #[test]
    fn pick_unsat_is_empty() {
        let c = binary(BinOp::Neq, logical(Type::Int, 0), logical(Type::Int, 0));
        let mut solver = EnumerativeSolver::default();
        let ctx = int_ctx(&[0]);
        assert!(solver.pick(&[c], 0, &ctx, None, false).next().is_none());
    }

    #[test]
    fn ground_selection_atoms_are_solved() {
        // m[1] == ?0 && ?0 == 5  →  model with ?0 = 5
        let map_ty = Type::Map(vec![Type::Int], Box::new(Type::Int));
        let sel = Spanned::synthetic(Expr::Apply(
            Box::new(lit(Value::MapRef(map_ty, 0), Span::synthetic())),
            vec![lit(Value::int(1), Span::synthetic())],
        ));
        let c1 = binary(BinOp::Eq, sel, logical(Type::Int, 0));
        let c2 = binary(BinOp::Eq, logical(Type::Int, 0), lit(Value::int(5), Span::synthetic()));
        let mut solver = EnumerativeSolver::default();
        let mut models = solver.pick(&[c1, c2], 0, &int_ctx(&[0]), None, false);
        let model = models.next().expect("model should exist");
        assert_eq!(model[&0], Value::int(5));
    }

    #[test]
    fn constants_beyond_bound_are_reachable() {
        // ?0 >= 100 has no model within the base stream; the harvested
        // constant 100 must make it reachable
        let c = binary(
            BinOp::Ge,
            logical(Type::Int, 0),
            lit(Value::int(100), Span::synthetic()),
        );
        let mut solver = EnumerativeSolver::default();
        let (res, _) = solver.check(&[c.clone()], 0, &int_ctx(&[0]));
        assert_eq!(res, SatResult::Sat);
        let model = solver
            .pick(&[c], 0, &int_ctx(&[0]), None, true)
            .next()
            .unwrap();
        assert!(model[&0].as_int().unwrap() >= &BigInt::from(100));
    }

    #[test]
    fn custom_values_enumerate_by_tag() {
        let c = binary(
            BinOp::Neq,
            logical(Type::Custom("T".into()), 0),
            logical(Type::Custom("T".into()), 1),
        );
        let mut ctx = SolverContext::default();
        ctx.ref_types.insert(0, Type::Custom("T".into()));
        ctx.ref_types.insert(1, Type::Custom("T".into()));
        let mut solver = EnumerativeSolver::default();
        let (res, _) = solver.check(&[c.clone()], 0, &ctx);
        assert_eq!(res, SatResult::Sat);
        let model = solver.pick(&[c], 0, &ctx, None, false).next().unwrap();
        assert_ne!(model[&0], model[&1]);
    }
}
