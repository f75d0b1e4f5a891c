//! The constraint manager: SAT checks after every statement, dirty-point
//! propagation, and materialization of solver models into memory.

use std::collections::BTreeMap;

use crate::engine::error::{EngineResult, Failure};
use crate::engine::expr;
use crate::engine::generator::Generator;
use crate::engine::memory::Region;
use crate::engine::value::{Ref, Value};
use crate::solver::{apply_binary, SatResult, Solver, SolverContext};
use crate::syntax::ast::{BinOp, Expr, QOp, Thunk, UnOp};
use crate::syntax::span::{Span, Spanned};

use super::exec::Engine;

impl<'p, S: Solver, G: Generator> Engine<'p, S, G> {
    /// The solver's view of the current state: path constraints, one
    /// instance fact per cached map point, and pins for already-solved
    /// references (later picks must agree with earlier ones).
    pub(crate) fn solver_constraints(&self) -> Vec<Thunk> {
        let span = Span::synthetic();
        let mut cs: Vec<Thunk> = self.cons.logical().to_vec();
        for r in 0..self.mem.map_count() {
            let ty = self.mem.map_type(r).clone();
            for (args, value) in self.mem.get_map_instance(r) {
                let selection = Spanned::new(
                    Expr::Apply(
                        Box::new(expr::lit(Value::MapRef(ty.clone(), r), span)),
                        args.iter().map(|v| expr::lit(v.clone(), span)).collect(),
                    ),
                    span,
                );
                cs.push(expr::binary(BinOp::Eq, selection, value.clone()));
            }
        }
        for (&r, v) in &self.mem.solution {
            if let Some(ty) = self.mem.ref_type(r) {
                let logical = Spanned::new(Expr::Logical(ty.clone(), r), span);
                cs.push(expr::binary(BinOp::Eq, logical, expr::lit(v.clone(), span)));
            }
        }
        cs
    }

    pub(crate) fn solver_context(&self) -> SolverContext {
        SolverContext {
            ref_types: self.mem.ref_types().clone(),
        }
    }

    /// Drive the store to a checked fixpoint: while anything changed,
    /// ask the solver; on SAT, propagate one queued point and repeat.
    /// UNSAT refutes the whole path at `pos`.
    pub(crate) fn check_sat(&mut self, pos: Span) -> EngineResult<()> {
        if !self.cons.changed && !self.cons.has_queued_points() {
            return Ok(());
        }
        loop {
            if self.cons.changed {
                let cs = self.solver_constraints();
                let ctx = self.solver_context();
                let (result, scopes) = self.solver.check(&cs, self.scopes, &ctx);
                self.scopes = scopes;
                if result == SatResult::Unsat {
                    return Err(Failure::unreachable(pos));
                }
                self.cons.changed = false;
            }
            match self.cons.dequeue_point() {
                Some((r, args)) => self.apply_point(r, args)?,
                None => return Ok(()),
            }
        }
    }

    /// Instantiate every constraint of map `r` at the point `args`.
    /// Unguarded constraints are assumed outright. Guarded ones are
    /// enabled nondeterministically, least-used cases offered first,
    /// ties rotated by the generator; an enabled case assumes its guard
    /// and body, a disabled one assumes the guard's negation.
    fn apply_point(&mut self, r: Ref, args: Vec<Value>) -> EngineResult<()> {
        let constraints = self.cons.map_constraints(r).to_vec();
        let mut unguarded: Vec<Thunk> = Vec::new();
        let mut guarded: Vec<(usize, Thunk, Thunk)> = Vec::new();

        for (index, constraint) in constraints.iter().enumerate() {
            let instance = instantiate(constraint, &args);
            match instance {
                Spanned {
                    node: Expr::Binary(BinOp::Implies, guard, body),
                    ..
                } => guarded.push((index, *guard, *body)),
                other => unguarded.push(other),
            }
        }

        for instance in unguarded {
            let v = self.eval(&instance)?;
            self.cons.extend_logical(v)?;
        }

        guarded.sort_by_key(|(index, _, _)| self.cons.case_count(r, *index));
        rotate_ties(&mut guarded, |index| self.cons.case_count(r, index), &mut self.gen);

        for (index, guard, body) in guarded {
            if self.gen.gen_bool() {
                let g = self.eval(&guard)?;
                self.cons.extend_logical(g)?;
                let b = self.eval(&body)?;
                self.cons.extend_logical(b)?;
                self.cons.bump_case(r, index);
            } else {
                let g = self.eval(&expr::not(guard))?;
                self.cons.extend_logical(g)?;
            }
        }
        Ok(())
    }

    /// Check, pick one model, and fold it into the visible state: the
    /// solution is merged into memory and every store entry, cached map
    /// point, and stored map-constraint body is rewritten so solved
    /// references read as their concrete values.
    ///
    /// Re-evaluation can mint new unknowns (a division whose divisor
    /// turned out zero becomes a fresh unconstrained integer), so the
    /// pick-resolve-reevaluate cycle repeats until the stores are
    /// literal.
    pub(crate) fn solve_and_concretize(&mut self, pos: Span) -> EngineResult<()> {
        self.check_sat(pos)?;
        for _ in 0..MAX_CONCRETIZE_ROUNDS {
            let cs = self.solver_constraints();
            let ctx = self.solver_context();
            let mut models = self
                .solver
                .pick(&cs, self.scopes, &ctx, self.solver_bound, true);
            let model = match models.next() {
                Some(model) => model,
                None => return Err(Failure::unreachable(pos)),
            };
            drop(models);
            self.mem.merge_solution(model);
            let solution = self.mem.solution.clone();
            self.mem.rewrite_all(|t| resolve(t, &solution));
            self.cons.rewrite_map_constraints(|t| resolve(t, &solution));
            if self.reevaluate_stores(pos)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Push every remaining non-literal store entry back through the
    /// evaluator. Returns true when all visible entries are literal.
    fn reevaluate_stores(&mut self, _pos: Span) -> EngineResult<bool> {
        let mut pending: Vec<(Region, String, Thunk)> = Vec::new();
        for region in [
            Region::Locals,
            Region::Globals,
            Region::Old,
            Region::Constants,
        ] {
            for (name, thunk) in self.mem.store(region) {
                if !thunk.node.is_literal() {
                    pending.push((region, name.clone(), thunk.clone()));
                }
            }
        }
        if pending.is_empty() {
            return Ok(true);
        }
        let mut all_literal = true;
        for (region, name, thunk) in pending {
            let v = self.eval(&thunk)?;
            all_literal &= v.node.is_literal();
            self.mem.set_var(region, &name, v);
        }
        Ok(all_literal)
    }
}

const MAX_CONCRETIZE_ROUNDS: usize = 8;

/// Apply a parametric constraint (a lambda) at a concrete point by
/// substituting its formals. A non-lambda constraint is closed already.
fn instantiate(constraint: &Thunk, args: &[Value]) -> Thunk {
    match &constraint.node {
        Expr::Quantified(QOp::Lambda, formals, body) => {
            let mut binding: BTreeMap<String, Thunk> = BTreeMap::new();
            for (formal, value) in formals.iter().zip(args) {
                binding.insert(
                    formal.name.clone(),
                    expr::lit(value.clone(), constraint.span),
                );
            }
            expr::substitute(body, &binding)
        }
        _ => constraint.clone(),
    }
}

/// Rotate each group of equal-count cases by a generator index so tie
/// order is a nondeterministic choice.
fn rotate_ties<G: Generator>(
    cases: &mut [(usize, Thunk, Thunk)],
    count_of: impl Fn(usize) -> u64,
    gen: &mut G,
) {
    let mut start = 0;
    while start < cases.len() {
        let count = count_of(cases[start].0);
        let mut end = start + 1;
        while end < cases.len() && count_of(cases[end].0) == count {
            end += 1;
        }
        if end - start > 1 {
            let k = gen.gen_index(end - start);
            cases[start..end].rotate_left(k);
        }
        start = end;
    }
}

/// Pure structural rewriting: substitute solved logical references and
/// fold ground operators. Never consults the generator, so it is safe on
/// stored quantified bodies. Folding stops where semantics require the
/// evaluator (zero divisors, map equality between distinct references).
pub(crate) fn resolve(thunk: &Thunk, solution: &BTreeMap<Ref, Value>) -> Thunk {
    let span = thunk.span;
    match &thunk.node {
        Expr::Literal(_) | Expr::Var(_) => thunk.clone(),
        Expr::Logical(_, r) => match solution.get(r) {
            Some(v) => expr::lit(v.clone(), span),
            None => thunk.clone(),
        },
        Expr::Old(inner) => {
            Spanned::new(Expr::Old(Box::new(resolve(inner, solution))), span)
        }
        Expr::Apply(callee, args) => Spanned::new(
            Expr::Apply(
                Box::new(resolve(callee, solution)),
                args.iter().map(|a| resolve(a, solution)).collect(),
            ),
            span,
        ),
        Expr::Update(m, args, new) => Spanned::new(
            Expr::Update(
                Box::new(resolve(m, solution)),
                args.iter().map(|a| resolve(a, solution)).collect(),
                Box::new(resolve(new, solution)),
            ),
            span,
        ),
        Expr::Unary(op, operand) => {
            let inner = resolve(operand, solution);
            match (op, inner.node.as_literal()) {
                (UnOp::Neg, Some(Value::Int(n))) => expr::lit(Value::Int(-n.clone()), span),
                (UnOp::Not, Some(Value::Bool(b))) => expr::lit(Value::Bool(!b), span),
                _ => Spanned::new(Expr::Unary(*op, Box::new(inner)), span),
            }
        }
        Expr::Binary(op, left, right) => {
            let l = resolve(left, solution);
            let r = resolve(right, solution);
            if let (Some(lv), Some(rv)) = (l.node.as_literal(), r.node.as_literal()) {
                let foldable = match (op, lv, rv) {
                    // Distinct same-typed map references may still be
                    // extensionally equal; leave that to the evaluator
                    (BinOp::Eq | BinOp::Neq, Value::MapRef(lt, lr), Value::MapRef(rt, rr)) => {
                        lr == rr || lt != rt
                    }
                    (BinOp::Div | BinOp::Mod, _, Value::Int(d)) => {
                        use num_traits::Zero;
                        !d.is_zero()
                    }
                    _ => true,
                };
                if foldable {
                    if let Some(v) = apply_binary(*op, lv, rv) {
                        return expr::lit(v, span);
                    }
                }
            }
            Spanned::new(Expr::Binary(*op, Box::new(l), Box::new(r)), span)
        }
        Expr::IfElse(c, t, e) => {
            let c = resolve(c, solution);
            match c.node.as_bool() {
                Some(true) => resolve(t, solution),
                Some(false) => resolve(e, solution),
                None => Spanned::new(
                    Expr::IfElse(
                        Box::new(c),
                        Box::new(resolve(t, solution)),
                        Box::new(resolve(e, solution)),
                    ),
                    span,
                ),
            }
        }
        Expr::Quantified(q, vars, body) => Spanned::new(
            Expr::Quantified(*q, vars.clone(), Box::new(resolve(body, solution))),
            span,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{binary, lit, var};
    use crate::engine::value::Value;
    use crate::syntax::ast::{Type, TypedVar};

    fn sp() -> Span {
        Span::synthetic()
    }

    #[test]
    fn resolve_substitutes_and_folds() {
        let mut solution = BTreeMap::new();
        solution.insert(0usize, Value::int(4));
        let e = binary(
            BinOp::Add,
            Spanned::synthetic(Expr::Logical(Type::Int, 0)),
            lit(Value::int(1), sp()),
        );
        let resolved = resolve(&e, &solution);
        assert_eq!(resolved.node.as_literal(), Some(&Value::int(5)));
    }

    #[test]
    fn resolve_leaves_unsolved_refs() {
        let solution = BTreeMap::new();
        let e = Spanned::synthetic(Expr::Logical(Type::Int, 3));
        let resolved = resolve(&e, &solution);
        assert!(matches!(resolved.node, Expr::Logical(_, 3)));
    }

    #[test]
    fn resolve_does_not_fold_distinct_map_equality() {
        let ty = Type::Map(vec![Type::Int], Box::new(Type::Int));
        let e = binary(
            BinOp::Eq,
            lit(Value::MapRef(ty.clone(), 0), sp()),
            lit(Value::MapRef(ty, 1), sp()),
        );
        let resolved = resolve(&e, &BTreeMap::new());
        // Stays symbolic: extensional equality is the evaluator's call
        assert!(!resolved.node.is_literal());
    }

    #[test]
    fn resolve_does_not_fold_zero_divisor() {
        let e = binary(
            BinOp::Div,
            lit(Value::int(7), sp()),
            lit(Value::int(0), sp()),
        );
        let resolved = resolve(&e, &BTreeMap::new());
        assert!(!resolved.node.is_literal());
    }

    #[test]
    fn resolve_descends_under_quantifiers() {
        let mut solution = BTreeMap::new();
        solution.insert(1usize, Value::int(9));
        let body = binary(
            BinOp::Gt,
            var("x", sp()),
            Spanned::synthetic(Expr::Logical(Type::Int, 1)),
        );
        let q = Spanned::synthetic(Expr::Quantified(
            QOp::Forall,
            vec![TypedVar::new("x", Type::Int)],
            Box::new(body),
        ));
        let resolved = resolve(&q, &solution);
        match &resolved.node {
            Expr::Quantified(_, _, inner) => {
                assert_eq!(expr::format_thunk(inner), "(x > 9)");
            }
            other => panic!("expected quantifier, got {:?}", other),
        }
    }

    #[test]
    fn instantiate_binds_lambda_formals() {
        let body = binary(
            BinOp::Ge,
            var("$q0", sp()),
            lit(Value::int(0), sp()),
        );
        let lambda = Spanned::synthetic(Expr::Quantified(
            QOp::Lambda,
            vec![TypedVar::new("$q0", Type::Int)],
            Box::new(body),
        ));
        let inst = instantiate(&lambda, &[Value::int(7)]);
        assert_eq!(expr::format_thunk(&inst), "(7 >= 0)");
    }
}
