//! The trivial solver: no constraint reasoning at all.
//!
//! `check` answers SAT for any constraint set. That is deliberately
//! unsound as a satisfiability oracle; it is only safe on the pick path
//! with an empty constraint set, where the engine merely needs arbitrary
//! values of the right types. The engine detects inconsistencies itself
//! when the picked values make some later literal evaluation fail.

use num_bigint::BigInt;

use crate::engine::generator::Generator;
use crate::engine::value::Value;
use crate::syntax::ast::{Thunk, Type};

use super::{SatResult, Solution, Solutions, Solver, SolverContext};

pub struct TrivialSolver<G: Generator> {
    gen: G,
    /// Magnitude bound for generated integers; `None` leaves the bound
    /// to the generator.
    pub bound: Option<i64>,
}

impl<G: Generator> TrivialSolver<G> {
    pub fn new(gen: G, bound: Option<i64>) -> Self {
        Self { gen, bound }
    }

    fn generate(&mut self, ty: &Type) -> Option<Value> {
        match ty {
            Type::Int => Some(Value::Int(self.gen.gen_integer(self.bound))),
            Type::Bool => Some(Value::Bool(self.gen.gen_bool())),
            Type::Custom(name) => {
                let tag = self.gen.gen_integer(self.bound);
                // Tags are non-negative so distinct picks stay dense
                let tag = if tag < BigInt::from(0) { -tag } else { tag };
                Some(Value::Custom(name.clone(), tag))
            }
            Type::Map(_, _) => None,
        }
    }
}

impl<G: Generator> Solver for TrivialSolver<G> {
    fn check(
        &mut self,
        _constraints: &[Thunk],
        scopes: usize,
        _ctx: &SolverContext,
    ) -> (SatResult, usize) {
        // Unconditionally SAT; see the module docs for the contract
        (SatResult::Sat, scopes)
    }

    fn pick(
        &mut self,
        _constraints: &[Thunk],
        _scopes: usize,
        ctx: &SolverContext,
        bound: Option<i64>,
        _minimal: bool,
    ) -> Solutions {
        if let Some(b) = bound {
            self.bound = Some(b);
        }
        let mut solution = Solution::new();
        for (&r, ty) in &ctx.ref_types {
            if let Some(value) = self.generate(&ty.clone()) {
                solution.insert(r, value);
            }
        }
        Box::new(std::iter::once(solution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{binary, ff, lit};
    use crate::engine::generator::RandomGenerator;
    use crate::syntax::ast::{BinOp, Expr};
    use crate::syntax::span::{Span, Spanned};

    fn ctx_of(types: &[(usize, Type)]) -> SolverContext {
        let mut ctx = SolverContext::default();
        for (r, ty) in types {
            ctx.ref_types.insert(*r, ty.clone());
        }
        ctx
    }

    #[test]
    fn check_is_always_sat_even_on_false() {
        let mut solver = TrivialSolver::new(RandomGenerator::new(1), Some(4));
        let (res, scopes) = solver.check(&[ff(Span::synthetic())], 3, &SolverContext::default());
        assert_eq!(res, SatResult::Sat);
        assert_eq!(scopes, 3);
    }

    #[test]
    fn pick_assigns_every_enumerable_ref() {
        let mut solver = TrivialSolver::new(RandomGenerator::new(7), Some(4));
        let ctx = ctx_of(&[
            (0, Type::Int),
            (1, Type::Bool),
            (2, Type::Custom("T".into())),
            (3, Type::Map(vec![Type::Int], Box::new(Type::Int))),
        ]);
        let model = solver.pick(&[], 0, &ctx, None, false).next().unwrap();
        assert!(matches!(model.get(&0), Some(Value::Int(_))));
        assert!(matches!(model.get(&1), Some(Value::Bool(_))));
        assert!(matches!(model.get(&2), Some(Value::Custom(_, _))));
        // Map-typed refs are not assignable by value generation
        assert!(!model.contains_key(&3));
    }

    #[test]
    fn pick_ignores_constraints_entirely() {
        // The documented contract: constraints do not influence the pick
        let mut solver = TrivialSolver::new(RandomGenerator::new(7), Some(0));
        let ctx = ctx_of(&[(0, Type::Int)]);
        let c = binary(
            BinOp::Eq,
            Spanned::synthetic(Expr::Logical(Type::Int, 0)),
            lit(Value::int(99), Span::synthetic()),
        );
        let model = solver.pick(&[c], 0, &ctx, None, false).next().unwrap();
        // bound 0 forces the only generable integer, 0 — not 99
        assert_eq!(model[&0], Value::int(0));
    }

    #[test]
    fn bound_parameter_overrides_default() {
        let mut solver = TrivialSolver::new(RandomGenerator::new(3), Some(1000));
        let ctx = ctx_of(&[(0, Type::Int)]);
        for _ in 0..20 {
            let model = solver.pick(&[], 0, &ctx, Some(2), false).next().unwrap();
            let v = i64::try_from(model[&0].as_int().unwrap()).unwrap();
            assert!((-2..=2).contains(&v));
        }
    }
}
