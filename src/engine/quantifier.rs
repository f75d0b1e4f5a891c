//! Quantifier normalization and parametric map-constraint extraction.
//!
//! A believed universal must be turned into constraints the point queue
//! can instantiate: for every map selection `r[args]` reachable under the
//! quantifier, a guarded lambda `λ formals. guards ==> body` is attached
//! to `r`. Arguments that are bound variables become formals directly;
//! fixed arguments become fresh formals pinned by an equality side guard;
//! a selection whose argument mixes bound variables into a larger term
//! yields nothing. Existentials are opaque to extraction.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::error::EngineResult;
use crate::engine::expr;
use crate::engine::generator::Generator;
use crate::engine::value::{Ref, Value};
use crate::solver::Solver;
use crate::syntax::ast::{BinOp, Expr, QOp, Thunk, Type, TypedVar, UnOp};
use crate::syntax::span::Spanned;

use super::exec::Engine;

// ─── Negation-normal form ──────────────────────────────────────────

/// Push negations inward, flipping connectives, quantifiers, and
/// comparisons. Non-formula leaves are negated syntactically.
pub(crate) fn normalize(thunk: &Thunk, negate: bool) -> Thunk {
    let span = thunk.span;
    match &thunk.node {
        Expr::Unary(UnOp::Not, inner) => normalize(inner, !negate),
        Expr::Binary(BinOp::And, a, b) => {
            let op = if negate { BinOp::Or } else { BinOp::And };
            expr::binary(op, normalize(a, negate), normalize(b, negate))
        }
        Expr::Binary(BinOp::Or, a, b) => {
            let op = if negate { BinOp::And } else { BinOp::Or };
            expr::binary(op, normalize(a, negate), normalize(b, negate))
        }
        // a ==> b  ≡  !a || b
        Expr::Binary(BinOp::Implies, a, b) => {
            let op = if negate { BinOp::And } else { BinOp::Or };
            expr::binary(op, normalize(a, !negate), normalize(b, negate))
        }
        // a <== b  ≡  a || !b
        Expr::Binary(BinOp::Explies, a, b) => {
            let op = if negate { BinOp::And } else { BinOp::Or };
            expr::binary(op, normalize(a, negate), normalize(b, !negate))
        }
        // a <==> b  ≡  (!a || b) && (!b || a); negation dualizes
        Expr::Binary(BinOp::Iff, a, b) => {
            let (outer, inner) = if negate {
                (BinOp::Or, BinOp::And)
            } else {
                (BinOp::And, BinOp::Or)
            };
            let forward = expr::binary(inner, normalize(a, !negate), normalize(b, negate));
            let backward = expr::binary(inner, normalize(b, !negate), normalize(a, negate));
            expr::binary(outer, forward, backward)
        }
        Expr::Binary(op @ (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Neq), a, b) => {
            let flipped = if negate { flip_comparison(*op) } else { *op };
            Spanned::new(
                Expr::Binary(flipped, a.clone(), b.clone()),
                span,
            )
        }
        Expr::Quantified(QOp::Forall, vars, body) => {
            let q = if negate { QOp::Exists } else { QOp::Forall };
            Spanned::new(
                Expr::Quantified(q, vars.clone(), Box::new(normalize(body, negate))),
                span,
            )
        }
        Expr::Quantified(QOp::Exists, vars, body) => {
            let q = if negate { QOp::Forall } else { QOp::Exists };
            Spanned::new(
                Expr::Quantified(q, vars.clone(), Box::new(normalize(body, negate))),
                span,
            )
        }
        Expr::Literal(Value::Bool(b)) => {
            if negate {
                expr::lit(Value::Bool(!b), span)
            } else {
                thunk.clone()
            }
        }
        _ => {
            if negate {
                expr::not(thunk.clone())
            } else {
                thunk.clone()
            }
        }
    }
}

fn flip_comparison(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Ge,
        BinOp::Le => BinOp::Gt,
        BinOp::Gt => BinOp::Le,
        BinOp::Ge => BinOp::Lt,
        BinOp::Eq => BinOp::Neq,
        BinOp::Neq => BinOp::Eq,
        other => other,
    }
}

// ─── Extraction ────────────────────────────────────────────────────

impl<'p, S: Solver, G: Generator> Engine<'p, S, G> {
    /// Extract the parametric map constraints a believed universal
    /// imposes: one `(map, lambda)` pair per simplicizable selection.
    pub(crate) fn extract_forall(
        &mut self,
        vars: &[TypedVar],
        body: &Thunk,
    ) -> EngineResult<Vec<(Ref, Thunk)>> {
        let normalized = normalize(body, false);
        let mut bound: BTreeMap<String, Type> = vars
            .iter()
            .map(|v| (v.name.clone(), v.ty.clone()))
            .collect();
        let mut out = Vec::new();
        self.extract_walk(&mut bound, &[], &normalized, &mut out)?;
        Ok(out)
    }

    fn extract_walk(
        &mut self,
        bound: &mut BTreeMap<String, Type>,
        guards: &[Thunk],
        formula: &Thunk,
        out: &mut Vec<(Ref, Thunk)>,
    ) -> EngineResult<()> {
        match &formula.node {
            Expr::Quantified(QOp::Forall, vars, body) => {
                let mut shadowed = Vec::new();
                for v in vars {
                    shadowed.push((v.name.clone(), bound.insert(v.name.clone(), v.ty.clone())));
                }
                self.extract_walk(bound, guards, body, out)?;
                for (name, prior) in shadowed.into_iter().rev() {
                    match prior {
                        Some(ty) => {
                            bound.insert(name, ty);
                        }
                        None => {
                            bound.remove(&name);
                        }
                    }
                }
                Ok(())
            }
            // Existentials are opaque: nothing is extracted beneath them
            Expr::Quantified(QOp::Exists, _, _) => Ok(()),
            Expr::Binary(BinOp::And, a, b) => {
                self.extract_walk(bound, guards, a, out)?;
                self.extract_walk(bound, guards, b, out)
            }
            // a || b holds when either side does: extract each side under
            // the assumption that the other fails
            Expr::Binary(BinOp::Or, a, b) => {
                let mut with_not_b = guards.to_vec();
                with_not_b.push(normalize(b, true));
                self.extract_walk(bound, &with_not_b, a, out)?;
                let mut with_not_a = guards.to_vec();
                with_not_a.push(normalize(a, true));
                self.extract_walk(bound, &with_not_a, b, out)
            }
            _ => self.extract_leaf(bound, guards, formula, out),
        }
    }

    fn extract_leaf(
        &mut self,
        bound: &BTreeMap<String, Type>,
        guards: &[Thunk],
        leaf: &Thunk,
        out: &mut Vec<(Ref, Thunk)>,
    ) -> EngineResult<()> {
        let bound_names: BTreeSet<String> = bound.keys().cloned().collect();
        let selections = collect_selections(leaf, &bound_names);
        for (callee, args) in selections {
            self.extract_selection(&bound_names, guards, leaf, &callee, &args, out)?;
        }
        Ok(())
    }

    /// Try to turn one selection occurrence into a parametric constraint
    /// on its map.
    fn extract_selection(
        &mut self,
        bound: &BTreeSet<String>,
        guards: &[Thunk],
        leaf: &Thunk,
        callee: &Thunk,
        args: &[Thunk],
        out: &mut Vec<(Ref, Thunk)>,
    ) -> EngineResult<()> {
        let span = leaf.span;
        let evaluated = self.eval(callee)?;
        let (map_ty, r) = match &evaluated.node {
            Expr::Literal(Value::MapRef(ty, r)) => (ty.clone(), *r),
            _ => return Ok(()),
        };
        let arg_types = match map_ty.as_map() {
            Some((arg_types, _)) => arg_types.to_vec(),
            None => return Ok(()),
        };
        if arg_types.len() != args.len() {
            return Ok(());
        }

        let formals: Vec<TypedVar> = arg_types
            .iter()
            .enumerate()
            .map(|(i, t)| TypedVar::new(format!("$q{}", i), t.clone()))
            .collect();
        let mut var_to_formal: BTreeMap<String, Thunk> = BTreeMap::new();
        let mut side_guards: Vec<Thunk> = Vec::new();

        for (i, arg) in args.iter().enumerate() {
            let formal_var = expr::var(formals[i].name.clone(), span);
            match &arg.node {
                Expr::Var(name) if bound.contains(name) => {
                    match var_to_formal.get(name) {
                        // The same bound variable in two argument slots
                        // pins the formals together
                        Some(prior) => side_guards
                            .push(expr::binary(BinOp::Eq, formal_var, prior.clone())),
                        None => {
                            var_to_formal.insert(name.clone(), formal_var);
                        }
                    }
                }
                _ if expr::free_vars(arg).is_disjoint(bound) => {
                    // Fixed argument: evaluate now and pin a fresh formal
                    let fixed = self.eval(arg)?;
                    side_guards.push(expr::binary(BinOp::Eq, formal_var, fixed));
                }
                // A bound variable buried in a larger term: give up on
                // this occurrence
                _ => return Ok(()),
            }
        }

        // Rewrite the leaf: this selection becomes r[formals], and bound
        // variables map to their formals everywhere else
        let replacement = Spanned::new(
            Expr::Apply(
                Box::new(expr::lit(Value::MapRef(map_ty, r), span)),
                formals
                    .iter()
                    .map(|f| expr::var(f.name.clone(), span))
                    .collect(),
            ),
            span,
        );
        let rewritten = replace_selection(leaf, callee, args, &replacement);
        let rewritten = expr::substitute(&rewritten, &var_to_formal);

        let mut all_guards: Vec<Thunk> = Vec::new();
        for g in guards {
            all_guards.push(expr::substitute(g, &var_to_formal));
        }
        all_guards.extend(side_guards);

        let body = if all_guards.is_empty() {
            rewritten
        } else {
            expr::binary(
                BinOp::Implies,
                expr::conjunction(all_guards, span),
                rewritten,
            )
        };

        // Any surviving bound variable means this occurrence cannot be
        // expressed parametrically
        if !expr::free_vars(&body).is_disjoint(bound) {
            return Ok(());
        }

        out.push((
            r,
            Spanned::new(Expr::Quantified(QOp::Lambda, formals, Box::new(body)), span),
        ));
        Ok(())
    }
}

/// All selection occurrences in a leaf whose callee mentions no bound
/// variable, outermost first.
fn collect_selections(leaf: &Thunk, bound: &BTreeSet<String>) -> Vec<(Thunk, Vec<Thunk>)> {
    let mut out = Vec::new();
    walk_selections(leaf, bound, &mut out);
    out
}

fn walk_selections(thunk: &Thunk, bound: &BTreeSet<String>, out: &mut Vec<(Thunk, Vec<Thunk>)>) {
    match &thunk.node {
        Expr::Apply(callee, args) => {
            if !expr::mentions_any(callee, bound) {
                out.push(((**callee).clone(), args.clone()));
            }
            walk_selections(callee, bound, out);
            for a in args {
                walk_selections(a, bound, out);
            }
        }
        Expr::Literal(_) | Expr::Var(_) | Expr::Logical(_, _) => {}
        Expr::Old(inner) | Expr::Unary(_, inner) => walk_selections(inner, bound, out),
        Expr::Update(m, args, new) => {
            walk_selections(m, bound, out);
            for a in args {
                walk_selections(a, bound, out);
            }
            walk_selections(new, bound, out);
        }
        Expr::Binary(_, a, b) => {
            walk_selections(a, bound, out);
            walk_selections(b, bound, out);
        }
        Expr::IfElse(c, t, e) => {
            walk_selections(c, bound, out);
            walk_selections(t, bound, out);
            walk_selections(e, bound, out);
        }
        // Inner quantifiers manage their own bound variables during the
        // guarded walk; leaves never contain them here
        Expr::Quantified(_, _, _) => {}
    }
}

/// Replace every syntactic occurrence of the selection `callee[args]`.
fn replace_selection(thunk: &Thunk, callee: &Thunk, args: &[Thunk], replacement: &Thunk) -> Thunk {
    if let Expr::Apply(c, a) = &thunk.node {
        if c.node == callee.node && a.as_slice() == args {
            return replacement.clone();
        }
    }
    let span = thunk.span;
    let node = match &thunk.node {
        Expr::Apply(c, a) => Expr::Apply(
            Box::new(replace_selection(c, callee, args, replacement)),
            a.iter()
                .map(|x| replace_selection(x, callee, args, replacement))
                .collect(),
        ),
        Expr::Old(inner) => Expr::Old(Box::new(replace_selection(inner, callee, args, replacement))),
        Expr::Update(m, a, new) => Expr::Update(
            Box::new(replace_selection(m, callee, args, replacement)),
            a.iter()
                .map(|x| replace_selection(x, callee, args, replacement))
                .collect(),
            Box::new(replace_selection(new, callee, args, replacement)),
        ),
        Expr::Unary(op, inner) => {
            Expr::Unary(*op, Box::new(replace_selection(inner, callee, args, replacement)))
        }
        Expr::Binary(op, a, b) => Expr::Binary(
            *op,
            Box::new(replace_selection(a, callee, args, replacement)),
            Box::new(replace_selection(b, callee, args, replacement)),
        ),
        Expr::IfElse(c, t, e) => Expr::IfElse(
            Box::new(replace_selection(c, callee, args, replacement)),
            Box::new(replace_selection(t, callee, args, replacement)),
            Box::new(replace_selection(e, callee, args, replacement)),
        ),
        other => other.clone(),
    };
    Spanned::new(node, span)
}
