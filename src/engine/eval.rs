//! The expression evaluator.
//!
//! `eval` reduces a thunk as far as the current knowledge allows,
//! mutating memory and the constraint store on the way: variables
//! materialize lazily as logical references (or fresh empty maps), map
//! selections cache points and queue them for constraint propagation,
//! and quantifiers consume generator coins. A non-literal result keeps
//! enough structure to hand to the solver.

use std::collections::BTreeMap;

use crate::engine::constraints::NameScope;
use crate::engine::error::{EngineResult, Failure};
use crate::engine::expr;
use crate::engine::generator::Generator;
use crate::engine::memory::{MapInstance, Region};
use crate::engine::value::{euclidean, Ref, Value};
use crate::solver::{apply_binary, Solver};
use crate::syntax::ast::{BinOp, Expr, QOp, Thunk, Type, TypedVar, UnOp};
use crate::syntax::span::{Span, Spanned};

use super::exec::{Engine, MAX_UNFOLD_DEPTH};

impl<'p, S: Solver, G: Generator> Engine<'p, S, G> {
    pub(crate) fn eval(&mut self, thunk: &Thunk) -> EngineResult<Thunk> {
        let span = thunk.span;
        match &thunk.node {
            Expr::Literal(_) => Ok(thunk.clone()),
            Expr::Logical(_, r) => match self.mem.solution.get(r) {
                Some(v) => Ok(expr::lit(v.clone(), span)),
                None => Ok(thunk.clone()),
            },
            Expr::Var(name) => self.eval_var(name, span),
            Expr::Old(inner) => {
                let saved = self.in_old;
                self.in_old = true;
                let result = self.eval(inner);
                self.in_old = saved;
                result
            }
            Expr::Apply(callee, args) => self.eval_apply(callee, args, span),
            Expr::Update(map, args, new) => self.eval_update(map, args, new, span),
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                self.eval_unary(*op, v, span)
            }
            Expr::Binary(op, left, right) => self.eval_binary(*op, left, right, span),
            Expr::IfElse(cond, then_val, else_val) => {
                let c = self.eval(cond)?;
                match c.node.as_bool() {
                    Some(true) => self.eval(then_val),
                    Some(false) => self.eval(else_val),
                    None => {
                        let t = self.eval(then_val)?;
                        let e = self.eval(else_val)?;
                        Ok(Spanned::new(
                            Expr::IfElse(Box::new(c), Box::new(t), Box::new(e)),
                            span,
                        ))
                    }
                }
            }
            Expr::Quantified(QOp::Forall, vars, body) => self.eval_forall(vars, body, span),
            Expr::Quantified(QOp::Exists, vars, body) => {
                // exists x :: P  ≡  !(forall x :: !P)
                let negated = Spanned::new(
                    Expr::Quantified(
                        QOp::Forall,
                        vars.clone(),
                        Box::new(expr::not((**body).clone())),
                    ),
                    span,
                );
                let v = self.eval(&negated)?;
                self.eval_unary(UnOp::Not, v, span)
            }
            Expr::Quantified(QOp::Lambda, vars, body) => self.eval_lambda(vars, body, span),
        }
    }

    // ─── Variables ─────────────────────────────────────────────────

    fn eval_var(&mut self, name: &str, span: Span) -> EngineResult<Thunk> {
        let (region, ty) = self.resolve_region(name, span)?;
        if let Some(cached) = self.mem.get_var(region, name) {
            let cached = cached.clone();
            // Stored thunks are already evaluated; re-evaluation only
            // substitutes newly solved logical references
            return self.eval(&cached);
        }
        self.materialize(name, region, ty, span)
    }

    /// Reading resolves local scope first, then globals (the old region
    /// inside `old(..)`), then constants.
    fn resolve_region(&mut self, name: &str, span: Span) -> EngineResult<(Region, Type)> {
        if let Some(ty) = self.local_types.get(name) {
            return Ok((Region::Locals, ty.clone()));
        }
        if let Some(ty) = self.prog.context.globals.get(name) {
            let region = if self.in_old {
                Region::Old
            } else {
                Region::Globals
            };
            return Ok((region, ty.clone()));
        }
        if let Some(ty) = self.prog.context.constants.get(name) {
            return Ok((Region::Constants, ty.clone()));
        }
        Err(Failure::unsupported(
            format!("unresolved identifier `{}`", name),
            span,
        ))
    }

    /// Cache miss: allocate a placeholder of the declared type, install
    /// it (keeping old/current globals in sync while the global is
    /// untouched), then assume the name's registered constraints and, for
    /// unique constants, the pairwise disequality axioms.
    fn materialize(
        &mut self,
        name: &str,
        region: Region,
        ty: Type,
        span: Span,
    ) -> EngineResult<Thunk> {
        let value = self.fresh_value_thunk(ty.clone(), span);
        self.mem.set_var(region, name, value.clone());
        match region {
            Region::Globals => {
                if !self.mem.modified.contains(name)
                    && self.mem.get_var(Region::Old, name).is_none()
                {
                    self.mem.set_var(Region::Old, name, value.clone());
                }
            }
            Region::Old => {
                if !self.mem.modified.contains(name)
                    && self.mem.get_var(Region::Globals, name).is_none()
                {
                    self.mem.set_var(Region::Globals, name, value.clone());
                }
            }
            Region::Locals | Region::Constants => {}
        }

        if region == Region::Constants {
            for sibling in self.prog.context.unique_siblings(&ty, name) {
                let diseq = expr::binary(
                    BinOp::Neq,
                    expr::var(name.to_string(), span),
                    expr::var(sibling, span),
                );
                let v = self.eval(&diseq)?;
                self.cons.extend_logical(v)?;
            }
        }

        let scope = if region == Region::Locals {
            NameScope::Locals
        } else {
            NameScope::Globals
        };
        let registered: Vec<Thunk> = self.cons.name_constraints(scope, name).to_vec();
        for c in &registered {
            let v = self.eval(c)?;
            self.cons.extend_logical(v)?;
        }

        Ok(value)
    }

    /// A placeholder for an unknown of the given type: maps get a fresh
    /// empty instance, ground types a fresh logical reference.
    pub(crate) fn fresh_value_thunk(&mut self, ty: Type, span: Span) -> Thunk {
        if ty.is_map() {
            let r = self.mem.fresh_map_ref(ty.clone(), MapInstance::new());
            expr::lit(Value::MapRef(ty, r), span)
        } else {
            let r = self.mem.fresh_logical(ty.clone());
            Spanned::new(Expr::Logical(ty, r), span)
        }
    }

    // ─── Application: macros and map selection ─────────────────────

    fn eval_apply(&mut self, callee: &Thunk, args: &[Thunk], span: Span) -> EngineResult<Thunk> {
        if let Expr::Var(fname) = &callee.node {
            if let Some(func) = self.prog.functions.get(fname) {
                let func = func.clone();
                if self.unfold_depth >= MAX_UNFOLD_DEPTH {
                    return Err(Failure::unsupported(
                        format!("recursive unfolding of function `{}`", fname),
                        span,
                    ));
                }
                // Macro: bind evaluated arguments and unfold the body
                let mut binding: BTreeMap<String, Thunk> = BTreeMap::new();
                for (param, arg) in func.params.iter().zip(args) {
                    binding.insert(param.name.clone(), self.eval(arg)?);
                }
                let body = func.body.as_ref().expect("macros always carry a body");
                let unfolded = expr::substitute(body, &binding);
                self.unfold_depth += 1;
                let result = self.eval(&unfolded);
                self.unfold_depth -= 1;
                return result;
            }
        }

        let m = self.eval(callee)?;
        match &m.node {
            Expr::Literal(Value::MapRef(ty, r)) => {
                let (ty, r) = (ty.clone(), *r);
                self.eval_selection(&ty, r, args, span)
            }
            _ => Err(Failure::unsupported(
                "selection on a non-map value".to_string(),
                span,
            )),
        }
    }

    fn eval_selection(
        &mut self,
        map_ty: &Type,
        r: Ref,
        args: &[Thunk],
        span: Span,
    ) -> EngineResult<Thunk> {
        let values = self.eval_args_to_values(args, span)?;
        if let Some(cached) = self.mem.get_map_instance(r).get(&values) {
            let cached = cached.clone();
            return self.eval(&cached);
        }
        let result_ty = match map_ty.as_map() {
            Some((_, result)) => result.clone(),
            None => {
                return Err(Failure::unsupported(
                    "selection on a non-map value".to_string(),
                    span,
                ))
            }
        };
        let fresh = self.fresh_value_thunk(result_ty, span);
        self.mem.set_map_value(r, values.clone(), fresh.clone());
        self.cons.enqueue_point(r, values);
        Ok(fresh)
    }

    /// Selection points are keyed by value tuples. Arguments that stay
    /// symbolic force a solve: the lazy choice happens the moment a point
    /// identity is needed.
    fn eval_args_to_values(&mut self, args: &[Thunk], span: Span) -> EngineResult<Vec<Value>> {
        let mut evaluated = Vec::with_capacity(args.len());
        for a in args {
            evaluated.push(self.eval(a)?);
        }
        if evaluated.iter().any(|t| !t.node.is_literal()) {
            self.solve_and_concretize(span)?;
            for slot in evaluated.iter_mut() {
                *slot = self.eval(&slot.clone())?;
            }
        }
        let mut values = Vec::with_capacity(evaluated.len());
        for t in evaluated {
            match t.node.as_literal() {
                Some(v) => values.push(v.clone()),
                None => {
                    return Err(Failure::unsupported(
                        "map selection argument cannot be made concrete".to_string(),
                        span,
                    ))
                }
            }
        }
        Ok(values)
    }

    // ─── Map update ────────────────────────────────────────────────

    /// `m[args := new]` allocates a fresh map that agrees with `m`
    /// everywhere else: both maps get the parametric frame constraint
    /// `forall bv :: bv != args ==> m[bv] == m'[bv]`.
    fn eval_update(
        &mut self,
        map: &Thunk,
        args: &[Thunk],
        new: &Thunk,
        span: Span,
    ) -> EngineResult<Thunk> {
        let m = self.eval(map)?;
        let (ty, r) = match &m.node {
            Expr::Literal(Value::MapRef(ty, r)) => (ty.clone(), *r),
            _ => {
                return Err(Failure::unsupported(
                    "update of a non-map value".to_string(),
                    span,
                ))
            }
        };
        let values = self.eval_args_to_values(args, span)?;
        let new_value = self.eval(new)?;

        let mut instance = MapInstance::new();
        instance.insert(values.clone(), new_value);
        let r2 = self.mem.fresh_map_ref(ty.clone(), instance);

        let arg_types = match ty.as_map() {
            Some((arg_types, _)) => arg_types.to_vec(),
            None => Vec::new(),
        };
        let formals: Vec<TypedVar> = arg_types
            .iter()
            .enumerate()
            .map(|(i, t)| TypedVar::new(format!("$u{}", i), t.clone()))
            .collect();
        let formal_vars: Vec<Thunk> = formals
            .iter()
            .map(|f| expr::var(f.name.clone(), span))
            .collect();
        let hits: Vec<Thunk> = formal_vars
            .iter()
            .zip(&values)
            .map(|(fv, v)| expr::binary(BinOp::Eq, fv.clone(), expr::lit(v.clone(), span)))
            .collect();
        let guard = expr::not(expr::conjunction(hits, span));
        let old_sel = Spanned::new(
            Expr::Apply(
                Box::new(expr::lit(Value::MapRef(ty.clone(), r), span)),
                formal_vars.clone(),
            ),
            span,
        );
        let new_sel = Spanned::new(
            Expr::Apply(
                Box::new(expr::lit(Value::MapRef(ty.clone(), r2), span)),
                formal_vars,
            ),
            span,
        );
        let body = expr::binary(
            BinOp::Implies,
            guard,
            expr::binary(BinOp::Eq, old_sel, new_sel),
        );
        let frame = Spanned::new(
            Expr::Quantified(QOp::Lambda, formals, Box::new(body)),
            span,
        );

        for target in [r, r2] {
            let points: Vec<Vec<Value>> =
                self.mem.get_map_instance(target).keys().cloned().collect();
            self.cons.extend_map(target, frame.clone(), points.iter());
        }

        Ok(expr::lit(Value::MapRef(ty, r2), span))
    }

    // ─── Operators ─────────────────────────────────────────────────

    fn eval_unary(&mut self, op: UnOp, operand: Thunk, span: Span) -> EngineResult<Thunk> {
        match (&op, operand.node.as_literal()) {
            (UnOp::Neg, Some(Value::Int(n))) => Ok(expr::lit(Value::Int(-n.clone()), span)),
            (UnOp::Not, Some(Value::Bool(b))) => Ok(expr::lit(Value::Bool(!b), span)),
            (_, Some(_)) => Err(Failure::unsupported(
                "ill-typed unary operand".to_string(),
                span,
            )),
            (_, None) => Ok(Spanned::new(Expr::Unary(op, Box::new(operand)), span)),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Thunk,
        right: &Thunk,
        span: Span,
    ) -> EngineResult<Thunk> {
        let l = self.eval(left)?;

        // Short-circuit: a deciding literal left operand skips the right
        if op.short_circuits() {
            if let Some(b) = l.node.as_bool() {
                match (op, b) {
                    (BinOp::And, false) => return Ok(expr::ff(span)),
                    (BinOp::Or, true) => return Ok(expr::tt(span)),
                    (BinOp::Implies, false) => return Ok(expr::tt(span)),
                    (BinOp::Explies, true) => return Ok(expr::tt(span)),
                    (BinOp::And, true) | (BinOp::Implies, true) | (BinOp::Or, false) => {
                        return self.eval(right)
                    }
                    (BinOp::Explies, false) => {
                        let r = self.eval(right)?;
                        return self.eval_unary(UnOp::Not, r, span);
                    }
                    _ => {}
                }
            }
        }

        let r = self.eval(right)?;
        match (l.node.as_literal(), r.node.as_literal()) {
            (Some(lv), Some(rv)) => self.eval_binary_literal(op, lv.clone(), rv.clone(), span),
            _ => Ok(Spanned::new(
                Expr::Binary(op, Box::new(l), Box::new(r)),
                span,
            )),
        }
    }

    fn eval_binary_literal(
        &mut self,
        op: BinOp,
        lv: Value,
        rv: Value,
        span: Span,
    ) -> EngineResult<Thunk> {
        // Map reference equality: identical references are equal, maps of
        // different types are not, and the rest unfolds extensionally
        if let (Value::MapRef(lt, lr), Value::MapRef(rt, rr)) = (&lv, &rv) {
            match op {
                BinOp::Eq | BinOp::Neq => {
                    let eq = if lr == rr && lt == rt {
                        expr::tt(span)
                    } else if lt != rt {
                        expr::ff(span)
                    } else {
                        self.unfold_map_equality(lt.clone(), *lr, *rr, span)?
                    };
                    return if op == BinOp::Eq {
                        Ok(eq)
                    } else {
                        self.eval_unary(UnOp::Not, eq, span)
                    };
                }
                _ => {}
            }
        }

        // Division and modulo by zero: an unspecified but well-defined
        // integer, modeled as a fresh unconstrained logical
        if matches!(op, BinOp::Div | BinOp::Mod) {
            if let (Value::Int(a), Value::Int(b)) = (&lv, &rv) {
                return match euclidean(a, b) {
                    Some((q, rem)) => {
                        let v = if op == BinOp::Div { q } else { rem };
                        Ok(expr::lit(Value::Int(v), span))
                    }
                    None => Ok(self.fresh_value_thunk(Type::Int, span)),
                };
            }
        }

        match apply_binary(op, &lv, &rv) {
            Some(v) => Ok(expr::lit(v, span)),
            None => Err(Failure::unsupported(
                "ill-typed binary operands".to_string(),
                span,
            )),
        }
    }

    /// `m1 == m2` over same-typed maps becomes the evaluated universal
    /// `forall bv :: m1[bv] == m2[bv]`.
    fn unfold_map_equality(
        &mut self,
        ty: Type,
        r1: Ref,
        r2: Ref,
        span: Span,
    ) -> EngineResult<Thunk> {
        let arg_types = match ty.as_map() {
            Some((arg_types, _)) => arg_types.to_vec(),
            None => Vec::new(),
        };
        let formals: Vec<TypedVar> = arg_types
            .iter()
            .enumerate()
            .map(|(i, t)| TypedVar::new(format!("$e{}", i), t.clone()))
            .collect();
        let formal_vars: Vec<Thunk> = formals
            .iter()
            .map(|f| expr::var(f.name.clone(), span))
            .collect();
        let left = Spanned::new(
            Expr::Apply(
                Box::new(expr::lit(Value::MapRef(ty.clone(), r1), span)),
                formal_vars.clone(),
            ),
            span,
        );
        let right = Spanned::new(
            Expr::Apply(
                Box::new(expr::lit(Value::MapRef(ty, r2), span)),
                formal_vars,
            ),
            span,
        );
        let body = expr::binary(BinOp::Eq, left, right);
        let universal = Spanned::new(
            Expr::Quantified(QOp::Forall, formals, Box::new(body)),
            span,
        );
        self.eval(&universal)
    }

    // ─── Quantifiers ───────────────────────────────────────────────

    /// A universal flips a generator coin. Heads: believe it, extract
    /// its per-map parametric constraints and attach them. Tails: bind a
    /// counterexample — evaluate the negated body in a nested scope and
    /// assume that instantiation.
    fn eval_forall(
        &mut self,
        vars: &[TypedVar],
        body: &Thunk,
        span: Span,
    ) -> EngineResult<Thunk> {
        if self.gen.gen_bool() {
            let extracted = self.extract_forall(vars, body)?;
            for (r, constraint) in extracted {
                let points: Vec<Vec<Value>> =
                    self.mem.get_map_instance(r).keys().cloned().collect();
                self.cons.extend_map(r, constraint, points.iter());
            }
            Ok(expr::tt(span))
        } else {
            // Nested scope: the bound variables materialize as fresh
            // witnesses, shadowing anything of the same name
            let mut saved: Vec<(String, Option<Thunk>, Option<Type>)> = Vec::new();
            for v in vars {
                let prior_local = self.mem.get_var(Region::Locals, &v.name).cloned();
                self.mem.forget_var(Region::Locals, &v.name);
                let prior_ty = self.local_types.insert(v.name.clone(), v.ty.clone());
                saved.push((v.name.clone(), prior_local, prior_ty));
            }
            let negated = expr::not(body.clone());
            let result = self.eval(&negated);
            for (name, prior_local, prior_ty) in saved.into_iter().rev() {
                self.mem.forget_var(Region::Locals, &name);
                if let Some(t) = prior_local {
                    self.mem.set_var(Region::Locals, &name, t);
                }
                match prior_ty {
                    Some(ty) => {
                        self.local_types.insert(name, ty);
                    }
                    None => {
                        self.local_types.remove(&name);
                    }
                }
            }
            let instantiation = result?;
            self.cons.extend_logical(instantiation)?;
            Ok(expr::ff(span))
        }
    }

    /// A lambda is a fresh map defined by the parametric constraint
    /// `forall formals :: m'[formals] == body`.
    fn eval_lambda(
        &mut self,
        vars: &[TypedVar],
        body: &Thunk,
        span: Span,
    ) -> EngineResult<Thunk> {
        let whole = Spanned::new(
            Expr::Quantified(QOp::Lambda, vars.to_vec(), Box::new(body.clone())),
            span,
        );
        let ty = match self.prog.context.infer(&whole, &self.local_types) {
            Some(ty) => ty,
            None => {
                return Err(Failure::unsupported(
                    "cannot infer the type of a lambda".to_string(),
                    span,
                ))
            }
        };
        let r = self.mem.fresh_map_ref(ty.clone(), MapInstance::new());
        let formal_vars: Vec<Thunk> = vars
            .iter()
            .map(|v| expr::var(v.name.clone(), span))
            .collect();
        let selection = Spanned::new(
            Expr::Apply(
                Box::new(expr::lit(Value::MapRef(ty.clone(), r), span)),
                formal_vars,
            ),
            span,
        );
        let defining = Spanned::new(
            Expr::Quantified(
                QOp::Lambda,
                vars.to_vec(),
                Box::new(expr::binary(BinOp::Eq, selection, body.clone())),
            ),
            span,
        );
        self.cons.extend_map(r, defining, std::iter::empty::<&Vec<Value>>());
        Ok(expr::lit(Value::MapRef(ty, r), span))
    }
}
