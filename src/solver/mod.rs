//! The solver facade.
//!
//! The engine talks to a backend through [`Solver`]: a satisfiability
//! check and a model picker over boolean thunks whose only unknowns are
//! logical references and ground map selections. Backends are expected to
//! treat each opaque type as an uninterpreted sort with a total projection
//! to integers, so every custom value is denotable by its tag.
//!
//! `pick` implementations may produce a sequence of models; each later
//! model must exclude the earlier ones via a blocking clause built by
//! [`blocking_clause`].

use std::collections::BTreeMap;

use num_bigint::BigInt;

use crate::engine::expr;
use crate::engine::value::{euclidean, Ref, Value};
use crate::syntax::ast::{BinOp, Expr, Thunk, Type, UnOp};
use crate::syntax::span::{Span, Spanned};

pub mod enumerative;
pub mod trivial;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
}

/// A model: values for logical references.
pub type Solution = BTreeMap<Ref, Value>;

/// A lazy sequence of models.
pub type Solutions = Box<dyn Iterator<Item = Solution>>;

/// Declared types of the logical references in play.
#[derive(Clone, Debug, Default)]
pub struct SolverContext {
    pub ref_types: BTreeMap<Ref, Type>,
}

pub trait Solver {
    /// Check satisfiability of the conjunction. `scopes` counts the
    /// incremental scopes an incremental backend would share across
    /// sibling branches; stateless backends thread it through unchanged.
    fn check(
        &mut self,
        constraints: &[Thunk],
        scopes: usize,
        ctx: &SolverContext,
    ) -> (SatResult, usize);

    /// Enumerate models of the conjunction. An empty sequence means
    /// unsatisfiable. `bound` limits the magnitude of generated values;
    /// `minimal` asks for small-magnitude models first.
    fn pick(
        &mut self,
        constraints: &[Thunk],
        scopes: usize,
        ctx: &SolverContext,
        bound: Option<i64>,
        minimal: bool,
    ) -> Solutions;
}

// ─── Blocking clauses ──────────────────────────────────────────────

/// Build the clause excluding exactly this model.
///
/// Non-opaque references contribute `ref == value` facts. Opaque-typed
/// references contribute their equality structure instead: within a class
/// of equal tags, successive references are chained with `==`; distinct
/// classes of the same opaque type contribute `!=` between
/// representatives. The clause is the negated conjunction.
pub fn blocking_clause(solution: &Solution, ctx: &SolverContext) -> Option<Thunk> {
    let span = Span::synthetic();
    let mut facts: Vec<Thunk> = Vec::new();

    // Opaque classes: (type name, tag) → member refs in order
    let mut classes: BTreeMap<(String, BigInt), Vec<Ref>> = BTreeMap::new();

    for (&r, value) in solution {
        let ty = match ctx.ref_types.get(&r) {
            Some(ty) => ty.clone(),
            None => value.type_of(),
        };
        match (&ty, value) {
            (Type::Custom(name), Value::Custom(_, tag)) => {
                classes
                    .entry((name.clone(), tag.clone()))
                    .or_default()
                    .push(r);
            }
            _ => {
                let logical = Spanned::new(Expr::Logical(ty, r), span);
                facts.push(expr::binary(
                    BinOp::Eq,
                    logical,
                    expr::lit(value.clone(), span),
                ));
            }
        }
    }

    // Within a class: chain equalities between successive members
    for ((name, _), members) in &classes {
        for pair in members.windows(2) {
            let a = Spanned::new(Expr::Logical(Type::Custom(name.clone()), pair[0]), span);
            let b = Spanned::new(Expr::Logical(Type::Custom(name.clone()), pair[1]), span);
            facts.push(expr::binary(BinOp::Eq, a, b));
        }
    }

    // Between classes of the same opaque type: representatives differ
    let class_list: Vec<(&(String, BigInt), Ref)> = classes
        .iter()
        .map(|(key, members)| (key, members[0]))
        .collect();
    for (i, (key_a, rep_a)) in class_list.iter().enumerate() {
        for (key_b, rep_b) in class_list.iter().skip(i + 1) {
            if key_a.0 == key_b.0 {
                let a = Spanned::new(Expr::Logical(Type::Custom(key_a.0.clone()), *rep_a), span);
                let b = Spanned::new(Expr::Logical(Type::Custom(key_b.0.clone()), *rep_b), span);
                facts.push(expr::binary(BinOp::Neq, a, b));
            }
        }
    }

    if facts.is_empty() {
        return None;
    }
    Some(expr::not(expr::conjunction(facts, span)))
}

// ─── Ground evaluation ─────────────────────────────────────────────

/// A ground map selection occurring in the constraints: `(map, args)`.
pub type SelectKey = (Ref, Vec<Value>);

/// A candidate assignment under evaluation: logical references plus
/// ground selection atoms.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    pub refs: BTreeMap<Ref, Value>,
    pub selects: BTreeMap<SelectKey, Value>,
}

/// Evaluate a constraint thunk under a ground assignment. `None` means
/// the thunk mentions something outside the assignment (an unenumerable
/// reference, a quantifier): the caller treats it as unrefutable.
pub fn eval_ground(thunk: &Thunk, assignment: &Assignment) -> Option<Value> {
    match &thunk.node {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Logical(_, r) => assignment.refs.get(r).cloned(),
        Expr::Apply(callee, args) => {
            let callee_val = eval_ground(callee, assignment)?;
            let (_, r) = callee_val.as_map_ref()?;
            let mut key_args = Vec::with_capacity(args.len());
            for a in args {
                key_args.push(eval_ground(a, assignment)?);
            }
            assignment.selects.get(&(r, key_args)).cloned()
        }
        Expr::Unary(op, operand) => {
            let v = eval_ground(operand, assignment)?;
            match (op, v) {
                (UnOp::Neg, Value::Int(n)) => Some(Value::Int(-n)),
                (UnOp::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
                _ => None,
            }
        }
        Expr::Binary(op, left, right) => {
            let l = eval_ground(left, assignment)?;
            let r = eval_ground(right, assignment)?;
            apply_binary(*op, &l, &r)
        }
        Expr::IfElse(c, t, e) => match eval_ground(c, assignment)? {
            Value::Bool(true) => eval_ground(t, assignment),
            Value::Bool(false) => eval_ground(e, assignment),
            _ => None,
        },
        // Program variables, `old`, updates and quantifiers never reach a
        // well-formed solver query
        Expr::Var(_) | Expr::Old(_) | Expr::Update(_, _, _) | Expr::Quantified(_, _, _) => None,
    }
}

/// Concrete binary operator semantics over values.
pub fn apply_binary(op: BinOp, left: &Value, right: &Value) -> Option<Value> {
    use BinOp::*;
    match (op, left, right) {
        (Add, Value::Int(a), Value::Int(b)) => Some(Value::Int(a + b)),
        (Sub, Value::Int(a), Value::Int(b)) => Some(Value::Int(a - b)),
        (Mul, Value::Int(a), Value::Int(b)) => Some(Value::Int(a * b)),
        (Div, Value::Int(a), Value::Int(b)) => {
            euclidean(a, b).map(|(q, _)| Value::Int(q))
        }
        (Mod, Value::Int(a), Value::Int(b)) => {
            euclidean(a, b).map(|(_, r)| Value::Int(r))
        }
        (Lt, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a < b)),
        (Le, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a <= b)),
        (Gt, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a > b)),
        (Ge, Value::Int(a), Value::Int(b)) => Some(Value::Bool(a >= b)),
        (Eq, a, b) => Some(Value::Bool(a == b)),
        (Neq, a, b) => Some(Value::Bool(a != b)),
        (And, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a && *b)),
        (Or, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a || *b)),
        (Implies, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(!*a || *b)),
        (Explies, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a || !*b)),
        (Iff, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(a == b)),
        _ => None,
    }
}

/// Collect the logical references and ground selection atoms a constraint
/// set mentions.
pub fn collect_atoms(
    constraints: &[Thunk],
    ctx: &SolverContext,
) -> (BTreeMap<Ref, Type>, BTreeMap<SelectKey, Type>) {
    let mut refs: BTreeMap<Ref, Type> = BTreeMap::new();
    let mut selects: BTreeMap<SelectKey, Type> = BTreeMap::new();
    for c in constraints {
        collect_from(c, ctx, &mut refs, &mut selects);
    }
    (refs, selects)
}

fn collect_from(
    thunk: &Thunk,
    ctx: &SolverContext,
    refs: &mut BTreeMap<Ref, Type>,
    selects: &mut BTreeMap<SelectKey, Type>,
) {
    match &thunk.node {
        Expr::Logical(ty, r) => {
            refs.insert(*r, ty.clone());
        }
        Expr::Apply(callee, args) => {
            collect_from(callee, ctx, refs, selects);
            for a in args {
                collect_from(a, ctx, refs, selects);
            }
            // A ground selection: literal map over literal arguments
            if let Expr::Literal(Value::MapRef(map_ty, r)) = &callee.node {
                let mut key_args = Vec::with_capacity(args.len());
                for a in args {
                    match a.node.as_literal() {
                        Some(v) => key_args.push(v.clone()),
                        None => return,
                    }
                }
                if let Some((_, result)) = map_ty.as_map() {
                    selects.insert((*r, key_args), result.clone());
                }
            }
        }
        Expr::Literal(_) | Expr::Var(_) => {}
        Expr::Old(inner) => collect_from(inner, ctx, refs, selects),
        Expr::Update(m, args, new) => {
            collect_from(m, ctx, refs, selects);
            for a in args {
                collect_from(a, ctx, refs, selects);
            }
            collect_from(new, ctx, refs, selects);
        }
        Expr::Unary(_, operand) => collect_from(operand, ctx, refs, selects),
        Expr::Binary(_, left, right) => {
            collect_from(left, ctx, refs, selects);
            collect_from(right, ctx, refs, selects);
        }
        Expr::IfElse(c, t, e) => {
            collect_from(c, ctx, refs, selects);
            collect_from(t, ctx, refs, selects);
            collect_from(e, ctx, refs, selects);
        }
        Expr::Quantified(_, _, body) => collect_from(body, ctx, refs, selects),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{binary, lit};

    fn logical(ty: Type, r: Ref) -> Thunk {
        Spanned::synthetic(Expr::Logical(ty, r))
    }

    #[test]
    fn blocking_clause_for_ints_negates_equalities() {
        let mut solution = Solution::new();
        solution.insert(0, Value::int(5));
        let mut ctx = SolverContext::default();
        ctx.ref_types.insert(0, Type::Int);
        let clause = blocking_clause(&solution, &ctx).unwrap();
        assert_eq!(expr::format_thunk(&clause), "!(?0 == 5)");
    }

    #[test]
    fn blocking_clause_groups_opaque_classes() {
        // refs 0,1 share tag 3; ref 2 has tag 4 — same opaque type
        let mut solution = Solution::new();
        solution.insert(0, Value::Custom("T".into(), BigInt::from(3)));
        solution.insert(1, Value::Custom("T".into(), BigInt::from(3)));
        solution.insert(2, Value::Custom("T".into(), BigInt::from(4)));
        let mut ctx = SolverContext::default();
        for r in 0..3 {
            ctx.ref_types.insert(r, Type::Custom("T".into()));
        }
        let clause = blocking_clause(&solution, &ctx).unwrap();
        let rendered = expr::format_thunk(&clause);
        assert!(rendered.contains("(?0 == ?1)"), "got {}", rendered);
        assert!(rendered.contains("(?0 != ?2)"), "got {}", rendered);
    }

    #[test]
    fn ground_eval_covers_arithmetic_and_selection() {
        let map_ty = Type::Map(vec![Type::Int], Box::new(Type::Int));
        let m = Value::MapRef(map_ty, 0);
        let sel = Spanned::synthetic(Expr::Apply(
            Box::new(lit(m, Span::synthetic())),
            vec![lit(Value::int(2), Span::synthetic())],
        ));
        let e = binary(BinOp::Add, sel, logical(Type::Int, 1));
        let mut assignment = Assignment::default();
        assignment.selects.insert((0, vec![Value::int(2)]), Value::int(10));
        assignment.refs.insert(1, Value::int(32));
        assert_eq!(eval_ground(&e, &assignment), Some(Value::int(42)));
    }

    #[test]
    fn ground_eval_division_by_zero_is_undecided() {
        let e = binary(
            BinOp::Div,
            lit(Value::int(1), Span::synthetic()),
            lit(Value::int(0), Span::synthetic()),
        );
        assert_eq!(eval_ground(&e, &Assignment::default()), None);
    }

    #[test]
    fn collect_atoms_finds_refs_and_selects() {
        let map_ty = Type::Map(vec![Type::Int], Box::new(Type::Bool));
        let sel = Spanned::synthetic(Expr::Apply(
            Box::new(lit(Value::MapRef(map_ty, 7), Span::synthetic())),
            vec![lit(Value::int(1), Span::synthetic())],
        ));
        let e = binary(BinOp::Iff, sel, logical(Type::Bool, 3));
        let (refs, selects) = collect_atoms(&[e], &SolverContext::default());
        assert_eq!(refs.get(&3), Some(&Type::Bool));
        assert_eq!(
            selects.get(&(7, vec![Value::int(1)])),
            Some(&Type::Bool)
        );
    }

    #[test]
    fn explies_truth_table() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert_eq!(apply_binary(BinOp::Explies, &t, &f), Some(Value::Bool(true)));
        assert_eq!(apply_binary(BinOp::Explies, &f, &t), Some(Value::Bool(false)));
        assert_eq!(apply_binary(BinOp::Explies, &f, &f), Some(Value::Bool(true)));
    }
}
