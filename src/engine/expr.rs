//! Thunk construction and traversal utilities shared by the evaluator,
//! the constraint extractor, and the solvers.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::value::Value;
use crate::syntax::ast::{BinOp, Expr, Thunk, UnOp};
use crate::syntax::span::{Span, Spanned};

// ─── Builders ──────────────────────────────────────────────────────

pub fn lit(value: Value, span: Span) -> Thunk {
    Spanned::new(Expr::Literal(value), span)
}

pub fn tt(span: Span) -> Thunk {
    lit(Value::Bool(true), span)
}

pub fn ff(span: Span) -> Thunk {
    lit(Value::Bool(false), span)
}

pub fn var(name: impl Into<String>, span: Span) -> Thunk {
    Spanned::new(Expr::Var(name.into()), span)
}

pub fn unary(op: UnOp, operand: Thunk) -> Thunk {
    let span = operand.span;
    Spanned::new(Expr::Unary(op, Box::new(operand)), span)
}

pub fn not(operand: Thunk) -> Thunk {
    unary(UnOp::Not, operand)
}

pub fn binary(op: BinOp, left: Thunk, right: Thunk) -> Thunk {
    let span = left.span.merge(right.span);
    Spanned::new(Expr::Binary(op, Box::new(left), Box::new(right)), span)
}

/// Conjunction of the given thunks; `true` when empty.
pub fn conjunction(mut operands: Vec<Thunk>, span: Span) -> Thunk {
    match operands.len() {
        0 => tt(span),
        1 => operands.pop().unwrap(),
        _ => {
            let mut it = operands.into_iter();
            let first = it.next().unwrap();
            it.fold(first, |acc, t| binary(BinOp::And, acc, t))
        }
    }
}

// ─── Traversals ────────────────────────────────────────────────────

/// Names occurring free in a thunk (program variables only; logical
/// placeholders are tracked separately by reference).
pub fn free_vars(thunk: &Thunk) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_free(thunk, &mut BTreeSet::new(), &mut out);
    out
}

fn collect_free(thunk: &Thunk, bound: &mut BTreeSet<String>, out: &mut BTreeSet<String>) {
    match &thunk.node {
        Expr::Literal(_) | Expr::Logical(_, _) => {}
        Expr::Var(name) => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        Expr::Old(inner) => collect_free(inner, bound, out),
        Expr::Apply(callee, args) => {
            collect_free(callee, bound, out);
            for a in args {
                collect_free(a, bound, out);
            }
        }
        Expr::Update(map, args, new) => {
            collect_free(map, bound, out);
            for a in args {
                collect_free(a, bound, out);
            }
            collect_free(new, bound, out);
        }
        Expr::Unary(_, operand) => collect_free(operand, bound, out),
        Expr::Binary(_, left, right) => {
            collect_free(left, bound, out);
            collect_free(right, bound, out);
        }
        Expr::IfElse(c, t, e) => {
            collect_free(c, bound, out);
            collect_free(t, bound, out);
            collect_free(e, bound, out);
        }
        Expr::Quantified(_, vars, body) => {
            let mut added = Vec::new();
            for v in vars {
                if bound.insert(v.name.clone()) {
                    added.push(v.name.clone());
                }
            }
            collect_free(body, bound, out);
            for name in added {
                bound.remove(&name);
            }
        }
    }
}

/// Capture-respecting substitution of named variables by thunks. Bound
/// variables of inner quantifiers shadow the substitution.
pub fn substitute(thunk: &Thunk, map: &BTreeMap<String, Thunk>) -> Thunk {
    if map.is_empty() {
        return thunk.clone();
    }
    subst(thunk, map)
}

fn subst(thunk: &Thunk, map: &BTreeMap<String, Thunk>) -> Thunk {
    let span = thunk.span;
    let node = match &thunk.node {
        Expr::Literal(v) => Expr::Literal(v.clone()),
        Expr::Logical(ty, r) => Expr::Logical(ty.clone(), *r),
        Expr::Var(name) => match map.get(name) {
            Some(replacement) => return replacement.clone(),
            None => Expr::Var(name.clone()),
        },
        Expr::Old(inner) => Expr::Old(Box::new(subst(inner, map))),
        Expr::Apply(callee, args) => Expr::Apply(
            Box::new(subst(callee, map)),
            args.iter().map(|a| subst(a, map)).collect(),
        ),
        Expr::Update(m, args, new) => Expr::Update(
            Box::new(subst(m, map)),
            args.iter().map(|a| subst(a, map)).collect(),
            Box::new(subst(new, map)),
        ),
        Expr::Unary(op, operand) => Expr::Unary(*op, Box::new(subst(operand, map))),
        Expr::Binary(op, left, right) => {
            Expr::Binary(*op, Box::new(subst(left, map)), Box::new(subst(right, map)))
        }
        Expr::IfElse(c, t, e) => Expr::IfElse(
            Box::new(subst(c, map)),
            Box::new(subst(t, map)),
            Box::new(subst(e, map)),
        ),
        Expr::Quantified(q, vars, body) => {
            let shadowed: BTreeSet<&String> = vars.iter().map(|v| &v.name).collect();
            let narrowed: BTreeMap<String, Thunk> = map
                .iter()
                .filter(|(k, _)| !shadowed.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let new_body = if narrowed.is_empty() {
                (**body).clone()
            } else {
                subst(body, &narrowed)
            };
            Expr::Quantified(*q, vars.clone(), Box::new(new_body))
        }
    };
    Spanned::new(node, span)
}

/// Whether any of the given names occurs free in the thunk.
pub fn mentions_any(thunk: &Thunk, names: &BTreeSet<String>) -> bool {
    !free_vars(thunk).is_disjoint(names)
}

/// Render a thunk for witness output and failure messages (abbreviated,
/// not a full pretty-printer).
pub fn format_thunk(thunk: &Thunk) -> String {
    match &thunk.node {
        Expr::Literal(v) => v.to_string(),
        Expr::Var(name) => name.clone(),
        Expr::Logical(_, r) => format!("?{}", r),
        Expr::Old(inner) => format!("old({})", format_thunk(inner)),
        Expr::Apply(callee, args) => {
            let rendered: Vec<String> = args.iter().map(format_thunk).collect();
            format!("{}[{}]", format_thunk(callee), rendered.join(", "))
        }
        Expr::Update(m, args, new) => {
            let rendered: Vec<String> = args.iter().map(format_thunk).collect();
            format!(
                "{}[{} := {}]",
                format_thunk(m),
                rendered.join(", "),
                format_thunk(new)
            )
        }
        Expr::Unary(UnOp::Neg, operand) => format!("-{}", format_thunk(operand)),
        Expr::Unary(UnOp::Not, operand) => format!("!{}", format_thunk(operand)),
        Expr::Binary(op, left, right) => {
            let symbol = match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "div",
                BinOp::Mod => "mod",
                BinOp::Lt => "<",
                BinOp::Le => "<=",
                BinOp::Gt => ">",
                BinOp::Ge => ">=",
                BinOp::Eq => "==",
                BinOp::Neq => "!=",
                BinOp::And => "&&",
                BinOp::Or => "||",
                BinOp::Implies => "==>",
                BinOp::Explies => "<==",
                BinOp::Iff => "<==>",
            };
            format!("({} {} {})", format_thunk(left), symbol, format_thunk(right))
        }
        Expr::IfElse(c, t, e) => format!(
            "(if {} then {} else {})",
            format_thunk(c),
            format_thunk(t),
            format_thunk(e)
        ),
        Expr::Quantified(q, vars, body) => {
            let keyword = match q {
                crate::syntax::ast::QOp::Forall => "forall",
                crate::syntax::ast::QOp::Exists => "exists",
                crate::syntax::ast::QOp::Lambda => "lambda",
            };
            let binders: Vec<String> = vars
                .iter()
                .map(|v| format!("{}: {}", v.name, v.ty))
                .collect();
            format!("({} {} :: {})", keyword, binders.join(", "), format_thunk(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::ast::{QOp, Type, TypedVar};

    fn sp() -> Span {
        Span::synthetic()
    }

    #[test]
    fn free_vars_skip_bound() {
        // (forall i: int :: m[i] > j)
        let body = binary(
            BinOp::Gt,
            Spanned::synthetic(Expr::Apply(
                Box::new(var("m", sp())),
                vec![var("i", sp())],
            )),
            var("j", sp()),
        );
        let q = Spanned::synthetic(Expr::Quantified(
            QOp::Forall,
            vec![TypedVar::new("i", Type::Int)],
            Box::new(body),
        ));
        let fv = free_vars(&q);
        assert!(fv.contains("m"));
        assert!(fv.contains("j"));
        assert!(!fv.contains("i"));
    }

    #[test]
    fn substitution_respects_shadowing() {
        // substituting i in (forall i :: i > 0) changes nothing
        let q = Spanned::synthetic(Expr::Quantified(
            QOp::Forall,
            vec![TypedVar::new("i", Type::Int)],
            Box::new(binary(BinOp::Gt, var("i", sp()), lit(Value::int(0), sp()))),
        ));
        let mut map = BTreeMap::new();
        map.insert("i".to_string(), lit(Value::int(7), sp()));
        let result = substitute(&q, &map);
        assert_eq!(result, q);
    }

    #[test]
    fn substitution_replaces_free_occurrences() {
        let e = binary(BinOp::Add, var("x", sp()), var("y", sp()));
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), lit(Value::int(3), sp()));
        let result = substitute(&e, &map);
        assert_eq!(format_thunk(&result), "(3 + y)");
    }

    #[test]
    fn conjunction_of_empty_is_true() {
        let t = conjunction(vec![], sp());
        assert_eq!(t.node.as_bool(), Some(true));
    }

    #[test]
    fn format_covers_update_and_quantifier() {
        let u = Spanned::synthetic(Expr::Update(
            Box::new(var("m", sp())),
            vec![lit(Value::int(1), sp())],
            Box::new(lit(Value::int(2), sp())),
        ));
        assert_eq!(format_thunk(&u), "m[1 := 2]");
    }
}
