//! The type context: a symbol table the engine consults as a pure service.
//!
//! Built by the preprocessor from the declarations. Programs are assumed
//! well-typed; the context resolves names to regions and types and infers
//! the few expression types the engine needs (lambda results, selection
//! results for nested maps).

use std::collections::{BTreeMap, BTreeSet};

use crate::syntax::ast::{Expr, IdTypeWhere, Thunk, Type, TypedVar, UnOp};

#[derive(Clone, Debug)]
pub struct ProcedureSig {
    pub params: Vec<IdTypeWhere>,
    pub returns: Vec<IdTypeWhere>,
    pub modifies: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TypeContext {
    /// Declared opaque type names.
    pub type_names: BTreeSet<String>,
    pub globals: BTreeMap<String, Type>,
    /// Constants, including body-less functions (as map constants).
    pub constants: BTreeMap<String, Type>,
    /// Unique constants per type, in declaration order.
    pub unique: BTreeMap<Type, Vec<String>>,
    pub functions: BTreeMap<String, (Vec<TypedVar>, Type)>,
    pub procedures: BTreeMap<String, ProcedureSig>,
}

impl TypeContext {
    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    /// Unique constants of `ty` other than `name` itself.
    pub fn unique_siblings(&self, ty: &Type, name: &str) -> Vec<String> {
        self.unique
            .get(ty)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| n.as_str() != name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn function_type(&self, name: &str) -> Option<Type> {
        let (params, ret) = self.functions.get(name)?;
        Some(Type::Map(
            params.iter().map(|p| p.ty.clone()).collect(),
            Box::new(ret.clone()),
        ))
    }

    /// Declared type of a name, local scope first.
    pub fn name_type(&self, name: &str, locals: &BTreeMap<String, Type>) -> Option<Type> {
        locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .or_else(|| self.constants.get(name))
            .cloned()
            .or_else(|| self.function_type(name))
    }

    /// Best-effort expression type inference. The engine only needs this
    /// for lambda bodies; programs are assumed well-typed.
    pub fn infer(&self, thunk: &Thunk, locals: &BTreeMap<String, Type>) -> Option<Type> {
        match &thunk.node {
            Expr::Literal(v) => Some(v.type_of()),
            Expr::Var(name) => self.name_type(name, locals),
            Expr::Logical(ty, _) => Some(ty.clone()),
            Expr::Old(inner) => self.infer(inner, locals),
            Expr::Apply(callee, _) => match self.infer(callee, locals)? {
                Type::Map(_, result) => Some(*result),
                _ => None,
            },
            Expr::Update(map, _, _) => self.infer(map, locals),
            Expr::Unary(UnOp::Neg, _) => Some(Type::Int),
            Expr::Unary(UnOp::Not, _) => Some(Type::Bool),
            Expr::Binary(op, _, _) => {
                use crate::syntax::ast::BinOp::*;
                match op {
                    Add | Sub | Mul | Div | Mod => Some(Type::Int),
                    Lt | Le | Gt | Ge | Eq | Neq | And | Or | Implies | Explies | Iff => {
                        Some(Type::Bool)
                    }
                }
            }
            Expr::IfElse(_, then_val, else_val) => self
                .infer(then_val, locals)
                .or_else(|| self.infer(else_val, locals)),
            Expr::Quantified(crate::syntax::ast::QOp::Lambda, vars, body) => {
                let mut inner = locals.clone();
                for v in vars {
                    inner.insert(v.name.clone(), v.ty.clone());
                }
                let result = self.infer(body, &inner)?;
                Some(Type::Map(
                    vars.iter().map(|v| v.ty.clone()).collect(),
                    Box::new(result),
                ))
            }
            Expr::Quantified(_, _, _) => Some(Type::Bool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{binary, lit, var};
    use crate::engine::value::Value;
    use crate::syntax::ast::{BinOp, QOp};
    use crate::syntax::span::{Span, Spanned};

    fn ctx_with_global(name: &str, ty: Type) -> TypeContext {
        let mut ctx = TypeContext::default();
        ctx.globals.insert(name.to_string(), ty);
        ctx
    }

    #[test]
    fn locals_shadow_globals() {
        let ctx = ctx_with_global("x", Type::Bool);
        let mut locals = BTreeMap::new();
        locals.insert("x".to_string(), Type::Int);
        assert_eq!(ctx.name_type("x", &locals), Some(Type::Int));
        assert_eq!(ctx.name_type("x", &BTreeMap::new()), Some(Type::Bool));
    }

    #[test]
    fn selection_infers_result_type() {
        let map_ty = Type::Map(vec![Type::Int], Box::new(Type::Bool));
        let ctx = ctx_with_global("m", map_ty);
        let sel = Spanned::synthetic(Expr::Apply(
            Box::new(var("m", Span::synthetic())),
            vec![lit(Value::int(0), Span::synthetic())],
        ));
        assert_eq!(ctx.infer(&sel, &BTreeMap::new()), Some(Type::Bool));
    }

    #[test]
    fn lambda_infers_map_type() {
        let ctx = TypeContext::default();
        let body = binary(
            BinOp::Add,
            var("i", Span::synthetic()),
            lit(Value::int(1), Span::synthetic()),
        );
        let lam = Spanned::synthetic(Expr::Quantified(
            QOp::Lambda,
            vec![TypedVar::new("i", Type::Int)],
            Box::new(body),
        ));
        assert_eq!(
            ctx.infer(&lam, &BTreeMap::new()),
            Some(Type::Map(vec![Type::Int], Box::new(Type::Int)))
        );
    }

    #[test]
    fn unique_siblings_excludes_self() {
        let mut ctx = TypeContext::default();
        let ty = Type::Custom("T".to_string());
        ctx.unique.insert(
            ty.clone(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert_eq!(ctx.unique_siblings(&ty, "b"), vec!["a", "c"]);
        assert!(ctx.unique_siblings(&Type::Custom("U".into()), "x").is_empty());
    }
}
