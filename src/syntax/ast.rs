//! Abstract syntax for the Kelpie verification language.
//!
//! The same expression type serves three roles:
//! 1. Parser output (surface expressions with source spans)
//! 2. Thunks held in the symbolic store (partially evaluated expressions;
//!    a thunk is *literal* when its root is [`Expr::Literal`])
//! 3. Solver input (boolean thunks over logical placeholders)
//!
//! Statements exist in two layers: structured statements as parsed
//! ([`StructStmt`], with `if`/`while`/`break`/labels) and the flattened
//! basic-block form the executor consumes ([`Statement`], [`BasicBlock`]).

use crate::engine::value::{Ref, Value};
use crate::syntax::span::{Span, Spanned};

// ─── Types ─────────────────────────────────────────────────────────

/// Semantic types. `Custom` names an opaque user-declared type; `Map` is a
/// total mapping from an argument tuple to a value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Bool,
    Int,
    Custom(String),
    Map(Vec<Type>, Box<Type>),
}

impl Type {
    /// Argument and result types, for map types only.
    pub fn as_map(&self) -> Option<(&[Type], &Type)> {
        match self {
            Type::Map(args, result) => Some((args, result)),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(_, _))
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Custom(name) => write!(f, "{}", name),
            Type::Map(args, result) => {
                write!(f, "[")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, "]{}", result)
            }
        }
    }
}

/// A bound or formal variable with its type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedVar {
    pub name: String,
    pub ty: Type,
}

impl TypedVar {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

// ─── Expressions ───────────────────────────────────────────────────

/// An expression carrying its source position.
pub type Thunk = Spanned<Expr>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Neq,
    And,
    Or,
    Implies,
    Explies,
    Iff,
}

impl BinOp {
    /// Operators with short-circuit evaluation on a deciding left operand.
    pub fn short_circuits(&self) -> bool {
        matches!(
            self,
            BinOp::And | BinOp::Or | BinOp::Implies | BinOp::Explies
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QOp {
    Forall,
    Exists,
    Lambda,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// A fully evaluated value.
    Literal(Value),
    /// A program variable or constant, resolved against the store regions.
    Var(String),
    /// A logical placeholder awaiting a solver-chosen value.
    Logical(Type, Ref),
    /// `old(e)`: evaluate `e` against the entry-time global region.
    Old(Box<Thunk>),
    /// Map selection or function application: `m[a, b]`, `f(a, b)`.
    Apply(Box<Thunk>, Vec<Thunk>),
    /// Map update `m[a, b := v]`; evaluates to a fresh map.
    Update(Box<Thunk>, Vec<Thunk>, Box<Thunk>),
    Unary(UnOp, Box<Thunk>),
    Binary(BinOp, Box<Thunk>, Box<Thunk>),
    /// `if c then a else b`; kept symbolic when `c` does not reduce.
    IfElse(Box<Thunk>, Box<Thunk>, Box<Thunk>),
    /// `forall`/`exists`/`lambda` with bound variables. Lambdas double as
    /// the representation of parametric map constraints.
    Quantified(QOp, Vec<TypedVar>, Box<Thunk>),
}

impl Expr {
    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Literal(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

// ─── Specifications ────────────────────────────────────────────────

/// What kind of obligation a checked clause represents; reported on
/// assertion failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecKind {
    Inline,
    Precondition,
    Postcondition,
    LoopInvariant,
}

impl std::fmt::Display for SpecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecKind::Inline => write!(f, "assertion"),
            SpecKind::Precondition => write!(f, "precondition"),
            SpecKind::Postcondition => write!(f, "postcondition"),
            SpecKind::LoopInvariant => write!(f, "loop invariant"),
        }
    }
}

/// A specification clause. `free` clauses are assumed, never checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecClause {
    pub free: bool,
    pub kind: SpecKind,
    pub expr: Thunk,
}

impl SpecClause {
    pub fn assume(kind: SpecKind, expr: Thunk) -> Self {
        Self {
            free: true,
            kind,
            expr,
        }
    }

    pub fn check(kind: SpecKind, expr: Thunk) -> Self {
        Self {
            free: false,
            kind,
            expr,
        }
    }
}

// ─── Declarations ──────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Program {
    pub decls: Vec<Spanned<Decl>>,
}

/// A variable binder with optional `where` clause.
#[derive(Clone, Debug)]
pub struct IdTypeWhere {
    pub name: String,
    pub ty: Type,
    pub where_clause: Option<Thunk>,
}

#[derive(Clone, Debug)]
pub enum Decl {
    /// `type T1, T2;` — opaque type declarations.
    TypeDecl { names: Vec<String> },
    /// `const [unique] a, b: T;`
    ConstDecl {
        unique: bool,
        names: Vec<String>,
        ty: Type,
    },
    Function(FunctionDecl),
    Axiom(Thunk),
    /// `var g: int where g >= 0;`
    VarDecl(Vec<IdTypeWhere>),
    Procedure(ProcedureDecl),
    Implementation(Implementation),
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<TypedVar>,
    pub ret: Type,
    /// Present for macro functions; absent functions behave as map
    /// constants constrained only by axioms.
    pub body: Option<Thunk>,
}

#[derive(Clone, Debug)]
pub enum Spec {
    Requires { free: bool, expr: Thunk },
    Ensures { free: bool, expr: Thunk },
    Modifies(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct ProcedureDecl {
    pub name: String,
    pub params: Vec<IdTypeWhere>,
    pub returns: Vec<IdTypeWhere>,
    pub specs: Vec<Spec>,
    pub body: Option<Body>,
}

#[derive(Clone, Debug)]
pub struct Implementation {
    pub name: String,
    pub params: Vec<TypedVar>,
    pub returns: Vec<TypedVar>,
    pub body: Body,
}

#[derive(Clone, Debug)]
pub struct Body {
    pub locals: Vec<IdTypeWhere>,
    pub stmts: Vec<Spanned<StructStmt>>,
}

// ─── Structured statements (parser output) ─────────────────────────

/// An assignment target: a name with zero or more index chains, e.g.
/// `m[i][j, k]` has chains `[[i], [j, k]]`.
#[derive(Clone, Debug)]
pub struct AssignTarget {
    pub name: String,
    pub name_span: Span,
    pub indexes: Vec<Vec<Thunk>>,
}

#[derive(Clone, Debug)]
pub enum StructStmt {
    Assert(Thunk),
    Assume(Thunk),
    Havoc(Vec<String>),
    Assign(Vec<AssignTarget>, Vec<Thunk>),
    Call {
        lhss: Vec<String>,
        proc: String,
        args: Vec<Thunk>,
    },
    CallForall {
        proc: String,
        args: Vec<Thunk>,
    },
    /// `cond = None` encodes a nondeterministic `if (*)`.
    If {
        cond: Option<Thunk>,
        then_branch: Vec<Spanned<StructStmt>>,
        else_branch: Option<Vec<Spanned<StructStmt>>>,
    },
    While {
        cond: Option<Thunk>,
        invariants: Vec<SpecClause>,
        body: Vec<Spanned<StructStmt>>,
    },
    Break,
    Return,
    Goto(Vec<String>),
    Label(String),
}

// ─── Flattened statements (executor input) ─────────────────────────

#[derive(Clone, Debug)]
pub enum Statement {
    Predicate(SpecClause),
    Havoc(Vec<String>),
    Assign(Vec<AssignTarget>, Vec<Thunk>),
    Call {
        lhss: Vec<String>,
        proc: String,
        args: Vec<Thunk>,
    },
    CallForall {
        proc: String,
        args: Vec<Thunk>,
    },
}

#[derive(Clone, Debug)]
pub enum Exit {
    Goto(Vec<String>),
    Return,
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub stmts: Vec<Spanned<Statement>>,
    pub exit: Spanned<Exit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_type_display() {
        let ty = Type::Map(
            vec![Type::Int, Type::Custom("T".to_string())],
            Box::new(Type::Bool),
        );
        assert_eq!(ty.to_string(), "[int, T]bool");
    }

    #[test]
    fn map_type_accessors() {
        let ty = Type::Map(vec![Type::Int], Box::new(Type::Int));
        assert!(ty.is_map());
        let (args, result) = ty.as_map().unwrap();
        assert_eq!(args, &[Type::Int]);
        assert_eq!(result, &Type::Int);
        assert!(Type::Bool.as_map().is_none());
    }

    #[test]
    fn short_circuit_operators() {
        assert!(BinOp::And.short_circuits());
        assert!(BinOp::Implies.short_circuits());
        assert!(!BinOp::Add.short_circuits());
        assert!(!BinOp::Iff.short_circuits());
    }
}
