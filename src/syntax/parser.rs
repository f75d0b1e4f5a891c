//! Recursive-descent parser for the Kelpie verification language.
//!
//! Produces a [`Program`] of structured declarations; the preprocessor
//! flattens procedure bodies into basic blocks later. Errors accumulate as
//! diagnostics; parsing keeps going where recovery is cheap.

use crate::diagnostic::Diagnostic;
use crate::engine::value::Value;
use crate::syntax::ast::*;
use crate::syntax::lexeme::Lexeme;
use crate::syntax::span::{Span, Spanned};

const MAX_NESTING_DEPTH: u32 = 256;

pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    pub(crate) fn parse_program(mut self) -> Result<Program, Vec<Diagnostic>> {
        let mut decls = Vec::new();
        while !self.at(&Lexeme::Eof) {
            let before = self.pos;
            if let Some(decl) = self.parse_decl() {
                decls.push(decl);
            }
            if self.pos == before {
                // No progress: skip the offending token to avoid looping
                self.advance();
            }
        }
        if self.diagnostics.is_empty() {
            Ok(Program { decls })
        } else {
            Err(self.diagnostics)
        }
    }

    // ─── Declarations ──────────────────────────────────────────────

    fn parse_decl(&mut self) -> Option<Spanned<Decl>> {
        let start = self.current_span();
        let decl = match self.peek() {
            Lexeme::Type => self.parse_type_decl(),
            Lexeme::Const => self.parse_const_decl(),
            Lexeme::Function => self.parse_function_decl(),
            Lexeme::Axiom => self.parse_axiom_decl(),
            Lexeme::Var => {
                self.expect(&Lexeme::Var);
                let vars = self.parse_id_type_where_list();
                self.expect(&Lexeme::Semicolon);
                Some(Decl::VarDecl(vars))
            }
            Lexeme::Procedure => self.parse_procedure_decl(),
            Lexeme::Implementation => self.parse_implementation_decl(),
            other => {
                let msg = format!("expected a declaration, found {}", other.describe());
                self.error_with_help(
                    &msg,
                    "top-level items are type, const, function, axiom, var, procedure, implementation",
                );
                None
            }
        }?;
        let span = start.merge(self.previous_span());
        Some(Spanned::new(decl, span))
    }

    fn parse_type_decl(&mut self) -> Option<Decl> {
        self.expect(&Lexeme::Type);
        let names = self.parse_ident_list();
        self.expect(&Lexeme::Semicolon);
        Some(Decl::TypeDecl { names })
    }

    fn parse_const_decl(&mut self) -> Option<Decl> {
        self.expect(&Lexeme::Const);
        let unique = self.eat(&Lexeme::Unique);
        let names = self.parse_ident_list();
        self.expect(&Lexeme::Colon);
        let ty = self.parse_type()?;
        self.expect(&Lexeme::Semicolon);
        Some(Decl::ConstDecl { unique, names, ty })
    }

    fn parse_function_decl(&mut self) -> Option<Decl> {
        self.expect(&Lexeme::Function);
        let name = self.expect_ident()?;
        self.expect(&Lexeme::LParen);
        let params = self.parse_typed_var_list(&Lexeme::RParen);
        self.expect(&Lexeme::RParen);
        self.expect(&Lexeme::Colon);
        let ret = self.parse_type()?;
        let body = if self.eat(&Lexeme::Semicolon) {
            None
        } else {
            self.expect(&Lexeme::LBrace);
            let body = self.parse_expr()?;
            self.expect(&Lexeme::RBrace);
            Some(body)
        };
        Some(Decl::Function(FunctionDecl {
            name: name.node,
            params,
            ret,
            body,
        }))
    }

    fn parse_axiom_decl(&mut self) -> Option<Decl> {
        self.expect(&Lexeme::Axiom);
        let expr = self.parse_expr()?;
        self.expect(&Lexeme::Semicolon);
        Some(Decl::Axiom(expr))
    }

    fn parse_procedure_decl(&mut self) -> Option<Decl> {
        self.expect(&Lexeme::Procedure);
        let name = self.expect_ident()?;
        self.expect(&Lexeme::LParen);
        let params = self.parse_id_type_where_sig(&Lexeme::RParen);
        self.expect(&Lexeme::RParen);
        let returns = if self.eat(&Lexeme::Returns) {
            self.expect(&Lexeme::LParen);
            let rets = self.parse_id_type_where_sig(&Lexeme::RParen);
            self.expect(&Lexeme::RParen);
            rets
        } else {
            Vec::new()
        };
        // A body-less procedure ends the header with `;` before its specs
        let header_semi = self.eat(&Lexeme::Semicolon);
        let specs = self.parse_specs();
        let body = if !header_semi && self.at(&Lexeme::LBrace) {
            self.parse_body()
        } else {
            None
        };
        Some(Decl::Procedure(ProcedureDecl {
            name: name.node,
            params,
            returns,
            specs,
            body,
        }))
    }

    fn parse_implementation_decl(&mut self) -> Option<Decl> {
        self.expect(&Lexeme::Implementation);
        let name = self.expect_ident()?;
        self.expect(&Lexeme::LParen);
        let params = self.parse_typed_var_list(&Lexeme::RParen);
        self.expect(&Lexeme::RParen);
        let returns = if self.eat(&Lexeme::Returns) {
            self.expect(&Lexeme::LParen);
            let rets = self.parse_typed_var_list(&Lexeme::RParen);
            self.expect(&Lexeme::RParen);
            rets
        } else {
            Vec::new()
        };
        let body = self.parse_body()?;
        Some(Decl::Implementation(Implementation {
            name: name.node,
            params,
            returns,
            body,
        }))
    }

    fn parse_specs(&mut self) -> Vec<Spec> {
        let mut specs = Vec::new();
        loop {
            let free = if self.at(&Lexeme::Free) {
                match self.peek_at(1) {
                    Lexeme::Requires | Lexeme::Ensures => {
                        self.advance();
                        true
                    }
                    _ => false,
                }
            } else {
                false
            };
            match self.peek() {
                Lexeme::Requires => {
                    self.advance();
                    if let Some(expr) = self.parse_expr() {
                        specs.push(Spec::Requires { free, expr });
                    }
                    self.expect(&Lexeme::Semicolon);
                }
                Lexeme::Ensures => {
                    self.advance();
                    if let Some(expr) = self.parse_expr() {
                        specs.push(Spec::Ensures { free, expr });
                    }
                    self.expect(&Lexeme::Semicolon);
                }
                Lexeme::Modifies => {
                    self.advance();
                    let names = self.parse_ident_list();
                    specs.push(Spec::Modifies(names));
                    self.expect(&Lexeme::Semicolon);
                }
                _ => break,
            }
        }
        specs
    }

    // ─── Bodies and statements ─────────────────────────────────────

    fn parse_body(&mut self) -> Option<Body> {
        self.expect(&Lexeme::LBrace);
        let mut locals = Vec::new();
        while self.at(&Lexeme::Var) {
            self.advance();
            locals.extend(self.parse_id_type_where_list());
            self.expect(&Lexeme::Semicolon);
        }
        let stmts = self.parse_stmt_list();
        self.expect(&Lexeme::RBrace);
        Some(Body { locals, stmts })
    }

    fn parse_block(&mut self) -> Vec<Spanned<StructStmt>> {
        self.expect(&Lexeme::LBrace);
        let stmts = self.parse_stmt_list();
        self.expect(&Lexeme::RBrace);
        stmts
    }

    fn parse_stmt_list(&mut self) -> Vec<Spanned<StructStmt>> {
        let mut stmts = Vec::new();
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            let before = self.pos;
            if let Some(stmt) = self.parse_stmt() {
                stmts.push(stmt);
            }
            if self.pos == before {
                self.advance();
            }
        }
        stmts
    }

    fn parse_stmt(&mut self) -> Option<Spanned<StructStmt>> {
        if !self.enter_nesting() {
            return None;
        }
        let result = self.parse_stmt_inner();
        self.exit_nesting();
        result
    }

    fn parse_stmt_inner(&mut self) -> Option<Spanned<StructStmt>> {
        let start = self.current_span();
        let stmt = match self.peek() {
            Lexeme::Assert => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Lexeme::Semicolon);
                StructStmt::Assert(expr)
            }
            Lexeme::Assume => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Lexeme::Semicolon);
                StructStmt::Assume(expr)
            }
            Lexeme::Havoc => {
                self.advance();
                let names = self.parse_ident_list();
                self.expect(&Lexeme::Semicolon);
                StructStmt::Havoc(names)
            }
            Lexeme::Goto => {
                self.advance();
                let labels = self.parse_ident_list();
                self.expect(&Lexeme::Semicolon);
                StructStmt::Goto(labels)
            }
            Lexeme::Return => {
                self.advance();
                self.expect(&Lexeme::Semicolon);
                StructStmt::Return
            }
            Lexeme::Break => {
                self.advance();
                self.expect(&Lexeme::Semicolon);
                StructStmt::Break
            }
            Lexeme::Call => self.parse_call_stmt()?,
            Lexeme::If => self.parse_if_stmt()?,
            Lexeme::While => self.parse_while_stmt()?,
            Lexeme::Ident(_) => {
                // Label (`L:`) or assignment (`x, m[i] := ...`)
                if matches!(self.peek_at(1), Lexeme::Colon) {
                    let name = self.expect_ident()?;
                    self.expect(&Lexeme::Colon);
                    StructStmt::Label(name.node)
                } else {
                    self.parse_assign_stmt()?
                }
            }
            other => {
                let msg = format!("expected a statement, found {}", other.describe());
                self.error(&msg);
                return None;
            }
        };
        let span = start.merge(self.previous_span());
        Some(Spanned::new(stmt, span))
    }

    fn parse_call_stmt(&mut self) -> Option<StructStmt> {
        self.expect(&Lexeme::Call);
        if self.eat(&Lexeme::Forall) {
            let proc = self.expect_ident()?;
            self.expect(&Lexeme::LParen);
            let args = self.parse_expr_list(&Lexeme::RParen);
            self.expect(&Lexeme::RParen);
            self.expect(&Lexeme::Semicolon);
            return Some(StructStmt::CallForall {
                proc: proc.node,
                args,
            });
        }
        // `call p(...)` or `call x, y := p(...)`
        let first = self.expect_ident()?;
        let (lhss, proc) = if self.at(&Lexeme::LParen) {
            (Vec::new(), first.node)
        } else {
            let mut lhss = vec![first.node];
            while self.eat(&Lexeme::Comma) {
                lhss.push(self.expect_ident()?.node);
            }
            self.expect(&Lexeme::Assign);
            let proc = self.expect_ident()?;
            (lhss, proc.node)
        };
        self.expect(&Lexeme::LParen);
        let args = self.parse_expr_list(&Lexeme::RParen);
        self.expect(&Lexeme::RParen);
        self.expect(&Lexeme::Semicolon);
        Some(StructStmt::Call { lhss, proc, args })
    }

    fn parse_if_stmt(&mut self) -> Option<StructStmt> {
        self.expect(&Lexeme::If);
        self.expect(&Lexeme::LParen);
        let cond = if self.eat(&Lexeme::Star) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Lexeme::RParen);
        let then_branch = self.parse_block();
        let else_branch = if self.eat(&Lexeme::Else) {
            if self.at(&Lexeme::If) {
                // `else if` chains as a single-statement else branch
                let start = self.current_span();
                let nested = self.parse_if_stmt()?;
                let span = start.merge(self.previous_span());
                Some(vec![Spanned::new(nested, span)])
            } else {
                Some(self.parse_block())
            }
        } else {
            None
        };
        Some(StructStmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while_stmt(&mut self) -> Option<StructStmt> {
        self.expect(&Lexeme::While);
        self.expect(&Lexeme::LParen);
        let cond = if self.eat(&Lexeme::Star) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Lexeme::RParen);
        let mut invariants = Vec::new();
        loop {
            let free = if self.at(&Lexeme::Free)
                && matches!(self.peek_at(1), Lexeme::Invariant)
            {
                self.advance();
                true
            } else {
                false
            };
            if !self.at(&Lexeme::Invariant) {
                break;
            }
            self.advance();
            if let Some(expr) = self.parse_expr() {
                invariants.push(SpecClause {
                    free,
                    kind: SpecKind::LoopInvariant,
                    expr,
                });
            }
            self.expect(&Lexeme::Semicolon);
        }
        let body = self.parse_block();
        Some(StructStmt::While {
            cond,
            invariants,
            body,
        })
    }

    fn parse_assign_stmt(&mut self) -> Option<StructStmt> {
        let mut targets = vec![self.parse_assign_target()?];
        while self.eat(&Lexeme::Comma) {
            targets.push(self.parse_assign_target()?);
        }
        self.expect(&Lexeme::Assign);
        let mut values = vec![self.parse_expr()?];
        while self.eat(&Lexeme::Comma) {
            values.push(self.parse_expr()?);
        }
        self.expect(&Lexeme::Semicolon);
        if targets.len() != values.len() {
            self.error("assignment has mismatched numbers of targets and values");
        }
        Some(StructStmt::Assign(targets, values))
    }

    fn parse_assign_target(&mut self) -> Option<AssignTarget> {
        let name = self.expect_ident()?;
        let mut indexes = Vec::new();
        while self.eat(&Lexeme::LBracket) {
            let chain = self.parse_expr_list(&Lexeme::RBracket);
            self.expect(&Lexeme::RBracket);
            indexes.push(chain);
        }
        Some(AssignTarget {
            name: name.node,
            name_span: name.span,
            indexes,
        })
    }

    // ─── Types ─────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Option<Type> {
        match self.peek().clone() {
            Lexeme::IntTy => {
                self.advance();
                Some(Type::Int)
            }
            Lexeme::BoolTy => {
                self.advance();
                Some(Type::Bool)
            }
            Lexeme::Ident(name) => {
                self.advance();
                Some(Type::Custom(name))
            }
            Lexeme::LBracket => {
                self.advance();
                let mut args = vec![self.parse_type()?];
                while self.eat(&Lexeme::Comma) {
                    args.push(self.parse_type()?);
                }
                self.expect(&Lexeme::RBracket);
                let result = self.parse_type()?;
                Some(Type::Map(args, Box::new(result)))
            }
            other => {
                let msg = format!("expected a type, found {}", other.describe());
                self.error(&msg);
                None
            }
        }
    }

    // ─── Binder lists ──────────────────────────────────────────────

    fn parse_ident_list(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(first) = self.expect_ident() {
            names.push(first.node);
            while self.eat(&Lexeme::Comma) {
                if let Some(next) = self.expect_ident() {
                    names.push(next.node);
                }
            }
        }
        names
    }

    /// `x, y: int, z: bool` — names grouped before a shared type.
    fn parse_typed_var_list(&mut self, terminator: &Lexeme) -> Vec<TypedVar> {
        let mut vars = Vec::new();
        while !self.at(terminator) && !self.at(&Lexeme::Eof) {
            let mut group = vec![match self.expect_ident() {
                Some(n) => n.node,
                None => break,
            }];
            while self.eat(&Lexeme::Comma) {
                match self.expect_ident() {
                    Some(n) => group.push(n.node),
                    None => break,
                }
            }
            if !self.eat(&Lexeme::Colon) {
                self.error("expected `:` after binder names");
                break;
            }
            let ty = match self.parse_type() {
                Some(t) => t,
                None => break,
            };
            for name in group {
                vars.push(TypedVar::new(name, ty.clone()));
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        vars
    }

    /// Like `parse_typed_var_list` but each binder may carry a `where`
    /// clause: `x: int where x > 0, m: [int]int`.
    fn parse_id_type_where_sig(&mut self, terminator: &Lexeme) -> Vec<IdTypeWhere> {
        let mut vars = Vec::new();
        while !self.at(terminator) && !self.at(&Lexeme::Eof) {
            match self.parse_one_id_type_where() {
                Some(group) => vars.extend(group),
                None => break,
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        vars
    }

    fn parse_id_type_where_list(&mut self) -> Vec<IdTypeWhere> {
        let mut vars = Vec::new();
        loop {
            match self.parse_one_id_type_where() {
                Some(group) => vars.extend(group),
                None => break,
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        vars
    }

    fn parse_one_id_type_where(&mut self) -> Option<Vec<IdTypeWhere>> {
        // Names before a single `:` share the type: `a, b: int`
        let mut names = vec![self.expect_ident()?.node];
        while self.eat(&Lexeme::Comma) {
            names.push(self.expect_ident()?.node);
        }
        self.expect(&Lexeme::Colon);
        let ty = self.parse_type()?;
        let where_clause = if self.eat(&Lexeme::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Some(
            names
                .into_iter()
                .map(|name| IdTypeWhere {
                    name,
                    ty: ty.clone(),
                    where_clause: where_clause.clone(),
                })
                .collect(),
        )
    }

    // ─── Expressions ───────────────────────────────────────────────

    fn parse_expr_list(&mut self, terminator: &Lexeme) -> Vec<Thunk> {
        let mut exprs = Vec::new();
        if self.at(terminator) {
            return exprs;
        }
        loop {
            match self.parse_expr() {
                Some(e) => exprs.push(e),
                None => break,
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        exprs
    }

    pub(crate) fn parse_expr(&mut self) -> Option<Thunk> {
        if !self.enter_nesting() {
            return None;
        }
        let result = self.parse_iff();
        self.exit_nesting();
        result
    }

    fn parse_iff(&mut self) -> Option<Thunk> {
        let mut left = self.parse_implies()?;
        while self.eat(&Lexeme::Iff) {
            let right = self.parse_implies()?;
            left = self.mk_binary(BinOp::Iff, left, right);
        }
        Some(left)
    }

    fn parse_implies(&mut self) -> Option<Thunk> {
        let left = self.parse_or()?;
        if self.eat(&Lexeme::Implies) {
            // Right-associative
            let right = self.parse_implies()?;
            return Some(self.mk_binary(BinOp::Implies, left, right));
        }
        let mut left = left;
        while self.eat(&Lexeme::Explies) {
            let right = self.parse_or()?;
            left = self.mk_binary(BinOp::Explies, left, right);
        }
        Some(left)
    }

    fn parse_or(&mut self) -> Option<Thunk> {
        let mut left = self.parse_and()?;
        while self.eat(&Lexeme::OrOr) {
            let right = self.parse_and()?;
            left = self.mk_binary(BinOp::Or, left, right);
        }
        Some(left)
    }

    fn parse_and(&mut self) -> Option<Thunk> {
        let mut left = self.parse_relational()?;
        while self.eat(&Lexeme::AndAnd) {
            let right = self.parse_relational()?;
            left = self.mk_binary(BinOp::And, left, right);
        }
        Some(left)
    }

    fn parse_relational(&mut self) -> Option<Thunk> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Lexeme::Lt => BinOp::Lt,
            Lexeme::Le => BinOp::Le,
            Lexeme::Gt => BinOp::Gt,
            Lexeme::Ge => BinOp::Ge,
            Lexeme::EqEq => BinOp::Eq,
            Lexeme::Neq => BinOp::Neq,
            _ => return Some(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Some(self.mk_binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Option<Thunk> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Lexeme::Plus => BinOp::Add,
                Lexeme::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.mk_binary(op, left, right);
        }
        Some(left)
    }

    fn parse_multiplicative(&mut self) -> Option<Thunk> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Lexeme::Star => BinOp::Mul,
                Lexeme::Div => BinOp::Div,
                Lexeme::Mod => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.mk_binary(op, left, right);
        }
        Some(left)
    }

    fn parse_unary(&mut self) -> Option<Thunk> {
        let start = self.current_span();
        if self.eat(&Lexeme::Minus) {
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Some(Spanned::new(Expr::Unary(UnOp::Neg, Box::new(operand)), span));
        }
        if self.eat(&Lexeme::Not) {
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Some(Spanned::new(Expr::Unary(UnOp::Not, Box::new(operand)), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Thunk> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Lexeme::LBracket) {
                // Selection `m[a, b]` or update `m[a, b := v]`
                let mut args = vec![self.parse_expr()?];
                while self.eat(&Lexeme::Comma) {
                    args.push(self.parse_expr()?);
                }
                if self.eat(&Lexeme::Assign) {
                    let new = self.parse_expr()?;
                    let end = self.current_span();
                    self.expect(&Lexeme::RBracket);
                    let span = expr.span.merge(end);
                    expr = Spanned::new(
                        Expr::Update(Box::new(expr), args, Box::new(new)),
                        span,
                    );
                } else {
                    let end = self.current_span();
                    self.expect(&Lexeme::RBracket);
                    let span = expr.span.merge(end);
                    expr = Spanned::new(Expr::Apply(Box::new(expr), args), span);
                }
            } else if self.at(&Lexeme::LParen) && matches!(expr.node, Expr::Var(_)) {
                // Function application `f(a, b)`
                self.advance();
                let args = self.parse_expr_list(&Lexeme::RParen);
                let end = self.current_span();
                self.expect(&Lexeme::RParen);
                let span = expr.span.merge(end);
                expr = Spanned::new(Expr::Apply(Box::new(expr), args), span);
            } else {
                break;
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Thunk> {
        let start = self.current_span();
        match self.peek().clone() {
            Lexeme::Integer(n) => {
                self.advance();
                Some(Spanned::new(Expr::Literal(Value::Int(n)), start))
            }
            Lexeme::True => {
                self.advance();
                Some(Spanned::new(Expr::Literal(Value::Bool(true)), start))
            }
            Lexeme::False => {
                self.advance();
                Some(Spanned::new(Expr::Literal(Value::Bool(false)), start))
            }
            Lexeme::Ident(name) => {
                self.advance();
                Some(Spanned::new(Expr::Var(name), start))
            }
            Lexeme::Old => {
                self.advance();
                self.expect(&Lexeme::LParen);
                let inner = self.parse_expr()?;
                let end = self.current_span();
                self.expect(&Lexeme::RParen);
                Some(Spanned::new(
                    Expr::Old(Box::new(inner)),
                    start.merge(end),
                ))
            }
            Lexeme::If => {
                // Conditional expression: `if c then a else b`
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(&Lexeme::Then);
                let then_val = self.parse_expr()?;
                self.expect(&Lexeme::Else);
                let else_val = self.parse_expr()?;
                let span = start.merge(else_val.span);
                Some(Spanned::new(
                    Expr::IfElse(Box::new(cond), Box::new(then_val), Box::new(else_val)),
                    span,
                ))
            }
            Lexeme::LParen => {
                self.advance();
                if let Some(q) = self.peek_quantifier() {
                    self.advance();
                    let vars = self.parse_typed_var_list(&Lexeme::ColonColon);
                    self.expect(&Lexeme::ColonColon);
                    let body = self.parse_expr()?;
                    let end = self.current_span();
                    self.expect(&Lexeme::RParen);
                    let span = start.merge(end);
                    return Some(Spanned::new(
                        Expr::Quantified(q, vars, Box::new(body)),
                        span,
                    ));
                }
                let inner = self.parse_expr()?;
                self.expect(&Lexeme::RParen);
                Some(inner)
            }
            other => {
                let msg = format!("expected an expression, found {}", other.describe());
                self.error(&msg);
                None
            }
        }
    }

    fn peek_quantifier(&self) -> Option<QOp> {
        match self.peek() {
            Lexeme::Forall => Some(QOp::Forall),
            Lexeme::Exists => Some(QOp::Exists),
            Lexeme::Lambda => Some(QOp::Lambda),
            _ => None,
        }
    }

    fn mk_binary(&self, op: BinOp, left: Thunk, right: Thunk) -> Thunk {
        let span = left.span.merge(right.span);
        Spanned::new(Expr::Binary(op, Box::new(left), Box::new(right)), span)
    }

    // ─── Token plumbing ────────────────────────────────────────────

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].node
    }

    fn peek_at(&self, offset: usize) -> &Lexeme {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].node
    }

    fn at(&self, lexeme: &Lexeme) -> bool {
        self.peek() == lexeme
    }

    fn eat(&mut self, lexeme: &Lexeme) -> bool {
        if self.at(lexeme) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, lexeme: &Lexeme) -> bool {
        if self.eat(lexeme) {
            return true;
        }
        let msg = format!(
            "expected {}, found {}",
            lexeme.describe(),
            self.peek().describe()
        );
        self.error(&msg);
        false
    }

    fn expect_ident(&mut self) -> Option<Spanned<String>> {
        let span = self.current_span();
        if let Lexeme::Ident(name) = self.peek().clone() {
            self.advance();
            Some(Spanned::new(name, span))
        } else {
            let msg = format!("expected an identifier, found {}", self.peek().describe());
            self.error(&msg);
            None
        }
    }

    fn advance(&mut self) -> Spanned<Lexeme> {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)].span
    }

    fn error(&mut self, message: &str) {
        let span = self.current_span();
        self.diagnostics
            .push(Diagnostic::error(message.to_string(), span));
    }

    fn error_with_help(&mut self, message: &str, help: &str) {
        let span = self.current_span();
        self.diagnostics.push(
            Diagnostic::error(message.to_string(), span).with_help(help.to_string()),
        );
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_with_help(
                "nesting depth exceeded (maximum 256 levels)",
                "split deeply nested expressions or statements",
            );
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }
}
