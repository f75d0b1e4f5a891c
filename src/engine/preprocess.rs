//! The preprocessor: one pass over the declarations.
//!
//! Collects the type context, registers function macros and their defining
//! axioms, flattens structured procedure bodies into labeled basic blocks,
//! and synthesizes declarative definitions for body-less procedures. The
//! output is everything the executor needs to run an entry point.

use std::collections::BTreeMap;

use crate::diagnostic::Diagnostic;
use crate::engine::context::{ProcedureSig, TypeContext};
use crate::engine::expr;
use crate::syntax::ast::*;
use crate::syntax::span::{Span, Spanned};

/// An executable procedure definition: declared interface plus a flattened
/// body. Multiple definitions per name are allowed (implementations);
/// selection between them is nondeterministic.
#[derive(Clone, Debug)]
pub struct ProcedureDef {
    pub name: String,
    pub pos: Span,
    pub params: Vec<IdTypeWhere>,
    pub returns: Vec<IdTypeWhere>,
    pub modifies: Vec<String>,
    pub requires: Vec<SpecClause>,
    pub ensures: Vec<SpecClause>,
    pub locals: Vec<IdTypeWhere>,
    pub entry: String,
    pub blocks: BTreeMap<String, BasicBlock>,
    /// Synthesized for a body-less procedure: havoc the modifies-set and
    /// let the assumed postconditions define the behavior.
    pub declarative: bool,
}

#[derive(Clone, Debug)]
pub struct Preprocessed {
    pub context: TypeContext,
    pub procedures: BTreeMap<String, Vec<ProcedureDef>>,
    /// Function macros: unfolded at application sites.
    pub functions: BTreeMap<String, FunctionDecl>,
    /// User axioms plus function definition axioms, in declaration order.
    pub axioms: Vec<Thunk>,
    /// Where clauses of global variables.
    pub global_wheres: Vec<Thunk>,
}

pub fn preprocess(program: &Program) -> Result<Preprocessed, Vec<Diagnostic>> {
    let mut errors: Vec<Diagnostic> = Vec::new();
    let mut context = TypeContext::default();
    let mut functions: BTreeMap<String, FunctionDecl> = BTreeMap::new();
    let mut axioms: Vec<Thunk> = Vec::new();
    let mut global_wheres: Vec<Thunk> = Vec::new();
    let mut procedures: BTreeMap<String, Vec<ProcedureDef>> = BTreeMap::new();
    // Declared contracts, for binding implementations to their procedure
    let mut contracts: BTreeMap<String, (Vec<SpecClause>, Vec<SpecClause>)> = BTreeMap::new();

    // First pass: signatures, so forward references resolve
    for decl in &program.decls {
        match &decl.node {
            Decl::TypeDecl { names } => {
                for name in names {
                    context.type_names.insert(name.clone());
                }
            }
            Decl::ConstDecl { unique, names, ty } => {
                for name in names {
                    context.constants.insert(name.clone(), ty.clone());
                }
                if *unique {
                    context
                        .unique
                        .entry(ty.clone())
                        .or_default()
                        .extend(names.iter().cloned());
                }
            }
            Decl::VarDecl(vars) => {
                for v in vars {
                    context.globals.insert(v.name.clone(), v.ty.clone());
                    if let Some(w) = &v.where_clause {
                        global_wheres.push(w.clone());
                    }
                }
            }
            Decl::Function(f) => {
                context
                    .functions
                    .insert(f.name.clone(), (f.params.clone(), f.ret.clone()));
                // Functions are also usable as map constants; a nullary
                // function is a plain constant of its result type
                let const_ty = if f.params.is_empty() {
                    f.ret.clone()
                } else {
                    Type::Map(
                        f.params.iter().map(|p| p.ty.clone()).collect(),
                        Box::new(f.ret.clone()),
                    )
                };
                context.constants.insert(f.name.clone(), const_ty);
            }
            Decl::Procedure(p) => {
                context.procedures.insert(
                    p.name.clone(),
                    ProcedureSig {
                        params: p.params.clone(),
                        returns: p.returns.clone(),
                        modifies: modifies_of(&p.specs),
                    },
                );
                contracts.insert(
                    p.name.clone(),
                    (requires_of(&p.specs), ensures_of(&p.specs)),
                );
            }
            Decl::Axiom(_) | Decl::Implementation(_) => {}
        }
    }

    // Second pass: bodies, axioms, macros
    for decl in &program.decls {
        match &decl.node {
            Decl::Axiom(e) => axioms.push(e.clone()),
            Decl::Function(f) => {
                if let Some(body) = &f.body {
                    axioms.push(function_axiom(f, body));
                    functions.insert(f.name.clone(), f.clone());
                }
            }
            Decl::Procedure(p) => {
                let def = match &p.body {
                    Some(body) => flatten_procedure(p, body, decl.span, &mut errors),
                    None => declarative_def(p, decl.span),
                };
                procedures.entry(p.name.clone()).or_default().push(def);
            }
            Decl::Implementation(imp) => {
                match bind_implementation(imp, &context, &contracts, decl.span, &mut errors) {
                    Some(def) => procedures.entry(imp.name.clone()).or_default().push(def),
                    None => {}
                }
            }
            _ => {}
        }
    }

    // A synthesized declarative definition only stands in when no real
    // implementation exists
    for defs in procedures.values_mut() {
        if defs.len() > 1 && defs.iter().any(|d| !d.declarative) {
            defs.retain(|d| !d.declarative);
        }
    }

    if errors.is_empty() {
        Ok(Preprocessed {
            context,
            procedures,
            functions,
            axioms,
            global_wheres,
        })
    } else {
        Err(errors)
    }
}

fn modifies_of(specs: &[Spec]) -> Vec<String> {
    let mut names = Vec::new();
    for spec in specs {
        if let Spec::Modifies(ns) = spec {
            for n in ns {
                if !names.contains(n) {
                    names.push(n.clone());
                }
            }
        }
    }
    names
}

fn requires_of(specs: &[Spec]) -> Vec<SpecClause> {
    specs
        .iter()
        .filter_map(|s| match s {
            Spec::Requires { free, expr } => Some(SpecClause {
                free: *free,
                kind: SpecKind::Precondition,
                expr: expr.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn ensures_of(specs: &[Spec]) -> Vec<SpecClause> {
    specs
        .iter()
        .filter_map(|s| match s {
            Spec::Ensures { free, expr } => Some(SpecClause {
                free: *free,
                kind: SpecKind::Postcondition,
                expr: expr.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// `function f(x: int): int { e }` also contributes the defining axiom
/// `forall x :: f[x] == e` (or `f == e` when nullary).
fn function_axiom(f: &FunctionDecl, body: &Thunk) -> Thunk {
    let span = body.span;
    let f_var = expr::var(f.name.clone(), span);
    if f.params.is_empty() {
        return expr::binary(BinOp::Eq, f_var, body.clone());
    }
    let args: Vec<Thunk> = f
        .params
        .iter()
        .map(|p| expr::var(p.name.clone(), span))
        .collect();
    let application = Spanned::new(Expr::Apply(Box::new(f_var), args), span);
    let equality = expr::binary(BinOp::Eq, application, body.clone());
    Spanned::new(
        Expr::Quantified(QOp::Forall, f.params.clone(), Box::new(equality)),
        span,
    )
}

fn flatten_procedure(
    p: &ProcedureDecl,
    body: &Body,
    pos: Span,
    errors: &mut Vec<Diagnostic>,
) -> ProcedureDef {
    let mut flattener = Flattener::new();
    let entry = flattener.flatten(&body.stmts);
    flattener.validate(errors);
    ProcedureDef {
        name: p.name.clone(),
        pos,
        params: p.params.clone(),
        returns: p.returns.clone(),
        modifies: modifies_of(&p.specs),
        requires: requires_of(&p.specs),
        ensures: ensures_of(&p.specs),
        locals: body.locals.clone(),
        entry,
        blocks: flattener.blocks,
        declarative: false,
    }
}

fn declarative_def(p: &ProcedureDecl, pos: Span) -> ProcedureDef {
    let modifies = modifies_of(&p.specs);
    let mut stmts = Vec::new();
    if !modifies.is_empty() {
        stmts.push(Spanned::new(Statement::Havoc(modifies.clone()), pos));
    }
    let mut blocks = BTreeMap::new();
    blocks.insert(
        "__bb0".to_string(),
        BasicBlock {
            stmts,
            exit: Spanned::new(Exit::Return, pos),
        },
    );
    ProcedureDef {
        name: p.name.clone(),
        pos,
        params: p.params.clone(),
        returns: p.returns.clone(),
        modifies,
        requires: requires_of(&p.specs),
        ensures: ensures_of(&p.specs),
        locals: Vec::new(),
        entry: "__bb0".to_string(),
        blocks,
        declarative: true,
    }
}

/// Bind an `implementation` to its procedure declaration: the contract
/// clauses are rewritten from the declared formal names to the
/// implementation's.
fn bind_implementation(
    imp: &Implementation,
    context: &TypeContext,
    contracts: &BTreeMap<String, (Vec<SpecClause>, Vec<SpecClause>)>,
    pos: Span,
    errors: &mut Vec<Diagnostic>,
) -> Option<ProcedureDef> {
    let sig = match context.procedures.get(&imp.name) {
        Some(sig) => sig.clone(),
        None => {
            errors.push(Diagnostic::error(
                format!("implementation `{}` has no matching procedure", imp.name),
                pos,
            ));
            return None;
        }
    };
    if sig.params.len() != imp.params.len() || sig.returns.len() != imp.returns.len() {
        errors.push(Diagnostic::error(
            format!(
                "implementation `{}` does not match the declared signature",
                imp.name
            ),
            pos,
        ));
        return None;
    }

    let mut renaming: BTreeMap<String, Thunk> = BTreeMap::new();
    for (declared, actual) in sig.params.iter().zip(&imp.params) {
        renaming.insert(declared.name.clone(), expr::var(actual.name.clone(), pos));
    }
    for (declared, actual) in sig.returns.iter().zip(&imp.returns) {
        renaming.insert(declared.name.clone(), expr::var(actual.name.clone(), pos));
    }
    let rename =
        |clause: &SpecClause| -> SpecClause {
            SpecClause {
                free: clause.free,
                kind: clause.kind,
                expr: expr::substitute(&clause.expr, &renaming),
            }
        };

    let params: Vec<IdTypeWhere> = sig
        .params
        .iter()
        .zip(&imp.params)
        .map(|(declared, actual)| IdTypeWhere {
            name: actual.name.clone(),
            ty: actual.ty.clone(),
            where_clause: declared
                .where_clause
                .as_ref()
                .map(|w| expr::substitute(w, &renaming)),
        })
        .collect();
    let returns: Vec<IdTypeWhere> = sig
        .returns
        .iter()
        .zip(&imp.returns)
        .map(|(declared, actual)| IdTypeWhere {
            name: actual.name.clone(),
            ty: actual.ty.clone(),
            where_clause: declared
                .where_clause
                .as_ref()
                .map(|w| expr::substitute(w, &renaming)),
        })
        .collect();

    // Contract clauses live on the declaration, over the declared formal
    // names; rewrite them to this implementation's names
    let (decl_requires, decl_ensures) = contracts
        .get(&imp.name)
        .cloned()
        .unwrap_or_default();
    let requires = decl_requires.iter().map(&rename).collect();
    let ensures = decl_ensures.iter().map(&rename).collect();

    let mut flattener = Flattener::new();
    let entry = flattener.flatten(&imp.body.stmts);
    flattener.validate(errors);

    Some(ProcedureDef {
        name: imp.name.clone(),
        pos,
        params,
        returns,
        modifies: sig.modifies.clone(),
        requires,
        ensures,
        locals: imp.body.locals.clone(),
        entry,
        blocks: flattener.blocks,
        declarative: false,
    })
}

// ─── Flattener ─────────────────────────────────────────────────────

/// Lowers structured statements into labeled basic blocks.
struct Flattener {
    blocks: BTreeMap<String, BasicBlock>,
    counter: usize,
}

impl Flattener {
    fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            counter: 0,
        }
    }

    fn fresh(&mut self) -> String {
        let label = format!("__bb{}", self.counter);
        self.counter += 1;
        label
    }

    fn flatten(&mut self, stmts: &[Spanned<StructStmt>]) -> String {
        let entry = self.fresh();
        self.emit_seq(stmts, entry.clone(), Vec::new(), None, None);
        entry
    }

    fn finish(&mut self, label: String, stmts: Vec<Spanned<Statement>>, exit: Spanned<Exit>) {
        self.blocks.insert(label, BasicBlock { stmts, exit });
    }

    /// Emit a statement sequence starting in block `label` with pending
    /// statements `acc`. At the natural end, control continues to `follow`
    /// (or returns when `None`). `brk` is the label `break` jumps to.
    fn emit_seq(
        &mut self,
        stmts: &[Spanned<StructStmt>],
        mut label: String,
        mut acc: Vec<Spanned<Statement>>,
        follow: Option<&str>,
        brk: Option<&str>,
    ) {
        for stmt in stmts {
            let span = stmt.span;
            match &stmt.node {
                StructStmt::Assert(e) => acc.push(Spanned::new(
                    Statement::Predicate(SpecClause::check(SpecKind::Inline, e.clone())),
                    span,
                )),
                StructStmt::Assume(e) => acc.push(Spanned::new(
                    Statement::Predicate(SpecClause::assume(SpecKind::Inline, e.clone())),
                    span,
                )),
                StructStmt::Havoc(names) => {
                    acc.push(Spanned::new(Statement::Havoc(names.clone()), span))
                }
                StructStmt::Assign(targets, values) => acc.push(Spanned::new(
                    Statement::Assign(targets.clone(), values.clone()),
                    span,
                )),
                StructStmt::Call { lhss, proc, args } => acc.push(Spanned::new(
                    Statement::Call {
                        lhss: lhss.clone(),
                        proc: proc.clone(),
                        args: args.clone(),
                    },
                    span,
                )),
                StructStmt::CallForall { proc, args } => acc.push(Spanned::new(
                    Statement::CallForall {
                        proc: proc.clone(),
                        args: args.clone(),
                    },
                    span,
                )),
                StructStmt::Label(user_label) => {
                    self.finish(
                        label,
                        acc,
                        Spanned::new(Exit::Goto(vec![user_label.clone()]), span),
                    );
                    label = user_label.clone();
                    acc = Vec::new();
                }
                StructStmt::Goto(targets) => {
                    self.finish(label, acc, Spanned::new(Exit::Goto(targets.clone()), span));
                    label = self.fresh();
                    acc = Vec::new();
                }
                StructStmt::Return => {
                    self.finish(label, acc, Spanned::new(Exit::Return, span));
                    label = self.fresh();
                    acc = Vec::new();
                }
                StructStmt::Break => {
                    let target = brk.unwrap_or(BREAK_OUTSIDE_LOOP);
                    self.finish(
                        label,
                        acc,
                        Spanned::new(Exit::Goto(vec![target.to_string()]), span),
                    );
                    label = self.fresh();
                    acc = Vec::new();
                }
                StructStmt::If {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    let then_label = self.fresh();
                    let join_label = self.fresh();
                    let else_stmts = else_branch.as_deref().unwrap_or(&[]);
                    // With a real condition the else path must assume its
                    // negation even when no else branch was written
                    let else_label = if cond.is_some() || !else_stmts.is_empty() {
                        Some(self.fresh())
                    } else {
                        None
                    };
                    let successors = vec![
                        then_label.clone(),
                        else_label.clone().unwrap_or_else(|| join_label.clone()),
                    ];
                    self.finish(label, acc, Spanned::new(Exit::Goto(successors), span));

                    let mut then_acc = Vec::new();
                    if let Some(c) = cond {
                        then_acc.push(Spanned::new(
                            Statement::Predicate(SpecClause::assume(SpecKind::Inline, c.clone())),
                            c.span,
                        ));
                    }
                    self.emit_seq(then_branch, then_label, then_acc, Some(&join_label), brk);

                    if let Some(else_label) = else_label {
                        let mut else_acc = Vec::new();
                        if let Some(c) = cond {
                            else_acc.push(Spanned::new(
                                Statement::Predicate(SpecClause::assume(
                                    SpecKind::Inline,
                                    expr::not(c.clone()),
                                )),
                                c.span,
                            ));
                        }
                        self.emit_seq(else_stmts, else_label, else_acc, Some(&join_label), brk);
                    }

                    label = join_label;
                    acc = Vec::new();
                }
                StructStmt::While {
                    cond,
                    invariants,
                    body,
                } => {
                    let head_label = self.fresh();
                    let body_label = self.fresh();
                    let done_label = self.fresh();
                    let exit_label = cond.as_ref().map(|_| self.fresh());

                    self.finish(
                        label,
                        acc,
                        Spanned::new(Exit::Goto(vec![head_label.clone()]), span),
                    );

                    // Loop head: invariants checked on entry and after
                    // every iteration, then branch into or past the body
                    let head_stmts: Vec<Spanned<Statement>> = invariants
                        .iter()
                        .map(|inv| {
                            Spanned::new(Statement::Predicate(inv.clone()), inv.expr.span)
                        })
                        .collect();
                    let successors = vec![
                        body_label.clone(),
                        exit_label.clone().unwrap_or_else(|| done_label.clone()),
                    ];
                    self.finish(
                        head_label.clone(),
                        head_stmts,
                        Spanned::new(Exit::Goto(successors), span),
                    );

                    let mut body_acc = Vec::new();
                    if let Some(c) = cond {
                        body_acc.push(Spanned::new(
                            Statement::Predicate(SpecClause::assume(SpecKind::Inline, c.clone())),
                            c.span,
                        ));
                    }
                    self.emit_seq(
                        body,
                        body_label,
                        body_acc,
                        Some(&head_label),
                        Some(&done_label),
                    );

                    if let (Some(exit_label), Some(c)) = (exit_label, cond) {
                        let exit_stmts = vec![Spanned::new(
                            Statement::Predicate(SpecClause::assume(
                                SpecKind::Inline,
                                expr::not(c.clone()),
                            )),
                            c.span,
                        )];
                        self.finish(
                            exit_label,
                            exit_stmts,
                            Spanned::new(Exit::Goto(vec![done_label.clone()]), span),
                        );
                    }

                    label = done_label;
                    acc = Vec::new();
                }
            }
        }

        let end_span = stmts.last().map(|s| s.span).unwrap_or_else(Span::synthetic);
        match follow {
            Some(target) => self.finish(
                label,
                acc,
                Spanned::new(Exit::Goto(vec![target.to_string()]), end_span),
            ),
            None => self.finish(label, acc, Spanned::new(Exit::Return, end_span)),
        }
    }

    /// Every goto target must name a block.
    fn validate(&self, errors: &mut Vec<Diagnostic>) {
        for block in self.blocks.values() {
            if let Exit::Goto(targets) = &block.exit.node {
                for target in targets {
                    if target == BREAK_OUTSIDE_LOOP {
                        errors.push(Diagnostic::error(
                            "break outside of a loop".to_string(),
                            block.exit.span,
                        ));
                    } else if !self.blocks.contains_key(target) {
                        errors.push(Diagnostic::error(
                            format!("goto target `{}` is not a label in this body", target),
                            block.exit.span,
                        ));
                    }
                }
            }
        }
    }
}

const BREAK_OUTSIDE_LOOP: &str = "__break_outside_loop";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_source;

    fn prep(source: &str) -> Preprocessed {
        let program = parse_source(source, 0).expect("parse");
        preprocess(&program).expect("preprocess")
    }

    #[test]
    fn while_loop_flattens_to_head_body_exit() {
        let pre = prep(
            "procedure p(n: int) {\n\
               var i: int;\n\
               i := 0;\n\
               while (i < n) invariant i >= 0; { i := i + 1; }\n\
             }",
        );
        let def = &pre.procedures["p"][0];
        // Entry, head, body, done, exit-condition and the tail block
        assert!(def.blocks.len() >= 5);
        // The head block carries the invariant and branches two ways
        let head = def
            .blocks
            .values()
            .find(|b| {
                b.stmts.iter().any(|s| {
                    matches!(
                        &s.node,
                        Statement::Predicate(c) if c.kind == SpecKind::LoopInvariant
                    )
                })
            })
            .expect("head block with invariant");
        match &head.exit.node {
            Exit::Goto(targets) => assert_eq!(targets.len(), 2),
            other => panic!("expected goto, got {:?}", other),
        }
    }

    #[test]
    fn if_without_else_still_assumes_negation() {
        let pre = prep("procedure p(x: int) { if (x > 0) { havoc x; } }");
        let def = &pre.procedures["p"][0];
        let negated_assumes = def
            .blocks
            .values()
            .flat_map(|b| &b.stmts)
            .filter(|s| match &s.node {
                Statement::Predicate(c) => {
                    c.free && matches!(c.expr.node, Expr::Unary(UnOp::Not, _))
                }
                _ => false,
            })
            .count();
        assert_eq!(negated_assumes, 1);
    }

    #[test]
    fn body_less_procedure_gets_declarative_definition() {
        let pre = prep(
            "var g: int;\n\
             procedure magic() returns (r: int); modifies g; ensures r > g;",
        );
        let def = &pre.procedures["magic"][0];
        assert!(def.declarative);
        assert_eq!(def.modifies, vec!["g"]);
        let entry = &def.blocks[&def.entry];
        assert!(matches!(entry.stmts[0].node, Statement::Havoc(_)));
        assert_eq!(def.ensures.len(), 1);
    }

    #[test]
    fn implementation_contracts_are_renamed() {
        let pre = prep(
            "procedure inc(x: int) returns (y: int); ensures y == x + 1;\n\
             implementation inc(a: int) returns (b: int) { b := a + 1; }",
        );
        let defs = &pre.procedures["inc"];
        // The real implementation supersedes the declarative stand-in
        assert_eq!(defs.len(), 1);
        let imp = &defs[0];
        assert!(!imp.declarative);
        let rendered = crate::engine::expr::format_thunk(&imp.ensures[0].expr);
        assert_eq!(rendered, "(b == (a + 1))");
    }

    #[test]
    fn function_body_produces_defining_axiom() {
        let pre = prep("function inc(x: int): int { x + 1 }");
        assert!(pre.functions.contains_key("inc"));
        assert_eq!(pre.axioms.len(), 1);
        assert!(matches!(
            pre.axioms[0].node,
            Expr::Quantified(QOp::Forall, _, _)
        ));
        // Usable as a map constant too
        assert_eq!(
            pre.context.constants["inc"],
            Type::Map(vec![Type::Int], Box::new(Type::Int))
        );
    }

    #[test]
    fn unique_constants_recorded_per_type() {
        let pre = prep("type T; const unique a, b: T; const c: T;");
        let ty = Type::Custom("T".to_string());
        assert_eq!(pre.context.unique[&ty], vec!["a", "b"]);
        assert!(pre.context.is_constant("c"));
        assert_eq!(pre.context.unique_siblings(&ty, "a"), vec!["b"]);
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let program = parse_source("procedure p() { break; }", 0).expect("parse");
        let err = preprocess(&program).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("break")));
    }

    #[test]
    fn goto_unknown_label_is_rejected() {
        let program = parse_source("procedure p() { goto nowhere; }", 0).expect("parse");
        assert!(preprocess(&program).is_err());
    }

    #[test]
    fn labels_and_gotos_survive_flattening() {
        let pre = prep(
            "procedure p() {\n\
               goto mid, fin;\n\
               mid: goto fin;\n\
               fin: return;\n\
             }",
        );
        let def = &pre.procedures["p"][0];
        assert!(def.blocks.contains_key("mid"));
        assert!(def.blocks.contains_key("fin"));
        match &def.blocks[&def.entry].exit.node {
            Exit::Goto(ts) => assert_eq!(ts, &vec!["mid".to_string(), "fin".to_string()]),
            other => panic!("expected goto, got {:?}", other),
        }
    }
}
