//! The executor: statements, goto selection, and the procedure call flow.
//!
//! One [`Engine`] runs one execution of one entry point. Nondeterministic
//! choices come from the generator; constraint satisfiability is checked
//! after every statement and at procedure boundaries. Branch retry on an
//! infeasible successor restores a host-side snapshot of the symbolic
//! state.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::constraints::{ConstraintStore, NameScope};
use crate::engine::error::{EngineResult, Failure};
use crate::engine::expr;
use crate::engine::generator::Generator;
use crate::engine::memory::{Memory, Region, StoreMap};
use crate::engine::preprocess::{Preprocessed, ProcedureDef};
use crate::solver::Solver;
use crate::syntax::ast::{
    AssignTarget, Exit, Expr, SpecClause, Statement, Thunk, Type,
};
use crate::syntax::span::{Span, Spanned};

/// Caller state saved across a procedure call.
#[derive(Clone, Debug)]
pub(crate) struct Frame {
    locals: StoreMap,
    old: StoreMap,
    modified: BTreeSet<String>,
    local_types: BTreeMap<String, Type>,
    name_locals: BTreeMap<String, Vec<Thunk>>,
}

/// Everything a goto retry must roll back.
pub(crate) struct Snapshot {
    mem: Memory,
    cons: ConstraintStore,
    local_types: BTreeMap<String, Type>,
    frames: Vec<Frame>,
    in_old: bool,
    scopes: usize,
}

/// How a procedure is entered: calls check preconditions against the
/// actuals, the entry point assumes them to constrain generated inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryMode {
    Entry,
    Call,
}

pub struct Engine<'p, S: Solver, G: Generator> {
    pub(crate) prog: &'p Preprocessed,
    pub(crate) mem: Memory,
    pub(crate) cons: ConstraintStore,
    pub(crate) solver: S,
    pub(crate) gen: G,
    pub(crate) solve_passing: bool,
    /// Magnitude bound forwarded to solver picks.
    pub(crate) solver_bound: Option<i64>,
    pub(crate) local_types: BTreeMap<String, Type>,
    pub(crate) frames: Vec<Frame>,
    /// Visit counts per (procedure, label): goto selection prefers
    /// less-visited successors.
    jump_counts: BTreeMap<(String, String), u64>,
    pub(crate) scopes: usize,
    pub(crate) in_old: bool,
    /// Guards macro unfolding against accidental recursion.
    pub(crate) unfold_depth: u32,
}

pub(crate) const MAX_UNFOLD_DEPTH: u32 = 64;

impl<'p, S: Solver, G: Generator> Engine<'p, S, G> {
    pub fn new(
        prog: &'p Preprocessed,
        solver: S,
        gen: G,
        solve_passing: bool,
        solver_bound: Option<i64>,
    ) -> Self {
        Self {
            prog,
            mem: Memory::new(),
            cons: ConstraintStore::new(),
            solver,
            gen,
            solve_passing,
            solver_bound,
            local_types: BTreeMap::new(),
            frames: Vec::new(),
            jump_counts: BTreeMap::new(),
            scopes: 0,
            in_old: false,
            unfold_depth: 0,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn constraints(&self) -> &ConstraintStore {
        &self.cons
    }

    pub fn generator(&self) -> &G {
        &self.gen
    }

    /// Tear down into the final user-visible state.
    pub fn into_state(self) -> (Memory, ConstraintStore) {
        (self.mem, self.cons)
    }

    /// Seed name constraints and assume the axioms. An inconsistent axiom
    /// set surfaces as Unreachable here, before any code runs.
    pub fn initialize(&mut self) -> EngineResult<()> {
        for w in &self.prog.global_wheres {
            self.cons.extend_name(NameScope::Globals, w.clone());
        }
        for a in &self.prog.axioms {
            self.cons.extend_name(NameScope::Globals, a.clone());
        }
        let axioms = self.prog.axioms.clone();
        for a in &axioms {
            let v = self.eval(a)?;
            self.cons.extend_logical(v)?;
            self.check_sat(a.span)?;
        }
        Ok(())
    }

    /// Execute `entry` as the test's entry point. Formals materialize
    /// lazily as inputs; preconditions are assumed; postconditions are
    /// checked. On success the formals and returns are re-published into
    /// the final memory's local region.
    pub fn exec_entry(&mut self, entry: &str) -> EngineResult<()> {
        let prog = self.prog;
        let defs = match prog.procedures.get(entry) {
            Some(defs) => defs,
            None => {
                return Err(Failure::unsupported(
                    format!("unknown entry procedure `{}`", entry),
                    Span::synthetic(),
                ))
            }
        };
        let def = &defs[self.pick_definition(defs.len())];
        let published = self.exec_procedure(def, EntryMode::Entry, Vec::new(), def.pos)?;
        for (name, value) in published {
            self.mem.set_var(Region::Locals, &name, value);
        }
        if self.solve_passing {
            self.solve_and_concretize(def.pos)?;
        }
        Ok(())
    }

    fn pick_definition(&mut self, count: usize) -> usize {
        if count > 1 {
            self.gen.gen_index(count)
        } else {
            0
        }
    }

    // ─── Procedure call flow ───────────────────────────────────────

    /// Run one procedure definition and return the published bindings:
    /// out-formal values (and, for the entry point, the in-formals too).
    fn exec_procedure(
        &mut self,
        def: &'p ProcedureDef,
        mode: EntryMode,
        actuals: Vec<Thunk>,
        pos: Span,
    ) -> EngineResult<Vec<(String, Thunk)>> {
        // 1. Snapshot globals into Old, clear the modified-set, push the
        //    caller's memory
        let caller_old = self.mem.swap_old(self.mem.store(Region::Globals).clone());
        let frame = Frame {
            locals: self.mem.swap_locals(StoreMap::new()),
            old: caller_old,
            modified: std::mem::take(&mut self.mem.modified),
            local_types: std::mem::take(&mut self.local_types),
            name_locals: self.cons.swap_local_names(BTreeMap::new()),
        };
        self.frames.push(frame);

        // 2. Install formals and locals as the new local scope
        for v in def.params.iter().chain(&def.returns).chain(&def.locals) {
            self.local_types.insert(v.name.clone(), v.ty.clone());
        }
        for (formal, actual) in def.params.iter().zip(actuals) {
            self.mem.set_var(Region::Locals, &formal.name, actual);
        }

        // 3. Register where clauses of formals and locals
        for v in def.params.iter().chain(&def.returns).chain(&def.locals) {
            if let Some(w) = &v.where_clause {
                self.cons.extend_name(NameScope::Locals, w.clone());
            }
        }

        // 4. Preconditions: checked on calls, assumed at the entry point
        for clause in &def.requires {
            if mode == EntryMode::Entry || clause.free {
                let v = self.eval(&clause.expr)?;
                self.cons.extend_logical(v)?;
            } else {
                self.check_clause(clause, clause.expr.span)?;
            }
            self.check_sat(clause.expr.span)?;
        }

        // 5. Execute the block graph until a return
        let exit_pos = self.exec_block_chain(def, &def.entry)?;

        // 6. Postconditions at the exit; a declarative definition's
        //    postconditions define its behavior and are assumed
        for clause in &def.ensures {
            if def.declarative || clause.free {
                let v = self.eval(&clause.expr)?;
                self.cons.extend_logical(v)?;
            } else {
                self.check_clause(clause, exit_pos)?;
            }
            self.check_sat(exit_pos)?;
        }

        // 7. Read out-formals (materializing unassigned ones) while the
        //    local scope is still installed
        let mut published: Vec<(String, Thunk)> = Vec::new();
        if mode == EntryMode::Entry {
            for formal in &def.params {
                let v = self.eval(&expr::var(formal.name.clone(), pos))?;
                published.push((formal.name.clone(), v));
            }
        }
        for ret in &def.returns {
            let v = self.eval(&expr::var(ret.name.clone(), pos))?;
            published.push((ret.name.clone(), v));
        }

        // 8. Pop the caller memory; propagate clean old values (globals
        //    the caller had not modified keep the value they had when the
        //    callee materialized them)
        let frame = self.frames.pop().expect("frame pushed above");
        let callee_old = self.mem.swap_old(frame.old);
        self.mem.swap_locals(frame.locals);
        self.local_types = frame.local_types;
        self.cons.swap_local_names(frame.name_locals);
        let callee_modified = std::mem::replace(&mut self.mem.modified, frame.modified);
        for (g, v) in callee_old {
            if !self.mem.modified.contains(&g) && self.mem.get_var(Region::Old, &g).is_none() {
                self.mem.set_var(Region::Old, &g, v);
            }
        }
        self.mem.modified.extend(callee_modified);

        Ok(published)
    }

    /// Assert a checked clause: literal truth decides immediately; a
    /// symbolic clause forks on a generator coin — assume it and go on,
    /// or assume its negation, solve for a witness, and fail.
    fn check_clause(&mut self, clause: &SpecClause, at: Span) -> EngineResult<()> {
        let v = self.eval(&clause.expr)?;
        match v.node.as_bool() {
            Some(true) => Ok(()),
            Some(false) => {
                self.solve_and_concretize(at)?;
                Err(Failure::assertion(clause.clone(), clause.expr.span, at))
            }
            None => {
                if self.gen.gen_bool() {
                    self.cons.extend_logical(v)
                } else {
                    self.cons.extend_logical(expr::not(v))?;
                    self.solve_and_concretize(at)?;
                    Err(Failure::assertion(clause.clone(), clause.expr.span, at))
                }
            }
        }
    }

    // ─── Blocks and goto selection ─────────────────────────────────

    fn exec_block_chain(&mut self, def: &'p ProcedureDef, label: &str) -> EngineResult<Span> {
        let block = match def.blocks.get(label) {
            Some(b) => b,
            None => {
                return Err(Failure::unsupported(
                    format!("missing block `{}`", label),
                    Span::synthetic(),
                ))
            }
        };
        for stmt in &block.stmts {
            self.exec_stmt(stmt)?;
            self.check_sat(stmt.span)?;
        }
        match &block.exit.node {
            Exit::Return => Ok(block.exit.span),
            Exit::Goto(labels) => self.exec_goto(def, labels, block.exit.span),
        }
    }

    /// Pick a successor, preferring less-visited labels; an Unreachable
    /// in the chosen branch rolls the state back and tries a sibling.
    fn exec_goto(
        &mut self,
        def: &'p ProcedureDef,
        labels: &[String],
        pos: Span,
    ) -> EngineResult<Span> {
        let mut remaining: Vec<String> = labels.to_vec();
        let mut last_unreachable: Option<Failure> = None;
        while !remaining.is_empty() {
            remaining.sort_by_key(|l| self.jump_count(def, l));
            let idx = if remaining.len() > 1 {
                self.gen.gen_index(remaining.len())
            } else {
                0
            };
            let chosen = remaining.remove(idx);
            *self
                .jump_counts
                .entry((def.name.clone(), chosen.clone()))
                .or_insert(0) += 1;

            let snapshot = self.snapshot();
            match self.exec_block_chain(def, &chosen) {
                Err(f) if f.is_unreachable() => {
                    self.restore(snapshot);
                    last_unreachable = Some(f);
                }
                other => return other,
            }
        }
        Err(last_unreachable.unwrap_or_else(|| Failure::unreachable(pos)))
    }

    fn jump_count(&self, def: &ProcedureDef, label: &str) -> u64 {
        self.jump_counts
            .get(&(def.name.clone(), label.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            mem: self.mem.clone(),
            cons: self.cons.clone(),
            local_types: self.local_types.clone(),
            frames: self.frames.clone(),
            in_old: self.in_old,
            scopes: self.scopes,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        self.mem = snapshot.mem;
        self.cons = snapshot.cons;
        self.local_types = snapshot.local_types;
        self.frames = snapshot.frames;
        self.in_old = snapshot.in_old;
        self.scopes = snapshot.scopes;
    }

    // ─── Statements ────────────────────────────────────────────────

    fn exec_stmt(&mut self, stmt: &Spanned<Statement>) -> EngineResult<()> {
        let span = stmt.span;
        match &stmt.node {
            Statement::Predicate(clause) => {
                if clause.free {
                    let v = self.eval(&clause.expr)?;
                    self.cons.extend_logical(v)
                } else {
                    self.check_clause(clause, span)
                }
            }
            Statement::Havoc(names) => {
                for name in names {
                    let region = self.write_region(name);
                    self.mem.forget_var(region, name);
                    if region == Region::Globals {
                        self.mem.modified.insert(name.clone());
                    }
                }
                Ok(())
            }
            Statement::Assign(targets, values) => self.exec_assign(targets, values),
            Statement::Call { lhss, proc, args } => self.exec_call(lhss, proc, args, span),
            // `call forall` adds no constraints and modifies nothing
            Statement::CallForall { .. } => Ok(()),
        }
    }

    /// Parallel assignment. Map-write targets normalize into map updates
    /// on the right-hand side first: `m[i] := v` is `m := m[i := v]`.
    fn exec_assign(&mut self, targets: &[AssignTarget], values: &[Thunk]) -> EngineResult<()> {
        let mut writes: Vec<(String, Thunk)> = Vec::new();
        for (target, rhs) in targets.iter().zip(values) {
            let rhs = if target.indexes.is_empty() {
                rhs.clone()
            } else {
                let base = expr::var(target.name.clone(), target.name_span);
                nest_updates(base, &target.indexes, rhs.clone())
            };
            let value = self.eval(&rhs)?;
            writes.push((target.name.clone(), value));
        }
        for (name, value) in writes {
            let region = self.write_region(&name);
            self.mem.set_var(region, &name, value);
            if region == Region::Globals {
                self.mem.modified.insert(name);
            }
        }
        Ok(())
    }

    fn exec_call(
        &mut self,
        lhss: &[String],
        proc: &str,
        args: &[Thunk],
        span: Span,
    ) -> EngineResult<()> {
        let prog = self.prog;
        let defs = match prog.procedures.get(proc) {
            Some(defs) => defs,
            None => {
                return Err(Failure::unsupported(
                    format!("call to unknown procedure `{}`", proc),
                    span,
                ))
            }
        };
        let def = &defs[self.pick_definition(defs.len())];
        let mut actuals = Vec::with_capacity(args.len());
        for a in args {
            actuals.push(self.eval(a)?);
        }
        let published = self
            .exec_procedure(def, EntryMode::Call, actuals, span)
            .map_err(|f| f.with_frame(span, proc))?;
        for (lhs, (_, value)) in lhss.iter().zip(published) {
            let region = self.write_region(lhs);
            self.mem.set_var(region, lhs, value);
            if region == Region::Globals {
                self.mem.modified.insert(lhs.clone());
            }
        }
        Ok(())
    }

    /// Region selection for writes: local scope, then global, then
    /// constant.
    pub(crate) fn write_region(&self, name: &str) -> Region {
        if self.local_types.contains_key(name) {
            Region::Locals
        } else if self.prog.context.is_global(name) {
            Region::Globals
        } else {
            Region::Constants
        }
    }
}

/// `m[a][b, c] := v` becomes `m := m[a := m[a][b, c := v]]`.
fn nest_updates(base: Thunk, chains: &[Vec<Thunk>], rhs: Thunk) -> Thunk {
    if chains.is_empty() {
        return rhs;
    }
    let first = &chains[0];
    let span = base.span;
    let inner_base = Spanned::new(
        Expr::Apply(Box::new(base.clone()), first.clone()),
        span,
    );
    let new_value = nest_updates(inner_base, &chains[1..], rhs);
    Spanned::new(
        Expr::Update(Box::new(base), first.clone(), Box::new(new_value)),
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{format_thunk, lit};
    use crate::engine::value::Value;

    #[test]
    fn nested_map_writes_normalize_to_updates() {
        let base = expr::var("m", Span::synthetic());
        let chains = vec![
            vec![lit(Value::int(1), Span::synthetic())],
            vec![lit(Value::int(2), Span::synthetic())],
        ];
        let rhs = lit(Value::int(9), Span::synthetic());
        let normalized = nest_updates(base, &chains, rhs);
        assert_eq!(format_thunk(&normalized), "m[1 := m[1][2 := 9]]");
    }

    #[test]
    fn single_level_write_is_one_update() {
        let base = expr::var("m", Span::synthetic());
        let chains = vec![vec![lit(Value::int(4), Span::synthetic())]];
        let rhs = lit(Value::Bool(true), Span::synthetic());
        let normalized = nest_updates(base, &chains, rhs);
        assert_eq!(format_thunk(&normalized), "m[4 := true]");
    }
}
