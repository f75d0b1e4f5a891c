//! The constraint store: path constraints, per-name constraints, per-map
//! parametric constraints, and the queue of dirty map points.

use std::collections::{BTreeMap, VecDeque};

use crate::engine::error::{EngineResult, Failure};
use crate::engine::value::{Ref, Value};
use crate::syntax::ast::Thunk;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameScope {
    Globals,
    Locals,
}

/// A cached map point awaiting propagation of its map's constraints.
pub type Point = (Ref, Vec<Value>);

#[derive(Clone, Debug, Default)]
pub struct ConstraintStore {
    /// Boolean thunks over logical references: path conditions and
    /// assumed formulas. Append-only within a path.
    logical: Vec<Thunk>,
    name_globals: BTreeMap<String, Vec<Thunk>>,
    name_locals: BTreeMap<String, Vec<Thunk>>,
    /// Parametric constraints per map reference, in attachment order.
    map_constraints: BTreeMap<Ref, Vec<Thunk>>,
    /// Dirty points: `(map_ref, args)` pairs whose constraints have not
    /// been instantiated yet. Invariant: the point's cache entry exists.
    point_queue: VecDeque<Point>,
    /// True iff a logical constraint was added since the last SAT check.
    pub changed: bool,
    /// Per-(map, constraint index) enablement counters: tie-breakers for
    /// guarded case selection.
    case_counts: BTreeMap<(Ref, usize), u64>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logical(&self) -> &[Thunk] {
        &self.logical
    }

    /// Append a boolean thunk to the path constraints. A literal `true`
    /// is dropped; a literal `false` refutes the path right here.
    pub fn extend_logical(&mut self, thunk: Thunk) -> EngineResult<()> {
        match thunk.node.as_bool() {
            Some(true) => Ok(()),
            Some(false) => Err(Failure::unreachable(thunk.span)),
            None => {
                self.logical.push(thunk);
                self.changed = true;
                Ok(())
            }
        }
    }

    /// Register a thunk under every free variable it mentions, in the
    /// given scope. The constraint is assumed whenever one of those names
    /// is (re)materialized.
    pub fn extend_name(&mut self, scope: NameScope, thunk: Thunk) {
        let names = crate::engine::expr::free_vars(&thunk);
        let table = match scope {
            NameScope::Globals => &mut self.name_globals,
            NameScope::Locals => &mut self.name_locals,
        };
        for name in names {
            table.entry(name).or_default().push(thunk.clone());
        }
    }

    pub fn name_constraints(&self, scope: NameScope, name: &str) -> &[Thunk] {
        let table = match scope {
            NameScope::Globals => &self.name_globals,
            NameScope::Locals => &self.name_locals,
        };
        table.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Swap out the local-scope name constraints (procedure entry/exit).
    pub fn swap_local_names(
        &mut self,
        table: BTreeMap<String, Vec<Thunk>>,
    ) -> BTreeMap<String, Vec<Thunk>> {
        std::mem::replace(&mut self.name_locals, table)
    }

    /// Attach a parametric constraint to a map, then re-enqueue every
    /// already-materialized point of that map that is not currently
    /// queued: existing points must observe the new constraint.
    pub fn extend_map<'a>(
        &mut self,
        r: Ref,
        thunk: Thunk,
        materialized: impl Iterator<Item = &'a Vec<Value>>,
    ) {
        self.map_constraints.entry(r).or_default().push(thunk);
        for args in materialized {
            let point = (r, args.clone());
            if !self.point_queue.contains(&point) {
                self.point_queue.push_back(point);
            }
        }
    }

    pub fn map_constraints(&self, r: Ref) -> &[Thunk] {
        self.map_constraints.get(&r).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_map_constraints(&self) -> &BTreeMap<Ref, Vec<Thunk>> {
        &self.map_constraints
    }

    /// Rewrite stored map-constraint bodies (solution materialization).
    pub fn rewrite_map_constraints(&mut self, mut rewrite: impl FnMut(&Thunk) -> Thunk) {
        for constraints in self.map_constraints.values_mut() {
            for thunk in constraints.iter_mut() {
                *thunk = rewrite(thunk);
            }
        }
    }

    pub fn enqueue_point(&mut self, r: Ref, args: Vec<Value>) {
        self.point_queue.push_back((r, args));
    }

    pub fn dequeue_point(&mut self) -> Option<Point> {
        self.point_queue.pop_front()
    }

    pub fn has_queued_points(&self) -> bool {
        !self.point_queue.is_empty()
    }

    pub fn case_count(&self, r: Ref, index: usize) -> u64 {
        self.case_counts.get(&(r, index)).copied().unwrap_or(0)
    }

    pub fn bump_case(&mut self, r: Ref, index: usize) {
        *self.case_counts.entry((r, index)).or_insert(0) += 1;
    }
}
