//! The four-region symbolic store.
//!
//! Regions hold thunks, not values: an entry becomes literal only once
//! evaluation or solution materialization makes it so. Map instances live
//! in an arena keyed by map reference and are never embedded in values.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::value::{Ref, Value};
use crate::syntax::ast::{Thunk, Type};

pub type StoreMap = BTreeMap<String, Thunk>;

/// A finite cache of selected map points: argument tuple → result thunk.
pub type MapInstance = BTreeMap<Vec<Value>, Thunk>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Locals,
    Globals,
    Old,
    Constants,
}

#[derive(Clone, Debug, Default)]
pub struct Memory {
    locals: StoreMap,
    globals: StoreMap,
    old: StoreMap,
    constants: StoreMap,
    maps: Vec<MapInstance>,
    map_types: Vec<Type>,
    /// Global names written since the current procedure was entered.
    pub modified: BTreeSet<String>,
    /// Solver-assigned values for logical references.
    pub solution: BTreeMap<Ref, Value>,
    ref_types: BTreeMap<Ref, Type>,
    next_ref: Ref,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, region: Region) -> &StoreMap {
        match region {
            Region::Locals => &self.locals,
            Region::Globals => &self.globals,
            Region::Old => &self.old,
            Region::Constants => &self.constants,
        }
    }

    pub fn store_mut(&mut self, region: Region) -> &mut StoreMap {
        match region {
            Region::Locals => &mut self.locals,
            Region::Globals => &mut self.globals,
            Region::Old => &mut self.old,
            Region::Constants => &mut self.constants,
        }
    }

    pub fn get_var(&self, region: Region, name: &str) -> Option<&Thunk> {
        self.store(region).get(name)
    }

    pub fn set_var(&mut self, region: Region, name: &str, thunk: Thunk) {
        self.store_mut(region).insert(name.to_string(), thunk);
    }

    pub fn forget_var(&mut self, region: Region, name: &str) {
        self.store_mut(region).remove(name);
    }

    /// Replace the local region wholesale (procedure entry/exit).
    pub fn swap_locals(&mut self, locals: StoreMap) -> StoreMap {
        std::mem::replace(&mut self.locals, locals)
    }

    pub fn swap_old(&mut self, old: StoreMap) -> StoreMap {
        std::mem::replace(&mut self.old, old)
    }

    // ─── Logical references ────────────────────────────────────────

    pub fn fresh_logical(&mut self, ty: Type) -> Ref {
        let r = self.next_ref;
        self.next_ref += 1;
        self.ref_types.insert(r, ty);
        r
    }

    pub fn ref_type(&self, r: Ref) -> Option<&Type> {
        self.ref_types.get(&r)
    }

    pub fn ref_types(&self) -> &BTreeMap<Ref, Type> {
        &self.ref_types
    }

    /// Merge a solver model into the logical solution.
    pub fn merge_solution(&mut self, model: BTreeMap<Ref, Value>) {
        self.solution.extend(model);
    }

    // ─── Map heap ──────────────────────────────────────────────────

    pub fn fresh_map_ref(&mut self, ty: Type, instance: MapInstance) -> Ref {
        debug_assert!(ty.is_map());
        self.maps.push(instance);
        self.map_types.push(ty);
        self.maps.len() - 1
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn get_map_instance(&self, r: Ref) -> &MapInstance {
        &self.maps[r]
    }

    pub fn map_type(&self, r: Ref) -> &Type {
        &self.map_types[r]
    }

    pub fn set_map_value(&mut self, r: Ref, args: Vec<Value>, value: Thunk) {
        self.maps[r].insert(args, value);
    }

    /// Apply a rewriting to every visible thunk: all four regions and all
    /// cached map points. Used when a solver model is materialized.
    pub fn rewrite_all(&mut self, mut rewrite: impl FnMut(&Thunk) -> Thunk) {
        for region in [Region::Locals, Region::Globals, Region::Old, Region::Constants] {
            let store = self.store_mut(region);
            let rewritten: Vec<(String, Thunk)> = store
                .iter()
                .map(|(name, thunk)| (name.clone(), rewrite(thunk)))
                .collect();
            for (name, thunk) in rewritten {
                store.insert(name, thunk);
            }
        }
        for instance in &mut self.maps {
            let rewritten: Vec<(Vec<Value>, Thunk)> = instance
                .iter()
                .map(|(args, thunk)| (args.clone(), rewrite(thunk)))
                .collect();
            for (args, thunk) in rewritten {
                instance.insert(args, thunk);
            }
        }
    }
}
