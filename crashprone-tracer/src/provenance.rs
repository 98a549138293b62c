//! Bounded backward provenance search
//!
//! Starting from the register a crash-prone instruction depends on, walk the
//! definition chain backward breadth-first: the instruction that last wrote
//! the register, then the writers of the registers *that* instruction read,
//! and so on, up to a depth limit. Only the calling thread's history is
//! consulted, and only records still inside its window.

use crate::history::{DynId, ThreadState};
use crate::register::Register;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An instruction found on a register's definition chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Code offset of the defining instruction
    pub offset: u64,
    /// BFS layer the offset was first reached at (1 = direct definition)
    pub depth: u32,
    pub hit_count: u64,
}

/// Provenance of one risk register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTrace {
    pub register: Register,
    /// Unique by offset, in discovery order
    pub sources: Vec<SourceEntry>,
}

impl RegisterTrace {
    pub fn new(register: Register) -> Self {
        Self {
            register,
            sources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn source(&self, offset: u64) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.offset == offset)
    }

    /// Count one more hit on `offset`; a new offset keeps `depth`
    fn record_hit(&mut self, offset: u64, depth: u32) {
        self.add_hits(SourceEntry {
            offset,
            depth,
            hit_count: 1,
        });
    }

    fn add_hits(&mut self, entry: SourceEntry) {
        match self.sources.iter_mut().find(|s| s.offset == entry.offset) {
            Some(existing) => existing.hit_count += entry.hit_count,
            None => self.sources.push(entry),
        }
    }

    /// Fold another trace of the same register into this one.
    ///
    /// Hit counts of shared offsets add up; offsets only in `other` are
    /// appended with their depth. Nothing is ever removed.
    pub fn merge(&mut self, other: &RegisterTrace) {
        for entry in &other.sources {
            self.add_hits(*entry);
        }
    }
}

/// Trace `reg` as seen by the instruction with id `query`.
///
/// Returns an empty trace when the register has no definition strictly older
/// than `query` within the thread's window.
pub fn trace_register(
    state: &ThreadState,
    query: DynId,
    reg: Register,
    depth_limit: u32,
) -> RegisterTrace {
    trace_register_with(state, query, reg, depth_limit, |_| {})
}

/// [`trace_register`], calling `on_visit` for every dynamic id taken off the
/// frontier (stale ones included).
pub fn trace_register_with(
    state: &ThreadState,
    query: DynId,
    reg: Register,
    depth_limit: u32,
    mut on_visit: impl FnMut(DynId),
) -> RegisterTrace {
    let mut trace = RegisterTrace::new(reg);

    let Some(seed) = state.live_definition(reg, query) else {
        return trace;
    };

    let mut visited = HashSet::from([seed]);
    let mut frontier = vec![seed];

    for depth in 1..=depth_limit {
        if frontier.is_empty() {
            break;
        }

        let mut next = Vec::new();
        for id in frontier {
            on_visit(id);

            // Slot reused since this id was queued
            let Some(record) = state.history().get(id) else {
                continue;
            };
            trace.record_hit(record.offset, depth);

            if depth == depth_limit {
                continue;
            }
            for read in record.reads.iter() {
                if let Some(parent) = state.live_definition(read, query) {
                    if visited.insert(parent) {
                        next.push(parent);
                    }
                }
            }
        }
        frontier = next;
    }

    tracing::trace!(
        thread = state.thread(),
        query = query.get(),
        register = %reg,
        sources = trace.len(),
        "provenance search done"
    );
    trace
}
