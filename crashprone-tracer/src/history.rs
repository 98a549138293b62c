//! Per-thread execution history
//!
//! Each instrumented thread owns a [`ThreadState`]: a ring of the most recent
//! dynamic instruction records plus a shadow table mapping every register to
//! the dynamic id of its last writer. Nothing here is shared between threads,
//! so recording an execution never takes a lock.

use crate::register::{Register, RegisterList};
use std::fmt;

/// Maximum registers recorded as read by one dynamic instruction
pub const MAX_READS: usize = 8;

/// Maximum registers recorded as written by one dynamic instruction
pub const MAX_WRITES: usize = 4;

pub type ReadRegisters = RegisterList<MAX_READS>;
pub type WriteRegisters = RegisterList<MAX_WRITES>;

/// Per-thread sequence number of an executed instruction instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DynId(pub u64);

impl DynId {
    pub fn get(self) -> u64 {
        self.0
    }

    fn slot(self, capacity: usize) -> usize {
        (self.0 % capacity as u64) as usize
    }
}

impl fmt::Display for DynId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One executed instruction instance as kept in the history ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicInstructionRecord {
    pub id: DynId,
    /// Module-relative offset (raw address outside the main image)
    pub offset: u64,
    pub reads: ReadRegisters,
    pub writes: WriteRegisters,
}

/// Fixed-capacity ring of recent records, indexed by `id % capacity`
#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: Box<[Option<DynamicInstructionRecord>]>,
}

impl HistoryRing {
    /// Create a ring holding `capacity` records.
    ///
    /// `capacity` must be non-zero; [`crate::EngineConfig::validate`] rejects
    /// a zero window before a ring is ever built.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store a record in its slot, evicting whatever occupied it
    pub fn store(&mut self, record: DynamicInstructionRecord) {
        let slot = record.id.slot(self.capacity());
        self.slots[slot] = Some(record);
    }

    /// Record for `id`, or `None` if its slot has since been reused
    pub fn get(&self, id: DynId) -> Option<&DynamicInstructionRecord> {
        self.slots[id.slot(self.capacity())]
            .as_ref()
            .filter(|record| record.id == id)
    }
}

/// Register -> dynamic id of its most recent writer
#[derive(Debug, Clone)]
pub struct ShadowTable {
    defs: [Option<DynId>; Register::COUNT],
}

impl ShadowTable {
    pub fn new() -> Self {
        Self {
            defs: [None; Register::COUNT],
        }
    }

    pub fn definition(&self, reg: Register) -> Option<DynId> {
        self.defs[reg.index()]
    }

    pub fn define(&mut self, reg: Register, id: DynId) {
        self.defs[reg.index()] = Some(id);
    }
}

impl Default for ShadowTable {
    fn default() -> Self {
        Self::new()
    }
}

/// History and register definitions of one instrumented thread
#[derive(Debug, Clone)]
pub struct ThreadState {
    thread: u32,
    history: HistoryRing,
    shadow: ShadowTable,
    next_id: u64,
}

impl ThreadState {
    /// Fresh state for `thread` retaining `window` records
    pub fn new(thread: u32, window: usize) -> Self {
        Self {
            thread,
            history: HistoryRing::new(window),
            shadow: ShadowTable::new(),
            next_id: 0,
        }
    }

    /// Thread number assigned by the instrumentation layer
    pub fn thread(&self) -> u32 {
        self.thread
    }

    pub fn window(&self) -> usize {
        self.history.capacity()
    }

    /// Number of instructions recorded so far
    pub fn executed(&self) -> u64 {
        self.next_id
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub fn shadow(&self) -> &ShadowTable {
        &self.shadow
    }

    /// Record one dynamic execution and return its id.
    ///
    /// Untracked registers are dropped and duplicates collapsed; lists longer
    /// than [`MAX_READS`] / [`MAX_WRITES`] are truncated. The record is in its
    /// slot before any shadow entry points at it.
    pub fn record_execution(
        &mut self,
        offset: u64,
        reads: &[Register],
        writes: &[Register],
    ) -> DynId {
        let id = DynId(self.next_id);
        self.next_id += 1;

        let record = DynamicInstructionRecord {
            id,
            offset,
            reads: tracked(reads),
            writes: tracked(writes),
        };
        self.history.store(record);

        for reg in record.writes.iter() {
            self.shadow.define(reg, id);
        }
        id
    }

    /// Last definition of `reg` if it is strictly older than `query` and
    /// still inside the retained window.
    pub fn live_definition(&self, reg: Register, query: DynId) -> Option<DynId> {
        self.shadow
            .definition(reg)
            .filter(|def| self.within_window(*def, query))
    }

    /// Whether `def` precedes `query` by less than the window size
    pub fn within_window(&self, def: DynId, query: DynId) -> bool {
        def < query && query.0 - def.0 < self.window() as u64
    }
}

fn tracked<const N: usize>(regs: &[Register]) -> RegisterList<N> {
    let mut list = RegisterList::new();
    for reg in regs.iter().copied().filter(|r| r.is_tracked()) {
        list.push_unique(reg);
    }
    list
}
