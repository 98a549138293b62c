//! Process-wide catalog of crash-prone instructions
//!
//! All threads fold their results into one [`Aggregator`], keyed by static
//! code offset. The record map and the disassembly table sit behind a single
//! mutex which is held only for lookups, counter bumps and merges; provenance
//! searches run outside it.

use crate::classify::{Classification, CrashProneKind};
use crate::provenance::RegisterTrace;
use crate::register::Register;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Aggregate over every dynamic execution of one crash-prone instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashProneRecord {
    pub offset: u64,
    pub kind: CrashProneKind,
    pub disassembly: Option<Arc<str>>,
    pub exec_count: u64,
    pub risk_registers: Vec<Register>,
    pub register_traces: BTreeMap<Register, RegisterTrace>,
}

impl CrashProneRecord {
    fn new(offset: u64, classification: &Classification, disassembly: Option<Arc<str>>) -> Self {
        Self {
            offset,
            kind: classification.kind,
            disassembly,
            exec_count: 0,
            risk_registers: classification.risk_registers.iter().collect(),
            register_traces: BTreeMap::new(),
        }
    }

    pub fn trace(&self, reg: Register) -> Option<&RegisterTrace> {
        self.register_traces.get(&reg)
    }

    /// Total source entries over all register traces
    pub fn source_count(&self) -> usize {
        self.register_traces.values().map(RegisterTrace::len).sum()
    }
}

/// Offset -> disassembly text, interned once per offset
#[derive(Debug, Clone, Default)]
pub struct DisassemblyTable {
    texts: HashMap<u64, Arc<str>>,
}

impl DisassemblyTable {
    /// Keep the first text seen for `offset`
    pub fn insert(&mut self, offset: u64, text: &str) -> Arc<str> {
        self.texts
            .entry(offset)
            .or_insert_with(|| Arc::from(text))
            .clone()
    }

    pub fn get(&self, offset: u64) -> Option<Arc<str>> {
        self.texts.get(&offset).cloned()
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Read-only copy of the catalog, taken once the run is over
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    /// Ordered by offset
    pub records: Vec<CrashProneRecord>,
    pub disassembly: DisassemblyTable,
}

impl AggregateSnapshot {
    pub fn record(&self, offset: u64) -> Option<&CrashProneRecord> {
        self.records
            .binary_search_by_key(&offset, |r| r.offset)
            .ok()
            .map(|i| &self.records[i])
    }
}

#[derive(Debug, Default)]
struct AggregateState {
    records: BTreeMap<u64, CrashProneRecord>,
    disassembly: DisassemblyTable,
}

/// Shared record map guarded by one lock
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<AggregateState>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("aggregate lock poisoned by a panicking thread, recovering");
            poisoned.into_inner()
        })
    }

    /// Remember the disassembly of `offset` (first text wins)
    pub fn register_disassembly(&self, offset: u64, text: &str) {
        self.lock().disassembly.insert(offset, text);
    }

    pub fn disassembly(&self, offset: u64) -> Option<Arc<str>> {
        self.lock().disassembly.get(offset)
    }

    /// Get or create the record for `offset` and count one execution.
    ///
    /// Returns the updated execution count.
    pub fn touch(&self, offset: u64, classification: &Classification) -> u64 {
        let mut state = self.lock();
        let AggregateState {
            records,
            disassembly,
        } = &mut *state;

        let record = records.entry(offset).or_insert_with(|| {
            tracing::debug!(
                offset = format_args!("{:#x}", offset),
                kind = %classification.kind,
                "new crash-prone instruction"
            );
            CrashProneRecord::new(offset, classification, disassembly.get(offset))
        });
        record.exec_count += 1;
        record.exec_count
    }

    /// Merge one freshly computed trace into the record at `offset`.
    ///
    /// The register gets an entry even when `trace` is empty. Has no effect
    /// if `offset` was never touched.
    pub fn merge_trace(&self, offset: u64, trace: &RegisterTrace) {
        let mut state = self.lock();
        if let Some(record) = state.records.get_mut(&offset) {
            record
                .register_traces
                .entry(trace.register)
                .or_insert_with(|| RegisterTrace::new(trace.register))
                .merge(trace);
        }
    }

    /// Count one execution of `offset` and merge its traces
    pub fn record_crashprone(
        &self,
        offset: u64,
        classification: &Classification,
        traces: &[RegisterTrace],
    ) {
        self.touch(offset, classification);
        for trace in traces {
            self.merge_trace(offset, trace);
        }
    }

    /// Number of distinct crash-prone offsets seen so far
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.lock();
        AggregateSnapshot {
            records: state.records.values().cloned().collect(),
            disassembly: state.disassembly.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, StaticFacts};
    use crate::provenance::SourceEntry;
    use Register::*;

    fn trace(reg: Register, sources: &[(u64, u32, u64)]) -> RegisterTrace {
        RegisterTrace {
            register: reg,
            sources: sources
                .iter()
                .map(|&(offset, depth, hit_count)| SourceEntry {
                    offset,
                    depth,
                    hit_count,
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_touch_initializes_record() {
        let agg = Aggregator::new();
        agg.register_disassembly(0x20, "mov qword ptr [rax], rbx");
        let c = classify(&StaticFacts::memory_write(Some(Rax), None));

        assert_eq!(agg.touch(0x20, &c), 1);
        assert_eq!(agg.touch(0x20, &c), 2);

        let snap = agg.snapshot();
        let record = snap.record(0x20).unwrap();
        assert_eq!(record.kind, CrashProneKind::MemoryWrite);
        assert_eq!(record.exec_count, 2);
        assert_eq!(record.risk_registers, vec![Rax]);
        assert_eq!(record.disassembly.as_deref(), Some("mov qword ptr [rax], rbx"));
    }

    #[test]
    fn test_empty_trace_still_registers_name() {
        let agg = Aggregator::new();
        let c = classify(&StaticFacts::memory_read(Some(Rsi), None));
        agg.record_crashprone(0x30, &c, &[RegisterTrace::new(Rsi)]);

        let snap = agg.snapshot();
        let record = snap.record(0x30).unwrap();
        assert!(record.trace(Rsi).unwrap().is_empty());
        assert_eq!(record.source_count(), 0);
    }

    #[test]
    fn test_merge_accumulates_hits() {
        let agg = Aggregator::new();
        let c = classify(&StaticFacts::memory_read(Some(Rsi), Some(Rdi)));
        agg.record_crashprone(0x30, &c, &[trace(Rsi, &[(0x10, 1, 1)]), trace(Rdi, &[])]);
        agg.record_crashprone(
            0x30,
            &c,
            &[trace(Rsi, &[(0x10, 1, 1), (0x08, 2, 1)]), trace(Rdi, &[(0x0c, 1, 1)])],
        );

        let snap = agg.snapshot();
        let record = snap.record(0x30).unwrap();
        assert_eq!(record.exec_count, 2);
        let rsi = record.trace(Rsi).unwrap();
        assert_eq!(rsi.source(0x10).unwrap().hit_count, 2);
        assert_eq!(rsi.source(0x08).unwrap().hit_count, 1);
        assert_eq!(record.trace(Rdi).unwrap().len(), 1);
        assert_eq!(record.source_count(), 3);
    }

    #[test]
    fn test_merge_without_touch_is_ignored() {
        let agg = Aggregator::new();
        agg.merge_trace(0x99, &trace(Rax, &[(0x10, 1, 1)]));
        assert!(agg.is_empty());
    }

    #[test]
    fn test_disassembly_first_writer_wins() {
        let mut table = DisassemblyTable::default();
        table.insert(0x10, "first");
        table.insert(0x10, "second");
        assert_eq!(table.get(0x10).as_deref(), Some("first"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_snapshot_sorted_by_offset() {
        let agg = Aggregator::new();
        let c = classify(&StaticFacts::memory_read(Some(Rax), None));
        for offset in [0x50, 0x10, 0x30] {
            agg.touch(offset, &c);
        }
        let offsets: Vec<u64> = agg.snapshot().records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0x10, 0x30, 0x50]);
    }
}
