//! Crash-prone instruction classification
//!
//! Decides, from static facts about one decoded instruction, whether it can
//! fault on a bad value and which registers carry that value. This runs once
//! per static instruction; the caller caches the result next to its own
//! per-instruction metadata.

use crate::register::{Register, RegisterList};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum risk-determining registers kept per instruction
pub const MAX_RISK_REGISTERS: usize = 4;

/// Risk-determining registers of one instruction
pub type RiskRegisters = RegisterList<MAX_RISK_REGISTERS>;

/// Why an instruction is considered crash-prone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrashProneKind {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "mem_write")]
    MemoryWrite,
    #[serde(rename = "mem_read")]
    MemoryRead,
    #[serde(rename = "index_access")]
    IndexedAccess,
    #[serde(rename = "indirect_cf")]
    IndirectControlFlow,
    #[serde(rename = "div")]
    Division,
}

impl CrashProneKind {
    /// Short name used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            CrashProneKind::None => "none",
            CrashProneKind::MemoryWrite => "mem_write",
            CrashProneKind::MemoryRead => "mem_read",
            CrashProneKind::IndexedAccess => "index_access",
            CrashProneKind::IndirectControlFlow => "indirect_cf",
            CrashProneKind::Division => "div",
        }
    }
}

impl fmt::Display for CrashProneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing registers of a memory operand (`[base + index*scale + disp]`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryOperand {
    #[serde(default)]
    pub base: Option<Register>,
    #[serde(default)]
    pub index: Option<Register>,
}

impl MemoryOperand {
    pub fn new(base: Option<Register>, index: Option<Register>) -> Self {
        Self { base, index }
    }

    pub fn based(base: Register) -> Self {
        Self::new(Some(base), None)
    }
}

/// A register or memory operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Register(Register),
    Memory(MemoryOperand),
}

/// Static facts about one decoded instruction
///
/// Filled in by the instrumentation layer from its decoder. `memory` is the
/// instruction's explicit memory operand, if any; `target` is only meaningful
/// for indirect control transfers and `divisor` only for divisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticFacts {
    pub reads_memory: bool,
    pub writes_memory: bool,
    pub indirect_control_flow: bool,
    /// Integer or floating-point divide
    pub divides: bool,
    pub memory: Option<MemoryOperand>,
    pub target: Option<Operand>,
    pub divisor: Option<Operand>,
}

impl StaticFacts {
    /// Store through `[base + index]`
    pub fn memory_write(base: Option<Register>, index: Option<Register>) -> Self {
        Self {
            writes_memory: true,
            memory: Some(MemoryOperand::new(base, index)),
            ..Self::default()
        }
    }

    /// Load from `[base + index]`
    pub fn memory_read(base: Option<Register>, index: Option<Register>) -> Self {
        Self {
            reads_memory: true,
            memory: Some(MemoryOperand::new(base, index)),
            ..Self::default()
        }
    }

    /// `jmp reg` / `call reg`
    pub fn indirect_via_register(target: Register) -> Self {
        Self {
            indirect_control_flow: true,
            target: Some(Operand::Register(target)),
            ..Self::default()
        }
    }

    /// `jmp [base + index]` / `call [base + index]`
    pub fn indirect_via_memory(base: Option<Register>, index: Option<Register>) -> Self {
        let operand = MemoryOperand::new(base, index);
        Self {
            reads_memory: true,
            indirect_control_flow: true,
            memory: Some(operand),
            target: Some(Operand::Memory(operand)),
            ..Self::default()
        }
    }

    /// Division by `divisor`
    pub fn division(divisor: Operand) -> Self {
        let memory = match divisor {
            Operand::Memory(operand) => Some(operand),
            Operand::Register(_) => None,
        };
        Self {
            reads_memory: memory.is_some(),
            divides: true,
            memory,
            divisor: Some(divisor),
            ..Self::default()
        }
    }

    fn has_index_register(&self) -> bool {
        self.memory.map_or(false, |m| m.index.is_some())
    }
}

/// Result of classifying one static instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub kind: CrashProneKind,
    pub risk_registers: RiskRegisters,
}

impl Classification {
    /// Classification of an instruction that cannot fault on a value
    pub const NONE: Classification = Classification {
        kind: CrashProneKind::None,
        risk_registers: RiskRegisters::new(),
    };

    pub fn is_crash_prone(&self) -> bool {
        self.kind != CrashProneKind::None
    }

    /// Crash-prone with at least one register worth tracing.
    ///
    /// Only these instructions are cataloged; e.g. a store to `[rsp+8]` is
    /// crash-prone but has nothing to trace.
    pub fn is_traceable(&self) -> bool {
        self.is_crash_prone() && !self.risk_registers.is_empty()
    }
}

/// Classify one instruction from its static facts.
///
/// Categories are tried in a fixed priority so an instruction matching
/// several (a store that divides, an indirect call through memory) always
/// lands in the same one.
pub fn classify(facts: &StaticFacts) -> Classification {
    let kind = if facts.writes_memory {
        if facts.has_index_register() {
            CrashProneKind::IndexedAccess
        } else {
            CrashProneKind::MemoryWrite
        }
    } else if facts.indirect_control_flow {
        CrashProneKind::IndirectControlFlow
    } else if facts.divides {
        CrashProneKind::Division
    } else if facts.reads_memory && facts.has_index_register() {
        CrashProneKind::IndexedAccess
    } else if facts.reads_memory {
        CrashProneKind::MemoryRead
    } else {
        CrashProneKind::None
    };

    Classification {
        kind,
        risk_registers: risk_registers(kind, facts),
    }
}

fn risk_registers(kind: CrashProneKind, facts: &StaticFacts) -> RiskRegisters {
    let mut regs = RiskRegisters::new();
    match kind {
        CrashProneKind::None => {}
        CrashProneKind::MemoryWrite
        | CrashProneKind::MemoryRead
        | CrashProneKind::IndexedAccess => {
            if let Some(operand) = facts.memory {
                push_addressing(&mut regs, operand);
            }
        }
        CrashProneKind::IndirectControlFlow => match facts.target {
            Some(Operand::Register(target)) => push_tracked(&mut regs, target),
            Some(Operand::Memory(operand)) => push_addressing(&mut regs, operand),
            None => {}
        },
        CrashProneKind::Division => match facts.divisor {
            Some(Operand::Register(divisor)) => push_tracked(&mut regs, divisor),
            // The value in memory is out of reach; its address base stands in.
            Some(Operand::Memory(operand)) => {
                if let Some(base) = operand.base {
                    push_tracked(&mut regs, base);
                }
            }
            None => {}
        },
    }
    regs
}

fn push_addressing(regs: &mut RiskRegisters, operand: MemoryOperand) {
    if let Some(base) = operand.base.filter(|b| !b.is_stack_or_frame()) {
        push_tracked(regs, base);
    }
    if let Some(index) = operand.index {
        push_tracked(regs, index);
    }
}

fn push_tracked(regs: &mut RiskRegisters, reg: Register) {
    if reg.is_tracked() {
        regs.push_unique(reg);
    }
}
