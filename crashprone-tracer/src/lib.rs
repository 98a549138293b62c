//! Crash-prone Tracer - bounded dynamic backward slicing
//!
//! This crate is the analysis core behind an instruction-level
//! instrumentation tool. It flags instructions that are structurally likely
//! to crash (memory accesses through a register, indirect jumps and calls,
//! divisions) and, every time one executes, reconstructs the short chain of
//! earlier instructions that produced the registers it depends on.
//!
//! # Overview
//!
//! * [`classify`] turns static facts about a decoded instruction into a
//!   [`Classification`]: a crash-prone kind and its risk-determining registers
//! * every thread owns a [`ThreadState`]: a ring of the last `window_size`
//!   executed instructions and a shadow table of register definitions
//! * [`trace_register`] walks definitions backward breadth-first, bounded by
//!   the window and a depth limit
//! * the shared [`Aggregator`] merges results per static code offset
//!
//! # Usage
//!
//! ```
//! use crashprone_tracer::{Engine, EngineConfig, Register, StaticFacts};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let mut thread = engine.on_thread_start(0);
//!
//! // 0x10: mov rax, rdi
//! let def = engine.on_instruction_decoded(0x10, &StaticFacts::default(), Some("mov rax, rdi"));
//! // 0x20: mov qword ptr [rax], 0x0
//! let store = engine.on_instruction_decoded(
//!     0x20,
//!     &StaticFacts::memory_write(Some(Register::Rax), None),
//!     Some("mov qword ptr [rax], 0x0"),
//! );
//!
//! engine.on_instruction_executed(&mut thread, 0x10, &[Register::Rdi], &[Register::Rax], &def);
//! engine.on_instruction_executed(&mut thread, 0x20, &[Register::Rax], &[], &store);
//! engine.on_thread_end(thread);
//!
//! let snapshot = engine.snapshot();
//! let record = snapshot.record(0x20).unwrap();
//! assert_eq!(record.trace(Register::Rax).unwrap().sources[0].offset, 0x10);
//! ```
//!
//! # Limitations
//!
//! * The search is a heuristic: it follows the *current* definition of every
//!   register an ancestor read, not the definition live when it executed.
//! * Data flow through memory and between threads is not followed.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod history;
pub mod image;
pub mod provenance;
pub mod register;

pub use aggregate::{AggregateSnapshot, Aggregator, CrashProneRecord, DisassemblyTable};
pub use classify::{
    classify, Classification, CrashProneKind, MemoryOperand, Operand, RiskRegisters, StaticFacts,
    MAX_RISK_REGISTERS,
};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineStats, Placement};
pub use history::{DynId, DynamicInstructionRecord, ThreadState, MAX_READS, MAX_WRITES};
pub use image::MainImage;
pub use provenance::{trace_register, trace_register_with, RegisterTrace, SourceEntry};
pub use register::{Register, RegisterList, UnknownRegister};
