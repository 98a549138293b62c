//! Engine facade driven by the instrumentation layer
//!
//! The instrumentation layer owns one [`ThreadState`] per application thread
//! and calls into a shared [`Engine`] from that thread:
//!
//! * [`Engine::on_image_loaded`] when the main module is mapped,
//! * [`Engine::on_thread_start`] / [`Engine::on_thread_end`] around a thread's
//!   lifetime,
//! * [`Engine::on_instruction_decoded`] once per static instruction, caching
//!   the returned [`Classification`],
//! * [`Engine::on_instruction_executed`] for every dynamic execution.

use crate::aggregate::{AggregateSnapshot, Aggregator};
use crate::classify::{classify, Classification, StaticFacts};
use crate::config::{ConfigError, EngineConfig};
use crate::history::{DynId, ThreadState};
use crate::image::MainImage;
use crate::provenance::trace_register;
use crate::register::Register;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Where an executed address falls relative to the main image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Inside the main image, at this module-relative offset
    MainImage(u64),
    /// Outside a known main image; not instrumented
    Outside,
    /// No main image known yet; recorded by raw address, never cataloged
    Unmapped(u64),
}

/// Run-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub threads_started: u64,
    pub threads_finished: u64,
    /// Summed over finished threads
    pub instructions_executed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    threads_started: AtomicU64,
    threads_finished: AtomicU64,
    instructions_executed: AtomicU64,
}

/// Bounded backward-slicing engine shared by all instrumented threads
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    aggregator: Aggregator,
    image: OnceLock<MainImage>,
    counters: Counters,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            window_size = config.window_size,
            depth_limit = config.depth_limit,
            "crash-prone tracer engine ready"
        );
        Ok(Self {
            config,
            aggregator: Aggregator::new(),
            image: OnceLock::new(),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Record the main image. Only the first call takes effect.
    pub fn on_image_loaded(&self, image: MainImage) -> bool {
        let name = image.name.clone();
        let (low, high) = (image.low, image.high);
        match self.image.set(image) {
            Ok(()) => {
                tracing::info!("main image: {} ({:#x} - {:#x})", name, low, high);
                true
            }
            Err(_) => {
                tracing::warn!("ignoring second main image {}", name);
                false
            }
        }
    }

    pub fn main_image(&self) -> Option<&MainImage> {
        self.image.get()
    }

    /// Place a runtime address relative to the main image
    pub fn locate(&self, addr: u64) -> Placement {
        match self.image.get() {
            Some(image) => image
                .offset_of(addr)
                .map_or(Placement::Outside, Placement::MainImage),
            None => Placement::Unmapped(addr),
        }
    }

    pub fn on_thread_start(&self, thread: u32) -> ThreadState {
        self.counters.threads_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(thread, "thread start");
        ThreadState::new(thread, self.config.window_size)
    }

    pub fn on_thread_end(&self, state: ThreadState) {
        self.counters.threads_finished.fetch_add(1, Ordering::Relaxed);
        self.counters
            .instructions_executed
            .fetch_add(state.executed(), Ordering::Relaxed);
        tracing::debug!(
            thread = state.thread(),
            executed = state.executed(),
            "thread end"
        );
    }

    /// Classify a newly decoded instruction and remember its disassembly
    pub fn on_instruction_decoded(
        &self,
        offset: u64,
        facts: &StaticFacts,
        disassembly: Option<&str>,
    ) -> Classification {
        if let Some(text) = disassembly {
            self.aggregator.register_disassembly(offset, text);
        }
        classify(facts)
    }

    /// Record one dynamic execution on the calling thread.
    ///
    /// When `classification` is traceable, each risk register is traced
    /// against the thread's history and the result folded into the catalog.
    /// Returns the dynamic id assigned to this execution.
    pub fn on_instruction_executed(
        &self,
        state: &mut ThreadState,
        offset: u64,
        reads: &[Register],
        writes: &[Register],
        classification: &Classification,
    ) -> DynId {
        let id = state.record_execution(offset, reads, writes);
        if classification.is_traceable() {
            self.trace_crashprone(state, id, offset, classification);
        }
        id
    }

    fn trace_crashprone(
        &self,
        state: &ThreadState,
        id: DynId,
        offset: u64,
        classification: &Classification,
    ) {
        self.aggregator.touch(offset, classification);
        for reg in classification.risk_registers.iter() {
            let trace = trace_register(state, id, reg, self.config.depth_limit);
            self.aggregator.merge_trace(offset, &trace);
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            threads_started: self.counters.threads_started.load(Ordering::Relaxed),
            threads_finished: self.counters.threads_finished.load(Ordering::Relaxed),
            instructions_executed: self.counters.instructions_executed.load(Ordering::Relaxed),
        }
    }

    /// Copy of the catalog; meant to be taken after all threads have ended
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.aggregator.snapshot()
    }
}
