//! Event log replay
//!
//! Drives an [`Engine`] from a recorded stream of instrumentation events, one
//! JSON object per line. This is how the engine is exercised outside a live
//! instrumentation session.

use crate::Result;
use anyhow::{bail, Context};
use crashprone_tracer::{
    Classification, Engine, MainImage, Placement, Register, StaticFacts, ThreadState,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;

/// One instrumentation callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    ImageLoad {
        name: String,
        low: u64,
        /// Inclusive
        high: u64,
    },
    ThreadStart {
        tid: u32,
    },
    /// Static decode of the instruction at runtime address `addr`
    Decode {
        addr: u64,
        #[serde(default)]
        disasm: Option<String>,
        #[serde(default)]
        facts: StaticFacts,
    },
    Exec {
        tid: u32,
        addr: u64,
        #[serde(default)]
        reads: Vec<Register>,
        #[serde(default)]
        writes: Vec<Register>,
    },
    ThreadEnd {
        tid: u32,
    },
}

/// Counts from a finished replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: u64,
    /// Decode and exec events outside the main image
    pub skipped: u64,
    /// Threads still running when the log ended
    pub unterminated_threads: usize,
}

/// Cached decode of one runtime address
struct Decoded {
    classification: Classification,
    disasm: Option<String>,
    /// Offset the disassembly is registered under
    registered_at: u64,
}

/// Applies [`TraceEvent`]s to an engine, owning the per-thread state the
/// instrumentation layer would otherwise hold
pub struct Replayer<'e> {
    engine: &'e Engine,
    threads: HashMap<u32, ThreadState>,
    /// Decode cache keyed by runtime address
    decoded: HashMap<u64, Decoded>,
    summary: ReplaySummary,
}

impl<'e> Replayer<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            threads: HashMap::new(),
            decoded: HashMap::new(),
            summary: ReplaySummary::default(),
        }
    }

    pub fn live_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn apply(&mut self, event: TraceEvent) -> Result<()> {
        self.summary.events += 1;
        match event {
            TraceEvent::ImageLoad { name, low, high } => {
                if high < low {
                    bail!("Image {} has an empty range {:#x} - {:#x}", name, low, high);
                }
                self.engine.on_image_loaded(MainImage::new(name, low, high));
            }
            TraceEvent::ThreadStart { tid } => {
                if self.threads.contains_key(&tid) {
                    bail!("Thread {} started twice", tid);
                }
                let state = self.engine.on_thread_start(tid);
                self.threads.insert(tid, state);
            }
            TraceEvent::Decode {
                addr,
                disasm,
                facts,
            } => {
                let offset = match self.engine.locate(addr) {
                    Placement::MainImage(offset) => offset,
                    Placement::Unmapped(addr) => addr,
                    Placement::Outside => {
                        self.summary.skipped += 1;
                        return Ok(());
                    }
                };
                let classification =
                    self.engine.on_instruction_decoded(offset, &facts, disasm.as_deref());
                self.decoded.insert(
                    addr,
                    Decoded {
                        classification,
                        disasm,
                        registered_at: offset,
                    },
                );
            }
            TraceEvent::Exec {
                tid,
                addr,
                reads,
                writes,
            } => {
                let (offset, classification) = match self.engine.locate(addr) {
                    Placement::MainImage(offset) => match self.decoded.get_mut(&addr) {
                        Some(decoded) => {
                            // decoded before the image was known: text sits under the raw address
                            if decoded.registered_at != offset {
                                if let Some(text) = decoded.disasm.as_deref() {
                                    self.engine.aggregator().register_disassembly(offset, text);
                                }
                                decoded.registered_at = offset;
                            }
                            (offset, decoded.classification)
                        }
                        None => bail!(
                            "Instruction at {:#x} executed before it was decoded",
                            addr
                        ),
                    },
                    Placement::Unmapped(addr) => (addr, Classification::NONE),
                    Placement::Outside => {
                        self.summary.skipped += 1;
                        return Ok(());
                    }
                };
                let state = match self.threads.get_mut(&tid) {
                    Some(state) => state,
                    None => bail!("Execution on unknown thread {}", tid),
                };
                self.engine.on_instruction_executed(
                    state,
                    offset,
                    &reads,
                    &writes,
                    &classification,
                );
            }
            TraceEvent::ThreadEnd { tid } => match self.threads.remove(&tid) {
                Some(state) => self.engine.on_thread_end(state),
                None => bail!("Unknown thread {} ended", tid),
            },
        }
        Ok(())
    }

    /// Apply a JSON-lines event log. Blank lines and lines starting with `#`
    /// are ignored. Returns the number of events applied.
    pub fn replay<R: BufRead>(&mut self, reader: R) -> Result<u64> {
        let mut applied = 0;
        for (index, line) in reader.lines().enumerate() {
            let line_no = index + 1;
            let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let event: TraceEvent = serde_json::from_str(line)
                .with_context(|| format!("Invalid event on line {}", line_no))?;
            tracing::trace!(line = line_no, ?event, "replaying event");
            self.apply(event)
                .with_context(|| format!("Failed to apply event on line {}", line_no))?;
            applied += 1;
        }
        tracing::debug!("Replayed {} events", applied);
        Ok(applied)
    }

    /// End every thread still running, as process exit would
    pub fn finish(mut self) -> ReplaySummary {
        let mut tids: Vec<u32> = self.threads.keys().copied().collect();
        tids.sort_unstable();
        self.summary.unterminated_threads = tids.len();
        if !tids.is_empty() {
            tracing::warn!("{} threads still running at end of log", tids.len());
        }
        for tid in tids {
            if let Some(state) = self.threads.remove(&tid) {
                self.engine.on_thread_end(state);
            }
        }
        self.summary
    }
}
