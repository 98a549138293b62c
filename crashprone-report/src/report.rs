//! Crash-prone instruction report
//!
//! Turns an engine snapshot into the JSON document written at process exit:
//! a config echo, the cataloged instructions that ran often enough, and
//! summary statistics.

use crate::Result;
use anyhow::Context;
use crashprone_tracer::{
    AggregateSnapshot, CrashProneKind, CrashProneRecord, Engine, EngineConfig, EngineStats,
    MainImage, Register, RegisterTrace,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Complete report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub config: ReportConfig,
    pub crashprone_insts: Vec<ReportedInstruction>,
    pub statistics: Statistics,
}

/// Parameters the run was made with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub img_name: String,
    /// Load address of the main image, hex
    pub img_base_addr: String,
    pub max_depth: u32,
    pub min_exec_count: u64,
    pub window_size: usize,
}

/// One cataloged crash-prone instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedInstruction {
    /// Module-relative offset, hex
    pub offset: String,
    pub disasm: String,
    #[serde(rename = "type")]
    pub kind: CrashProneKind,
    pub exec_count: u64,
    pub crash_regs: Vec<Register>,
    /// Register name -> sources, ordered by name
    pub register_traces: BTreeMap<String, Vec<ReportedSource>>,
}

/// One source instruction in a register trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedSource {
    pub offset: String,
    pub disasm: String,
    pub depth: u32,
    pub hit_count: u64,
}

/// Summary counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// All cataloged offsets, before the execution-count filter
    pub total_crashprone_insts: u64,
    /// Reported instructions with at least one register trace
    pub insts_with_traces: u64,
    /// Source entries over all reported instructions
    pub total_source_entries: u64,
    pub total_instructions_executed: u64,
}

fn hex(value: u64) -> String {
    format!("{:#x}", value)
}

impl Report {
    /// Build the report from a finished engine
    pub fn from_engine(engine: &Engine) -> Self {
        Self::from_snapshot(
            &engine.snapshot(),
            engine.config(),
            engine.main_image(),
            engine.stats(),
        )
    }

    /// Build the report from a snapshot; records executed fewer than
    /// `config.min_exec_count` times are left out.
    pub fn from_snapshot(
        snapshot: &AggregateSnapshot,
        config: &EngineConfig,
        image: Option<&MainImage>,
        stats: EngineStats,
    ) -> Self {
        let crashprone_insts: Vec<ReportedInstruction> = snapshot
            .records
            .iter()
            .filter(|record| record.exec_count >= config.min_exec_count)
            .map(|record| reported_instruction(record, snapshot))
            .collect();

        let statistics = Statistics {
            total_crashprone_insts: snapshot.records.len() as u64,
            insts_with_traces: crashprone_insts
                .iter()
                .filter(|inst| !inst.register_traces.is_empty())
                .count() as u64,
            total_source_entries: crashprone_insts
                .iter()
                .flat_map(|inst| inst.register_traces.values())
                .map(|sources| sources.len() as u64)
                .sum(),
            total_instructions_executed: stats.instructions_executed,
        };

        Self {
            config: ReportConfig {
                img_name: image.map(|i| i.name.clone()).unwrap_or_default(),
                img_base_addr: hex(image.map_or(0, |i| i.low)),
                max_depth: config.depth_limit,
                min_exec_count: config.min_exec_count,
                window_size: config.window_size,
            },
            crashprone_insts,
            statistics,
        }
    }

    /// Reported instruction at `offset`, if it passed the filter
    pub fn instruction(&self, offset: u64) -> Option<&ReportedInstruction> {
        let key = hex(offset);
        self.crashprone_insts.iter().find(|inst| inst.offset == key)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the report as pretty JSON to `path`
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {:?}", path))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("Failed to serialize report to {:?}", path))?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write report to {:?}", path))?;

        tracing::info!(
            "Report saved to {:?}: {} crash-prone instructions ({} total), {} source entries",
            path,
            self.crashprone_insts.len(),
            self.statistics.total_crashprone_insts,
            self.statistics.total_source_entries
        );
        Ok(())
    }
}

fn reported_instruction(
    record: &CrashProneRecord,
    snapshot: &AggregateSnapshot,
) -> ReportedInstruction {
    ReportedInstruction {
        offset: hex(record.offset),
        disasm: record.disassembly.as_deref().unwrap_or_default().to_string(),
        kind: record.kind,
        exec_count: record.exec_count,
        crash_regs: record.risk_registers.clone(),
        register_traces: record
            .register_traces
            .values()
            .map(|trace| (trace.register.to_string(), reported_sources(trace, snapshot)))
            .collect(),
    }
}

fn reported_sources(trace: &RegisterTrace, snapshot: &AggregateSnapshot) -> Vec<ReportedSource> {
    trace
        .sources
        .iter()
        .map(|source| ReportedSource {
            offset: hex(source.offset),
            disasm: snapshot
                .disassembly
                .get(source.offset)
                .as_deref()
                .unwrap_or_default()
                .to_string(),
            depth: source.depth,
            hit_count: source.hit_count,
        })
        .collect()
}
