//! Crash-prone Report - replay driver and JSON report output
//!
//! This crate sits on top of `crashprone-tracer`: it feeds an engine from a
//! recorded event log and turns the final catalog into the report document.
//!
//! # Usage
//!
//! ```
//! use crashprone_report::analyze_event_log;
//! use crashprone_tracer::EngineConfig;
//!
//! let log = r#"
//! {"event":"image_load","name":"app","low":4096,"high":8191}
//! {"event":"thread_start","tid":1}
//! {"event":"decode","addr":4112,"disasm":"mov rax, rdi"}
//! {"event":"decode","addr":4128,"disasm":"mov qword ptr [rax], 0x0","facts":{"writes_memory":true,"memory":{"base":"rax"}}}
//! {"event":"exec","tid":1,"addr":4112,"reads":["rdi"],"writes":["rax"]}
//! {"event":"exec","tid":1,"addr":4128,"reads":["rax"]}
//! {"event":"thread_end","tid":1}
//! "#;
//!
//! let config = EngineConfig::default().with_min_exec_count(1);
//! let report = analyze_event_log(config, log.as_bytes()).unwrap();
//! assert_eq!(report.crashprone_insts[0].offset, "0x20");
//! assert_eq!(report.crashprone_insts[0].register_traces["rax"][0].offset, "0x10");
//! ```

pub mod replay;
pub mod report;

pub use replay::{ReplaySummary, Replayer, TraceEvent};
pub use report::{Report, ReportConfig, ReportedInstruction, ReportedSource, Statistics};

use crashprone_tracer::{Engine, EngineConfig};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Result type for report operations
pub type Result<T> = anyhow::Result<T>;

/// High-level API: replay an event log and build its report
pub fn analyze_event_log<R: BufRead>(config: EngineConfig, reader: R) -> Result<Report> {
    let engine = Engine::new(config)?;
    let mut replayer = Replayer::new(&engine);
    replayer.replay(reader)?;
    let summary = replayer.finish();

    let report = Report::from_engine(&engine);
    tracing::info!(
        "Analyzed {} events ({} skipped): {} crash-prone instructions reported",
        summary.events,
        summary.skipped,
        report.crashprone_insts.len()
    );
    Ok(report)
}

/// High-level API: replay the event log at `input` and write the report to
/// `output`
pub fn analyze_file(
    config: EngineConfig,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<Report> {
    use anyhow::Context;

    let input = input.as_ref();
    let file =
        File::open(input).with_context(|| format!("Failed to open event log: {:?}", input))?;
    let report = analyze_event_log(config, BufReader::new(file))
        .with_context(|| format!("Failed to replay {:?}", input))?;
    report.write_to(output)?;
    Ok(report)
}
