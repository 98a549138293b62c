//! Event log in, report out.

use crashprone_report::{analyze_event_log, analyze_file, Report, Replayer, TraceEvent};
use crashprone_tracer::{
    CrashProneKind, Engine, EngineConfig, MemoryOperand, Operand, Register, StaticFacts,
};
use std::io::Write;
use Register::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const BASE: u64 = 0x55_0000;

fn decode(offset: u64, disasm: &str, facts: StaticFacts) -> TraceEvent {
    TraceEvent::Decode {
        addr: BASE + offset,
        disasm: Some(disasm.to_string()),
        facts,
    }
}

fn exec(tid: u32, offset: u64, reads: &[Register], writes: &[Register]) -> TraceEvent {
    TraceEvent::Exec {
        tid,
        addr: BASE + offset,
        reads: reads.to_vec(),
        writes: writes.to_vec(),
    }
}

/// Division loop: two loads feed a divisor, repeated `iterations` times on
/// each of two threads, plus a store executed only once.
fn division_log(iterations: usize) -> String {
    let mut events = vec![
        TraceEvent::ImageLoad {
            name: "/usr/bin/calc".into(),
            low: BASE,
            high: BASE + 0xffff,
        },
        decode(0x100, "mov r9, qword ptr [rdi]", StaticFacts::memory_read(Some(Rdi), None)),
        decode(0x104, "mov r10, qword ptr [rsi]", StaticFacts::memory_read(Some(Rsi), None)),
        decode(0x108, "lea rcx, [r9+r10*1]", StaticFacts::default()),
        decode(
            0x10c,
            "div rcx",
            StaticFacts::division(Operand::Register(Rcx)),
        ),
        decode(
            0x200,
            "mov dword ptr [rbx+rcx*4], eax",
            StaticFacts::memory_write(Some(Rbx), Some(Rcx)),
        ),
    ];
    for tid in [1, 2] {
        events.push(TraceEvent::ThreadStart { tid });
        for _ in 0..iterations {
            events.push(exec(tid, 0x100, &[Rdi], &[R9]));
            events.push(exec(tid, 0x104, &[Rsi], &[R10]));
            events.push(exec(tid, 0x108, &[R9, R10], &[Rcx]));
            events.push(exec(tid, 0x10c, &[Rcx, Rax, Rdx], &[Rax, Rdx]));
        }
    }
    events.push(exec(1, 0x200, &[Rbx, Rcx, Rax], &[]));
    events.push(TraceEvent::ThreadEnd { tid: 1 });
    // thread 2 never ends; the replayer closes it

    let mut log = String::from("# recorded division loop\n");
    for event in &events {
        log.push_str(&serde_json::to_string(event).unwrap());
        log.push('\n');
    }
    log
}

#[test]
fn test_division_loop_report() {
    init_tracing();
    let report = analyze_event_log(EngineConfig::default(), division_log(3).as_bytes()).unwrap();

    assert_eq!(report.config.img_name, "/usr/bin/calc");
    assert_eq!(report.config.img_base_addr, "0x550000");
    // the store ran once and falls under the default threshold of 2
    assert_eq!(report.statistics.total_crashprone_insts, 4);
    assert!(report.instruction(0x200).is_none());
    assert_eq!(report.statistics.total_instructions_executed, 2 * 3 * 4 + 1);

    let div = report.instruction(0x10c).unwrap();
    assert_eq!(div.kind, CrashProneKind::Division);
    assert_eq!(div.disasm, "div rcx");
    assert_eq!(div.exec_count, 6);
    assert_eq!(div.crash_regs, vec![Rcx]);

    let sources = &div.register_traces["rcx"];
    let summary: Vec<(&str, u32, u64)> = sources
        .iter()
        .map(|s| (s.offset.as_str(), s.depth, s.hit_count))
        .collect();
    assert_eq!(
        summary,
        vec![("0x108", 1, 6), ("0x100", 2, 6), ("0x104", 2, 6)]
    );
    assert_eq!(sources[1].disasm, "mov r9, qword ptr [rdi]");

    let load = report.instruction(0x100).unwrap();
    assert_eq!(load.kind, CrashProneKind::MemoryRead);
    assert!(load.register_traces["rdi"].is_empty());
}

#[test]
fn test_depth_limit_and_threshold_from_config() {
    let config = EngineConfig::default()
        .with_depth_limit(1)
        .with_min_exec_count(1);
    let report = analyze_event_log(config, division_log(1).as_bytes()).unwrap();

    assert_eq!(report.config.max_depth, 1);
    let div = report.instruction(0x10c).unwrap();
    assert_eq!(div.register_traces["rcx"].len(), 1);

    let store = report.instruction(0x200).unwrap();
    assert_eq!(store.kind, CrashProneKind::IndexedAccess);
    assert_eq!(store.crash_regs, vec![Rbx, Rcx]);
    assert!(store.register_traces["rbx"].is_empty());
    assert_eq!(store.register_traces["rcx"][0].offset, "0x108");
}

#[test]
fn test_statistics_count_reported_sources() {
    let report = analyze_event_log(EngineConfig::default(), division_log(2).as_bytes()).unwrap();
    let reported: u64 = report
        .crashprone_insts
        .iter()
        .flat_map(|inst| inst.register_traces.values())
        .map(|sources| sources.len() as u64)
        .sum();

    assert_eq!(report.statistics.total_source_entries, reported);
    assert_eq!(report.statistics.insts_with_traces, report.crashprone_insts.len() as u64);
}

#[test]
fn test_memory_divisor_uses_frame_base() {
    let engine = Engine::new(EngineConfig::default().with_min_exec_count(1)).unwrap();
    let mut replayer = Replayer::new(&engine);
    let events = vec![
        TraceEvent::ImageLoad {
            name: "app".into(),
            low: BASE,
            high: BASE + 0xfff,
        },
        TraceEvent::ThreadStart { tid: 1 },
        decode(0x10, "mov rbp, rsp", StaticFacts::default()),
        decode(
            0x14,
            "idiv dword ptr [rbp-0x4]",
            StaticFacts::division(Operand::Memory(MemoryOperand::based(Rbp))),
        ),
        exec(1, 0x10, &[Rsp], &[Rbp]),
        exec(1, 0x14, &[Rbp, Rax, Rdx], &[Rax, Rdx]),
    ];
    for event in events {
        replayer.apply(event).unwrap();
    }
    replayer.finish();

    let report = Report::from_engine(&engine);
    let div = report.instruction(0x14).unwrap();
    assert_eq!(div.crash_regs, vec![Rbp]);
    assert_eq!(div.register_traces["rbp"][0].disasm, "mov rbp, rsp");
}

#[test]
fn test_decode_before_image_load_keeps_disassembly() {
    let engine = Engine::new(EngineConfig::default().with_min_exec_count(1)).unwrap();
    let mut replayer = Replayer::new(&engine);
    let events = vec![
        TraceEvent::ThreadStart { tid: 1 },
        decode(0x10, "mov rax, rdi", StaticFacts::default()),
        decode(
            0x20,
            "mov qword ptr [rax], 0x0",
            StaticFacts::memory_write(Some(Rax), None),
        ),
        TraceEvent::ImageLoad {
            name: "app".into(),
            low: BASE,
            high: BASE + 0xfff,
        },
        exec(1, 0x10, &[Rdi], &[Rax]),
        exec(1, 0x20, &[Rax], &[]),
        TraceEvent::ThreadEnd { tid: 1 },
    ];
    for event in events {
        replayer.apply(event).unwrap();
    }
    replayer.finish();

    let report = Report::from_engine(&engine);
    let store = report.instruction(0x20).unwrap();
    assert_eq!(store.kind, CrashProneKind::MemoryWrite);
    assert_eq!(store.disasm, "mov qword ptr [rax], 0x0");
    let source = &store.register_traces["rax"][0];
    assert_eq!(source.offset, "0x10");
    assert_eq!(source.disasm, "mov rax, rdi");
}

#[test]
fn test_bad_log_is_rejected_with_line() {
    let log = concat!(
        r#"{"event":"thread_start","tid":1}"#,
        "\n",
        r#"{"event":"exec","tid":1,"addr":16,"reads":["bogus"]}"#,
        "\n",
    );
    let err = analyze_event_log(EngineConfig::default(), log.as_bytes()).unwrap_err();
    assert!(err.to_string().contains("line 2"), "{}", err);
    assert!(format!("{:#}", err).contains("bogus"), "{:#}", err);
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = analyze_event_log(EngineConfig::default().with_window_size(0), "".as_bytes())
        .unwrap_err();
    assert!(err.to_string().contains("window size"));
}

#[test]
fn test_analyze_file_round_trip() {
    init_tracing();
    let dir = std::env::temp_dir();
    let input = dir.join(format!("crashprone_events_{}.jsonl", std::process::id()));
    let output = dir.join(format!("crashprone_out_{}.json", std::process::id()));

    let mut file = std::fs::File::create(&input).unwrap();
    file.write_all(division_log(2).as_bytes()).unwrap();
    drop(file);

    let report = analyze_file(EngineConfig::default(), &input, &output).unwrap();
    let written = std::fs::read_to_string(&output).unwrap();
    std::fs::remove_file(&input).ok();
    std::fs::remove_file(&output).ok();

    assert_eq!(Report::from_json(&written).unwrap(), report);
}

#[test]
fn test_missing_input_file() {
    let missing = std::env::temp_dir().join("crashprone_no_such_log.jsonl");
    let output = std::env::temp_dir().join("crashprone_unused.json");
    let err = analyze_file(EngineConfig::default(), &missing, &output).unwrap_err();
    assert!(err.to_string().contains("Failed to open event log"));
}
