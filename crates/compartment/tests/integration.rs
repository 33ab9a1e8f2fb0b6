// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for compartment
//!
//! These tests drive the pass end to end over in-memory functions and real
//! files in temporary directories. They verify that:
//!
//! 1. Map files on disk decide compartments, sections and guards
//! 2. Every function is processed exactly once
//! 3. Concurrent ledger writers never lose or tear records
//! 4. Templates written for a unit read back as a usable map

use std::{fs, path::Path, sync::Barrier, thread};

use compartment::{
    CompartmentId, GuardOutcome, Ledger, LedgerKey, LedgerName, LedgerWriter, MapError,
    ParseError, PassConfig, PassDriver, PassError, SkipReason, codec,
};
use indoc::indoc;
use machine::{Block, DebugLoc, Function, Instruction, MachineInstr, Operand};

fn id(value: u16) -> CompartmentId {
    CompartmentId::new(value)
}

/// `name: addi sp, sp, -16; bnez a0, .L1; .L1: ret`
fn two_block_function(name: &str) -> Function {
    Function::new(name)
        .with_block(Block::with_instructions(
            Some(name.into()),
            vec![
                Instruction::new(
                    "addi",
                    vec![
                        Operand::Reg("sp".into()),
                        Operand::Reg("sp".into()),
                        Operand::Imm(-16),
                    ],
                )
                .at(DebugLoc::new(1, 3, 0)),
                Instruction::new(
                    "bnez",
                    vec![Operand::Reg("a0".into()), Operand::Symbol(".L1".into())],
                ),
            ],
        ))
        .with_block(Block::with_instructions(
            Some(".L1".into()),
            vec![Instruction::new("ret", vec![])],
        ))
}

fn config(map_dir: &Path, ledger_dir: &Path) -> PassConfig {
    PassConfig {
        mapping_dir: Some(map_dir.into()),
        ledger_dir: Some(ledger_dir.into()),
        ..Default::default()
    }
}

/// A unit whose map assigns one function, forces one guard and exempts one.
#[test]
fn test_unit_with_map() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    fs::write(
        maps.path().join("src__app__main.cap"),
        indoc! {"
            :4
            main:1
            handler:2:1
            trampoline:2:0
        "},
    )
    .unwrap();

    let mut driver = PassDriver::new(PassConfig {
        disable_guard_insertion: true,
        ..config(maps.path(), build.path())
    })
    .unwrap();
    let mut functions = vec![
        two_block_function("main"),
        two_block_function("handler"),
        two_block_function("trampoline"),
        two_block_function("util"),
    ];
    let reports = driver.run_on_unit("src/app/main.c", &mut functions).unwrap();

    let outcomes: Vec<_> = reports
        .iter()
        .map(|r| (r.record.name.as_str(), r.record.compartment.get(), r.guard))
        .collect();
    assert_eq!(
        outcomes,
        [
            ("main", 1, GuardOutcome::Skipped(SkipReason::OptedOut)),
            ("handler", 2, GuardOutcome::Inserted),
            ("trampoline", 2, GuardOutcome::Skipped(SkipReason::Exempt)),
            ("util", 4, GuardOutcome::Skipped(SkipReason::OptedOut)),
        ]
    );

    let sections: Vec<_> = functions
        .iter()
        .map(|f| f.section.as_deref().unwrap())
        .collect();
    assert_eq!(
        sections,
        [
            ".text.compartment.1",
            ".text.compartment.2",
            ".text.compartment.2",
            ".text.compartment.4",
        ]
    );

    let guard = &functions[1].blocks[0].instructions[0];
    assert_eq!(guard.to_string(), "checkcap 2");
    assert_eq!(guard.loc, Some(DebugLoc::new(1, 3, 0)));
    // Opted-out functions are untouched apart from their section.
    assert_eq!(functions[0].blocks, two_block_function("main").blocks);

    let ledger = Ledger::read(&build.path().join("compartments.cap")).unwrap();
    assert_eq!(ledger.records().len(), 4);
    assert!(ledger.contains("handler", id(2)));
    assert!(ledger.contains("util", id(4)));
}

/// Without maps or a configured default, everything lands in the sentinel.
#[test]
fn test_unset_compartment_without_configuration() {
    let build = tempfile::tempdir().unwrap();
    let mut driver = PassDriver::new(PassConfig {
        ledger_dir: Some(build.path().into()),
        ..Default::default()
    })
    .unwrap();

    let mut f = two_block_function("anyFunction");
    let report = driver.run_on_function("x.c", &mut f).unwrap().unwrap();

    assert_eq!(report.record.compartment, CompartmentId::UNSET);
    assert_eq!(report.record.section, ".text.compartment.266");
    assert_eq!(f.blocks[0].instructions[0].immediate(), Some(266));
}

#[test]
fn test_driver_processes_each_function_once() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let mut driver = PassDriver::new(config(maps.path(), build.path())).unwrap();

    let mut functions = vec![two_block_function("f"), two_block_function("g")];
    driver.run_on_unit("u.c", &mut functions).unwrap();
    let again = driver.run_on_unit("u.c", &mut functions).unwrap();

    assert!(again.is_empty());
    for function in &functions {
        assert_eq!(
            function
                .instructions()
                .filter(|i| i.is_entry_guard())
                .count(),
            1
        );
    }
    let text = fs::read_to_string(build.path().join("compartments.cap")).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert_eq!(driver.stats().functions, 2);
}

#[test]
fn test_malformed_map_aborts_the_unit() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    fs::write(maps.path().join("bad.cap"), "main:1\n:3\n").unwrap();

    let mut driver = PassDriver::new(config(maps.path(), build.path())).unwrap();
    let err = driver
        .run_on_function("bad.c", &mut two_block_function("main"))
        .unwrap_err();

    assert!(matches!(err, PassError::Map(_)));
    assert!(!build.path().join("compartments.cap").exists());
}

/// A map with bytes that are not UTF-8 is malformed, not missing.
#[test]
fn test_non_utf8_map_aborts_the_unit() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    fs::write(maps.path().join("u.cap"), b":5\nsecret:9\nbad\xff:1\n").unwrap();

    let mut driver = PassDriver::new(config(maps.path(), build.path())).unwrap();
    let mut secret = two_block_function("secret");
    let err = driver.run_on_function("u.c", &mut secret).unwrap_err();

    assert!(matches!(
        err,
        PassError::Map(MapError::Parse {
            source: ParseError::InvalidUtf8 { line: 3 },
            ..
        })
    ));
    assert_eq!(secret.section, None);
    assert!(!build.path().join("compartments.cap").exists());
}

/// Legacy three-field records take any non-zero flag as "force".
#[test]
fn test_legacy_numeric_flag_forces_guard() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    fs::write(maps.path().join("u.cap"), "foo:3:2\n").unwrap();

    let mut driver = PassDriver::new(PassConfig {
        disable_guard_insertion: true,
        ..config(maps.path(), build.path())
    })
    .unwrap();
    let report = driver
        .run_on_function("u.c", &mut two_block_function("foo"))
        .unwrap()
        .unwrap();

    assert_eq!(report.record.compartment, id(3));
    assert_eq!(report.guard, GuardOutcome::Inserted);
}

#[test]
fn test_per_unit_ledger_keyed_by_section() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    fs::write(maps.path().join("net__tcp.cap"), "send:12\n").unwrap();

    let mut driver = PassDriver::new(PassConfig {
        ledger_name: LedgerName::PerUnit,
        ledger_key: LedgerKey::Section,
        ..config(maps.path(), build.path())
    })
    .unwrap();
    driver
        .run_on_function("net/tcp.c", &mut two_block_function("send"))
        .unwrap();

    let text = fs::read_to_string(build.path().join("net__tcp.cap")).unwrap();
    assert_eq!(text, ".text.compartment.12:12\n");
}

/// Many writers appending to one ledger: every record survives intact.
#[test]
fn test_concurrent_ledger_appends() {
    const WRITERS: usize = 8;
    const RECORDS: usize = 200;

    let dir = tempfile::tempdir().unwrap();
    let barrier = Barrier::new(WRITERS);

    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let barrier = &barrier;
            let dir = dir.path();
            scope.spawn(move || {
                let ledger = LedgerWriter::new(dir, "compartments.cap");
                barrier.wait();
                for record in 0..RECORDS {
                    ledger
                        .append(&format!("w{writer}_f{record}"), id(writer as u16))
                        .unwrap();
                }
            });
        }
    });

    let ledger = Ledger::read(&dir.path().join("compartments.cap")).unwrap();
    assert_eq!(ledger.skipped(), 0);
    assert_eq!(ledger.records().len(), WRITERS * RECORDS);
    assert!(ledger.conflicts().is_empty());
    for writer in 0..WRITERS {
        assert!(ledger.contains(&format!("w{writer}_f{}", RECORDS - 1), id(writer as u16)));
    }
}

/// Two drivers (two compiler processes) sharing one ledger directory.
#[test]
fn test_drivers_share_a_ledger() {
    let build = tempfile::tempdir().unwrap();
    let config = PassConfig {
        ledger_dir: Some(build.path().into()),
        ..Default::default()
    };

    thread::scope(|scope| {
        for (unit, name, compartment) in [("a.c", "a", 1), ("b.c", "b", 2), ("c.c", "c", 3)] {
            let config = PassConfig {
                default_compartment: Some(id(compartment)),
                ..config.clone()
            };
            scope.spawn(move || {
                let mut driver = PassDriver::new(config).unwrap();
                driver
                    .run_on_function(unit, &mut two_block_function(name))
                    .unwrap();
            });
        }
    });

    let ledger = Ledger::read(&build.path().join("compartments.cap")).unwrap();
    assert_eq!(ledger.records().len(), 3);
    assert!(ledger.contains("a", id(1)));
    assert!(ledger.contains("b", id(2)));
    assert!(ledger.contains("c", id(3)));
}

/// A template lists every function and drives a later pass unchanged.
#[test]
fn test_template_round_trips_through_the_pass() {
    let maps = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();

    let path =
        codec::write_unit_template(maps.path(), "lib/util.c", ["ns::helper", "parse"], id(290))
            .unwrap();
    assert_eq!(path, maps.path().join("lib__util.cap"));

    let map = codec::read(&path).unwrap().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.compartment("ns::helper"), Some(id(290)));

    let mut driver = PassDriver::new(config(maps.path(), build.path())).unwrap();
    let report = driver
        .run_on_function("lib/util.c", &mut two_block_function("ns::helper"))
        .unwrap()
        .unwrap();
    assert_eq!(report.record.compartment, id(290));
    assert_eq!(report.record.section, ".text.compartment.290");
}
