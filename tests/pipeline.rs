//! End-to-end devirtualization tests.
//!
//! Every test builds a synthetic protected resource with [`ResourceBuilder`], runs the
//! Eziriz attack over it and checks the published mapping.

use std::{io::Write, sync::Arc};

use vmscope::{
    disassembler::ShapeSource,
    mapping::{Resolution, SignatureTable, UnresolvedReason},
    prelude::*,
    Result,
};

fn shape_table() -> OperandShapeTable {
    OperandShapeTable::new(1)
        .with(0x01, OperandShape::None)
        .with(0x02, OperandShape::Int32)
        .with(0x07, OperandShape::Branch)
        .with(0x08, OperandShape::Branch)
        .with(0x2A, OperandShape::None)
}

/// Three methods in which opcode `0x07` only ever appears as an unconditional jump: every
/// occurrence is followed by a block leader.
fn jump_methods() -> Vec<(MethodKey, Vec<u8>)> {
    // IL_0000 ldc 1 ; IL_0005 brtrue IL_000F ; IL_000A br IL_0010 ; IL_000F nop ; IL_0010 ret
    let mut first = MethodBodyBuilder::new();
    first
        .op_i32(0x02, 1)
        .branch(0x08, 0x0F)
        .branch(0x07, 0x10)
        .op(0x01)
        .op(0x2A);

    // IL_0000 nop ; IL_0001 br IL_0006 ; IL_0006 ret
    let mut second = MethodBodyBuilder::new();
    second.op(0x01).branch(0x07, 0x06).op(0x2A);

    // IL_0000 br IL_0005 ; IL_0005 ret
    let mut third = MethodBodyBuilder::new();
    third.branch(0x07, 0x05).op(0x2A);

    vec![
        (MethodKey::new(0x0600_0001, 0x1111_1111), first.build()),
        (MethodKey::new(0x0600_0002, 0x2222_2222), second.build()),
        (MethodKey::new(0x0600_0003, 0xE333_3333), third.build()),
    ]
}

fn resource(version: FormatVersion, methods: &[(MethodKey, Vec<u8>)]) -> Vec<u8> {
    methods
        .iter()
        .fold(
            ResourceBuilder::new(version).with_checksums(true),
            |builder, (key, body)| builder.method(*key, body.clone()),
        )
        .build()
}

fn attack(blob: Vec<u8>, config: AttackConfig) -> Result<EzirizAttack> {
    Ok(EzirizAttack::new(Resource::from_mem(blob)?, shape_table(), config)?
        .with_observer(Arc::new(NullProgress)))
}

#[test]
fn test_unconditional_jump_scenario() -> Result<()> {
    for version in [FormatVersion::V1, FormatVersion::V2] {
        let blob = resource(version, &jump_methods());

        let mut mappings = Vec::new();
        for _ in 0..3 {
            let result = attack(blob.clone(), AttackConfig::default())?.devirtualize()?;
            assert_eq!(result.methods.len(), 3);
            assert!(result.failures.is_empty());
            mappings.push(result.mapping);
        }

        assert_eq!(mappings[0].mnemonic(0x07), Some("br"));
        assert!(mappings.iter().all(|mapping| *mapping == mappings[0]));
    }
    Ok(())
}

#[test]
fn test_progress_stream() -> Result<()> {
    let log = Arc::new(ProgressLog::new());
    let attack = EzirizAttack::new(
        Resource::from_mem(resource(FormatVersion::V2, &jump_methods()))?,
        shape_table(),
        AttackConfig::default(),
    )?
    .with_observer(log.clone());
    attack.devirtualize()?;

    let count = |predicate: fn(&ProgressEvent) -> bool| log.events().filter(|e| predicate(e)).count();
    assert_eq!(count(|e| matches!(e, ProgressEvent::MethodExtracted { .. })), 3);
    assert_eq!(count(|e| matches!(e, ProgressEvent::MethodDisassembled { .. })), 3);
    assert_eq!(count(|e| matches!(e, ProgressEvent::MethodProfiled { .. })), 3);
    assert_eq!(count(|e| matches!(e, ProgressEvent::MappingComplete { .. })), 1);
    assert!(log.lines().iter().any(|line| line.starts_with("mapping complete")));
    Ok(())
}

/// Per-method lines follow key order whatever the thread count, failures included.
#[test]
fn test_progress_order_is_stable() -> Result<()> {
    let mut methods = jump_methods();
    let mut broken = MethodBodyBuilder::new();
    broken.op(0x01).raw(&[0x02, 0x10]);
    methods.push((MethodKey::new(0x0600_0000, 9), broken.build()));
    let blob = resource(FormatVersion::V2, &methods);

    let lines = |threads: usize| -> Result<Vec<String>> {
        let log = Arc::new(ProgressLog::new());
        EzirizAttack::new(
            Resource::from_mem(blob.clone())?,
            shape_table(),
            AttackConfig::default().with_threads(threads),
        )?
        .with_observer(log.clone())
        .devirtualize()?;
        Ok(log.lines())
    };

    let single = lines(1)?;
    assert_eq!(single, lines(4)?);
    assert_eq!(single, lines(8)?);

    assert!(single[0].starts_with("extracted 0x06000000"));
    assert!(single[1].starts_with("failed 0x06000000"));
    assert!(single[2].starts_with("extracted 0x06000001"));
    assert!(single[3].starts_with("disassembled 0x06000001"));
    assert!(single[8].starts_with("profiled 0x06000001"));
    assert!(single[10].starts_with("profiled 0x06000003"));
    assert!(single[11].starts_with("mapping complete"));
    assert_eq!(single.len(), 12);
    Ok(())
}

/// Every observed and every declared opcode has an entry, and no unique instruction is
/// claimed twice.
#[test]
fn test_coverage_and_injectivity() -> Result<()> {
    let result = attack(
        resource(FormatVersion::V1, &jump_methods()),
        AttackConfig::lenient(),
    )?
    .devirtualize()?;

    for method in &result.methods {
        for instruction in method.instructions() {
            assert!(result.mapping.get(instruction.opcode).is_some());
        }
    }
    for opcode in shape_table().declared_opcodes() {
        assert!(result.mapping.get(opcode).is_some());
    }
    assert!(result
        .mapping
        .injectivity_violations(&SignatureTable::cil())
        .is_empty());
    Ok(())
}

#[test]
fn test_competing_opcodes_conflict() -> Result<()> {
    // 0x07 and 0x09 behave exactly alike; neither may claim `br`.
    let table = shape_table().with(0x09, OperandShape::Branch);
    let mut first = MethodBodyBuilder::new();
    first.op(0x01).branch(0x07, 0x06).op(0x2A);
    let mut second = MethodBodyBuilder::new();
    second.op(0x01).branch(0x09, 0x06).op(0x2A);
    let blob = resource(
        FormatVersion::V1,
        &[
            (MethodKey::new(0x0600_0001, 1), first.build()),
            (MethodKey::new(0x0600_0002, 2), second.build()),
        ],
    );

    let result = EzirizAttack::new(Resource::from_mem(blob)?, table, AttackConfig::default())?
        .with_observer(Arc::new(NullProgress))
        .devirtualize()?;

    let expected = Resolution::Unresolved(UnresolvedReason::Conflict {
        mnemonic: "br",
        opcodes: vec![0x07, 0x09],
    });
    assert_eq!(result.mapping.get(0x07), Some(&expected));
    assert_eq!(result.mapping.get(0x09), Some(&expected));
    assert!(result
        .mapping
        .unresolved()
        .iter()
        .any(|warning| warning.opcode == 0x09));
    Ok(())
}

/// An undeclared opcode carrying a zero immediate stays an integer operand and leaves the
/// jump opcode's mapping untouched.
#[test]
fn test_zero_immediate_next_to_jump() -> Result<()> {
    let mut methods = jump_methods();
    for index in 0..3 {
        // IL_0000 op_50 0 ; IL_0005 nop ; IL_0006 ret
        let mut body = MethodBodyBuilder::new();
        body.raw(&[0x50, 0x00, 0x00, 0x00, 0x00]).op(0x01).op(0x2A);
        methods.push((
            MethodKey::new(0x0600_0010 + index, 0x5050_0000 + index),
            body.build(),
        ));
    }

    let result = attack(resource(FormatVersion::V1, &methods), AttackConfig::default())?
        .devirtualize()?;

    assert_eq!(result.methods.len(), 6);
    for method in &result.methods {
        for instruction in method.instructions().iter().filter(|i| i.opcode == 0x50) {
            assert_eq!(instruction.source, ShapeSource::Inferred);
            assert_eq!(instruction.operand, Operand::Int32(0));
        }
    }
    assert_eq!(result.mapping.mnemonic(0x07), Some("br"));
    assert_ne!(result.mapping.mnemonic(0x50), Some("br"));
    Ok(())
}

#[test]
fn test_determinism_across_threads_and_order() -> Result<()> {
    let methods = jump_methods();
    let blob = resource(FormatVersion::V2, &methods);
    let keys: Vec<MethodKey> = methods.iter().map(|(key, _)| *key).collect();

    let single = attack(blob.clone(), AttackConfig::default().with_threads(1))?
        .devirtualize_methods(keys.iter().copied())?;
    let parallel = attack(blob, AttackConfig::default().with_threads(4))?
        .devirtualize_methods(keys.iter().rev().copied())?;

    assert_eq!(single.mapping, parallel.mapping);
    assert_eq!(single.methods.len(), parallel.methods.len());
    for (a, b) in single.methods.iter().zip(&parallel.methods) {
        assert_eq!(**a, **b);
    }
    Ok(())
}

#[test]
fn test_truncated_operand_fails_only_its_method() -> Result<()> {
    let mut methods = jump_methods();
    let broken = MethodKey::new(0x0600_0004, 0x4444_4444);
    let mut body = MethodBodyBuilder::new();
    body.op(0x01).raw(&[0x02, 0x10, 0x20]);
    methods.push((broken, body.build()));

    let result = attack(
        resource(FormatVersion::V1, &methods),
        AttackConfig::default().with_verify_cache(true),
    )?
    .devirtualize()?;

    assert_eq!(result.methods.len(), 3);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].key, broken);
    assert!(result.method(&broken).is_none());
    assert!(result.method(&methods[0].0).is_some());
    assert_eq!(result.mapping.mnemonic(0x07), Some("br"));
    Ok(())
}

#[test]
fn test_file_backed_resource() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&resource(FormatVersion::V2, &jump_methods()))?;
    file.flush()?;

    let extractor = StreamExtractor::new(Resource::from_file(file.path())?)?;
    assert_eq!(extractor.len(), 3);

    let attack = EzirizAttack::new(
        Resource::from_file(file.path())?,
        shape_table(),
        AttackConfig::strict(),
    )?
    .with_observer(Arc::new(NullProgress));
    assert!(attack.matches_signature(&std::fs::read(file.path())?));

    let result = attack.devirtualize()?;
    assert_eq!(result.methods.len(), 3);
    assert!(result.mapping.get(0x07).is_some());
    Ok(())
}
