//! Benchmarks for the devirtualization pipeline.
//!
//! Measures each stage on a synthetic resource of 256 methods:
//! - Stream extraction (directory walk and keystream decoding)
//! - Structural disassembly without caching
//! - Profile accumulation and opcode resolution
//! - A full attack run

extern crate vmscope;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use vmscope::{
    disassembler::{decode_method, MethodBodyBuilder, OperandShape, OperandShapeTable},
    mapping::{MappingConfig, OpcodeMapper, SignatureTable},
    prelude::*,
};

fn shape_table() -> OperandShapeTable {
    OperandShapeTable::new(1)
        .with(0x01, OperandShape::None)
        .with(0x02, OperandShape::Int32)
        .with(0x07, OperandShape::Branch)
        .with(0x08, OperandShape::Branch)
        .with(0x28, OperandShape::Token)
        .with(0x2A, OperandShape::None)
}

fn method_body(index: u32) -> Vec<u8> {
    let mut body = MethodBodyBuilder::new();
    for i in 0..(index % 16 + 4) {
        body.op_i32(0x02, i as i32).op_token(0x28, 0x0A00_0001 + i);
    }
    let exit = body.pos() + 11;
    body.op_i32(0x02, 1).branch(0x08, exit).op(0x01);
    body.op(0x2A);
    body.build()
}

fn resource() -> Vec<u8> {
    (0..256)
        .fold(
            ResourceBuilder::new(FormatVersion::V2).with_checksums(true),
            |builder, index| {
                builder.method(
                    MethodKey::new(0x0600_0001 + index, index.wrapping_mul(0x9E37_79B9)),
                    method_body(index),
                )
            },
        )
        .build()
}

fn bench_extract(c: &mut Criterion) {
    let extractor = StreamExtractor::new(Resource::from_mem(resource()).unwrap()).unwrap();

    c.bench_function("extract_all", |b| {
        b.iter(|| {
            for entry in extractor.method_entries() {
                black_box(extractor.extract_entry(&entry).unwrap());
            }
        });
    });
}

fn bench_decode(c: &mut Criterion) {
    let table = shape_table();
    let key = MethodKey::new(0x0600_0001, 1);
    let raw = RawInstructionStream::new(key, method_body(15));

    c.bench_function("decode_method", |b| {
        b.iter(|| black_box(decode_method(black_box(&raw), &table).unwrap()));
    });
}

fn bench_mapping(c: &mut Criterion) {
    let table = shape_table();
    let methods: Vec<_> = (0..256)
        .map(|index| {
            let key = MethodKey::new(0x0600_0001 + index, index);
            Arc::new(decode_method(&RawInstructionStream::new(key, method_body(index)), &table).unwrap())
        })
        .collect();
    let mapper = OpcodeMapper::new(SignatureTable::cil(), MappingConfig::default());

    c.bench_function("map_opcodes", |b| {
        b.iter(|| black_box(mapper.map_opcodes(&methods, &NullProgress)));
    });
}

fn bench_attack(c: &mut Criterion) {
    let blob = resource();

    c.bench_function("devirtualize", |b| {
        b.iter(|| {
            let attack = EzirizAttack::new(
                Resource::from_mem(blob.clone()).unwrap(),
                shape_table(),
                AttackConfig::default(),
            )
            .unwrap()
            .with_observer(Arc::new(NullProgress));
            black_box(attack.devirtualize().unwrap())
        });
    });
}

criterion_group!(benches, bench_extract, bench_decode, bench_mapping, bench_attack);
criterion_main!(benches);
