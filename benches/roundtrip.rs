// ABOUTME: Round-trip benchmarks over the binary, tree, and JSON backends.
// ABOUTME: Uses a mid-size mapped struct and a dynamic document as workloads.

use bsonic::{
    decode_document, doc, document_from_json, document_to_json, encode_document, from_slice_with,
    to_vec_with, Bson, ClassMapBuilder, ClassOptions, Document, JsonOutputMode, ObjectId,
    Registry,
};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

#[derive(Default, Debug, Clone, PartialEq)]
struct Event {
    id: ObjectId,
    kind: String,
    sequence: i64,
    weight: f64,
    tags: Vec<String>,
}

fn event_registry() -> Registry {
    let registry = Registry::new();
    bsonic::register_vec::<String>(&registry);
    registry
        .register_class(
            ClassMapBuilder::<Event>::new("Event")
                .id_member("id", |e: &Event| e.id, |e, v| e.id = v)
                .member("kind", |e: &Event| e.kind.clone(), |e, v| e.kind = v)
                .member("sequence", |e: &Event| e.sequence, |e, v| e.sequence = v)
                .member("weight", |e: &Event| e.weight, |e, v| e.weight = v)
                .member("tags", |e: &Event| e.tags.clone(), |e, v| e.tags = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();
    registry
}

fn sample_event(i: i64) -> Event {
    Event {
        id: ObjectId::from_bytes([i as u8; 12]),
        kind: "sensor/update".into(),
        sequence: i,
        weight: i as f64 * 0.25,
        tags: vec!["alpha".into(), "beta".into(), "gamma".into()],
    }
}

fn sample_document() -> Document {
    let mut events = Vec::new();
    for i in 0..64i64 {
        events.push(Bson::from(doc! {
            "seq" => i,
            "kind" => "sensor/update",
            "weight" => i as f64 * 0.25,
            "tags" => vec!["alpha", "beta", "gamma"],
        }));
    }
    doc! { "batch" => "bench", "events" => Bson::Array(events) }
}

fn class_roundtrip(c: &mut Criterion) {
    let registry = event_registry();
    let event = sample_event(7);
    let bytes = to_vec_with(&registry, &event).unwrap();

    let mut group = c.benchmark_group("class");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| to_vec_with(&registry, black_box(&event)).unwrap())
    });
    group.bench_function("decode", |b| {
        b.iter(|| from_slice_with::<Event>(&registry, black_box(&bytes)).unwrap())
    });
    group.finish();
}

fn document_roundtrip(c: &mut Criterion) {
    let doc = sample_document();
    let bytes = encode_document(&doc).unwrap();

    let mut group = c.benchmark_group("document");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| encode_document(black_box(&doc)).unwrap())
    });
    group.bench_function("decode", |b| {
        b.iter(|| decode_document(black_box(&bytes)).unwrap())
    });
    group.finish();
}

fn json_roundtrip(c: &mut Criterion) {
    let doc = sample_document();
    let shell = document_to_json(&doc, JsonOutputMode::Shell).unwrap();

    let mut group = c.benchmark_group("json");
    group.throughput(Throughput::Bytes(shell.len() as u64));
    group.bench_function("render", |b| {
        b.iter(|| document_to_json(black_box(&doc), JsonOutputMode::Shell).unwrap())
    });
    group.bench_function("parse", |b| {
        b.iter(|| document_from_json(black_box(&shell)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, class_roundtrip, document_roundtrip, json_roundtrip);
criterion_main!(benches);
