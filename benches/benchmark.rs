use chanbus::{CallbackRegistry, Envelope};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

fn bench_envelope_codec(c: &mut Criterion) {
    let envelope =
        Envelope::event_with_reply(vec![json!("greet"), json!("hi"), json!(42)], 7);
    let bytes = envelope.encode().unwrap();

    c.bench_function("envelope_encode", |b| {
        b.iter(|| black_box(&envelope).encode().unwrap())
    });
    c.bench_function("envelope_decode", |b| {
        b.iter(|| Envelope::decode(black_box(&bytes)).unwrap())
    });
}

fn bench_registry(c: &mut Criterion) {
    c.bench_function("registry_register_resolve", |b| {
        let registry = CallbackRegistry::new();
        b.iter(|| {
            let id = registry.register(|_| {});
            registry.resolve(id, Vec::new());
        });
    });
}

criterion_group!(benches, bench_envelope_codec, bench_registry);
criterion_main!(benches);
