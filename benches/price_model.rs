use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use kairos::engine::MarketEngine;
use kairos::model::PriceModel;
use kairos::source::sample::SampleSource;
use kairos::store::memory::MemoryStore;

fn price_model_walk() {
    let mut model = PriceModel::seeded(1);
    let mut price = 100.0;
    for _ in 0..1000 {
        price = model.next_price(price, 0.001, 0.02);
    }
    criterion::black_box(price);
}

fn engine_advance_loop() {
    let engine = MarketEngine::with_model(
        Arc::new(MemoryStore::new()),
        Box::new(SampleSource::new()),
        PriceModel::seeded(1),
    );
    let _ = engine.initialize_market();
    for _ in 0..100 {
        let _ = engine.advance();
    }
}

fn benchmarks(c: &mut Criterion) {
    c.bench_function("price model walk", |b| b.iter(price_model_walk));
    c.bench_function("engine advance loop", |b| b.iter(engine_advance_loop));
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
