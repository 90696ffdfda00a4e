#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use liquette::{Engine, Hash, Template};

mod utils;

const LAYOUT: &str = include_str!("templates/layout.liquid");
const CARD: &str = include_str!("templates/card.liquid");
const PAGE: &str = include_str!("templates/page.liquid");

fn liquette_benchmark(c: &mut Criterion) {
    let mut engine = Engine::new();
    engine.add_template("layout", LAYOUT).unwrap();
    engine.add_template("card", CARD).unwrap();
    engine.add_template("page", PAGE).unwrap();

    let contexts: Vec<Hash> = utils::storefronts(100)
        .into_iter()
        .map(|json| serde_json::from_value(json).unwrap())
        .collect();

    let mut group = c.benchmark_group("Storefront");
    group.sample_size(50);

    group.bench_function("liquette_parse", |b| {
        b.iter(|| black_box(Template::parse(black_box(PAGE)).unwrap()));
    });

    group.bench_function("liquette_render", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(engine.render("page", context).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, liquette_benchmark);
criterion_main!(benches);
